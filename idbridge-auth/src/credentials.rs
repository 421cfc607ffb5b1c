//! Verification of previously issued credentials
//!
//! The verifier itself is a remote service; this module defines its interface
//! and interprets its answers.

use crate::{
    error::{AuthError, Result},
    principal::Principal,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Default provider page for the phone-number credential
pub const DEFAULT_CREDENTIAL_PROVIDER: &str = "https://nfid.one/credential/verified-phone-number";

/// Boolean answer of the verifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoolHttpResponse {
    pub data: Option<bool>,
    pub error: Option<String>,
    pub status_code: u16,
}

impl BoolHttpResponse {
    pub fn ok(value: bool) -> Self {
        Self {
            data: Some(value),
            error: None,
            status_code: 200,
        }
    }

    pub fn error(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(message.into()),
            status_code,
        }
    }
}

/// Remote credential verifier
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Whether `principal` holds an approved phone-number credential
    async fn is_phone_number_approved(&self, principal: &Principal) -> Result<BoolHttpResponse>;
}

/// Check that `principal` holds an approved phone-number credential.
///
/// A non-200 status becomes [`AuthError::VerificationFailed`]; a missing
/// value counts as not approved.
pub async fn verify_phone_number_credential(
    verifier: &dyn CredentialVerifier,
    principal: &Principal,
) -> Result<bool> {
    let response = verifier.is_phone_number_approved(principal).await?;

    if response.status_code != 200 {
        let message = response
            .error
            .unwrap_or_else(|| "no error message".to_string());
        warn!(
            principal = %principal,
            status_code = response.status_code,
            "Credential verifier returned an error"
        );
        return Err(AuthError::VerificationFailed {
            status_code: response.status_code,
            message,
        });
    }

    let approved = response.data.unwrap_or(false);
    debug!(principal = %principal, approved, "Phone number credential checked");
    Ok(approved)
}

/// Verifier backed by a local set of approved principals
#[derive(Debug, Default)]
pub struct MemoryCredentialVerifier {
    approved: RwLock<BTreeSet<Principal>>,
}

impl MemoryCredentialVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn approve(&self, principal: Principal) {
        self.approved.write().await.insert(principal);
    }

    pub async fn revoke(&self, principal: &Principal) {
        self.approved.write().await.remove(principal);
    }
}

#[async_trait]
impl CredentialVerifier for MemoryCredentialVerifier {
    async fn is_phone_number_approved(&self, principal: &Principal) -> Result<BoolHttpResponse> {
        let approved = self.approved.read().await.contains(principal);
        Ok(BoolHttpResponse::ok(approved))
    }
}
