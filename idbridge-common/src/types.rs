//! Method payloads carried inside wire messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parameters of a legacy value-transfer request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferParams {
    /// Receiving account
    pub to: String,
    /// Amount in token units
    pub amount: f64,
}

/// Outcome of a value-transfer request as reported by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferResult {
    /// Transfer landed at the given block height
    Success { height: u64 },
    /// The user declined the transfer
    Rejected { message: String },
    /// The transfer could not be performed
    Error { message: String },
}

/// Outcome of an account-list request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountsResult {
    /// Accounts the user agreed to share
    Success { accounts: Vec<String> },
    /// The user declined to share accounts
    Rejected { message: String },
    /// The request could not be served
    Error { message: String },
}

/// Message used by transfer and account flows when the user closes the popup
pub const TERMINATED_BY_USER: &str = "Terminated by user";

impl TransferResult {
    /// Result reported when the user closes the provider surface
    pub fn terminated_by_user() -> Self {
        Self::Error {
            message: TERMINATED_BY_USER.to_string(),
        }
    }
}

impl AccountsResult {
    /// Result reported when the user closes the provider surface
    pub fn terminated_by_user() -> Self {
        Self::Error {
            message: TERMINATED_BY_USER.to_string(),
        }
    }
}

/// Verified phone-number credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialResult {
    /// Persona domain the credential was issued for
    pub domain: String,
    /// Principal of the client that owns the credential
    pub client_principal: String,
    /// SHA-256 of the verified phone number, hex encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number_sha2: Option<String>,
    /// Issuance time
    pub created_date: DateTime<Utc>,
}

/// Unsigned delegation as it travels on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDelegation {
    /// Delegated public key
    #[serde(with = "hex::serde")]
    pub pubkey: Vec<u8>,
    /// Expiration in nanoseconds since the Unix epoch
    pub expiration: u64,
    /// Principals the delegated key may act on; absent means unrestricted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
}

/// Delegation plus the signature of the key it was issued by
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSignedDelegation {
    pub delegation: RawDelegation,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

/// Result of a delegation request (`ic_getDelegation` / `ic_renewDelegation`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationResult {
    /// Signed delegations, root first
    pub delegations: Vec<RawSignedDelegation>,
    /// Root public key of the chain
    #[serde(with = "hex::serde")]
    pub user_public_key: Vec<u8>,
}

/// Parameters of a delegation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationRequest {
    /// Public key of the client's session key
    #[serde(with = "hex::serde")]
    pub session_public_key: Vec<u8>,
    /// Requested lifetime in nanoseconds
    pub max_time_to_live: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation_origin: Option<String>,
}

/// Fungible-token transfer requested through the embedded provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtTransferRequest {
    pub receiver: String,
    /// Decimal amount, kept as a string to avoid precision loss
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation_origin: Option<String>,
}

/// Non-fungible-token transfer requested through the embedded provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftTransferRequest {
    pub receiver: String,
    pub token_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation_origin: Option<String>,
}

/// Third-party canister call approved through the embedded provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanisterCallRequest {
    pub method: String,
    pub canister_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation_origin: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transfer_result_wire_shape() {
        let success: TransferResult =
            serde_json::from_value(json!({"status": "SUCCESS", "height": 42})).unwrap();
        assert_eq!(success, TransferResult::Success { height: 42 });

        let json = serde_json::to_value(TransferResult::terminated_by_user()).unwrap();
        assert_eq!(
            json,
            json!({"status": "ERROR", "message": "Terminated by user"})
        );
    }

    #[test]
    fn test_accounts_result_rejected() {
        let rejected: AccountsResult =
            serde_json::from_value(json!({"status": "REJECTED", "message": "no"})).unwrap();
        assert_eq!(
            rejected,
            AccountsResult::Rejected {
                message: "no".to_string()
            }
        );
    }

    #[test]
    fn test_delegation_result_hex_fields() {
        let result: DelegationResult = serde_json::from_value(json!({
            "delegations": [{
                "delegation": {"pubkey": "0a0b", "expiration": 100},
                "signature": "ff"
            }],
            "userPublicKey": "01"
        }))
        .unwrap();

        assert_eq!(result.user_public_key, vec![1]);
        assert_eq!(result.delegations[0].delegation.pubkey, vec![0x0a, 0x0b]);
        assert!(result.delegations[0].delegation.targets.is_none());
        assert_eq!(result.delegations[0].signature, vec![0xff]);
    }

    #[test]
    fn test_credential_result_camel_case() {
        let json = json!({
            "domain": "https://app.example",
            "clientPrincipal": "aaaaa-aa",
            "createdDate": "2024-01-01T00:00:00Z"
        });
        let result: CredentialResult = serde_json::from_value(json).unwrap();
        assert_eq!(result.client_principal, "aaaaa-aa");
        assert!(result.phone_number_sha2.is_none());
    }
}
