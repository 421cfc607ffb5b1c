//! Identities usable by the consuming application
//!
//! An identity is either anonymous or a local session key bound to a
//! delegation chain whose leaf is that key.

use crate::{
    crypto::SignIdentity,
    delegation::DelegationChain,
    error::{AuthError, Result},
};
use std::sync::Arc;

/// Identity handed to the application
#[derive(Debug, Clone)]
pub enum Identity {
    /// No delegation: requests go out unsigned
    Anonymous,
    /// Session key acting on behalf of the chain's root key
    Delegated(DelegationIdentity),
}

impl Identity {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }

    /// Public key the identity speaks for (the chain root)
    pub fn public_key(&self) -> Option<&[u8]> {
        match self {
            Identity::Anonymous => None,
            Identity::Delegated(identity) => Some(identity.chain.root_public_key()),
        }
    }

    pub fn chain(&self) -> Option<&DelegationChain> {
        match self {
            Identity::Anonymous => None,
            Identity::Delegated(identity) => Some(&identity.chain),
        }
    }
}

/// Session key plus the chain that delegates to it
#[derive(Debug, Clone)]
pub struct DelegationIdentity {
    key: Arc<dyn SignIdentity>,
    chain: DelegationChain,
}

/// Signature produced by a delegated identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegatedSignature {
    /// Signature by the session key
    pub signature: Vec<u8>,
    /// Root public key the request is sent as
    pub sender_public_key: Vec<u8>,
    /// Chain proving the session key may sign for the sender
    pub chain: DelegationChain,
}

impl DelegationIdentity {
    /// Bind `key` to `chain`; the chain's leaf must be `key`
    pub fn from_delegation(key: Arc<dyn SignIdentity>, chain: DelegationChain) -> Result<Self> {
        if chain.leaf_public_key() != key.public_key().as_slice() {
            return Err(AuthError::InvalidDelegationChain(
                "Chain does not delegate to the session key".to_string(),
            ));
        }
        Ok(Self { key, chain })
    }

    pub fn chain(&self) -> &DelegationChain {
        &self.chain
    }

    pub fn session_public_key(&self) -> Vec<u8> {
        self.key.public_key()
    }

    pub fn sign(&self, message: &[u8]) -> Result<DelegatedSignature> {
        Ok(DelegatedSignature {
            signature: self.key.sign(message)?,
            sender_public_key: self.chain.root_public_key().to_vec(),
            chain: self.chain.clone(),
        })
    }
}
