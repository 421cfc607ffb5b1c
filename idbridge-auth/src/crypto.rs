//! Signing capability
//!
//! The protocol only needs three things from the signature scheme: sign,
//! verify, and derive a public key. They are expressed as traits so other
//! schemes can be plugged in; Ed25519 is provided.

use crate::error::{AuthError, Result};
use ed25519_compact::{KeyPair, PublicKey, Seed, Signature};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A key able to sign on its own behalf
pub trait SignIdentity: Send + Sync + fmt::Debug {
    /// Raw public key bytes
    fn public_key(&self) -> Vec<u8>;

    /// Sign `message`
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Verifies signatures produced by some [`SignIdentity`]
pub trait SignatureVerifier: Send + Sync {
    /// True iff `signature` is a valid signature of `message` by `public_key`
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;
}

/// Ed25519 session key
#[derive(Clone)]
pub struct Ed25519KeyIdentity {
    keypair: KeyPair,
}

/// Serialized form: `[public key hex, seed hex]`
#[derive(Serialize, Deserialize)]
struct Ed25519KeyRecord(String, String);

impl Ed25519KeyIdentity {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        Self {
            keypair: KeyPair::generate(),
        }
    }

    /// Deterministic key from a 32-byte seed
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            keypair: KeyPair::from_seed(Seed::new(seed)),
        }
    }

    /// Serialize for storage
    pub fn to_json(&self) -> Result<String> {
        let record = Ed25519KeyRecord(
            hex::encode(*self.keypair.pk),
            hex::encode(*self.keypair.sk.seed()),
        );
        Ok(serde_json::to_string(&record)?)
    }

    /// Restore a key written by [`Ed25519KeyIdentity::to_json`]
    pub fn from_json(json: &str) -> Result<Self> {
        let record: Ed25519KeyRecord = serde_json::from_str(json)
            .map_err(|e| AuthError::InvalidKey(format!("Unrecognized key record: {}", e)))?;

        let seed: [u8; 32] = hex::decode(&record.1)?
            .try_into()
            .map_err(|_| AuthError::InvalidKey("Seed must be 32 bytes".to_string()))?;
        let identity = Self::from_seed(seed);

        let public_key = hex::decode(&record.0)?;
        if identity.keypair.pk[..] != public_key[..] {
            return Err(AuthError::InvalidKey(
                "Public key does not match seed".to_string(),
            ));
        }

        Ok(identity)
    }
}

impl fmt::Debug for Ed25519KeyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519KeyIdentity")
            .field("public_key", &hex::encode(*self.keypair.pk))
            .finish()
    }
}

impl SignIdentity for Ed25519KeyIdentity {
    fn public_key(&self) -> Vec<u8> {
        self.keypair.pk.to_vec()
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.keypair.sk.sign(message, None).to_vec())
    }
}

/// Ed25519 signature verification
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        let Ok(public_key) = PublicKey::from_slice(public_key) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        public_key.verify(message, &signature).is_ok()
    }
}
