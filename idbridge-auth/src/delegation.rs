//! Delegation chains
//!
//! A chain is an ordered, non-empty list of signed delegations plus the root
//! public key. The root key signs the first delegation, each delegated key
//! signs the next one, and the last delegated key is the session key that will
//! sign requests. Order on the wire is root first and is preserved.

use crate::{
    crypto::{SignIdentity, SignatureVerifier},
    error::{AuthError, Result},
    principal::Principal,
};
use idbridge_common::{DelegationResult, RawDelegation, RawSignedDelegation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Prefix of every signed delegation payload
pub const DELEGATION_DOMAIN_SEPARATOR: &[u8] = b"\x1Aic-request-auth-delegation";

/// Maximum delegation depth to prevent unbounded chains
pub const MAX_DELEGATION_DEPTH: usize = 20;

/// Set of principals a delegated key may act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// No `targets` given: any principal
    Unrestricted,
    /// Only the listed principals. An empty set permits nothing.
    Restricted(BTreeSet<Principal>),
}

impl Scope {
    /// `None` is unrestricted, `Some(&[])` is an empty scope
    pub fn from_targets(targets: Option<&[Principal]>) -> Self {
        match targets {
            None => Scope::Unrestricted,
            Some(targets) => Scope::Restricted(targets.iter().cloned().collect()),
        }
    }

    pub fn permits(&self, target: &Principal) -> bool {
        match self {
            Scope::Unrestricted => true,
            Scope::Restricted(targets) => targets.contains(target),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Scope::Unrestricted)
    }

    /// Scope permitted by both `self` and `other`
    pub fn intersect(self, other: Scope) -> Scope {
        match (self, other) {
            (Scope::Unrestricted, other) | (other, Scope::Unrestricted) => other,
            (Scope::Restricted(a), Scope::Restricted(b)) => {
                Scope::Restricted(a.intersection(&b).cloned().collect())
            }
        }
    }
}

/// Statement that `pubkey` may act for the signer until `expiration`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    /// Delegated public key
    #[serde(with = "hex::serde")]
    pub pubkey: Vec<u8>,

    /// Expiration in nanoseconds since the Unix epoch
    #[serde(with = "expiration_serde")]
    pub expiration: u64,

    /// Optional scope restriction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<Principal>>,
}

impl Delegation {
    /// Create an unrestricted delegation
    pub fn new(pubkey: Vec<u8>, expiration: u64) -> Self {
        Self {
            pubkey,
            expiration,
            targets: None,
        }
    }

    /// Restrict (or, with `None`, unrestrict) the delegation
    pub fn with_scope(mut self, targets: Option<Vec<Principal>>) -> Self {
        self.targets = targets;
        self
    }

    pub fn scope(&self) -> Scope {
        Scope::from_targets(self.targets.as_deref())
    }

    /// Canonical payload covered by the signature
    pub fn signing_data(&self) -> Vec<u8> {
        let mut hasher = Sha256::new();

        hasher.update((self.pubkey.len() as u64).to_be_bytes());
        hasher.update(&self.pubkey);
        hasher.update(self.expiration.to_be_bytes());
        match &self.targets {
            None => hasher.update([0u8]),
            Some(targets) => {
                hasher.update([1u8]);
                hasher.update((targets.len() as u64).to_be_bytes());
                for target in targets {
                    let bytes = target.as_str().as_bytes();
                    hasher.update((bytes.len() as u64).to_be_bytes());
                    hasher.update(bytes);
                }
            }
        }

        let mut data = DELEGATION_DOMAIN_SEPARATOR.to_vec();
        data.extend_from_slice(&hasher.finalize());
        data
    }

    /// Sign with the key that is delegating
    pub fn sign(self, signer: &dyn SignIdentity) -> Result<SignedDelegation> {
        let signature = signer.sign(&self.signing_data())?;
        Ok(SignedDelegation {
            delegation: self,
            signature,
        })
    }
}

/// Delegation plus signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDelegation {
    pub delegation: Delegation,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

impl SignedDelegation {
    fn from_raw(raw: RawSignedDelegation) -> Result<Self> {
        let targets = raw
            .delegation
            .targets
            .map(|targets| {
                targets
                    .into_iter()
                    .map(Principal::from_text)
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()
            .map_err(|e| AuthError::InvalidDelegationChain(format!("Bad target: {}", e)))?;

        Ok(Self {
            delegation: Delegation {
                pubkey: raw.delegation.pubkey,
                expiration: raw.delegation.expiration,
                targets,
            },
            signature: raw.signature,
        })
    }
}

/// Delegation Chain
///
/// Root public key plus delegations, root first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationChain {
    delegations: Vec<SignedDelegation>,
    #[serde(rename = "publicKey", with = "hex::serde")]
    public_key: Vec<u8>,
}

impl DelegationChain {
    /// Assemble a chain from a provider response, preserving order
    pub fn build(raw: Vec<RawSignedDelegation>, root_public_key: Vec<u8>) -> Result<Self> {
        let delegations = raw
            .into_iter()
            .map(SignedDelegation::from_raw)
            .collect::<Result<Vec<_>>>()?;
        Self::from_delegations(delegations, root_public_key)
    }

    /// Assemble a chain from a delegation RPC result
    pub fn from_result(result: DelegationResult) -> Result<Self> {
        Self::build(result.delegations, result.user_public_key)
    }

    /// Structural checks only; signatures are checked by [`Self::validate`]
    pub fn from_delegations(
        delegations: Vec<SignedDelegation>,
        root_public_key: Vec<u8>,
    ) -> Result<Self> {
        if delegations.is_empty() {
            return Err(AuthError::InvalidDelegationChain(
                "A delegation chain needs at least one delegation".to_string(),
            ));
        }
        if root_public_key.is_empty() {
            return Err(AuthError::InvalidDelegationChain(
                "Missing root public key".to_string(),
            ));
        }

        let chain = Self {
            delegations,
            public_key: root_public_key,
        };
        chain.check_depth(MAX_DELEGATION_DEPTH)?;
        Ok(chain)
    }

    /// Issue a delegation from `issuer` to `to_public_key`.
    ///
    /// Without `previous` the issuer is the root. With `previous` the issuer
    /// must hold the leaf key of that chain and the new delegation is appended.
    pub fn create(
        issuer: &dyn SignIdentity,
        to_public_key: Vec<u8>,
        expiration: u64,
        targets: Option<Vec<Principal>>,
        previous: Option<DelegationChain>,
    ) -> Result<Self> {
        let signed = Delegation::new(to_public_key, expiration)
            .with_scope(targets)
            .sign(issuer)?;

        match previous {
            None => Self::from_delegations(vec![signed], issuer.public_key()),
            Some(previous) => {
                if previous.leaf_public_key() != issuer.public_key().as_slice() {
                    return Err(AuthError::InvalidDelegationChain(
                        "Issuer does not hold the leaf key of the previous chain".to_string(),
                    ));
                }
                let mut delegations = previous.delegations;
                delegations.push(signed);
                Self::from_delegations(delegations, previous.public_key)
            }
        }
    }

    pub fn delegations(&self) -> &[SignedDelegation] {
        &self.delegations
    }

    pub fn root_public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Key the chain ultimately delegates to
    pub fn leaf_public_key(&self) -> &[u8] {
        self.delegations
            .last()
            .map(|d| d.delegation.pubkey.as_slice())
            .unwrap_or_default()
    }

    /// Get delegation depth
    pub fn depth(&self) -> usize {
        self.delegations.len()
    }

    /// Check if delegation depth is within limits
    pub fn check_depth(&self, max_depth: usize) -> Result<()> {
        if self.depth() > max_depth {
            return Err(AuthError::DelegationDepthExceeded {
                current: self.depth(),
                max: max_depth,
            });
        }

        Ok(())
    }

    /// Earliest expiration in the chain
    pub fn min_expiration(&self) -> u64 {
        self.delegations
            .iter()
            .map(|d| d.delegation.expiration)
            .min()
            .unwrap_or(0)
    }

    /// Walk the signatures from the root key to the leaf
    pub fn verify_signatures(&self, verifier: &dyn SignatureVerifier) -> Result<()> {
        let mut signer = self.public_key.as_slice();

        for (index, signed) in self.delegations.iter().enumerate() {
            let data = signed.delegation.signing_data();
            if !verifier.verify(signer, &data, &signed.signature) {
                return Err(AuthError::InvalidDelegationChain(format!(
                    "Signature of delegation {} does not verify",
                    index
                )));
            }
            signer = signed.delegation.pubkey.as_slice();
        }

        Ok(())
    }

    /// Every expiration strictly after `now` and every signature valid
    pub fn validate(&self, now: u64, verifier: &dyn SignatureVerifier) -> Result<()> {
        let expiration = self.min_expiration();
        if expiration <= now {
            return Err(AuthError::DelegationExpired { expiration, now });
        }
        self.verify_signatures(verifier)
    }

    pub fn is_valid(&self, now: u64, verifier: &dyn SignatureVerifier) -> bool {
        self.validate(now, verifier).is_ok()
    }

    /// Effective scope: the intersection of every delegation's scope
    pub fn scope(&self) -> Scope {
        self.delegations
            .iter()
            .map(|d| d.delegation.scope())
            .fold(Scope::Unrestricted, Scope::intersect)
    }

    pub fn permits(&self, target: &Principal) -> bool {
        self.scope().permits(target)
    }

    /// Get full audit trail (root → leaf), keys abbreviated
    pub fn audit_trail(&self) -> Vec<String> {
        let mut signer = self.public_key.as_slice();
        self.delegations
            .iter()
            .map(|d| {
                let entry = format!("{} → {}", short_key(signer), short_key(&d.delegation.pubkey));
                signer = d.delegation.pubkey.as_slice();
                entry
            })
            .collect()
    }

    /// Wire form of the chain, as a provider returns it
    pub fn to_result(&self) -> DelegationResult {
        DelegationResult {
            delegations: self
                .delegations
                .iter()
                .map(|d| RawSignedDelegation {
                    delegation: RawDelegation {
                        pubkey: d.delegation.pubkey.clone(),
                        expiration: d.delegation.expiration,
                        targets: d
                            .delegation
                            .targets
                            .as_ref()
                            .map(|targets| targets.iter().map(|t| t.to_string()).collect()),
                    },
                    signature: d.signature.clone(),
                })
                .collect(),
            user_public_key: self.public_key.clone(),
        }
    }

    /// Serialize for storage
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Restore a chain written by [`Self::to_json`]
    pub fn from_json(json: &str) -> Result<Self> {
        let chain: DelegationChain = serde_json::from_str(json)
            .map_err(|e| AuthError::InvalidDelegationChain(format!("Unreadable chain: {}", e)))?;
        Self::from_delegations(chain.delegations, chain.public_key)
    }
}

fn short_key(key: &[u8]) -> String {
    let encoded = hex::encode(key);
    encoded.chars().take(8).collect()
}

/// Expirations are stored as hex strings, as the reference JSON encoding does
mod expiration_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(expiration: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:x}", expiration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex_string = String::deserialize(deserializer)?;
        u64::from_str_radix(&hex_string, 16).map_err(serde::de::Error::custom)
    }
}
