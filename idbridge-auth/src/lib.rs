//! # idbridge-auth: delegated identities for idbridge
//!
//! Everything on the client side of the handshake that does not depend on how
//! messages travel between the application and the identity provider.
//!
//! ## Features
//!
//! - **Delegation chains**: construction, root→leaf signature verification,
//!   expiration and scope (target) intersection
//! - **Identities**: anonymous or a session key bound to a chain
//! - **Session storage**: key and chain persisted as a pair, legacy store migration
//! - **Auth client**: restore, login, renewal checks and logout
//! - **Credential verification**: interface to the remote verifier
//!
//! ## Chain layout
//!
//! ```text
//!   root key (user)  ──signs──▶  delegation 1  ──▶ ... ──▶  delegation n
//!                                                            pubkey = session key
//! ```

pub mod client;
pub mod clock;
pub mod credentials;
pub mod crypto;
pub mod delegation;
pub mod error;
pub mod identity;
pub mod principal;
pub mod storage;

// Re-exports for convenience
pub use client::{AuthClient, AuthClientOptions, DelegationOptions, DelegationType};
pub use clock::{Clock, FixedClock, SystemClock};
pub use credentials::{
    verify_phone_number_credential, BoolHttpResponse, CredentialVerifier,
    MemoryCredentialVerifier,
};
pub use crypto::{Ed25519KeyIdentity, Ed25519Verifier, SignIdentity, SignatureVerifier};
pub use delegation::{DelegationChain, Scope, SignedDelegation};
pub use error::{AuthError, Result};
pub use identity::{DelegatedSignature, DelegationIdentity, Identity};
pub use principal::Principal;
pub use storage::{AuthStorage, MemoryStorage, SessionStore};

pub use client::DEFAULT_TIME_TO_LIVE;
pub use delegation::MAX_DELEGATION_DEPTH;
