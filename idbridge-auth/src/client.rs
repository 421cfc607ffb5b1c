//! Auth client
//!
//! Owns the session key, restores a persisted session on creation, turns
//! delegation responses into an [`Identity`] and clears everything on logout.
//! It does not talk to the provider itself; the transport layer performs the
//! exchange and hands the verified response over.

use crate::{
    clock::{Clock, SystemClock, NANOS_PER_HOUR},
    crypto::{Ed25519KeyIdentity, Ed25519Verifier, SignIdentity, SignatureVerifier},
    delegation::DelegationChain,
    error::{AuthError, Result},
    identity::{DelegationIdentity, Identity},
    principal::Principal,
    storage::{migrate_legacy, AuthStorage, MemoryStorage, SessionStore},
};
use idbridge_common::{DelegationRequest, DelegationResult};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default delegation lifetime: 8 hours
pub const DEFAULT_TIME_TO_LIVE: u64 = 8 * NANOS_PER_HOUR;

/// Kind of delegation currently held
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationType {
    /// No delegation, or one scoped to the requesting application only
    Anonymous,
    /// Delegation restricted to explicit targets, usable for transfers and calls
    Global,
}

/// Options for [`AuthClient::create`]
#[derive(Clone)]
pub struct AuthClientOptions {
    /// Session key to use instead of the stored or generated one. It is
    /// never written to storage, and stored state is neither read nor cleared.
    pub identity: Option<Ed25519KeyIdentity>,
    /// Current store
    pub storage: Arc<dyn AuthStorage>,
    /// Older store to migrate a session from on first use
    pub legacy_storage: Option<Arc<dyn AuthStorage>>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub clock: Arc<dyn Clock>,
}

impl Default for AuthClientOptions {
    fn default() -> Self {
        Self {
            identity: None,
            storage: Arc::new(MemoryStorage::new()),
            legacy_storage: None,
            verifier: Arc::new(Ed25519Verifier),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Parameters of a delegation request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegationOptions {
    pub targets: Option<Vec<Principal>>,
    /// Lifetime in nanoseconds, [`DEFAULT_TIME_TO_LIVE`] when unset
    pub max_time_to_live: Option<u64>,
    pub derivation_origin: Option<String>,
}

pub struct AuthClient {
    identity: Identity,
    key: Arc<Ed25519KeyIdentity>,
    chain: Option<DelegationChain>,
    storage: Arc<dyn AuthStorage>,
    verifier: Arc<dyn SignatureVerifier>,
    clock: Arc<dyn Clock>,
}

impl AuthClient {
    /// Restore the persisted session, or start anonymous with a fresh key.
    ///
    /// An expired or unverifiable stored chain is discarded together with its
    /// key; restore never fails because of it.
    pub async fn create(options: AuthClientOptions) -> Result<Self> {
        let AuthClientOptions {
            identity,
            storage,
            legacy_storage,
            verifier,
            clock,
        } = options;

        let mut restored: Option<(Ed25519KeyIdentity, Option<DelegationChain>)> = None;

        if let Some(key) = identity {
            restored = Some((key, None));
        } else {
            if let Some(legacy) = &legacy_storage {
                if let Err(e) = migrate_legacy(storage.as_ref(), legacy.as_ref()).await {
                    warn!(error = %e, "Failed to migrate the legacy session store");
                }
            }

            let store = SessionStore::new(storage.as_ref());
            if let Some(session) = store.load().await? {
                match session.decode() {
                    Ok((key, chain)) => restored = Some((key, chain)),
                    Err(e) => {
                        warn!(error = %e, "Stored session is unreadable, discarding");
                        store.clear().await?;
                    }
                }
            }
        }

        let now = clock.now_nanos();
        let mut session = None;

        if let Some((key, chain)) = restored {
            let key = Arc::new(key);
            match chain {
                None => session = Some((key, None)),
                Some(chain) => match Self::bind(&key, chain, now, verifier.as_ref()) {
                    Ok((chain, identity)) => session = Some((key, Some((chain, identity)))),
                    Err(e) => {
                        info!(error = %e, "Stored delegation is no longer valid, discarding");
                        SessionStore::new(storage.as_ref()).clear().await?;
                    }
                },
            }
        }

        let (key, delegated) = match session {
            Some(session) => session,
            None => {
                let key = Arc::new(Ed25519KeyIdentity::generate());
                SessionStore::new(storage.as_ref()).save(&key, None).await?;
                debug!("Generated a new session key");
                (key, None)
            }
        };

        let (chain, identity) = match delegated {
            Some((chain, identity)) => (Some(chain), Identity::Delegated(identity)),
            None => (None, Identity::Anonymous),
        };

        Ok(Self {
            identity,
            key,
            chain,
            storage,
            verifier,
            clock,
        })
    }

    fn bind(
        key: &Arc<Ed25519KeyIdentity>,
        chain: DelegationChain,
        now: u64,
        verifier: &dyn SignatureVerifier,
    ) -> Result<(DelegationChain, DelegationIdentity)> {
        chain.validate(now, verifier)?;
        let identity = DelegationIdentity::from_delegation(key.clone(), chain.clone())?;
        Ok((chain, identity))
    }

    /// Build the payload of a delegation request for this session key
    pub fn delegation_request(&self, options: &DelegationOptions) -> DelegationRequest {
        DelegationRequest {
            session_public_key: self.key.public_key(),
            max_time_to_live: options.max_time_to_live.unwrap_or(DEFAULT_TIME_TO_LIVE),
            targets: options
                .targets
                .as_ref()
                .map(|targets| targets.iter().map(|t| t.to_string()).collect()),
            derivation_origin: options.derivation_origin.clone(),
        }
    }

    /// Turn a verified-origin delegation response into the current identity
    /// and persist it with the session key
    pub async fn complete_login(&mut self, result: DelegationResult) -> Result<Identity> {
        let chain = DelegationChain::from_result(result)?;
        let now = self.clock.now_nanos();
        let (chain, identity) = Self::bind(&self.key, chain, now, self.verifier.as_ref())?;

        SessionStore::new(self.storage.as_ref())
            .save(&self.key, Some(&chain))
            .await?;

        info!(depth = chain.depth(), "Delegation established");
        self.chain = Some(chain);
        self.identity = Identity::Delegated(identity);
        Ok(self.identity.clone())
    }

    /// Check that there is a live delegation to renew. An expired or
    /// unverifiable one is discarded and reported.
    pub async fn ensure_renewable(&mut self) -> Result<()> {
        let Some(chain) = &self.chain else {
            return Err(AuthError::InvalidDelegationChain(
                "No delegation to renew".to_string(),
            ));
        };

        let now = self.clock.now_nanos();
        if let Err(e) = chain.validate(now, self.verifier.as_ref()) {
            warn!(error = %e, "Delegation cannot be renewed, discarding");
            self.logout().await?;
            return Err(AuthError::InvalidDelegationChain(e.to_string()));
        }
        Ok(())
    }

    /// Clear persisted state and reset to anonymous
    pub async fn logout(&mut self) -> Result<()> {
        SessionStore::new(self.storage.as_ref()).clear().await?;
        self.identity = Identity::Anonymous;
        self.chain = None;
        Ok(())
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn chain(&self) -> Option<&DelegationChain> {
        self.chain.as_ref()
    }

    pub fn session_public_key(&self) -> Vec<u8> {
        self.key.public_key()
    }

    pub fn is_authenticated(&self) -> bool {
        !self.identity.is_anonymous() && self.chain.is_some()
    }

    pub fn delegation_type(&self) -> DelegationType {
        match &self.chain {
            Some(chain) if !chain.scope().is_unrestricted() => DelegationType::Global,
            _ => DelegationType::Anonymous,
        }
    }
}
