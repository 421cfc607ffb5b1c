//! Error types for identity and delegation handling

/// Result type for auth operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// Auth-specific errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Chain is empty, malformed, expired or fails signature verification
    #[error("Invalid delegation chain: {0}")]
    InvalidDelegationChain(String),

    /// Delegation expired
    #[error("Delegation expired at {expiration} (now {now})")]
    DelegationExpired {
        /// Earliest expiration in the chain, nanoseconds
        expiration: u64,
        /// Time of the check, nanoseconds
        now: u64,
    },

    /// Delegation depth exceeded
    #[error("Delegation depth exceeded: {current} > {max}")]
    DelegationDepthExceeded {
        /// Number of delegations in the chain
        current: usize,
        /// Maximum allowed depth
        max: usize,
    },

    /// Principal text is not valid
    #[error("Invalid principal: {0}")]
    InvalidPrincipal(String),

    /// Session key record could not be decoded
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// Storage backend failed
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Remote credential verifier answered with an error
    #[error("Credential verification failed ({status_code}): {message}")]
    VerificationFailed {
        /// HTTP-style status returned by the verifier
        status_code: u16,
        /// Verifier error text
        message: String,
    },
}

impl AuthError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            AuthError::StorageError(_) => true,
            AuthError::VerificationFailed { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }

    /// Whether the stored credential should be discarded and the user
    /// sent through authentication again
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidDelegationChain(_)
                | AuthError::DelegationExpired { .. }
                | AuthError::DelegationDepthExceeded { .. }
                | AuthError::InvalidKey(_)
        )
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<hex::FromHexError> for AuthError {
    fn from(err: hex::FromHexError) -> Self {
        AuthError::Serialization(format!("Hex error: {}", err))
    }
}

impl From<ed25519_compact::Error> for AuthError {
    fn from(err: ed25519_compact::Error) -> Self {
        AuthError::CryptoError(err.to_string())
    }
}
