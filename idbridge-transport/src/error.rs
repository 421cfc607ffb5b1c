//! Errors surfaced by the handshake layer

use idbridge_auth::AuthError;
use idbridge_common::{RpcError, TIMEOUT_ERROR_CODE};
use serde_json::Value;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Window could not be opened or frame could not be mounted
    #[error("Surface unavailable: {0}")]
    SurfaceUnavailable(String),

    /// User closed the provider window before the flow completed
    #[error("Terminated by user")]
    UserInterrupted,

    /// No correlated response arrived in time
    #[error("Request timed out")]
    RequestTimedOut,

    /// Provider answered with an error response
    #[error("Provider error {code}: {message}")]
    ProtocolError {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// Delegation response or stored delegation is unusable
    #[error("Invalid delegation chain: {0}")]
    InvalidDelegationChain(String),

    /// Operation refused for the current delegation type
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    #[error(transparent)]
    Auth(AuthError),

    /// Message bus went away (context unloaded)
    #[error("Message channel closed")]
    ChannelClosed,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::RequestTimedOut => true,
            BridgeError::Auth(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Numeric code, JSON-RPC style where one applies
    pub fn code(&self) -> i64 {
        match self {
            BridgeError::SurfaceUnavailable(_) => 503,
            BridgeError::UserInterrupted => 499,
            BridgeError::RequestTimedOut => TIMEOUT_ERROR_CODE,
            BridgeError::ProtocolError { code, .. } => *code,
            BridgeError::InvalidDelegationChain(_) => 401,
            BridgeError::NotPermitted(_) => 403,
            BridgeError::Auth(_) => 401,
            BridgeError::ChannelClosed => 410,
            BridgeError::Serialization(_) => 400,
            BridgeError::Config(_) => 500,
        }
    }
}

impl From<AuthError> for BridgeError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidDelegationChain(reason) => BridgeError::InvalidDelegationChain(reason),
            other => BridgeError::Auth(other),
        }
    }
}

impl From<RpcError> for BridgeError {
    fn from(err: RpcError) -> Self {
        BridgeError::ProtocolError {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<url::ParseError> for BridgeError {
    fn from(err: url::ParseError) -> Self {
        BridgeError::Config(format!("Invalid URL: {}", err))
    }
}
