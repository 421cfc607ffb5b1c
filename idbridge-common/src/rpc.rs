//! Versioned, correlated messages (JSON-RPC 2.0 over postMessage).

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const JSONRPC_VERSION: &str = "2.0";

/// Error code used when a request times out
pub const TIMEOUT_ERROR_CODE: i64 = 408;
/// Standard JSON-RPC "method not found"
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Standard JSON-RPC "invalid params"
pub const INVALID_PARAMS: i64 = -32602;
/// Standard JSON-RPC "internal error"
pub const INTERNAL_ERROR: i64 = -32603;

/// Methods understood by the embedded provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpcMethod {
    #[serde(rename = "ic_getDelegation")]
    GetDelegation,
    #[serde(rename = "ic_renewDelegation")]
    RenewDelegation,
    #[serde(rename = "ic_requestTransfer")]
    RequestTransfer,
    #[serde(rename = "ic_canisterCall")]
    CanisterCall,
}

impl RpcMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetDelegation => "ic_getDelegation",
            Self::RenewDelegation => "ic_renewDelegation",
            Self::RequestTransfer => "ic_requestTransfer",
            Self::CanisterCall => "ic_canisterCall",
        }
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RpcMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ic_getDelegation" => Ok(Self::GetDelegation),
            "ic_renewDelegation" => Ok(Self::RenewDelegation),
            "ic_requestTransfer" => Ok(Self::RequestTransfer),
            "ic_canisterCall" => Ok(Self::CanisterCall),
            other => Err(anyhow!("Unknown RPC method '{}'", other)),
        }
    }
}

/// Correlated request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl RpcRequest {
    /// Build a request with a fresh correlation id
    pub fn new(method: RpcMethod, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Uuid::new_v4().to_string(),
            method: method.as_str().to_string(),
            params,
        }
    }

    /// Decode an inbound payload; anything else on the channel yields `None`
    pub fn parse(data: &Value) -> Option<Self> {
        if data.get("method").is_none() || data.get("id").is_none() {
            return None;
        }
        serde_json::from_value(data.clone()).ok()
    }
}

/// Error payload of a failed call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Success XOR failure
#[derive(Debug, Clone, PartialEq)]
pub enum RpcOutcome {
    Success(Value),
    Failure(RpcError),
}

/// Correlated response; never carries both `result` and `error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRpcResponse", into = "RawRpcResponse")]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: String,
    pub outcome: RpcOutcome,
}

impl RpcResponse {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            outcome: RpcOutcome::Success(result),
        }
    }

    pub fn failure(id: impl Into<String>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            outcome: RpcOutcome::Failure(error),
        }
    }

    /// Decode an inbound payload; requests and unrelated traffic yield `None`
    pub fn parse(data: &Value) -> Option<Self> {
        if data.get("method").is_some() {
            return None;
        }
        serde_json::from_value(data.clone()).ok()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RpcOutcome::Success(_))
    }

    pub fn into_result(self) -> std::result::Result<Value, RpcError> {
        match self.outcome {
            RpcOutcome::Success(value) => Ok(value),
            RpcOutcome::Failure(error) => Err(error),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawRpcResponse {
    jsonrpc: String,
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl TryFrom<RawRpcResponse> for RpcResponse {
    type Error = String;

    fn try_from(raw: RawRpcResponse) -> std::result::Result<Self, Self::Error> {
        let outcome = match (raw.result, raw.error) {
            (Some(result), None) => RpcOutcome::Success(result),
            (None, Some(error)) => RpcOutcome::Failure(error),
            (Some(_), Some(_)) => {
                return Err(format!(
                    "response {} carries both result and error",
                    raw.id
                ))
            }
            // `result: null` is a legitimate success value
            (None, None) => RpcOutcome::Success(Value::Null),
        };
        Ok(Self {
            jsonrpc: raw.jsonrpc,
            id: raw.id,
            outcome,
        })
    }
}

impl From<RpcResponse> for RawRpcResponse {
    fn from(response: RpcResponse) -> Self {
        let (result, error) = match response.outcome {
            RpcOutcome::Success(value) => (Some(value), None),
            RpcOutcome::Failure(error) => (None, Some(error)),
        };
        Self {
            jsonrpc: response.jsonrpc,
            id: response.id,
            result,
            error,
        }
    }
}
