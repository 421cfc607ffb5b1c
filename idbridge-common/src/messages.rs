//! Legacy event-tagged messages.
//!
//! These flows carry no correlation id: each channel has a single exchange in
//! flight and messages are matched on their `kind` tag alone. Kinds this crate
//! does not know decode to `Unknown` so unrelated traffic can be ignored.

use crate::types::{AccountsResult, CredentialResult, TransferParams, TransferResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages posted by the client into the provider surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ClientEvent {
    /// Ask for a verified phone-number credential for `hostname`
    RequestPhoneNumberCredential { hostname: String },
    /// Ask the user to approve a transfer
    RequestTransfer { params: TransferParams },
    /// Ask the user to share their accounts
    RequestAccounts,
    #[serde(other)]
    Unknown,
}

/// Messages posted by the provider back to its opener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ProviderEvent {
    /// The provider finished loading and listens for a request
    Ready,
    PhoneNumberCredentialResponse {
        #[serde(default)]
        result: Option<CredentialResult>,
        /// Set when the provider failed to produce a credential
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    RequestTransferResponse {
        result: TransferResult,
    },
    RequestAccountsResponse {
        result: AccountsResult,
    },
    #[serde(other)]
    Unknown,
}

impl ClientEvent {
    /// Decode an inbound payload. Returns `None` for anything that is not a
    /// kind-tagged object or whose known kind carries a malformed payload.
    pub fn parse(data: &Value) -> Option<Self> {
        parse_tagged(data)
    }

    /// Wire tag of this event
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RequestPhoneNumberCredential { .. } => "RequestPhoneNumberCredential",
            Self::RequestTransfer { .. } => "RequestTransfer",
            Self::RequestAccounts => "RequestAccounts",
            Self::Unknown => "Unknown",
        }
    }
}

impl ProviderEvent {
    /// Decode an inbound payload, see [`ClientEvent::parse`]
    pub fn parse(data: &Value) -> Option<Self> {
        parse_tagged(data)
    }

    /// Wire tag of this event
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::PhoneNumberCredentialResponse { .. } => "PhoneNumberCredentialResponse",
            Self::RequestTransferResponse { .. } => "RequestTransferResponse",
            Self::RequestAccountsResponse { .. } => "RequestAccountsResponse",
            Self::Unknown => "Unknown",
        }
    }
}

fn parse_tagged<T: for<'de> Deserialize<'de>>(data: &Value) -> Option<T> {
    if !data.get("kind").is_some_and(Value::is_string) {
        return None;
    }
    serde_json::from_value(data.clone()).ok()
}

/// Messages tagged by `type`, emitted by embedded provider frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FrameSignal {
    #[serde(rename = "nfid_ready")]
    Ready,
    #[serde(other)]
    Unknown,
}

impl FrameSignal {
    /// Parse a frame signal; `None` for anything not tagged by a string `type`
    pub fn parse(data: &Value) -> Option<Self> {
        if !data.get("type").is_some_and(Value::is_string) {
            return None;
        }
        serde_json::from_value(data.clone()).ok()
    }

    /// True when `data` is the embedded frame's readiness signal
    pub fn is_ready(data: &Value) -> bool {
        Self::parse(data) == Some(FrameSignal::Ready)
    }
}
