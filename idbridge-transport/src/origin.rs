//! Origin and source checks applied to every inbound message

use crate::error::Result;
use crate::host::{ContextId, InboundMessage};
use tracing::warn;
use url::Url;

/// Serialized origin (`scheme://host[:port]`) of `url`
pub fn origin_of(url: &str) -> Result<String> {
    Ok(Url::parse(url)?.origin().ascii_serialization())
}

/// Domain string identifying the application to the provider:
/// scheme and host, with the port when it is not the default
pub fn persona_domain(url: &str) -> Result<String> {
    let url = Url::parse(url)?;
    let host = url.host_str().unwrap_or_default();
    Ok(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

/// True when the message comes from `expected`. Mismatches are logged.
pub fn validate_origin(message: &InboundMessage, expected: &str) -> bool {
    if message.origin == expected {
        return true;
    }
    warn!(
        origin = %message.origin,
        expected = %expected,
        "Dropping message from unexpected origin"
    );
    false
}

/// True when the message was posted by `expected`
pub fn validate_source(message: &InboundMessage, expected: ContextId) -> bool {
    if message.source == Some(expected) {
        return true;
    }
    warn!(
        source = ?message.source,
        expected = %expected,
        "Dropping message from unexpected source"
    );
    false
}

/// Combined origin and source filter for one exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageGate {
    origin: Option<String>,
    source: Option<ContextId>,
}

impl MessageGate {
    /// Admit messages from `origin` only
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
            source: None,
        }
    }

    /// Admit messages from the origin of `url`
    pub fn for_url(url: &str) -> Result<Self> {
        Ok(Self::new(origin_of(url)?))
    }

    /// Admit messages posted by `context` only, whatever their origin
    pub fn from_source(context: ContextId) -> Self {
        Self {
            origin: None,
            source: Some(context),
        }
    }

    /// Additionally require the message to come from `context`
    pub fn with_source(mut self, context: ContextId) -> Self {
        self.source = Some(context);
        self
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn admits(&self, message: &InboundMessage) -> bool {
        if let Some(origin) = &self.origin {
            if !validate_origin(message, origin) {
                return false;
            }
        }
        match self.source {
            Some(source) => validate_source(message, source),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_test::traced_test;

    fn message(origin: &str, source: Option<ContextId>) -> InboundMessage {
        InboundMessage {
            origin: origin.to_string(),
            source,
            data: json!({"kind": "Ready"}),
        }
    }

    #[test]
    fn test_origin_of() {
        assert_eq!(
            origin_of("https://nfid.one/credential/verified-phone-number").unwrap(),
            "https://nfid.one"
        );
        assert_eq!(
            origin_of("http://localhost:9090/embed").unwrap(),
            "http://localhost:9090"
        );
        assert_eq!(origin_of("https://nfid.one:443/x").unwrap(), "https://nfid.one");
        assert!(origin_of("not a url").is_err());
    }

    #[test]
    fn test_persona_domain() {
        assert_eq!(
            persona_domain("https://app.example/path?q=1").unwrap(),
            "https://app.example"
        );
        assert_eq!(
            persona_domain("http://localhost:3000/").unwrap(),
            "http://localhost:3000"
        );
    }

    #[test]
    #[traced_test]
    fn test_gate_drops_wrong_origin() {
        let gate = MessageGate::new("https://nfid.one");
        assert!(gate.admits(&message("https://nfid.one", None)));
        assert!(!gate.admits(&message("https://evil.example", None)));
        assert!(logs_contain("Dropping message from unexpected origin"));
    }

    #[test]
    fn test_gate_checks_source() {
        let opener = ContextId::new();
        let gate = MessageGate::new("https://app.example").with_source(opener);

        assert!(gate.admits(&message("https://app.example", Some(opener))));
        assert!(!gate.admits(&message("https://app.example", Some(ContextId::new()))));
        assert!(!gate.admits(&message("https://app.example", None)));

        let gate = MessageGate::from_source(opener);
        assert!(gate.admits(&message("https://anything.example", Some(opener))));
        assert!(gate.origin().is_none());
    }

    #[test]
    fn test_gate_for_url_normalises() {
        let gate = MessageGate::for_url("https://nfid.one/embed").unwrap();
        assert_eq!(gate.origin(), Some("https://nfid.one"));
    }
}
