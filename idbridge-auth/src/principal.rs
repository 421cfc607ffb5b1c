//! Principal identifiers
//!
//! Delegation targets name the downstream principals (canisters, services) a
//! delegated key may act on. Principals travel in their textual form, e.g.
//! `txkre-oyaaa-aaaap-qa3za-cai`.

use crate::error::{AuthError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// Textual principal identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Validate)]
#[serde(try_from = "String", into = "String")]
pub struct Principal {
    /// Dash-separated lowercase base32 groups
    #[validate(length(min = 1, max = 63))]
    text: String,
}

impl Principal {
    /// Parse and validate a textual principal
    pub fn from_text(text: impl Into<String>) -> Result<Self> {
        let principal = Self { text: text.into() };

        principal
            .validate()
            .map_err(|e| AuthError::InvalidPrincipal(format!("{}: {}", principal.text, e)))?;

        let well_formed = principal
            .text
            .split('-')
            .all(|group| !group.is_empty() && group.chars().all(is_base32_lower));
        if !well_formed {
            return Err(AuthError::InvalidPrincipal(format!(
                "{}: expected dash-separated lowercase base32 groups",
                principal.text
            )));
        }

        Ok(principal)
    }

    /// Textual form
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

fn is_base32_lower(c: char) -> bool {
    c.is_ascii_lowercase() || ('2'..='7').contains(&c)
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl TryFrom<String> for Principal {
    type Error = AuthError;

    fn try_from(text: String) -> Result<Self> {
        Self::from_text(text)
    }
}

impl From<Principal> for String {
    fn from(principal: Principal) -> Self {
        principal.text
    }
}

impl std::str::FromStr for Principal {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_text(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_creation() {
        let principal = Principal::from_text("txkre-oyaaa-aaaap-qa3za-cai").unwrap();
        assert_eq!(principal.as_str(), "txkre-oyaaa-aaaap-qa3za-cai");
        assert_eq!(principal.to_string(), "txkre-oyaaa-aaaap-qa3za-cai");
    }

    #[test]
    fn test_validation() {
        // Empty text should fail
        assert!(Principal::from_text("").is_err());
        // Uppercase and out-of-alphabet digits should fail
        assert!(Principal::from_text("TXKRE-cai").is_err());
        assert!(Principal::from_text("abc-189").is_err());
        // Empty groups should fail
        assert!(Principal::from_text("abc--cai").is_err());
        // Overlong text should fail
        assert!(Principal::from_text("a".repeat(64)).is_err());
    }

    #[test]
    fn test_serde_validates() {
        let ok: Principal = serde_json::from_str("\"aaaaa-aa\"").unwrap();
        assert_eq!(ok.as_str(), "aaaaa-aa");
        assert!(serde_json::from_str::<Principal>("\"Not A Principal\"").is_err());
        assert_eq!(serde_json::to_string(&ok).unwrap(), "\"aaaaa-aa\"");
    }
}
