//! Client configuration
//!
//! Loaded from TOML; every section and field is optional and falls back to
//! the production provider endpoints.
//!
//! ```toml
//! [provider]
//! credential_url = "https://nfid.one/credential/verified-phone-number"
//! embed_url = "https://nfid.one/embed"
//!
//! [window]
//! features = { width = 600 }
//! interruption_check_interval = "1s"
//!
//! [timeouts]
//! embed_ready = "30s"
//! request = "5m"
//! ```

use crate::{
    error::{BridgeError, Result},
    lifecycle::{FeaturesSpec, FrameStyle, DEFAULT_WINDOW_NAME, INTERRUPTION_CHECK_INTERVAL},
    origin::origin_of,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub use idbridge_auth::credentials::DEFAULT_CREDENTIAL_PROVIDER;
pub const DEFAULT_WALLET_PROVIDER: &str = "https://nfid.one/wallet";
pub const DEFAULT_EMBED_PROVIDER: &str = "https://nfid.one/embed";

/// How long the embedded frame gets to signal readiness
pub const DEFAULT_EMBED_READY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub provider: ProviderSection,

    #[serde(default)]
    pub window: WindowSection,

    #[serde(default)]
    pub frame: FrameSection,

    #[serde(default)]
    pub timeouts: TimeoutSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSection {
    /// Page issuing phone-number credentials
    #[serde(default = "ProviderSection::default_credential_url")]
    pub credential_url: String,

    /// Page handling transfer and account requests
    #[serde(default = "ProviderSection::default_wallet_url")]
    pub wallet_url: String,

    /// Page loaded into the embedded frame
    #[serde(default = "ProviderSection::default_embed_url")]
    pub embed_url: String,

    /// Origin delegations are derived for, when not the application's own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation_origin: Option<String>,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            credential_url: Self::default_credential_url(),
            wallet_url: Self::default_wallet_url(),
            embed_url: Self::default_embed_url(),
            derivation_origin: None,
        }
    }
}

impl ProviderSection {
    fn default_credential_url() -> String {
        DEFAULT_CREDENTIAL_PROVIDER.to_string()
    }

    fn default_wallet_url() -> String {
        DEFAULT_WALLET_PROVIDER.to_string()
    }

    fn default_embed_url() -> String {
        DEFAULT_EMBED_PROVIDER.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSection {
    #[serde(default = "WindowSection::default_name")]
    pub name: String,

    /// Feature overrides, or a raw feature string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<FeaturesSpec>,

    #[serde(
        default = "WindowSection::default_interruption_check_interval",
        with = "humantime_serde"
    )]
    pub interruption_check_interval: Duration,
}

impl Default for WindowSection {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            features: None,
            interruption_check_interval: Self::default_interruption_check_interval(),
        }
    }
}

impl WindowSection {
    fn default_name() -> String {
        DEFAULT_WINDOW_NAME.to_string()
    }

    fn default_interruption_check_interval() -> Duration {
        INTERRUPTION_CHECK_INTERVAL
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSection {
    /// Base inline style; `display` is managed by the frame manager
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<FrameStyle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSection {
    #[serde(
        default = "TimeoutSection::default_embed_ready",
        with = "humantime_serde"
    )]
    pub embed_ready: Duration,

    /// Deadline for a whole flow or call; unbounded when unset
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub request: Option<Duration>,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            embed_ready: Self::default_embed_ready(),
            request: None,
        }
    }
}

impl TimeoutSection {
    fn default_embed_ready() -> Duration {
        DEFAULT_EMBED_READY_TIMEOUT
    }
}

impl BridgeConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("Failed to read config: {}", e)))?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: BridgeConfig = toml::from_str(content)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| BridgeError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BridgeError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }
        std::fs::write(path, self.to_toml_string()?)
            .map_err(|e| BridgeError::Config(format!("Failed to write config: {}", e)))
    }

    /// Check that every provider URL parses and the poll period is usable
    pub fn validate(&self) -> Result<()> {
        if self.window.interruption_check_interval.is_zero() {
            return Err(BridgeError::Config(
                "window.interruption_check_interval must be greater than zero".to_string(),
            ));
        }
        for url in [
            &self.provider.credential_url,
            &self.provider.wallet_url,
            &self.provider.embed_url,
        ] {
            origin_of(url)?;
        }
        if let Some(origin) = &self.provider.derivation_origin {
            origin_of(origin)?;
        }
        Ok(())
    }
}

/// Per-call overrides of the configured provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderConf {
    pub provider: Option<String>,
    pub window_features: Option<FeaturesSpec>,
    pub timeout: Option<Duration>,
}

impl ProviderConf {
    pub fn provider(url: impl Into<String>) -> Self {
        Self {
            provider: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn with_features(mut self, features: impl Into<FeaturesSpec>) -> Self {
        self.window_features = Some(features.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
