//! Daemon configuration, read from a TOML file.
//!
//! ```toml
//! [store]
//! path = "/var/lib/rolelease/grants.db"
//!
//! [grant]
//! kind = "renewal"
//! context = "guild-1"
//!
//! [policy]
//! grant_duration_days = 50
//! reminder_threshold_days = 5
//! reminder_interval_hours = 24
//! sweep_period_hours = 1
//! collaborator_attempts = 3
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use rolelease::EngineConfig;
use rolelease_core::GrantPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub store: StoreConfig,

    #[serde(default)]
    pub grant: GrantConfig,

    #[serde(default)]
    pub policy: GrantPolicy,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// `[store]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file. Created if missing.
    pub path: PathBuf,
}

/// `[grant]` section: what the command line grants and on whose behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrantConfig {
    /// Entitlement kind handed out by `grant`.
    pub kind: String,
    /// Owning context recorded on new grants.
    pub context: String,
}

impl Default for GrantConfig {
    fn default() -> Self {
        Self {
            kind: "renewal".to_string(),
            context: "default".to_string(),
        }
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry of a collaborator call.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { base_delay_ms: 250 }
    }
}

impl DaemonConfig {
    /// Load and validate configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::Validation("store.path must not be empty".into()));
        }
        if self.grant.kind.trim().is_empty() {
            return Err(ConfigError::Validation("grant.kind must not be empty".into()));
        }
        if self.grant.context.trim().is_empty() {
            return Err(ConfigError::Validation("grant.context must not be empty".into()));
        }
        self.policy
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            policy: self.policy.clone(),
            retry_base_delay: Duration::from_millis(self.retry.base_delay_ms),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
