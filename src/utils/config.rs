// src/utils/config.rs
//! Policy layer configuration
//!
//! Loaded in layers with the `config` crate:
//!
//! 1. Built-in defaults
//! 2. Optional `sentra-policy.{yaml,toml,json}` in the working directory
//! 3. `SENTRA_POLICY__*` environment variables (`__` separates sections)

use crate::utils::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Base name of the optional configuration file
pub const CONFIG_FILE_STEM: &str = "sentra-policy";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "SENTRA_POLICY";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub logging: LoggingConfig,
    pub audit: AuditSettings,
    pub arbitration: ArbitrationSettings,
    pub policies: PolicySettings,
}

impl PolicyConfig {
    /// Load configuration from the default file (if present) and environment
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE_STEM).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let config: PolicyConfig = settings.try_deserialize()?;
        debug!("Loaded policy configuration: {:?}", config);
        Ok(config)
    }

    /// Load configuration from an explicit file, still honoring environment overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

/// Logging output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,

    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,sentra_lab_policy=debug".to_string(),
            json: false,
        }
    }
}

/// Settings for the three audit domains
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub hosts: AuditStoreSettings,
    pub headers: AuditStoreSettings,
    pub storage: AuditStoreSettings,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            hosts: AuditStoreSettings::default(),
            headers: AuditStoreSettings {
                value_truncate_length: 512,
                ..AuditStoreSettings::default()
            },
            storage: AuditStoreSettings::default(),
        }
    }
}

/// Limits and filters for a single audit store
///
/// Sizes are signed so that malformed input can be clamped rather than
/// rejected at parse time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditStoreSettings {
    pub enabled: bool,
    pub max_entries: i64,
    pub value_truncate_length: i64,

    /// Filter terms for the key field (`+term`, `-term`, `!term`, `term`)
    pub key_filter: Option<Vec<String>>,

    /// Filter terms for the value field
    pub value_filter: Option<Vec<String>>,

    /// Keep only the first N entries when no filter is configured
    pub countdown: Option<u64>,
}

impl Default for AuditStoreSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 2000,
            value_truncate_length: 256,
            key_filter: None,
            value_filter: None,
            countdown: None,
        }
    }
}

/// Timer settings for arbitration controllers (milliseconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitrationSettings {
    pub enable_delay_ms: u64,
    pub disable_debounce_ms: u64,
    pub poll_interval_ms: u64,
    pub watchdog_interval_ms: u64,
    pub termination_grace_ms: u64,
}

impl Default for ArbitrationSettings {
    fn default() -> Self {
        Self {
            enable_delay_ms: 2_000,
            disable_debounce_ms: 1_000,
            poll_interval_ms: 5_000,
            watchdog_interval_ms: 10_000,
            termination_grace_ms: 500,
        }
    }
}

impl ArbitrationSettings {
    pub fn enable_delay(&self) -> Duration {
        Duration::from_millis(self.enable_delay_ms)
    }

    pub fn disable_debounce(&self) -> Duration {
        Duration::from_millis(self.disable_debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms.max(1))
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }
}

/// Concrete policy rules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    /// Hosts whose resolution fails (`*.domain` wildcards allowed)
    pub blocked_hosts: Vec<String>,

    /// URL host rewrites
    pub url_rewrites: Vec<RewriteRule>,

    /// Dialogs whose title or message contains one of these terms are hidden
    pub suppressed_dialogs: Vec<String>,
}

/// One URL rewrite rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteRule {
    pub domain: String,
    pub target: String,
    #[serde(default)]
    pub priority: u32,
}
