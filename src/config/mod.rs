//! Configuration management.
//!
//! pipewright configuration can come from:
//! - Environment variables (PIPEWRIGHT_*)
//! - Config file (~/.config/pipewright/config.toml)
//!
//! Later sources override earlier ones; every value has a built-in default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::pipeline::timespan::Timespan;
use crate::pipeline::types::PolicyDefaults;

/// Hard ceiling on parallel fan-out for generated loops.
pub const MAX_BATCH_COUNT: u32 = 50;

/// pipewright configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Policy applied to activities that declare none
    #[serde(default)]
    pub policy: PolicyDefaults,

    /// Metadata expander settings
    #[serde(default)]
    pub expander: ExpanderConfig,

    /// Connector normalization settings
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

/// Metadata expander configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpanderConfig {
    /// Default parallel batch ceiling (1..=50)
    #[serde(default = "default_batch_count")]
    pub batch_count: u32,

    /// Prefix of generated activity names
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
}

impl Default for ExpanderConfig {
    fn default() -> Self {
        Self {
            batch_count: default_batch_count(),
            name_prefix: default_name_prefix(),
        }
    }
}

fn default_batch_count() -> u32 {
    20
}

fn default_name_prefix() -> String {
    "Copy".to_string()
}

/// Connector configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectorsConfig {
    /// Workspace id used when an artifact connector stub omits one
    #[serde(default)]
    pub default_workspace_id: Option<String>,
}

impl Config {
    /// Load configuration from default locations.
    pub fn load() -> Self {
        let mut config = Self::default();

        let primary_path = Self::config_dir().join("config.toml");
        if let Ok(partial) = Self::load_partial_from_path(&primary_path) {
            config.apply_partial(partial);
        }

        config.apply_env_overrides();
        config
    }

    /// Load an explicit config file on top of the defaults. Unlike
    /// [`Config::load`], a missing or malformed file is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let partial: PartialConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        let mut config = Self::default();
        config.apply_partial(partial);
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the config directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("pipewright"))
            .unwrap_or_else(|| PathBuf::from(".pipewright"))
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.expander.batch_count == 0 || self.expander.batch_count > MAX_BATCH_COUNT {
            return Err(Error::Config(format!(
                "expander.batch_count must be between 1 and {}, got {}",
                MAX_BATCH_COUNT, self.expander.batch_count
            )));
        }
        if self.expander.name_prefix.trim().is_empty() {
            return Err(Error::Config("expander.name_prefix must not be empty".into()));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(timeout) = lookup("PIPEWRIGHT_DEFAULT_TIMEOUT") {
            if let Ok(parsed) = timeout.parse::<Timespan>() {
                self.policy.timeout = parsed;
            }
        }
        if let Some(retry) = lookup("PIPEWRIGHT_DEFAULT_RETRY") {
            if let Ok(parsed) = retry.parse::<u32>() {
                self.policy.retry = parsed;
            }
        }
        if let Some(interval) = lookup("PIPEWRIGHT_DEFAULT_RETRY_INTERVAL") {
            if let Ok(parsed) = interval.parse::<u32>() {
                self.policy.retry_interval_in_seconds = parsed;
            }
        }
        if let Some(batch) = lookup("PIPEWRIGHT_BATCH_COUNT") {
            if let Ok(parsed) = batch.parse::<u32>() {
                self.expander.batch_count = parsed;
            }
        }
        if let Some(workspace) = lookup("PIPEWRIGHT_WORKSPACE_ID") {
            if !workspace.trim().is_empty() {
                self.connectors.default_workspace_id = Some(workspace);
            }
        }
    }

    fn load_partial_from_path(path: &Path) -> std::result::Result<PartialConfig, ()> {
        let content = std::fs::read_to_string(path).map_err(|_| ())?;
        toml::from_str(&content).map_err(|_| ())
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(policy) = partial.policy {
            self.policy = policy;
        }
        if let Some(expander) = partial.expander {
            self.expander = expander;
        }
        if let Some(connectors) = partial.connectors {
            self.connectors = connectors;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    policy: Option<PolicyDefaults>,
    expander: Option<ExpanderConfig>,
    connectors: Option<ConnectorsConfig>,
}
