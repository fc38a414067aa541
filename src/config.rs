//! Configuration management for the state mirror
//!
//! Handles loading, defaulting and validating the YAML configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::fs;

use crate::ack::DEFAULT_REQUEST_TIMEOUT_MS;
use crate::publish::DEFAULT_PUBLISH_INTERVAL_MS;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Minimum spacing between two publishes on the same topic
    #[serde(default = "default_publish_interval")]
    pub publish_interval_ms: u64,
    /// How long a request waits for its acknowledgement (0 = forever)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Deep-merge `init` snapshots into the current tree instead of replacing it
    #[serde(default)]
    pub merge_snapshots: bool,
    #[serde(default)]
    pub channels: ChannelConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Names of the channels exchanged with the authority
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChannelConfig {
    #[serde(default = "default_init_channel")]
    pub init: String,
    #[serde(default = "default_change_channel")]
    pub change: String,
    #[serde(default = "default_changes_channel")]
    pub changes: String,
    #[serde(default = "default_setting_update_channel")]
    pub setting_update: String,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl SyncConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::from_yaml(&contents).with_context(|| format!("Invalid config file: {}", path))
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: SyncConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.publish_interval_ms == 0 {
            anyhow::bail!("publish_interval_ms must be greater than 0");
        }

        let channels = &self.channels;
        let named = [
            ("init", &channels.init),
            ("change", &channels.change),
            ("changes", &channels.changes),
            ("setting_update", &channels.setting_update),
        ];
        for (field, name) in named {
            if name.trim().is_empty() {
                anyhow::bail!("Channel name '{}' cannot be empty", field);
            }
        }

        let mut inbound = HashSet::new();
        for name in [&channels.init, &channels.change, &channels.changes] {
            if !inbound.insert(name) {
                anyhow::bail!("Inbound channel '{}' is configured more than once", name);
            }
        }

        Ok(())
    }

    /// Request timeout, `None` when disabled
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            publish_interval_ms: default_publish_interval(),
            request_timeout_ms: default_request_timeout(),
            merge_snapshots: false,
            channels: ChannelConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            init: default_init_channel(),
            change: default_change_channel(),
            changes: default_changes_channel(),
            setting_update: default_setting_update_channel(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value functions
fn default_publish_interval() -> u64 { DEFAULT_PUBLISH_INTERVAL_MS }
fn default_request_timeout() -> u64 { DEFAULT_REQUEST_TIMEOUT_MS }
fn default_init_channel() -> String { "state:init".to_string() }
fn default_change_channel() -> String { "state:change".to_string() }
fn default_changes_channel() -> String { "state:changes".to_string() }
fn default_setting_update_channel() -> String { "setting:update".to_string() }
fn default_log_level() -> String { "info".to_string() }
