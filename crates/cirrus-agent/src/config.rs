//! Agent configuration file

use anyhow::{Context, Result};
use cirrus_platform::{ArpingConfig, NetPaths, RetryConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_SETTINGS_PATH: &str = "/var/lib/cirrus/settings.json";

/// Paths and policies for a reconciliation pass.
///
/// Every field is optional in the file; missing ones take the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Settings document describing networks and the ephemeral disk
    pub settings_path: PathBuf,
    /// JSON file holding this agent's `agent_id`
    pub identity_path: PathBuf,
    pub partition_retry: RetryConfig,
    pub arping: ArpingConfig,
    pub network: NetPaths,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            settings_path: PathBuf::from(DEFAULT_SETTINGS_PATH),
            // The settings document carries the agent ID
            identity_path: PathBuf::from(DEFAULT_SETTINGS_PATH),
            partition_retry: RetryConfig::default(),
            arping: ArpingConfig::default(),
            network: NetPaths::default(),
        }
    }
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_slice(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
