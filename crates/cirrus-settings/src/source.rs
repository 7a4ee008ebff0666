//! Settings document and where it comes from

use crate::disk::EphemeralDiskSettings;
use crate::error::Error;
use crate::network::Networks;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Desired state handed to the agent by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Settings {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub networks: Networks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_disk: Option<EphemeralDiskSettings>,
}

impl Settings {
    /// Reject documents the reconciliation core cannot act on.
    pub fn validate(&self) -> Result<()> {
        for (name, network) in &self.networks {
            if network.is_vip() || network.is_dhcp() {
                continue;
            }
            if network.ip.is_empty() || network.netmask.is_empty() {
                return Err(Error::Invalid(format!(
                    "static network '{}' needs both ip and netmask",
                    name
                )));
            }
        }
        if let Some(disk) = &self.ephemeral_disk {
            if disk.path.is_empty() {
                return Err(Error::Invalid("ephemeral disk path is empty".to_string()));
            }
            let last = disk.partitions.len().saturating_sub(1);
            if disk
                .partitions
                .iter()
                .enumerate()
                .any(|(i, p)| p.size_in_bytes == 0 && i != last)
            {
                return Err(Error::Invalid(
                    "only the last ephemeral partition may have size 0".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Anything that can produce the desired settings
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn settings(&self) -> Result<Settings>;
}

/// Settings read from a JSON document on local disk
#[derive(Debug, Clone)]
pub struct FileSettingsSource {
    path: PathBuf,
}

impl FileSettingsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SettingsSource for FileSettingsSource {
    async fn settings(&self) -> Result<Settings> {
        let path = self.path.display().to_string();
        debug!(path = %path, "Loading settings");

        let contents = tokio::fs::read(&self.path).await.map_err(|source| Error::Read {
            path: path.clone(),
            source,
        })?;
        let settings: Settings =
            serde_json::from_slice(&contents).map_err(|source| Error::Parse { path, source })?;
        settings.validate()?;
        Ok(settings)
    }
}
