//! Ephemeral device layout, owned by this agent instance
//!
//! Partitions are named after the agent ID. A table that already has the
//! desired shape and carries this agent's names is left alone; anything
//! else (another agent's table, a different layout) is wiped and rebuilt.

use super::{ExistingPartition, Partition, PartitionTableDriver, Partitioner};
use crate::error::{PlatformError, Result, ResultExt};
use crate::retry::{AttemptError, RetryConfig, RetryStrategy};
use crate::system::{Clock, CmdRunner, FileSystem};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// The persisted identity of this agent instance
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentIdentity {
    #[serde(default)]
    pub agent_id: String,
}

pub struct EphemeralDevicePartitioner {
    driver: Arc<dyn PartitionTableDriver>,
    runner: Arc<dyn CmdRunner>,
    fs: Arc<dyn FileSystem>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    identity_path: PathBuf,
}

impl EphemeralDevicePartitioner {
    pub fn new(
        driver: Arc<dyn PartitionTableDriver>,
        runner: Arc<dyn CmdRunner>,
        fs: Arc<dyn FileSystem>,
        clock: Arc<dyn Clock>,
        identity_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            driver,
            runner,
            fs,
            clock,
            retry: RetryConfig::default(),
            identity_path: identity_path.into(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn agent_id(&self) -> Result<String> {
        let path = self.identity_path.display().to_string();
        let bytes = self
            .fs
            .read_file(&self.identity_path)
            .map_err(|e| PlatformError::Identity {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        let identity: AgentIdentity =
            serde_json::from_slice(&bytes).map_err(|e| PlatformError::Identity {
                path: path.clone(),
                reason: format!("malformed identity: {}", e),
            })?;
        if identity.agent_id.trim().is_empty() {
            return Err(PlatformError::Identity {
                path,
                reason: "agent_id is empty".to_string(),
            });
        }
        Ok(identity.agent_id)
    }

    /// Partition device paths (`/dev/sdb1`, `/dev/nvme1n1p2`) that `blkid` knows about
    async fn get_partition_paths(&self, device_path: &str) -> Result<Vec<String>> {
        let stdout = match self.runner.run_command("blkid", &[]).await {
            Ok(output) => output.stdout,
            // blkid exits 2 when it found nothing to report
            Err(PlatformError::CommandFailed { exit_code: 2, .. }) => String::new(),
            Err(e) => return Err(e).context("Listing block device signatures"),
        };

        // nvme0n1 -> nvme0n1p1, sdb -> sdb1; never a sibling like nvme0n10
        let separator = if device_path.ends_with(|c: char| c.is_ascii_digit()) {
            "p"
        } else {
            ""
        };
        let pattern = Regex::new(&format!(
            r"^({}{}\d+):",
            regex::escape(device_path),
            separator
        ))
        .map_err(|e| PlatformError::Parse(e.to_string()))?;

        let mut paths: Vec<String> = Vec::new();
        for line in stdout.lines() {
            if let Some(m) = pattern.captures(line.trim()).and_then(|c| c.get(1)) {
                let path = m.as_str().to_string();
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        Ok(paths)
    }

    async fn remove_partitions(
        &self,
        existing: &[ExistingPartition],
        device_path: &str,
    ) -> Result<()> {
        if existing.is_empty() {
            return Ok(());
        }

        let strategy = RetryStrategy::from_config(self.retry, self.clock.clone());

        for path in self.get_partition_paths(device_path).await? {
            strategy
                .attempt(|| async {
                    self.runner
                        .run_command("wipefs", &["-a", &path])
                        .await
                        .map(|_| ())
                        .map_err(AttemptError::retryable)
                })
                .await
                .with_context(|| format!("Erasing partition path `{}'", path))?;
            info!(path = %path, "Erased partition signatures");
        }

        for partition in existing {
            let index = partition.index.to_string();
            strategy
                .attempt(|| async {
                    self.runner
                        .run_command("parted", &["-s", device_path, "rm", &index])
                        .await
                        .map(|_| ())
                        .map_err(AttemptError::retryable)
                })
                .await
                .with_context(|| format!("Removing partition {} from `{}'", index, device_path))?;
            info!(device = %device_path, index = partition.index, "Removed partition");
        }

        Ok(())
    }
}

#[async_trait]
impl Partitioner for EphemeralDevicePartitioner {
    async fn partition(&self, device_path: &str, partitions: &[Partition]) -> Result<()> {
        let agent_id = self.agent_id().context("Getting agent ID")?;
        self.driver.set_partition_name_prefix(&agent_id);

        let (existing, device_size) = self
            .driver
            .get_partitions(device_path)
            .await
            .with_context(|| format!("Getting existing partitions of `{}'", device_path))?;

        let owned = existing.iter().any(|p| p.name.starts_with(&agent_id));
        if owned && self.driver.partitions_match(&existing, partitions, device_size) {
            info!(device = %device_path, "Partitions already match, skipping partitioning");
            return Ok(());
        }

        debug!(
            device = %device_path,
            existing = existing.len(),
            desired = partitions.len(),
            owned,
            "Repartitioning ephemeral device"
        );
        self.remove_partitions(&existing, device_path)
            .await
            .with_context(|| format!("Removing existing partitions of `{}'", device_path))?;

        self.driver
            .partition(device_path, partitions)
            .await
            .with_context(|| format!("Partitioning ephemeral disk `{}'", device_path))
    }

    async fn get_device_size_in_bytes(&self, device_path: &str) -> Result<u64> {
        self.driver.get_device_size_in_bytes(device_path).await
    }
}
