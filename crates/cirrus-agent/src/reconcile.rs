//! One reconciliation pass: networking, then the ephemeral disk

use crate::config::AgentConfig;
use anyhow::{Context, Result};
use cirrus_platform::{
    Clock, CmdRunner, EphemeralDevicePartitioner, ExecCmdRunner, FileSystem, NetManager,
    OsFileSystem, PartedPartitioner, Partitioner, TokioClock, UbuntuNetManager,
};
use cirrus_settings::Settings;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};

pub struct Reconciler {
    config: AgentConfig,
    partitioner: EphemeralDevicePartitioner,
    net_manager: UbuntuNetManager,
}

impl Reconciler {
    pub fn new(
        config: AgentConfig,
        runner: Arc<dyn CmdRunner>,
        fs: Arc<dyn FileSystem>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let driver = Arc::new(PartedPartitioner::new(
            runner.clone(),
            clock.clone(),
            config.partition_retry,
        ));
        let partitioner = EphemeralDevicePartitioner::new(
            driver,
            runner.clone(),
            fs.clone(),
            clock.clone(),
            config.identity_path.clone(),
        )
        .with_retry(config.partition_retry);
        let net_manager =
            UbuntuNetManager::new(runner, fs, clock, config.network.clone(), config.arping);

        Self {
            config,
            partitioner,
            net_manager,
        }
    }

    /// Reconciler driving the real system tools
    pub fn system(config: AgentConfig) -> Self {
        Self::new(
            config,
            Arc::new(ExecCmdRunner),
            Arc::new(OsFileSystem),
            Arc::new(TokioClock),
        )
    }

    #[cfg(test)]
    pub fn net_manager(&self) -> &UbuntuNetManager {
        &self.net_manager
    }

    /// Converge networking, leaving the address broadcast running
    async fn converge_network(
        &self,
        settings: &Settings,
    ) -> Result<oneshot::Receiver<cirrus_platform::Result<()>>> {
        let (done_tx, done_rx) = oneshot::channel();
        self.net_manager
            .setup_networking(&settings.networks, Some(done_tx))
            .await
            .context("Failed to set up networking")?;
        Ok(done_rx)
    }

    async fn wait_for_broadcast(done_rx: oneshot::Receiver<cirrus_platform::Result<()>>) {
        match done_rx.await {
            Ok(Ok(())) => info!("Address broadcast finished"),
            Ok(Err(e)) => warn!(error = %e, "Address broadcast failed"),
            // Preconfigured networks are never broadcast
            Err(_) => info!("No address broadcast needed"),
        }
    }

    /// Converge networking and wait for the address broadcast to finish
    pub async fn network(&self, settings: &Settings) -> Result<()> {
        let done_rx = self.converge_network(settings).await?;
        Self::wait_for_broadcast(done_rx).await;
        Ok(())
    }

    pub async fn partition(&self, settings: &Settings) -> Result<()> {
        let Some(disk) = &settings.ephemeral_disk else {
            info!("No ephemeral disk in settings, skipping partitioning");
            return Ok(());
        };

        info!(
            device = %disk.path,
            partitions = disk.partitions.len(),
            identity = %self.config.identity_path.display(),
            "Partitioning ephemeral disk"
        );
        self.partitioner
            .partition(&disk.path, &disk.partitions)
            .await
            .with_context(|| format!("Failed to partition ephemeral disk {}", disk.path))
    }

    /// Network then disk; the disk pass runs while addresses are still being broadcast
    pub async fn apply(&self, settings: &Settings) -> Result<()> {
        let done_rx = self.converge_network(settings).await?;
        let partitioned = self.partition(settings).await;
        Self::wait_for_broadcast(done_rx).await;
        partitioned
    }

    pub async fn configured_interfaces(&self) -> Result<Vec<String>> {
        self.net_manager
            .get_configured_network_interfaces()
            .await
            .context("Failed to list configured interfaces")
    }

    pub async fn device_size(&self, device: &str) -> Result<u64> {
        self.partitioner
            .get_device_size_in_bytes(device)
            .await
            .with_context(|| format!("Failed to get size of {}", device))
    }
}
