//! Gratuitous ARP announcements
//!
//! After addresses change, neighbours and switches still cache the old
//! MAC bindings. Each address is announced with `arping -U` a few times so
//! traffic reaches the VM right away.

use crate::error::{PlatformError, Result};
use crate::ip::InterfaceAddress;
use crate::system::{Clock, CmdRunner, FileSystem};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Announces interface addresses to the local segment
#[async_trait]
pub trait AddressBroadcaster: Send + Sync {
    /// Broadcast every address, returning once all are done.
    ///
    /// Reports the first failure, if any.
    async fn broadcast_mac_addresses(&self, addresses: Vec<InterfaceAddress>) -> Result<()>;
}

/// Timing of gratuitous ARP announcements
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArpingConfig {
    /// Announcements sent per address
    pub iterations: u32,
    pub iteration_delay_ms: u64,
    /// How often to look for the interface before giving up on it
    pub interface_check_attempts: u32,
    pub interface_check_delay_ms: u64,
}

impl Default for ArpingConfig {
    fn default() -> Self {
        Self {
            iterations: 6,
            iteration_delay_ms: 5_000,
            interface_check_attempts: 10,
            interface_check_delay_ms: 1_000,
        }
    }
}

/// Sends `arping -c 1 -U -I <iface> <ip>` for each address
#[derive(Clone)]
pub struct ArpingBroadcaster {
    runner: Arc<dyn CmdRunner>,
    fs: Arc<dyn FileSystem>,
    clock: Arc<dyn Clock>,
    config: ArpingConfig,
    sys_class_net: PathBuf,
}

impl ArpingBroadcaster {
    pub fn new(
        runner: Arc<dyn CmdRunner>,
        fs: Arc<dyn FileSystem>,
        clock: Arc<dyn Clock>,
        config: ArpingConfig,
    ) -> Self {
        Self {
            runner,
            fs,
            clock,
            config,
            sys_class_net: PathBuf::from("/sys/class/net"),
        }
    }

    pub fn with_sys_class_net(mut self, path: impl Into<PathBuf>) -> Self {
        self.sys_class_net = path.into();
        self
    }

    async fn wait_for_interface(&self, interface: &str) -> Result<()> {
        let path = self.sys_class_net.join(interface);
        let attempts = self.config.interface_check_attempts.max(1);
        for attempt in 1..=attempts {
            if self.fs.file_exists(&path) {
                return Ok(());
            }
            if attempt < attempts {
                self.clock
                    .sleep(Duration::from_millis(self.config.interface_check_delay_ms))
                    .await;
            }
        }
        Err(PlatformError::Broadcast(format!(
            "interface '{}' did not appear",
            interface
        )))
    }

    async fn broadcast_one(&self, address: InterfaceAddress) -> Result<()> {
        let interface = address.interface_name().to_string();
        self.wait_for_interface(&interface).await?;

        let ip = address.resolve().await?;
        if matches!(ip.parse::<IpAddr>(), Ok(IpAddr::V6(_))) {
            debug!(interface = %interface, ip = %ip, "Skipping ARP announcement for IPv6 address");
            return Ok(());
        }

        let mut first_error = None;
        for i in 0..self.config.iterations {
            if let Err(e) = self
                .runner
                .run_command("arping", &["-c", "1", "-U", "-I", &interface, &ip])
                .await
            {
                warn!(interface = %interface, ip = %ip, error = %e, "arping failed");
                first_error.get_or_insert(e);
            }
            if i + 1 < self.config.iterations {
                self.clock
                    .sleep(Duration::from_millis(self.config.iteration_delay_ms))
                    .await;
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(interface = %interface, ip = %ip, "Announced address");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl AddressBroadcaster for ArpingBroadcaster {
    async fn broadcast_mac_addresses(&self, addresses: Vec<InterfaceAddress>) -> Result<()> {
        let mut tasks = JoinSet::new();
        for address in addresses {
            let this = self.clone();
            tasks.spawn(async move { this.broadcast_one(address).await });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| PlatformError::Broadcast(e.to_string()));
            if let Err(e) = result.and_then(|r| r) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
