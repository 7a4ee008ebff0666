//! Network convergence
//!
//! ```text
//!  Networks ──► detect MACs ──► build records ──► render files
//!                                                     │
//!                                         dry-run diff against disk
//!                                                     │
//!                               changed? ifdown ─► write ─► ifup
//!                                                     │
//!                                   validate addresses + DNS
//!                                                     │
//!                                    spawn ARP broadcast (oneshot)
//! ```

mod dns;
mod interface_config;
mod ipv6;
mod mac;
mod phase;
mod templates;
mod ubuntu;

pub use dns::{DnsValidator, ResolvConfDnsValidator};
pub use interface_config::{
    is_virtual_interface, DefaultInterfaceConfigurationCreator, DhcpInterfaceConfiguration,
    InterfaceConfiguration, InterfaceConfigurationCreator, StaticInterfaceConfiguration,
};
pub use ipv6::{KernelIpv6, SysctlKernelIpv6};
pub use mac::{MacAddressDetector, SysfsMacAddressDetector};
pub use phase::ConvergencePhase;
pub use templates::{render_dhclient_config, render_network_interfaces, render_resolv_conf};
pub use ubuntu::UbuntuNetManager;

use crate::error::Result;
use async_trait::async_trait;
use cirrus_settings::Networks;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::oneshot;

/// Where the network artifacts live
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetPaths {
    pub interfaces: PathBuf,
    pub dhclient_conf: PathBuf,
    pub resolv_conf: PathBuf,
    pub resolvconf_base: PathBuf,
    pub resolvconf_run: PathBuf,
    pub sys_class_net: PathBuf,
}

impl Default for NetPaths {
    fn default() -> Self {
        Self {
            interfaces: PathBuf::from("/etc/network/interfaces"),
            dhclient_conf: PathBuf::from("/etc/dhcp/dhclient.conf"),
            resolv_conf: PathBuf::from("/etc/resolv.conf"),
            resolvconf_base: PathBuf::from("/etc/resolvconf/resolv.conf.d/base"),
            resolvconf_run: PathBuf::from("/run/resolvconf/resolv.conf"),
            sys_class_net: PathBuf::from("/sys/class/net"),
        }
    }
}

/// Interface records and resolvers computed for a set of networks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Sorted by interface name
    pub static_configs: Vec<StaticInterfaceConfiguration>,
    /// Sorted by interface name
    pub dhcp_configs: Vec<DhcpInterfaceConfiguration>,
    pub dns_servers: Vec<String>,
}

impl NetworkConfig {
    pub fn has_version6(&self) -> bool {
        self.static_configs.iter().any(|c| c.is_version6)
    }

    /// DHCP interfaces first, then static ones
    pub fn interface_names(&self) -> Vec<String> {
        self.dhcp_configs
            .iter()
            .map(|c| c.name.clone())
            .chain(self.static_configs.iter().map(|c| c.name.clone()))
            .collect()
    }
}

/// Sender that receives the outcome of the background address broadcast
pub type BroadcastDone = oneshot::Sender<Result<()>>;

#[async_trait]
pub trait NetManager: Send + Sync {
    /// Converge host networking to `networks`.
    ///
    /// Returns once interfaces are configured and validated. Address
    /// broadcasting continues in the background and reports through
    /// `broadcast_done` when given.
    async fn setup_networking(
        &self,
        networks: &Networks,
        broadcast_done: Option<BroadcastDone>,
    ) -> Result<()>;

    /// Interfaces that `ifup` knows how to configure
    async fn get_configured_network_interfaces(&self) -> Result<Vec<String>>;

    async fn setup_ipv6(&self, enable: bool) -> Result<()>;
}
