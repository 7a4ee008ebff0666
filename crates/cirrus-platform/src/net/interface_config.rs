//! Per-interface configuration records built from network settings

use crate::error::{PlatformError, Result};
use cirrus_settings::{DefaultFor, Network, Networks, Route};
use ipnetwork::{Ipv4Network, Ipv6Network};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

lazy_static! {
    static ref VIRTUAL_INTERFACE: Regex = Regex::new(r":\d+$").unwrap();
}

/// Alias interfaces such as `eth0:0` share a NIC with their parent
pub fn is_virtual_interface(name: &str) -> bool {
    VIRTUAL_INTERFACE.is_match(name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticInterfaceConfiguration {
    pub name: String,
    pub address: String,
    /// Dotted mask for IPv4, prefix length for IPv6
    pub netmask: String,
    pub network: String,
    pub broadcast: String,
    pub gateway: String,
    pub is_default_for_gateway: bool,
    pub is_version6: bool,
    pub mac: String,
    pub post_up_routes: Vec<Route>,
}

impl StaticInterfaceConfiguration {
    pub fn is_virtual(&self) -> bool {
        is_virtual_interface(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpInterfaceConfiguration {
    pub name: String,
    pub mac: String,
    pub post_up_routes: Vec<Route>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceConfiguration {
    Static(StaticInterfaceConfiguration),
    Dhcp(DhcpInterfaceConfiguration),
}

impl InterfaceConfiguration {
    pub fn name(&self) -> &str {
        match self {
            InterfaceConfiguration::Static(c) => &c.name,
            InterfaceConfiguration::Dhcp(c) => &c.name,
        }
    }
}

/// Joins desired networks with the interfaces present on the host
pub trait InterfaceConfigurationCreator: Send + Sync {
    /// `interfaces_by_mac` maps lowercase MAC addresses to interface names.
    fn create_interface_configurations(
        &self,
        networks: &Networks,
        interfaces_by_mac: &BTreeMap<String, String>,
    ) -> Result<Vec<InterfaceConfiguration>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultInterfaceConfigurationCreator;

impl DefaultInterfaceConfigurationCreator {
    pub fn new() -> Self {
        Self
    }

    fn create_static(
        &self,
        network_name: &str,
        interface: String,
        mac: String,
        network: &Network,
        is_default_for_gateway: bool,
    ) -> Result<StaticInterfaceConfiguration> {
        let invalid = |reason: String| PlatformError::InvalidNetwork {
            network: network_name.to_string(),
            reason,
        };

        let ip: IpAddr = network
            .ip
            .parse()
            .map_err(|_| invalid(format!("invalid IP address '{}'", network.ip)))?;

        let (netmask, net, broadcast, is_version6) = match ip {
            IpAddr::V4(ip) => {
                let mask: Ipv4Addr = network
                    .netmask
                    .parse()
                    .map_err(|_| invalid(format!("invalid netmask '{}'", network.netmask)))?;
                let net = Ipv4Network::with_netmask(ip, mask)
                    .map_err(|e| invalid(format!("invalid netmask '{}': {}", network.netmask, e)))?;
                (
                    network.netmask.clone(),
                    net.network().to_string(),
                    net.broadcast().to_string(),
                    false,
                )
            }
            IpAddr::V6(ip) => {
                let prefix = match network.netmask.parse::<u8>() {
                    Ok(prefix) => prefix,
                    Err(_) => network
                        .netmask
                        .parse::<Ipv6Addr>()
                        .ok()
                        .and_then(|mask| ipnetwork::ipv6_mask_to_prefix(mask).ok())
                        .ok_or_else(|| invalid(format!("invalid netmask '{}'", network.netmask)))?,
                };
                let net = Ipv6Network::new(ip, prefix)
                    .map_err(|e| invalid(format!("invalid prefix length {}: {}", prefix, e)))?;
                (prefix.to_string(), net.network().to_string(), String::new(), true)
            }
        };

        Ok(StaticInterfaceConfiguration {
            name: interface,
            address: network.ip.clone(),
            netmask,
            network: net,
            broadcast,
            gateway: network.gateway.clone(),
            is_default_for_gateway,
            is_version6,
            mac,
            post_up_routes: network.routes.clone(),
        })
    }
}

impl InterfaceConfigurationCreator for DefaultInterfaceConfigurationCreator {
    fn create_interface_configurations(
        &self,
        networks: &Networks,
        interfaces_by_mac: &BTreeMap<String, String>,
    ) -> Result<Vec<InterfaceConfiguration>> {
        // A lone network without a MAC can only mean the lone interface
        let inferred_mac = match (networks.len(), interfaces_by_mac.len()) {
            (1, 1) => interfaces_by_mac.keys().next().cloned(),
            _ => None,
        };
        let single_network = networks.len() == 1;

        let mut configs = Vec::with_capacity(networks.len());
        for (name, network) in networks {
            let (interface, mac) = match &network.alias {
                Some(alias) if !alias.is_empty() => (alias.clone(), network.mac.to_lowercase()),
                _ => {
                    let mac = match (network.mac.is_empty(), &inferred_mac) {
                        (true, Some(inferred)) => inferred.clone(),
                        _ => network.mac.to_lowercase(),
                    };
                    let interface = interfaces_by_mac.get(&mac).cloned().ok_or_else(|| {
                        PlatformError::InterfaceNotFound {
                            network: name.clone(),
                            mac: mac.clone(),
                        }
                    })?;
                    (interface, mac)
                }
            };

            if network.is_dhcp() {
                configs.push(InterfaceConfiguration::Dhcp(DhcpInterfaceConfiguration {
                    name: interface,
                    mac,
                    post_up_routes: network.routes.clone(),
                }));
            } else {
                let is_default_for_gateway =
                    single_network || network.is_default_for(DefaultFor::Gateway);
                configs.push(InterfaceConfiguration::Static(self.create_static(
                    name,
                    interface,
                    mac,
                    network,
                    is_default_for_gateway,
                )?));
            }
        }

        Ok(configs)
    }
}
