//! Network entities - the declarative network section of the settings document

use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};

/// How a network gets its address on this host
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Statically assigned address (`manual` in older documents)
    #[default]
    #[serde(alias = "manual", alias = "")]
    Static,
    /// Address leased over DHCP
    Dynamic,
    /// Virtual IP with no host interface
    Vip,
}

/// Concerns a network can be the default for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DefaultFor {
    Dns,
    Gateway,
}

/// A static route installed after an interface comes up
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Route {
    pub destination: String,
    pub gateway: String,
    pub netmask: String,
}

/// A single declared network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Network {
    #[serde(rename = "type", default)]
    pub network_type: NetworkType,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub netmask: String,
    #[serde(default)]
    pub gateway: String,
    /// DNS servers, in the order they must be tried
    #[serde(default)]
    pub dns: Vec<String>,
    #[serde(default)]
    pub mac: String,
    /// Address already assigned out-of-band
    #[serde(default)]
    pub preconfigured: bool,
    #[serde(rename = "default", default)]
    pub default_for: BTreeSet<DefaultFor>,
    #[serde(default)]
    pub routes: Vec<Route>,
    /// Virtual interface name (e.g. `eth0:0`) this network is bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Network {
    pub fn is_vip(&self) -> bool {
        self.network_type == NetworkType::Vip
    }

    /// Whether this network is configured through DHCP.
    ///
    /// A static network that carries neither address nor netmask cannot be
    /// statically configured, so it falls back to DHCP.
    pub fn is_dhcp(&self) -> bool {
        match self.network_type {
            NetworkType::Vip => false,
            NetworkType::Dynamic => true,
            NetworkType::Static => self.ip.is_empty() && self.netmask.is_empty(),
        }
    }

    pub fn is_default_for(&self, category: DefaultFor) -> bool {
        self.default_for.contains(&category)
    }

    pub fn has_alias(&self) -> bool {
        self.alias.as_deref().map_or(false, |a| !a.is_empty())
    }
}

/// Named networks, iterated in stable name order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct Networks(BTreeMap<String, Network>);

impl Networks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, network: Network) -> Option<Network> {
        self.0.insert(name.into(), network)
    }

    pub fn get(&self, name: &str) -> Option<&Network> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Network> {
        self.0.iter()
    }

    /// Every network except virtual IPs
    pub fn non_vip(&self) -> Networks {
        self.iter()
            .filter(|(_, network)| !network.is_vip())
            .map(|(name, network)| (name.clone(), network.clone()))
            .collect()
    }

    /// True when every physical network already has its address assigned.
    pub fn is_preconfigured(&self) -> bool {
        self.0
            .values()
            .filter(|network| !network.is_vip())
            .all(|network| network.preconfigured)
    }

    pub fn has_interface_alias(&self) -> bool {
        self.0.values().any(Network::has_alias)
    }

    /// The network providing the given default.
    ///
    /// A lone network is the default for everything.
    pub fn default_network_for(&self, category: DefaultFor) -> Option<&Network> {
        if self.0.len() == 1 {
            return self.0.values().next();
        }
        self.0.values().find(|network| network.is_default_for(category))
    }

    /// DNS servers of the DNS-default network, in declared order
    pub fn dns_servers(&self) -> Vec<String> {
        self.default_network_for(DefaultFor::Dns)
            .map(|network| network.dns.clone())
            .unwrap_or_default()
    }
}

impl FromIterator<(String, Network)> for Networks {
    fn from_iter<I: IntoIterator<Item = (String, Network)>>(iter: I) -> Self {
        Networks(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Networks {
    type Item = (&'a String, &'a Network);
    type IntoIter = btree_map::Iter<'a, String, Network>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
