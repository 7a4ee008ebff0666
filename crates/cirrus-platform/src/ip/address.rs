use super::provider::parse_ip_addr_output;
use crate::error::{PlatformError, Result, ResultExt};
use crate::system::CmdRunner;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Looks up the address an interface currently holds
#[async_trait]
pub trait IpResolver: Send + Sync {
    async fn get_primary_ip(&self, interface: &str) -> Result<String>;
}

/// Resolves through `ip -j addr show dev <iface>`, preferring global IPv4
pub struct CmdIpResolver {
    runner: Arc<dyn CmdRunner>,
}

impl CmdIpResolver {
    pub fn new(runner: Arc<dyn CmdRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl IpResolver for CmdIpResolver {
    async fn get_primary_ip(&self, interface: &str) -> Result<String> {
        let output = self
            .runner
            .run_command("ip", &["-j", "addr", "show", "dev", interface])
            .await
            .with_context(|| format!("Getting addresses of interface '{}'", interface))?;
        let addrs = parse_ip_addr_output(&output.stdout)?;

        addrs
            .iter()
            .filter(|a| a.interface == interface && a.is_global)
            .min_by_key(|a| a.is_version6)
            .map(|a| a.ip.clone())
            .ok_or_else(|| PlatformError::NoAddress(interface.to_string()))
    }
}

/// An interface paired with its address, known now or looked up on demand
#[derive(Clone)]
pub enum InterfaceAddress {
    /// Statically configured, known up front
    Immediate { interface: String, ip: String },
    /// Assigned by DHCP, read from the OS when needed
    Resolving {
        interface: String,
        resolver: Arc<dyn IpResolver>,
    },
}

impl InterfaceAddress {
    pub fn immediate(interface: impl Into<String>, ip: impl Into<String>) -> Self {
        Self::Immediate {
            interface: interface.into(),
            ip: ip.into(),
        }
    }

    pub fn resolving(interface: impl Into<String>, resolver: Arc<dyn IpResolver>) -> Self {
        Self::Resolving {
            interface: interface.into(),
            resolver,
        }
    }

    pub fn interface_name(&self) -> &str {
        match self {
            Self::Immediate { interface, .. } | Self::Resolving { interface, .. } => interface,
        }
    }

    pub async fn resolve(&self) -> Result<String> {
        match self {
            Self::Immediate { ip, .. } => Ok(ip.clone()),
            Self::Resolving {
                interface,
                resolver,
            } => resolver.get_primary_ip(interface).await,
        }
    }
}

impl fmt::Debug for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate { interface, ip } => f
                .debug_struct("Immediate")
                .field("interface", interface)
                .field("ip", ip)
                .finish(),
            Self::Resolving { interface, .. } => f
                .debug_struct("Resolving")
                .field("interface", interface)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{ip_addr_json, FakeCmdResult, FakeCmdRunner};

    #[tokio::test]
    async fn test_resolving_prefers_global_ipv4() {
        let runner = Arc::new(FakeCmdRunner::new());
        runner.set_result(
            "ip -j addr show dev eth0",
            FakeCmdResult::success(ip_addr_json(&[("eth0", "fd00::5"), ("eth0", "10.0.0.7")])),
        );
        let addr = InterfaceAddress::resolving("eth0", Arc::new(CmdIpResolver::new(runner)));

        assert_eq!(addr.interface_name(), "eth0");
        assert_eq!(addr.resolve().await.unwrap(), "10.0.0.7");
    }

    #[tokio::test]
    async fn test_resolving_without_address() {
        let runner = Arc::new(FakeCmdRunner::new());
        runner.set_result("ip -j addr show dev eth1", FakeCmdResult::success("[]"));
        let addr = InterfaceAddress::resolving("eth1", Arc::new(CmdIpResolver::new(runner)));

        assert!(matches!(addr.resolve().await, Err(PlatformError::NoAddress(name)) if name == "eth1"));
    }

    #[tokio::test]
    async fn test_immediate() {
        let addr = InterfaceAddress::immediate("eth0", "10.0.0.5");
        assert_eq!(addr.resolve().await.unwrap(), "10.0.0.5");
        assert!(format!("{:?}", addr).contains("10.0.0.5"));
    }
}
