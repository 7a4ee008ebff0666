use crate::error::{Result, ResultExt};
use crate::system::CmdRunner;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct IpLink {
    ifname: String,
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Debug, Deserialize)]
struct IpAddrInfo {
    family: String,
    #[serde(default)]
    local: String,
    #[serde(default)]
    scope: String,
}

/// One address as the OS reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemAddress {
    pub interface: String,
    pub ip: String,
    pub is_version6: bool,
    pub is_global: bool,
}

/// Parse `ip -j addr show` output into a flat address list
pub fn parse_ip_addr_output(stdout: &str) -> Result<Vec<SystemAddress>> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }

    let links: Vec<IpLink> = serde_json::from_str(stdout)?;

    Ok(links
        .into_iter()
        .flat_map(|link| {
            let interface = link.ifname;
            link.addr_info
                .into_iter()
                .filter(|info| !info.local.is_empty())
                .filter(|info| info.family == "inet" || info.family == "inet6")
                .map(move |info| SystemAddress {
                    interface: interface.clone(),
                    ip: info.local,
                    is_version6: info.family == "inet6",
                    is_global: info.scope == "global",
                })
        })
        .collect())
}

/// Lists every address currently configured on the host
#[async_trait]
pub trait InterfaceAddressesProvider: Send + Sync {
    async fn get(&self) -> Result<Vec<SystemAddress>>;
}

pub struct CmdInterfaceAddressesProvider {
    runner: Arc<dyn CmdRunner>,
}

impl CmdInterfaceAddressesProvider {
    pub fn new(runner: Arc<dyn CmdRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl InterfaceAddressesProvider for CmdInterfaceAddressesProvider {
    async fn get(&self) -> Result<Vec<SystemAddress>> {
        let output = self
            .runner
            .run_command("ip", &["-j", "addr", "show"])
            .await
            .context("Listing interface addresses")?;
        parse_ip_addr_output(&output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{ip_addr_json, FakeCmdResult, FakeCmdRunner};
    use crate::error::PlatformError;

    const IP_ADDR_OUTPUT: &str = r#"[
        {"ifindex":1,"ifname":"lo","flags":["LOOPBACK","UP"],"addr_info":[
            {"family":"inet","local":"127.0.0.1","prefixlen":8,"scope":"host","label":"lo"},
            {"family":"inet6","local":"::1","prefixlen":128,"scope":"host"}]},
        {"ifindex":2,"ifname":"eth0","flags":["BROADCAST","UP"],"addr_info":[
            {"family":"inet","local":"10.0.0.5","prefixlen":24,"broadcast":"10.0.0.255","scope":"global"},
            {"family":"inet6","local":"fe80::1","prefixlen":64,"scope":"link"}]},
        {"ifindex":3,"ifname":"eth1","flags":["BROADCAST"],"addr_info":[]}
    ]"#;

    #[test]
    fn test_parse_ip_addr_output() {
        let addrs = parse_ip_addr_output(IP_ADDR_OUTPUT).unwrap();

        assert_eq!(addrs.len(), 4);
        let eth0: Vec<_> = addrs.iter().filter(|a| a.interface == "eth0").collect();
        assert_eq!(eth0[0].ip, "10.0.0.5");
        assert!(eth0[0].is_global);
        assert!(!eth0[0].is_version6);
        assert!(eth0[1].is_version6);
        assert!(!eth0[1].is_global);
        assert!(addrs.iter().all(|a| a.interface != "eth1"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_ip_addr_output("Device \"eth9\" does not exist."),
            Err(PlatformError::Serialization(_))
        ));
        assert!(parse_ip_addr_output("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provider_runs_ip() {
        let runner = Arc::new(FakeCmdRunner::new());
        runner.set_result(
            "ip -j addr show",
            FakeCmdResult::success(ip_addr_json(&[("eth0", "10.0.0.5")])),
        );

        let addrs = CmdInterfaceAddressesProvider::new(runner.clone())
            .get()
            .await
            .unwrap();

        assert_eq!(addrs[0].interface, "eth0");
        assert!(runner.ran("ip -j addr show"));
    }
}
