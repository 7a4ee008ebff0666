//! ifupdown-based network convergence (Debian/Ubuntu)

use super::dns::{DnsValidator, ResolvConfDnsValidator};
use super::interface_config::{
    DefaultInterfaceConfigurationCreator, InterfaceConfiguration, InterfaceConfigurationCreator,
};
use super::ipv6::{KernelIpv6, SysctlKernelIpv6};
use super::mac::{MacAddressDetector, SysfsMacAddressDetector};
use super::phase::{ConvergencePhase, PhaseTracker};
use super::templates::{render_dhclient_config, render_network_interfaces, render_resolv_conf};
use super::{BroadcastDone, NetManager, NetPaths, NetworkConfig};
use crate::arp::{AddressBroadcaster, ArpingBroadcaster, ArpingConfig};
use crate::error::{Result, ResultExt};
use crate::ip::{
    CmdInterfaceAddressesProvider, CmdIpResolver, InterfaceAddress, InterfaceAddressesValidator,
    IpResolver, SystemInterfaceAddressesValidator,
};
use crate::system::{Clock, CmdRunner, ConvergeOpts, FileSystem};
use async_trait::async_trait;
use cirrus_settings::Networks;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, warn};

lazy_static! {
    static ref UNKNOWN_INTERFACE: Regex = Regex::new(r"[uU]nknown interface").unwrap();
}

pub struct UbuntuNetManager {
    runner: Arc<dyn CmdRunner>,
    fs: Arc<dyn FileSystem>,
    paths: NetPaths,
    ip_resolver: Arc<dyn IpResolver>,
    creator: Arc<dyn InterfaceConfigurationCreator>,
    mac_detector: Arc<dyn MacAddressDetector>,
    addresses_validator: Arc<dyn InterfaceAddressesValidator>,
    dns_validator: Arc<dyn DnsValidator>,
    broadcaster: Arc<dyn AddressBroadcaster>,
    kernel_ipv6: Arc<dyn KernelIpv6>,
    phase: PhaseTracker,
}

impl UbuntuNetManager {
    /// Manager wired to the system tools behind `runner` and `fs`
    pub fn new(
        runner: Arc<dyn CmdRunner>,
        fs: Arc<dyn FileSystem>,
        clock: Arc<dyn Clock>,
        paths: NetPaths,
        arping: ArpingConfig,
    ) -> Self {
        let broadcaster = ArpingBroadcaster::new(runner.clone(), fs.clone(), clock, arping)
            .with_sys_class_net(paths.sys_class_net.clone());
        Self {
            ip_resolver: Arc::new(CmdIpResolver::new(runner.clone())),
            creator: Arc::new(DefaultInterfaceConfigurationCreator::new()),
            mac_detector: Arc::new(SysfsMacAddressDetector::new(
                fs.clone(),
                paths.sys_class_net.clone(),
            )),
            addresses_validator: Arc::new(SystemInterfaceAddressesValidator::new(Arc::new(
                CmdInterfaceAddressesProvider::new(runner.clone()),
            ))),
            dns_validator: Arc::new(ResolvConfDnsValidator::new(
                fs.clone(),
                paths.resolv_conf.clone(),
            )),
            broadcaster: Arc::new(broadcaster),
            kernel_ipv6: Arc::new(SysctlKernelIpv6::new(runner.clone())),
            phase: PhaseTracker::default(),
            runner,
            fs,
            paths,
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn AddressBroadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    /// Phase reached by the most recent [`NetManager::setup_networking`] call
    pub fn last_phase(&self) -> ConvergencePhase {
        self.phase.current()
    }

    /// Static and DHCP records plus DNS servers for the non-VIP networks
    pub fn compute_network_config(&self, networks: &Networks) -> Result<NetworkConfig> {
        let non_vip = networks.non_vip();
        let interfaces_by_mac = self
            .mac_detector
            .detect_mac_addresses()
            .context("Getting network interfaces")?;
        let records = self
            .creator
            .create_interface_configurations(&non_vip, &interfaces_by_mac)
            .context("Creating interface configurations")?;

        let mut config = NetworkConfig {
            dns_servers: non_vip.dns_servers(),
            ..Default::default()
        };
        for record in records {
            match record {
                InterfaceConfiguration::Static(c) => config.static_configs.push(c),
                InterfaceConfiguration::Dhcp(c) => config.dhcp_configs.push(c),
            }
        }
        config.static_configs.sort_by(|a, b| a.name.cmp(&b.name));
        config.dhcp_configs.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(config)
    }

    fn write_network_configs(
        &self,
        interfaces: &str,
        dhclient: Option<&str>,
        opts: ConvergeOpts,
    ) -> Result<bool> {
        let interfaces_changed = self
            .fs
            .converge_file_contents(&self.paths.interfaces, interfaces.as_bytes(), opts)
            .with_context(|| format!("Writing to {}", self.paths.interfaces.display()))?;

        let dhclient_changed = match dhclient {
            Some(contents) => self
                .fs
                .converge_file_contents(&self.paths.dhclient_conf, contents.as_bytes(), opts)
                .with_context(|| format!("Writing to {}", self.paths.dhclient_conf.display()))?,
            None => false,
        };

        Ok(interfaces_changed || dhclient_changed)
    }

    /// Drop DHCP-learned resolvers so stale servers do not survive the restart
    async fn remove_dhcp_dns_configuration(&self) -> Result<()> {
        if let Err(e) = self.runner.run_command("pkill", &["dhclient"]).await {
            debug!(error = %e, "pkill dhclient failed");
        }

        let interfaces = self
            .mac_detector
            .detect_mac_addresses()
            .context("Detecting network interfaces")?;
        for name in interfaces.values() {
            let record = format!("{}.dhclient", name);
            if let Err(e) = self.runner.run_command("resolvconf", &["-d", &record]).await {
                warn!(interface = %name, error = %e, "Removing DHCP resolver record failed");
            }
        }
        Ok(())
    }

    async fn run_interface_command(&self, command: &str, names: &[String]) {
        if names.is_empty() {
            return;
        }
        let mut args = vec!["--force"];
        args.extend(names.iter().map(String::as_str));
        if let Err(e) = self.runner.run_command(command, &args).await {
            warn!(command = command, interfaces = ?names, error = %e, "Interface command failed");
        }
    }

    async fn apply_network_configs(
        &self,
        config: &NetworkConfig,
        interfaces: &str,
        dhclient: Option<&str>,
    ) -> Result<()> {
        self.remove_dhcp_dns_configuration().await?;

        let names = config.interface_names();
        self.run_interface_command("ifdown", &names).await;
        self.phase.advance(ConvergencePhase::Stopped)?;

        if let Err(e) = self.write_network_configs(interfaces, dhclient, ConvergeOpts::default()) {
            warn!(error = %e, "Writing network configuration failed, bringing interfaces back up");
            self.run_interface_command("ifup", &names).await;
            return Err(e).context("Updating network configuration");
        }
        self.phase.advance(ConvergencePhase::Written)?;

        self.run_interface_command("ifup", &names).await;
        self.phase.advance(ConvergencePhase::Started)?;

        info!(interfaces = ?names, "Restarted network interfaces");
        Ok(())
    }

    async fn write_resolv_conf(&self, networks: &Networks) -> Result<()> {
        let dns_servers = networks.non_vip().dns_servers();
        let base = &self.paths.resolvconf_base;

        if !dns_servers.is_empty() {
            self.fs
                .write_file(base, render_resolv_conf(&dns_servers).as_bytes())
                .with_context(|| format!("Writing to {}", base.display()))?;
        } else {
            let target = self
                .fs
                .read_and_follow_link(&self.paths.resolv_conf)
                .with_context(|| format!("Reading {}", self.paths.resolv_conf.display()))?;
            // A regular file holds hand-made config worth keeping as the base
            if target == self.paths.resolv_conf {
                self.fs
                    .copy_file(&self.paths.resolv_conf, base)
                    .with_context(|| format!("Copying resolv.conf to {}", base.display()))?;
            }
        }

        self.fs
            .symlink(&self.paths.resolvconf_run, &self.paths.resolv_conf)
            .with_context(|| format!("Linking {}", self.paths.resolv_conf.display()))?;

        self.runner
            .run_command("resolvconf", &["-u"])
            .await
            .context("Updating resolvconf")?;

        info!(servers = ?dns_servers, "Wrote resolver configuration");
        Ok(())
    }

    fn spawn_broadcast(&self, addresses: Vec<InterfaceAddress>, done: Option<BroadcastDone>) {
        let broadcaster = self.broadcaster.clone();
        tokio::spawn(async move {
            let result = broadcaster.broadcast_mac_addresses(addresses).await;
            if let Err(e) = &result {
                warn!(error = %e, "Broadcasting addresses failed");
            }
            if let Some(done) = done {
                let _ = done.send(result);
            }
        });
    }
}

#[async_trait]
impl NetManager for UbuntuNetManager {
    async fn setup_networking(
        &self,
        networks: &Networks,
        broadcast_done: Option<BroadcastDone>,
    ) -> Result<()> {
        self.phase.reset();

        if networks.is_preconfigured() {
            info!("Networks are preconfigured, only writing resolver configuration");
            return self
                .write_resolv_conf(networks)
                .await
                .context("Writing resolv.conf");
        }

        if networks.has_interface_alias() {
            if let Err(e) = self.write_resolv_conf(networks).await {
                warn!(error = %e, "Writing resolver configuration for aliased interfaces failed");
            }
        }

        let config = self.compute_network_config(networks)?;

        if config.has_version6() {
            self.kernel_ipv6
                .enable()
                .await
                .context("Enabling IPv6 in kernel")?;
        }

        let interfaces = render_network_interfaces(
            &config.dhcp_configs,
            &config.static_configs,
            &config.dns_servers,
        );
        let dhclient = (!config.dhcp_configs.is_empty())
            .then(|| render_dhclient_config(&config.dns_servers));

        let changed = self
            .write_network_configs(&interfaces, dhclient.as_deref(), ConvergeOpts::dry_run())
            .context("Checking network configuration for changes")?;

        if changed {
            self.apply_network_configs(&config, &interfaces, dhclient.as_deref())
                .await?;
        } else {
            info!("Network configuration unchanged, leaving interfaces up");
        }

        let static_addresses: Vec<InterfaceAddress> = config
            .static_configs
            .iter()
            .filter(|c| !c.is_virtual())
            .map(|c| InterfaceAddress::immediate(&c.name, &c.address))
            .collect();

        self.addresses_validator
            .validate(&static_addresses)
            .await
            .context("Validating static network configuration")?;
        self.dns_validator
            .validate(&config.dns_servers)
            .context("Validating DNS configuration")?;
        self.phase.advance(ConvergencePhase::Validated)?;

        let mut addresses = static_addresses;
        addresses.extend(
            config
                .dhcp_configs
                .iter()
                .map(|c| InterfaceAddress::resolving(&c.name, self.ip_resolver.clone())),
        );
        self.spawn_broadcast(addresses, broadcast_done);

        Ok(())
    }

    async fn get_configured_network_interfaces(&self) -> Result<Vec<String>> {
        let interfaces = self
            .mac_detector
            .detect_mac_addresses()
            .context("Getting network interfaces")?;

        let mut configured = Vec::new();
        for name in interfaces.values() {
            let stderr = match self.runner.run_command("ifup", &["--no-act", name]).await {
                Ok(output) => output.stderr,
                Err(e) => {
                    debug!(interface = %name, error = %e, "ifup --no-act failed");
                    e.stderr().unwrap_or_default().to_string()
                }
            };
            if !UNKNOWN_INTERFACE.is_match(&stderr) {
                configured.push(name.clone());
            }
        }
        configured.sort();

        Ok(configured)
    }

    async fn setup_ipv6(&self, enable: bool) -> Result<()> {
        if !enable {
            return Ok(());
        }
        self.kernel_ipv6.enable().await.context("Enabling IPv6 in kernel")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{
        ip_addr_json, FakeAddressBroadcaster, FakeClock, FakeCmdResult, FakeCmdRunner,
        FakeFileSystem,
    };
    use cirrus_settings::{DefaultFor, Network, NetworkType};
    use std::path::Path;

    struct Harness {
        runner: Arc<FakeCmdRunner>,
        fs: Arc<FakeFileSystem>,
        manager: UbuntuNetManager,
    }

    fn harness() -> Harness {
        let runner = Arc::new(FakeCmdRunner::new());
        let fs = Arc::new(FakeFileSystem::new());
        fs.add_network_device("/sys/class/net", "eth0", "aa:bb:cc:dd:ee:01");
        fs.add_network_device("/sys/class/net", "eth1", "aa:bb:cc:dd:ee:02");
        fs.put_file("/etc/resolv.conf", "nameserver 8.8.8.8\n");
        let manager = UbuntuNetManager::new(
            runner.clone(),
            fs.clone(),
            Arc::new(FakeClock::new()),
            NetPaths::default(),
            ArpingConfig::default(),
        )
        .with_broadcaster(Arc::new(FakeAddressBroadcaster::new()));
        Harness {
            runner,
            fs,
            manager,
        }
    }

    fn static_networks() -> Networks {
        let mut networks = Networks::new();
        networks.insert(
            "default",
            Network {
                network_type: NetworkType::Static,
                ip: "10.0.0.5".to_string(),
                netmask: "255.255.255.0".to_string(),
                gateway: "10.0.0.1".to_string(),
                dns: vec!["8.8.8.8".to_string()],
                mac: "aa:bb:cc:dd:ee:01".to_string(),
                default_for: [DefaultFor::Dns, DefaultFor::Gateway].into_iter().collect(),
                ..Default::default()
            },
        );
        networks
    }

    #[tokio::test]
    async fn test_compute_network_config_sorts_and_splits() {
        let h = harness();
        let mut networks = static_networks();
        networks.insert(
            "a-dynamic",
            Network {
                network_type: NetworkType::Dynamic,
                mac: "aa:bb:cc:dd:ee:02".to_string(),
                ..Default::default()
            },
        );

        let config = h.manager.compute_network_config(&networks).unwrap();

        assert_eq!(config.interface_names(), vec!["eth1", "eth0"]);
        assert_eq!(config.dns_servers, vec!["8.8.8.8"]);
        assert!(!config.has_version6());
    }

    #[tokio::test]
    async fn test_failed_write_restarts_interfaces() {
        let h = harness();
        h.fs.fail_writes_to("/etc/network/interfaces");

        let err = h
            .manager
            .setup_networking(&static_networks(), None)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Updating network configuration"));
        let commands = h.runner.commands();
        let down = commands.iter().position(|c| c == "ifdown --force eth0").unwrap();
        let up = commands.iter().position(|c| c == "ifup --force eth0").unwrap();
        assert!(down < up);
        assert_eq!(h.manager.last_phase(), ConvergencePhase::Stopped);
    }

    #[tokio::test]
    async fn test_detection_failure_leaves_interfaces_alone() {
        let runner = Arc::new(FakeCmdRunner::new());
        let fs = Arc::new(FakeFileSystem::new());
        let manager = UbuntuNetManager::new(
            runner.clone(),
            fs,
            Arc::new(FakeClock::new()),
            NetPaths::default(),
            ArpingConfig::default(),
        );

        assert!(manager.setup_networking(&static_networks(), None).await.is_err());
        assert!(runner.commands_starting_with("ifdown").is_empty());
        assert_eq!(manager.last_phase(), ConvergencePhase::Idle);
    }

    #[tokio::test]
    async fn test_resolv_conf_written_for_dns() {
        let h = harness();
        let mut networks = static_networks();
        networks.insert(
            "default",
            Network {
                preconfigured: true,
                ..networks.get("default").cloned().unwrap()
            },
        );

        h.manager.setup_networking(&networks, None).await.unwrap();

        assert_eq!(
            h.fs.contents("/etc/resolvconf/resolv.conf.d/base").unwrap(),
            "# Generated by cirrus-agent\nnameserver 8.8.8.8\n"
        );
        assert_eq!(
            h.fs.symlink_target("/etc/resolv.conf").unwrap(),
            Path::new("/run/resolvconf/resolv.conf")
        );
        assert!(h.runner.ran("resolvconf -u"));
    }

    #[tokio::test]
    async fn test_resolv_conf_kept_as_base_without_dns() {
        let h = harness();
        let mut networks = Networks::new();
        networks.insert(
            "default",
            Network {
                network_type: NetworkType::Dynamic,
                preconfigured: true,
                ..Default::default()
            },
        );

        h.manager.setup_networking(&networks, None).await.unwrap();

        assert_eq!(
            h.fs.contents("/etc/resolvconf/resolv.conf.d/base").unwrap(),
            "nameserver 8.8.8.8\n"
        );
    }

    #[tokio::test]
    async fn test_resolvconf_update_failure_is_fatal() {
        let h = harness();
        h.runner
            .set_result("resolvconf -u", FakeCmdResult::failure(1, "resolvconf: Error"));
        let mut networks = static_networks();
        networks.insert(
            "default",
            Network {
                preconfigured: true,
                ..networks.get("default").cloned().unwrap()
            },
        );

        let err = h.manager.setup_networking(&networks, None).await.unwrap_err();

        assert_eq!(err.stderr(), Some("resolvconf: Error"));
    }

    #[tokio::test]
    async fn test_configured_interfaces() {
        let h = harness();
        h.runner.set_result(
            "ifup --no-act eth1",
            FakeCmdResult::failure(1, "ifup: unknown interface eth1"),
        );

        let configured = h.manager.get_configured_network_interfaces().await.unwrap();

        assert_eq!(configured, vec!["eth0"]);
    }

    #[tokio::test]
    async fn test_setup_ipv6() {
        let h = harness();

        h.manager.setup_ipv6(false).await.unwrap();
        assert!(h.runner.commands().is_empty());

        h.manager.setup_ipv6(true).await.unwrap();
        assert!(h.runner.ran("sysctl -w net.ipv6.conf.all.disable_ipv6=0"));
    }

    #[tokio::test]
    async fn test_ipv6_network_enables_kernel_support() {
        let h = harness();
        h.runner.set_result(
            "ip -j addr show",
            FakeCmdResult::success(ip_addr_json(&[("eth0", "fd00::5")])),
        );
        let mut networks = Networks::new();
        networks.insert(
            "v6",
            Network {
                ip: "fd00::5".to_string(),
                netmask: "64".to_string(),
                gateway: "fd00::1".to_string(),
                mac: "aa:bb:cc:dd:ee:01".to_string(),
                ..Default::default()
            },
        );

        h.manager.setup_networking(&networks, None).await.unwrap();

        let commands = h.runner.commands();
        let sysctl = commands.iter().position(|c| c.starts_with("sysctl")).unwrap();
        let ifdown = commands.iter().position(|c| c.starts_with("ifdown")).unwrap();
        assert!(sysctl < ifdown);
        assert!(h.fs.contents("/etc/network/interfaces").unwrap().contains("iface eth0 inet6 static"));
    }
}
