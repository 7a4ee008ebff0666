use cirrus_platform::fakes::{
    ip_addr_json, FakeAddressBroadcaster, FakeClock, FakeCmdResult, FakeCmdRunner, FakeFileSystem,
};
use cirrus_platform::{
    ArpingConfig, ConvergencePhase, NetManager, NetPaths, PlatformError, UbuntuNetManager,
};
use cirrus_settings::{DefaultFor, Network, NetworkType, Networks};
use std::sync::Arc;
use tokio::sync::oneshot;

const EXPECTED_INTERFACES: &str = "# Generated by cirrus-agent
auto lo
iface lo inet loopback

auto eth0
iface eth0 inet static
    address 10.0.0.5
    network 10.0.0.0
    netmask 255.255.255.0
    broadcast 10.0.0.255
    gateway 10.0.0.1

dns-nameservers 8.8.8.8
";

struct Host {
    runner: Arc<FakeCmdRunner>,
    fs: Arc<FakeFileSystem>,
    broadcaster: Arc<FakeAddressBroadcaster>,
    manager: UbuntuNetManager,
}

fn host(live_addresses: &[(&str, &str)]) -> Host {
    let runner = Arc::new(FakeCmdRunner::new());
    runner.set_result(
        "ip -j addr show",
        FakeCmdResult::success(ip_addr_json(live_addresses)),
    );
    let fs = Arc::new(FakeFileSystem::new());
    fs.add_network_device("/sys/class/net", "eth0", "aa:bb:cc:dd:ee:01");
    fs.add_network_device("/sys/class/net", "eth1", "aa:bb:cc:dd:ee:02");
    fs.add_virtual_device("/sys/class/net", "lo", "00:00:00:00:00:00");
    fs.put_file("/etc/resolv.conf", "nameserver 8.8.8.8\n");

    let broadcaster = Arc::new(FakeAddressBroadcaster::new());
    let manager = UbuntuNetManager::new(
        runner.clone(),
        fs.clone(),
        Arc::new(FakeClock::new()),
        NetPaths::default(),
        ArpingConfig::default(),
    )
    .with_broadcaster(broadcaster.clone());

    Host {
        runner,
        fs,
        broadcaster,
        manager,
    }
}

fn static_network(ip: &str, mac: &str) -> Network {
    Network {
        network_type: NetworkType::Static,
        ip: ip.to_string(),
        netmask: "255.255.255.0".to_string(),
        gateway: "10.0.0.1".to_string(),
        dns: vec!["8.8.8.8".to_string()],
        mac: mac.to_string(),
        default_for: [DefaultFor::Dns, DefaultFor::Gateway].into_iter().collect(),
        ..Default::default()
    }
}

fn single_static() -> Networks {
    let mut networks = Networks::new();
    networks.insert("default", static_network("10.0.0.5", "aa:bb:cc:dd:ee:01"));
    networks
}

#[tokio::test]
async fn converges_static_network_and_broadcasts() {
    let host = host(&[("eth0", "10.0.0.5"), ("lo", "127.0.0.1")]);
    let (tx, rx) = oneshot::channel();

    host.manager
        .setup_networking(&single_static(), Some(tx))
        .await
        .unwrap();
    rx.await.unwrap().unwrap();

    assert_eq!(
        host.fs.contents("/etc/network/interfaces").unwrap(),
        EXPECTED_INTERFACES
    );
    assert!(host.fs.contents("/etc/dhcp/dhclient.conf").is_none());
    assert!(host.runner.ran("pkill dhclient"));
    assert!(host.runner.ran("resolvconf -d eth0.dhclient"));
    assert!(host.runner.ran("resolvconf -d eth1.dhclient"));
    assert!(host.runner.ran("ifdown --force eth0"));
    assert!(host.runner.ran("ifup --force eth0"));
    assert_eq!(host.manager.last_phase(), ConvergencePhase::Validated);
    assert_eq!(
        host.broadcaster.broadcasts(),
        vec![("eth0".to_string(), "10.0.0.5".to_string())]
    );
}

#[tokio::test]
async fn second_identical_run_does_not_bounce_interfaces() {
    let host = host(&[("eth0", "10.0.0.5")]);
    let networks = single_static();

    host.manager.setup_networking(&networks, None).await.unwrap();
    host.runner.clear_commands();

    host.manager.setup_networking(&networks, None).await.unwrap();

    assert!(host.runner.commands_starting_with("ifdown").is_empty());
    assert!(host.runner.commands_starting_with("ifup").is_empty());
    assert!(host.runner.commands_starting_with("pkill").is_empty());
    assert_eq!(host.fs.write_count("/etc/network/interfaces"), 1);
    assert_eq!(host.manager.last_phase(), ConvergencePhase::Validated);
}

#[tokio::test]
async fn preconfigured_networks_only_touch_resolver() {
    let host = host(&[]);
    let mut network = static_network("10.0.0.5", "aa:bb:cc:dd:ee:01");
    network.preconfigured = true;
    let mut networks = Networks::new();
    networks.insert("default", network);
    let (tx, rx) = oneshot::channel();

    host.manager
        .setup_networking(&networks, Some(tx))
        .await
        .unwrap();

    assert_eq!(host.runner.commands(), vec!["resolvconf -u"]);
    assert!(host.fs.contents("/etc/network/interfaces").is_none());
    assert!(host.fs.contents("/etc/resolvconf/resolv.conf.d/base").is_some());
    assert_eq!(host.manager.last_phase(), ConvergencePhase::Idle);
    // no broadcast is started, so the sender is dropped
    assert!(rx.await.is_err());
}

#[tokio::test]
async fn vip_networks_are_ignored() {
    let host = host(&[("eth0", "10.0.0.5")]);
    let mut networks = single_static();
    networks.insert(
        "floating",
        Network {
            network_type: NetworkType::Vip,
            ip: "192.0.2.10".to_string(),
            mac: "aa:bb:cc:dd:ee:99".to_string(),
            ..Default::default()
        },
    );

    host.manager.setup_networking(&networks, None).await.unwrap();

    let interfaces = host.fs.contents("/etc/network/interfaces").unwrap();
    assert_eq!(interfaces, EXPECTED_INTERFACES);
    assert!(!interfaces.contains("192.0.2.10"));
}

#[tokio::test]
async fn dhcp_network_writes_dhclient_and_resolves_lazily() {
    let host = host(&[("eth1", "10.0.1.20")]);
    host.runner.set_result(
        "ip -j addr show dev eth1",
        FakeCmdResult::success(ip_addr_json(&[("eth1", "10.0.1.20")])),
    );
    let mut networks = Networks::new();
    networks.insert(
        "dynamic",
        Network {
            network_type: NetworkType::Dynamic,
            dns: vec!["1.1.1.1".to_string()],
            mac: "AA:BB:CC:DD:EE:02".to_string(),
            ..Default::default()
        },
    );
    host.fs.put_file("/etc/resolv.conf", "nameserver 1.1.1.1\n");
    let (tx, rx) = oneshot::channel();

    host.manager
        .setup_networking(&networks, Some(tx))
        .await
        .unwrap();
    rx.await.unwrap().unwrap();

    let interfaces = host.fs.contents("/etc/network/interfaces").unwrap();
    assert!(interfaces.contains("auto eth1\niface eth1 inet dhcp\n"));
    assert!(interfaces.ends_with("dns-nameservers 1.1.1.1\n"));
    assert!(host
        .fs
        .contents("/etc/dhcp/dhclient.conf")
        .unwrap()
        .contains("prepend domain-name-servers 1.1.1.1;"));
    assert_eq!(
        host.broadcaster.broadcasts(),
        vec![("eth1".to_string(), "10.0.1.20".to_string())]
    );
}

#[tokio::test]
async fn address_mismatch_fails_validation() {
    let host = host(&[("eth0", "10.0.0.9")]);

    let err = host
        .manager
        .setup_networking(&single_static(), None)
        .await
        .unwrap_err();

    assert!(err.to_string().contains(
        "validating network interface 'eth0' IP addresses, expected: '10.0.0.5', actual: '10.0.0.9'"
    ));
    assert_eq!(host.manager.last_phase(), ConvergencePhase::Started);
    assert!(host.broadcaster.broadcasts().is_empty());
}

#[tokio::test]
async fn alias_interfaces_are_not_validated() {
    let host = host(&[("eth0", "10.0.0.5")]);
    let mut networks = single_static();
    let mut aliased = static_network("10.0.0.6", "");
    aliased.alias = Some("eth0:0".to_string());
    aliased.default_for.clear();
    networks.insert("secondary", aliased);
    // resolv.conf becomes a link into resolvconf's run directory
    host.fs
        .put_file("/run/resolvconf/resolv.conf", "nameserver 8.8.8.8\n");

    host.manager.setup_networking(&networks, None).await.unwrap();

    let interfaces = host.fs.contents("/etc/network/interfaces").unwrap();
    assert!(interfaces.contains("auto eth0:0\niface eth0:0 inet static\n    address 10.0.0.6"));
    assert!(host.runner.ran("ifup --force eth0 eth0:0"));
    assert!(host.runner.ran("resolvconf -u"));
}

#[tokio::test]
async fn missing_dns_fails_validation() {
    let host = host(&[("eth0", "10.0.0.5")]);
    host.fs.put_file("/etc/resolv.conf", "nameserver 9.9.9.9\n");

    let err = host
        .manager
        .setup_networking(&single_static(), None)
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        PlatformError::Context { source, .. } if matches!(**source, PlatformError::DnsNotConfigured(_))
    ));
}

#[tokio::test]
async fn broadcast_failure_is_reported_through_channel() {
    let host = host(&[("eth0", "10.0.0.5")]);
    host.broadcaster.fail_with("arping not installed");
    let (tx, rx) = oneshot::channel();

    host.manager
        .setup_networking(&single_static(), Some(tx))
        .await
        .unwrap();

    let err = rx.await.unwrap().unwrap_err();
    assert!(matches!(err, PlatformError::Broadcast(_)));
}
