//! Rendering of the network artifacts written to disk
//!
//! Output is byte-stable for a given input: the convergence engine compares
//! it against what is on disk to decide whether interfaces must bounce.

use super::interface_config::{DhcpInterfaceConfiguration, StaticInterfaceConfiguration};

const HEADER: &str = "# Generated by cirrus-agent\n";

const DHCLIENT_PREAMBLE: &str = "option rfc3442-classless-static-routes code 121 = array of unsigned integer 8;

send host-name = gethostname();

request subnet-mask, broadcast-address, time-offset, routers,
\tdomain-name, domain-name-servers, domain-search, host-name,
\tnetbios-name-servers, netbios-scope, interface-mtu,
\trfc3442-classless-static-routes, ntp-servers;
";

/// Render `/etc/network/interfaces`.
///
/// Both record lists must already be sorted by interface name.
pub fn render_network_interfaces(
    dhcp_configs: &[DhcpInterfaceConfiguration],
    static_configs: &[StaticInterfaceConfiguration],
    dns_servers: &[String],
) -> String {
    let mut out = String::from(HEADER);
    out.push_str("auto lo\niface lo inet loopback\n");

    for c in dhcp_configs {
        out.push_str(&format!("\nauto {0}\niface {0} inet dhcp", c.name));
        for route in &c.post_up_routes {
            out.push_str(&format!(
                "\npost-up route add -net {} netmask {} gw {}",
                route.destination, route.netmask, route.gateway
            ));
        }
        out.push('\n');
    }

    for c in static_configs {
        let family = if c.is_version6 { "inet6" } else { "inet" };
        out.push_str(&format!("\nauto {0}\niface {0} {1} static", c.name, family));
        out.push_str(&format!("\n    address {}", c.address));
        if !c.is_version6 {
            out.push_str(&format!("\n    network {}", c.network));
        }
        out.push_str(&format!("\n    netmask {}", c.netmask));
        if c.is_default_for_gateway {
            if !c.is_version6 {
                out.push_str(&format!("\n    broadcast {}", c.broadcast));
            }
            out.push_str(&format!("\n    gateway {}", c.gateway));
        }
        for route in &c.post_up_routes {
            out.push_str(&format!(
                "\n    post-up route add -net {} netmask {} gw {}",
                route.destination, route.netmask, route.gateway
            ));
        }
        out.push('\n');
    }

    if static_configs.iter().any(|c| c.is_version6) {
        out.push_str("\naccept_ra 1");
    }
    if !dns_servers.is_empty() {
        out.push_str("\ndns-nameservers ");
        out.push_str(&dns_servers.join(" "));
    }
    out.push('\n');

    out
}

/// Render `/etc/dhcp/dhclient.conf`
pub fn render_dhclient_config(dns_servers: &[String]) -> String {
    let mut out = String::from(HEADER);
    out.push('\n');
    out.push_str(DHCLIENT_PREAMBLE);
    if !dns_servers.is_empty() {
        out.push_str(&format!(
            "\nprepend domain-name-servers {};\n",
            dns_servers.join(", ")
        ));
    }
    out
}

/// Render resolver configuration, one `nameserver` line per server
pub fn render_resolv_conf(dns_servers: &[String]) -> String {
    let mut out = String::from(HEADER);
    for server in dns_servers {
        out.push_str(&format!("nameserver {}\n", server));
    }
    out
}
