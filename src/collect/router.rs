//! Router-config telemetry remap.
//!
//! Instead of reporting raw host interfaces, this mode maps the interfaces a
//! router configuration defines onto the canonical gateway names the
//! controller expects (`eth0` wan, `eth1` lan, `eth2` wan2) and can override
//! the device identity from a designated `uid` interface, so one agent per
//! site, each reporting as a distinct device.

use std::fs;
use std::net::Ipv4Addr;

use crate::config::TranslationTable;
use crate::error::Result;
use crate::inform::{HardwareAddr, Inform, Interface, NetworkConfig, Port, SpeedTestStatus};
use crate::pfsense::{RouterConfig, RouterInterface};

use super::{
    controller_ip, default_gateway, epoch_seconds, host_info, network_interfaces, sys_stats,
};

/// Synthesize the device MAC for an identity-override interface:
/// `be:ef` followed by the interface's IPv4 address.
pub fn identity_mac(ip: Ipv4Addr) -> HardwareAddr {
    let octets = ip.octets();
    HardwareAddr::new([0xbe, 0xef, octets[0], octets[1], octets[2], octets[3]])
}

// Platform version the router distribution writes to /etc/version, with the
// optional patch-level suffix.
fn router_version() -> Option<String> {
    let version = fs::read_to_string("/etc/version").ok()?.trim().to_string();
    if version.is_empty() {
        return None;
    }
    if let Ok(patch) = fs::read_to_string("/etc/version.patch") {
        let patch = patch.trim();
        if !patch.is_empty() {
            return Some(format!("{version}-p{patch}"));
        }
    }
    Some(version)
}

/// Build the router-mode inform payload.
pub async fn router_report(
    url: &str,
    version: &str,
    config: &RouterConfig,
    table: &TranslationTable,
    speedtest: Option<SpeedTestStatus>,
) -> Result<Inform> {
    let mut report = Inform::skeleton(url, version);
    report.time = epoch_seconds();
    report.inform_ip = controller_ip(url).await;

    let host = host_info();
    report.uptime = host.uptime;
    report.hostname = host.hostname;
    report.model = "UGW3".to_string();
    report.model_display = "UniFi-Gateway-3".to_string();
    report.version = router_version().unwrap_or(host.platform_version.clone());
    if !host.platform_version.is_empty() {
        report.bootrom_version = host.platform_version;
    }

    report.sys_stats = sys_stats();

    let interfaces = network_interfaces()?;
    Ok(assemble_router(
        report,
        &interfaces,
        config,
        table,
        default_gateway(),
        speedtest,
    ))
}

/// Shape the payload from the router-config mapping. Pure: all host state
/// comes in as arguments.
pub fn assemble_router(
    mut report: Inform,
    interfaces: &[Interface],
    config: &RouterConfig,
    table: &TranslationTable,
    gateway: Option<Ipv4Addr>,
    speedtest: Option<SpeedTestStatus>,
) -> Inform {
    report.speedtest_status = speedtest;
    report.interface_table = Vec::new();
    report.port_table = Vec::new();

    let physical = |device: &str| {
        interfaces
            .iter()
            .find(|iface| iface.name == device)
            .cloned()
            .unwrap_or_default()
    };
    let defined =
        |name: &str| config.interface(name).filter(|iface| !iface.device.is_empty());

    if let Some(pf) = defined(&table.wan) {
        let mut wan = physical(&pf.device);
        wan.name = "eth0".to_string();

        report.uplink = wan.name.clone();
        report.mac = wan.mac;
        report.serial = wan.mac.map(|mac| mac.hex_string()).unwrap_or_default();
        report.ip = wan.ip.clone();
        report.netmask = wan.netmask.clone();

        if let Some(gateway) = gateway {
            wan.gateways.push(gateway.to_string());
        }
        if !config.dns_servers.is_empty() {
            wan.nameservers = config.dns_servers.clone();
        }
        if let Some(status) = &report.speedtest_status {
            wan.latency = status.latency;
        }

        if pf.ip != "dhcp" {
            report.config_network_wan = static_config(&wan, pf, config);
        }

        report.port_table.push(Port {
            ifname: wan.name.clone(),
            name: "wan".to_string(),
        });
        report.interface_table.push(wan);
    }

    if let Some(pf) = defined(&table.wan2) {
        let mut wan2 = physical(&pf.device);
        wan2.name = "eth2".to_string();

        if pf.ip != "dhcp" {
            report.config_network_wan2 = static_config(&wan2, pf, config);
        }

        report.port_table.push(Port {
            ifname: wan2.name.clone(),
            name: "wan2".to_string(),
        });
        report.interface_table.push(wan2);
    }

    if let Some(pf) = defined(&table.lan) {
        let mut lan = physical(&pf.device);
        lan.name = "eth1".to_string();
        report.port_table.push(Port {
            ifname: lan.name.clone(),
            name: "lan".to_string(),
        });
        report.interface_table.push(lan);
    }

    if let Some(pf) = defined(&table.uid) {
        let uid = physical(&pf.device);
        if let Ok(ip) = uid.ip.parse::<Ipv4Addr>() {
            let mac = identity_mac(ip);
            report.serial = mac.hex_string();
            report.mac = Some(mac);
        }
    }

    report
}

fn static_config(physical: &Interface, pf: &RouterInterface, config: &RouterConfig) -> NetworkConfig {
    let dns = |index: usize| config.dns_servers.get(index).cloned().unwrap_or_default();
    NetworkConfig::Static {
        ip: physical.ip.clone(),
        netmask: physical.netmask.clone(),
        gateway: pf.gateway.clone(),
        dns1: dns(0),
        dns2: dns(1),
        ifname: physical.name.clone(),
    }
}
