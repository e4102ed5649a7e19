//! Host telemetry collection.
//!
//! Plain-host mode lives here: interface enumeration and counters from
//! `/sys/class/net`, addressing via `getifaddrs`, system statistics from
//! `/proc`. The router-config remap is in [`router`].
//!
//! Collection is split from assembly: the `assemble_plain` step is a pure
//! function over collected records, so report shaping is testable without a
//! live network.

pub mod router;

use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::error::{Error, Result};
use crate::inform::{EthernetTableEntry, HardwareAddr, Inform, Interface, NetworkConfig, Port, SysStats};

/// Static facts about the host.
#[derive(Debug, Clone, Default)]
pub struct HostInfo {
    pub hostname: String,
    pub uptime: u64,
    pub platform_version: String,
}

/// Gather hostname, uptime and platform version.
pub fn host_info() -> HostInfo {
    HostInfo {
        hostname: hostname().unwrap_or_default(),
        uptime: uptime(),
        platform_version: platform_version(),
    }
}

/// Get the hostname.
pub fn hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    unsafe {
        if libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) == 0 {
            let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            String::from_utf8(buf[..len].to_vec()).ok()
        } else {
            None
        }
    }
}

fn uptime() -> u64 {
    fs::read_to_string("/proc/uptime")
        .ok()
        .and_then(|s| {
            s.split_whitespace()
                .next()
                .and_then(|v| v.parse::<f64>().ok())
        })
        .map_or(0, |secs| secs as u64)
}

fn platform_version() -> String {
    let Ok(content) = fs::read_to_string("/etc/os-release") else {
        return String::new();
    };
    for line in content.lines() {
        if let Some(value) = line.strip_prefix("VERSION_ID=") {
            return value.trim().trim_matches('"').to_string();
        }
    }
    String::new()
}

/// Current epoch time in seconds.
pub fn epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

// ============================================================================
// Interface enumeration (Linux: /sys/class/net + getifaddrs)
// ============================================================================

/// Enumerate network interfaces with counters, addressing and media state.
/// Loopback interfaces are skipped.
#[cfg(target_os = "linux")]
pub fn network_interfaces() -> Result<Vec<Interface>> {
    let addresses = ipv4_addresses();
    let mut interfaces = Vec::new();

    let entries = fs::read_dir("/sys/class/net")
        .map_err(|e| Error::Telemetry(format!("cannot enumerate interfaces: {e}")))?;

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let base = entry.path();

        let flags = read_sys_hex(&base.join("flags")).unwrap_or(0);
        if flags & libc::IFF_LOOPBACK as u32 != 0 {
            continue;
        }
        let up = flags & libc::IFF_UP as u32 != 0;

        let mut iface = Interface {
            name: name.clone(),
            num_port: read_sys(&base.join("ifindex")).unwrap_or(0),
            mac: fs::read_to_string(base.join("address"))
                .ok()
                .and_then(|s| HardwareAddr::parse(&s)),
            rx_bytes: read_stat(&base, "rx_bytes"),
            tx_bytes: read_stat(&base, "tx_bytes"),
            rx_packets: read_stat(&base, "rx_packets"),
            tx_packets: read_stat(&base, "tx_packets"),
            rx_errors: read_stat(&base, "rx_errors"),
            tx_errors: read_stat(&base, "tx_errors"),
            rx_dropped: read_stat(&base, "rx_dropped"),
            tx_dropped: read_stat(&base, "tx_dropped"),
            // Without a positive latency the controller shows the device as
            // disconnected from the Internet.
            latency: 1,
            ..Interface::default()
        };
        iface.drops = iface.rx_dropped + iface.tx_dropped;

        if let Some((ip, netmask)) = addresses.get(&name) {
            iface.ip = ip.to_string();
            iface.netmask = netmask.to_string();
        }

        if up {
            iface.up = true;
            iface.enabled = true;
            let media = interface_media(&base);
            iface.speed = media.0;
            iface.full_duplex = media.1;
        }

        interfaces.push(iface);
    }

    Ok(interfaces)
}

#[cfg(not(target_os = "linux"))]
pub fn network_interfaces() -> Result<Vec<Interface>> {
    Ok(Vec::new())
}

#[cfg(target_os = "linux")]
fn read_stat(base: &Path, counter: &str) -> u64 {
    read_sys(&base.join("statistics").join(counter)).unwrap_or(0)
}

fn read_sys<T: std::str::FromStr>(path: &Path) -> Option<T> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(target_os = "linux")]
fn read_sys_hex(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    u32::from_str_radix(content.trim().trim_start_matches("0x"), 16).ok()
}

// Link speed (Mb/s) and duplex; 1000/full when sysfs has no answer, which is
// what down or virtual links report.
#[cfg(target_os = "linux")]
fn interface_media(base: &Path) -> (u64, bool) {
    let speed = read_sys::<i64>(&base.join("speed"))
        .filter(|s| *s > 0)
        .map_or(1000, |s| s as u64);
    let full_duplex = fs::read_to_string(base.join("duplex"))
        .map_or(true, |d| d.trim() == "full");
    (speed, full_duplex)
}

/// First IPv4 address and netmask per interface, via `getifaddrs`.
#[cfg(unix)]
pub fn ipv4_addresses() -> HashMap<String, (Ipv4Addr, Ipv4Addr)> {
    use std::ffi::CStr;

    let mut map = HashMap::new();

    unsafe {
        let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();
        if libc::getifaddrs(std::ptr::addr_of_mut!(ifaddrs)) != 0 {
            return map;
        }

        let mut current = ifaddrs;
        while !current.is_null() {
            let ifa = &*current;

            if !ifa.ifa_name.is_null()
                && !ifa.ifa_addr.is_null()
                && i32::from((*ifa.ifa_addr).sa_family) == libc::AF_INET
            {
                let name = CStr::from_ptr(ifa.ifa_name).to_string_lossy().into_owned();

                #[allow(clippy::cast_ptr_alignment)]
                let ip = {
                    let sockaddr = ifa.ifa_addr.cast::<libc::sockaddr_in>();
                    Ipv4Addr::from(u32::from_be((*sockaddr).sin_addr.s_addr))
                };
                #[allow(clippy::cast_ptr_alignment)]
                let netmask = if ifa.ifa_netmask.is_null() {
                    Ipv4Addr::UNSPECIFIED
                } else {
                    let mask = ifa.ifa_netmask.cast::<libc::sockaddr_in>();
                    Ipv4Addr::from(u32::from_be((*mask).sin_addr.s_addr))
                };

                map.entry(name).or_insert((ip, netmask));
            }

            current = ifa.ifa_next;
        }

        libc::freeifaddrs(ifaddrs);
    }

    map
}

#[cfg(not(unix))]
pub fn ipv4_addresses() -> HashMap<String, (Ipv4Addr, Ipv4Addr)> {
    HashMap::new()
}

// ============================================================================
// System statistics (/proc)
// ============================================================================

/// Load, memory and CPU statistics from `/proc`.
pub fn sys_stats() -> SysStats {
    let mut stats = SysStats::default();

    if let Ok(loadavg) = fs::read_to_string("/proc/loadavg") {
        let mut fields = loadavg.split_whitespace();
        stats.loadavg_1 = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0.0);
        stats.loadavg_5 = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0.0);
        stats.loadavg_15 = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0.0);
    }

    if let Ok(meminfo) = fs::read_to_string("/proc/meminfo") {
        let field = |key: &str| -> u64 {
            meminfo
                .lines()
                .find(|l| l.starts_with(key))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
                * 1024
        };
        stats.mem_total = field("MemTotal:");
        stats.mem_buffer = field("Buffers:");
        let available = field("MemAvailable:");
        stats.mem_used = stats.mem_total.saturating_sub(available);
        if stats.mem_total > 0 {
            stats.mem = stats.mem_used * 100 / stats.mem_total;
        }
    }

    stats.cpu = cpu_percent().unwrap_or(0);
    stats
}

// Aggregate CPU busy share since boot, from the first /proc/stat line.
fn cpu_percent() -> Option<u64> {
    let content = fs::read_to_string("/proc/stat").ok()?;
    let line = content.lines().next()?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();
    if fields.len() < 5 {
        return None;
    }
    let total: u64 = fields.iter().sum();
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    if total == 0 {
        return None;
    }
    Some((total - idle) * 100 / total)
}

/// Default IPv4 gateway from the kernel routing table.
#[cfg(target_os = "linux")]
pub fn default_gateway() -> Option<Ipv4Addr> {
    let content = fs::read_to_string("/proc/net/route").ok()?;
    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let destination = u32::from_str_radix(fields[1], 16).ok()?;
        let flags = u32::from_str_radix(fields[3], 16).ok()?;
        if destination == 0 && flags & libc::RTF_GATEWAY as u32 != 0 {
            let raw = u32::from_str_radix(fields[2], 16).ok()?;
            return Some(Ipv4Addr::from(raw.to_le_bytes()));
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
pub fn default_gateway() -> Option<Ipv4Addr> {
    None
}

/// Resolve the controller host from the inform URL to an address string.
/// Falls back to the bare host name when resolution fails.
pub async fn controller_ip(url: &str) -> String {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return String::new();
    };
    let Some(host) = parsed.host_str().map(str::to_string) else {
        return String::new();
    };
    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.to_string();
    }

    let port = parsed.port_or_known_default().unwrap_or(80);
    let result = match tokio::net::lookup_host((host.clone(), port)).await {
        Ok(addrs) => {
            let addrs: Vec<_> = addrs.collect();
            addrs
                .iter()
                .find(|a| a.is_ipv4())
                .or_else(|| addrs.first())
                .map_or_else(|| host.clone(), |a| a.ip().to_string())
        }
        Err(e) => {
            debug!(host, error = %e, "cannot resolve controller host");
            host
        }
    };
    result
}

// ============================================================================
// Report assembly
// ============================================================================

/// Build the plain-host inform payload.
pub async fn plain_report(url: &str, version: &str) -> Result<Inform> {
    let mut report = Inform::skeleton(url, version);
    report.time = epoch_seconds();
    report.inform_ip = controller_ip(url).await;

    let host = host_info();
    report.uptime = host.uptime;
    report.hostname = host.hostname;
    report.model = "UGWXG".to_string();
    report.model_display = "UniFi Security Gateway XG-8".to_string();
    report.version = "4.4.51.5287926 ".to_string();
    if !host.platform_version.is_empty() {
        report.bootrom_version = host.platform_version;
    }

    report.sys_stats = sys_stats();

    let interfaces = network_interfaces()?;
    Ok(assemble_plain(report, interfaces))
}

/// Shape the interface list into the payload: uplink election, the
/// wan/lan/lan2… port table, and the device identity.
///
/// The first up interface with an IPv4 address becomes the uplink and lends
/// the device its MAC and serial; later up-and-addressed interfaces become
/// `lan`, `lan2`, and so on.
pub fn assemble_plain(mut report: Inform, interfaces: Vec<Interface>) -> Inform {
    report.ethernet_table = interfaces
        .iter()
        .map(|iface| EthernetTableEntry {
            name: iface.name.clone(),
            mac: iface.mac.map(|mac| mac.to_string()).unwrap_or_default(),
            num_port: iface.num_port as u64,
        })
        .collect();

    for iface in &interfaces {
        if !iface.up || iface.ip.is_empty() {
            continue;
        }
        if report.uplink.is_empty() {
            report.uplink = iface.name.clone();
            report.mac = iface.mac;
            report.ip = iface.ip.clone();
            report.netmask = iface.netmask.clone();
            report.serial = iface.mac.map(|mac| mac.hex_string()).unwrap_or_default();
            report.port_table.push(Port {
                ifname: iface.name.clone(),
                name: "wan".to_string(),
            });
            if let NetworkConfig::Dhcp { ifname } = &mut report.config_network_wan {
                *ifname = iface.name.clone();
            }
        } else {
            let lan_index = report.port_table.len();
            let name = if lan_index == 1 {
                "lan".to_string()
            } else {
                format!("lan{lan_index}")
            };
            report.port_table.push(Port {
                ifname: iface.name.clone(),
                name,
            });
        }
    }

    report.has_eth1 = interfaces.len() > 1;
    report.interface_table = interfaces;
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_interface(name: &str, mac: [u8; 6], ip: &str, up: bool) -> Interface {
        Interface {
            name: name.to_string(),
            mac: Some(HardwareAddr::new(mac)),
            ip: ip.to_string(),
            netmask: if ip.is_empty() {
                String::new()
            } else {
                "255.255.255.0".to_string()
            },
            up,
            enabled: up,
            latency: 1,
            speed: 1000,
            full_duplex: true,
            ..Interface::default()
        }
    }

    fn skeleton() -> Inform {
        Inform::skeleton("http://unifi:8080/inform", "")
    }

    #[test]
    fn test_single_uplink_identity() {
        let eth0 = fake_interface("eth0", [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff], "192.168.1.2", true);
        let report = assemble_plain(skeleton(), vec![eth0]);

        assert_eq!(report.uplink, "eth0");
        assert_eq!(report.mac.unwrap().to_string(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(report.serial, "aabbccddeeff");
        assert_eq!(report.ip, "192.168.1.2");
        assert_eq!(report.netmask, "255.255.255.0");
        assert_eq!(
            report.port_table,
            vec![Port {
                ifname: "eth0".to_string(),
                name: "wan".to_string()
            }]
        );
        assert!(!report.has_eth1);
        match &report.config_network_wan {
            NetworkConfig::Dhcp { ifname } => assert_eq!(ifname, "eth0"),
            other => panic!("expected dhcp wan config, got {other:?}"),
        }
    }

    #[test]
    fn test_lan_numbering() {
        let interfaces = vec![
            fake_interface("eth0", [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff], "192.168.1.2", true),
            fake_interface("eth1", [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01], "10.0.0.2", true),
            fake_interface("eth2", [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02], "10.0.1.2", true),
        ];
        let report = assemble_plain(skeleton(), interfaces);

        assert!(report.has_eth1);
        let names: Vec<(&str, &str)> = report
            .port_table
            .iter()
            .map(|p| (p.ifname.as_str(), p.name.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![("eth0", "wan"), ("eth1", "lan"), ("eth2", "lan2")]
        );
    }

    #[test]
    fn test_down_and_unaddressed_skipped() {
        let interfaces = vec![
            fake_interface("eth9", [1, 2, 3, 4, 5, 6], "", true),
            fake_interface("eth3", [6, 5, 4, 3, 2, 1], "172.16.0.2", false),
            fake_interface("eth0", [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff], "192.168.1.2", true),
        ];
        let report = assemble_plain(skeleton(), interfaces);

        // Only eth0 is both up and addressed.
        assert_eq!(report.uplink, "eth0");
        assert_eq!(report.port_table.len(), 1);
        // Everything still shows in the tables.
        assert_eq!(report.interface_table.len(), 3);
        assert_eq!(report.ethernet_table.len(), 3);
        assert!(report.has_eth1);
    }

    #[test]
    fn test_no_uplink_leaves_identity_empty() {
        let report = assemble_plain(skeleton(), vec![]);
        assert!(report.uplink.is_empty());
        assert!(report.mac.is_none());
        assert!(report.serial.is_empty());
        assert!(!report.has_eth1);
    }
}
