//! The `Inform` telemetry payload and its constituent types.
//!
//! Field names and omission rules are dictated by the controller; the
//! payload is a flat JSON object with stable keys.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{EnvelopeError, Error, Result};

use super::key::HardwareAddr;

/// The `cfgversion` sentinel a never-provisioned device reports.
pub const DEFAULT_CONFIG_VERSION: &str = "0123456789abcdef";

/// Whether a configuration version still counts as unprovisioned.
pub fn is_default_version(version: &str) -> bool {
    version.is_empty() || version == DEFAULT_CONFIG_VERSION
}

/// Result of the last speed-test run, reported back to the controller and
/// persisted across restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestStatus {
    #[serde(default)]
    pub latency: u64,
    #[serde(default)]
    pub rundate: u64,
    #[serde(default)]
    pub runtime: u64,
    #[serde(default)]
    pub status_download: u64,
    #[serde(default)]
    pub status_ping: u64,
    #[serde(default)]
    pub status_upload: u64,
    #[serde(default)]
    pub xput_download: f64,
    #[serde(default)]
    pub xput_upload: f64,
}

/// One row of the device's ethernet port table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EthernetTableEntry {
    pub name: String,
    pub mac: String,
    pub num_port: u64,
}

/// WAN uplink configuration as the controller models it: a three-way choice
/// with addressing only present for static assignments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkConfig {
    Disabled {
        ifname: String,
    },
    Dhcp {
        ifname: String,
    },
    Static {
        ip: String,
        netmask: String,
        gateway: String,
        dns1: String,
        dns2: String,
        ifname: String,
    },
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::Disabled {
            ifname: String::new(),
        }
    }
}

impl NetworkConfig {
    /// A DHCP config bound to an interface.
    pub fn dhcp(ifname: impl Into<String>) -> Self {
        Self::Dhcp {
            ifname: ifname.into(),
        }
    }

    /// Check that a static config carries the full address tuple.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Self::Static {
            ip,
            netmask,
            gateway,
            ..
        } = self
        {
            if ip.is_empty() {
                return Err("static network config without IP".into());
            }
            if netmask.is_empty() {
                return Err("static network config without netmask".into());
            }
            if gateway.is_empty() {
                return Err("static network config without gateway".into());
            }
        }
        Ok(())
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Disabled { .. } => "disabled",
            Self::Dhcp { .. } => "dhcp",
            Self::Static { .. } => "static",
        }
    }
}

impl Serialize for NetworkConfig {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.validate().map_err(serde::ser::Error::custom)?;

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", self.type_name())?;
        match self {
            Self::Disabled { ifname } | Self::Dhcp { ifname } => {
                if !ifname.is_empty() {
                    map.serialize_entry("ifname", ifname)?;
                }
            }
            Self::Static {
                ip,
                netmask,
                gateway,
                dns1,
                dns2,
                ifname,
            } => {
                map.serialize_entry("ip", ip)?;
                map.serialize_entry("netmask", netmask)?;
                map.serialize_entry("gateway", gateway)?;
                if !dns1.is_empty() {
                    map.serialize_entry("dns1", dns1)?;
                }
                if !dns2.is_empty() {
                    map.serialize_entry("dns2", dns2)?;
                }
                if !ifname.is_empty() {
                    map.serialize_entry("ifname", ifname)?;
                }
            }
        }
        map.end()
    }
}

fn mac_or_empty<S>(mac: &Option<HardwareAddr>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match mac {
        Some(mac) => mac.serialize(serializer),
        None => serializer.serialize_str(""),
    }
}

/// One network interface as reported in `if_table`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Interface {
    pub full_duplex: bool,
    pub ip: String,
    #[serde(serialize_with = "mac_or_empty")]
    pub mac: Option<HardwareAddr>,
    pub name: String,
    pub netmask: String,
    pub num_port: i32,
    pub rx_bytes: u64,
    pub rx_dropped: u64,
    pub rx_errors: u64,
    pub rx_multicast: i64,
    pub rx_packets: u64,
    pub speed: u64,
    pub tx_bytes: u64,
    pub tx_dropped: u64,
    pub tx_errors: u64,
    pub tx_packets: u64,
    pub up: bool,
    pub enabled: bool,
    pub drops: u64,
    pub latency: u64,
    pub uptime: u64,
    // The controller expects this misspelled key.
    #[serde(rename = "namservers")]
    pub nameservers: Vec<String>,
    pub gateways: Vec<String>,
}

/// One row of `config_port_table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Port {
    pub ifname: String,
    pub name: String,
}

/// Host load, CPU and memory statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SysStats {
    pub loadavg_1: f64,
    pub loadavg_5: f64,
    pub loadavg_15: f64,
    pub mem_buffer: u64,
    pub mem_total: u64,
    pub mem_used: u64,
    pub mem: u64,
    pub cpu: u64,
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

/// The device→controller telemetry payload.
///
/// Carries no `_type` discriminator: the controller identifies it by the
/// endpoint and envelope alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Inform {
    #[serde(rename = "board_rev", skip_serializing_if = "is_zero")]
    pub board_revision: i32,
    pub bootrom_version: String,
    #[serde(rename = "cfgversion")]
    pub config_version: String,
    pub config_network_wan: NetworkConfig,
    pub config_network_wan2: NetworkConfig,
    pub default: bool,
    pub discovery_response: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ethernet_table: Vec<EthernetTableEntry>,
    #[serde(rename = "fw_caps")]
    pub firmware_capabilities: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub guest_token: String,
    pub has_default_route_distance: bool,
    #[serde(rename = "has_dnsmasq_hostfile_update")]
    pub has_hostfile_update: bool,
    pub has_dpi: bool,
    pub has_eth1: bool,
    #[serde(rename = "has_porta")]
    pub has_port_a: bool,
    pub has_ssh_disable: bool,
    pub has_vti: bool,
    pub hostname: String,
    #[serde(rename = "if_table")]
    pub interface_table: Vec<Interface>,
    pub inform_url: String,
    pub inform_ip: String,
    pub ip: String,
    pub isolated: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last_error: String,
    pub locating: bool,
    pub mac: Option<HardwareAddr>,
    pub model: String,
    pub model_display: String,
    pub netmask: String,
    #[serde(rename = "qrid", skip_serializing_if = "String::is_empty")]
    pub qr_id: String,
    #[serde(rename = "config_port_table")]
    pub port_table: Vec<Port>,
    #[serde(rename = "radius_caps")]
    pub radius_capabilities: i32,
    pub required_version: String,
    pub selfrun_beacon: bool,
    pub serial: String,
    #[serde(skip_serializing_if = "is_false")]
    pub spectrum_scanning: bool,
    pub state: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stream_token: String,
    #[serde(rename = "system-stats")]
    pub sys_stats: SysStats,
    pub time: i64,
    pub uplink: String,
    pub uptime: u64,
    pub version: String,
    #[serde(rename = "inform_as_notify", skip_serializing_if = "is_false")]
    pub inform_as_notify: bool,
    #[serde(rename = "notif_reason", skip_serializing_if = "String::is_empty")]
    pub notify_reason: String,
    #[serde(rename = "notif_payload", skip_serializing_if = "String::is_empty")]
    pub notify_payload: String,
    #[serde(rename = "speedtest-status", skip_serializing_if = "Option::is_none")]
    pub speedtest_status: Option<SpeedTestStatus>,
}

impl Inform {
    /// A payload skeleton with the constants every report carries.
    pub fn skeleton(inform_url: &str, config_version: &str) -> Self {
        Self {
            config_network_wan: NetworkConfig::dhcp(""),
            config_network_wan2: NetworkConfig::default(),
            bootrom_version: "unifi-v1.5.2.206-g44e4c8bc".to_string(),
            config_version: config_version.to_string(),
            default: is_default_version(config_version),
            firmware_capabilities: i32::MAX,
            has_ssh_disable: true,
            inform_url: inform_url.to_string(),
            required_version: "0.0.1".to_string(),
            selfrun_beacon: true,
            state: 2,
            port_table: Vec::new(),
            ..Self::default()
        }
    }

    /// Serialize to the JSON bytes the envelope carries.
    ///
    /// Incomplete static network configs are refused up front so the caller
    /// sees a configuration error rather than an opaque serializer failure.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.config_network_wan
            .validate()
            .map_err(Error::InvalidConfig)?;
        self.config_network_wan2
            .validate()
            .map_err(Error::InvalidConfig)?;
        serde_json::to_vec(self)
            .map_err(EnvelopeError::from)
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_config_dhcp_omits_addresses() {
        let cfg = NetworkConfig::dhcp("eth0");
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "dhcp", "ifname": "eth0"})
        );
    }

    #[test]
    fn test_network_config_disabled_bare() {
        let json = serde_json::to_value(NetworkConfig::default()).unwrap();
        assert_eq!(json, serde_json::json!({"type": "disabled"}));
    }

    #[test]
    fn test_network_config_static_requires_tuple() {
        let cfg = NetworkConfig::Static {
            ip: "1.2.3.4".into(),
            netmask: String::new(),
            gateway: String::new(),
            dns1: String::new(),
            dns2: String::new(),
            ifname: String::new(),
        };
        assert!(serde_json::to_value(&cfg).is_err());
        assert!(cfg.validate().is_err());

        let mut report = Inform::skeleton("http://unifi:8080/inform", "");
        report.config_network_wan = cfg;
        assert!(matches!(
            report.to_bytes(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_network_config_static_full() {
        let cfg = NetworkConfig::Static {
            ip: "192.0.2.10".into(),
            netmask: "255.255.255.0".into(),
            gateway: "192.0.2.1".into(),
            dns1: "192.0.2.53".into(),
            dns2: String::new(),
            ifname: "eth0".into(),
        };
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "static",
                "ip": "192.0.2.10",
                "netmask": "255.255.255.0",
                "gateway": "192.0.2.1",
                "dns1": "192.0.2.53",
                "ifname": "eth0",
            })
        );
    }

    #[test]
    fn test_default_flag_rule() {
        assert!(is_default_version(""));
        assert!(is_default_version(DEFAULT_CONFIG_VERSION));
        assert!(!is_default_version("a1b2c3d4e5f60718"));

        assert!(Inform::skeleton("http://unifi:8080/inform", "").default);
        assert!(Inform::skeleton("http://unifi:8080/inform", DEFAULT_CONFIG_VERSION).default);
        assert!(!Inform::skeleton("http://unifi:8080/inform", "deadbeef00112233").default);
    }

    #[test]
    fn test_skeleton_constants() {
        let report = Inform::skeleton("http://unifi:8080/inform", "");
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["fw_caps"], 0x7fff_ffff);
        assert_eq!(json["has_ssh_disable"], true);
        assert_eq!(json["required_version"], "0.0.1");
        assert_eq!(json["selfrun_beacon"], true);
        assert_eq!(json["state"], 2);
        assert_eq!(json["mac"], serde_json::Value::Null);
        // Empty optionals stay off the wire.
        assert!(json.get("guest_token").is_none());
        assert!(json.get("speedtest-status").is_none());
        assert!(json.get("board_rev").is_none());
    }

    #[test]
    fn test_interface_nameservers_key() {
        let iface = Interface {
            name: "eth0".into(),
            nameservers: vec!["192.0.2.53".into()],
            ..Interface::default()
        };
        let json = serde_json::to_value(&iface).unwrap();
        assert_eq!(json["namservers"], serde_json::json!(["192.0.2.53"]));
        assert_eq!(json["mac"], "");
    }
}
