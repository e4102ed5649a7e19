//! Router-configuration file provider.
//!
//! Reads the subset of a pfSense `config.xml` the telemetry remap consumes:
//! the system block (hostname, DNS servers) and the interface definitions.
//! Interface elements are keyed by their tag name (`wan`, `lan`, `opt1`, …),
//! which is what the translation table in the agent state refers to.

use std::fs;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{Error, Result};

/// One `<interfaces>` child element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterInterface {
    /// Element tag name; the translation table matches against this.
    pub name: String,
    /// Physical device (`<if>`), e.g. `igb0`.
    pub device: String,
    /// `<ipaddr>`: `dhcp` or a literal address.
    pub ip: String,
    /// `<subnet>` prefix length.
    pub subnet: u8,
    /// `<gateway>` name or address.
    pub gateway: String,
    /// `<descr>` free text.
    pub description: String,
    /// Presence of `<enable>`.
    pub enabled: bool,
}

/// The parsed router configuration.
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    pub hostname: String,
    pub dns_servers: Vec<String>,
    pub interfaces: Vec<RouterInterface>,
}

impl RouterConfig {
    /// Find an interface definition by its tag name.
    pub fn interface(&self, name: &str) -> Option<&RouterInterface> {
        if name.is_empty() {
            return None;
        }
        self.interfaces.iter().find(|iface| iface.name == name)
    }
}

/// Load and parse a router configuration file.
pub fn load(path: impl AsRef<Path>) -> Result<RouterConfig> {
    parse(&fs::read_to_string(path)?)
}

/// Parse router-configuration XML.
pub fn parse(xml: &str) -> Result<RouterConfig> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut config = RouterConfig::default();
    let mut path: Vec<String> = Vec::new();
    let mut current: Option<RouterInterface> = None;

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| Error::Config(format!("cannot parse router configuration: {e}")))?
        {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if path_is(&path, &["pfsense", "interfaces"]) {
                    current = Some(RouterInterface {
                        name: name.clone(),
                        ..RouterInterface::default()
                    });
                }
                if name == "enable" && in_interface(&path) {
                    if let Some(iface) = current.as_mut() {
                        iface.enabled = true;
                    }
                }
                path.push(name);
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "enable" && in_interface(&path) {
                    if let Some(iface) = current.as_mut() {
                        iface.enabled = true;
                    }
                }
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::Config(format!("cannot parse router configuration: {e}")))?
                    .trim()
                    .to_string();
                if text.is_empty() {
                    continue;
                }
                if path_is(&path, &["pfsense", "system", "hostname"]) {
                    config.hostname = text;
                } else if path_is(&path, &["pfsense", "system", "dnsserver"]) {
                    // Either repeated elements or one comma-separated value.
                    config
                        .dns_servers
                        .extend(text.split(',').map(|s| s.trim().to_string()));
                } else if path.len() == 4 && in_interface(&path[..3]) {
                    if let Some(iface) = current.as_mut() {
                        match path[3].as_str() {
                            "if" => iface.device = text,
                            "ipaddr" => iface.ip = text,
                            "subnet" => iface.subnet = text.parse().unwrap_or(0),
                            "gateway" => iface.gateway = text,
                            "descr" => iface.description = text,
                            _ => {}
                        }
                    }
                }
            }
            Event::End(_) => {
                path.pop();
                if path_is(&path, &["pfsense", "interfaces"]) {
                    if let Some(iface) = current.take() {
                        config.interfaces.push(iface);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(config)
}

fn path_is(path: &[String], expected: &[&str]) -> bool {
    path.len() == expected.len() && path.iter().zip(expected).all(|(a, b)| a == b)
}

// Inside <pfsense><interfaces><X>, for any interface tag X.
fn in_interface(path: &[String]) -> bool {
    path.len() == 3 && path[0] == "pfsense" && path[1] == "interfaces"
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<pfsense>
  <version>21.1</version>
  <system>
    <hostname>edge-gw</hostname>
    <domain>example.net</domain>
    <dnsserver>192.0.2.53,192.0.2.54</dnsserver>
  </system>
  <interfaces>
    <wan>
      <enable/>
      <if>igb0</if>
      <ipaddr>203.0.113.10</ipaddr>
      <subnet>24</subnet>
      <gateway>WAN_GW</gateway>
      <descr>Uplink</descr>
    </wan>
    <lan>
      <enable></enable>
      <if>igb1</if>
      <ipaddr>192.168.1.1</ipaddr>
      <subnet>24</subnet>
    </lan>
    <opt1>
      <if>igb2</if>
      <ipaddr>dhcp</ipaddr>
    </opt1>
  </interfaces>
</pfsense>
"#;

    #[test]
    fn test_parse_system() {
        let config = parse(SAMPLE).unwrap();
        assert_eq!(config.hostname, "edge-gw");
        assert_eq!(config.dns_servers, vec!["192.0.2.53", "192.0.2.54"]);
    }

    #[test]
    fn test_parse_interfaces() {
        let config = parse(SAMPLE).unwrap();
        assert_eq!(config.interfaces.len(), 3);

        let wan = config.interface("wan").unwrap();
        assert_eq!(wan.device, "igb0");
        assert_eq!(wan.ip, "203.0.113.10");
        assert_eq!(wan.subnet, 24);
        assert_eq!(wan.gateway, "WAN_GW");
        assert_eq!(wan.description, "Uplink");
        assert!(wan.enabled);

        let lan = config.interface("lan").unwrap();
        assert_eq!(lan.device, "igb1");
        assert!(lan.enabled);

        let opt1 = config.interface("opt1").unwrap();
        assert_eq!(opt1.ip, "dhcp");
        assert!(!opt1.enabled);
    }

    #[test]
    fn test_interface_lookup_empty_name() {
        let config = parse(SAMPLE).unwrap();
        assert!(config.interface("").is_none());
        assert!(config.interface("opt9").is_none());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        // Mismatched end tags surface as a parse error.
        assert!(parse("<pfsense></system>").is_err());
    }
}
