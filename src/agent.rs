//! The periodic inform loop.
//!
//! One tick: build the telemetry payload, frame it, POST it, decode the
//! reply, dispatch. Ticks are strictly sequential: a tick that fires while
//! the previous exchange is still in flight is dropped, never queued, and
//! any error inside a tick skips that tick without touching state.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::collect;
use crate::collect::router::router_report;
use crate::config::{Config, Store, TranslationTable};
use crate::error::{EnvelopeError, Result};
use crate::inform::report::DEFAULT_CONFIG_VERSION;
use crate::inform::{Cmd, HttpResponse, Message, Packet, SetParam};
use crate::pfsense::{self, RouterConfig};
use crate::speedtest::SpeedTestJob;
use crate::transport::{Reply, Transport};

/// Router-config mode state, fixed at startup.
struct RouterMode {
    config: RouterConfig,
    table: TranslationTable,
}

/// The inform agent: owns the store, the transport and the speed-test guard.
pub struct Agent {
    store: Arc<Store>,
    transport: Transport,
    // Plain client for the speed-test probe; the inform transport's
    // per-request-connection discipline is not wanted there.
    probe_client: reqwest::Client,
    speedtest: Arc<SpeedTestJob>,
    router: Option<RouterMode>,
}

impl Agent {
    /// Build the agent, entering router-config mode when the state file
    /// names a readable router configuration and a usable translation table.
    pub fn new(store: Arc<Store>) -> Result<Self> {
        let snapshot = store.snapshot();
        let router = detect_router_mode(&snapshot);

        Ok(Self {
            store,
            transport: Transport::new()?,
            probe_client: reqwest::Client::new(),
            speedtest: SpeedTestJob::new(),
            router: router.map(|(config, table)| RouterMode { config, table }),
        })
    }

    /// Whether the telemetry adapter is in router-config mode.
    pub fn is_router_mode(&self) -> bool {
        self.router.is_some()
    }

    /// Run the loop until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let snapshot = self.store.snapshot();
        info!(
            url = snapshot.general.url,
            interval = snapshot.general.interval,
            router_mode = self.is_router_mode(),
            "starting inform loop"
        );

        // First run on a fresh install: get a speed-test snapshot going.
        if snapshot
            .speedtest
            .as_ref()
            .map_or(true, |status| status.runtime == 0)
        {
            debug!("no speed-test snapshot, starting one");
            self.speedtest
                .spawn(Arc::clone(&self.store), self.probe_client.clone());
        }

        let mut ticker = interval(Duration::from_secs(snapshot.general.interval.max(1)));
        // Drop, never queue: overlapping inform exchanges are not allowed.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first interval tick fires immediately; skip straight to the
        // periodic cadence.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("stopping inform loop");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    debug!("inform tick");
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "inform exchange failed, skipping tick");
                    }
                }
            }
        }
    }

    /// One inform exchange.
    async fn tick(&self) -> Result<()> {
        let config = self.store.snapshot();
        let version = if config.management.version.is_empty() {
            DEFAULT_CONFIG_VERSION
        } else {
            &config.management.version
        };

        let report = match &self.router {
            Some(mode) => {
                router_report(
                    &config.general.url,
                    version,
                    &mode.config,
                    &mode.table,
                    config.speedtest.clone(),
                )
                .await?
            }
            None => collect::plain_report(&config.general.url, version).await?,
        };

        // No uplink yet means no device identity to report under.
        let mac = report.mac.ok_or(EnvelopeError::InvalidMac(0))?;
        trace!(
            payload = %serde_json::to_string(&report).unwrap_or_default(),
            "outbound inform"
        );

        let key = config.management.key();
        let mode = config.management.crypto_mode();
        debug!(
            mac = %mac,
            gcm = config.management.use_aes_gcm,
            default_key = key.is_default(),
            "sending inform"
        );

        let packet = Packet::new(mac, Message::Inform(Box::new(report)), Some(key), mode);
        let body = packet.encode()?;
        let reply = self.transport.send(&config.general.url, body).await?;

        let message = match reply {
            Reply::Status(code) => Message::HttpResponse(HttpResponse::new(code)),
            // The controller replies under our own key whatever MAC it echoes.
            Reply::Envelope(data) => Packet::decode(&data, |_| Ok(key))?.message,
        };

        self.dispatch(message);
        Ok(())
    }

    /// React to the controller's reply.
    fn dispatch(&self, message: Message) {
        match message {
            Message::SetParam(msg) => self.handle_setparam(&msg),
            Message::Noop(msg) => {
                // The interval field is advisory; the tick period stays as
                // configured.
                debug!(interval = msg.interval, "received noop");
            }
            Message::Cmd(msg) => self.handle_cmd(&msg),
            Message::HttpResponse(msg) => {
                warn!(code = msg.code, "controller rejected the inform");
            }
            Message::Inform(_) => {
                debug!("ignoring inbound inform payload");
            }
        }
    }

    fn handle_setparam(&self, msg: &SetParam) {
        let mgmt = &msg.management_config;
        let key = mgmt.get("authkey");
        let version = mgmt.get("cfgversion");
        let use_gcm = mgmt.get("use_aes_gcm");

        if key.is_none() && version.is_none() && use_gcm.is_none() {
            return;
        }

        let result = self.store.update(|config| {
            if let Some(key) = key {
                info!("controller set a new authentication key");
                config.management.key = key.to_string();
            }
            if let Some(version) = version {
                info!(version, "controller set a new configuration version");
                config.management.version = version.to_string();
            }
            if let Some(use_gcm) = use_gcm {
                info!(use_gcm, "controller switched the crypto mode");
                config.management.use_aes_gcm = use_gcm == "true";
            }
        });
        if let Err(e) = result {
            warn!(error = %e, "cannot persist management config");
        }
    }

    fn handle_cmd(&self, msg: &Cmd) {
        match msg.command.as_str() {
            "speed-test" => {
                info!(id = msg.command_id, "controller requested a speed-test");
                self.speedtest
                    .spawn(Arc::clone(&self.store), self.probe_client.clone());
            }
            other => {
                debug!(command = other, "dropping unsupported command");
            }
        }
    }
}

// Router mode requires a named, readable router configuration and a
// translation table with at least wan and lan mapped.
fn detect_router_mode(config: &Config) -> Option<(RouterConfig, TranslationTable)> {
    let path = &config.general.pfsense_xml;
    if path.is_empty() {
        debug!("no router configuration file, using plain-host telemetry");
        return None;
    }
    let Some(table) = config.router_interfaces.clone() else {
        warn!("router configuration named but no interface translation table");
        return None;
    };
    if !table.is_usable() {
        warn!("interface translation table needs at least wan and lan");
        return None;
    }
    match pfsense::load(path) {
        Ok(router_config) => {
            info!(path, "router configuration loaded, entering router mode");
            Some((router_config, table))
        }
        Err(e) => {
            error!(path, error = %e, "cannot load router configuration");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Format;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("informant-agent-{}-{name}", std::process::id()))
    }

    fn open_store(name: &str) -> Arc<Store> {
        let path = temp_path(name);
        let _ = std::fs::remove_file(&path);
        Store::open(path, Format::Json).unwrap()
    }

    #[tokio::test]
    async fn test_setparam_persists_management() {
        let store = open_store("setparam.json");
        let agent = Agent::new(Arc::clone(&store)).unwrap();

        let msg = match Message::decode(
            br#"{"_type":"setparam","mgmt_cfg":"authkey=0123456789abcdef0123456789abcdef\nuse_aes_gcm=true\ncfgversion=feed0123\n","server_time_in_utc":"1700000000"}"#,
        )
        .unwrap()
        {
            Message::SetParam(msg) => msg,
            other => panic!("expected setparam, got {}", other.kind()),
        };
        agent.handle_setparam(&msg);

        let snapshot = store.snapshot();
        assert_eq!(
            snapshot.management.key,
            "0123456789abcdef0123456789abcdef"
        );
        assert!(snapshot.management.use_aes_gcm);
        assert_eq!(snapshot.management.version, "feed0123");
        // The resolved key is the pushed one, and subsequent packets go GCM.
        assert!(!snapshot.management.key().is_default());
        assert_eq!(
            snapshot.management.crypto_mode(),
            crate::inform::CryptoMode::Gcm
        );
        // And it hit the file.
        let content = std::fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("0123456789abcdef0123456789abcdef"));
        let _ = std::fs::remove_file(store.path());
    }

    #[tokio::test]
    async fn test_setparam_invalid_key_keeps_default() {
        let store = open_store("badkey.json");
        let agent = Agent::new(Arc::clone(&store)).unwrap();

        let msg = match Message::decode(
            br#"{"_type":"setparam","mgmt_cfg":"authkey=nothex\n"}"#,
        )
        .unwrap()
        {
            Message::SetParam(msg) => msg,
            other => panic!("expected setparam, got {}", other.kind()),
        };
        agent.handle_setparam(&msg);

        // The raw value is stored, but resolution falls back to the default.
        let snapshot = store.snapshot();
        assert_eq!(snapshot.management.key, "nothex");
        assert!(snapshot.management.key().is_default());
        let _ = std::fs::remove_file(store.path());
    }

    #[tokio::test]
    async fn test_empty_setparam_writes_nothing() {
        let store = open_store("emptyparam.json");
        let agent = Agent::new(Arc::clone(&store)).unwrap();
        let before = std::fs::read_to_string(store.path()).unwrap();

        agent.handle_setparam(&SetParam::default());

        let after = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(before, after);
        let _ = std::fs::remove_file(store.path());
    }

    #[tokio::test]
    async fn test_plain_mode_without_router_config() {
        let store = open_store("plain.json");
        let agent = Agent::new(store).unwrap();
        assert!(!agent.is_router_mode());
    }

    #[tokio::test]
    async fn test_router_mode_detection() {
        let xml_path = temp_path("router.xml");
        std::fs::write(
            &xml_path,
            r"<pfsense><interfaces><wan><if>igb0</if></wan><lan><if>igb1</if></lan></interfaces></pfsense>",
        )
        .unwrap();

        let store = open_store("router.json");
        store
            .update(|config| {
                config.general.pfsense_xml = xml_path.to_string_lossy().into_owned();
                config.router_interfaces = Some(TranslationTable {
                    wan: "wan".into(),
                    lan: "lan".into(),
                    ..TranslationTable::default()
                });
            })
            .unwrap();

        let agent = Agent::new(Arc::clone(&store)).unwrap();
        assert!(agent.is_router_mode());

        // Without a usable table the agent stays in plain mode.
        store
            .update(|config| config.router_interfaces = None)
            .unwrap();
        let agent = Agent::new(store.clone()).unwrap();
        assert!(!agent.is_router_mode());

        let _ = std::fs::remove_file(store.path());
        let _ = std::fs::remove_file(&xml_path);
    }
}
