//! Persisted agent state.
//!
//! One file holds everything the agent negotiates at runtime: the inform
//! URL and interval, the management block the controller pushes
//! (`authkey`, `cfgversion`, `use_aes_gcm`), the router-config interface
//! translation, and the last speed-test snapshot. Two formats are accepted,
//! selected by a launcher flag: sectioned TOML or hierarchical JSON, with
//! identical field sets.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::inform::{CryptoMode, Key, SpeedTestStatus};

/// Inform URL used when the configuration does not name one.
pub const DEFAULT_INFORM_URL: &str = "http://unifi:8080/inform";

/// Inform interval (seconds) used when the configuration does not name one.
pub const DEFAULT_INFORM_INTERVAL: u64 = 15;

/// On-disk format of the state file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Json,
}

/// `[general]` section: launcher-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct General {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub adopted: bool,
    #[serde(default)]
    pub log_level: String,
    #[serde(default)]
    pub log_file: String,
    #[serde(default)]
    pub pfsense_xml: String,
    #[serde(default)]
    pub interval: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub speedtest_url: String,
}

/// `[mgmt_cfg]` section: the block the controller mutates via `SetParam`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Management {
    #[serde(rename = "configversion", default)]
    pub version: String,
    #[serde(default)]
    pub use_aes_gcm: bool,
    #[serde(rename = "authkey", default)]
    pub key: String,
}

impl Management {
    /// Resolve the active key. Anything that is not 32 hex chars falls back
    /// to the well-known default key.
    pub fn key(&self) -> Key {
        if self.key.is_empty() {
            return Key::DEFAULT;
        }
        Key::from_hex(&self.key).unwrap_or(Key::DEFAULT)
    }

    /// Cipher the controller asked for.
    pub fn crypto_mode(&self) -> CryptoMode {
        if self.use_aes_gcm {
            CryptoMode::Gcm
        } else {
            CryptoMode::Cbc
        }
    }
}

/// `[pfsense_interfaces]` section: router-config name → physical interface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslationTable {
    #[serde(default)]
    pub wan: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub wan2: String,
    #[serde(default)]
    pub lan: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
}

impl TranslationTable {
    /// The remap only makes sense with at least wan and lan named.
    pub fn is_usable(&self) -> bool {
        !self.wan.is_empty() && !self.lan.is_empty()
    }
}

/// The whole persisted state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: General,
    #[serde(rename = "mgmt_cfg", default)]
    pub management: Management,
    #[serde(
        rename = "pfsense_interfaces",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub router_interfaces: Option<TranslationTable>,
    #[serde(
        rename = "last_speedtest",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub speedtest: Option<SpeedTestStatus>,
}

impl Config {
    /// Parse from file contents in the given format.
    pub fn from_str(content: &str, format: Format) -> Result<Self> {
        match format {
            Format::Toml => toml::from_str(content)
                .map_err(|e| Error::Config(format!("cannot parse TOML state: {e}"))),
            Format::Json => serde_json::from_str(content)
                .map_err(|e| Error::Config(format!("cannot parse JSON state: {e}"))),
        }
    }

    /// Serialize in the given format.
    pub fn to_string(&self, format: Format) -> Result<String> {
        match format {
            Format::Toml => toml::to_string(self)
                .map_err(|e| Error::Config(format!("cannot serialize TOML state: {e}"))),
            Format::Json => serde_json::to_string_pretty(self)
                .map_err(|e| Error::Config(format!("cannot serialize JSON state: {e}"))),
        }
    }

    /// Replace zero values with defaults. Returns whether anything changed.
    pub fn apply_defaults(&mut self) -> bool {
        let mut changed = false;
        if self.general.url.is_empty() {
            warn!(url = DEFAULT_INFORM_URL, "no inform URL configured, using default");
            self.general.url = DEFAULT_INFORM_URL.to_string();
            changed = true;
        }
        if self.general.interval == 0 {
            warn!(
                interval = DEFAULT_INFORM_INTERVAL,
                "no inform interval configured, using default"
            );
            self.general.interval = DEFAULT_INFORM_INTERVAL;
            changed = true;
        }
        if self.general.log_level.is_empty() {
            self.general.log_level = "error".to_string();
        }
        changed
    }
}

/// Mutex-guarded store over the state file.
///
/// All mutation and every file write happen under the one lock; readers take
/// it only long enough to clone a snapshot.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    format: Format,
    state: Mutex<Config>,
}

impl Store {
    /// Load the state file (a missing file is not an error), apply defaults,
    /// and persist them back when the file was incomplete.
    pub fn open(path: impl Into<PathBuf>, format: Format) -> Result<Arc<Self>> {
        let path = path.into();
        let mut config = match fs::read_to_string(&path) {
            Ok(content) => Config::from_str(&content, format)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(e.into()),
        };
        let changed = config.apply_defaults();

        let store = Arc::new(Self {
            path,
            format,
            state: Mutex::new(config),
        });
        if changed {
            if let Err(e) = store.persist() {
                warn!(error = %e, "cannot write defaults back to the state file");
            }
        }
        Ok(store)
    }

    /// Build a store over pure defaults without reading the file.
    ///
    /// Used when the state file exists but cannot be parsed: startup
    /// configuration problems are never fatal.
    pub fn with_defaults(path: impl Into<PathBuf>, format: Format) -> Arc<Self> {
        let mut config = Config::default();
        config.apply_defaults();
        Arc::new(Self {
            path: path.into(),
            format,
            state: Mutex::new(config),
        })
    }

    /// Clone the current state.
    pub fn snapshot(&self) -> Config {
        self.state.lock().clone()
    }

    /// Mutate the state and write the file, all under the mutex.
    ///
    /// A failed write is reported but leaves the in-memory state mutated:
    /// memory stays authoritative until the next successful write.
    pub fn update<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Config),
    {
        let mut state = self.state.lock();
        mutate(&mut state);
        let content = state.to_string(self.format)?;
        // The lock stays held across the write: single-writer on the file.
        self.write_file(&content)
    }

    /// Write the current state out without mutating it.
    pub fn persist(&self) -> Result<()> {
        let state = self.state.lock();
        let content = state.to_string(self.format)?;
        self.write_file(&content)
    }

    // Whole-file replace via a sibling temp file so a crash mid-write never
    // leaves a torn state file.
    fn write_file(&self, content: &str) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Initialize the log sink from the `[general]` section.
///
/// `RUST_LOG` overrides the configured level; a configured log file that
/// cannot be opened falls back to stderr rather than failing startup.
pub fn init_logging(general: &General) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if general.log_level.is_empty() {
        "error"
    } else {
        &general.log_level
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    let file = if general.log_file.is_empty() {
        None
    } else {
        match fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&general.log_file)
        {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!(
                    "cannot open log file {}: {e}; logging to stderr",
                    general.log_file
                );
                None
            }
        }
    };

    match file {
        Some(file) => registry
            .with(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
            .try_init(),
        None => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    }
    .map_err(|e| Error::Config(format!("cannot init logging: {e}")))
}
