//! Message taxonomy and the tagged-JSON codec.
//!
//! Controller replies carry a `_type` discriminator; the device payload does
//! not. Field extraction is deliberately permissive because the controller
//! mixes numeric, boolean and string encodings for the same fields across
//! versions.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{EnvelopeError, Result};

use super::report::Inform;

/// Read a string field. Non-strings are rejected, not coerced.
pub fn as_str(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

/// Read an integer field from an int, float or numeric string.
pub fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Read a boolean field from a bool, number, or the usual string spellings.
pub fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f as i64 > 0),
        Value::String(s) => match s.as_str() {
            "true" | "True" | "1" => Some(true),
            "false" | "False" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// The management key-value block the controller pushes via `SetParam`.
///
/// Decoded from a newline-delimited `k=v` string on the wire; re-marshals as
/// a plain JSON object. The agent never sends one, so the asymmetry is
/// harmless.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagementConfig(BTreeMap<String, String>);

impl ManagementConfig {
    /// Parse the `k=v\n` wire form. Lines without `=` are skipped.
    pub fn parse(s: &str) -> Self {
        let mut map = BTreeMap::new();
        for line in s.split('\n') {
            if let Some(i) = line.find('=') {
                map.insert(line[..i].to_string(), line[i + 1..].to_string());
            }
        }
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for ManagementConfig {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

/// Controller reply: parameter update.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SetParam {
    #[serde(rename = "mgmt_cfg")]
    pub management_config: ManagementConfig,
    #[serde(rename = "server_time_in_utc")]
    pub server_time: i64,
}

impl SetParam {
    fn from_map(map: &Map<String, Value>) -> Self {
        let mut msg = Self::default();
        if let Some(mgmt) = map.get("mgmt_cfg").and_then(Value::as_str) {
            msg.management_config = ManagementConfig::parse(mgmt);
        }
        if let Some(time) = map.get("server_time_in_utc").and_then(as_int) {
            msg.server_time = time;
        }
        msg
    }
}

/// Controller reply: nothing to do. Carries a polling interval the agent
/// accepts but does not apply.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Noop {
    #[serde(rename = "server_time_in_utc")]
    pub server_time: i64,
    pub interval: i64,
}

impl Noop {
    fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            server_time: map
                .get("server_time_in_utc")
                .and_then(as_int)
                .unwrap_or_default(),
            interval: map.get("interval").and_then(as_int).unwrap_or_default(),
        }
    }
}

/// Controller reply: a command for the device to execute.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Cmd {
    #[serde(rename = "server_time_in_utc")]
    pub server_time: i64,
    #[serde(rename = "cmd")]
    pub command: String,
    pub use_alert: bool,
    pub device_id: String,
    pub time: i64,
    #[serde(rename = "_id")]
    pub command_id: String,
}

impl Cmd {
    fn from_map(map: &Map<String, Value>) -> Self {
        let field = |key: &str| map.get(key);
        Self {
            server_time: field("server_time_in_utc").and_then(as_int).unwrap_or_default(),
            command: field("cmd").and_then(as_str).unwrap_or_default(),
            use_alert: field("use_alert").and_then(as_bool).unwrap_or_default(),
            device_id: field("device_id").and_then(as_str).unwrap_or_default(),
            time: field("time").and_then(as_int).unwrap_or_default(),
            command_id: field("_id").and_then(as_str).unwrap_or_default(),
        }
    }
}

/// Synthetic message for HTTP replies that never reached the envelope layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HttpResponse {
    pub code: u16,
}

impl HttpResponse {
    pub fn new(code: u16) -> Self {
        Self { code }
    }

    pub fn is_success(&self) -> bool {
        self.code == 200
    }
}

/// A decoded inform-link message.
#[derive(Debug, Clone)]
pub enum Message {
    /// Device→controller telemetry.
    Inform(Box<Inform>),
    /// Controller→device parameter update.
    SetParam(SetParam),
    /// Controller→device no-op.
    Noop(Noop),
    /// Controller→device command.
    Cmd(Cmd),
    /// Synthetic wrapper for a non-200 HTTP exchange.
    HttpResponse(HttpResponse),
}

impl Message {
    /// Marshal for the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::Inform(report) => report.to_bytes(),
            Self::SetParam(msg) => Ok(serde_json::to_vec(msg).map_err(EnvelopeError::from)?),
            Self::Noop(msg) => Ok(serde_json::to_vec(msg).map_err(EnvelopeError::from)?),
            Self::Cmd(msg) => Ok(serde_json::to_vec(msg).map_err(EnvelopeError::from)?),
            Self::HttpResponse(msg) => Ok(serde_json::to_vec(msg).map_err(EnvelopeError::from)?),
        }
    }

    /// Decode a JSON payload, dispatching on the `_type` field.
    ///
    /// Unknown or missing `_type` values decode as [`Noop`]: the controller
    /// occasionally sends types this device has no use for.
    pub fn decode(data: &[u8]) -> std::result::Result<Self, EnvelopeError> {
        let map: Map<String, Value> = serde_json::from_slice(data)?;
        let msg = match map.get("_type").and_then(Value::as_str) {
            Some("setparam") => Self::SetParam(SetParam::from_map(&map)),
            Some("cmd") => Self::Cmd(Cmd::from_map(&map)),
            _ => Self::Noop(Noop::from_map(&map)),
        };
        Ok(msg)
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Inform(_) => "inform",
            Self::SetParam(_) => "setparam",
            Self::Noop(_) => "noop",
            Self::Cmd(_) => "cmd",
            Self::HttpResponse(_) => "http",
        }
    }
}
