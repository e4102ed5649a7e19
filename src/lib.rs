//! # Informant
//!
//! An agent that reports host and interface telemetry to a managed-network
//! controller over the proprietary binary inform protocol, impersonating a
//! gateway device.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Inform Loop (agent)                      │
//! ├────────────────────────┬───────────────────────┬────────────────┤
//! │   Telemetry Adapter    │   Configuration Store │  Speed-Test    │
//! │  (host / router mode)  │   (TOML / JSON file)  │  Job           │
//! ├────────────────────────┴───────────────────────┴────────────────┤
//! │        Envelope Codec (frame / compress / encrypt)              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │        HTTP Transport (device-mimicking POST)                   │
//! └─────────────────────────────────────────────────────────────────┘
//!
//! The loop ticks on a fixed interval. Each tick builds an `Inform` payload,
//! frames it into the binary envelope (Snappy + AES-128 CBC or GCM), POSTs it
//! to the controller, and dispatches the decoded reply: `SetParam` mutates
//! the persisted management configuration, `Cmd` may spawn a speed-test job,
//! `Noop` is acknowledged and dropped.

#![warn(clippy::all, clippy::pedantic)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)] // Wire fields are fixed-width by contract
#![allow(clippy::cast_sign_loss)] // Counters are non-negative
#![allow(clippy::cast_precision_loss)] // Acceptable for stats
#![allow(clippy::doc_markdown)] // ASCII diagrams in docs
#![allow(clippy::unreadable_literal)] // Wire constants are clearer unbroken
#![allow(clippy::struct_excessive_bools)] // The inform payload is boolean-heavy by contract
#![allow(clippy::module_inception)]

pub mod agent;
pub mod collect;
pub mod config;
pub mod error;
pub mod inform;
pub mod pfsense;
pub mod speedtest;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};

/// Agent version, reported nowhere on the wire but logged at startup.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
