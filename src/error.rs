//! Error types for the inform agent.

use std::io;

use thiserror::Error;

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the inform agent.
#[derive(Error, Debug)]
pub enum Error {
    // Cryptographic errors
    #[error("cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    // Envelope framing errors
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    // Transport errors
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid network configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Telemetry collection errors
    #[error("telemetry error: {0}")]
    Telemetry(String),

    // General errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Cryptographic operation errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid length: {what} must be {expected} bytes, got {got}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid padding: {0} > 16")]
    BadPadding(usize),

    #[error("authentication failed")]
    AuthFailure,

    #[error("ciphertext length {0} is not a multiple of the block size")]
    InvalidCiphertext(usize),
}

/// Envelope framing and decoding errors.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("packet too short: {got} bytes, need {need}")]
    ShortPacket { got: usize, need: usize },

    #[error("invalid magic number {0:#010x}")]
    BadMagic(u32),

    #[error("unknown {field} version {got}")]
    BadVersion { field: &'static str, got: u32 },

    #[error("key lookup failed: {0}")]
    KeyLookupFailed(String),

    #[error("invalid hardware address length {0}")]
    InvalidMac(usize),

    #[error("compression error: {0}")]
    Compress(String),

    #[error("payload JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Check whether this error only concerns a single exchange.
    ///
    /// The inform loop skips the tick for these and carries on; only
    /// launcher-level failures terminate the agent.
    pub fn is_exchange_scoped(&self) -> bool {
        matches!(
            self,
            Error::Crypto(_) | Error::Envelope(_) | Error::Transport(_) | Error::Telemetry(_)
        )
    }
}
