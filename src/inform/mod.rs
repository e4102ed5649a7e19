//! The binary inform protocol.
//!
//! Defines the envelope format, message taxonomy, and the crypto and
//! compression layers the wire requires.
//!
//! ## Envelope Format
//!
//! ```text
//! ┌───────────┬─────────────┬──────────┬───────────┬──────────────┐
//! │ Magic (4) │ Version (4) │ MAC (6)  │ Flags (2) │ IV/Nonce (16)│
//! ├───────────┴─────────────┴──────────┴───────────┴──────────────┤
//! │ Data Version (4) │ Payload Length (4) │ Payload ...           │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The 40-byte header doubles as the AAD in GCM mode, with the payload
//! length field already populated before encryption.

pub mod buffer;
pub mod compression;
pub mod crypto;
pub mod key;
pub mod message;
pub mod packet;
pub mod report;

pub use crypto::CryptoMode;
pub use key::{HardwareAddr, Key};
pub use message::{Cmd, HttpResponse, ManagementConfig, Message, Noop, SetParam};
pub use packet::Packet;
pub use report::{
    EthernetTableEntry, Inform, Interface, NetworkConfig, Port, SpeedTestStatus, SysStats,
};

/// Magic number at the start of every packet.
pub const MAGIC_NUMBER: u32 = 0x1414_1493;

/// Inform protocol version (constant on the wire).
pub const INFORM_VERSION: u32 = 0;

/// Payload data version (constant on the wire).
pub const DATA_VERSION: u32 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 40;

/// Flag bit: payload is encrypted.
pub const ENCRYPT_FLAG: u16 = 0x1;

/// Flag bit: payload is zlib-compressed.
pub const ZLIB_FLAG: u16 = 0x2;

/// Flag bit: payload is Snappy-compressed.
pub const SNAPPY_FLAG: u16 = 0x4;

/// Flag bit: encryption uses AES-GCM rather than AES-CBC.
pub const GCM_FLAG: u16 = 0x8;

/// The all-zero IV written when encryption is disabled.
pub const NIL_IV: [u8; 16] = [0u8; 16];
