//! Fixed-length byte containers: the symmetric key and the hardware address.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::error::{CryptoError, EnvelopeError};

/// Key length in bytes. Also the AES block size and the IV/nonce length.
pub const KEY_SIZE: usize = 16;

/// Hardware address length in bytes.
pub const MAC_SIZE: usize = 6;

/// 16-byte symmetric secret for the inform link.
///
/// Devices ship with a well-known default key; the controller replaces it
/// through `SetParam.authkey` once the device is adopted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key([u8; KEY_SIZE]);

impl Key {
    /// The well-known default key used before adoption.
    pub const DEFAULT: Self = Self([
        0xba, 0x86, 0xf2, 0xbb, 0xe1, 0x07, 0xc7, 0xc5, 0x7e, 0xb5, 0xf2, 0x69, 0x07, 0x75, 0xc7,
        0x12,
    ]);

    /// Create a key from raw bytes.
    pub const fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a key from its 32-character hex form.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidLength {
            what: "key",
            expected: KEY_SIZE,
            got: s.len() / 2,
        })?;
        let bytes: [u8; KEY_SIZE] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidLength {
                    what: "key",
                    expected: KEY_SIZE,
                    got: bytes.len(),
                })?;
        Ok(Self(bytes))
    }

    /// Render the key as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Whether this is the well-known default key.
    pub fn is_default(&self) -> bool {
        *self == Self::DEFAULT
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// 6-byte hardware (MAC) address.
///
/// Renders colon-separated in human output and JSON; the bare hex form seeds
/// the device serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HardwareAddr([u8; MAC_SIZE]);

impl HardwareAddr {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; MAC_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a byte slice, rejecting anything that is not 6 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let bytes: [u8; MAC_SIZE] = bytes
            .try_into()
            .map_err(|_| EnvelopeError::InvalidMac(bytes.len()))?;
        Ok(Self(bytes))
    }

    /// Parse a colon-separated form like `aa:bb:cc:dd:ee:ff`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut bytes = [0u8; MAC_SIZE];
        let mut parts = s.trim().split(':');
        for b in &mut bytes {
            *b = u8::from_str_radix(parts.next()?, 16).ok()?;
        }
        if parts.next().is_some() {
            return None;
        }
        Some(Self(bytes))
    }

    /// Bare lowercase hex form, no separators. Seeds the `serial` field.
    pub fn hex_string(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw address bytes.
    pub fn as_bytes(&self) -> &[u8; MAC_SIZE] {
        &self.0
    }
}

impl fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl Serialize for HardwareAddr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
