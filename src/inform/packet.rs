//! Envelope framing: the 40-byte header plus the processed payload.
//!
//! Outbound packets are Snappy-compressed and encrypted (CBC by default,
//! GCM once the controller switches the device over). Inbound packets are
//! honored exactly as their flag bits declare.
//!
//! In GCM mode the header (payload length included) is the AAD, so the
//! length field must be finalized *before* encryption (ciphertext length is
//! plaintext plus the 16-byte tag). CBC and plaintext write the length after
//! the payload is final. That asymmetry is load-bearing; do not reorder.

use crate::error::{EnvelopeError, Result};

use super::buffer;
use super::compression;
use super::crypto::{self, CryptoMode, TAG_SIZE};
use super::key::{HardwareAddr, Key};
use super::message::Message;
use super::{
    DATA_VERSION, ENCRYPT_FLAG, GCM_FLAG, HEADER_SIZE, INFORM_VERSION, MAGIC_NUMBER, NIL_IV,
    SNAPPY_FLAG, ZLIB_FLAG,
};

/// A framed inform packet.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Device hardware address carried in the header.
    pub mac: HardwareAddr,
    /// Raw flag bits.
    pub flags: u16,
    /// Key used for the payload. `None` sends plaintext.
    pub key: Option<Key>,
    /// Cipher selection when a key is present.
    pub mode: CryptoMode,
    /// The carried message.
    pub message: Message,
}

impl Packet {
    /// Build an outbound packet: Snappy always, encrypted when a key is
    /// given, GCM flag per `mode`.
    pub fn new(mac: HardwareAddr, message: Message, key: Option<Key>, mode: CryptoMode) -> Self {
        let mut flags = SNAPPY_FLAG;
        if key.is_some() {
            flags |= ENCRYPT_FLAG;
            if mode == CryptoMode::Gcm {
                flags |= GCM_FLAG;
            }
        }
        Self {
            mac,
            flags,
            key,
            mode,
            message,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & ENCRYPT_FLAG != 0
    }

    pub fn is_gcm(&self) -> bool {
        self.is_encrypted() && self.flags & GCM_FLAG != 0
    }

    pub fn is_zlib(&self) -> bool {
        self.flags & ZLIB_FLAG != 0
    }

    pub fn is_snappy(&self) -> bool {
        self.flags & SNAPPY_FLAG != 0
    }

    /// Frame, compress and encrypt into wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut payload = self.message.to_bytes()?;

        if self.is_zlib() {
            payload = compression::compress_zlib(&payload)?;
        } else if self.is_snappy() {
            payload = compression::compress_snappy(&payload)?;
        }

        let iv = if self.is_encrypted() {
            crypto::generate_iv()
        } else {
            NIL_IV
        };

        let mut header = [0u8; HEADER_SIZE];
        buffer::write_u32_be(&mut header, 0, MAGIC_NUMBER);
        buffer::write_u32_be(&mut header, 4, INFORM_VERSION);
        header[8..14].copy_from_slice(self.mac.as_bytes());
        buffer::write_u16_be(&mut header, 14, self.flags);
        header[16..32].copy_from_slice(&iv);
        buffer::write_u32_be(&mut header, 32, DATA_VERSION);

        if let (true, Some(key)) = (self.is_encrypted(), self.key.as_ref()) {
            let mode = if self.is_gcm() {
                CryptoMode::Gcm
            } else {
                CryptoMode::Cbc
            };
            if self.is_gcm() {
                // The header authenticates as AAD, so the ciphertext length
                // (payload + tag) must be in place before sealing.
                buffer::write_u32_be(&mut header, 36, (payload.len() + TAG_SIZE) as u32);
            }
            payload = crypto::encrypt(mode, &iv, key, &payload, &header)?;
            if !self.is_gcm() {
                buffer::write_u32_be(&mut header, 36, payload.len() as u32);
            }
        } else {
            buffer::write_u32_be(&mut header, 36, payload.len() as u32);
        }

        let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Decode wire bytes.
    ///
    /// `resolve_key` maps the header MAC to the decryption key; the agent
    /// always answers with its own key, but tests (and a future multi-device
    /// mode) can key per MAC.
    pub fn decode<F>(data: &[u8], resolve_key: F) -> Result<Self>
    where
        F: FnOnce(&HardwareAddr) -> std::result::Result<Key, String>,
    {
        if data.len() < HEADER_SIZE {
            return Err(EnvelopeError::ShortPacket {
                got: data.len(),
                need: HEADER_SIZE,
            }
            .into());
        }

        let declared = buffer::read_u32_be(data, 36) as usize;
        if data.len() < HEADER_SIZE + declared {
            return Err(EnvelopeError::ShortPacket {
                got: data.len(),
                need: HEADER_SIZE + declared,
            }
            .into());
        }

        let magic = buffer::read_u32_be(data, 0);
        if magic != MAGIC_NUMBER {
            return Err(EnvelopeError::BadMagic(magic).into());
        }
        let inform_version = buffer::read_u32_be(data, 4);
        if inform_version != INFORM_VERSION {
            return Err(EnvelopeError::BadVersion {
                field: "inform",
                got: inform_version,
            }
            .into());
        }
        let data_version = buffer::read_u32_be(data, 32);
        if data_version != DATA_VERSION {
            return Err(EnvelopeError::BadVersion {
                field: "data",
                got: data_version,
            }
            .into());
        }

        let mac = HardwareAddr::from_slice(&data[8..14])?;
        let flags = buffer::read_u16_be(data, 14);

        let mut packet = Self {
            mac,
            flags,
            key: None,
            mode: CryptoMode::Cbc,
            message: Message::Noop(super::message::Noop::default()),
        };

        let mut payload = data[HEADER_SIZE..HEADER_SIZE + declared].to_vec();
        if packet.is_encrypted() {
            let iv = &data[16..32];
            let key = resolve_key(&packet.mac).map_err(EnvelopeError::KeyLookupFailed)?;
            let mode = if packet.is_gcm() {
                CryptoMode::Gcm
            } else {
                CryptoMode::Cbc
            };
            payload = crypto::decrypt(mode, iv, &key, &payload, &data[..HEADER_SIZE])?;
            packet.key = Some(key);
            packet.mode = mode;
        }

        if packet.is_zlib() {
            payload = compression::decompress_zlib(&payload)?;
        } else if packet.is_snappy() {
            payload = compression::decompress_snappy(&payload)?;
        }

        packet.message = Message::decode(&payload)?;
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CryptoError, Error};
    use crate::inform::message::Noop;

    fn test_mac() -> HardwareAddr {
        HardwareAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff])
    }

    fn noop_message() -> Message {
        Message::Noop(Noop {
            server_time: 1_700_000_000,
            interval: 30,
        })
    }

    fn own_key(key: Key) -> impl FnOnce(&HardwareAddr) -> std::result::Result<Key, String> {
        move |_| Ok(key)
    }

    #[test]
    fn test_header_layout() {
        let packet = Packet::new(test_mac(), noop_message(), None, CryptoMode::Cbc);
        let wire = packet.encode().unwrap();

        assert_eq!(&wire[0..4], &[0x14, 0x14, 0x14, 0x93]);
        assert_eq!(&wire[4..8], &[0, 0, 0, 0]);
        assert_eq!(&wire[8..14], &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        // Snappy only, no encryption.
        assert_eq!(buffer::read_u16_be(&wire, 14), SNAPPY_FLAG);
        assert_eq!(&wire[16..32], &NIL_IV);
        assert_eq!(&wire[32..36], &[0, 0, 0, 1]);
        assert_eq!(
            buffer::read_u32_be(&wire, 36) as usize,
            wire.len() - HEADER_SIZE
        );
    }

    #[test]
    fn test_roundtrip_plaintext() {
        let packet = Packet::new(test_mac(), noop_message(), None, CryptoMode::Cbc);
        let wire = packet.encode().unwrap();

        let decoded = Packet::decode(&wire, |_| Err("no key expected".into())).unwrap();
        assert_eq!(decoded.mac, test_mac());
        assert!(!decoded.is_encrypted());
        match decoded.message {
            Message::Noop(noop) => {
                assert_eq!(noop.server_time, 1_700_000_000);
                assert_eq!(noop.interval, 30);
            }
            other => panic!("expected noop, got {}", other.kind()),
        }
    }

    #[test]
    fn test_roundtrip_cbc() {
        let packet = Packet::new(test_mac(), noop_message(), Some(Key::DEFAULT), CryptoMode::Cbc);
        let wire = packet.encode().unwrap();

        assert_eq!(
            buffer::read_u16_be(&wire, 14),
            SNAPPY_FLAG | ENCRYPT_FLAG
        );
        // Fresh IV, not the zero sentinel.
        assert_ne!(&wire[16..32], &NIL_IV);

        let decoded = Packet::decode(&wire, own_key(Key::DEFAULT)).unwrap();
        match decoded.message {
            Message::Noop(noop) => assert_eq!(noop.interval, 30),
            other => panic!("expected noop, got {}", other.kind()),
        }
    }

    #[test]
    fn test_roundtrip_gcm() {
        let packet = Packet::new(test_mac(), noop_message(), Some(Key::DEFAULT), CryptoMode::Gcm);
        let wire = packet.encode().unwrap();

        assert_eq!(
            buffer::read_u16_be(&wire, 14),
            SNAPPY_FLAG | ENCRYPT_FLAG | GCM_FLAG
        );

        let decoded = Packet::decode(&wire, own_key(Key::DEFAULT)).unwrap();
        assert_eq!(decoded.mode, CryptoMode::Gcm);
        match decoded.message {
            Message::Noop(noop) => assert_eq!(noop.server_time, 1_700_000_000),
            other => panic!("expected noop, got {}", other.kind()),
        }
    }

    #[test]
    fn test_roundtrip_zlib_inbound() {
        // The agent never sends zlib, but must accept it inbound.
        let mut packet = Packet::new(test_mac(), noop_message(), Some(Key::DEFAULT), CryptoMode::Cbc);
        packet.flags = ZLIB_FLAG | ENCRYPT_FLAG;
        let wire = packet.encode().unwrap();

        let decoded = Packet::decode(&wire, own_key(Key::DEFAULT)).unwrap();
        assert!(decoded.is_zlib());
        assert!(matches!(decoded.message, Message::Noop(_)));
    }

    #[test]
    fn test_roundtrip_uncompressed_inbound() {
        let mut packet = Packet::new(test_mac(), noop_message(), Some(Key::DEFAULT), CryptoMode::Gcm);
        packet.flags = ENCRYPT_FLAG | GCM_FLAG;
        let wire = packet.encode().unwrap();

        let decoded = Packet::decode(&wire, own_key(Key::DEFAULT)).unwrap();
        assert!(!decoded.is_snappy());
        assert!(matches!(decoded.message, Message::Noop(_)));
    }

    #[test]
    fn test_short_packet() {
        let err = Packet::decode(&[0u8; 10], |_| Err("unused".into())).unwrap_err();
        assert!(matches!(
            err,
            Error::Envelope(EnvelopeError::ShortPacket { got: 10, need: 40 })
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let packet = Packet::new(test_mac(), noop_message(), None, CryptoMode::Cbc);
        let wire = packet.encode().unwrap();
        let err = Packet::decode(&wire[..wire.len() - 1], |_| Err("unused".into())).unwrap_err();
        assert!(matches!(
            err,
            Error::Envelope(EnvelopeError::ShortPacket { .. })
        ));
    }

    #[test]
    fn test_bad_magic() {
        let packet = Packet::new(test_mac(), noop_message(), None, CryptoMode::Cbc);
        let mut wire = packet.encode().unwrap();
        wire[0..4].copy_from_slice(&[0, 0, 0, 0]);

        let err = Packet::decode(&wire, |_| Err("unused".into())).unwrap_err();
        assert!(matches!(err, Error::Envelope(EnvelopeError::BadMagic(0))));
    }

    #[test]
    fn test_bad_versions() {
        let packet = Packet::new(test_mac(), noop_message(), None, CryptoMode::Cbc);

        let mut wire = packet.encode().unwrap();
        wire[7] = 9;
        let err = Packet::decode(&wire, |_| Err("unused".into())).unwrap_err();
        assert!(matches!(
            err,
            Error::Envelope(EnvelopeError::BadVersion { field: "inform", got: 9 })
        ));

        let mut wire = packet.encode().unwrap();
        wire[35] = 7;
        let err = Packet::decode(&wire, |_| Err("unused".into())).unwrap_err();
        assert!(matches!(
            err,
            Error::Envelope(EnvelopeError::BadVersion { field: "data", got: 7 })
        ));
    }

    #[test]
    fn test_gcm_header_tamper_fails_auth() {
        let packet = Packet::new(test_mac(), noop_message(), Some(Key::DEFAULT), CryptoMode::Gcm);
        let wire = packet.encode().unwrap();

        // Flip one MAC byte: header is AAD, so decryption must fail even
        // though framing still parses.
        let mut tampered = wire.clone();
        tampered[9] ^= 0x01;
        let err = Packet::decode(&tampered, own_key(Key::DEFAULT)).unwrap_err();
        assert!(matches!(err, Error::Crypto(CryptoError::AuthFailure)));

        // Flip the last payload byte too.
        let mut tampered = wire;
        *tampered.last_mut().unwrap() ^= 0x01;
        let err = Packet::decode(&tampered, own_key(Key::DEFAULT)).unwrap_err();
        assert!(matches!(err, Error::Crypto(CryptoError::AuthFailure)));
    }

    #[test]
    fn test_key_lookup_failure() {
        let packet = Packet::new(test_mac(), noop_message(), Some(Key::DEFAULT), CryptoMode::Cbc);
        let wire = packet.encode().unwrap();

        let err = Packet::decode(&wire, |_| Err("device not adopted".into())).unwrap_err();
        assert!(matches!(
            err,
            Error::Envelope(EnvelopeError::KeyLookupFailed(_))
        ));
    }

    #[test]
    fn test_gcm_length_counts_tag() {
        let packet = Packet::new(test_mac(), noop_message(), Some(Key::DEFAULT), CryptoMode::Gcm);
        let wire = packet.encode().unwrap();
        let declared = buffer::read_u32_be(&wire, 36) as usize;
        assert_eq!(declared, wire.len() - HEADER_SIZE);
        // Tag is inside the declared length.
        assert!(declared > TAG_SIZE);
    }

    #[test]
    fn test_resolver_sees_header_mac() {
        let packet = Packet::new(test_mac(), noop_message(), Some(Key::DEFAULT), CryptoMode::Cbc);
        let wire = packet.encode().unwrap();

        let decoded = Packet::decode(&wire, |mac| {
            assert_eq!(*mac, test_mac());
            Ok(Key::DEFAULT)
        })
        .unwrap();
        assert_eq!(decoded.key, Some(Key::DEFAULT));
    }
}
