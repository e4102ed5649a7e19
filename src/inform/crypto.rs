//! Dual-mode payload encryption: AES-128-CBC and AES-128-GCM.
//!
//! CBC uses PKCS#7 padding handled here rather than by the cipher layer,
//! because decrypt must tolerate the controller's padding discipline (any
//! value up to the block size, stripped verbatim). GCM is configured with a
//! **16-byte nonce**, non-standard but required for wire compatibility, and
//! authenticates the full 40-byte envelope header as AAD.

use aes::Aes128;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::AesGcm;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;

use crate::error::CryptoError;

use super::key::{Key, KEY_SIZE};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
// The wire dictates a 16-byte nonce instead of the usual 12.
type Aes128Gcm = AesGcm<Aes128, U16>;

/// GCM authentication tag size appended to the ciphertext.
pub const TAG_SIZE: usize = 16;

/// IV/nonce size. Same as the block and key size for this protocol.
pub const IV_SIZE: usize = KEY_SIZE;

/// Cipher selection for the inform link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CryptoMode {
    /// AES-128-CBC with PKCS#7 padding. The original mode.
    #[default]
    Cbc,
    /// AES-128-GCM with the envelope header as AAD.
    Gcm,
}

/// Generate a fresh random IV/nonce.
pub fn generate_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

/// Encrypt `data` under `mode`. `aad` is only consulted in GCM mode.
pub fn encrypt(
    mode: CryptoMode,
    iv: &[u8],
    key: &Key,
    data: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    match mode {
        CryptoMode::Cbc => encrypt_cbc(iv, key, data),
        CryptoMode::Gcm => encrypt_gcm(iv, key, data, aad),
    }
}

/// Decrypt `data` under `mode`. `aad` is only consulted in GCM mode.
pub fn decrypt(
    mode: CryptoMode,
    iv: &[u8],
    key: &Key,
    data: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    match mode {
        CryptoMode::Cbc => decrypt_cbc(iv, key, data),
        CryptoMode::Gcm => decrypt_gcm(iv, key, data, aad),
    }
}

fn check_iv(iv: &[u8]) -> Result<[u8; IV_SIZE], CryptoError> {
    iv.try_into().map_err(|_| CryptoError::InvalidLength {
        what: "iv",
        expected: IV_SIZE,
        got: iv.len(),
    })
}

fn encrypt_cbc(iv: &[u8], key: &Key, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let iv = check_iv(iv)?;

    // PKCS#7: pad length is always in 1..=16, a full block for aligned input.
    let pad_len = KEY_SIZE - (data.len() % KEY_SIZE);
    let mut padded = Vec::with_capacity(data.len() + pad_len);
    padded.extend_from_slice(data);
    padded.resize(data.len() + pad_len, pad_len as u8);

    let encryptor = Aes128CbcEnc::new(key.as_bytes().into(), (&iv).into());
    let mut out = vec![0u8; padded.len()];
    encryptor
        .encrypt_padded_b2b_mut::<NoPadding>(&padded, &mut out)
        .map_err(|_| CryptoError::InvalidCiphertext(padded.len()))?;
    Ok(out)
}

fn decrypt_cbc(iv: &[u8], key: &Key, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let iv = check_iv(iv)?;

    if data.is_empty() || data.len() % KEY_SIZE != 0 {
        return Err(CryptoError::InvalidCiphertext(data.len()));
    }

    let decryptor = Aes128CbcDec::new(key.as_bytes().into(), (&iv).into());
    let mut buf = data.to_vec();
    decryptor
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| CryptoError::InvalidCiphertext(data.len()))?;

    // Strip exactly the declared padding; only values beyond the block size
    // are malformed.
    let pad_len = usize::from(buf[buf.len() - 1]);
    if pad_len > KEY_SIZE {
        return Err(CryptoError::BadPadding(pad_len));
    }
    buf.truncate(buf.len() - pad_len);
    Ok(buf)
}

fn encrypt_gcm(iv: &[u8], key: &Key, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let iv = check_iv(iv)?;

    let cipher = Aes128Gcm::new(key.as_bytes().into());
    cipher
        .encrypt((&iv).into(), Payload { msg: data, aad })
        .map_err(|_| CryptoError::AuthFailure)
}

fn decrypt_gcm(iv: &[u8], key: &Key, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let iv = check_iv(iv)?;

    let cipher = Aes128Gcm::new(key.as_bytes().into());
    cipher
        .decrypt((&iv).into(), Payload { msg: data, aad })
        .map_err(|_| CryptoError::AuthFailure)
}
