//! AES-256-GCM Envelope Codec
//!
//! An envelope is `base64(iv || key || ciphertext)` where `iv` is 12 bytes,
//! `key` is the 32-byte AES-256 key and `ciphertext` carries the 16-byte
//! GCM tag at its end.
//!
//! The key travels next to the ciphertext it protects, so anyone holding the
//! envelope can read the payload. The layout is kept for wire compatibility
//! with existing clients.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

/// Nonce size in bytes.
pub const IV_SIZE: usize = 12;

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Placeholder returned in place of plaintext when an envelope cannot be opened.
pub const DECODE_SENTINEL: &str = "[encrypted message]";

/// Errors that can occur while building or opening an envelope
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Envelope is not valid base64: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),
    #[error("Envelope too short: {0} bytes")]
    TooShort(usize),
    #[error("Invalid key length")]
    InvalidKey,
    #[error("Decryption failed")]
    DecryptionFailed,
}

/// Encrypt `plaintext` under a fresh key and nonce and return the envelope.
pub fn encode(plaintext: &[u8]) -> Result<String, CodecError> {
    let key = Aes256Gcm::generate_key(OsRng);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let cipher = Aes256Gcm::new(&key);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CodecError::EncryptionFailed)?;

    let mut combined = Vec::with_capacity(IV_SIZE + KEY_SIZE + ciphertext.len());
    combined.extend_from_slice(nonce.as_slice());
    combined.extend_from_slice(key.as_slice());
    combined.extend_from_slice(&ciphertext);

    Ok(STANDARD.encode(combined))
}

/// Encrypt UTF-8 text.
pub fn encode_text(text: &str) -> Result<String, CodecError> {
    encode(text.as_bytes())
}

/// Open an envelope, reporting why it could not be opened.
pub fn try_decode(envelope: &str) -> Result<Vec<u8>, CodecError> {
    let bytes = STANDARD.decode(envelope.trim())?;
    if bytes.len() < IV_SIZE + KEY_SIZE + TAG_SIZE {
        return Err(CodecError::TooShort(bytes.len()));
    }

    let (iv, rest) = bytes.split_at(IV_SIZE);
    let (key, ciphertext) = rest.split_at(KEY_SIZE);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CodecError::InvalidKey)?;
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CodecError::DecryptionFailed)
}

/// Open an envelope. Never fails: malformed or tampered input yields the
/// bytes of [`DECODE_SENTINEL`].
pub fn decode(envelope: &str) -> Vec<u8> {
    match try_decode(envelope) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            log::warn!("Envelope decode failed: {}", e);
            DECODE_SENTINEL.as_bytes().to_vec()
        }
    }
}

/// Open an envelope carrying text. Invalid UTF-8 is replaced lossily.
pub fn decode_text(envelope: &str) -> String {
    String::from_utf8_lossy(&decode(envelope)).into_owned()
}
