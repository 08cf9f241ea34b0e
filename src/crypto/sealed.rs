//! AES-256-GCM sealing for small local files.
//!
//! Layout: `base64(nonce[12] ‖ tag[16] ‖ ciphertext)`. A fresh random nonce
//! is drawn for every seal.

use crate::{TollgateError, TollgateResult};
use aes_gcm::{
    aead::{rand_core::RngCore, AeadInPlace, OsRng},
    Aes256Gcm, KeyInit, Nonce, Tag,
};
use base64::{engine::general_purpose::STANDARD, Engine};

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Encrypt `plaintext` under `key` and return the base64 envelope.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> TollgateResult<String> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| TollgateError::LicenseIo(format!("Cipher init failed: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(nonce, b"", &mut buffer)
        .map_err(|_| TollgateError::LicenseIo("Encryption failed".to_string()))?;

    let mut envelope = Vec::with_capacity(NONCE_SIZE + TAG_SIZE + buffer.len());
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(tag.as_slice());
    envelope.extend_from_slice(&buffer);

    Ok(STANDARD.encode(envelope))
}

/// Decrypt an envelope produced by [`seal`].
///
/// Any failure (bad base64, truncated input, wrong key, modified bytes)
/// collapses to `LicenseCorrupt`.
pub fn open(key: &[u8; 32], envelope: &str) -> TollgateResult<Vec<u8>> {
    let raw = STANDARD
        .decode(envelope.trim())
        .map_err(|_| TollgateError::LicenseCorrupt)?;

    if raw.len() < NONCE_SIZE + TAG_SIZE {
        return Err(TollgateError::LicenseCorrupt);
    }

    let (nonce_bytes, rest) = raw.split_at(NONCE_SIZE);
    let (tag_bytes, ciphertext) = rest.split_at(TAG_SIZE);

    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|_| TollgateError::LicenseCorrupt)?;

    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce_bytes),
            b"",
            &mut buffer,
            Tag::from_slice(tag_bytes),
        )
        .map_err(|_| TollgateError::LicenseCorrupt)?;

    Ok(buffer)
}
