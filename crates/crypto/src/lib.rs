//! Passphrase-based authenticated encryption for session records.
//!
//! Keys are derived with Argon2id from a passphrase and a fixed
//! application salt, so the same passphrase always yields the same key and
//! no per-record salt needs to be stored. Payloads are sealed with
//! AES-256-GCM and encoded as `nonceB64:tagB64:ciphertextB64`.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

use atelier_core::{Error, Result};

/// Application salt for key derivation. Changing this invalidates every
/// previously written encrypted record.
const KDF_SALT: &[u8] = b"atelier-session-v1";

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const BLOB_DELIMITER: char = ':';

/// Derive a 32-byte AES key from a passphrase. Deterministic: the same
/// passphrase always produces the same key.
pub fn derive_key(passphrase: &str) -> Result<[u8; KEY_LEN]> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), KDF_SALT, &mut key)
        .map_err(|e| Error::Crypto(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

/// Encrypt `plaintext` under a passphrase. Each call draws a fresh random
/// nonce, so identical inputs never produce identical blobs.
pub fn encrypt(plaintext: &str, passphrase: &str) -> Result<String> {
    let key = derive_key(passphrase)?;
    encrypt_with_key(plaintext, &key)
}

/// Decrypt a `nonce:tag:ciphertext` blob produced by [`encrypt`].
///
/// A wrong passphrase or any altered bit fails with [`Error::CryptoAuth`];
/// a structurally invalid blob fails with [`Error::CryptoFormat`]. Neither
/// case ever returns partial plaintext.
pub fn decrypt(blob: &str, passphrase: &str) -> Result<String> {
    let key = derive_key(passphrase)?;
    decrypt_with_key(blob, &key)
}

/// Encrypt with a pre-derived key. Lets callers that handle many records
/// pay the KDF cost once per passphrase.
pub fn encrypt_with_key(plaintext: &str, key: &[u8; KEY_LEN]) -> Result<String> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    // aes-gcm appends the 16-byte tag to the ciphertext; split it back out
    // so the encoded blob keeps the nonce/tag/ciphertext triple layout.
    let sealed = cipher
        .encrypt(nonce, Payload::from(plaintext.as_bytes()))
        .map_err(|_| Error::Crypto("encryption failed".to_string()))?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    Ok(format!(
        "{}{}{}{}{}",
        BASE64.encode(nonce_bytes),
        BLOB_DELIMITER,
        BASE64.encode(tag),
        BLOB_DELIMITER,
        BASE64.encode(ciphertext)
    ))
}

/// Decrypt with a pre-derived key. See [`decrypt`] for failure semantics.
pub fn decrypt_with_key(blob: &str, key: &[u8; KEY_LEN]) -> Result<String> {
    let parts: Vec<&str> = blob.split(BLOB_DELIMITER).collect();
    if parts.len() != 3 {
        return Err(Error::CryptoFormat(format!(
            "expected 3 segments, found {}",
            parts.len()
        )));
    }

    let nonce_bytes = BASE64
        .decode(parts[0])
        .map_err(|e| Error::CryptoFormat(format!("invalid nonce encoding: {}", e)))?;
    let tag = BASE64
        .decode(parts[1])
        .map_err(|e| Error::CryptoFormat(format!("invalid tag encoding: {}", e)))?;
    let ciphertext = BASE64
        .decode(parts[2])
        .map_err(|e| Error::CryptoFormat(format!("invalid ciphertext encoding: {}", e)))?;

    if nonce_bytes.len() != NONCE_LEN {
        return Err(Error::CryptoFormat(format!(
            "nonce must be {} bytes, found {}",
            NONCE_LEN,
            nonce_bytes.len()
        )));
    }
    if tag.len() != TAG_LEN {
        return Err(Error::CryptoFormat(format!(
            "tag must be {} bytes, found {}",
            TAG_LEN,
            tag.len()
        )));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut sealed = ciphertext;
    sealed.extend_from_slice(&tag);

    let plaintext = cipher
        .decrypt(nonce, Payload::from(sealed.as_slice()))
        .map_err(|_| Error::CryptoAuth("wrong passphrase or tampered data".to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|e| Error::CryptoFormat(format!("plaintext is not UTF-8: {}", e)))
}
