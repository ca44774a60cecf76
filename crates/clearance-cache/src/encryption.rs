//! At-rest encryption of cached values
//!
//! Values are sealed with ChaCha20-Poly1305 under a per-key subkey derived
//! from the master key with HKDF-SHA256, so a ciphertext moved to another key
//! fails to open.
//!
//! Blob layout: `version (1) || nonce (12) || ciphertext+tag`.

use crate::backend::CacheError;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

/// Nonce size for ChaCha20-Poly1305 (96 bits = 12 bytes)
const NONCE_SIZE: usize = 12;

/// Version byte for encrypted blob format
const BLOB_VERSION: u8 = 0x01;

/// HKDF salt for per-key subkeys
const SUBKEY_SALT: &[u8] = b"clearance-cache-value-v1";

/// Symmetric cipher for cache values.
#[derive(Clone)]
pub struct ValueCipher {
    master: Zeroizing<[u8; 32]>,
}

impl fmt::Debug for ValueCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueCipher")
            .field("master", &"<redacted>")
            .finish()
    }
}

impl ValueCipher {
    /// Cipher over a raw 32-byte master key.
    pub fn new(master: [u8; 32]) -> Self {
        Self {
            master: Zeroizing::new(master),
        }
    }

    /// Cipher over a 64-character hex master key.
    pub fn from_hex(encoded: &str) -> Result<Self, CacheError> {
        let bytes = Zeroizing::new(
            hex::decode(encoded.trim())
                .map_err(|e| CacheError::Config(format!("encryption key is not hex: {e}")))?,
        );
        let master: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            CacheError::Config(format!(
                "encryption key must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::new(master))
    }

    fn subkey(&self, cache_key: &str) -> Result<Zeroizing<[u8; 32]>, CacheError> {
        let hk = Hkdf::<Sha256>::new(Some(SUBKEY_SALT), self.master.as_slice());
        let mut okm = Zeroizing::new([0u8; 32]);
        hk.expand(cache_key.as_bytes(), okm.as_mut_slice())
            .map_err(|e| CacheError::Crypto(format!("subkey derivation failed: {e}")))?;
        Ok(okm)
    }

    /// Seal `plaintext` for storage under `cache_key`.
    pub fn encrypt(&self, cache_key: &str, plaintext: &[u8]) -> Result<Vec<u8>, CacheError> {
        let subkey = self.subkey(cache_key)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(subkey.as_slice()));

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: cache_key.as_bytes(),
                },
            )
            .map_err(|e| CacheError::Crypto(format!("seal failed: {e}")))?;

        let mut blob = Vec::with_capacity(1 + NONCE_SIZE + sealed.len());
        blob.push(BLOB_VERSION);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    /// Open a blob previously sealed under `cache_key`.
    pub fn decrypt(&self, cache_key: &str, blob: &[u8]) -> Result<Vec<u8>, CacheError> {
        if blob.len() < 1 + NONCE_SIZE {
            return Err(CacheError::Crypto("blob too short".to_string()));
        }
        if blob[0] != BLOB_VERSION {
            return Err(CacheError::Crypto(format!(
                "unsupported blob version {:#04x}",
                blob[0]
            )));
        }
        let (nonce, sealed) = blob[1..].split_at(NONCE_SIZE);

        let subkey = self.subkey(cache_key)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(subkey.as_slice()));
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: cache_key.as_bytes(),
                },
            )
            .map_err(|_| CacheError::Crypto("authentication failed".to_string()))
    }
}
