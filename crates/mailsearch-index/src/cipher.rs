//! Encryption facade for index keys and entries.
//!
//! Two kinds of values are encrypted:
//! - **Index keys** (words, instance ids) are encrypted deterministically so
//!   the store can be addressed by them without ever seeing plaintext.
//! - **Payloads** (entries, word lists) use a fresh random nonce each time.

use aes_gcm_siv::aead::generic_array::GenericArray;
use aes_gcm_siv::aead::{Aead, KeyInit};
use aes_gcm_siv::{Aes256GcmSiv, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::{Error, Result};

const NONCE_LEN: usize = 12;

const KEY_CONTEXT: &str = "mailsearch 2024 search index key";
const INDEX_NONCE_CONTEXT: &str = "mailsearch 2024 search index key nonce";

/// Cipher used by the index core.
pub trait IndexCipher: Send + Sync {
    /// Deterministically encrypts an index key, returning base64url.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails.
    fn encrypt_index_key(&self, plain: &str) -> Result<String>;

    /// Reverses [`IndexCipher::encrypt_index_key`].
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a valid encrypted index key.
    fn decrypt_index_key(&self, encrypted: &str) -> Result<String>;

    /// Encrypts a payload with a random nonce.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails.
    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>>;

    /// Decrypts a payload produced by [`IndexCipher::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is truncated or fails authentication.
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// AES-256-GCM-SIV implementation of [`IndexCipher`].
pub struct AesIndexCipher {
    aes: Aes256GcmSiv,
    index_nonce: [u8; NONCE_LEN],
}

impl AesIndexCipher {
    /// Derives the index cipher from the user's key material.
    #[must_use]
    pub fn new(key_material: &[u8]) -> Self {
        let key = blake3::derive_key(KEY_CONTEXT, key_material);
        let nonce_source = blake3::derive_key(INDEX_NONCE_CONTEXT, key_material);
        let mut index_nonce = [0u8; NONCE_LEN];
        index_nonce.copy_from_slice(&nonce_source[..NONCE_LEN]);

        Self {
            aes: Aes256GcmSiv::new(GenericArray::from_slice(&key)),
            index_nonce,
        }
    }
}

impl std::fmt::Debug for AesIndexCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesIndexCipher").finish_non_exhaustive()
    }
}

impl IndexCipher for AesIndexCipher {
    fn encrypt_index_key(&self, plain: &str) -> Result<String> {
        let encrypted = self
            .aes
            .encrypt(Nonce::from_slice(&self.index_nonce), plain.as_bytes())
            .map_err(|e| Error::Crypto(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(encrypted))
    }

    fn decrypt_index_key(&self, encrypted: &str) -> Result<String> {
        let bytes = URL_SAFE_NO_PAD.decode(encrypted)?;
        let plain = self
            .aes
            .decrypt(Nonce::from_slice(&self.index_nonce), bytes.as_slice())
            .map_err(|e| Error::Crypto(e.to_string()))?;
        String::from_utf8(plain).map_err(|e| Error::Crypto(e.to_string()))
    }

    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let nonce: [u8; NONCE_LEN] = rand::random();
        let mut out = Vec::with_capacity(NONCE_LEN + plain.len() + 16);
        out.extend_from_slice(&nonce);
        out.extend(
            self.aes
                .encrypt(Nonce::from_slice(&nonce), plain)
                .map_err(|e| Error::Crypto(e.to_string()))?,
        );
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(Error::Crypto("payload shorter than nonce".to_string()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.aes
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| Error::Crypto(e.to_string()))
    }
}
