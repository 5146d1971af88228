//! Shared-key message encryption used by every chat client.
//!
//! There is exactly one key, compiled into the client. Anyone holding the
//! client binary can read every message, and no key is ever negotiated per
//! session. The relay never sees plaintext but that is the only property this
//! provides.
//!
//! Key derivation: HKDF-SHA256(salt, passphrase, info) -> 256-bit AES key
//! Encryption: AES-256-GCM with random 12-byte nonce
//! Wire format: base64(nonce (12 bytes) || ciphertext (includes GCM tag))

use aes_gcm::aead::{Aead, AeadCore, OsRng};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::CipherError;

/// Passphrase every client ships with.
pub const SHARED_PASSPHRASE: &str = "demo-encryption-key-2024";

const HKDF_SALT: &[u8] = b"encchat-shared-key-v1";
const HKDF_INFO: &[u8] = b"encchat-message-encryption";
const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct SharedKey {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

impl Default for SharedKey {
    fn default() -> Self {
        SharedKey::from_passphrase(SHARED_PASSPHRASE)
    }
}

impl SharedKey {
    pub fn from_passphrase(passphrase: &str) -> SharedKey {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), passphrase.as_bytes());
        let mut okm = [0u8; 32];
        // 32 bytes is far below HKDF-SHA256's 255 * 32 byte limit.
        hk.expand(HKDF_INFO, &mut okm)
            .expect("HKDF expand should not fail for 32-byte output");
        SharedKey {
            cipher: Aes256Gcm::new(&Key::<Aes256Gcm>::from(okm)),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        let mut wire = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        wire.extend_from_slice(&nonce);
        wire.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(wire))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        let wire = STANDARD.decode(encoded)?;
        if wire.len() <= NONCE_LEN {
            return Err(CipherError::TooShort(wire.len()));
        }
        let (nonce, ciphertext) = wire.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Decrypt)?;
        Ok(String::from_utf8(plaintext)?)
    }
}
