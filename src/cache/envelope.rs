//! At-rest encryption for sensitive namespaces using AES-256-GCM.
//!
//! Sealed layout: 12-byte random nonce followed by ciphertext and tag. The
//! storage key is bound as associated data, so a record copied under another
//! key fails authentication just like a tampered one.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;

use crate::error::{CacheError, Result};

/// Nonce size for AES-256-GCM (96 bits)
const NONCE_SIZE: usize = 12;

/// Key size for AES-256 (256 bits)
pub const KEY_SIZE: usize = 32;

/// Generates a random key.
pub fn generate_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Symmetric cipher bound to one key.
#[derive(Clone)]
pub struct Envelope {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Envelope(..)")
    }
}

impl Envelope {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Encrypts `plaintext`, authenticating `aad` alongside it.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|e| CacheError::CorruptEntry(format!("encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypts a sealed buffer. Wrong key, truncation and tampering all
    /// surface as [`CacheError::CorruptEntry`].
    pub fn decrypt(&self, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_SIZE {
            return Err(CacheError::CorruptEntry(format!(
                "sealed payload too short: {} bytes",
                sealed.len()
            )));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CacheError::CorruptEntry("decryption failed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let envelope = Envelope::new(&generate_key());
        let sealed = envelope.encrypt(b"phone=555-0100", b"user-profile:42").unwrap();

        assert_ne!(&sealed[NONCE_SIZE..], b"phone=555-0100");
        let plain = envelope.decrypt(&sealed, b"user-profile:42").unwrap();
        assert_eq!(plain, b"phone=555-0100");
    }

    #[test]
    fn test_nonce_is_random() {
        let envelope = Envelope::new(&generate_key());
        let a = envelope.encrypt(b"same", b"").unwrap();
        let b = envelope.encrypt(b"same", b"").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = Envelope::new(&[1u8; KEY_SIZE]).encrypt(b"secret", b"k").unwrap();
        let result = Envelope::new(&[2u8; KEY_SIZE]).decrypt(&sealed, b"k");
        assert!(matches!(result, Err(CacheError::CorruptEntry(_))));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let envelope = Envelope::new(&generate_key());
        let mut sealed = envelope.encrypt(b"secret", b"k").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(envelope.decrypt(&sealed, b"k").is_err());
    }

    #[test]
    fn test_truncated_fails() {
        let envelope = Envelope::new(&generate_key());
        let sealed = envelope.encrypt(b"secret", b"k").unwrap();
        assert!(envelope.decrypt(&sealed[..5], b"k").is_err());
        assert!(envelope.decrypt(&sealed[..sealed.len() - 1], b"k").is_err());
    }

    #[test]
    fn test_aad_mismatch_fails() {
        let envelope = Envelope::new(&generate_key());
        let sealed = envelope.encrypt(b"secret", b"ns:a").unwrap();
        assert!(envelope.decrypt(&sealed, b"ns:b").is_err());
    }
}
