//! Credential encryption.
//!
//! Marketplace credentials are sealed per user before they touch the record
//! store: a ChaCha20-Poly1305 key is derived from the application master key
//! with HKDF-SHA256 (the user id as context), and ciphertexts are encoded as
//! base64(nonce || ciphertext). Tampered input or a wrong-user key fails
//! authentication and surfaces as a decryption error.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

use crate::errors::{Error, Result};

const NONCE_LEN: usize = 12;
const KEY_CONTEXT: &[u8] = b"relist.marketplace.credential.v1";

/// Encrypts and decrypts one user's marketplace credential.
pub trait CredentialCodec: Send + Sync {
    fn encrypt(&self, plaintext: &str, user_id: &str) -> Result<String>;
    fn decrypt(&self, ciphertext: &str, user_id: &str) -> Result<String>;
}

/// ChaCha20-Poly1305 codec with per-user key derivation.
pub struct SecretCipher {
    master_key: [u8; 32],
}

impl SecretCipher {
    pub fn new(master_key: [u8; 32]) -> Self {
        Self { master_key }
    }

    fn user_key(&self, user_id: &str) -> Key {
        let hk = Hkdf::<Sha256>::new(Some(KEY_CONTEXT), &self.master_key);
        let mut okm = [0u8; 32];
        hk.expand(user_id.as_bytes(), &mut okm)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        Key::clone_from_slice(&okm)
    }
}

impl CredentialCodec for SecretCipher {
    fn encrypt(&self, plaintext: &str, user_id: &str) -> Result<String> {
        let cipher = ChaCha20Poly1305::new(&self.user_key(user_id));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| Error::decryption("Failed to seal credential"))?;

        let mut raw = Vec::with_capacity(NONCE_LEN + sealed.len());
        raw.extend_from_slice(&nonce_bytes);
        raw.extend_from_slice(&sealed);
        Ok(BASE64.encode(raw))
    }

    fn decrypt(&self, ciphertext: &str, user_id: &str) -> Result<String> {
        let raw = BASE64
            .decode(ciphertext)
            .map_err(|_| Error::decryption("Ciphertext is not valid base64"))?;
        if raw.len() <= NONCE_LEN {
            return Err(Error::decryption("Ciphertext is truncated"));
        }

        let (nonce_bytes, sealed) = raw.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(&self.user_key(user_id));
        let opened = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| Error::decryption("Credential ciphertext failed authentication"))?;

        String::from_utf8(opened)
            .map_err(|_| Error::decryption("Decrypted credential is not valid UTF-8"))
    }
}
