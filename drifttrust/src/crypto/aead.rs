// AES-128-GCM sealing for overlay packets.
//
// The handshake key schedule produces 16-byte keys, so the message cipher is
// fixed to AES-128-GCM. Nonces are the 12-byte per-packet auth-tags; the AAD
// is the 32-byte packet tag.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Nonce};

use crate::error::{DriftTrustError, Result};

/// AES-128-GCM authenticated encryption with associated data.
pub struct MessageCipher {
    key: [u8; 16],
}

impl MessageCipher {
    /// Create a new cipher from a 16-byte key.
    pub fn new(key: [u8; 16]) -> Self {
        Self { key }
    }

    /// Encrypt `plaintext` with the given 12-byte `nonce` and associated data
    /// `aad`.
    ///
    /// Returns ciphertext || 16-byte GCM tag.
    pub fn encrypt(&self, nonce: &[u8; 12], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes128Gcm::new_from_slice(&self.key)
            .map_err(|e| DriftTrustError::Encryption(format!("aes-gcm init: {e}")))?;
        let nonce = Nonce::from_slice(nonce);
        let payload = Payload { msg: plaintext, aad };
        cipher
            .encrypt(nonce, payload)
            .map_err(|e| DriftTrustError::Encryption(format!("{e}")))
    }

    /// Decrypt `ciphertext` (which includes the appended 16-byte tag) with the
    /// given 12-byte `nonce` and the same `aad` used during encryption.
    pub fn decrypt(&self, nonce: &[u8; 12], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes128Gcm::new_from_slice(&self.key)
            .map_err(|e| DriftTrustError::Decryption(format!("aes-gcm init: {e}")))?;
        let nonce = Nonce::from_slice(nonce);
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        cipher
            .decrypt(nonce, payload)
            .map_err(|e| DriftTrustError::Decryption(format!("{e}")))
    }

    /// Return the key bytes.
    pub fn key(&self) -> &[u8; 16] {
        &self.key
    }
}
