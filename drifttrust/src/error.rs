// DriftTrust error types

use thiserror::Error;

/// Top-level error type for the DriftTrust crate.
#[derive(Debug, Error)]
pub enum DriftTrustError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("signature verification failed")]
    SignatureVerification,

    #[error("AEAD encryption failed: {0}")]
    Encryption(String),

    #[error("AEAD decryption failed: {0}")]
    Decryption(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, DriftTrustError>;
