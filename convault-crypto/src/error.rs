//! Crypto layer error types.
//!
//! Error messages never contain plaintext, key material, or real identifiers.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors from key derivation, encryption, and pseudonymization.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Bad startup configuration (missing or weak secret, zero iterations).
    /// Fatal: the process must refuse to start.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed")]
    Encryption,

    /// Authentication tag mismatch: wrong key or tampered data.
    /// No partial plaintext is ever returned.
    #[error("decryption failed (wrong key or tampered data)")]
    Decryption,

    /// Input does not match the `hex(nonce):hex(tag):hex(ciphertext)` wire
    /// format. Decryption is never attempted against such input.
    #[error("malformed ciphertext envelope: {0}")]
    Format(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}
