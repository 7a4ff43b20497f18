//! Store error types.
//!
//! Messages surfaced to callers stay generic; operational detail goes to
//! `tracing` and the audit log in masked form. Nothing here ever carries
//! plaintext content or a real user identifier.

use convault_crypto::CryptoError;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from the conversation store and its services.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Bad startup configuration. Fatal: refuse to start.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Bad caller input, rejected before the operation is attempted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Cryptographic layer failure. A decryption failure on one row during
    /// `fetch` is recovered locally by skipping the row; anywhere else it is
    /// fatal to that single operation.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The operation exceeded its deadline. Nothing partial was committed;
    /// safe to retry.
    #[error("operation timed out: {0}")]
    Timeout(&'static str),

    /// Deletion could not be confirmed; the certificate is withheld.
    #[error("erasure failed: {0}")]
    Erasure(String),

    #[error("storage error: {0}")]
    Storage(#[from] duckdb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Worker task failure in the async facade.
    #[error("internal task failure: {0}")]
    Internal(String),
}
