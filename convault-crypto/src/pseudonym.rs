//! One-way pseudonymization of real user identifiers.
//!
//! The pseudonym is an unsalted SHA-256 digest: it must be reproducible from
//! the real identifier alone on every request, because the real identifier is
//! supplied by the trusted collaborator each time and is never persisted.
//! Inversion requires the original identifier; the stored form reveals
//! nothing by itself.

use crate::error::{CryptoError, CryptoResult};
use sha2::{Digest, Sha256};

/// Maximum accepted real identifier length.
pub const MAX_IDENTIFIER_LEN: usize = 256;

/// Length of the integrity token in hex characters.
const INTEGRITY_TOKEN_LEN: usize = 16;

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '@' | '-')
}

/// Validates a real identifier against the allow-listed charset. Nothing
/// outside the allow-list can reach query construction or log lines
/// downstream.
fn validate_identifier(real_id: &str) -> CryptoResult<()> {
    if real_id.is_empty() {
        return Err(CryptoError::InvalidIdentifier("identifier is empty".into()));
    }
    if real_id.len() > MAX_IDENTIFIER_LEN {
        return Err(CryptoError::InvalidIdentifier(format!(
            "identifier exceeds {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    if !real_id.chars().all(is_allowed_char) {
        return Err(CryptoError::InvalidIdentifier(
            "identifier contains disallowed characters".into(),
        ));
    }
    Ok(())
}

/// Maps a real user identifier to its stable pseudonymous storage key.
///
/// Deterministic: the same input always yields the same 64-character hex
/// digest.
pub fn pseudonymize(real_id: &str) -> CryptoResult<String> {
    validate_identifier(real_id)?;
    let digest = Sha256::digest(real_id.as_bytes());
    Ok(hex::encode(digest))
}

/// Short deterministic digest binding a record to its identity and creation
/// time, used to detect tampering without decrypting content.
pub fn integrity_token(pseudo_id: &str, message_id: &str, created_at: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pseudo_id.as_bytes());
    hasher.update(b"|");
    hasher.update(message_id.as_bytes());
    hasher.update(b"|");
    hasher.update(created_at.to_le_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..INTEGRITY_TOKEN_LEN].to_string()
}
