//! Authenticated encryption with a textual envelope format.
//!
//! ChaCha20-Poly1305 with a fresh random 96-bit nonce per call. The Poly1305
//! tag is the only integrity mechanism for stored content, so tag failures
//! are hard errors; there is no best-effort recovery of tampered data.
//!
//! The wire format is `hex(nonce):hex(tag):hex(ciphertext)`. A stored value
//! either parses as exactly that, or it is rejected with
//! [`CryptoError::Format`] before any decryption is attempted.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, ChaCha20Poly1305, Key, Nonce};

/// ChaCha20-Poly1305 nonce size in bytes (96-bit).
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// A self-describing ciphertext envelope: nonce, tag, and ciphertext.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub nonce: [u8; NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Serializes to the transportable `hex(nonce):hex(tag):hex(ciphertext)`
    /// triple.
    pub fn to_wire(&self) -> String {
        format!(
            "{}:{}:{}",
            hex::encode(self.nonce),
            hex::encode(self.tag),
            hex::encode(&self.ciphertext)
        )
    }

    /// Parses the wire triple, failing fast on anything that does not match.
    ///
    /// This is the only entry point from stored text to an [`Envelope`];
    /// malformed input never reaches the cipher.
    pub fn parse(wire: &str) -> CryptoResult<Self> {
        let mut parts = wire.split(':');
        let (nonce_hex, tag_hex, ct_hex) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(n), Some(t), Some(c), None) => (n, t, c),
            _ => {
                return Err(CryptoError::Format(
                    "expected three colon-separated hex fields".into(),
                ))
            }
        };

        let nonce_bytes = hex::decode(nonce_hex)
            .map_err(|_| CryptoError::Format("nonce is not valid hex".into()))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CryptoError::Format(format!(
                "nonce must be {NONCE_SIZE} bytes, got {}",
                nonce_bytes.len()
            )));
        }

        let tag_bytes = hex::decode(tag_hex)
            .map_err(|_| CryptoError::Format("tag is not valid hex".into()))?;
        if tag_bytes.len() != TAG_SIZE {
            return Err(CryptoError::Format(format!(
                "tag must be {TAG_SIZE} bytes, got {}",
                tag_bytes.len()
            )));
        }

        let ciphertext = hex::decode(ct_hex)
            .map_err(|_| CryptoError::Format("ciphertext is not valid hex".into()))?;

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&nonce_bytes);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&tag_bytes);

        Ok(Self {
            nonce,
            tag,
            ciphertext,
        })
    }

    /// Whether a stored value matches the envelope wire format.
    pub fn is_wire_format(wire: &str) -> bool {
        Self::parse(wire).is_ok()
    }
}

/// Which key candidate decrypted an envelope.
///
/// `Legacy(i)` means the i-th fallback key succeeded and the row should be
/// re-encrypted under the current key. Distinct from ordinary success, never
/// a silent fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyProvenance {
    /// Decrypted with the current process key.
    Current,
    /// Decrypted with the legacy key at this index (0-based within the
    /// legacy list).
    Legacy(usize),
}

/// Encrypts a payload, generating a fresh random nonce.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<Envelope> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

    // AEAD output is ciphertext || tag; split the tag off for the envelope.
    let mut buf = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::Encryption)?;
    let tag_vec = buf.split_off(buf.len() - TAG_SIZE);

    let mut nonce_arr = [0u8; NONCE_SIZE];
    nonce_arr.copy_from_slice(&nonce);
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&tag_vec);

    Ok(Envelope {
        nonce: nonce_arr,
        tag,
        ciphertext: buf,
    })
}

/// Decrypts an envelope, verifying the authentication tag.
///
/// Returns plaintext only if verification succeeds; a tag mismatch is
/// [`CryptoError::Decryption`] with no partial output.
pub fn decrypt(key: &DerivedKey, envelope: &Envelope) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut buf = Vec::with_capacity(envelope.ciphertext.len() + TAG_SIZE);
    buf.extend_from_slice(&envelope.ciphertext);
    buf.extend_from_slice(&envelope.tag);

    cipher
        .decrypt(Nonce::from_slice(&envelope.nonce), buf.as_ref())
        .map_err(|_| CryptoError::Decryption)
}

/// Tries the current key, then each legacy key in order, reporting which one
/// succeeded.
///
/// Callers use the provenance to schedule re-encryption of legacy rows;
/// the fallback chain is explicit rather than a silent recovery path.
pub fn decrypt_with_fallback(
    current: &DerivedKey,
    legacy: &[DerivedKey],
    envelope: &Envelope,
) -> CryptoResult<(Vec<u8>, KeyProvenance)> {
    if let Ok(plaintext) = decrypt(current, envelope) {
        return Ok((plaintext, KeyProvenance::Current));
    }
    for (i, key) in legacy.iter().enumerate() {
        if let Ok(plaintext) = decrypt(key, envelope) {
            return Ok((plaintext, KeyProvenance::Legacy(i)));
        }
    }
    Err(CryptoError::Decryption)
}
