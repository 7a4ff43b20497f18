//! Encryption and pseudonymization layer for Convault.
//!
//! Provides the three primitives the conversation store builds on:
//! - PBKDF2-HMAC-SHA256 key derivation from an operator secret
//! - ChaCha20-Poly1305 authenticated encryption with a textual envelope format
//! - SHA-256 one-way pseudonymization of real user identifiers
//!
//! # Architecture
//!
//! There is exactly one encryption domain: a single process-wide key derived
//! at startup from the operator secret and a fixed application salt. The
//! [`KeyManager`] owns that key; raw key bytes never leave this crate.
//!
//! Envelopes are self-describing (`hex(nonce):hex(tag):hex(ciphertext)`) so
//! a stored value either parses as a valid envelope or is rejected outright;
//! nothing ambiguous is ever handed back to a caller as if it decrypted.

mod cipher;
mod error;
mod key;
mod pseudonym;

pub use cipher::{
    decrypt, decrypt_with_fallback, encrypt, Envelope, KeyProvenance, NONCE_SIZE, TAG_SIZE,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{DerivedKey, KdfParams, KeyManager, Salt, KEY_SIZE, MIN_SECRET_LEN, SALT_SIZE};
pub use pseudonym::{integrity_token, pseudonymize, MAX_IDENTIFIER_LEN};
