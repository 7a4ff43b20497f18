//! Key derivation and in-memory key handling.
//!
//! One key per process: derived at startup from an operator secret and the
//! fixed application salt via PBKDF2-HMAC-SHA256. The iteration count is
//! configurable but defaults high enough to make offline brute force of a
//! leaked database impractical.

use crate::error::{CryptoError, CryptoResult};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a derived key in bytes (256-bit).
pub const KEY_SIZE: usize = 32;

/// Size of a KDF salt in bytes.
pub const SALT_SIZE: usize = 16;

/// Minimum accepted operator secret length. Anything shorter is treated as a
/// misconfiguration, not a weak-but-usable key.
pub const MIN_SECRET_LEN: usize = 16;

/// Default PBKDF2 iteration count.
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

/// Fixed application salt. The encryption domain is single-tenant, so a
/// compiled-in domain-separated salt is sufficient; the secret carries the
/// entropy.
const APPLICATION_SALT: [u8; SALT_SIZE] = *b"convault-store-1";

/// KDF salt newtype.
#[derive(Clone, Copy, Debug)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// The fixed application salt used for the process-wide key.
    pub fn application() -> Self {
        Self(APPLICATION_SALT)
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

/// PBKDF2 parameters.
#[derive(Clone, Copy, Debug)]
pub struct KdfParams {
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

/// An opaque 256-bit derived key.
///
/// Byte access is restricted to this crate; consumers route every
/// encrypt/decrypt call through the free functions in [`crate::cipher`].
/// Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_SIZE]);

impl DerivedKey {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        f.write_str("DerivedKey(..)")
    }
}

/// Derives a key from a secret and salt.
fn derive_key(secret: &str, salt: &Salt, params: &KdfParams) -> CryptoResult<DerivedKey> {
    if params.iterations == 0 {
        return Err(CryptoError::Configuration(
            "KDF iteration count must be non-zero".into(),
        ));
    }
    let mut out = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt.as_bytes(), params.iterations, &mut out);
    Ok(DerivedKey(out))
}

/// Owns the process-wide encryption key.
///
/// Constructed once at startup and injected into the store; there is no
/// ambient singleton. Read-only after construction, so shared access needs
/// no locking.
pub struct KeyManager {
    key: DerivedKey,
}

impl KeyManager {
    /// Derives the process key from the operator secret.
    ///
    /// Fails with [`CryptoError::Configuration`] when the secret is empty or
    /// shorter than [`MIN_SECRET_LEN`].
    pub fn from_secret(secret: &str, params: &KdfParams) -> CryptoResult<Self> {
        if secret.is_empty() {
            return Err(CryptoError::Configuration(
                "encryption secret is not set".into(),
            ));
        }
        if secret.len() < MIN_SECRET_LEN {
            return Err(CryptoError::Configuration(format!(
                "encryption secret too short (min {MIN_SECRET_LEN} characters)"
            )));
        }
        let key = derive_key(secret, &Salt::application(), params)?;
        Ok(Self { key })
    }

    /// The derived process key.
    pub fn key(&self) -> &DerivedKey {
        &self.key
    }
}
