//! Key derivation: PBKDF2 (HMAC-SHA-256/512) and raw coercion.

use crate::crypto::salt::SaltStorage;
use crate::error::{StoreError, StoreResult};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Sha256, Sha512};
use zeroize::Zeroize;

/// Minimum accepted PBKDF2 iteration count.
pub const MIN_ITERATIONS: u32 = 100_000;

/// Default PBKDF2 iteration count.
pub const DEFAULT_ITERATIONS: u32 = 310_000;

/// Default derived key length in bytes.
pub const DEFAULT_KEY_LENGTH: usize = 32;

/// Default generated salt length in bytes.
pub const DEFAULT_SALT_LENGTH: usize = 16;

/// The PRF used inside PBKDF2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfAlgorithm {
    /// PBKDF2 with HMAC-SHA-256.
    HmacSha256,
    /// PBKDF2 with HMAC-SHA-512.
    HmacSha512,
}

impl KdfAlgorithm {
    fn id(self) -> &'static str {
        match self {
            KdfAlgorithm::HmacSha256 => "pbkdf2-hmac-sha256",
            KdfAlgorithm::HmacSha512 => "pbkdf2-hmac-sha512",
        }
    }
}

/// PBKDF2 parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pbkdf2Params {
    /// Iteration count; at least [`MIN_ITERATIONS`].
    pub iterations: u32,
    /// The PRF.
    pub algorithm: KdfAlgorithm,
    /// Derived key length in bytes.
    pub key_length: usize,
    /// Length of a generated salt in bytes.
    pub salt_length: usize,
}

impl Default for Pbkdf2Params {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            algorithm: KdfAlgorithm::HmacSha256,
            key_length: DEFAULT_KEY_LENGTH,
            salt_length: DEFAULT_SALT_LENGTH,
        }
    }
}

/// How the field encryptor turns the provider's secret into key bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyDerivationMode {
    /// No derivation: coerce the password UTF-8 bytes into exactly 32
    /// bytes (left-pad with zeros if shorter, truncate if longer).
    Raw,
    /// PBKDF2 with the given parameters; the salt is resolved through
    /// the salt store under `key_id`.
    Pbkdf2 {
        /// Salt-store lookup key.
        key_id: String,
        /// Derivation parameters.
        params: Pbkdf2Params,
    },
}

/// A derived key with its provenance.
///
/// Call [`DerivedKey::dispose`] when done; the key bytes are zeroed in
/// place (and again on drop).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKey {
    key_bytes: Vec<u8>,
    /// The salt used, empty for raw mode.
    pub salt: Vec<u8>,
    /// Algorithm identifier, e.g. `"pbkdf2-hmac-sha256"` or `"raw"`.
    pub algorithm: String,
    /// The parameters used, when PBKDF2 was applied.
    pub params: Option<Pbkdf2Params>,
}

impl DerivedKey {
    /// The derived key bytes.
    pub fn key_bytes(&self) -> &[u8] {
        &self.key_bytes
    }

    /// Zeroes the key bytes in place. Length is preserved.
    pub fn dispose(&mut self) {
        self.key_bytes.as_mut_slice().zeroize();
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.key_bytes.as_mut_slice().zeroize();
    }
}

/// Derives a key from `password` with PBKDF2.
///
/// Salt resolution: a supplied salt is used as-is; otherwise the store
/// is consulted under `key_id`, and when it has none a fresh random salt
/// is generated and persisted there.
///
/// # Errors
///
/// Fails with a validation error when the iteration count is below
/// [`MIN_ITERATIONS`].
pub fn derive_pbkdf2(
    password: &[u8],
    salt: Option<&[u8]>,
    key_id: &str,
    params: &Pbkdf2Params,
    salt_store: &dyn SaltStorage,
) -> StoreResult<DerivedKey> {
    if params.iterations < MIN_ITERATIONS {
        return Err(StoreError::validation(format!(
            "PBKDF2 iterations {} below minimum {MIN_ITERATIONS}",
            params.iterations
        )));
    }

    let salt: Vec<u8> = match salt {
        Some(salt) => salt.to_vec(),
        None => match salt_store.get_salt(key_id)? {
            Some(stored) => stored,
            None => {
                let mut fresh = vec![0u8; params.salt_length];
                rand::thread_rng().fill_bytes(&mut fresh);
                salt_store.store_salt(key_id, &fresh)?;
                fresh
            }
        },
    };

    let mut key_bytes = vec![0u8; params.key_length];
    match params.algorithm {
        KdfAlgorithm::HmacSha256 => {
            pbkdf2_hmac::<Sha256>(password, &salt, params.iterations, &mut key_bytes);
        }
        KdfAlgorithm::HmacSha512 => {
            pbkdf2_hmac::<Sha512>(password, &salt, params.iterations, &mut key_bytes);
        }
    }

    Ok(DerivedKey {
        key_bytes,
        salt,
        algorithm: params.algorithm.id().to_owned(),
        params: Some(*params),
    })
}

/// Coerces `password` UTF-8 bytes into exactly 32 key bytes without
/// derivation: left-padded with zeros if shorter, truncated if longer.
pub fn derive_raw(password: &[u8]) -> DerivedKey {
    let mut key_bytes = vec![0u8; 32];
    if password.len() >= 32 {
        key_bytes.copy_from_slice(&password[..32]);
    } else {
        key_bytes[32 - password.len()..].copy_from_slice(password);
    }

    DerivedKey {
        key_bytes,
        salt: Vec::new(),
        algorithm: "raw".to_owned(),
        params: None,
    }
}
