//! Field-level encryption for lodestore.
//!
//! Configured fields are stored as opaque printable strings of the form
//! `enc:<version>:<base64(nonce || ciphertext || tag)>`, produced with an
//! AEAD (AES-256-GCM by default, ChaCha20-Poly1305 as the alternative).
//! Keys come from a caller-supplied provider, optionally run through
//! PBKDF2 with salts resolved from a [`SaltStorage`]. Key material is
//! zeroized when cleared or dropped.

mod field;
mod kdf;
mod salt;

pub use field::FieldEncryptor;
pub use kdf::{
    derive_pbkdf2, derive_raw, DerivedKey, KdfAlgorithm, KeyDerivationMode, Pbkdf2Params,
    DEFAULT_ITERATIONS, DEFAULT_KEY_LENGTH, DEFAULT_SALT_LENGTH, MIN_ITERATIONS,
};
pub use salt::{InMemorySaltStorage, SaltStorage};

use crate::error::StoreResult;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Supplies the raw key or password bytes on demand.
pub type KeyProvider = Arc<dyn Fn() -> StoreResult<Vec<u8>> + Send + Sync>;

/// Wraps a fixed secret as a [`KeyProvider`].
pub fn static_key_provider(secret: impl Into<Vec<u8>>) -> KeyProvider {
    let secret = secret.into();
    Arc::new(move || Ok(secret.clone()))
}

/// The AEAD used for field encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionAlgorithm {
    /// AES-256-GCM.
    #[default]
    Aes256Gcm,
    /// ChaCha20-Poly1305.
    ChaCha20Poly1305,
}

/// Field-level encryption settings.
#[derive(Clone)]
pub struct FieldEncryptionConfig {
    /// Names of the fields to encrypt.
    pub fields: HashSet<String>,
    /// Key or password source.
    pub key_provider: KeyProvider,
    /// The AEAD.
    pub algorithm: EncryptionAlgorithm,
    /// Version token embedded in ciphertexts; controls key selection on
    /// decryption. Must match `[A-Za-z0-9][A-Za-z0-9._-]*`.
    pub version: String,
    /// Optional derivation applied to the provider's bytes.
    pub key_derivation: Option<KeyDerivationMode>,
    /// Salt store for PBKDF2 derivation. Defaults to in-memory.
    pub salt_storage: Option<Arc<dyn SaltStorage>>,
}

impl FieldEncryptionConfig {
    /// Creates a config with the default algorithm and no derivation.
    pub fn new(
        fields: impl IntoIterator<Item = impl Into<String>>,
        key_provider: KeyProvider,
        version: impl Into<String>,
    ) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            key_provider,
            algorithm: EncryptionAlgorithm::default(),
            version: version.into(),
            key_derivation: None,
            salt_storage: None,
        }
    }

    /// Selects the AEAD.
    #[must_use]
    pub fn algorithm(mut self, algorithm: EncryptionAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Applies a key derivation mode.
    #[must_use]
    pub fn key_derivation(mut self, mode: KeyDerivationMode) -> Self {
        self.key_derivation = Some(mode);
        self
    }

    /// Uses the given salt store instead of the in-memory default.
    #[must_use]
    pub fn salt_storage(mut self, storage: Arc<dyn SaltStorage>) -> Self {
        self.salt_storage = Some(storage);
        self
    }
}

impl fmt::Debug for FieldEncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldEncryptionConfig")
            .field("fields", &self.fields)
            .field("algorithm", &self.algorithm)
            .field("version", &self.version)
            .field("key_derivation", &self.key_derivation)
            .field("key_provider", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// How a store encrypts its data.
#[derive(Debug, Clone, Default)]
pub enum EncryptionConfig {
    /// No encryption.
    #[default]
    None,
    /// Whole-database encryption, opaque to the core: the provider and
    /// KDF iteration hint are passed through to the backend.
    DatabaseLevel {
        /// Key source handed to the backend.
        key_provider: DebugRedactedProvider,
        /// KDF iteration hint handed to the backend.
        kdf_iterations: u32,
    },
    /// Per-field encryption applied by the core.
    FieldLevel(FieldEncryptionConfig),
}

/// A [`KeyProvider`] newtype whose `Debug` output is redacted.
#[derive(Clone)]
pub struct DebugRedactedProvider(pub KeyProvider);

impl fmt::Debug for DebugRedactedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Validates a ciphertext version token: `[A-Za-z0-9][A-Za-z0-9._-]*`.
pub fn is_valid_version_token(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_token_validation() {
        assert!(is_valid_version_token("v1"));
        assert!(is_valid_version_token("2024.1_beta-3"));
        assert!(is_valid_version_token("V"));
        assert!(!is_valid_version_token(""));
        assert!(!is_valid_version_token("-v1"));
        assert!(!is_valid_version_token("v:1"));
        assert!(!is_valid_version_token("v 1"));
    }

    #[test]
    fn config_debug_redacts_provider() {
        let config = FieldEncryptionConfig::new(
            ["ssn"],
            static_key_provider(b"secret".to_vec()),
            "v1",
        );
        let debugged = format!("{config:?}");
        assert!(debugged.contains("REDACTED"));
        assert!(!debugged.contains("secret"));
    }
}
