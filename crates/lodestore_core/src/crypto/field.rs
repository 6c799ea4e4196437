//! The field-level encryptor.

use crate::crypto::kdf::{derive_pbkdf2, derive_raw, KeyDerivationMode};
use crate::crypto::salt::{InMemorySaltStorage, SaltStorage};
use crate::crypto::{
    is_valid_version_token, EncryptionAlgorithm, FieldEncryptionConfig, KeyProvider,
};
use crate::entity::FieldMap;
use crate::error::{EncryptionFailure, StoreError, StoreResult};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use chacha20poly1305::ChaCha20Poly1305;
use parking_lot::Mutex;
use rand::RngCore;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Size of the AEAD nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the authentication tag in bytes.
pub const TAG_SIZE: usize = 16;
/// Size of the cipher key in bytes.
pub const KEY_SIZE: usize = 32;

/// Prefix marking an encrypted value.
const ENC_PREFIX: &str = "enc:";

enum CipherKind {
    Aes(Box<Aes256Gcm>),
    ChaCha(Box<ChaCha20Poly1305>),
}

impl CipherKind {
    fn encrypt(&self, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, aes_gcm::aead::Error> {
        match self {
            CipherKind::Aes(cipher) => cipher.encrypt(Nonce::from_slice(nonce), plaintext),
            CipherKind::ChaCha(cipher) => {
                cipher.encrypt(chacha20poly1305::Nonce::from_slice(nonce), plaintext)
            }
        }
    }

    fn decrypt(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, aes_gcm::aead::Error> {
        match self {
            CipherKind::Aes(cipher) => cipher.decrypt(Nonce::from_slice(nonce), ciphertext),
            CipherKind::ChaCha(cipher) => {
                cipher.decrypt(chacha20poly1305::Nonce::from_slice(nonce), ciphertext)
            }
        }
    }
}

/// Encrypts and decrypts configured fields as opaque printable strings.
///
/// The cipher is built lazily from the key provider on first use and
/// cached until [`FieldEncryptor::clear_cache`] (key rotation, close).
pub struct FieldEncryptor {
    fields: HashSet<String>,
    key_provider: KeyProvider,
    algorithm: EncryptionAlgorithm,
    version: String,
    key_derivation: Option<KeyDerivationMode>,
    salt_storage: Arc<dyn SaltStorage>,
    cipher: Mutex<Option<CipherKind>>,
}

impl FieldEncryptor {
    /// Builds an encryptor from the configuration.
    ///
    /// # Errors
    ///
    /// Fails when the version token is not a valid `enc:` version.
    pub fn new(config: FieldEncryptionConfig) -> StoreResult<Self> {
        if !is_valid_version_token(&config.version) {
            return Err(StoreError::encryption(
                EncryptionFailure::Format,
                format!("invalid version token: {:?}", config.version),
            ));
        }
        Ok(Self {
            fields: config.fields,
            key_provider: config.key_provider,
            algorithm: config.algorithm,
            version: config.version,
            key_derivation: config.key_derivation,
            salt_storage: config
                .salt_storage
                .unwrap_or_else(|| Arc::new(InMemorySaltStorage::new())),
            cipher: Mutex::new(None),
        })
    }

    /// The version token embedded in produced ciphertexts.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns true when `field` is configured for encryption.
    pub fn is_encrypted_field(&self, field: &str) -> bool {
        self.fields.contains(field)
    }

    /// Encrypts `plaintext` for `field`.
    ///
    /// A no-op returning the input unchanged when the field is not
    /// configured for encryption.
    pub fn encrypt(&self, plaintext: &str, field: &str) -> StoreResult<String> {
        if !self.fields.contains(field) {
            return Ok(plaintext.to_owned());
        }

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self.with_cipher(|cipher| {
            cipher.encrypt(&nonce, plaintext.as_bytes()).map_err(|_| {
                StoreError::encryption(EncryptionFailure::Format, "encryption failed")
            })
        })?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);

        Ok(format!(
            "{ENC_PREFIX}{}:{}",
            self.version,
            STANDARD.encode(combined)
        ))
    }

    /// Decrypts `value` for `field`.
    ///
    /// A no-op when the value lacks the `enc:` prefix: decryption is
    /// idempotent on plaintext input.
    ///
    /// # Errors
    ///
    /// Version mismatch, authentication failure, and malformed
    /// ciphertexts each fail with the corresponding encryption error.
    pub fn decrypt(&self, value: &str, _field: &str) -> StoreResult<String> {
        if !value.starts_with(ENC_PREFIX) {
            return Ok(value.to_owned());
        }

        let mut parts = value.splitn(3, ':');
        let (_, version, payload) = match (parts.next(), parts.next(), parts.next()) {
            (Some(prefix), Some(version), Some(payload)) if prefix == "enc" => {
                (prefix, version, payload)
            }
            _ => {
                return Err(StoreError::encryption(
                    EncryptionFailure::Format,
                    "ciphertext is not of the form enc:<version>:<base64>",
                ))
            }
        };

        if version != self.version {
            return Err(StoreError::encryption(
                EncryptionFailure::VersionMismatch,
                format!("ciphertext version {version:?}, expected {:?}", self.version),
            ));
        }

        let combined = STANDARD
            .decode(payload)
            .or_else(|_| URL_SAFE.decode(payload))
            .map_err(|_| {
                StoreError::encryption(EncryptionFailure::Format, "invalid base64 payload")
            })?;

        if combined.len() < NONCE_SIZE + TAG_SIZE {
            return Err(StoreError::encryption(
                EncryptionFailure::Format,
                "ciphertext too short",
            ));
        }

        let (nonce, ciphertext) = combined.split_at(NONCE_SIZE);
        let plaintext = self.with_cipher(|cipher| {
            cipher.decrypt(nonce, ciphertext).map_err(|_| {
                StoreError::encryption(EncryptionFailure::AuthFailure, "authentication failed")
            })
        })?;

        String::from_utf8(plaintext).map_err(|_| {
            StoreError::encryption(EncryptionFailure::Format, "plaintext is not UTF-8")
        })
    }

    /// Applies [`FieldEncryptor::encrypt`] to every eligible entry.
    ///
    /// Non-string values are coerced to their JSON string form before
    /// encryption; null values are left untouched.
    pub fn encrypt_fields(&self, map: &FieldMap) -> StoreResult<FieldMap> {
        let mut result = map.clone();
        for field in &self.fields {
            let Some(value) = map.get(field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let plaintext = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            result.insert(field.clone(), Value::String(self.encrypt(&plaintext, field)?));
        }
        Ok(result)
    }

    /// Applies [`FieldEncryptor::decrypt`] to every eligible entry.
    pub fn decrypt_fields(&self, map: &FieldMap) -> StoreResult<FieldMap> {
        let mut result = map.clone();
        for field in &self.fields {
            let Some(Value::String(text)) = map.get(field) else {
                continue;
            };
            result.insert(field.clone(), Value::String(self.decrypt(text, field)?));
        }
        Ok(result)
    }

    /// Drops the cached cipher and key material.
    ///
    /// Called on key rotation or close; the next operation rebuilds the
    /// cipher from the provider.
    pub fn clear_cache(&self) {
        *self.cipher.lock() = None;
    }

    fn with_cipher<R>(&self, f: impl FnOnce(&CipherKind) -> StoreResult<R>) -> StoreResult<R> {
        let mut guard = self.cipher.lock();
        if guard.is_none() {
            *guard = Some(self.build_cipher()?);
        }
        match guard.as_ref() {
            Some(cipher) => f(cipher),
            None => Err(StoreError::encryption(
                EncryptionFailure::Format,
                "cipher unavailable",
            )),
        }
    }

    fn build_cipher(&self) -> StoreResult<CipherKind> {
        let raw = Zeroizing::new((self.key_provider)()?);

        let key = Zeroizing::new(match &self.key_derivation {
            Some(KeyDerivationMode::Raw) => derive_raw(&raw).key_bytes().to_vec(),
            Some(KeyDerivationMode::Pbkdf2 { key_id, params }) => {
                derive_pbkdf2(&raw, None, key_id, params, &*self.salt_storage)?
                    .key_bytes()
                    .to_vec()
            }
            None => normalize_key(&raw),
        });

        match self.algorithm {
            EncryptionAlgorithm::Aes256Gcm => Aes256Gcm::new_from_slice(&key)
                .map(|c| CipherKind::Aes(Box::new(c)))
                .map_err(|_| {
                    StoreError::encryption(EncryptionFailure::Format, "invalid key length")
                }),
            EncryptionAlgorithm::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(&key)
                .map(|c| CipherKind::ChaCha(Box::new(c)))
                .map_err(|_| {
                    StoreError::encryption(EncryptionFailure::Format, "invalid key length")
                }),
        }
    }
}

/// Coerces provider bytes to exactly [`KEY_SIZE`]: shorter keys are
/// SHA-256-hashed, longer keys truncated.
fn normalize_key(raw: &[u8]) -> Vec<u8> {
    if raw.len() == KEY_SIZE {
        raw.to_vec()
    } else if raw.len() < KEY_SIZE {
        Sha256::digest(raw).to_vec()
    } else {
        raw[..KEY_SIZE].to_vec()
    }
}

impl fmt::Debug for FieldEncryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldEncryptor")
            .field("fields", &self.fields)
            .field("algorithm", &self.algorithm)
            .field("version", &self.version)
            .field("key", &"[REDACTED]")
            .finish()
    }
}
