//! Salt storage for key derivation.

use crate::error::StoreResult;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Persists per-key-id salts for the key derivation function.
///
/// Production implementations back this with a platform secure store.
/// Implementations must be safe for concurrent access by multiple
/// backends sharing one store.
pub trait SaltStorage: Send + Sync {
    /// Returns the salt stored for `key_id`, if any.
    fn get_salt(&self, key_id: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Stores (or replaces) the salt for `key_id`.
    fn store_salt(&self, key_id: &str, salt: &[u8]) -> StoreResult<()>;

    /// Returns true if a salt exists for `key_id`.
    fn has_salt(&self, key_id: &str) -> StoreResult<bool> {
        Ok(self.get_salt(key_id)?.is_some())
    }

    /// Removes the salt for `key_id`. Returns true if one existed.
    fn delete_salt(&self, key_id: &str) -> StoreResult<bool>;
}

/// In-memory reference implementation.
#[derive(Debug, Default)]
pub struct InMemorySaltStorage {
    salts: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemorySaltStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SaltStorage for InMemorySaltStorage {
    fn get_salt(&self, key_id: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.salts.read().get(key_id).cloned())
    }

    fn store_salt(&self, key_id: &str, salt: &[u8]) -> StoreResult<()> {
        self.salts.write().insert(key_id.to_owned(), salt.to_vec());
        Ok(())
    }

    fn delete_salt(&self, key_id: &str) -> StoreResult<bool> {
        Ok(self.salts.write().remove(key_id).is_some())
    }
}
