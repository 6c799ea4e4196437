//! The entity seam: keys, field maps, and the adapter closures.
//!
//! Entities are opaque to the core. They cross the boundary as a typed
//! value `T` plus three closures supplied at construction: an id
//! extractor and a `to_map`/`from_map` pair that serialize the entity to
//! a string-keyed map of JSON scalars. Backends never look inside `T`
//! except through these closures.

use crate::error::StoreResult;
use serde_json::Value;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// The serialized form of an entity: string keys to JSON scalar values
/// (strings, integers, floats, booleans, null, and nested maps/lists).
pub type FieldMap = serde_json::Map<String, Value>;

/// A key type usable as an entity identifier.
///
/// Keys must round-trip through a JSON scalar so that backends can bind
/// them as query parameters and carry them inside changesets.
pub trait EntityKey:
    Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static
{
    /// Converts the key to its JSON scalar form.
    fn to_value(&self) -> Value;

    /// Reconstructs a key from its JSON scalar form.
    ///
    /// Returns `None` if the value does not represent a key of this type.
    fn from_value(value: &Value) -> Option<Self>;
}

impl EntityKey for String {
    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl EntityKey for i64 {
    fn to_value(&self) -> Value {
        Value::from(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl EntityKey for uuid::Uuid {
    fn to_value(&self) -> Value {
        Value::String(self.to_string())
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().and_then(|s| uuid::Uuid::parse_str(s).ok())
    }
}

/// The construction-time bridge between a typed entity and its map form.
///
/// Cloning is cheap; the closures are shared.
pub struct EntityAdapter<T, K> {
    id_of: Arc<dyn Fn(&T) -> K + Send + Sync>,
    to_map: Arc<dyn Fn(&T) -> FieldMap + Send + Sync>,
    from_map: Arc<dyn Fn(&FieldMap) -> StoreResult<T> + Send + Sync>,
}

impl<T, K> Clone for EntityAdapter<T, K> {
    fn clone(&self) -> Self {
        Self {
            id_of: Arc::clone(&self.id_of),
            to_map: Arc::clone(&self.to_map),
            from_map: Arc::clone(&self.from_map),
        }
    }
}

impl<T, K> EntityAdapter<T, K> {
    /// Creates an adapter from the three closures.
    pub fn new(
        id_of: impl Fn(&T) -> K + Send + Sync + 'static,
        to_map: impl Fn(&T) -> FieldMap + Send + Sync + 'static,
        from_map: impl Fn(&FieldMap) -> StoreResult<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id_of: Arc::new(id_of),
            to_map: Arc::new(to_map),
            from_map: Arc::new(from_map),
        }
    }

    /// Extracts the entity's key.
    pub fn id_of(&self, item: &T) -> K {
        (self.id_of)(item)
    }

    /// Serializes the entity to its field-map form.
    pub fn to_map(&self, item: &T) -> FieldMap {
        (self.to_map)(item)
    }

    /// Reconstructs an entity from its field-map form.
    pub fn from_map(&self, map: &FieldMap) -> StoreResult<T> {
        (self.from_map)(map)
    }
}

impl<T, K> fmt::Debug for EntityAdapter<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityAdapter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    struct User {
        id: String,
        name: String,
        age: i64,
    }

    fn user_adapter() -> EntityAdapter<User, String> {
        EntityAdapter::new(
            |u: &User| u.id.clone(),
            |u: &User| {
                let mut map = FieldMap::new();
                map.insert("id".into(), json!(u.id));
                map.insert("name".into(), json!(u.name));
                map.insert("age".into(), json!(u.age));
                map
            },
            |map: &FieldMap| {
                let id = map
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| StoreError::validation("missing id"))?
                    .to_owned();
                let name = map
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                let age = map.get("age").and_then(Value::as_i64).unwrap_or(0);
                Ok(User { id, name, age })
            },
        )
    }

    #[test]
    fn adapter_roundtrip() {
        let adapter = user_adapter();
        let user = User {
            id: "u1".into(),
            name: "Alice".into(),
            age: 30,
        };

        assert_eq!(adapter.id_of(&user), "u1");
        let map = adapter.to_map(&user);
        let back = adapter.from_map(&map).unwrap();
        assert_eq!(back, user);
    }

    #[test]
    fn from_map_missing_id_fails() {
        let adapter = user_adapter();
        let map = FieldMap::new();
        assert!(adapter.from_map(&map).is_err());
    }

    #[test]
    fn key_value_roundtrip() {
        let s = String::from("k1");
        assert_eq!(String::from_value(&s.to_value()), Some(s));

        let n = 42i64;
        assert_eq!(i64::from_value(&n.to_value()), Some(n));

        let u = uuid::Uuid::new_v4();
        assert_eq!(uuid::Uuid::from_value(&u.to_value()), Some(u));

        assert_eq!(i64::from_value(&Value::String("nope".into())), None);
    }
}
