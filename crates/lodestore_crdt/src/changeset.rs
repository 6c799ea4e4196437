//! Changeset envelopes for peer merge.
//!
//! A changeset is a CBOR-encoded batch of stamped rows. Applying the
//! same changeset twice is a no-op because merge only accepts rows with
//! a strictly newer HLC than the local copy.

use crate::hlc::Hlc;
use lodestore_core::{FieldMap, StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One replicated row with its merge metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRow {
    /// The entity key in its JSON scalar form.
    pub key: Value,
    /// The entity's serialized fields. Retained for tombstones so a
    /// revival conflict can surface the last known value.
    pub fields: FieldMap,
    /// The row's HLC stamp.
    pub hlc: Hlc,
    /// The node that produced this version.
    pub node_id: Uuid,
    /// Wall-clock modification time, epoch milliseconds.
    pub modified: i64,
    /// Tombstone marker.
    pub is_deleted: bool,
}

/// A batch of rows from one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    /// The producing node.
    pub node_id: Uuid,
    /// Stamped rows, in no particular order.
    pub rows: Vec<ChangeRow>,
}

impl Changeset {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when the changeset carries no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Encodes the changeset to CBOR bytes.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| StoreError::validation(format!("changeset encode failed: {e}")))?;
        Ok(buf)
    }

    /// Decodes a changeset from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        ciborium::from_reader(bytes)
            .map_err(|e| StoreError::validation(format!("changeset decode failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Changeset {
        let mut fields = FieldMap::new();
        fields.insert("name".into(), json!("Alice"));
        fields.insert("age".into(), json!(30));

        Changeset {
            node_id: Uuid::new_v4(),
            rows: vec![ChangeRow {
                key: json!("u1"),
                fields,
                hlc: Hlc {
                    wall_ms: 1_700_000_000_000,
                    counter: 2,
                    node: Uuid::new_v4(),
                },
                node_id: Uuid::new_v4(),
                modified: 1_700_000_000_000,
                is_deleted: false,
            }],
        }
    }

    #[test]
    fn cbor_roundtrip() {
        let changeset = sample();
        let bytes = changeset.encode().unwrap();
        let decoded = Changeset::decode(&bytes).unwrap();
        assert_eq!(decoded, changeset);
    }

    #[test]
    fn tombstone_roundtrip() {
        let mut changeset = sample();
        changeset.rows[0].is_deleted = true;

        let decoded = Changeset::decode(&changeset.encode().unwrap()).unwrap();
        assert!(decoded.rows[0].is_deleted);
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(Changeset::decode(&[0xFF, 0x00, 0x13, 0x37]).is_err());
    }

    #[test]
    fn empty_changeset() {
        let changeset = Changeset {
            node_id: Uuid::new_v4(),
            rows: Vec::new(),
        };
        assert!(changeset.is_empty());
        assert_eq!(changeset.len(), 0);
        let decoded = Changeset::decode(&changeset.encode().unwrap()).unwrap();
        assert!(decoded.is_empty());
    }
}
