//! The replicated row store: stamped rows, tombstones, monotonic merge.

use crate::changeset::{ChangeRow, Changeset};
use crate::hlc::{epoch_ms, Hlc, HlcClock};
use lodestore_core::{EntityKey, FieldMap};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// One locally held row with its merge metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CrdtRow {
    /// The entity's serialized fields.
    pub fields: FieldMap,
    /// The row's HLC stamp.
    pub hlc: Hlc,
    /// The node that produced this version.
    pub node_id: Uuid,
    /// Wall-clock modification time, epoch milliseconds.
    pub modified: i64,
    /// Tombstone marker; tombstoned rows are invisible to reads.
    pub is_deleted: bool,
}

/// The outcome of merging one remote row.
#[derive(Debug, Clone)]
pub struct AppliedChange<K> {
    /// The affected key.
    pub key: K,
    /// The now-visible value (`None` when the merge left a tombstone).
    pub value: Option<FieldMap>,
    /// The value that was visible before the merge.
    pub previous: Option<FieldMap>,
    /// True when the merge revived a row the local store had tombstoned.
    pub revived_tombstone: bool,
}

/// A tombstoning, HLC-stamped row store with monotonic merge.
pub struct CrdtStore<K> {
    clock: HlcClock,
    rows: RwLock<HashMap<K, CrdtRow>>,
}

impl<K: EntityKey> CrdtStore<K> {
    /// Creates a store for the given node id.
    #[must_use]
    pub fn new(node: Uuid) -> Self {
        Self {
            clock: HlcClock::new(node),
            rows: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a store with a fresh random node id.
    #[must_use]
    pub fn with_random_node() -> Self {
        Self::new(Uuid::new_v4())
    }

    /// This store's node id.
    pub fn node_id(&self) -> Uuid {
        self.clock.node_id()
    }

    /// The highest stamp this store has produced or observed.
    pub fn latest_hlc(&self) -> Hlc {
        self.rows
            .read()
            .values()
            .map(|row| row.hlc)
            .max()
            .unwrap_or_else(Hlc::zero)
    }

    /// Returns the visible value for `key`; tombstones read as absent.
    pub fn get(&self, key: &K) -> Option<FieldMap> {
        self.rows
            .read()
            .get(key)
            .filter(|row| !row.is_deleted)
            .map(|row| row.fields.clone())
    }

    /// All visible rows.
    pub fn live_rows(&self) -> Vec<(K, FieldMap)> {
        self.rows
            .read()
            .iter()
            .filter(|(_, row)| !row.is_deleted)
            .map(|(key, row)| (key.clone(), row.fields.clone()))
            .collect()
    }

    /// Writes a row, stamping it with this node's clock. A write over a
    /// tombstone revives the entity.
    pub fn put(&self, key: K, fields: FieldMap) -> Hlc {
        let hlc = self.clock.now();
        self.rows.write().insert(
            key,
            CrdtRow {
                fields,
                hlc,
                node_id: self.node_id(),
                modified: epoch_ms() as i64,
                is_deleted: false,
            },
        );
        hlc
    }

    /// Tombstones a row instead of removing it. Returns true when a
    /// visible row existed.
    pub fn tombstone(&self, key: &K) -> bool {
        let hlc = self.clock.now();
        let mut rows = self.rows.write();
        match rows.get_mut(key) {
            Some(row) if !row.is_deleted => {
                row.is_deleted = true;
                row.hlc = hlc;
                row.node_id = self.node_id();
                row.modified = epoch_ms() as i64;
                true
            }
            Some(_) => false,
            None => {
                // Record the tombstone anyway so a stale remote create
                // cannot resurrect the entity.
                rows.insert(
                    key.clone(),
                    CrdtRow {
                        fields: FieldMap::new(),
                        hlc,
                        node_id: self.node_id(),
                        modified: epoch_ms() as i64,
                        is_deleted: true,
                    },
                );
                false
            }
        }
    }

    /// Rows stamped after `since`, packaged for a peer.
    pub fn changeset_since(&self, since: Option<Hlc>) -> Changeset {
        let floor = since.unwrap_or_else(Hlc::zero);
        let rows = self
            .rows
            .read()
            .iter()
            .filter(|(_, row)| row.hlc > floor)
            .map(|(key, row)| ChangeRow {
                key: key.to_value(),
                fields: row.fields.clone(),
                hlc: row.hlc,
                node_id: row.node_id,
                modified: row.modified,
                is_deleted: row.is_deleted,
            })
            .collect();
        Changeset {
            node_id: self.node_id(),
            rows,
        }
    }

    /// Merges a peer changeset.
    ///
    /// A remote row is applied iff its stamp is strictly newer than the
    /// local copy's, so merge is monotonic and idempotent. Returns the
    /// changes that became visible (or invisible) locally.
    pub fn apply(&self, changeset: &Changeset) -> Vec<AppliedChange<K>> {
        let mut applied = Vec::new();
        let mut rows = self.rows.write();

        for remote in &changeset.rows {
            let Some(key) = K::from_value(&remote.key) else {
                debug!(key = %remote.key, "skipping changeset row with foreign key shape");
                continue;
            };
            self.clock.observe(remote.hlc);

            let existing = rows.get(&key);
            let newer = existing.map_or(true, |local| remote.hlc > local.hlc);
            if !newer {
                continue;
            }

            let previous = existing
                .filter(|local| !local.is_deleted)
                .map(|local| local.fields.clone());
            let revived_tombstone =
                existing.is_some_and(|local| local.is_deleted) && !remote.is_deleted;

            rows.insert(
                key.clone(),
                CrdtRow {
                    fields: remote.fields.clone(),
                    hlc: remote.hlc,
                    node_id: remote.node_id,
                    modified: remote.modified,
                    is_deleted: remote.is_deleted,
                },
            );

            applied.push(AppliedChange {
                key,
                value: (!remote.is_deleted).then(|| remote.fields.clone()),
                previous,
                revived_tombstone,
            });
        }

        applied
    }
}
