//! The narrow remote-client contract and its in-memory double.
//!
//! The backend only ever talks to the remote through [`RecordClient`];
//! concrete wire protocols are adapters behind it. The in-memory client
//! is both the reference semantics and the test transport, and it can be
//! switched offline to exercise the pending-change path.

use crate::realtime::{RealtimeChannel, RecordEvent};
use crate::translator::RecordQuery;
use async_trait::async_trait;
use lodestore_core::{FieldMap, StoreError};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

/// A remote failure before taxonomy mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// HTTP-ish status code, absent for transport-level failures.
    pub status: Option<u16>,
    /// Remote error code (e.g. `"23505"` for a unique violation).
    pub code: Option<String>,
    /// Human-readable message.
    pub message: String,
}

impl RemoteError {
    /// A transport-level failure (host unreachable).
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// A failure with a status code.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: None,
            message: message.into(),
        }
    }

    /// Attaches a remote error code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Maps a remote failure onto the store error taxonomy.
///
/// Constraint codes become validation errors; invalid credentials and
/// permission denials become the non-retryable auth kinds; timeouts map
/// to timeout; a missing status is a network failure; everything else
/// is a retryable sync error.
pub fn map_remote_error(error: RemoteError) -> StoreError {
    if let Some(code) = &error.code {
        match code.as_str() {
            // Unique and foreign-key violations.
            "23505" | "23503" => return StoreError::validation(error.message),
            "invalid_token" | "jwt_expired" => {
                return StoreError::authentication(error.message)
            }
            "permission_denied" => return StoreError::authorization(error.message),
            _ => {}
        }
    }
    match error.status {
        None => StoreError::network(error.message),
        Some(401) => StoreError::authentication(error.message),
        Some(403) => StoreError::authorization(error.message),
        Some(408) | Some(504) => StoreError::timeout(error.message),
        Some(409) => StoreError::validation(error.message),
        Some(_) => StoreError::sync(error.message),
    }
}

/// The record-store operations the backend needs.
#[async_trait]
pub trait RecordClient: Send + Sync {
    /// Selects rows from `table`.
    async fn select(&self, table: &str, query: &RecordQuery)
        -> Result<Vec<FieldMap>, RemoteError>;

    /// Upserts rows into `table`, returning them as stored.
    async fn upsert(&self, table: &str, rows: Vec<FieldMap>)
        -> Result<Vec<FieldMap>, RemoteError>;

    /// Deletes matching rows from `table`, returning the count removed.
    async fn delete(&self, table: &str, query: &RecordQuery) -> Result<u64, RemoteError>;
}

/// An in-memory record store.
///
/// Mutations publish realtime events on the attached channel, the way a
/// real record store pushes INSERT/UPDATE/DELETE notifications.
pub struct MemoryRecordClient {
    key_column: String,
    tables: RwLock<HashMap<String, Vec<FieldMap>>>,
    channel: RealtimeChannel,
    offline: RwLock<bool>,
    fail_next_upsert: RwLock<Option<RemoteError>>,
}

impl MemoryRecordClient {
    /// Creates an empty store keyed by the `"id"` column.
    #[must_use]
    pub fn new() -> Self {
        Self::with_key_column("id")
    }

    /// Creates an empty store keyed by the given column.
    pub fn with_key_column(key_column: impl Into<String>) -> Self {
        Self {
            key_column: key_column.into(),
            tables: RwLock::new(HashMap::new()),
            channel: RealtimeChannel::new(),
            offline: RwLock::new(false),
            fail_next_upsert: RwLock::new(None),
        }
    }

    /// The realtime channel fed by this store's mutations.
    pub fn channel(&self) -> RealtimeChannel {
        self.channel.clone()
    }

    /// Simulates losing (or regaining) the network.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.write() = offline;
    }

    /// Makes the next `upsert` fail with the given error.
    pub fn fail_next_upsert(&self, error: RemoteError) {
        *self.fail_next_upsert.write() = Some(error);
    }

    /// Seeds a row without publishing an event.
    pub fn seed(&self, table: &str, row: FieldMap) {
        self.tables.write().entry(table.to_owned()).or_default().push(row);
    }

    /// Direct snapshot of a table, for assertions.
    pub fn rows(&self, table: &str) -> Vec<FieldMap> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if *self.offline.read() {
            Err(RemoteError::network("remote unreachable"))
        } else {
            Ok(())
        }
    }

    fn key_of(&self, row: &FieldMap) -> Option<Value> {
        row.get(&self.key_column).cloned()
    }
}

impl Default for MemoryRecordClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordClient for MemoryRecordClient {
    async fn select(
        &self,
        table: &str,
        query: &RecordQuery,
    ) -> Result<Vec<FieldMap>, RemoteError> {
        self.check_online()?;
        Ok(query.apply(self.rows(table)))
    }

    async fn upsert(
        &self,
        table: &str,
        rows: Vec<FieldMap>,
    ) -> Result<Vec<FieldMap>, RemoteError> {
        self.check_online()?;
        if let Some(error) = self.fail_next_upsert.write().take() {
            return Err(error);
        }
        let mut tables = self.tables.write();
        let stored = tables.entry(table.to_owned()).or_default();

        for row in &rows {
            let key = self.key_of(row).ok_or_else(|| {
                RemoteError::status(409, "row is missing its key column").with_code("23502")
            })?;
            let existing = stored
                .iter_mut()
                .find(|candidate| candidate.get(&self.key_column) == Some(&key));
            match existing {
                Some(slot) => {
                    *slot = row.clone();
                    self.channel.publish(RecordEvent::update(table, row.clone()));
                }
                None => {
                    stored.push(row.clone());
                    self.channel.publish(RecordEvent::insert(table, row.clone()));
                }
            }
        }
        Ok(rows)
    }

    async fn delete(&self, table: &str, query: &RecordQuery) -> Result<u64, RemoteError> {
        self.check_online()?;
        let mut tables = self.tables.write();
        let Some(stored) = tables.get_mut(table) else {
            return Ok(0);
        };

        let (removed, kept): (Vec<FieldMap>, Vec<FieldMap>) =
            stored.drain(..).partition(|row| query.matches(row));
        *stored = kept;

        for row in &removed {
            self.channel.publish(RecordEvent::delete(table, row.clone()));
        }
        Ok(removed.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::RecordEventKind;
    use serde_json::json;

    fn row(id: &str, name: &str) -> FieldMap {
        let mut map = FieldMap::new();
        map.insert("id".into(), json!(id));
        map.insert("name".into(), json!(name));
        map
    }

    #[tokio::test]
    async fn upsert_select_delete() {
        let client = MemoryRecordClient::new();
        client.upsert("users", vec![row("a", "Alice")]).await.unwrap();
        client.upsert("users", vec![row("a", "Alice v2"), row("b", "Bob")])
            .await
            .unwrap();

        let all = client.select("users", &RecordQuery::all()).await.unwrap();
        assert_eq!(all.len(), 2);

        let one = client
            .select("users", &RecordQuery::by_key("id", json!("a")))
            .await
            .unwrap();
        assert_eq!(one[0].get("name"), Some(&json!("Alice v2")));

        let removed = client
            .delete("users", &RecordQuery::by_key("id", json!("a")))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(client.rows("users").len(), 1);
    }

    #[tokio::test]
    async fn offline_fails_with_network_error() {
        let client = MemoryRecordClient::new();
        client.set_offline(true);

        let err = client
            .select("users", &RecordQuery::all())
            .await
            .unwrap_err();
        assert!(err.status.is_none());
        assert!(matches!(
            map_remote_error(err),
            StoreError::Network { .. }
        ));
    }

    #[tokio::test]
    async fn mutations_publish_events() {
        let client = MemoryRecordClient::new();
        let mut sub = client.channel().subscribe();

        client.upsert("users", vec![row("a", "Alice")]).await.unwrap();
        assert_eq!(
            sub.recv().await.unwrap().unwrap().kind,
            RecordEventKind::Insert
        );

        client.upsert("users", vec![row("a", "Alice v2")]).await.unwrap();
        assert_eq!(
            sub.recv().await.unwrap().unwrap().kind,
            RecordEventKind::Update
        );

        client
            .delete("users", &RecordQuery::by_key("id", json!("a")))
            .await
            .unwrap();
        assert_eq!(
            sub.recv().await.unwrap().unwrap().kind,
            RecordEventKind::Delete
        );
    }

    #[test]
    fn error_mapping() {
        assert!(matches!(
            map_remote_error(RemoteError::network("down")),
            StoreError::Network { .. }
        ));
        assert!(matches!(
            map_remote_error(RemoteError::status(401, "expired")),
            StoreError::Authentication { .. }
        ));
        assert!(matches!(
            map_remote_error(RemoteError::status(403, "nope")),
            StoreError::Authorization { .. }
        ));
        assert!(matches!(
            map_remote_error(RemoteError::status(408, "slow")),
            StoreError::Timeout { .. }
        ));
        assert!(matches!(
            map_remote_error(RemoteError::status(409, "dup").with_code("23505")),
            StoreError::Validation { .. }
        ));
        assert!(matches!(
            map_remote_error(RemoteError::status(400, "fk").with_code("23503")),
            StoreError::Validation { .. }
        ));
        assert!(matches!(
            map_remote_error(RemoteError::status(400, "token").with_code("invalid_token")),
            StoreError::Authentication { .. }
        ));
        assert!(matches!(
            map_remote_error(RemoteError::status(500, "oops")),
            StoreError::Sync { .. }
        ));
    }
}
