//! The embedded relational backend.

use crate::handle::{SqlDatabase, SqlRow};
use crate::schema::TableSchema;
use crate::translator::{delete_statement, select_statement, SqlStatement};
use crate::value::SqlValue;
use async_trait::async_trait;
use lodestore_core::{
    Backend, Capabilities, ConflictDetails, EntityAdapter, EntityKey, FieldMap, Lifecycle,
    PendingChange, PendingChangeLog, Query, StoreError, StoreResult, Subject, Subscription,
    SyncStatus, WatcherRegistry,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A backend over an embedded SQLite-family engine.
///
/// Upserts use `INSERT OR REPLACE`; batch writes run in a single
/// transaction. Sync is a no-op: the local database is authoritative
/// and the status is permanently `Synced`.
pub struct SqliteBackend<T, K> {
    db: Arc<dyn SqlDatabase>,
    schema: TableSchema,
    adapter: EntityAdapter<T, K>,
    field_map: BTreeMap<String, String>,
    registry: WatcherRegistry<T, K>,
    lifecycle: Lifecycle,
    pending: PendingChangeLog<T>,
    conflicts: Subject<ConflictDetails<T>>,
    status_stream: Subject<SyncStatus>,
}

impl<T, K> SqliteBackend<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: EntityKey,
{
    /// Creates a backend over `db` with the given table layout.
    pub fn new(db: Arc<dyn SqlDatabase>, schema: TableSchema, adapter: EntityAdapter<T, K>) -> Self {
        Self {
            db,
            schema,
            adapter,
            field_map: BTreeMap::new(),
            registry: WatcherRegistry::new(),
            lifecycle: Lifecycle::new(),
            pending: PendingChangeLog::new(),
            conflicts: Subject::without_replay(),
            status_stream: Subject::new(),
        }
    }

    /// Maps logical field names to physical column names. Unmapped
    /// names pass through unchanged.
    #[must_use]
    pub fn with_field_mapping(mut self, mapping: BTreeMap<String, String>) -> Self {
        self.field_map = mapping;
        self
    }

    fn column_for<'a>(&'a self, logical: &'a str) -> &'a str {
        self.field_map
            .get(logical)
            .map(String::as_str)
            .unwrap_or(logical)
    }

    fn logical_for<'a>(&'a self, column: &'a str) -> &'a str {
        self.field_map
            .iter()
            .find(|(_, c)| c.as_str() == column)
            .map(|(logical, _)| logical.as_str())
            .unwrap_or(column)
    }

    /// Fills unmapped fields of the query with the backend-level column
    /// mapping; mappings on the query itself win.
    fn effective_query(&self, query: &Query) -> Query {
        let mut query = query.clone();
        for (logical, column) in &self.field_map {
            query
                .field_map
                .entry(logical.clone())
                .or_insert_with(|| column.clone());
        }
        query
    }

    fn key_param(&self, id: &K) -> SqlValue {
        SqlValue::from_json(&id.to_value())
    }

    fn row_to_entity(&self, row: &SqlRow) -> StoreResult<T> {
        let columns = self.schema.row_to_map(row);
        let mut map = FieldMap::new();
        for (column, value) in columns {
            map.insert(self.logical_for(&column).to_owned(), value);
        }
        self.adapter.from_map(&map)
    }

    fn upsert_statement(&self, item: &T) -> SqlStatement {
        let map = self.adapter.to_map(item);
        let mut columns = Vec::with_capacity(self.schema.columns.len());
        let mut params = Vec::with_capacity(self.schema.columns.len());

        for column in &self.schema.columns {
            let logical = self.logical_for(&column.name);
            let value = map.get(logical).cloned().unwrap_or(serde_json::Value::Null);
            columns.push(column.name.as_str());
            params.push(self.schema.encode_value(&column.name, &value));
        }

        let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
        SqlStatement {
            sql: format!(
                "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
                self.schema.table,
                columns.join(", "),
                placeholders.join(", ")
            ),
            params,
        }
    }

    fn select_by_id(&self, id: &K) -> SqlStatement {
        SqlStatement {
            sql: format!(
                "SELECT * FROM {} WHERE {} = ?",
                self.schema.table, self.schema.primary_key
            ),
            params: vec![self.key_param(id)],
        }
    }

    fn load_all(&self, query: Option<&Query>) -> StoreResult<Vec<T>> {
        let effective = query.map(|q| self.effective_query(q));
        let statement = select_statement(&self.schema.table, effective.as_ref());
        let rows = self.db.query(&statement)?;
        rows.iter().map(|row| self.row_to_entity(row)).collect()
    }

    fn refresh_query_watchers(&self) {
        for (query, subject) in self.registry.query_watchers() {
            match self.load_all(query.as_ref()) {
                Ok(items) => subject.emit(items),
                Err(error) => subject.emit_error(error),
            }
        }
    }
}

#[async_trait]
impl<T, K> Backend<T, K> for SqliteBackend<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: EntityKey,
{
    fn name(&self) -> &str {
        "sqlite"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_offline: true,
            supports_transactions: true,
            ..Capabilities::default()
        }
    }

    async fn initialize(&self) -> StoreResult<()> {
        if self.lifecycle.is_closed() {
            return Err(StoreError::closed());
        }
        if self.lifecycle.is_ready() {
            return Ok(());
        }

        self.schema.validate()?;
        self.db
            .execute(&SqlStatement::bare(self.schema.create_table_sql()))?;
        for sql in self.schema.create_index_sql() {
            self.db.execute(&SqlStatement::bare(sql))?;
        }

        self.lifecycle.open()?;
        self.status_stream.emit(SyncStatus::Synced);
        debug!(table = %self.schema.table, "sqlite backend initialized");
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        if self.lifecycle.shut() {
            self.registry.close_all();
            self.pending.dispose();
            self.conflicts.close();
            self.status_stream.close();
        }
        Ok(())
    }

    async fn get(&self, id: &K) -> StoreResult<Option<T>> {
        self.lifecycle.ensure_ready()?;
        let rows = self.db.query(&self.select_by_id(id))?;
        rows.first().map(|row| self.row_to_entity(row)).transpose()
    }

    async fn get_all(&self, query: Option<&Query>) -> StoreResult<Vec<T>> {
        self.lifecycle.ensure_ready()?;
        self.load_all(query)
    }

    async fn save(&self, item: T) -> StoreResult<T> {
        self.lifecycle.ensure_ready()?;
        self.db.execute(&self.upsert_statement(&item))?;

        let id = self.adapter.id_of(&item);
        self.registry.notify_entity(&id, Some(item.clone()));
        self.refresh_query_watchers();
        Ok(item)
    }

    async fn save_all(&self, items: Vec<T>) -> StoreResult<Vec<T>> {
        self.lifecycle.ensure_ready()?;
        if items.is_empty() {
            return Ok(items);
        }

        let statements: Vec<SqlStatement> =
            items.iter().map(|item| self.upsert_statement(item)).collect();
        self.db.transaction(&statements)?;

        for item in &items {
            let id = self.adapter.id_of(item);
            self.registry.notify_entity(&id, Some(item.clone()));
        }
        self.refresh_query_watchers();
        Ok(items)
    }

    async fn delete(&self, id: &K) -> StoreResult<bool> {
        self.lifecycle.ensure_ready()?;
        let affected = self.db.execute(&SqlStatement {
            sql: format!(
                "DELETE FROM {} WHERE {} = ?",
                self.schema.table, self.schema.primary_key
            ),
            params: vec![self.key_param(id)],
        })?;

        if affected > 0 {
            self.registry.notify_entity(id, None);
            self.refresh_query_watchers();
        }
        Ok(affected > 0)
    }

    async fn delete_all(&self, ids: &[K]) -> StoreResult<usize> {
        self.lifecycle.ensure_ready()?;
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders: Vec<&str> = ids.iter().map(|_| "?").collect();
        let affected = self.db.execute(&SqlStatement {
            sql: format!(
                "DELETE FROM {} WHERE {} IN ({})",
                self.schema.table,
                self.schema.primary_key,
                placeholders.join(", ")
            ),
            params: ids.iter().map(|id| self.key_param(id)).collect(),
        })?;

        for id in ids {
            self.registry.notify_entity(id, None);
        }
        self.refresh_query_watchers();
        Ok(affected)
    }

    async fn delete_where(&self, query: &Query) -> StoreResult<usize> {
        self.lifecycle.ensure_ready()?;
        let effective = self.effective_query(query);
        let affected = self
            .db
            .execute(&delete_statement(&self.schema.table, &effective))?;
        self.refresh_query_watchers();
        Ok(affected)
    }

    async fn watch(&self, id: &K) -> StoreResult<Subscription<Option<T>>> {
        self.lifecycle.ensure_ready()?;
        let (subject, created) = self.registry.entity_subject(id);
        if created {
            let rows = self.db.query(&self.select_by_id(id));
            match rows {
                Ok(rows) => match rows.first().map(|row| self.row_to_entity(row)).transpose() {
                    Ok(current) => subject.emit(current),
                    Err(error) => subject.emit_error(error),
                },
                Err(error) => subject.emit_error(error),
            }
        }
        Ok(subject.subscribe())
    }

    async fn watch_all(&self, query: Option<&Query>) -> StoreResult<Subscription<Vec<T>>> {
        self.lifecycle.ensure_ready()?;
        let (subject, created) = self.registry.query_subject(query);
        if created {
            match self.load_all(query) {
                Ok(items) => subject.emit(items),
                Err(error) => subject.emit_error(error),
            }
        }
        Ok(subject.subscribe())
    }

    async fn sync(&self) -> StoreResult<()> {
        self.lifecycle.ensure_ready()?;
        Ok(())
    }

    fn sync_status(&self) -> SyncStatus {
        SyncStatus::Synced
    }

    fn sync_status_stream(&self) -> Subscription<SyncStatus> {
        self.status_stream.subscribe()
    }

    fn pending_changes_count(&self) -> usize {
        self.pending.count()
    }

    fn pending_changes_stream(&self) -> Subscription<Vec<PendingChange<T>>> {
        self.pending.stream()
    }

    fn conflicts_stream(&self) -> Subscription<ConflictDetails<T>> {
        self.conflicts.subscribe()
    }

    async fn retry_change(&self, change_id: &str) -> StoreResult<()> {
        self.lifecycle.ensure_ready()?;
        Err(StoreError::validation(format!(
            "no pending change with id {change_id}"
        )))
    }

    async fn cancel_change(&self, change_id: &str) -> StoreResult<()> {
        self.lifecycle.ensure_ready()?;
        Err(StoreError::validation(format!(
            "no pending change with id {change_id}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::RusqliteDatabase;
    use crate::schema::{ColumnDef, ColumnType};
    use lodestore_core::FilterOp;
    use serde_json::{json, Value};

    #[derive(Debug, Clone, PartialEq)]
    struct Task {
        id: String,
        title: String,
        done: bool,
        rank: i64,
        tags: Vec<String>,
    }

    fn task(id: &str, title: &str, done: bool, rank: i64, tags: &[&str]) -> Task {
        Task {
            id: id.into(),
            title: title.into(),
            done,
            rank,
            tags: tags.iter().map(|t| (*t).to_owned()).collect(),
        }
    }

    fn task_adapter() -> EntityAdapter<Task, String> {
        EntityAdapter::new(
            |t: &Task| t.id.clone(),
            |t: &Task| {
                let mut map = FieldMap::new();
                map.insert("id".into(), json!(t.id));
                map.insert("title".into(), json!(t.title));
                map.insert("done".into(), json!(t.done));
                map.insert("rank".into(), json!(t.rank));
                map.insert("tags".into(), json!(t.tags));
                map
            },
            |map: &FieldMap| {
                Ok(Task {
                    id: map
                        .get("id")
                        .and_then(Value::as_str)
                        .ok_or_else(|| StoreError::validation("missing id"))?
                        .to_owned(),
                    title: map
                        .get("title")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                    done: map.get("done").and_then(Value::as_bool).unwrap_or(false),
                    rank: map.get("rank").and_then(Value::as_i64).unwrap_or(0),
                    tags: map
                        .get("tags")
                        .and_then(Value::as_array)
                        .map(|a| {
                            a.iter()
                                .filter_map(Value::as_str)
                                .map(str::to_owned)
                                .collect()
                        })
                        .unwrap_or_default(),
                })
            },
        )
    }

    fn task_schema() -> TableSchema {
        TableSchema::new(
            "tasks",
            vec![
                ColumnDef::new("id", ColumnType::Text),
                ColumnDef::new("title", ColumnType::Text),
                ColumnDef::new("done", ColumnType::Boolean),
                ColumnDef::new("rank", ColumnType::Integer),
                ColumnDef::new("tags", ColumnType::Json),
            ],
        )
    }

    async fn ready_backend() -> SqliteBackend<Task, String> {
        let db = Arc::new(RusqliteDatabase::open_in_memory().unwrap());
        let backend = SqliteBackend::new(db, task_schema(), task_adapter());
        backend.initialize().await.unwrap();
        backend
    }

    #[tokio::test]
    async fn save_and_get_roundtrip() {
        let backend = ready_backend().await;
        let t = task("t1", "write tests", false, 3, &["dev"]);

        backend.save(t.clone()).await.unwrap();
        assert_eq!(backend.get(&"t1".to_owned()).await.unwrap(), Some(t));
        assert_eq!(backend.get(&"missing".to_owned()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn upsert_replaces() {
        let backend = ready_backend().await;
        backend.save(task("t1", "old", false, 1, &[])).await.unwrap();
        backend.save(task("t1", "new", true, 2, &[])).await.unwrap();

        let found = backend.get(&"t1".to_owned()).await.unwrap().unwrap();
        assert_eq!(found.title, "new");
        assert!(found.done);
        assert_eq!(backend.get_all(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn uninitialized_and_closed_guards() {
        let db = Arc::new(RusqliteDatabase::open_in_memory().unwrap());
        let backend = SqliteBackend::new(db, task_schema(), task_adapter());
        assert!(matches!(
            backend.get(&"x".to_owned()).await,
            Err(StoreError::State { .. })
        ));

        backend.initialize().await.unwrap();
        backend.initialize().await.unwrap(); // idempotent
        backend.close().await.unwrap();
        backend.close().await.unwrap(); // idempotent
        assert!(matches!(
            backend.get(&"x".to_owned()).await,
            Err(StoreError::State { .. })
        ));
    }

    #[tokio::test]
    async fn filters_run_in_sql() {
        let backend = ready_backend().await;
        backend.save(task("a", "alpha", true, 1, &["work"])).await.unwrap();
        backend.save(task("b", "beta", false, 2, &["home"])).await.unwrap();
        backend.save(task("c", "gamma", true, 3, &["work", "urgent"])).await.unwrap();

        let q = Query::new()
            .filter("done", FilterOp::Equals, json!(true))
            .order_by("rank", true);
        let done = backend.get_all(Some(&q)).await.unwrap();
        assert_eq!(
            done.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            ["c", "a"]
        );

        let q = Query::new().filter("title", FilterOp::StartsWith, json!("be"));
        assert_eq!(backend.get_all(Some(&q)).await.unwrap().len(), 1);

        let q = Query::new().filter("id", FilterOp::WhereIn, json!([]));
        assert!(backend.get_all(Some(&q)).await.unwrap().is_empty());

        let q = Query::new().filter("id", FilterOp::WhereNotIn, json!([]));
        assert_eq!(backend.get_all(Some(&q)).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn array_contains_any_via_json_each() {
        let backend = ready_backend().await;
        backend.save(task("a", "alpha", false, 1, &["work"])).await.unwrap();
        backend.save(task("b", "beta", false, 2, &["home"])).await.unwrap();
        backend.save(task("c", "gamma", false, 3, &["urgent", "work"])).await.unwrap();

        let q = Query::new().filter("tags", FilterOp::ArrayContainsAny, json!(["urgent", "home"]));
        let found = backend.get_all(Some(&q)).await.unwrap();
        let mut ids: Vec<&str> = found.iter().map(|t| t.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, ["b", "c"]);

        let q = Query::new().filter("tags", FilterOp::ArrayContainsAny, json!([]));
        assert!(backend.get_all(Some(&q)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn limit_offset_in_sql() {
        let backend = ready_backend().await;
        for i in 0..10 {
            backend
                .save(task(&format!("t{i}"), "x", false, i, &[]))
                .await
                .unwrap();
        }

        let q = Query::new().order_by("rank", false).limit(3).offset(2);
        let page = backend.get_all(Some(&q)).await.unwrap();
        assert_eq!(
            page.iter().map(|t| t.rank).collect::<Vec<_>>(),
            [2, 3, 4]
        );

        let q = Query::new().order_by("rank", false).offset(8);
        let tail = backend.get_all(Some(&q)).await.unwrap();
        assert_eq!(tail.len(), 2);
    }

    #[tokio::test]
    async fn save_all_is_transactional() {
        let db = Arc::new(RusqliteDatabase::open_in_memory().unwrap());
        let schema = task_schema().index("idx_unique_title", vec!["title".into()], true);
        let backend = SqliteBackend::new(db, schema, task_adapter());
        backend.initialize().await.unwrap();

        // Second item violates the unique title index; nothing lands.
        let result = backend
            .save_all(vec![
                task("a", "same", false, 1, &[]),
                task("b", "same", false, 2, &[]),
            ])
            .await;
        assert!(matches!(result, Err(StoreError::Validation { .. })));
        assert!(backend.get_all(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_and_delete_all() {
        let backend = ready_backend().await;
        backend.save(task("a", "alpha", false, 1, &[])).await.unwrap();
        backend.save(task("b", "beta", false, 2, &[])).await.unwrap();

        assert!(backend.delete(&"a".to_owned()).await.unwrap());
        assert!(!backend.delete(&"a".to_owned()).await.unwrap());

        assert_eq!(backend.delete_all(&[]).await.unwrap(), 0);
        assert_eq!(
            backend
                .delete_all(&["b".to_owned(), "missing".to_owned()])
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn delete_where_counts_and_refreshes() {
        let backend = ready_backend().await;
        backend.save(task("a", "alpha", true, 1, &[])).await.unwrap();
        backend.save(task("b", "beta", false, 2, &[])).await.unwrap();
        backend.save(task("c", "gamma", true, 3, &[])).await.unwrap();

        let mut sub = backend.watch_all(None).await.unwrap();
        let _ = sub.recv().await;

        let q = Query::new().filter("done", FilterOp::Equals, json!(true));
        assert_eq!(backend.delete_where(&q).await.unwrap(), 2);

        let remaining = sub.recv().await.unwrap().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "b");
    }

    #[tokio::test]
    async fn watch_tracks_writes() {
        let backend = ready_backend().await;
        let mut sub = backend.watch(&"t1".to_owned()).await.unwrap();
        assert_eq!(sub.recv().await.unwrap().unwrap(), None);

        backend.save(task("t1", "hello", false, 1, &[])).await.unwrap();
        assert_eq!(
            sub.recv().await.unwrap().unwrap().map(|t| t.title),
            Some("hello".to_owned())
        );

        backend.delete(&"t1".to_owned()).await.unwrap();
        assert_eq!(sub.recv().await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn field_mapping_translates_columns() {
        let db = Arc::new(RusqliteDatabase::open_in_memory().unwrap());
        let schema = TableSchema::new(
            "tasks",
            vec![
                ColumnDef::new("id", ColumnType::Text),
                ColumnDef::new("task_title", ColumnType::Text),
                ColumnDef::new("done", ColumnType::Boolean),
                ColumnDef::new("rank", ColumnType::Integer),
                ColumnDef::new("tags", ColumnType::Json),
            ],
        );
        let mapping: BTreeMap<String, String> =
            [("title".to_owned(), "task_title".to_owned())].into();
        let backend =
            SqliteBackend::new(db, schema, task_adapter()).with_field_mapping(mapping);
        backend.initialize().await.unwrap();

        backend.save(task("t1", "mapped", false, 1, &[])).await.unwrap();

        let q = Query::new().filter("title", FilterOp::Equals, json!("mapped"));
        let found = backend.get_all(Some(&q)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "mapped");
    }

    #[tokio::test]
    async fn duplicate_pk_is_not_an_error_for_upsert() {
        let backend = ready_backend().await;
        backend.save(task("t1", "a", false, 1, &[])).await.unwrap();
        // INSERT OR REPLACE absorbs the conflict.
        backend.save(task("t1", "b", false, 1, &[])).await.unwrap();
    }

    #[tokio::test]
    async fn sync_is_noop_and_status_synced() {
        let backend = ready_backend().await;
        backend.sync().await.unwrap();
        assert_eq!(backend.sync_status(), SyncStatus::Synced);
        assert_eq!(backend.pending_changes_count(), 0);
    }
}
