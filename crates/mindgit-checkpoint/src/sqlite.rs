//! Embedded relational checkpoint storage
//!
//! [`SqliteStore`] keeps the whole store in two tables:
//!
//! ```text
//! checkpoints(id PK, branch, parent_id, status, timestamp, logic_step,
//!             description, metadata_blob, state_blob, fingerprint)
//! branches(name PK, head_id, created_from, is_current)
//! ```
//!
//! `state_blob` and `metadata_blob` hold serializer output; clients should
//! not parse them. All writes run inside a transaction. The pool is capped
//! at a single connection so reads are serial, which is all a
//! single-writer session needs. Timestamps are stored as fixed-width
//! RFC 3339 text (microsecond precision, `Z` suffix) so that lexicographic
//! order is chronological; `rowid` breaks ties in insertion order.
//!
//! Sharing one database file across agents is done the same way as the
//! file-tree backend: give each agent its own path.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::debug;

use crate::checkpoint::{Branch, Checkpoint, CheckpointFilter, CheckpointStatus, StateMap};
use crate::error::{Result, StoreError};
use crate::serializer::{SerializerKind, StateSerializer};
use crate::traits::CheckpointStore;

/// SQLite-backed checkpoint store
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    serializer: Arc<dyn StateSerializer>,
}

impl SqliteStore {
    /// Open (or create) a store at the given database file path.
    pub async fn open(path: impl AsRef<Path>, serializer: SerializerKind) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        Self::connect(options, serializer).await
    }

    /// Open a private in-memory database (used in tests).
    pub async fn open_in_memory(serializer: SerializerKind) -> Result<Self> {
        Self::connect(SqliteConnectOptions::new().in_memory(true), serializer).await
    }

    async fn connect(options: SqliteConnectOptions, serializer: SerializerKind) -> Result<Self> {
        // One connection: reads are serial and writes never contend.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self {
            pool,
            serializer: Arc::from(serializer.build()),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                id TEXT PRIMARY KEY,
                branch TEXT NOT NULL,
                parent_id TEXT,
                status TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                logic_step TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                metadata_blob BLOB NOT NULL,
                state_blob BLOB NOT NULL,
                fingerprint TEXT NOT NULL
            )",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS branches (
                name TEXT PRIMARY KEY,
                head_id TEXT,
                created_from TEXT,
                is_current INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_checkpoints_branch ON checkpoints(branch)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_checkpoints_timestamp ON checkpoints(timestamp)",
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    fn encode_timestamp(ts: DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| StoreError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
    }

    fn encode_map(&self, map: &StateMap) -> Result<Vec<u8>> {
        self.serializer.to_bytes(&Value::Object(map.clone()))
    }

    fn decode_map(&self, blob: &[u8], what: &str) -> Result<StateMap> {
        match self.serializer.from_bytes(blob)? {
            Value::Object(map) => Ok(map),
            other => Err(StoreError::Corrupt(format!(
                "{what} blob decoded to non-object value: {other}"
            ))),
        }
    }

    fn row_to_checkpoint(&self, row: &SqliteRow) -> Result<Checkpoint> {
        let status_raw: String = row.try_get("status")?;
        let status = CheckpointStatus::parse(&status_raw)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown status {status_raw:?}")))?;
        let timestamp_raw: String = row.try_get("timestamp")?;
        let state_blob: Vec<u8> = row.try_get("state_blob")?;
        let metadata_blob: Vec<u8> = row.try_get("metadata_blob")?;

        Ok(Checkpoint {
            id: row.try_get("id")?,
            timestamp: Self::decode_timestamp(&timestamp_raw)?,
            state: self.decode_map(&state_blob, "state")?,
            metadata: self.decode_map(&metadata_blob, "metadata")?,
            description: row.try_get("description")?,
            logic_step: row.try_get("logic_step")?,
            branch: row.try_get("branch")?,
            parent_id: row.try_get("parent_id")?,
            status,
            fingerprint: row.try_get("fingerprint")?,
        })
    }

    fn row_to_branch(row: &SqliteRow) -> Result<Branch> {
        Ok(Branch {
            name: row.try_get("name")?,
            head_id: row.try_get("head_id")?,
            created_from: row.try_get("created_from")?,
            is_current: row.try_get::<i64, _>("is_current")? != 0,
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<()> {
        let state_blob = self.encode_map(&checkpoint.state)?;
        let metadata_blob = self.encode_map(&checkpoint.metadata)?;

        let mut tx = self.pool.begin().await?;
        // Upsert rather than replace: REPLACE would reassign the rowid and
        // lose the insertion-order tie-breaker.
        sqlx::query(
            "INSERT INTO checkpoints
                (id, branch, parent_id, status, timestamp, logic_step,
                 description, metadata_blob, state_blob, fingerprint)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                branch = excluded.branch,
                parent_id = excluded.parent_id,
                status = excluded.status,
                timestamp = excluded.timestamp,
                logic_step = excluded.logic_step,
                description = excluded.description,
                metadata_blob = excluded.metadata_blob,
                state_blob = excluded.state_blob,
                fingerprint = excluded.fingerprint",
        )
        .bind(&checkpoint.id)
        .bind(&checkpoint.branch)
        .bind(&checkpoint.parent_id)
        .bind(checkpoint.status.as_str())
        .bind(Self::encode_timestamp(checkpoint.timestamp))
        .bind(&checkpoint.logic_step)
        .bind(&checkpoint.description)
        .bind(&metadata_blob)
        .bind(&state_blob)
        .bind(&checkpoint.fingerprint)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        debug!(id = %checkpoint.id, branch = %checkpoint.branch, "checkpoint stored");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| self.row_to_checkpoint(&row)).transpose()
    }

    async fn list(&self, filter: &CheckpointFilter) -> Result<Vec<Checkpoint>> {
        // Fetch in (timestamp, rowid) order and apply the filter on the
        // decoded records so all backends share one matching definition.
        let rows = sqlx::query("SELECT * FROM checkpoints ORDER BY timestamp ASC, rowid ASC")
            .fetch_all(&self.pool)
            .await?;
        let mut result = Vec::with_capacity(rows.len());
        for row in &rows {
            let cp = self.row_to_checkpoint(row)?;
            if filter.matches(&cp) {
                result.push(cp);
            }
        }
        Ok(result)
    }

    async fn update_status(&self, id: &str, status: CheckpointStatus) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT status FROM checkpoints WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let current_raw: String = row.try_get("status")?;
        let current = CheckpointStatus::parse(&current_raw)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown status {current_raw:?}")))?;
        if !current.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                from: current,
                to: status,
            });
        }
        sqlx::query("UPDATE checkpoints SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn put_branch(&self, branch: &Branch) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO branches (name, head_id, created_from, is_current)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                head_id = excluded.head_id,
                created_from = excluded.created_from,
                is_current = excluded.is_current",
        )
        .bind(&branch.name)
        .bind(&branch.head_id)
        .bind(&branch.created_from)
        .bind(branch.is_current as i64)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_branch(&self, name: &str) -> Result<Option<Branch>> {
        let row = sqlx::query("SELECT * FROM branches WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| Self::row_to_branch(&row)).transpose()
    }

    async fn list_branches(&self) -> Result<Vec<Branch>> {
        let rows = sqlx::query("SELECT * FROM branches ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_branch).collect()
    }

    async fn delete_branch(&self, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM branches WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM checkpoints").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM branches").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn checkpoint_on(branch: &str, step: &str) -> Checkpoint {
        let mut state = StateMap::new();
        state.insert("step".into(), json!(step));
        let mut metadata = StateMap::new();
        metadata.insert("confidence".into(), json!(0.8));
        Checkpoint::builder(branch)
            .state(state)
            .metadata(metadata)
            .description(format!("{step} checkpoint"))
            .logic_step(step)
            .build()
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let store = SqliteStore::open_in_memory(SerializerKind::Json).await.unwrap();
        let cp = checkpoint_on("main", "intake");

        store.put(&cp).await.unwrap();
        let loaded = store.get(&cp.id).await.unwrap().unwrap();

        assert_eq!(loaded.id, cp.id);
        assert_eq!(loaded.state, cp.state);
        assert_eq!(loaded.metadata, cp.metadata);
        assert_eq!(loaded.fingerprint, cp.fingerprint);
        assert_eq!(loaded.timestamp.timestamp_micros(), cp.timestamp.timestamp_micros());
    }

    #[tokio::test]
    async fn test_binary_serializer_blobs_round_trip() {
        for kind in [SerializerKind::Binary, SerializerKind::CompressedBinary] {
            let store = SqliteStore::open_in_memory(kind).await.unwrap();
            let cp = checkpoint_on("main", "intake");
            store.put(&cp).await.unwrap();
            let loaded = store.get(&cp.id).await.unwrap().unwrap();
            assert_eq!(loaded.state, cp.state, "{kind:?}");
        }
    }

    #[tokio::test]
    async fn test_list_filters_and_orders() {
        let store = SqliteStore::open_in_memory(SerializerKind::Json).await.unwrap();
        let a = checkpoint_on("main", "one");
        let b = checkpoint_on("alt", "two");
        let c = checkpoint_on("main", "three");
        for cp in [&a, &b, &c] {
            store.put(cp).await.unwrap();
        }

        let all = store.list(&CheckpointFilter::default()).await.unwrap();
        assert_eq!(
            all.iter().map(|cp| cp.id.as_str()).collect::<Vec<_>>(),
            vec![a.id.as_str(), b.id.as_str(), c.id.as_str()],
        );

        let main_only = store
            .list(&CheckpointFilter::new().with_branch("main"))
            .await
            .unwrap();
        assert_eq!(main_only.len(), 2);
    }

    #[tokio::test]
    async fn test_update_status_transitions() {
        let store = SqliteStore::open_in_memory(SerializerKind::Json).await.unwrap();
        let cp = checkpoint_on("main", "intake");
        store.put(&cp).await.unwrap();

        store.update_status(&cp.id, CheckpointStatus::Merged).await.unwrap();
        store.update_status(&cp.id, CheckpointStatus::Merged).await.unwrap();

        let err = store
            .update_status(&cp.id, CheckpointStatus::RolledBack)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let err = store
            .update_status("missing", CheckpointStatus::Merged)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reopen_resumes_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("agent.db");
        let cp = checkpoint_on("main", "intake");

        {
            let store = SqliteStore::open(&db_path, SerializerKind::Json).await.unwrap();
            store.put(&cp).await.unwrap();
            let mut main = Branch::new("main");
            main.head_id = Some(cp.id.clone());
            main.is_current = true;
            store.put_branch(&main).await.unwrap();
        }

        let reopened = SqliteStore::open(&db_path, SerializerKind::Json).await.unwrap();
        assert!(reopened.get(&cp.id).await.unwrap().is_some());
        let main = reopened.get_branch("main").await.unwrap().unwrap();
        assert!(main.is_current);
    }

    #[tokio::test]
    async fn test_branches_and_clear() {
        let store = SqliteStore::open_in_memory(SerializerKind::Json).await.unwrap();
        let mut main = Branch::new("main");
        main.is_current = true;
        store.put_branch(&main).await.unwrap();
        let mut alt = Branch::new("alt");
        alt.created_from = Some("abcd".into());
        store.put_branch(&alt).await.unwrap();

        let branches = store.list_branches().await.unwrap();
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0].name, "alt");

        store.delete_branch("alt").await.unwrap();
        store.delete_branch("alt").await.unwrap();
        assert_eq!(store.list_branches().await.unwrap().len(), 1);

        store.put(&checkpoint_on("main", "x")).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.list(&CheckpointFilter::default()).await.unwrap().is_empty());
        assert!(store.list_branches().await.unwrap().is_empty());
    }
}
