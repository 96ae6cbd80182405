//! File-tree checkpoint storage
//!
//! [`FileTreeStore`] persists one JSON file per record under a configurable
//! root directory:
//!
//! ```text
//! <root>/
//!   index.json            # {"ids": [...creation order...], "version": 1}
//!   checkpoints/
//!     <id>.json           # one checkpoint record, canonical keys
//!   branches/
//!     <name>.json
//! ```
//!
//! Every write goes to a temporary file first and is then renamed into
//! place, so a crash mid-write leaves the previous version intact.
//! Directory creation is lazy but always precedes the first `put`.
//!
//! Reopening an existing root resumes its contents. If `index.json` has
//! drifted from the actual `checkpoints/` directory (a crash between the
//! two writes, or files added out of band), the index is rebuilt from the
//! checkpoint files, ordered by their recorded timestamps, and a warning is
//! logged. The checkpoint files are the source of truth.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::checkpoint::{Branch, Checkpoint, CheckpointFilter, CheckpointStatus};
use crate::error::{Result, StoreError};
use crate::traits::CheckpointStore;

const INDEX_VERSION: u32 = 1;

/// On-disk shape of `index.json`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Index {
    ids: Vec<String>,
    version: u32,
}

/// File-tree backed checkpoint store
#[derive(Clone)]
pub struct FileTreeStore {
    root: PathBuf,
    /// Creation-order id list, mirrored to `index.json`. Also serializes
    /// all mutating filesystem operations.
    index: Arc<RwLock<Index>>,
}

impl FileTreeStore {
    /// Open (or lazily create) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let index = if root.join("index.json").exists() || root.join("checkpoints").exists() {
            Self::load_or_repair_index(&root).await?
        } else {
            Index {
                ids: Vec::new(),
                version: INDEX_VERSION,
            }
        };
        Ok(Self {
            root,
            index: Arc::new(RwLock::new(index)),
        })
    }

    fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    fn branches_dir(&self) -> PathBuf {
        self.root.join("branches")
    }

    fn checkpoint_path(&self, id: &str) -> PathBuf {
        self.checkpoints_dir().join(format!("{id}.json"))
    }

    fn branch_path(&self, name: &str) -> PathBuf {
        self.branches_dir().join(format!("{name}.json"))
    }

    async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.checkpoints_dir()).await?;
        tokio::fs::create_dir_all(self.branches_dir()).await?;
        Ok(())
    }

    /// Write bytes to `path` atomically: temp file, then rename.
    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, bytes).await?;
        tokio::fs::rename(&temp_path, path).await?;
        Ok(())
    }

    async fn persist_index(&self, index: &Index) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(index)?;
        Self::write_atomic(&self.root.join("index.json"), &bytes).await
    }

    async fn load_or_repair_index(root: &Path) -> Result<Index> {
        let index_path = root.join("index.json");
        let on_disk: Option<Index> = match tokio::fs::read(&index_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).ok(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let actual_ids = Self::scan_checkpoint_ids(root).await?;

        if let Some(index) = on_disk {
            let mut listed: Vec<&String> = index.ids.iter().collect();
            listed.sort();
            let mut present: Vec<&String> = actual_ids.iter().collect();
            present.sort();
            if listed == present {
                return Ok(index);
            }
            warn!(
                root = %root.display(),
                indexed = index.ids.len(),
                present = actual_ids.len(),
                "index.json out of sync with checkpoints/, rebuilding"
            );
        } else if !actual_ids.is_empty() {
            warn!(root = %root.display(), "index.json missing, rebuilding from checkpoints/");
        }

        // Rebuild in timestamp order (id as tie-breaker; the original
        // insertion order is unrecoverable once the index is gone).
        let mut entries = Vec::with_capacity(actual_ids.len());
        for id in actual_ids {
            let bytes = tokio::fs::read(root.join("checkpoints").join(format!("{id}.json"))).await?;
            let cp: Checkpoint = serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Corrupt(format!("checkpoint {id}: {e}")))?;
            entries.push((cp.timestamp, id));
        }
        entries.sort();
        let index = Index {
            ids: entries.into_iter().map(|(_, id)| id).collect(),
            version: INDEX_VERSION,
        };

        let bytes = serde_json::to_vec_pretty(&index)?;
        Self::write_atomic(&index_path, &bytes).await?;
        Ok(index)
    }

    async fn scan_checkpoint_ids(root: &Path) -> Result<Vec<String>> {
        let dir = root.join("checkpoints");
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    async fn read_checkpoint(&self, id: &str) -> Result<Option<Checkpoint>> {
        match tokio::fs::read(self.checkpoint_path(id)).await {
            Ok(bytes) => {
                let cp = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Corrupt(format!("checkpoint {id}: {e}")))?;
                Ok(Some(cp))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CheckpointStore for FileTreeStore {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut index = self.index.write().await;
        self.ensure_dirs().await?;

        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        Self::write_atomic(&self.checkpoint_path(&checkpoint.id), &bytes).await?;

        if !index.ids.iter().any(|id| id == &checkpoint.id) {
            index.ids.push(checkpoint.id.clone());
            self.persist_index(&index).await?;
        }
        debug!(id = %checkpoint.id, branch = %checkpoint.branch, "checkpoint written");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Checkpoint>> {
        let _index = self.index.read().await;
        self.read_checkpoint(id).await
    }

    async fn list(&self, filter: &CheckpointFilter) -> Result<Vec<Checkpoint>> {
        let index = self.index.read().await;
        let mut result = Vec::new();
        for id in &index.ids {
            let Some(cp) = self.read_checkpoint(id).await? else {
                continue;
            };
            if filter.matches(&cp) {
                result.push(cp);
            }
        }
        // Index order is insertion order, the tie-breaker for equal stamps.
        result.sort_by_key(|cp| cp.timestamp);
        Ok(result)
    }

    async fn update_status(&self, id: &str, status: CheckpointStatus) -> Result<()> {
        let _index = self.index.write().await;
        let mut cp = self
            .read_checkpoint(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if !cp.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                from: cp.status,
                to: status,
            });
        }
        cp.status = status;
        let bytes = serde_json::to_vec_pretty(&cp)?;
        Self::write_atomic(&self.checkpoint_path(id), &bytes).await
    }

    async fn put_branch(&self, branch: &Branch) -> Result<()> {
        let _index = self.index.write().await;
        self.ensure_dirs().await?;
        let bytes = serde_json::to_vec_pretty(branch)?;
        Self::write_atomic(&self.branch_path(&branch.name), &bytes).await
    }

    async fn get_branch(&self, name: &str) -> Result<Option<Branch>> {
        let _index = self.index.read().await;
        match tokio::fs::read(self.branch_path(name)).await {
            Ok(bytes) => {
                let branch = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Corrupt(format!("branch {name}: {e}")))?;
                Ok(Some(branch))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_branches(&self) -> Result<Vec<Branch>> {
        let _index = self.index.read().await;
        let mut branches = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.branches_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(branches),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(".json") {
                continue;
            }
            let bytes = tokio::fs::read(entry.path()).await?;
            let branch: Branch = serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Corrupt(format!("branch file {name}: {e}")))?;
            branches.push(branch);
        }
        branches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(branches)
    }

    async fn delete_branch(&self, name: &str) -> Result<()> {
        let _index = self.index.write().await;
        match tokio::fs::remove_file(self.branch_path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut index = self.index.write().await;
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        index.ids.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::StateMap;
    use serde_json::json;

    fn checkpoint_on(branch: &str, step: &str) -> Checkpoint {
        let mut state = StateMap::new();
        state.insert("step".into(), json!(step));
        Checkpoint::builder(branch)
            .state(state)
            .description(format!("{step} checkpoint"))
            .logic_step(step)
            .build()
    }

    #[tokio::test]
    async fn test_put_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let store = FileTreeStore::open(&root).await.unwrap();

        let cp = checkpoint_on("main", "intake");
        store.put(&cp).await.unwrap();

        assert!(root.join("index.json").exists());
        assert!(root.join("checkpoints").join(format!("{}.json", cp.id)).exists());

        let index: Index =
            serde_json::from_slice(&std::fs::read(root.join("index.json")).unwrap()).unwrap();
        assert_eq!(index.version, 1);
        assert_eq!(index.ids, vec![cp.id.clone()]);
    }

    #[tokio::test]
    async fn test_checkpoint_file_has_canonical_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTreeStore::open(dir.path()).await.unwrap();
        let cp = checkpoint_on("main", "intake");
        store.put(&cp).await.unwrap();

        let raw: serde_json::Value = serde_json::from_slice(
            &std::fs::read(dir.path().join("checkpoints").join(format!("{}.json", cp.id)))
                .unwrap(),
        )
        .unwrap();
        let mut keys: Vec<&String> = raw.as_object().unwrap().keys().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "branch",
                "description",
                "fingerprint",
                "id",
                "logic_step",
                "metadata",
                "parent_id",
                "state",
                "status",
                "timestamp",
            ]
        );
    }

    #[tokio::test]
    async fn test_reopen_resumes_contents() {
        let dir = tempfile::tempdir().unwrap();
        let a = checkpoint_on("main", "one");
        let b = checkpoint_on("main", "two");

        {
            let store = FileTreeStore::open(dir.path()).await.unwrap();
            store.put(&a).await.unwrap();
            store.put(&b).await.unwrap();
            let mut main = Branch::new("main");
            main.head_id = Some(b.id.clone());
            main.is_current = true;
            store.put_branch(&main).await.unwrap();
        }

        let reopened = FileTreeStore::open(dir.path()).await.unwrap();
        let all = reopened.list(&CheckpointFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, a.id);
        let main = reopened.get_branch("main").await.unwrap().unwrap();
        assert_eq!(main.head_id.as_deref(), Some(b.id.as_str()));
        assert!(main.is_current);
    }

    #[tokio::test]
    async fn test_out_of_sync_index_is_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let a = checkpoint_on("main", "one");
        let b = checkpoint_on("main", "two");

        {
            let store = FileTreeStore::open(dir.path()).await.unwrap();
            store.put(&a).await.unwrap();
            store.put(&b).await.unwrap();
        }

        // Corrupt the index: drop one id.
        let index_path = dir.path().join("index.json");
        std::fs::write(
            &index_path,
            serde_json::to_vec(&json!({"ids": [a.id], "version": 1})).unwrap(),
        )
        .unwrap();

        let reopened = FileTreeStore::open(dir.path()).await.unwrap();
        let all = reopened.list(&CheckpointFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2, "repair must recover both checkpoints");

        let index: Index =
            serde_json::from_slice(&std::fs::read(&index_path).unwrap()).unwrap();
        assert_eq!(index.ids.len(), 2);
    }

    #[tokio::test]
    async fn test_update_status_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTreeStore::open(dir.path()).await.unwrap();
        let cp = checkpoint_on("main", "intake");
        store.put(&cp).await.unwrap();

        store
            .update_status(&cp.id, CheckpointStatus::RolledBack)
            .await
            .unwrap();

        let loaded = store.get(&cp.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, CheckpointStatus::RolledBack);

        let err = store
            .update_status(&cp.id, CheckpointStatus::Merged)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_clear_then_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let store = FileTreeStore::open(&root).await.unwrap();
        store.put(&checkpoint_on("main", "one")).await.unwrap();

        store.clear().await.unwrap();
        assert!(store
            .list(&CheckpointFilter::default())
            .await
            .unwrap()
            .is_empty());

        // The store stays usable after clear; directories come back lazily.
        store.put(&checkpoint_on("main", "two")).await.unwrap();
        assert_eq!(store.list(&CheckpointFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_stray_temp_files_after_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTreeStore::open(dir.path()).await.unwrap();
        for i in 0..5 {
            store.put(&checkpoint_on("main", &format!("s{i}"))).await.unwrap();
        }

        let stray: Vec<_> = std::fs::read_dir(dir.path().join("checkpoints"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(stray.is_empty());
    }
}
