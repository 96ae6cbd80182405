//! Session façade over the checkpoint DAG
//!
//! A [`Session`] owns one agent's reasoning history: the checkpoint DAG, the
//! branch cursors, the metrics counters, and a handle to one persistence
//! backend. All mutating operations write through to the backend *before*
//! touching the in-memory DAG, so a storage failure leaves the session
//! exactly as it was.
//!
//! A session is single-writer: the engine state lives behind one
//! `tokio::sync::RwLock`, mutating operations take the write half, and
//! read-only operations (`history`, `diff`, `visualize_tree`) share the read
//! half and always observe a consistent snapshot.
//!
//! # Example
//!
//! ```rust,no_run
//! use mindgit_core::Session;
//! use serde_json::json;
//!
//! # fn state_of(pairs: &[(&str, serde_json::Value)]) -> mindgit_checkpoint::StateMap {
//! #     pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
//! # }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::new("my-agent").await?;
//!
//!     session
//!         .checkpoint(
//!             state_of(&[("task", json!("summarize"))]),
//!             state_of(&[("confidence", json!(1.0))]),
//!             "task received",
//!             "intake",
//!         )
//!         .await?;
//!
//!     // Explore an alternative without losing progress.
//!     session.branch("cached-data").await?;
//!     session.switch_branch("main").await?;
//!
//!     // Undo the last step.
//!     session.rollback(1).await?;
//!     Ok(())
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, warn};

use mindgit_checkpoint::{
    fingerprint, Branch, Checkpoint, CheckpointStatus, CheckpointStore, MemoryStore, StateMap,
};

use crate::dag;
use crate::diff::{diff_states, StateDiff};
use crate::error::{EngineError, Result};
use crate::metrics::SessionMetrics;

const MAIN_BRANCH: &str = "main";

/// How a merge derives the new state from the two head states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Whole state of whichever head has greater `metadata.confidence`;
    /// ties go to the current head
    PreferHigherConfidence,
    /// Shallow key-union; the current head wins conflicts
    Combine,
    /// Source head's state verbatim
    PreferSource,
    /// Current head's state verbatim
    PreferTarget,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::PreferHigherConfidence => "prefer_higher_confidence",
            MergeStrategy::Combine => "combine",
            MergeStrategy::PreferSource => "prefer_source",
            MergeStrategy::PreferTarget => "prefer_target",
        }
    }
}

impl FromStr for MergeStrategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "prefer_higher_confidence" => Ok(MergeStrategy::PreferHigherConfidence),
            "combine" => Ok(MergeStrategy::Combine),
            "prefer_source" => Ok(MergeStrategy::PreferSource),
            "prefer_target" => Ok(MergeStrategy::PreferTarget),
            other => Err(EngineError::Merge(format!("unknown merge strategy '{other}'"))),
        }
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `list_branches_info`
#[derive(Debug, Clone, Serialize)]
pub struct BranchInfo {
    pub name: String,
    pub checkpoint_count: usize,
    pub is_current: bool,
}

/// Serializable snapshot of a whole session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub version: u32,
    pub agent_name: String,
    pub current_branch: String,
    pub checkpoints: Vec<Checkpoint>,
    pub branches: Vec<Branch>,
}

pub(crate) struct SessionState {
    pub(crate) checkpoints: HashMap<String, Checkpoint>,
    /// Ids in creation order; timestamps are non-decreasing along it.
    pub(crate) order: Vec<String>,
    pub(crate) branches: HashMap<String, Branch>,
    pub(crate) current_branch: String,
    last_timestamp: DateTime<Utc>,
    pub(crate) metrics: SessionMetrics,
}

impl SessionState {
    fn current_head_id(&self) -> Option<String> {
        self.branches
            .get(&self.current_branch)
            .and_then(|b| b.head_id.clone())
    }
}

/// The outermost container: one agent's checkpoints, branches, metrics, and
/// persistence backend
pub struct Session {
    agent_name: String,
    store: Arc<dyn CheckpointStore>,
    pub(crate) inner: RwLock<SessionState>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("agent_name", &self.agent_name)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session backed by an ephemeral in-memory store.
    pub async fn new(agent_name: impl Into<String>) -> Result<Self> {
        Self::open(agent_name, Arc::new(MemoryStore::new())).await
    }

    /// Open a session over the given backend, resuming any contents the
    /// backend already holds.
    pub async fn open(
        agent_name: impl Into<String>,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Self> {
        let agent_name = agent_name.into();

        let stored = store.list(&Default::default()).await?;
        let mut branches: HashMap<String, Branch> = store
            .list_branches()
            .await?
            .into_iter()
            .map(|b| (b.name.clone(), b))
            .collect();

        if !branches.contains_key(MAIN_BRANCH) {
            let mut main = Branch::new(MAIN_BRANCH);
            main.is_current = branches.values().all(|b| !b.is_current);
            store.put_branch(&main).await?;
            branches.insert(main.name.clone(), main);
        }

        let current_branch = match branches.values().find(|b| b.is_current) {
            Some(branch) => branch.name.clone(),
            None => {
                // A store that lost its cursor falls back to main.
                let main = branches
                    .get_mut(MAIN_BRANCH)
                    .ok_or_else(|| EngineError::Branch("'main' branch missing".into()))?;
                main.is_current = true;
                store.put_branch(main).await?;
                MAIN_BRANCH.to_string()
            }
        };

        let last_timestamp = stored
            .last()
            .map(|cp| cp.timestamp)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let order: Vec<String> = stored.iter().map(|cp| cp.id.clone()).collect();
        let checkpoints: HashMap<String, Checkpoint> =
            stored.into_iter().map(|cp| (cp.id.clone(), cp)).collect();

        let metrics = SessionMetrics {
            checkpoints_created: checkpoints.len() as u64,
            ..Default::default()
        };

        info!(agent = %agent_name, checkpoints = checkpoints.len(), "session opened");

        Ok(Self {
            agent_name,
            store,
            inner: RwLock::new(SessionState {
                checkpoints,
                order,
                branches,
                current_branch,
                last_timestamp,
                metrics,
            }),
        })
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub async fn current_branch(&self) -> String {
        self.inner.read().await.current_branch.clone()
    }

    /// Read-only snapshot of the session counters.
    pub async fn metrics(&self) -> SessionMetrics {
        self.inner.read().await.metrics.clone()
    }

    // ── Checkpoint operations ──

    /// Save a new checkpoint on the current branch.
    ///
    /// The new node's parent is the current head (or none for the first
    /// checkpoint on `main`), and the branch head moves to it. The backend
    /// write happens first; if it fails the in-memory DAG is untouched.
    pub async fn checkpoint(
        &self,
        state: StateMap,
        metadata: StateMap,
        description: &str,
        logic_step: &str,
    ) -> Result<Checkpoint> {
        let mut inner = self.inner.write().await;
        let cp = self
            .create_checkpoint_locked(&mut inner, state, metadata, description, logic_step)
            .await?;
        info!(id = %cp.id, branch = %cp.branch, step = %cp.logic_step, "checkpoint created");
        Ok(cp)
    }

    /// Shared creation path for `checkpoint` and `merge`. Caller holds the
    /// write lock.
    async fn create_checkpoint_locked(
        &self,
        inner: &mut SessionState,
        state: StateMap,
        metadata: StateMap,
        description: &str,
        logic_step: &str,
    ) -> Result<Checkpoint> {
        let branch_name = inner.current_branch.clone();
        let branch = inner
            .branches
            .get(&branch_name)
            .ok_or_else(|| EngineError::Branch(format!("branch '{branch_name}' missing")))?;
        let parent_id = branch.head_id.clone();

        // Wall clock, clamped so timestamps never decrease within a session.
        let now = Utc::now();
        let timestamp = if now > inner.last_timestamp {
            now
        } else {
            inner.last_timestamp
        };

        let cp = Checkpoint::builder(&branch_name)
            .state(state)
            .metadata(metadata)
            .description(description)
            .logic_step(logic_step)
            .parent_id(parent_id)
            .timestamp(timestamp)
            .build();

        let mut updated_branch = branch.clone();
        updated_branch.head_id = Some(cp.id.clone());

        self.store.put(&cp).await?;
        self.store.put_branch(&updated_branch).await?;

        inner.checkpoints.insert(cp.id.clone(), cp.clone());
        inner.order.push(cp.id.clone());
        inner.branches.insert(branch_name, updated_branch);
        inner.last_timestamp = timestamp;
        inner.metrics.checkpoints_created += 1;

        Ok(cp)
    }

    /// Walk `steps` parent links up from the current head, marking every
    /// traversed checkpoint `rolled_back` and moving affected branch heads.
    pub async fn rollback(&self, steps: usize) -> Result<Checkpoint> {
        let mut inner = self.inner.write().await;
        let head = inner
            .current_head_id()
            .ok_or_else(|| EngineError::Rollback("no checkpoints to roll back".into()))?;

        let path = dag::ancestry(&inner.checkpoints, &head);
        if steps >= path.len() {
            return Err(EngineError::Rollback(format!(
                "cannot roll back {steps} step(s): only {} ancestor(s) available",
                path.len().saturating_sub(1),
            )));
        }
        let target = path[steps].clone();
        let traversed: Vec<String> = path[..steps].to_vec();

        self.apply_rollback_locked(&mut inner, &traversed, &target, None)
            .await?;

        let target_cp = inner.checkpoints[&target].clone();
        info!(target = %target_cp.id, steps, "rolled back");
        Ok(target_cp)
    }

    /// Roll back directly to a named checkpoint. The target must be an
    /// ancestor of the current head (walking parent links, possibly across
    /// branches); when it lies on another branch the session switches to
    /// that branch.
    pub async fn rollback_to(&self, checkpoint_id: &str) -> Result<Checkpoint> {
        let mut inner = self.inner.write().await;
        if !inner.checkpoints.contains_key(checkpoint_id) {
            return Err(EngineError::Rollback(format!(
                "unknown checkpoint '{checkpoint_id}'"
            )));
        }
        let head = inner
            .current_head_id()
            .ok_or_else(|| EngineError::Rollback("no checkpoints to roll back".into()))?;

        let traversed = dag::walk_to_target(&inner.checkpoints, &head, checkpoint_id)
            .ok_or_else(|| {
                EngineError::Rollback(format!(
                    "checkpoint '{checkpoint_id}' is not an ancestor of the current head"
                ))
            })?;

        let target_branch = inner.checkpoints[checkpoint_id].branch.clone();
        let switch_to = (target_branch != inner.current_branch).then_some(target_branch);

        self.apply_rollback_locked(&mut inner, &traversed, checkpoint_id, switch_to.as_deref())
            .await?;

        let target_cp = inner.checkpoints[checkpoint_id].clone();
        info!(target = %target_cp.id, "rolled back to checkpoint");
        Ok(target_cp)
    }

    /// Commit a rollback: statuses to the store, branch heads re-pointed,
    /// optional branch switch, then the in-memory mirror. Caller holds the
    /// write lock and has validated the walk.
    async fn apply_rollback_locked(
        &self,
        inner: &mut SessionState,
        traversed: &[String],
        target: &str,
        switch_to: Option<&str>,
    ) -> Result<()> {
        for id in traversed {
            self.store
                .update_status(id, CheckpointStatus::RolledBack)
                .await?;
        }

        let rolled: HashSet<&String> = traversed.iter().collect();
        let mut updated_branches: Vec<Branch> = Vec::new();
        for branch in inner.branches.values() {
            let mut branch = branch.clone();
            let mut touched = false;
            if branch
                .head_id
                .as_ref()
                .is_some_and(|head| rolled.contains(head))
            {
                // A rolled-back checkpoint can no longer be a head.
                branch.head_id = Some(target.to_string());
                touched = true;
            }
            match switch_to {
                Some(new_current) => {
                    let should_be_current = branch.name == new_current;
                    if branch.is_current != should_be_current {
                        branch.is_current = should_be_current;
                        touched = true;
                    }
                }
                None => {}
            }
            if touched {
                updated_branches.push(branch);
            }
        }
        for branch in &updated_branches {
            self.store.put_branch(branch).await?;
        }

        for id in traversed {
            if let Some(cp) = inner.checkpoints.get_mut(id) {
                cp.status = CheckpointStatus::RolledBack;
            }
        }
        for branch in updated_branches {
            inner.branches.insert(branch.name.clone(), branch);
        }
        if let Some(new_current) = switch_to {
            inner.current_branch = new_current.to_string();
        }
        inner.metrics.rollbacks += 1;
        Ok(())
    }

    /// State of the current head, if the current branch has one.
    pub async fn current_state(&self) -> Option<StateMap> {
        let inner = self.inner.read().await;
        let head = inner.current_head_id()?;
        inner.checkpoints.get(&head).map(|cp| cp.state.clone())
    }

    /// The checkpoint the current branch points at.
    pub async fn head(&self) -> Option<Checkpoint> {
        let inner = self.inner.read().await;
        let head = inner.current_head_id()?;
        inner.checkpoints.get(&head).cloned()
    }

    /// Fetch any checkpoint by id.
    pub async fn get_checkpoint(&self, id: &str) -> Option<Checkpoint> {
        self.inner.read().await.checkpoints.get(id).cloned()
    }

    // ── Branch operations ──

    /// Fork a new branch at the current head and switch to it. The fork
    /// shares history: its head starts at the current head.
    pub async fn branch(&self, name: &str) -> Result<Branch> {
        let mut inner = self.inner.write().await;
        if inner.branches.contains_key(name) {
            return Err(EngineError::Branch(format!("branch '{name}' already exists")));
        }

        let head = inner.current_head_id();
        let new_branch = Branch {
            name: name.to_string(),
            head_id: head.clone(),
            created_from: head,
            is_current: true,
        };
        let mut old_current = inner
            .branches
            .get(&inner.current_branch)
            .cloned()
            .ok_or_else(|| EngineError::Branch("current branch missing".into()))?;
        old_current.is_current = false;

        self.store.put_branch(&new_branch).await?;
        self.store.put_branch(&old_current).await?;

        inner.branches.insert(old_current.name.clone(), old_current);
        inner.branches.insert(new_branch.name.clone(), new_branch.clone());
        inner.current_branch = name.to_string();
        inner.metrics.branches_created += 1;

        info!(branch = name, from = ?new_branch.created_from, "branch created");
        Ok(new_branch)
    }

    /// Move the current-branch cursor.
    pub async fn switch_branch(&self, name: &str) -> Result<Branch> {
        let mut inner = self.inner.write().await;
        if !inner.branches.contains_key(name) {
            return Err(EngineError::Branch(format!("branch '{name}' does not exist")));
        }
        if inner.current_branch == name {
            return Ok(inner.branches[name].clone());
        }

        let mut old_current = inner.branches[&inner.current_branch].clone();
        old_current.is_current = false;
        let mut new_current = inner.branches[name].clone();
        new_current.is_current = true;

        self.store.put_branch(&old_current).await?;
        self.store.put_branch(&new_current).await?;

        inner.branches.insert(old_current.name.clone(), old_current);
        inner.branches.insert(new_current.name.clone(), new_current.clone());
        inner.current_branch = name.to_string();

        info!(branch = name, "switched branch");
        Ok(new_current)
    }

    /// Remove a branch cursor. Its checkpoints stay in the DAG (the store
    /// is append-only within a session). `main` and the current branch
    /// cannot be deleted.
    pub async fn delete_branch(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if name == MAIN_BRANCH {
            return Err(EngineError::Branch("'main' cannot be deleted".into()));
        }
        if name == inner.current_branch {
            return Err(EngineError::Branch("cannot delete the current branch".into()));
        }
        if !inner.branches.contains_key(name) {
            return Err(EngineError::Branch(format!("branch '{name}' does not exist")));
        }
        self.store.delete_branch(name).await?;
        inner.branches.remove(name);
        Ok(())
    }

    /// `(name, checkpoint count, is_current)` for every branch.
    pub async fn list_branches_info(&self) -> Vec<BranchInfo> {
        let inner = self.inner.read().await;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for cp in inner.checkpoints.values() {
            *counts.entry(cp.branch.as_str()).or_default() += 1;
        }
        let mut rows: Vec<BranchInfo> = inner
            .branches
            .values()
            .map(|b| BranchInfo {
                name: b.name.clone(),
                checkpoint_count: counts.get(b.name.as_str()).copied().unwrap_or(0),
                is_current: b.is_current,
            })
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    /// Produce a merge checkpoint on the current branch from the source
    /// branch's head, according to `strategy`. Both pre-merge heads are
    /// marked `merged`.
    pub async fn merge(&self, source_branch: &str, strategy: MergeStrategy) -> Result<Checkpoint> {
        let mut inner = self.inner.write().await;

        let source = inner
            .branches
            .get(source_branch)
            .ok_or_else(|| EngineError::Merge(format!("branch '{source_branch}' not found")))?;
        let source_head_id = source.head_id.clone().ok_or_else(|| {
            EngineError::Merge(format!("branch '{source_branch}' has no checkpoints"))
        })?;
        let source_cp = inner
            .checkpoints
            .get(&source_head_id)
            .cloned()
            .ok_or_else(|| EngineError::Merge(format!("head '{source_head_id}' missing")))?;

        let target_head_id = inner.current_head_id();
        let target_cp = target_head_id
            .as_ref()
            .and_then(|id| inner.checkpoints.get(id))
            .cloned();
        let target_state = target_cp
            .as_ref()
            .map(|cp| cp.state.clone())
            .unwrap_or_default();

        let merged_state = match strategy {
            MergeStrategy::PreferHigherConfidence => {
                let source_conf = source_cp.confidence().unwrap_or(0.0);
                let target_conf = target_cp
                    .as_ref()
                    .and_then(Checkpoint::confidence)
                    .unwrap_or(0.0);
                if source_conf > target_conf {
                    source_cp.state.clone()
                } else {
                    target_state
                }
            }
            MergeStrategy::Combine => {
                let mut merged = source_cp.state.clone();
                for (key, value) in &target_state {
                    merged.insert(key.clone(), value.clone());
                }
                merged
            }
            MergeStrategy::PreferSource => source_cp.state.clone(),
            MergeStrategy::PreferTarget => target_state,
        };

        let mut metadata = StateMap::new();
        metadata.insert("merged_from".into(), json!(source_head_id));
        metadata.insert("merge_strategy".into(), json!(strategy.as_str()));
        metadata.insert("source_branch".into(), json!(source_branch));

        let current_branch = inner.current_branch.clone();
        let merged_cp = self
            .create_checkpoint_locked(
                &mut inner,
                merged_state,
                metadata,
                &format!("Merged '{source_branch}' into '{current_branch}'"),
                &format!("merge:{source_branch}"),
            )
            .await?;

        // Both predecessors are consumed by the merge.
        self.store
            .update_status(&source_head_id, CheckpointStatus::Merged)
            .await?;
        if let Some(target_id) = &target_head_id {
            self.store
                .update_status(target_id, CheckpointStatus::Merged)
                .await?;
        }
        if let Some(cp) = inner.checkpoints.get_mut(&source_head_id) {
            cp.status = CheckpointStatus::Merged;
        }
        if let Some(target_id) = &target_head_id {
            if let Some(cp) = inner.checkpoints.get_mut(target_id) {
                cp.status = CheckpointStatus::Merged;
            }
        }

        info!(
            source = source_branch,
            target = %current_branch,
            strategy = %strategy,
            merge_id = %merged_cp.id,
            "branches merged"
        );
        Ok(merged_cp)
    }

    // ── History & inspection ──

    /// Key-wise comparison of two checkpoints' states.
    pub async fn diff(&self, id_a: &str, id_b: &str) -> Result<StateDiff> {
        let inner = self.inner.read().await;
        let a = inner
            .checkpoints
            .get(id_a)
            .ok_or_else(|| EngineError::NotFound(id_a.to_string()))?;
        let b = inner
            .checkpoints
            .get(id_b)
            .ok_or_else(|| EngineError::NotFound(id_b.to_string()))?;
        Ok(diff_states(&a.state, &b.state))
    }

    /// Checkpoints on the chosen branch (or all branches) in
    /// timestamp-ascending order, truncated to the most recent `limit`.
    pub async fn history(&self, limit: usize, branch: Option<&str>) -> Vec<Checkpoint> {
        let inner = self.inner.read().await;
        let matching: Vec<Checkpoint> = inner
            .order
            .iter()
            .filter_map(|id| inner.checkpoints.get(id))
            .filter(|cp| branch.map_or(true, |b| cp.branch == b))
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).collect()
    }

    /// ASCII rendering of the whole DAG.
    pub async fn visualize_tree(&self) -> String {
        let inner = self.inner.read().await;
        dag::render_tree(&inner.checkpoints, &inner.order)
    }

    // ── Import & export ──

    /// Snapshot the whole session as a serializable document.
    pub async fn export_session(&self) -> ExportDocument {
        let inner = self.inner.read().await;
        let checkpoints = inner
            .order
            .iter()
            .filter_map(|id| inner.checkpoints.get(id))
            .cloned()
            .collect();
        let mut branches: Vec<Branch> = inner.branches.values().cloned().collect();
        branches.sort_by(|a, b| a.name.cmp(&b.name));
        ExportDocument {
            version: 1,
            agent_name: self.agent_name.clone(),
            current_branch: inner.current_branch.clone(),
            checkpoints,
            branches,
        }
    }

    /// Rebuild a session from an export document, backed by a fresh
    /// in-memory store.
    pub async fn import_session(document: ExportDocument) -> Result<Self> {
        Self::import_into(document, Arc::new(MemoryStore::new())).await
    }

    /// Rebuild a session from an export document, writing every record
    /// through to the given backend. The document is validated against the
    /// session invariants before anything is written.
    pub async fn import_into(
        document: ExportDocument,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Self> {
        validate_document(&document)?;

        for cp in &document.checkpoints {
            store.put(cp).await?;
        }
        for branch in &document.branches {
            store.put_branch(branch).await?;
        }

        let order: Vec<String> = document.checkpoints.iter().map(|cp| cp.id.clone()).collect();
        let last_timestamp = document
            .checkpoints
            .last()
            .map(|cp| cp.timestamp)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let checkpoints: HashMap<String, Checkpoint> = document
            .checkpoints
            .into_iter()
            .map(|cp| (cp.id.clone(), cp))
            .collect();
        let branches: HashMap<String, Branch> = document
            .branches
            .into_iter()
            .map(|b| (b.name.clone(), b))
            .collect();

        let metrics = SessionMetrics {
            checkpoints_created: checkpoints.len() as u64,
            ..Default::default()
        };

        info!(agent = %document.agent_name, checkpoints = checkpoints.len(), "session imported");

        Ok(Self {
            agent_name: document.agent_name,
            store,
            inner: RwLock::new(SessionState {
                checkpoints,
                order,
                branches,
                current_branch: document.current_branch,
                last_timestamp,
                metrics,
            }),
        })
    }

    /// Wipe the backend for this agent. The in-memory session keeps its
    /// state; intended for teardown paths.
    pub async fn clear_store(&self) -> Result<()> {
        self.store.clear().await?;
        warn!(agent = %self.agent_name, "backend cleared");
        Ok(())
    }
}

/// Validate an export document against the session invariants.
fn validate_document(document: &ExportDocument) -> Result<()> {
    let fail = |msg: String| Err(EngineError::Import(msg));

    if document.version != 1 {
        return fail(format!("unsupported export version {}", document.version));
    }

    let mut ids = HashSet::new();
    for cp in &document.checkpoints {
        if !ids.insert(cp.id.as_str()) {
            return fail(format!("duplicate checkpoint id '{}'", cp.id));
        }
    }

    // Parent existence, then acyclicity of the parent graph.
    for cp in &document.checkpoints {
        if let Some(parent) = &cp.parent_id {
            if !ids.contains(parent.as_str()) {
                return fail(format!(
                    "checkpoint '{}' references missing parent '{parent}'",
                    cp.id
                ));
            }
        }
    }
    let by_id: HashMap<&str, &Checkpoint> = document
        .checkpoints
        .iter()
        .map(|cp| (cp.id.as_str(), cp))
        .collect();
    for cp in &document.checkpoints {
        let mut visited = HashSet::new();
        let mut current = Some(cp.id.as_str());
        while let Some(id) = current {
            if !visited.insert(id) {
                return fail(format!("cycle in parent links at '{id}'"));
            }
            current = by_id.get(id).and_then(|cp| cp.parent_id.as_deref());
        }
    }

    // Fingerprints are a pure function of content.
    for cp in &document.checkpoints {
        let expected = fingerprint(&cp.state, &cp.metadata, &cp.logic_step);
        if cp.fingerprint != expected {
            return fail(format!("fingerprint mismatch for checkpoint '{}'", cp.id));
        }
    }

    let mut names = HashSet::new();
    for branch in &document.branches {
        if !names.insert(branch.name.as_str()) {
            return fail(format!("duplicate branch '{}'", branch.name));
        }
        if let Some(head) = &branch.head_id {
            let Some(head_cp) = by_id.get(head.as_str()) else {
                return fail(format!(
                    "branch '{}' points at missing head '{head}'",
                    branch.name
                ));
            };
            if head_cp.status == CheckpointStatus::RolledBack {
                return fail(format!(
                    "branch '{}' points at rolled-back head '{head}'",
                    branch.name
                ));
            }
        }
    }
    if !names.contains(MAIN_BRANCH) {
        return fail("'main' branch missing".to_string());
    }

    let current: Vec<&str> = document
        .branches
        .iter()
        .filter(|b| b.is_current)
        .map(|b| b.name.as_str())
        .collect();
    if current.len() != 1 {
        return fail(format!("expected exactly one current branch, found {}", current.len()));
    }
    if current[0] != document.current_branch {
        return fail(format!(
            "current_branch '{}' does not match flagged branch '{}'",
            document.current_branch, current[0]
        ));
    }

    Ok(())
}
