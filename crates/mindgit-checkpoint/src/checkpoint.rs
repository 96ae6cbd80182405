//! Core checkpoint data structures
//!
//! This module defines the record types shared by the engine and every
//! storage backend: **[`Checkpoint`]** (one immutable reasoning-state
//! snapshot), **[`Branch`]** (a named head cursor plus fork origin),
//! **[`CheckpointStatus`]** (the one-way lifecycle), and
//! **[`CheckpointFilter`]** (query criteria for [`list`]).
//!
//! A checkpoint is never mutated after creation except for its status, and
//! status moves only forward:
//!
//! ```text
//!          create                      ancestor of a rollback target
//!   (none) ──────▶ active ─────────────────────────────────────▶ rolled_back
//!                    │
//!                    │ predecessor of a successful merge
//!                    └──────────────────────────────────────────▶ merged
//! ```
//!
//! Both `rolled_back` and `merged` are terminal.
//!
//! [`list`]: crate::traits::CheckpointStore::list

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::serializer::fingerprint;

/// Dynamic state payload: string keys mapped to JSON-representable values.
pub type StateMap = serde_json::Map<String, Value>;

/// Lifecycle status of a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Live node, eligible to be a branch head
    Active,
    /// Undone by a rollback; still queryable, never a head again
    RolledBack,
    /// Consumed as a predecessor of a merge checkpoint
    Merged,
}

impl CheckpointStatus {
    /// Whether the one-way status machine permits `self -> next`.
    /// A transition to the current status is allowed so that
    /// `update_status` stays idempotent under identical inputs.
    pub fn can_transition_to(self, next: CheckpointStatus) -> bool {
        match (self, next) {
            (a, b) if a == b => true,
            (CheckpointStatus::Active, _) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::Active => "active",
            CheckpointStatus::RolledBack => "rolled_back",
            CheckpointStatus::Merged => "merged",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(CheckpointStatus::Active),
            "rolled_back" => Some(CheckpointStatus::RolledBack),
            "merged" => Some(CheckpointStatus::Merged),
            _ => None,
        }
    }
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable snapshot of an agent's reasoning state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Process-unique short opaque identifier
    pub id: String,

    /// Wall-clock creation time; monotonic non-decreasing within a session
    pub timestamp: DateTime<Utc>,

    /// The agent's state payload at this step
    #[serde(default)]
    pub state: StateMap,

    /// Free-form annotations. `confidence` (0..1) and `tokens_used`
    /// (non-negative integer) are first-class but optional.
    #[serde(default)]
    pub metadata: StateMap,

    /// Human-readable one-line label
    #[serde(default)]
    pub description: String,

    /// Short symbolic name for the reasoning step
    #[serde(default)]
    pub logic_step: String,

    /// Branch the checkpoint was created on
    pub branch: String,

    /// Immediate predecessor; `None` only for a root
    #[serde(default)]
    pub parent_id: Option<String>,

    /// Lifecycle status
    pub status: CheckpointStatus,

    /// Content hash over `(state, metadata, logic_step)`
    pub fingerprint: String,
}

impl Checkpoint {
    /// Start building a checkpoint on the given branch.
    pub fn builder(branch: impl Into<String>) -> CheckpointBuilder {
        CheckpointBuilder::new(branch)
    }

    /// The `confidence` metadata key, when present and numeric.
    pub fn confidence(&self) -> Option<f64> {
        self.metadata.get("confidence").and_then(Value::as_f64)
    }

    /// The `tokens_used` metadata key, when present and integral.
    pub fn tokens_used(&self) -> Option<u64> {
        self.metadata.get("tokens_used").and_then(Value::as_u64)
    }

    pub fn is_active(&self) -> bool {
        self.status == CheckpointStatus::Active
    }

    /// Id truncated for display.
    pub fn short_id(&self) -> &str {
        let end = self.id.len().min(8);
        &self.id[..end]
    }
}

/// Generate a fresh short checkpoint id.
pub(crate) fn new_checkpoint_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Builder for [`Checkpoint`]
///
/// Computes the content fingerprint at `build()` time so that the stored
/// hash is always consistent with the final state, metadata, and step name.
#[derive(Debug, Default)]
pub struct CheckpointBuilder {
    branch: String,
    state: StateMap,
    metadata: StateMap,
    description: String,
    logic_step: String,
    parent_id: Option<String>,
    id: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

impl CheckpointBuilder {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            ..Default::default()
        }
    }

    pub fn state(mut self, state: StateMap) -> Self {
        self.state = state;
        self
    }

    pub fn metadata(mut self, metadata: StateMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn logic_step(mut self, logic_step: impl Into<String>) -> Self {
        self.logic_step = logic_step.into();
        self
    }

    pub fn parent_id(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = parent_id;
        self
    }

    /// Override the generated id (used by import).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Override the creation timestamp (used by import and by the session's
    /// monotonic clock clamp).
    pub fn timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }

    pub fn build(self) -> Checkpoint {
        let fp = fingerprint(&self.state, &self.metadata, &self.logic_step);
        Checkpoint {
            id: self.id.unwrap_or_else(new_checkpoint_id),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            state: self.state,
            metadata: self.metadata,
            description: self.description,
            logic_step: self.logic_step,
            branch: self.branch,
            parent_id: self.parent_id,
            status: CheckpointStatus::Active,
            fingerprint: fp,
        }
    }
}

/// A named cursor over the checkpoint DAG
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    /// Unique within a session
    pub name: String,

    /// Latest active checkpoint on this branch; `None` for an empty branch
    #[serde(default)]
    pub head_id: Option<String>,

    /// Checkpoint this branch was forked from; `None` for `main`
    #[serde(default)]
    pub created_from: Option<String>,

    /// Exactly one branch in a session is current at any time
    #[serde(default)]
    pub is_current: bool,
}

impl Branch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            head_id: None,
            created_from: None,
            is_current: false,
        }
    }
}

/// Query criteria for [`CheckpointStore::list`]
///
/// [`CheckpointStore::list`]: crate::traits::CheckpointStore::list
#[derive(Debug, Clone, Default)]
pub struct CheckpointFilter {
    pub branch: Option<String>,
    pub status: Option<CheckpointStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl CheckpointFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_status(mut self, status: CheckpointStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Whether a checkpoint satisfies every set criterion.
    pub fn matches(&self, cp: &Checkpoint) -> bool {
        if let Some(branch) = &self.branch {
            if &cp.branch != branch {
                return false;
            }
        }
        if let Some(status) = self.status {
            if cp.status != status {
                return false;
            }
        }
        if let Some(since) = self.since {
            if cp.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if cp.timestamp > until {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_of(pairs: &[(&str, Value)]) -> StateMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_builder_generates_id_and_fingerprint() {
        let cp = Checkpoint::builder("main")
            .state(state_of(&[("k", json!("v"))]))
            .description("first")
            .logic_step("intake")
            .build();

        assert_eq!(cp.id.len(), 8);
        assert_eq!(cp.branch, "main");
        assert_eq!(cp.status, CheckpointStatus::Active);
        assert!(!cp.fingerprint.is_empty());
        assert!(cp.parent_id.is_none());
    }

    #[test]
    fn test_status_transitions_one_way() {
        use CheckpointStatus::*;
        assert!(Active.can_transition_to(RolledBack));
        assert!(Active.can_transition_to(Merged));
        assert!(Active.can_transition_to(Active));
        assert!(RolledBack.can_transition_to(RolledBack));
        assert!(!RolledBack.can_transition_to(Active));
        assert!(!RolledBack.can_transition_to(Merged));
        assert!(!Merged.can_transition_to(Active));
        assert!(!Merged.can_transition_to(RolledBack));
    }

    #[test]
    fn test_first_class_metadata_keys() {
        let cp = Checkpoint::builder("main")
            .metadata(state_of(&[
                ("confidence", json!(0.87)),
                ("tokens_used", json!(150)),
            ]))
            .build();

        assert_eq!(cp.confidence(), Some(0.87));
        assert_eq!(cp.tokens_used(), Some(150));
    }

    #[test]
    fn test_unknown_keys_ignored_on_read() {
        let raw = json!({
            "id": "abcd1234",
            "timestamp": "2024-01-01T00:00:00Z",
            "state": {},
            "metadata": {},
            "description": "",
            "logic_step": "",
            "branch": "main",
            "parent_id": null,
            "status": "active",
            "fingerprint": "deadbeef",
            "some_future_field": 42
        });

        let cp: Checkpoint = serde_json::from_value(raw).unwrap();
        assert_eq!(cp.id, "abcd1234");
    }

    #[test]
    fn test_filter_matching() {
        let cp = Checkpoint::builder("alt")
            .state(state_of(&[("x", json!(1))]))
            .build();

        assert!(CheckpointFilter::new().matches(&cp));
        assert!(CheckpointFilter::new().with_branch("alt").matches(&cp));
        assert!(!CheckpointFilter::new().with_branch("main").matches(&cp));
        assert!(CheckpointFilter::new()
            .with_status(CheckpointStatus::Active)
            .matches(&cp));
        assert!(!CheckpointFilter::new()
            .with_status(CheckpointStatus::Merged)
            .matches(&cp));
    }
}
