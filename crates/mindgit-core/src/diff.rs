//! Key-wise comparison of two checkpoint states

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use mindgit_checkpoint::{canonical_json, StateMap};

/// An `(old, new)` value pair for a modified key
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValueChange {
    pub old: Value,
    pub new: Value,
}

/// Result of comparing checkpoint `a` against checkpoint `b`
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct StateDiff {
    /// Keys present in `b` but not `a`, with their new values
    pub added: BTreeMap<String, Value>,
    /// Keys present in `a` but not `b`, with their old values
    pub removed: BTreeMap<String, Value>,
    /// Keys present in both with differing values
    pub modified: BTreeMap<String, ValueChange>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Compare two state mappings key by key. Values are compared by their
/// canonical form, so key order inside nested objects does not register as
/// a change.
pub fn diff_states(a: &StateMap, b: &StateMap) -> StateDiff {
    let mut diff = StateDiff::default();

    for (key, b_val) in b {
        match a.get(key) {
            None => {
                diff.added.insert(key.clone(), b_val.clone());
            }
            Some(a_val) if canonical_json(a_val) != canonical_json(b_val) => {
                diff.modified.insert(
                    key.clone(),
                    ValueChange {
                        old: a_val.clone(),
                        new: b_val.clone(),
                    },
                );
            }
            Some(_) => {}
        }
    }
    for (key, a_val) in a {
        if !b.contains_key(key) {
            diff.removed.insert(key.clone(), a_val.clone());
        }
    }

    diff
}
