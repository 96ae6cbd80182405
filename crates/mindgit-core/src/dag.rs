//! Parent-link traversal and ASCII rendering of the checkpoint DAG
//!
//! The DAG is implicit: every checkpoint names its predecessor through
//! `parent_id`, and branches are just cursors into it. These helpers walk
//! the parent links (always with a visited guard, so a corrupt store cannot
//! loop forever) and render the forest for humans. The rendered format is
//! not a compatibility surface.

use std::collections::{HashMap, HashSet};

use mindgit_checkpoint::{Checkpoint, CheckpointStatus};

/// Ids encountered walking parent links from `start` (inclusive) to a root.
pub fn ancestry(checkpoints: &HashMap<String, Checkpoint>, start: &str) -> Vec<String> {
    let mut path = Vec::new();
    let mut visited = HashSet::new();
    let mut current = Some(start.to_string());
    while let Some(id) = current {
        if !visited.insert(id.clone()) {
            break;
        }
        let Some(cp) = checkpoints.get(&id) else { break };
        path.push(id);
        current = cp.parent_id.clone();
    }
    path
}

/// Whether `candidate` is `start` itself or one of its ancestors.
pub fn is_ancestor(
    checkpoints: &HashMap<String, Checkpoint>,
    start: &str,
    candidate: &str,
) -> bool {
    ancestry(checkpoints, start).iter().any(|id| id == candidate)
}

/// Ids strictly between `head` (inclusive) and `target` (exclusive) on the
/// parent walk, or `None` if `target` is not an ancestor of `head`.
pub fn walk_to_target(
    checkpoints: &HashMap<String, Checkpoint>,
    head: &str,
    target: &str,
) -> Option<Vec<String>> {
    let mut traversed = Vec::new();
    for id in ancestry(checkpoints, head) {
        if id == target {
            return Some(traversed);
        }
        traversed.push(id);
    }
    None
}

fn status_glyph(status: CheckpointStatus) -> &'static str {
    match status {
        CheckpointStatus::Active => "●",
        CheckpointStatus::RolledBack => "○",
        CheckpointStatus::Merged => "◆",
    }
}

fn truncated(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

/// Render the DAG as an ASCII forest, roots first, children in creation
/// order. Each node shows its status glyph, up to 45 chars of description,
/// and the first 8 chars of its id.
pub fn render_tree(checkpoints: &HashMap<String, Checkpoint>, creation_order: &[String]) -> String {
    if creation_order.is_empty() {
        return "(empty tree)".to_string();
    }

    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut roots: Vec<&str> = Vec::new();
    for id in creation_order {
        let Some(cp) = checkpoints.get(id) else { continue };
        match cp.parent_id.as_deref().filter(|p| checkpoints.contains_key(*p)) {
            Some(parent) => children.entry(parent).or_default().push(id),
            None => roots.push(id),
        }
    }

    let mut lines = Vec::new();
    for (i, root) in roots.iter().enumerate() {
        render_node(
            checkpoints,
            &children,
            root,
            "",
            i == roots.len() - 1,
            &mut lines,
        );
    }
    lines.join("\n")
}

fn render_node(
    checkpoints: &HashMap<String, Checkpoint>,
    children: &HashMap<&str, Vec<&str>>,
    id: &str,
    prefix: &str,
    is_last: bool,
    lines: &mut Vec<String>,
) {
    let Some(cp) = checkpoints.get(id) else { return };
    let connector = if is_last { "└── " } else { "├── " };
    let label = if cp.description.is_empty() {
        &cp.logic_step
    } else {
        &cp.description
    };
    lines.push(format!(
        "{prefix}{connector}{} {} [{}]",
        status_glyph(cp.status),
        truncated(label, 45),
        cp.short_id(),
    ));

    let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
    if let Some(kids) = children.get(id) {
        for (i, kid) in kids.iter().enumerate() {
            render_node(
                checkpoints,
                children,
                kid,
                &child_prefix,
                i == kids.len() - 1,
                lines,
            );
        }
    }
}
