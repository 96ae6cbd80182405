//! Backend parity: the three storage backends, seeded with the same
//! operation sequence, must expose identical observable behavior.

use chrono::{Duration, Utc};
use mindgit_checkpoint::{
    Branch, Checkpoint, CheckpointFilter, CheckpointStatus, CheckpointStore, FileTreeStore,
    MemoryStore, SerializerKind, SqliteStore, StateMap,
};
use serde_json::json;

fn map_of(pairs: &[(&str, serde_json::Value)]) -> StateMap {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// A fixed sequence of checkpoints with deterministic ids and timestamps,
/// spanning two branches and all three statuses.
fn seed_checkpoints() -> Vec<Checkpoint> {
    let base = Utc::now();
    let rows = [
        ("cp-aaaa", "main", None, "start", 0i64),
        ("cp-bbbb", "main", Some("cp-aaaa"), "plan", 1),
        ("cp-cccc", "alt", Some("cp-bbbb"), "cached", 2),
        ("cp-dddd", "main", Some("cp-bbbb"), "live", 2), // timestamp tie with cp-cccc
        ("cp-eeee", "main", Some("cp-dddd"), "merge", 3),
    ];
    rows.iter()
        .map(|(id, branch, parent, step, offset)| {
            Checkpoint::builder(*branch)
                .id(*id)
                .timestamp(base + Duration::milliseconds(*offset))
                .state(map_of(&[("step", json!(step))]))
                .metadata(map_of(&[("confidence", json!(0.5))]))
                .description(format!("{step} checkpoint"))
                .logic_step(*step)
                .parent_id(parent.map(String::from))
                .build()
        })
        .collect()
}

async fn run_sequence(store: &dyn CheckpointStore) {
    let checkpoints = seed_checkpoints();
    for cp in &checkpoints {
        store.put(cp).await.unwrap();
    }
    // Repeat one put verbatim: must be a no-op for ordering.
    store.put(&checkpoints[1]).await.unwrap();

    store
        .update_status("cp-cccc", CheckpointStatus::Merged)
        .await
        .unwrap();
    store
        .update_status("cp-dddd", CheckpointStatus::Merged)
        .await
        .unwrap();

    let mut main = Branch::new("main");
    main.head_id = Some("cp-eeee".into());
    main.is_current = true;
    store.put_branch(&main).await.unwrap();

    let mut alt = Branch::new("alt");
    alt.head_id = Some("cp-cccc".into());
    alt.created_from = Some("cp-bbbb".into());
    store.put_branch(&alt).await.unwrap();
}

#[derive(Debug, PartialEq)]
struct Observed {
    all: Vec<(String, String, CheckpointStatus, Option<String>)>,
    main_only: Vec<String>,
    active_only: Vec<String>,
    branches: Vec<(String, Option<String>, bool)>,
    missing: bool,
}

async fn observe(store: &dyn CheckpointStore) -> Observed {
    let all = store
        .list(&CheckpointFilter::default())
        .await
        .unwrap()
        .into_iter()
        .map(|cp| (cp.id, cp.branch, cp.status, cp.parent_id))
        .collect();
    let main_only = store
        .list(&CheckpointFilter::new().with_branch("main"))
        .await
        .unwrap()
        .into_iter()
        .map(|cp| cp.id)
        .collect();
    let active_only = store
        .list(&CheckpointFilter::new().with_status(CheckpointStatus::Active))
        .await
        .unwrap()
        .into_iter()
        .map(|cp| cp.id)
        .collect();
    let branches = store
        .list_branches()
        .await
        .unwrap()
        .into_iter()
        .map(|b| (b.name, b.head_id, b.is_current))
        .collect();
    let missing = store.get("cp-missing").await.unwrap().is_none();
    Observed {
        all,
        main_only,
        active_only,
        branches,
        missing,
    }
}

#[tokio::test]
async fn backends_agree_on_same_operation_sequence() {
    let memory = MemoryStore::new();
    run_sequence(&memory).await;
    let expected = observe(&memory).await;

    // Sanity-check the reference itself before comparing backends to it.
    assert_eq!(expected.all.len(), 5);
    assert_eq!(
        expected.all.iter().map(|(id, ..)| id.as_str()).collect::<Vec<_>>(),
        vec!["cp-aaaa", "cp-bbbb", "cp-cccc", "cp-dddd", "cp-eeee"],
        "timestamp order with insertion-order tie-break"
    );
    assert_eq!(expected.active_only, vec!["cp-aaaa", "cp-bbbb", "cp-eeee"]);
    assert!(expected.missing);

    let dir = tempfile::tempdir().unwrap();
    let file_tree = FileTreeStore::open(dir.path()).await.unwrap();
    run_sequence(&file_tree).await;
    assert_eq!(observe(&file_tree).await, expected, "file-tree backend");

    let sqlite = SqliteStore::open_in_memory(SerializerKind::Json).await.unwrap();
    run_sequence(&sqlite).await;
    assert_eq!(observe(&sqlite).await, expected, "sqlite backend");
}

#[tokio::test]
async fn backends_agree_after_clear() {
    let memory = MemoryStore::new();
    let dir = tempfile::tempdir().unwrap();
    let file_tree = FileTreeStore::open(dir.path()).await.unwrap();
    let sqlite = SqliteStore::open_in_memory(SerializerKind::Json).await.unwrap();

    for store in [&memory as &dyn CheckpointStore, &file_tree, &sqlite] {
        run_sequence(store).await;
        store.clear().await.unwrap();
        assert!(store.list(&CheckpointFilter::default()).await.unwrap().is_empty());
        assert!(store.list_branches().await.unwrap().is_empty());
    }
}
