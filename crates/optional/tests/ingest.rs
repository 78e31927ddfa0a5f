#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use optmodel_core::{Delta, DeltaKind};
use optmodel_optional::{optional_model, Branch};
use optmodel_schema::{FieldKind, ModelMetadata, SchemaRegistry};
use optmodel_store::{spawn_ingest, MainRepository};

fn repo() -> Arc<MainRepository> {
    Arc::new(MainRepository::new(
        SchemaRegistry::new().with(ModelMetadata::new("user").field("name", &[FieldKind::String])),
    ))
}

fn delta(id: &str, kind: DeltaKind, raw: serde_json::Value) -> Delta {
    Delta { model_type: "user".into(), id: id.into(), kind, raw }
}

async fn wait_for_epoch(rx: &mut tokio::sync::watch::Receiver<u64>, at_least: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while *rx.borrow() < at_least {
        if tokio::time::timeout_at(deadline, rx.changed()).await.is_err() {
            break;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn selector_follows_deltas_written_by_the_ingest_task() {
    let repo = repo();
    let sel = optional_model(&repo, "user".into(), "u1".into())
        .unwrap()
        .on_empty(|stub| format!("loading:{}", stub.id))
        .on_full(|user| user.get_str("name").unwrap_or_default().to_string());
    assert_eq!(sel.result().unwrap(), Branch::Empty("loading:u1".to_string()));

    let (tx, handle) = spawn_ingest(Arc::clone(&repo), 64);
    let mut rx = handle.subscribe_epoch();

    // a pending delta changes the load state only; the memo sees a new version
    tx.send(delta("u1", DeltaKind::Pending, serde_json::Value::Null)).await.unwrap();
    wait_for_epoch(&mut rx, 1).await;
    assert_eq!(handle.current_epoch(), 1);
    assert_eq!(sel.result().unwrap(), Branch::Empty("loading:u1".to_string()));
    assert_eq!(sel.recomputations(), 2);

    tx.send(delta("u1", DeltaKind::Applied, serde_json::json!({ "name": "Ann" }))).await.unwrap();
    wait_for_epoch(&mut rx, 2).await;
    assert_eq!(sel.result().unwrap(), Branch::Full("Ann".to_string()));
    assert_eq!(sel.recomputations(), 3);

    // nothing written since: served from cache
    assert_eq!(sel.result().unwrap(), Branch::Full("Ann".to_string()));
    assert_eq!(sel.recomputations(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stub_turns_full_after_one_ingest_epoch() {
    let repo = repo();
    let sel = optional_model(&repo, "user".into(), "u2".into()).unwrap().on_empty(|_| "stub").on_full(|_| "full");
    assert_eq!(sel.result().unwrap(), Branch::Empty("stub"));

    let (tx, handle) = spawn_ingest(Arc::clone(&repo), 64);
    let mut rx = handle.subscribe_epoch();
    tx.send(delta("u2", DeltaKind::Applied, serde_json::json!({ "name": "Bob" }))).await.unwrap();
    wait_for_epoch(&mut rx, 1).await;

    assert!(handle.current_epoch() >= 1);
    assert_eq!(sel.result().unwrap(), Branch::Full("full"));
    assert_eq!(sel.recomputations(), 2);
}
