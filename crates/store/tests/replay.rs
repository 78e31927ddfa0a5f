#![forbid(unsafe_code)]

use optmodel_core::{Delta, DeltaKind, LoadState, Repository};
use optmodel_schema::{FieldKind, ModelMetadata, SchemaRegistry};
use optmodel_store::MainRepository;

fn registry() -> SchemaRegistry {
    SchemaRegistry::new().with(ModelMetadata::new("user").field("name", &[FieldKind::String]))
}

fn d(id: &str, kind: DeltaKind, raw: serde_json::Value) -> Delta {
    Delta { model_type: "user".into(), id: id.into(), kind, raw }
}

#[test]
fn replay_basic_sequence() {
    let repo = MainRepository::new(registry());

    // pending -> applied -> re-applied with new fields -> deleted
    let deltas = vec![
        d("u1", DeltaKind::Pending, serde_json::Value::Null),
        d("u1", DeltaKind::Applied, serde_json::json!({ "name": "Ann" })),
        d("u2", DeltaKind::Applied, serde_json::json!({ "name": "Bob" })),
        d("u1", DeltaKind::Applied, serde_json::json!({ "name": "Anna" })),
        d("u2", DeltaKind::Deleted, serde_json::Value::Null),
    ];

    assert_eq!(repo.apply(deltas[..2].to_vec()), 1);
    let u1 = repo.peek(&"user".into(), &"u1".into()).unwrap();
    assert_eq!(u1.load, LoadState::Done);
    assert_eq!(u1.record.get_str("name"), Some("Ann"));

    assert_eq!(repo.apply(deltas[2..].to_vec()), 2);
    assert_eq!(repo.epoch(), 2);
    assert_eq!(repo.len(), 2);
    let u1 = repo.peek(&"user".into(), &"u1".into()).unwrap();
    assert_eq!(u1.record.get_str("name"), Some("Anna"));
    let u2 = repo.peek(&"user".into(), &"u2".into()).unwrap();
    assert!(u2.record.is_stub());
    assert_eq!(u2.load, LoadState::None);
}

#[test]
fn pending_and_failed_keep_known_fields() {
    let repo = MainRepository::new(registry());
    repo.apply(vec![d("u1", DeltaKind::Applied, serde_json::json!({ "name": "Ann" }))]);
    repo.apply(vec![d("u1", DeltaKind::Pending, serde_json::Value::Null)]);
    let u1 = repo.peek(&"user".into(), &"u1".into()).unwrap();
    assert_eq!(u1.load, LoadState::Pending);
    assert_eq!(u1.record.get_str("name"), Some("Ann"));

    repo.apply(vec![d("u1", DeltaKind::Failed, serde_json::Value::Null)]);
    let u1 = repo.peek(&"user".into(), &"u1".into()).unwrap();
    assert_eq!(u1.load, LoadState::Error("fetch failed".to_string()));
    assert!(repo.is_full_model(&u1.record, &"user".into()).unwrap());
}

#[test]
fn malformed_and_unknown_deltas_are_skipped() {
    let repo = MainRepository::new(registry());
    repo.apply(vec![
        d("u1", DeltaKind::Applied, serde_json::json!("not an object")),
        Delta { model_type: "ghost".into(), id: "g1".into(), kind: DeltaKind::Applied, raw: serde_json::json!({}) },
    ]);
    assert_eq!(repo.epoch(), 1);
    assert!(repo.peek(&"ghost".into(), &"g1".into()).is_none());
    // neither delta leaves a cell behind
    assert!(repo.peek(&"user".into(), &"u1".into()).is_none());
    assert!(repo.is_empty());
}

#[test]
fn observe_creates_stub_and_rejects_unknown_types() {
    let repo = MainRepository::new(registry());
    let r = repo.observe(&"user".into(), &"u7".into()).unwrap();
    assert!(r.get().record.is_stub());
    assert_eq!(r.version(), 0);
    assert!(repo.observe(&"ghost".into(), &"x".into()).unwrap_err().is_unknown_model_type());

    repo.apply(vec![d("u7", DeltaKind::Applied, serde_json::json!({ "name": "Gus" }))]);
    assert_eq!(r.version(), 1);
    assert_eq!(r.get().record.get_str("name"), Some("Gus"));
}

#[test]
fn repeated_identical_delta_does_not_bump_version() {
    let repo = MainRepository::new(registry());
    let r = repo.observe(&"user".into(), &"u1".into()).unwrap();
    repo.apply(vec![d("u1", DeltaKind::Applied, serde_json::json!({ "name": "Ann" }))]);
    repo.apply(vec![d("u1", DeltaKind::Applied, serde_json::json!({ "name": "Ann" }))]);
    assert_eq!(r.version(), 1);
    assert_eq!(repo.epoch(), 2);
}

#[test]
fn register_schema_changes_judgment() {
    let repo = MainRepository::new(registry());
    repo.apply(vec![d("u1", DeltaKind::Applied, serde_json::json!({ "name": "Ann" }))]);
    let rec = repo.resolve(&"user".into(), &"u1".into()).unwrap();
    assert!(repo.is_full_model(&rec, &"user".into()).unwrap());

    let stricter = ModelMetadata::new("user").field("name", &[FieldKind::String]).field("email", &[FieldKind::String]);
    assert!(repo.register_schema(stricter.clone()));
    assert!(!repo.register_schema(stricter));
    assert!(!repo.is_full_model(&rec, &"user".into()).unwrap());
    assert_eq!(repo.links(&"user".into()).unwrap().len(), 0);
    assert!(repo.metadata(&"ghost".into()).is_err());
}
