use bson::{Bson, doc};
use tempfile::tempdir;
use tinydb::{Engine, EngineOptions, Error, SecurityMetadata, WriteConcern};

fn open(path: &std::path::Path) -> Engine {
    Engine::open(path, EngineOptions::default()).unwrap()
}

#[test]
fn create_insert_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("app.db");
    {
        let engine = open(&path);
        let users = engine.collection("users").unwrap();
        users.insert(doc! { "_id": "u1", "name": "Ana", "age": 30 }).unwrap();
        users.insert(doc! { "_id": "u2", "name": "Bob", "age": 41 }).unwrap();
        engine.close().unwrap();
    }
    let engine = open(&path);
    let users = engine.collection("users").unwrap();
    assert_eq!(users.doc_count().unwrap(), 2);
    let bob = users.find_by_id(&Bson::String("u2".into())).unwrap().unwrap();
    assert_eq!(bob.get_str("name").unwrap(), "Bob");
    assert_eq!(bob.get_i32("age").unwrap(), 41);
    engine.close().unwrap();
}

#[test]
fn document_roundtrip_is_byte_identical() {
    let dir = tempdir().unwrap();
    let engine = open(&dir.path().join("app.db"));
    let col = engine.collection("docs").unwrap();
    let original = doc! {
        "_id": 1,
        "s": "text",
        "i64": 9_000_000_000_i64,
        "f": 1.5_f64,
        "b": true,
        "nested": { "x": [1, 2, 3] },
        "bin": bson::Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: vec![1, 2, 3] },
        "at": bson::DateTime::from_millis(1_700_000_000_000),
    };
    col.insert(original.clone()).unwrap();
    let read_back = col.find_by_id(&Bson::Int32(1)).unwrap().unwrap();

    let mut a = Vec::new();
    original.to_writer(&mut a).unwrap();
    let mut b = Vec::new();
    read_back.to_writer(&mut b).unwrap();
    assert_eq!(a, b);
}

#[test]
fn operations_after_close_are_disposed() {
    let dir = tempdir().unwrap();
    let engine = open(&dir.path().join("app.db"));
    let col = engine.collection("c").unwrap();
    engine.close().unwrap();
    assert!(matches!(col.insert(doc! { "x": 1 }), Err(Error::Disposed)));
    assert!(matches!(engine.collection("c"), Err(Error::Disposed)));
    assert!(matches!(engine.checkpoint(), Err(Error::Disposed)));
}

#[test]
fn password_protection_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("secret.db");
    {
        let opts = EngineOptions { password: Some("hunter2".into()), ..Default::default() };
        let engine = Engine::open(&path, opts).unwrap();
        engine.collection("c").unwrap().insert(doc! { "_id": 1 }).unwrap();
        engine.close().unwrap();
    }
    // No password at all.
    assert!(matches!(
        Engine::open(&path, EngineOptions::default()),
        Err(Error::Unauthorized)
    ));
    // Wrong password.
    let wrong = EngineOptions { password: Some("nope".into()), ..Default::default() };
    assert!(matches!(Engine::open(&path, wrong), Err(Error::Unauthorized)));
    // Right password.
    let right = EngineOptions { password: Some("hunter2".into()), ..Default::default() };
    let engine = Engine::open(&path, right).unwrap();
    assert_eq!(engine.collection("c").unwrap().doc_count().unwrap(), 1);
    engine.close().unwrap();
}

#[test]
fn security_metadata_is_opaque_to_the_core() {
    let dir = tempdir().unwrap();
    let engine = open(&dir.path().join("app.db"));
    assert!(engine.security_metadata().unwrap().is_none());
    let meta = SecurityMetadata { salt: [3; 16], key_hash: [9; 32] };
    engine.set_security_metadata(meta).unwrap();
    assert_eq!(engine.security_metadata().unwrap(), Some(meta));
    engine.clear_security_metadata().unwrap();
    assert!(engine.security_metadata().unwrap().is_none());
    engine.close().unwrap();
}

#[test]
fn invalid_options_fail_eagerly() {
    let dir = tempdir().unwrap();
    let opts = EngineOptions { page_size: 16, ..Default::default() };
    assert!(matches!(
        Engine::open(dir.path().join("t.db"), opts),
        Err(Error::InvalidArgument(_))
    ));
    let opts = EngineOptions { cache_size: 0, ..Default::default() };
    assert!(matches!(
        Engine::open(dir.path().join("t.db"), opts),
        Err(Error::InvalidArgument(_))
    ));
    let engine = open(&dir.path().join("t.db"));
    assert!(matches!(engine.collection("  "), Err(Error::InvalidArgument(_))));
    engine.close().unwrap();
}

#[test]
fn drop_collection_releases_pages() {
    let dir = tempdir().unwrap();
    let engine = open(&dir.path().join("app.db"));
    let col = engine.collection("temp").unwrap();
    for i in 0..100 {
        col.insert(doc! { "_id": i, "v": "x".repeat(64) }).unwrap();
    }
    let before = engine.stats().unwrap();
    assert!(before.pages_by_type.get("data").copied().unwrap_or(0) > 0);
    assert!(engine.drop_collection("temp").unwrap());
    assert!(!engine.drop_collection("temp").unwrap());
    let after = engine.stats().unwrap();
    assert_eq!(after.pages_by_type.get("data").copied().unwrap_or(0), 0);
    assert!(after.pages_by_type.get("empty").copied().unwrap_or(0) > 0);
    engine.close().unwrap();
}

#[test]
fn stats_report_collections_and_pages() {
    let dir = tempdir().unwrap();
    let engine = open(&dir.path().join("app.db"));
    let col = engine.collection("things").unwrap();
    col.insert_many((0..10).map(|i| doc! { "_id": i }).collect()).unwrap();
    let stats = engine.stats().unwrap();
    assert!(stats.collections.contains(&("things".to_string(), 10)));
    assert_eq!(stats.pages_by_type.get("header").copied(), Some(1));
    engine.close().unwrap();
}

#[test]
fn write_concern_synced_truncates_wal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("app.db");
    let opts = EngineOptions { write_concern: WriteConcern::Synced, ..Default::default() };
    let engine = Engine::open(&path, opts).unwrap();
    engine.collection("c").unwrap().insert(doc! { "_id": 1 }).unwrap();
    let wal_path = dir.path().join("app-wal.db");
    assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), 0);
    engine.close().unwrap();
}

#[test]
fn compact_then_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("app.db");
    {
        let engine = open(&path);
        let col = engine.collection("c").unwrap();
        for i in 0..60 {
            col.insert(doc! { "_id": i, "v": i }).unwrap();
        }
        for i in 0..50 {
            col.delete(&Bson::Int32(i)).unwrap();
        }
        assert_eq!(col.compact().unwrap(), 10);
        engine.close().unwrap();
    }
    let engine = open(&path);
    let col = engine.collection("c").unwrap();
    assert_eq!(col.doc_count().unwrap(), 10);
    assert!(col.find_by_id(&Bson::Int32(55)).unwrap().is_some());
    engine.close().unwrap();
}

#[tokio::test]
async fn async_surface_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("app.db");
    let engine = Engine::open_async(path, EngineOptions::default()).await.unwrap();
    let col = engine.collection("c").unwrap();
    col.insert_async(doc! { "_id": 1, "v": "async" }).await.unwrap();
    let found = col.find_by_id_async(Bson::Int32(1)).await.unwrap().unwrap();
    assert_eq!(found.get_str("v").unwrap(), "async");
    assert_eq!(col.count_async(None).await.unwrap(), 1);
    engine.checkpoint_async().await.unwrap();
    engine.close().unwrap();
}
