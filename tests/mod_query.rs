use bson::{Bson, doc};
use tempfile::tempdir;
use tinydb::{Engine, EngineOptions, Error, Strategy, field};

fn engine(dir: &tempfile::TempDir) -> Engine {
    Engine::open(dir.path().join("q.db"), EngineOptions::default()).unwrap()
}

#[test]
fn primary_key_lookup_scenario() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let users = engine.collection("users").unwrap();
    users.insert(doc! { "_id": "u1", "name": "Ana", "age": 30 }).unwrap();
    users.insert(doc! { "_id": "u2", "name": "Bob", "age": 41 }).unwrap();

    let plan = users.explain(Some("_id == 'u2'")).unwrap();
    assert_eq!(plan.strategy, Strategy::PrimaryKeyLookup);

    let hits: Vec<_> = users
        .find(Some("_id == 'u2'"))
        .unwrap()
        .collect::<tinydb::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0], doc! { "_id": "u2", "name": "Bob", "age": 41 });
    engine.close().unwrap();
}

#[test]
fn index_range_scan_with_residual_scenario() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let col = engine.collection("grid").unwrap();
    col.insert_many((0..100).map(|i| doc! { "_id": i, "a": i % 10, "b": i }).collect()).unwrap();
    assert!(col.ensure_index(&["a", "b"], false).unwrap());

    let predicate = "a == 3 && b >= 30 && b < 60";
    let plan = col.explain(Some(predicate)).unwrap();
    assert_eq!(plan.strategy, Strategy::IndexScan);
    assert_eq!(plan.use_index.as_deref(), Some("ix_a_b"));

    let mut ids: Vec<i32> = col
        .find(Some(predicate))
        .unwrap()
        .map(|d| d.unwrap().get_i32("_id").unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![33, 43, 53]);
    engine.close().unwrap();
}

#[test]
fn full_scan_with_string_pushdown_scenario() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let col = engine.collection("tagged").unwrap();
    col.insert_many((0..1000).map(|i| doc! { "_id": i, "tag": format!("t{}", i % 5) }).collect())
        .unwrap();

    let plan = col.explain(Some("tag == 't2'")).unwrap();
    assert_eq!(plan.strategy, Strategy::FullTableScan);
    assert_eq!(col.count(Some("tag == 't2'")).unwrap(), 200);
    engine.close().unwrap();
}

#[test]
fn unique_index_seek() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let col = engine.collection("accounts").unwrap();
    col.insert_many((0..50).map(|i| doc! { "_id": i, "email": format!("u{i}@x") }).collect())
        .unwrap();
    col.ensure_index(&["email"], true).unwrap();

    let plan = col.explain(Some("email == 'u7@x'")).unwrap();
    assert_eq!(plan.strategy, Strategy::IndexSeek);
    let hits: Vec<_> = col
        .find(Some("email == 'u7@x'"))
        .unwrap()
        .collect::<tinydb::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].get_i32("_id").unwrap(), 7);
    engine.close().unwrap();
}

#[test]
fn unparseable_predicate_surfaces_unsupported() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let col = engine.collection("c").unwrap();
    col.insert(doc! { "_id": 1 }).unwrap();
    let plan = col.explain(Some("a ==")).unwrap();
    assert_eq!(plan.strategy, Strategy::FullTableScan);
    assert!(matches!(col.find(Some("a ==")), Err(Error::Unsupported(_))));
    engine.close().unwrap();
}

#[test]
fn builder_predicates_work() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let col = engine.collection("c").unwrap();
    col.insert_many((0..10).map(|i| doc! { "_id": i, "n": i }).collect()).unwrap();
    let expr = field("n").ge(3).and(field("n").lt(6));
    let hits: Vec<_> = col
        .find_expr(expr)
        .unwrap()
        .map(|d| d.unwrap().get_i32("n").unwrap())
        .collect();
    assert_eq!(hits.len(), 3);
    engine.close().unwrap();
}

#[test]
fn string_methods_in_predicates() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let col = engine.collection("people").unwrap();
    col.insert(doc! { "_id": 1, "name": "Amelia" }).unwrap();
    col.insert(doc! { "_id": 2, "name": "bruno" }).unwrap();
    assert_eq!(col.count(Some("name.ToLower().StartsWith('a')")).unwrap(), 1);
    assert_eq!(col.count(Some("name.Length >= 5")).unwrap(), 2);
    assert_eq!(col.count(Some("name.Length > 5")).unwrap(), 1);
    engine.close().unwrap();
}

#[test]
fn missing_fields_behave_as_null() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let col = engine.collection("sparse").unwrap();
    col.insert(doc! { "_id": 1, "x": 5 }).unwrap();
    col.insert(doc! { "_id": 2 }).unwrap();
    col.insert(doc! { "_id": 3, "x": Bson::Null }).unwrap();
    assert_eq!(col.count(Some("x == null")).unwrap(), 2);
    assert_eq!(col.count(Some("x != null")).unwrap(), 1);
    assert_eq!(col.count(Some("x > 1")).unwrap(), 1);
    engine.close().unwrap();
}

#[test]
fn zero_timeout_times_out() {
    let dir = tempdir().unwrap();
    let opts = EngineOptions {
        timeout: Some(std::time::Duration::ZERO),
        ..Default::default()
    };
    let engine = Engine::open(dir.path().join("t.db"), opts).unwrap();
    let col = engine.collection("c").unwrap();
    col.insert(doc! { "_id": 1 }).unwrap();
    let outcome: tinydb::Result<Vec<_>> = col.find(None).unwrap().collect();
    assert!(matches!(outcome, Err(Error::Timeout)));
    engine.close().unwrap();
}

#[test]
fn find_with_skip_and_limit() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let col = engine.collection("paged").unwrap();
    col.insert_many((0..20).map(|i| doc! { "_id": i, "n": i }).collect()).unwrap();
    let opts = tinydb::FindOptions { limit: Some(5), skip: Some(10) };
    let page: Vec<_> = col
        .find_with(Some("n >= 0"), opts)
        .unwrap()
        .collect::<tinydb::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(page.len(), 5);
    engine.close().unwrap();
}

#[test]
fn count_without_predicate_streams_everything() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let col = engine.collection("c").unwrap();
    col.insert_many((0..37).map(|i| doc! { "_id": i }).collect()).unwrap();
    assert_eq!(col.count(None).unwrap(), 37);
    engine.close().unwrap();
}
