use bson::{Bson, doc};
use tempfile::tempdir;
use tinydb::{Engine, EngineOptions, Error};

fn engine(dir: &tempfile::TempDir) -> Engine {
    Engine::open(dir.path().join("txn.db"), EngineOptions::default()).unwrap()
}

#[test]
fn overlay_visibility_and_rollback() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let col = engine.collection("kv").unwrap();
    col.insert(doc! { "_id": 1, "v": 1 }).unwrap();

    let txn = engine.begin_transaction().unwrap();
    assert!(col.update(doc! { "_id": 1, "v": 2 }).unwrap());
    // Inside the transaction the update is visible, both by id and by query.
    let seen = col.find_by_id(&Bson::Int32(1)).unwrap().unwrap();
    assert_eq!(seen.get_i32("v").unwrap(), 2);
    let hits: Vec<_> = col
        .find(Some("_id == 1"))
        .unwrap()
        .collect::<tinydb::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(hits[0].get_i32("v").unwrap(), 2);
    txn.rollback().unwrap();

    let seen = col.find_by_id(&Bson::Int32(1)).unwrap().unwrap();
    assert_eq!(seen.get_i32("v").unwrap(), 1);
    engine.close().unwrap();
}

#[test]
fn commit_applies_in_log_order() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let col = engine.collection("kv").unwrap();
    col.insert(doc! { "_id": 1, "v": 1 }).unwrap();

    let txn = engine.begin_transaction().unwrap();
    col.insert(doc! { "_id": 2, "v": 2 }).unwrap();
    assert!(col.update(doc! { "_id": 1, "v": 10 }).unwrap());
    assert!(col.delete(&Bson::Int32(2)).unwrap());
    txn.commit().unwrap();

    assert_eq!(col.doc_count().unwrap(), 1);
    assert_eq!(
        col.find_by_id(&Bson::Int32(1)).unwrap().unwrap().get_i32("v").unwrap(),
        10
    );
    assert!(col.find_by_id(&Bson::Int32(2)).unwrap().is_none());
    engine.close().unwrap();
}

#[test]
fn scans_merge_the_overlay() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let col = engine.collection("rows").unwrap();
    col.insert_many((0..10).map(|i| doc! { "_id": i, "n": i }).collect()).unwrap();

    let txn = engine.begin_transaction().unwrap();
    assert!(col.delete(&Bson::Int32(0)).unwrap());
    assert!(col.update(doc! { "_id": 1, "n": 100 }).unwrap());
    col.insert(doc! { "_id": 10, "n": 10 }).unwrap();

    // Deletes drop, updates substitute, inserts append.
    let mut ns: Vec<i32> = col
        .find(Some("n >= 0"))
        .unwrap()
        .map(|d| d.unwrap().get_i32("n").unwrap())
        .collect();
    ns.sort_unstable();
    assert_eq!(ns, vec![2, 3, 4, 5, 6, 7, 8, 9, 10, 100]);

    // Predicates apply to overlay images, not the stored versions.
    assert_eq!(col.count(Some("n == 100")).unwrap(), 1);
    assert_eq!(col.count(Some("n == 1")).unwrap(), 0);
    txn.rollback().unwrap();

    let mut ns: Vec<i32> = col
        .find(None)
        .unwrap()
        .map(|d| d.unwrap().get_i32("n").unwrap())
        .collect();
    ns.sort_unstable();
    assert_eq!(ns, (0..10).collect::<Vec<_>>());
    engine.close().unwrap();
}

#[test]
fn index_plans_see_the_overlay() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let col = engine.collection("idx").unwrap();
    col.insert_many((0..20).map(|i| doc! { "_id": i, "a": i % 2, "b": i }).collect()).unwrap();
    col.ensure_index(&["a", "b"], false).unwrap();

    let txn = engine.begin_transaction().unwrap();
    assert!(col.delete(&Bson::Int32(0)).unwrap());
    col.insert(doc! { "_id": 100, "a": 0, "b": 100 }).unwrap();

    let plan = col.explain(Some("a == 0 && b >= 0")).unwrap();
    assert_eq!(plan.strategy, tinydb::Strategy::IndexScan);
    let mut ids: Vec<i32> = col
        .find(Some("a == 0 && b >= 0"))
        .unwrap()
        .map(|d| d.unwrap().get_i32("_id").unwrap())
        .collect();
    ids.sort_unstable();
    // _id 0 is deleted in-transaction; 100 is inserted in-transaction.
    assert_eq!(ids, vec![2, 4, 6, 8, 10, 12, 14, 16, 18, 100]);
    txn.commit().unwrap();

    assert!(col.find_by_id(&Bson::Int32(100)).unwrap().is_some());
    engine.close().unwrap();
}

#[test]
fn nested_transactions_are_rejected() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let _txn = engine.begin_transaction().unwrap();
    assert!(matches!(engine.begin_transaction(), Err(Error::TransactionActive)));
}

#[test]
fn dropping_a_transaction_rolls_back() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let col = engine.collection("kv").unwrap();
    {
        let _txn = engine.begin_transaction().unwrap();
        col.insert(doc! { "_id": 1 }).unwrap();
    }
    assert_eq!(col.doc_count().unwrap(), 0);
    assert!(col.find_by_id(&Bson::Int32(1)).unwrap().is_none());
    // A new transaction can start after the implicit rollback.
    let txn = engine.begin_transaction().unwrap();
    txn.commit().unwrap();
    engine.close().unwrap();
}

#[test]
fn conflicting_commit_unwinds_cleanly() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let col = engine.collection("uq").unwrap();
    col.insert(doc! { "_id": 1, "email": "a@x" }).unwrap();
    col.ensure_index(&["email"], true).unwrap();

    let txn = engine.begin_transaction().unwrap();
    col.insert(doc! { "_id": 2, "email": "b@x" }).unwrap();
    col.insert(doc! { "_id": 3, "email": "a@x" }).unwrap(); // conflicts at commit
    assert!(matches!(txn.commit(), Err(Error::Conflict { .. })));

    // The earlier insert of _id 2 was unwound with the batch.
    assert_eq!(col.doc_count().unwrap(), 1);
    assert!(col.find_by_id(&Bson::Int32(2)).unwrap().is_none());
    engine.close().unwrap();
}
