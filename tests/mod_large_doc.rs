use bson::{Bson, doc};
use tempfile::tempdir;
use tinydb::{Engine, EngineOptions};

/// A 200 KB binary payload on 8 KB pages goes through the chained
/// large-document path and reads back byte-identical. The chain length
/// matches ceil(payload / (page_size - header - prefix)).
#[test]
fn large_document_roundtrip_and_chain_length() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path().join("big.db"), EngineOptions::default()).unwrap();
    let col = engine.collection("blobs").unwrap();

    let payload: Vec<u8> = (0..200 * 1024u32).map(|i| (i % 251) as u8).collect();
    col.insert(doc! {
        "_id": "big",
        "payload": bson::Binary {
            subtype: bson::spec::BinarySubtype::Generic,
            bytes: payload.clone(),
        },
    })
    .unwrap();

    let read_back = col.find_by_id(&Bson::String("big".into())).unwrap().unwrap();
    let Bson::Binary(bin) = read_back.get("payload").unwrap() else {
        panic!("payload lost its type");
    };
    assert_eq!(bin.bytes, payload);

    // Serialized document ≈ payload + framing; per-page chunk capacity is
    // page_size - 49 (header) - 12 (chain prefix).
    let stats = engine.stats().unwrap();
    let chunk = 8192 - 49 - 12;
    let doc_bytes = {
        let mut buf = Vec::new();
        read_back.to_writer(&mut buf).unwrap();
        buf.len()
    };
    let expected_pages = doc_bytes.div_ceil(chunk) as u32;
    assert_eq!(
        stats.pages_by_type.get("large_doc_data").copied(),
        Some(expected_pages)
    );
    assert_eq!(stats.pages_by_type.get("large_doc_index").copied(), Some(1));
    engine.close().unwrap();
}

#[test]
fn large_documents_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("big.db");
    let payload = vec![0x5Au8; 60 * 1024];
    {
        let engine = Engine::open(&path, EngineOptions::default()).unwrap();
        let col = engine.collection("blobs").unwrap();
        col.insert(doc! {
            "_id": 1,
            "payload": bson::Binary {
                subtype: bson::spec::BinarySubtype::Generic,
                bytes: payload.clone(),
            },
        })
        .unwrap();
        engine.close().unwrap();
    }
    let engine = Engine::open(&path, EngineOptions::default()).unwrap();
    let col = engine.collection("blobs").unwrap();
    let doc = col.find_by_id(&Bson::Int32(1)).unwrap().unwrap();
    let Bson::Binary(bin) = doc.get("payload").unwrap() else { panic!() };
    assert_eq!(bin.bytes, payload);
    engine.close().unwrap();
}

#[test]
fn deleting_a_large_document_frees_its_chain() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path().join("big.db"), EngineOptions::default()).unwrap();
    let col = engine.collection("blobs").unwrap();
    let payload = vec![1u8; 100 * 1024];
    col.insert(doc! {
        "_id": 1,
        "payload": bson::Binary {
            subtype: bson::spec::BinarySubtype::Generic,
            bytes: payload,
        },
    })
    .unwrap();
    assert!(col.delete(&Bson::Int32(1)).unwrap());
    let stats = engine.stats().unwrap();
    assert_eq!(stats.pages_by_type.get("large_doc_data").copied(), None);
    assert_eq!(stats.pages_by_type.get("large_doc_index").copied(), None);
    assert!(stats.pages_by_type.get("empty").copied().unwrap_or(0) > 0);
    engine.close().unwrap();
}

/// Large documents still match predicates; they are resolved before the
/// final filter runs.
#[test]
fn scans_resolve_large_documents() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path().join("big.db"), EngineOptions::default()).unwrap();
    let col = engine.collection("blobs").unwrap();
    col.insert(doc! { "_id": 1, "kind": "small" }).unwrap();
    col.insert(doc! {
        "_id": 2,
        "kind": "huge",
        "payload": bson::Binary {
            subtype: bson::spec::BinarySubtype::Generic,
            bytes: vec![9u8; 50 * 1024],
        },
    })
    .unwrap();
    assert_eq!(col.count(Some("kind == 'huge'")).unwrap(), 1);
    assert_eq!(col.count(None).unwrap(), 2);
    engine.close().unwrap();
}
