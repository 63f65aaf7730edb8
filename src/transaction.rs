use std::collections::{BTreeMap, HashMap};

use bson::{Bson, Document};
use parking_lot::Mutex;

use crate::errors::{Error, Result};
use crate::index::key::IndexKey;

/// Pending image of a document inside a transaction: `None` means deleted.
pub type Overlay = BTreeMap<IndexKey, Option<Document>>;

/// One buffered operation, applied in log order at commit.
#[derive(Debug, Clone)]
pub enum TxnOp {
    Insert { collection: String, doc: Document },
    Update { collection: String, doc: Document },
    Delete { collection: String, id: Bson },
}

/// Ordered operation log plus the per-collection overlay derived from it.
#[derive(Debug, Default)]
pub struct TransactionState {
    pub ops: Vec<TxnOp>,
    overlays: HashMap<String, Overlay>,
}

impl TransactionState {
    fn record(&mut self, op: TxnOp) {
        let (collection, key, image) = match &op {
            TxnOp::Insert { collection, doc } | TxnOp::Update { collection, doc } => {
                let id = doc.get("_id").cloned().unwrap_or(Bson::Null);
                (collection.clone(), IndexKey::single(id), Some(doc.clone()))
            }
            TxnOp::Delete { collection, id } => {
                (collection.clone(), IndexKey::single(id.clone()), None)
            }
        };
        self.overlays.entry(collection).or_default().insert(key, image);
        self.ops.push(op);
    }

    pub fn overlay_for(&self, collection: &str) -> Option<&Overlay> {
        self.overlays.get(collection)
    }
}

/// Single active transaction per engine instance. Operations buffer in the
/// overlay until commit; rollback just drops the state, so the WAL never
/// sees an aborted transaction.
#[derive(Default)]
pub struct TransactionManager {
    current: Mutex<Option<TransactionState>>,
}

impl TransactionManager {
    pub fn begin(&self) -> Result<()> {
        let mut current = self.current.lock();
        if current.is_some() {
            return Err(Error::TransactionActive);
        }
        *current = Some(TransactionState::default());
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Buffer an operation into the active transaction. Returns false when
    /// no transaction is active (the caller applies immediately instead).
    pub fn record(&self, op: TxnOp) -> bool {
        let mut current = self.current.lock();
        match current.as_mut() {
            Some(state) => {
                state.record(op);
                true
            }
            None => false,
        }
    }

    /// Snapshot of the overlay for one collection, for query merging.
    pub fn overlay_snapshot(&self, collection: &str) -> Option<Overlay> {
        self.current.lock().as_ref().and_then(|s| s.overlay_for(collection).cloned())
    }

    /// Pending image lookup for point reads inside the transaction.
    pub fn pending_image(&self, collection: &str, id: &Bson) -> Option<Option<Document>> {
        self.current
            .lock()
            .as_ref()
            .and_then(|s| s.overlay_for(collection))
            .and_then(|o| o.get(&IndexKey::single(id.clone())).cloned())
    }

    /// Detach the state for commit.
    pub fn take(&self) -> Option<TransactionState> {
        self.current.lock().take()
    }

    /// Discard the in-memory overlay.
    pub fn rollback(&self) -> bool {
        self.current.lock().take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn nested_begin_is_rejected() {
        let mgr = TransactionManager::default();
        mgr.begin().unwrap();
        assert!(matches!(mgr.begin(), Err(Error::TransactionActive)));
        assert!(mgr.rollback());
        mgr.begin().unwrap();
    }

    #[test]
    fn overlay_tracks_latest_image() {
        let mgr = TransactionManager::default();
        mgr.begin().unwrap();
        assert!(mgr.record(TxnOp::Insert {
            collection: "c".into(),
            doc: doc! { "_id": 1, "v": 1 },
        }));
        assert!(mgr.record(TxnOp::Update {
            collection: "c".into(),
            doc: doc! { "_id": 1, "v": 2 },
        }));
        let pending = mgr.pending_image("c", &Bson::Int32(1)).unwrap().unwrap();
        assert_eq!(pending.get_i32("v").unwrap(), 2);
        assert!(mgr.record(TxnOp::Delete { collection: "c".into(), id: Bson::Int32(1) }));
        assert_eq!(mgr.pending_image("c", &Bson::Int32(1)), Some(None));
        let state = mgr.take().unwrap();
        assert_eq!(state.ops.len(), 3);
        assert!(!mgr.is_active());
    }

    #[test]
    fn record_without_txn_reports_inactive() {
        let mgr = TransactionManager::default();
        assert!(!mgr.record(TxnOp::Delete { collection: "c".into(), id: Bson::Int32(1) }));
    }
}
