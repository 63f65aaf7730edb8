use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bson::{Bson, Document};
use hmac::{Hmac, Mac};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use sha2::Sha256;

use crate::collection::Collection;
use crate::collection::catalog;
use crate::errors::{Error, NotFoundKind, Result};
use crate::mapper::EntityMapper;
use crate::options::{EngineOptions, WriteConcern};
use crate::query::executor::{self, FindIter};
use crate::query::optimizer::{self, ExecutionPlan};
use crate::query::{Expr, parse};
use crate::storage::disk::DiskStream;
use crate::storage::flush::FlushScheduler;
use crate::storage::header::SecurityMetadata;
use crate::storage::pager::PageManager;
use crate::storage::wal::Wal;
use crate::transaction::{TransactionManager, TxnOp};

/// Password-to-key derivation collaborator. The engine stores and compares
/// the derived hash; the scheme owns the algorithm.
pub trait CredentialScheme: Send + Sync {
    fn derive(&self, password: &str, salt: &[u8; 16]) -> [u8; 32];
}

/// PBKDF2-HMAC-SHA256 with a configurable round count.
pub struct Pbkdf2Sha256 {
    pub rounds: u32,
}

impl Default for Pbkdf2Sha256 {
    fn default() -> Self {
        Self { rounds: 10_000 }
    }
}

type HmacSha256 = Hmac<Sha256>;

impl CredentialScheme for Pbkdf2Sha256 {
    fn derive(&self, password: &str, salt: &[u8; 16]) -> [u8; 32] {
        // Single-block PBKDF2: SHA-256 already yields the full 32 bytes.
        let mut mac = HmacSha256::new_from_slice(password.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(salt);
        mac.update(&1u32.to_be_bytes());
        let mut u: [u8; 32] = mac.finalize().into_bytes().into();
        let mut out = u;
        for _ in 1..self.rounds.max(1) {
            let mut mac = HmacSha256::new_from_slice(password.as_bytes())
                .expect("HMAC accepts keys of any length");
            mac.update(&u);
            u = mac.finalize().into_bytes().into();
            for (o, b) in out.iter_mut().zip(u.iter()) {
                *o ^= b;
            }
        }
        out
    }
}

struct Journal {
    wal: Arc<Wal>,
    flusher: Arc<FlushScheduler>,
}

/// Counters reported by [`Engine::stats`].
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub pages_by_type: HashMap<&'static str, u32>,
    pub cached_pages: usize,
    pub collections: Vec<(String, u64)>,
}

struct EngineInner {
    path: PathBuf,
    disk: Arc<DiskStream>,
    pager: Arc<PageManager>,
    journal: Option<Journal>,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    txn: TransactionManager,
    write_lock: Mutex<()>,
    write_concern: WriteConcern,
    timeout: Option<Duration>,
    disposed: AtomicBool,
}

/// The database engine: explicit lifecycle, no global state. Clones share
/// the same underlying instance.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

enum UndoOp {
    DeleteInserted { collection: String, id: Bson },
    RestoreUpdated { collection: String, old: Document },
    ReinsertDeleted { collection: String, old: Document },
}

impl Engine {
    /// Open (or create) a database file with the given options.
    pub fn open(path: impl AsRef<Path>, options: EngineOptions) -> Result<Self> {
        let path = path.as_ref();
        options.validate()?;
        if path.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("database path must be non-empty".into()));
        }

        let disk = Arc::new(DiskStream::open(path)?);
        let freshly_created = disk.len()? == 0;
        let pager = Arc::new(PageManager::open(
            Arc::clone(&disk),
            options.page_size,
            options.cache_size,
        )?);
        if !freshly_created && pager.page_size() != options.page_size as usize {
            log::warn!(
                "requested page_size {} ignored; database was created with {}",
                options.page_size,
                pager.page_size()
            );
        }

        let wal_path = options.wal_path(path);
        let journal = if options.enable_journaling {
            let wal = Arc::new(Wal::open(&wal_path)?);
            let replayed =
                wal.replay(pager.page_size(), |id, bytes| pager.restore_page(id, bytes))?;
            if replayed > 0 {
                log::info!("recovered {replayed} page images from the journal");
                pager.flush_dirty()?;
                disk.flush(true)?;
                wal.truncate()?;
            }
            let flusher = Arc::new(FlushScheduler::start(
                Arc::clone(&wal),
                Arc::clone(&pager),
                Arc::clone(&disk),
                None,
            ));
            Some(Journal { wal, flusher })
        } else {
            match std::fs::remove_file(&wal_path) {
                Ok(()) => log::warn!("journaling disabled; removed stale journal {wal_path:?}"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Io(e)),
            }
            None
        };

        let scheme: Arc<dyn CredentialScheme> = options
            .credential_scheme
            .clone()
            .unwrap_or_else(|| Arc::new(Pbkdf2Sha256::default()));
        match (pager.header().security, &options.password) {
            (Some(stored), Some(password)) => {
                if scheme.derive(password, &stored.salt) != stored.key_hash {
                    return Err(Error::Unauthorized);
                }
            }
            (Some(_), None) => return Err(Error::Unauthorized),
            (None, Some(password)) if freshly_created => {
                let mut salt = [0u8; 16];
                rand::rng().fill(&mut salt);
                let key_hash = scheme.derive(password, &salt);
                pager.update_header(|h| h.security = Some(SecurityMetadata { salt, key_hash }))?;
            }
            (None, Some(_)) => {
                log::warn!("password supplied for an unprotected database; ignoring");
            }
            (None, None) => {}
        }

        let mut collections = HashMap::new();
        for record in catalog::load(&pager)? {
            let col = Collection::from_record(&record, Arc::clone(&pager))?;
            collections.insert(record.name.clone(), Arc::new(col));
        }

        let engine = Self {
            inner: Arc::new(EngineInner {
                path: path.to_path_buf(),
                disk,
                pager,
                journal,
                collections: RwLock::new(collections),
                txn: TransactionManager::default(),
                write_lock: Mutex::new(()),
                write_concern: options.write_concern,
                timeout: options.timeout,
                disposed: AtomicBool::new(false),
            }),
        };
        if freshly_created {
            // Persist the header so a crash before the first write still
            // leaves a well-formed file.
            engine.inner.pager.flush_dirty()?;
            engine.inner.disk.flush(true)?;
        }
        Ok(engine)
    }

    pub async fn open_async(path: PathBuf, options: EngineOptions) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::open(path, options))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        Ok(())
    }

    /// Document-level handle to a collection, created on first use.
    pub fn collection(&self, name: &str) -> Result<CollectionHandle> {
        self.check_open()?;
        self.inner.collection_ref(name)?;
        Ok(CollectionHandle { engine: Arc::clone(&self.inner), name: name.to_string() })
    }

    /// Typed facade over a collection through an [`EntityMapper`].
    pub fn typed_collection<T, M: EntityMapper<T>>(
        &self,
        name: &str,
        mapper: M,
    ) -> Result<TypedCollection<T, M>> {
        Ok(TypedCollection {
            raw: self.collection(name)?,
            mapper,
            _marker: std::marker::PhantomData,
        })
    }

    pub fn list_collection_names(&self) -> Vec<String> {
        self.inner.collections.read().keys().cloned().collect()
    }

    /// Drop a collection, releasing every page it owns.
    pub fn drop_collection(&self, name: &str) -> Result<bool> {
        self.check_open()?;
        let _guard = self.inner.write_lock.lock();
        let Some(col) = self.inner.collections.write().remove(name) else {
            return Ok(false);
        };
        col.destroy()?;
        self.inner.commit_pages()?;
        Ok(true)
    }

    /// Start the (single) transaction for this engine instance.
    pub fn begin_transaction(&self) -> Result<Transaction> {
        self.check_open()?;
        self.inner.txn.begin()?;
        Ok(Transaction { engine: Arc::clone(&self.inner), finished: false })
    }

    /// Force a full checkpoint: dirty pages to the data file, journal
    /// truncated.
    pub fn checkpoint(&self) -> Result<()> {
        self.check_open()?;
        let _guard = self.inner.write_lock.lock();
        self.inner.ensure_durability(WriteConcern::Synced)
    }

    pub async fn checkpoint_async(&self) -> Result<()> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.checkpoint())
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    pub fn security_metadata(&self) -> Result<Option<SecurityMetadata>> {
        self.check_open()?;
        Ok(self.inner.pager.header().security)
    }

    pub fn set_security_metadata(&self, metadata: SecurityMetadata) -> Result<()> {
        self.check_open()?;
        let _guard = self.inner.write_lock.lock();
        self.inner.pager.update_header(|h| h.security = Some(metadata))?;
        self.inner.commit_pages()
    }

    pub fn clear_security_metadata(&self) -> Result<()> {
        self.check_open()?;
        let _guard = self.inner.write_lock.lock();
        self.inner.pager.update_header(|h| h.security = None)?;
        self.inner.commit_pages()
    }

    pub fn stats(&self) -> Result<EngineStats> {
        self.check_open()?;
        Ok(EngineStats {
            pages_by_type: self.inner.pager.page_census()?,
            cached_pages: self.inner.pager.cached_pages(),
            collections: self
                .inner
                .collections
                .read()
                .iter()
                .map(|(name, col)| (name.clone(), col.doc_count()))
                .collect(),
        })
    }

    /// Flush everything and mark the engine disposed. Further operations
    /// fail with [`Error::Disposed`].
    pub fn close(&self) -> Result<()> {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _guard = self.inner.write_lock.lock();
        let outcome = self.inner.ensure_durability(WriteConcern::Synced);
        if let Some(journal) = &self.inner.journal {
            journal.flusher.shutdown();
        }
        outcome
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if !self.disposed.load(Ordering::Acquire) {
            if let Err(e) = self.ensure_durability(WriteConcern::Synced) {
                log::error!("flush on drop failed: {e}");
            }
            if let Some(journal) = &self.journal {
                journal.flusher.shutdown();
            }
        }
    }
}

impl EngineInner {
    fn collection_ref(&self, name: &str) -> Result<Arc<Collection>> {
        if let Some(col) = self.collections.read().get(name) {
            return Ok(Arc::clone(col));
        }
        let mut map = self.collections.write();
        if let Some(col) = map.get(name) {
            return Ok(Arc::clone(col));
        }
        let col = Arc::new(Collection::create(name, Arc::clone(&self.pager))?);
        map.insert(name.to_string(), Arc::clone(&col));
        Ok(col)
    }

    fn existing_collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(NotFoundKind::Collection, name))
    }

    /// Apply a batch of operations under the engine write lock, then push
    /// the touched pages through the journal. A failing operation unwinds
    /// the ones already applied, so the batch is atomic.
    fn apply_ops(&self, ops: Vec<TxnOp>) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut undo: Vec<UndoOp> = Vec::new();
        for op in ops {
            match self.apply_one(op) {
                Ok(Some(u)) => undo.push(u),
                Ok(None) => {}
                Err(e) => {
                    self.unwind(undo);
                    return Err(e);
                }
            }
        }
        self.commit_pages()
    }

    fn apply_one(&self, op: TxnOp) -> Result<Option<UndoOp>> {
        match op {
            TxnOp::Insert { collection, doc } => {
                let col = self.collection_ref(&collection)?;
                let id = col.insert_document(doc)?;
                Ok(Some(UndoOp::DeleteInserted { collection, id }))
            }
            TxnOp::Update { collection, doc } => {
                let col = self.collection_ref(&collection)?;
                let id = doc.get("_id").cloned().unwrap_or(Bson::Null);
                let old = col.find_by_id(&id)?;
                if col.update_document(doc)? {
                    Ok(old.map(|old| UndoOp::RestoreUpdated { collection, old }))
                } else {
                    Ok(None)
                }
            }
            TxnOp::Delete { collection, id } => {
                let col = self.collection_ref(&collection)?;
                let old = col.find_by_id(&id)?;
                if col.delete_document(&id)? {
                    Ok(old.map(|old| UndoOp::ReinsertDeleted { collection, old }))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn unwind(&self, undo: Vec<UndoOp>) {
        for op in undo.into_iter().rev() {
            let outcome = match op {
                UndoOp::DeleteInserted { collection, id } => self
                    .collection_ref(&collection)
                    .and_then(|c| c.delete_document(&id).map(|_| ())),
                UndoOp::RestoreUpdated { collection, old } => self
                    .collection_ref(&collection)
                    .and_then(|c| c.update_document(old).map(|_| ())),
                UndoOp::ReinsertDeleted { collection, old } => self
                    .collection_ref(&collection)
                    .and_then(|c| c.insert_document(old).map(|_| ())),
            };
            if let Err(e) = outcome {
                log::error!("failed to unwind an aborted batch: {e}");
            }
        }
    }

    /// Persist index chains and the catalog, journal every dirty page, then
    /// honor the configured durability level.
    fn commit_pages(&self) -> Result<()> {
        let collections = self.collections.read();
        for col in collections.values() {
            col.save_indexes()?;
        }
        let records: Vec<_> = collections.values().map(|c| c.record()).collect();
        drop(collections);
        catalog::save(&self.pager, &records)?;
        // Refresh the header page payload so its journal image is current.
        self.pager.update_header(|_| {})?;

        if let Some(journal) = &self.journal {
            for page in self.pager.dirty_pages() {
                page.update_checksum();
                page.with_bytes(|bytes| journal.wal.append_page(page.page_id(), bytes))?;
            }
        }
        self.ensure_durability(self.write_concern)
    }

    fn ensure_durability(&self, concern: WriteConcern) -> Result<()> {
        match &self.journal {
            Some(journal) => journal.flusher.ensure_durability(concern),
            None => match concern {
                WriteConcern::None => Ok(()),
                WriteConcern::Journaled | WriteConcern::Synced => {
                    self.pager.flush_dirty()?;
                    self.disk.flush(true)
                }
            },
        }
    }

    fn commit_txn(&self) -> Result<()> {
        let Some(state) = self.txn.take() else {
            return Err(Error::InvalidArgument("no active transaction".into()));
        };
        self.apply_ops(state.ops)
    }

    fn run_find(&self, name: &str, predicate: Option<&str>) -> Result<FindIter> {
        let col = self.collection_ref(name)?;
        let plan = self.plan_for(name, predicate)?;
        let overlay = self.txn.overlay_snapshot(name);
        executor::execute(&col, &plan, overlay, self.timeout)
    }

    fn run_find_expr(&self, name: &str, ir: Expr) -> Result<FindIter> {
        let col = self.collection_ref(name)?;
        let plan = optimizer::plan(name, &col.index_metas(), Some(ir), None);
        let overlay = self.txn.overlay_snapshot(name);
        executor::execute(&col, &plan, overlay, self.timeout)
    }

    fn plan_for(&self, name: &str, predicate: Option<&str>) -> Result<ExecutionPlan> {
        let col = self.collection_ref(name)?;
        let (ir, source) = match predicate {
            None => (None, None),
            Some(text) => match parse::parse(text) {
                Ok(ir) => (Some(ir), Some(text.to_string())),
                Err(e) => {
                    // The optimizer falls back to a scan; the executor's
                    // re-parse decides whether the error reaches the user.
                    log::debug!("predicate did not parse, planning a scan: {e}");
                    (None, Some(text.to_string()))
                }
            },
        };
        Ok(optimizer::plan(name, &col.index_metas(), ir, source))
    }
}

/// Paging options for [`CollectionHandle::find_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FindOptions {
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

/// Document-level facade over one collection. Inside a transaction, writes
/// buffer in the overlay; reads see the overlay merged over storage.
#[derive(Clone)]
pub struct CollectionHandle {
    engine: Arc<EngineInner>,
    name: String,
}

impl CollectionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn check_open(&self) -> Result<()> {
        if self.engine.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        Ok(())
    }

    pub fn insert(&self, doc: Document) -> Result<Bson> {
        self.check_open()?;
        let (doc, id) = crate::collection::collection::normalize_id(doc);
        if self.engine.txn.record(TxnOp::Insert { collection: self.name.clone(), doc: doc.clone() })
        {
            return Ok(id);
        }
        self.engine.apply_ops(vec![TxnOp::Insert { collection: self.name.clone(), doc }])?;
        Ok(id)
    }

    pub fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<Bson>> {
        self.check_open()?;
        let mut ids = Vec::with_capacity(docs.len());
        let mut ops = Vec::with_capacity(docs.len());
        for doc in docs {
            let (doc, id) = crate::collection::collection::normalize_id(doc);
            ids.push(id);
            ops.push(TxnOp::Insert { collection: self.name.clone(), doc });
        }
        let mut buffered = true;
        for op in &ops {
            if !self.engine.txn.record(op.clone()) {
                buffered = false;
                break;
            }
        }
        if !buffered {
            self.engine.apply_ops(ops)?;
        }
        Ok(ids)
    }

    pub fn update(&self, doc: Document) -> Result<bool> {
        self.check_open()?;
        let (doc, id) = crate::collection::collection::normalize_id(doc);
        if self.engine.txn.is_active() {
            let exists = match self.engine.txn.pending_image(&self.name, &id) {
                Some(pending) => pending.is_some(),
                None => self.engine.existing_collection(&self.name).is_ok_and(|c| {
                    c.doc_id_for(&id).is_some()
                }),
            };
            if !exists {
                return Ok(false);
            }
            self.engine.txn.record(TxnOp::Update { collection: self.name.clone(), doc });
            return Ok(true);
        }
        let col = self.engine.collection_ref(&self.name)?;
        if col.doc_id_for(&id).is_none() {
            return Ok(false);
        }
        self.engine.apply_ops(vec![TxnOp::Update { collection: self.name.clone(), doc }])?;
        Ok(true)
    }

    pub fn delete(&self, id: &Bson) -> Result<bool> {
        self.check_open()?;
        if self.engine.txn.is_active() {
            let exists = match self.engine.txn.pending_image(&self.name, id) {
                Some(pending) => pending.is_some(),
                None => self.engine.existing_collection(&self.name).is_ok_and(|c| {
                    c.doc_id_for(id).is_some()
                }),
            };
            if !exists {
                return Ok(false);
            }
            self.engine.txn.record(TxnOp::Delete { collection: self.name.clone(), id: id.clone() });
            return Ok(true);
        }
        let col = self.engine.collection_ref(&self.name)?;
        if col.doc_id_for(id).is_none() {
            return Ok(false);
        }
        self.engine.apply_ops(vec![TxnOp::Delete {
            collection: self.name.clone(),
            id: id.clone(),
        }])?;
        Ok(true)
    }

    pub fn find_by_id(&self, id: &Bson) -> Result<Option<Document>> {
        self.check_open()?;
        if let Some(pending) = self.engine.txn.pending_image(&self.name, id) {
            return Ok(pending);
        }
        self.engine.collection_ref(&self.name)?.find_by_id(id)
    }

    /// Run a predicate query; `None` streams the whole collection.
    pub fn find(&self, predicate: Option<&str>) -> Result<FindIter> {
        self.check_open()?;
        self.engine.run_find(&self.name, predicate)
    }

    /// Query with a builder-constructed IR instead of predicate text.
    pub fn find_expr(&self, predicate: Expr) -> Result<FindIter> {
        self.check_open()?;
        self.engine.run_find_expr(&self.name, crate::query::parse::fold(predicate))
    }

    /// `find` with skip/limit applied to the stream.
    pub fn find_with(
        &self,
        predicate: Option<&str>,
        options: FindOptions,
    ) -> Result<impl Iterator<Item = Result<Document>> + Send + use<>> {
        let iter = self.find(predicate)?;
        Ok(iter
            .skip(options.skip.unwrap_or(0))
            .take(options.limit.unwrap_or(usize::MAX)))
    }

    pub fn count(&self, predicate: Option<&str>) -> Result<u64> {
        self.check_open()?;
        let mut n = 0u64;
        for item in self.engine.run_find(&self.name, predicate)? {
            item?;
            n += 1;
        }
        Ok(n)
    }

    /// The plan the optimizer would choose, without executing it.
    pub fn explain(&self, predicate: Option<&str>) -> Result<ExecutionPlan> {
        self.check_open()?;
        self.engine.plan_for(&self.name, predicate)
    }

    pub fn ensure_index(&self, fields: &[&str], unique: bool) -> Result<bool> {
        self.check_open()?;
        let _guard = self.engine.write_lock.lock();
        let col = self.engine.collection_ref(&self.name)?;
        let created = col.ensure_index(fields, unique)?;
        if created {
            self.engine.commit_pages()?;
        }
        Ok(created)
    }

    pub fn drop_index(&self, name: &str) -> Result<bool> {
        self.check_open()?;
        let _guard = self.engine.write_lock.lock();
        let col = self.engine.collection_ref(&self.name)?;
        let dropped = col.drop_index(name)?;
        if dropped {
            self.engine.commit_pages()?;
        }
        Ok(dropped)
    }

    pub fn indexes(&self) -> Result<Vec<crate::index::store::IndexDescriptor>> {
        self.check_open()?;
        Ok(self.engine.collection_ref(&self.name)?.index_metas())
    }

    /// Reclaim tombstoned slots with a scan-and-rewrite cycle.
    pub fn compact(&self) -> Result<u64> {
        self.check_open()?;
        let _guard = self.engine.write_lock.lock();
        let col = self.engine.collection_ref(&self.name)?;
        let live = col.compact()?;
        self.engine.commit_pages()?;
        Ok(live)
    }

    pub fn doc_count(&self) -> Result<u64> {
        self.check_open()?;
        Ok(self.engine.collection_ref(&self.name)?.doc_count())
    }

    // --- async variants ---------------------------------------------------

    pub async fn insert_async(&self, doc: Document) -> Result<Bson> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.insert(doc))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    pub async fn find_by_id_async(&self, id: Bson) -> Result<Option<Document>> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.find_by_id(&id))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    pub async fn find_async(&self, predicate: Option<String>) -> Result<Vec<Document>> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            this.find(predicate.as_deref())?.collect::<Result<Vec<_>>>()
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    pub async fn count_async(&self, predicate: Option<String>) -> Result<u64> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.count(predicate.as_deref()))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    pub async fn delete_async(&self, id: Bson) -> Result<bool> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.delete(&id))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }
}

/// Typed facade: maps entities through an [`EntityMapper`]. Rows that fail
/// to map are dropped with a warning, mirroring scan-time decode handling.
pub struct TypedCollection<T, M: EntityMapper<T>> {
    raw: CollectionHandle,
    mapper: M,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T, M: EntityMapper<T>> TypedCollection<T, M> {
    pub fn insert(&self, entity: &T) -> Result<Bson> {
        self.raw.insert(self.mapper.to_document(entity)?)
    }

    pub fn insert_many(&self, entities: &[T]) -> Result<Vec<Bson>> {
        let docs = entities
            .iter()
            .map(|e| self.mapper.to_document(e))
            .collect::<Result<Vec<_>>>()?;
        self.raw.insert_many(docs)
    }

    pub fn update(&self, entity: &T) -> Result<bool> {
        self.raw.update(self.mapper.to_document(entity)?)
    }

    pub fn delete(&self, entity: &T) -> Result<bool> {
        match self.mapper.id_of(entity) {
            Some(id) => self.raw.delete(&id),
            None => Ok(false),
        }
    }

    pub fn delete_by_id(&self, id: &Bson) -> Result<bool> {
        self.raw.delete(id)
    }

    pub fn find_by_id(&self, id: &Bson) -> Result<Option<T>> {
        match self.raw.find_by_id(id)? {
            Some(doc) => Ok(Some(self.mapper.from_document(doc)?)),
            None => Ok(None),
        }
    }

    pub fn find(&self, predicate: Option<&str>) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for item in self.raw.find(predicate)? {
            let doc = item?;
            match self.mapper.from_document(doc) {
                Ok(entity) => out.push(entity),
                Err(e) => log::warn!("dropping row that failed to map: {e}"),
            }
        }
        Ok(out)
    }

    pub fn count(&self, predicate: Option<&str>) -> Result<u64> {
        self.raw.count(predicate)
    }

    pub fn ensure_index(&self, fields: &[&str], unique: bool) -> Result<bool> {
        self.raw.ensure_index(fields, unique)
    }

    pub fn raw(&self) -> &CollectionHandle {
        &self.raw
    }
}

/// Handle to the single active transaction. Dropping without a commit
/// rolls back.
pub struct Transaction {
    engine: Arc<EngineInner>,
    finished: bool,
}

impl Transaction {
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.engine.commit_txn()
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.engine.txn.rollback();
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished && self.engine.txn.rollback() {
            log::debug!("transaction dropped without commit; rolled back");
        }
    }
}
