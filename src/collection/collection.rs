use std::collections::VecDeque;
use std::sync::Arc;

use bson::{Bson, Document};
use parking_lot::RwLock;

use crate::collection::catalog::CollectionRecord;
use crate::errors::{Error, NotFoundKind, Result};
use crate::index::key::IndexKey;
use crate::index::store::{DocId, IndexDescriptor, IndexStore};
use crate::storage::large_doc::{self, LargeDocRef};
use crate::storage::page::{Page, PageType};
use crate::storage::pager::{PageManager, PinGuard};

/// Slot flags. Every data-page slot is `[flag u8][payload]` inside the
/// page's length-prefixed item framing.
const FLAG_INLINE: u8 = 0x00;
const FLAG_LARGE: u8 = 0x01;
const FLAG_TOMBSTONE: u8 = 0xFF;

pub const PRIMARY_INDEX_NAME: &str = "_id_";
pub const MAX_DOCUMENT_BYTES: usize = 16 * 1024 * 1024;

struct State {
    head_page: u32,
    tail_page: u32,
    doc_count: u64,
    primary: IndexStore,
    secondary: Vec<IndexStore>,
}

/// A named collection: a linked list of data pages, a unique primary index
/// on `_id` and any number of secondary indexes. Collections hold page ids,
/// never pages; every operation reacquires pages from the page manager.
pub struct Collection {
    name: String,
    pager: Arc<PageManager>,
    state: RwLock<State>,
}

/// One raw candidate produced by a table scan: either inline document bytes
/// or a pointer to a large-document chain.
#[derive(Debug, Clone)]
pub struct RawSlice {
    pub doc_id: DocId,
    pub bytes: Vec<u8>,
    pub large: Option<LargeDocRef>,
    pub requires_post_filter: bool,
}

/// Give every document an `_id` as its first element, generating an
/// ObjectId when absent.
pub fn normalize_id(doc: Document) -> (Document, Bson) {
    let id = doc.get("_id").cloned().unwrap_or_else(|| Bson::ObjectId(bson::oid::ObjectId::new()));
    if doc.iter().next().map(|(k, _)| k == "_id") == Some(true) {
        return (doc, id);
    }
    let mut ordered = Document::new();
    ordered.insert("_id", id.clone());
    for (k, v) in doc {
        if k != "_id" {
            ordered.insert(k, v);
        }
    }
    (ordered, id)
}

fn doc_to_bytes(doc: &Document) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    doc.to_writer(&mut out)?;
    Ok(out)
}

impl Collection {
    pub fn create(name: &str, pager: Arc<PageManager>) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(Error::InvalidArgument("collection name must be non-empty".into()));
        }
        let primary = IndexStore::new(PRIMARY_INDEX_NAME, vec!["_id".into()], true);
        Ok(Self {
            name: name.to_string(),
            pager,
            state: RwLock::new(State {
                head_page: 0,
                tail_page: 0,
                doc_count: 0,
                primary,
                secondary: Vec::new(),
            }),
        })
    }

    /// Rehydrate from a catalog record, loading each index chain.
    pub fn from_record(record: &CollectionRecord, pager: Arc<PageManager>) -> Result<Self> {
        let mut primary = IndexStore::new(PRIMARY_INDEX_NAME, vec!["_id".into()], true);
        let mut secondary = Vec::new();
        for desc in &record.indexes {
            let mut store =
                IndexStore::new(&desc.name, desc.fields.clone(), desc.unique);
            store.descriptor.root_page = desc.root_page;
            store.load(&pager)?;
            if desc.name == PRIMARY_INDEX_NAME {
                primary = store;
            } else {
                secondary.push(store);
            }
        }
        Ok(Self {
            name: record.name.clone(),
            pager,
            state: RwLock::new(State {
                head_page: record.head_page,
                tail_page: record.tail_page,
                doc_count: record.doc_count,
                primary,
                secondary,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn pager(&self) -> &Arc<PageManager> {
        &self.pager
    }

    pub fn doc_count(&self) -> u64 {
        self.state.read().doc_count
    }

    /// Catalog snapshot of the current state.
    pub fn record(&self) -> CollectionRecord {
        let state = self.state.read();
        let mut indexes = vec![state.primary.descriptor.clone()];
        indexes.extend(state.secondary.iter().map(|s| s.descriptor.clone()));
        CollectionRecord {
            name: self.name.clone(),
            head_page: state.head_page,
            tail_page: state.tail_page,
            doc_count: state.doc_count,
            indexes,
        }
    }

    /// Descriptors of the secondary indexes, for planning and admin.
    pub fn index_metas(&self) -> Vec<IndexDescriptor> {
        self.state.read().secondary.iter().map(|s| s.descriptor.clone()).collect()
    }

    /// Persist every dirty index chain.
    pub fn save_indexes(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.primary.is_dirty() {
            state.primary.save(&self.pager)?;
        }
        for ix in &mut state.secondary {
            if ix.is_dirty() {
                ix.save(&self.pager)?;
            }
        }
        Ok(())
    }

    // --- slot plumbing ----------------------------------------------------

    /// Walk a page's items, yielding `(slot, content_offset, content_len)`.
    fn slots_of(page: &Arc<Page>) -> Result<Vec<(u16, usize, usize)>> {
        let mut out = Vec::with_capacity(page.item_count() as usize);
        let mut offset = 0usize;
        for slot in 0..page.item_count() {
            let len_bytes = page.read_bytes(offset, 4)?;
            let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
            out.push((slot, offset + 4, len));
            offset += 4 + len;
        }
        Ok(out)
    }

    /// Read one slot's flag and trimmed payload. Tombstones come back `None`.
    fn read_slot(&self, doc_id: DocId) -> Result<Option<(u8, Vec<u8>)>> {
        let page = self.pager.get_page(doc_id.page_id, true)?;
        if page.page_type()? != PageType::Data {
            return Err(Error::corrupted(format!("page {} is not a data page", doc_id.page_id)));
        }
        let _pin = PinGuard::new(Arc::clone(&page));
        let slots = Self::slots_of(&page)?;
        let Some(&(_, content_offset, content_len)) =
            slots.iter().find(|(slot, _, _)| *slot == doc_id.slot)
        else {
            return Ok(None);
        };
        let content = page.read_bytes(content_offset, content_len)?;
        let (flag, payload) = content.split_first().ok_or_else(|| {
            Error::corrupted(format!("empty slot {} on page {}", doc_id.slot, doc_id.page_id))
        })?;
        match *flag {
            FLAG_TOMBSTONE => Ok(None),
            FLAG_LARGE => Ok(Some((FLAG_LARGE, payload.to_vec()))),
            FLAG_INLINE => {
                // In-place updates can leave slack after the document;
                // the inner length prefix trims it.
                if payload.len() < 5 {
                    return Err(Error::corrupted("inline document slot too short"));
                }
                let inner = i32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
                if inner < 5 || inner > payload.len() {
                    return Err(Error::corrupted("inline document length out of slot bounds"));
                }
                Ok(Some((FLAG_INLINE, payload[..inner].to_vec())))
            }
            other => Err(Error::corrupted(format!("unknown slot flag {other:#04x}"))),
        }
    }

    /// Materialize the document at `doc_id`, resolving large chains.
    pub fn get_document(&self, doc_id: DocId) -> Result<Option<Document>> {
        let Some((flag, payload)) = self.read_slot(doc_id)? else { return Ok(None) };
        let bytes = if flag == FLAG_LARGE {
            let re = LargeDocRef::from_bytes(&payload)?;
            large_doc::read(&self.pager, re.index_page_id)?
        } else {
            payload
        };
        Ok(Some(Document::from_reader(&mut std::io::Cursor::new(&bytes))?))
    }

    fn tombstone_slot(&self, doc_id: DocId) -> Result<()> {
        let page = self.pager.get_page(doc_id.page_id, true)?;
        let slots = Self::slots_of(&page)?;
        let Some(&(_, content_offset, _)) =
            slots.iter().find(|(slot, _, _)| *slot == doc_id.slot)
        else {
            return Err(Error::not_found(NotFoundKind::Document, format!("{doc_id:?}")));
        };
        page.write_data(content_offset, &[FLAG_TOMBSTONE])?;
        self.pager.save_page(&page, false)
    }

    /// Append a slot to the tail data page, growing the chain when full.
    fn append_slot(&self, state: &mut State, content: &[u8]) -> Result<DocId> {
        let needed = content.len() + 4;
        let tail = if state.tail_page == 0 {
            let page = self.pager.new_page(PageType::Data)?;
            state.head_page = page.page_id();
            state.tail_page = page.page_id();
            page
        } else {
            let page = self.pager.get_page(state.tail_page, true)?;
            if (page.free_bytes() as usize) < needed {
                let fresh = self.pager.new_page(PageType::Data)?;
                fresh.set_prev_page_id(page.page_id());
                page.set_next_page_id(fresh.page_id());
                self.pager.save_page(&page, false)?;
                state.tail_page = fresh.page_id();
                fresh
            } else {
                page
            }
        };
        let slot = tail.item_count();
        tail.append(content)?;
        self.pager.save_page(&tail, false)?;
        Ok(DocId { page_id: tail.page_id(), slot })
    }

    /// Whether a serialized document still fits a single data-page slot.
    fn fits_inline(&self, doc_len: usize) -> bool {
        4 + 1 + doc_len <= self.pager.payload_capacity()
    }

    // --- CRUD -------------------------------------------------------------

    /// Insert a document, returning its `_id`. The `_id` lands in the
    /// primary index; every secondary index gets the document's keys.
    pub fn insert_document(&self, doc: Document) -> Result<Bson> {
        let (doc, id) = normalize_id(doc);
        let bytes = doc_to_bytes(&doc)?;
        if bytes.len() > MAX_DOCUMENT_BYTES {
            return Err(Error::InvalidArgument(format!(
                "document of {} bytes exceeds the {MAX_DOCUMENT_BYTES}-byte cap",
                bytes.len()
            )));
        }
        let mut state = self.state.write();
        let pk = IndexKey::single(id.clone());
        if state.primary.find_exact(&pk).is_some() {
            return Err(Error::Conflict {
                index: PRIMARY_INDEX_NAME.into(),
                key: format!("{id}"),
            });
        }
        // Unique secondaries veto before any bytes land on a page.
        for ix in &state.secondary {
            if ix.descriptor.unique {
                let key = ix.key_for(&doc);
                if ix.find_exact(&key).is_some() {
                    return Err(Error::Conflict {
                        index: ix.descriptor.name.clone(),
                        key: format!("{:?}", key.0),
                    });
                }
            }
        }

        let content = if self.fits_inline(bytes.len()) {
            let mut c = Vec::with_capacity(1 + bytes.len());
            c.push(FLAG_INLINE);
            c.extend_from_slice(&bytes);
            c
        } else {
            let re = large_doc::store(&self.pager, &self.name, &bytes)?;
            let mut c = Vec::with_capacity(9);
            c.push(FLAG_LARGE);
            c.extend_from_slice(&re.to_bytes());
            c
        };
        let doc_id = self.append_slot(&mut state, &content)?;
        state.primary.insert(pk, doc_id)?;
        for ix in &mut state.secondary {
            ix.insert(ix.key_for(&doc), doc_id)?;
        }
        state.doc_count += 1;
        Ok(id)
    }

    /// Locate by `_id` through the primary index.
    pub fn find_by_id(&self, id: &Bson) -> Result<Option<Document>> {
        let doc_id = {
            let state = self.state.read();
            state.primary.find_exact(&IndexKey::single(id.clone()))
        };
        match doc_id {
            Some(doc_id) => self.get_document(doc_id),
            None => Ok(None),
        }
    }

    pub fn doc_id_for(&self, id: &Bson) -> Option<DocId> {
        self.state.read().primary.find_exact(&IndexKey::single(id.clone()))
    }

    /// Update in place when the new image fits the old slot; otherwise
    /// tombstone + reinsert, preserving `_id`. Returns false when no
    /// document carries this `_id`.
    pub fn update_document(&self, doc: Document) -> Result<bool> {
        let (doc, id) = normalize_id(doc);
        let bytes = doc_to_bytes(&doc)?;
        if bytes.len() > MAX_DOCUMENT_BYTES {
            return Err(Error::InvalidArgument(format!(
                "document of {} bytes exceeds the {MAX_DOCUMENT_BYTES}-byte cap",
                bytes.len()
            )));
        }
        let mut state = self.state.write();
        let pk = IndexKey::single(id.clone());
        let Some(old_id) = state.primary.find_exact(&pk) else { return Ok(false) };
        let Some((old_flag, old_payload)) = self.read_slot(old_id)? else {
            return Err(Error::corrupted("primary index points at a tombstoned slot"));
        };
        let old_doc = if old_flag == FLAG_LARGE {
            let re = LargeDocRef::from_bytes(&old_payload)?;
            let raw = large_doc::read(&self.pager, re.index_page_id)?;
            Document::from_reader(&mut std::io::Cursor::new(&raw))?
        } else {
            Document::from_reader(&mut std::io::Cursor::new(&old_payload))?
        };

        for ix in &state.secondary {
            if ix.descriptor.unique {
                let key = ix.key_for(&doc);
                if let Some(holder) = ix.find_exact(&key)
                    && holder != old_id
                {
                    return Err(Error::Conflict {
                        index: ix.descriptor.name.clone(),
                        key: format!("{:?}", key.0),
                    });
                }
            }
        }

        // Slot reuse: inline before, still inline, and no bigger than the
        // slot's existing payload capacity.
        let new_doc_id = if old_flag == FLAG_INLINE
            && self.fits_inline(bytes.len())
            && bytes.len() <= slot_payload_len(&self.pager, old_id)?
        {
            let page = self.pager.get_page(old_id.page_id, true)?;
            let slots = Self::slots_of(&page)?;
            let (_, content_offset, _) = slots
                .into_iter()
                .find(|(slot, _, _)| *slot == old_id.slot)
                .ok_or_else(|| Error::corrupted("slot vanished during update"))?;
            page.write_data(content_offset + 1, &bytes)?;
            self.pager.save_page(&page, false)?;
            old_id
        } else {
            if old_flag == FLAG_LARGE {
                let re = LargeDocRef::from_bytes(&old_payload)?;
                large_doc::delete(&self.pager, re.index_page_id)?;
            }
            self.tombstone_slot(old_id)?;
            let content = if self.fits_inline(bytes.len()) {
                let mut c = Vec::with_capacity(1 + bytes.len());
                c.push(FLAG_INLINE);
                c.extend_from_slice(&bytes);
                c
            } else {
                let re = large_doc::store(&self.pager, &self.name, &bytes)?;
                let mut c = Vec::with_capacity(9);
                c.push(FLAG_LARGE);
                c.extend_from_slice(&re.to_bytes());
                c
            };
            self.append_slot(&mut state, &content)?
        };

        if new_doc_id != old_id {
            state.primary.remove(&pk, old_id);
            state.primary.insert(pk, new_doc_id)?;
        }
        for ix in &mut state.secondary {
            ix.remove(&ix.key_for(&old_doc), old_id);
            ix.insert(ix.key_for(&doc), new_doc_id)?;
        }
        Ok(true)
    }

    /// Remove by `_id`: primary and secondary entries go, the slot is
    /// tombstoned, large chains are freed. Returns false when absent.
    pub fn delete_document(&self, id: &Bson) -> Result<bool> {
        let mut state = self.state.write();
        let pk = IndexKey::single(id.clone());
        let Some(doc_id) = state.primary.find_exact(&pk) else { return Ok(false) };
        let Some((flag, payload)) = self.read_slot(doc_id)? else {
            state.primary.remove(&pk, doc_id);
            return Ok(false);
        };
        let old_doc = if flag == FLAG_LARGE {
            let re = LargeDocRef::from_bytes(&payload)?;
            let raw = large_doc::read(&self.pager, re.index_page_id)?;
            let doc = Document::from_reader(&mut std::io::Cursor::new(&raw))?;
            large_doc::delete(&self.pager, re.index_page_id)?;
            doc
        } else {
            Document::from_reader(&mut std::io::Cursor::new(&payload))?
        };
        self.tombstone_slot(doc_id)?;
        state.primary.remove(&pk, doc_id);
        for ix in &mut state.secondary {
            ix.remove(&ix.key_for(&old_doc), doc_id);
        }
        state.doc_count = state.doc_count.saturating_sub(1);
        Ok(true)
    }

    // --- index admin ------------------------------------------------------

    /// Create a secondary index over `fields`, backfilling from every live
    /// document. Returns false when an identical index already exists.
    pub fn ensure_index(&self, fields: &[&str], unique: bool) -> Result<bool> {
        if fields.is_empty() || fields.iter().any(|f| f.trim().is_empty()) {
            return Err(Error::InvalidArgument("index fields must be non-empty".into()));
        }
        let name = format!("ix_{}", fields.join("_"));
        {
            let state = self.state.read();
            if let Some(existing) = state.secondary.iter().find(|s| s.descriptor.name == name) {
                if existing.descriptor.fields == fields && existing.descriptor.unique == unique {
                    return Ok(false);
                }
                return Err(Error::InvalidArgument(format!(
                    "index '{name}' already exists with a different shape"
                )));
            }
        }
        let mut store =
            IndexStore::new(&name, fields.iter().map(|f| (*f).to_string()).collect(), unique);
        for item in self.find_all_raw() {
            let slice = item?;
            let bytes = match slice.large {
                Some(re) => large_doc::read(&self.pager, re.index_page_id)?,
                None => slice.bytes,
            };
            let doc = Document::from_reader(&mut std::io::Cursor::new(&bytes))?;
            store.insert(store.key_for(&doc), slice.doc_id)?;
        }
        self.state.write().secondary.push(store);
        Ok(true)
    }

    /// Drop a secondary index and free its page chain.
    pub fn drop_index(&self, name: &str) -> Result<bool> {
        if name == PRIMARY_INDEX_NAME {
            return Err(Error::InvalidArgument("the primary index cannot be dropped".into()));
        }
        let mut state = self.state.write();
        let Some(at) = state.secondary.iter().position(|s| s.descriptor.name == name) else {
            return Ok(false);
        };
        let store = state.secondary.remove(at);
        let mut next = store.descriptor.root_page;
        while next != 0 {
            let page = self.pager.get_page(next, true)?;
            let following = page.next_page_id();
            self.pager.free_page(next)?;
            next = following;
        }
        Ok(true)
    }

    // --- scanning ---------------------------------------------------------

    /// Stream every live slot as raw bytes, in page-chain order.
    pub fn find_all_raw(&self) -> RawScan {
        let head = self.state.read().head_page;
        RawScan {
            pager: Arc::clone(&self.pager),
            next_page: head,
            pending: VecDeque::new(),
        }
    }

    /// Index lookup surface for the executor.
    pub fn index_find_exact(&self, index: &str, key: &IndexKey) -> Result<Vec<DocId>> {
        let state = self.state.read();
        let store = state
            .secondary
            .iter()
            .find(|s| s.descriptor.name == index)
            .ok_or_else(|| Error::not_found(NotFoundKind::Index, index))?;
        Ok(if store.descriptor.unique {
            store.find_exact(key).into_iter().collect()
        } else {
            store.find(key)
        })
    }

    pub fn index_find_range(
        &self,
        index: &str,
        min: &IndexKey,
        max: &IndexKey,
        inclusive_min: bool,
        inclusive_max: bool,
    ) -> Result<Vec<DocId>> {
        let state = self.state.read();
        let store = state
            .secondary
            .iter()
            .find(|s| s.descriptor.name == index)
            .ok_or_else(|| Error::not_found(NotFoundKind::Index, index))?;
        Ok(store.find_range(min, max, inclusive_min, inclusive_max))
    }

    /// Release every page this collection owns: large-document chains,
    /// data pages, then index chains. Used when a collection is dropped.
    pub fn destroy(&self) -> Result<()> {
        for item in self.find_all_raw() {
            let slice = item?;
            if let Some(re) = slice.large {
                large_doc::delete(&self.pager, re.index_page_id)?;
            }
        }
        let mut state = self.state.write();
        let mut next = state.head_page;
        while next != 0 {
            let page = self.pager.get_page(next, true)?;
            let following = page.next_page_id();
            self.pager.free_page(next)?;
            next = following;
        }
        state.head_page = 0;
        state.tail_page = 0;
        state.doc_count = 0;
        let mut roots: Vec<u32> = vec![state.primary.descriptor.root_page];
        roots.extend(state.secondary.iter().map(|s| s.descriptor.root_page));
        for root in roots {
            let mut next = root;
            while next != 0 {
                let page = self.pager.get_page(next, true)?;
                let following = page.next_page_id();
                self.pager.free_page(next)?;
                next = following;
            }
        }
        Ok(())
    }

    // --- maintenance ------------------------------------------------------

    /// Scan-and-rewrite cycle: live slots are packed front-to-back into the
    /// existing chain, tombstones vanish, surplus pages are freed and every
    /// index is rebuilt against the new slot locations.
    pub fn compact(&self) -> Result<u64> {
        let mut state = self.state.write();
        let mut contents: Vec<Vec<u8>> = Vec::new();
        let mut chain = Vec::new();
        let mut next = state.head_page;
        while next != 0 {
            let page = self.pager.get_page(next, true)?;
            chain.push(next);
            for (slot, content_offset, content_len) in Self::slots_of(&page)? {
                let content = page.read_bytes(content_offset, content_len)?;
                match content.first() {
                    Some(&FLAG_TOMBSTONE) | None => {}
                    Some(&FLAG_INLINE) => {
                        // Trim slack so packed slots shrink to fit.
                        let payload = &content[1..];
                        if payload.len() < 5 {
                            return Err(Error::corrupted(format!(
                                "inline slot {slot} too short during compaction"
                            )));
                        }
                        let inner =
                            i32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
                        if inner < 5 || inner > payload.len() {
                            return Err(Error::corrupted(
                                "inline slot length out of bounds during compaction",
                            ));
                        }
                        let mut c = Vec::with_capacity(1 + inner);
                        c.push(FLAG_INLINE);
                        c.extend_from_slice(&payload[..inner]);
                        contents.push(c);
                    }
                    Some(_) => contents.push(content),
                }
            }
            next = page.next_page_id();
        }

        // Repack into the old chain, freeing what is left over.
        let mut pos = 0usize;
        state.head_page = 0;
        state.tail_page = 0;
        let mut current: Option<Arc<Page>> = None;
        for content in &contents {
            let needed = content.len() + 4;
            let page = match current.take() {
                Some(p) if (p.free_bytes() as usize) >= needed => p,
                other => {
                    let fresh = if let Some(&id) = chain.get(pos) {
                        pos += 1;
                        let p = self.pager.get_page(id, true)?;
                        p.reset(0);
                        p.set_page_type(PageType::Data);
                        p.set_prev_page_id(0);
                        p.set_next_page_id(0);
                        p
                    } else {
                        pos += 1;
                        let p = self.pager.new_page(PageType::Data)?;
                        chain.push(p.page_id());
                        p
                    };
                    if let Some(prev) = other {
                        prev.set_next_page_id(fresh.page_id());
                        fresh.set_prev_page_id(prev.page_id());
                        self.pager.save_page(&prev, false)?;
                    }
                    if state.head_page == 0 {
                        state.head_page = fresh.page_id();
                    }
                    fresh
                }
            };
            page.append(content)?;
            state.tail_page = page.page_id();
            current = Some(page);
        }
        if let Some(p) = current {
            self.pager.save_page(&p, false)?;
        }
        for id in chain.drain(pos..) {
            self.pager.free_page(id)?;
        }

        // Rebuild every index against the packed locations.
        state.primary.clear();
        for ix in &mut state.secondary {
            ix.clear();
        }
        state.doc_count = 0;
        let mut next = state.head_page;
        while next != 0 {
            let page = self.pager.get_page(next, true)?;
            for (slot, content_offset, content_len) in Self::slots_of(&page)? {
                let content = page.read_bytes(content_offset, content_len)?;
                let doc_id = DocId { page_id: page.page_id(), slot };
                let bytes = match content.split_first() {
                    Some((&FLAG_INLINE, payload)) => payload.to_vec(),
                    Some((&FLAG_LARGE, payload)) => {
                        let re = LargeDocRef::from_bytes(payload)?;
                        large_doc::read(&self.pager, re.index_page_id)?
                    }
                    _ => continue,
                };
                let doc = Document::from_reader(&mut std::io::Cursor::new(&bytes))?;
                let id = doc.get("_id").cloned().unwrap_or(Bson::Null);
                state.primary.insert(IndexKey::single(id), doc_id)?;
                for ix in &mut state.secondary {
                    ix.insert(ix.key_for(&doc), doc_id)?;
                }
                state.doc_count += 1;
            }
            next = page.next_page_id();
        }
        Ok(state.doc_count)
    }
}

// The old slot's payload capacity, used to decide in-place updates.
fn slot_payload_len(pager: &PageManager, doc_id: DocId) -> Result<usize> {
    let page = pager.get_page(doc_id.page_id, true)?;
    let mut offset = 0usize;
    for slot in 0..page.item_count() {
        let len = u32::from_le_bytes(page.read_bytes(offset, 4)?.try_into().unwrap()) as usize;
        if slot == doc_id.slot {
            return Ok(len.saturating_sub(1));
        }
        offset += 4 + len;
    }
    Err(Error::not_found(NotFoundKind::Document, format!("{doc_id:?}")))
}

/// Iterator over live slots; pages load lazily, one ahead.
pub struct RawScan {
    pager: Arc<PageManager>,
    next_page: u32,
    pending: VecDeque<RawSlice>,
}

impl Iterator for RawScan {
    type Item = Result<RawSlice>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(slice) = self.pending.pop_front() {
                return Some(Ok(slice));
            }
            if self.next_page == 0 {
                return None;
            }
            let page = match self.pager.get_page(self.next_page, true) {
                Ok(p) => p,
                Err(e) => {
                    self.next_page = 0;
                    return Some(Err(e));
                }
            };
            self.next_page = page.next_page_id();
            if let Err(e) = self.load_page(&page) {
                return Some(Err(e));
            }
        }
    }
}

impl RawScan {
    fn load_page(&mut self, page: &Arc<Page>) -> Result<()> {
        let _pin = PinGuard::new(Arc::clone(page));
        let mut offset = 0usize;
        for slot in 0..page.item_count() {
            let len = u32::from_le_bytes(page.read_bytes(offset, 4)?.try_into().unwrap()) as usize;
            let content = page.read_bytes(offset + 4, len)?;
            offset += 4 + len;
            let doc_id = DocId { page_id: page.page_id(), slot };
            match content.split_first() {
                Some((&FLAG_TOMBSTONE, _)) | None => {}
                Some((&FLAG_INLINE, payload)) => {
                    if payload.len() < 5 {
                        log::warn!("skipping malformed slot {slot} on page {}", page.page_id());
                        continue;
                    }
                    let inner = i32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
                    if inner < 5 || inner > payload.len() {
                        log::warn!("skipping malformed slot {slot} on page {}", page.page_id());
                        continue;
                    }
                    self.pending.push_back(RawSlice {
                        doc_id,
                        bytes: payload[..inner].to_vec(),
                        large: None,
                        requires_post_filter: false,
                    });
                }
                Some((&FLAG_LARGE, payload)) => match LargeDocRef::from_bytes(payload) {
                    Ok(re) => self.pending.push_back(RawSlice {
                        doc_id,
                        bytes: Vec::new(),
                        large: Some(re),
                        requires_post_filter: false,
                    }),
                    Err(_) => {
                        log::warn!(
                            "skipping malformed large-doc pointer in slot {slot} on page {}",
                            page.page_id()
                        );
                    }
                },
                Some(_) => {
                    log::warn!("skipping slot {slot} with unknown flag on page {}", page.page_id());
                }
            }
        }
        Ok(())
    }
}
