use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use bson::Bson;

use crate::errors::{Error, Result};
use crate::index::key::IndexKey;
use crate::storage::page::PageType;
use crate::storage::pager::PageManager;

/// Location of a document slot: data page id plus slot ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocId {
    pub page_id: u32,
    pub slot: u16,
}

/// Catalog-visible description of one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
    pub root_page: u32,
    pub entry_count: u64,
}

/// Ordered map from composite key to document ids, materialized in memory
/// and persisted as a chain of `Index` pages rooted at the descriptor's
/// root page id.
pub struct IndexStore {
    pub descriptor: IndexDescriptor,
    map: BTreeMap<IndexKey, BTreeSet<DocId>>,
    dirty: bool,
}

impl IndexStore {
    pub fn new(name: &str, fields: Vec<String>, unique: bool) -> Self {
        Self {
            descriptor: IndexDescriptor {
                name: name.to_string(),
                fields,
                unique,
                root_page: 0,
                entry_count: 0,
            },
            map: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Key for `doc` under this index: one value per indexed field, `Null`
    /// standing in for absent fields.
    pub fn key_for(&self, doc: &bson::Document) -> IndexKey {
        IndexKey(
            self.descriptor
                .fields
                .iter()
                .map(|f| doc.get(f).cloned().unwrap_or(Bson::Null))
                .collect(),
        )
    }

    pub fn arity(&self) -> usize {
        self.descriptor.fields.len()
    }

    pub fn entry_count(&self) -> u64 {
        self.descriptor.entry_count
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Insert an entry. A unique index rejects a second document under the
    /// same key with `Conflict`, leaving the index unchanged.
    pub fn insert(&mut self, key: IndexKey, id: DocId) -> Result<()> {
        if self.descriptor.unique
            && let Some(existing) = self.map.get(&key)
            && let Some(&holder) = existing.iter().next()
            && holder != id
        {
            return Err(Error::Conflict {
                index: self.descriptor.name.clone(),
                key: format!("{:?}", key.0),
            });
        }
        if self.map.entry(key).or_default().insert(id) {
            self.descriptor.entry_count += 1;
            self.dirty = true;
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &IndexKey, id: DocId) -> bool {
        let Some(set) = self.map.get_mut(key) else { return false };
        let removed = set.remove(&id);
        if set.is_empty() {
            self.map.remove(key);
        }
        if removed {
            self.descriptor.entry_count = self.descriptor.entry_count.saturating_sub(1);
            self.dirty = true;
        }
        removed
    }

    /// Exact lookup on a unique index: at most one holder.
    pub fn find_exact(&self, key: &IndexKey) -> Option<DocId> {
        self.map.get(key).and_then(|set| set.iter().next().copied())
    }

    pub fn find(&self, key: &IndexKey) -> Vec<DocId> {
        self.map.get(key).map(|set| set.iter().copied().collect()).unwrap_or_default()
    }

    pub fn find_range(
        &self,
        min: &IndexKey,
        max: &IndexKey,
        inclusive_min: bool,
        inclusive_max: bool,
    ) -> Vec<DocId> {
        let lower = if inclusive_min {
            Bound::Included(min.clone())
        } else {
            Bound::Excluded(min.clone())
        };
        let upper = if inclusive_max {
            Bound::Included(max.clone())
        } else {
            Bound::Excluded(max.clone())
        };
        let mut out = Vec::new();
        for (_, set) in self.map.range((lower, upper)) {
            out.extend(set.iter().copied());
        }
        out
    }

    pub fn clear(&mut self) {
        if !self.map.is_empty() {
            self.dirty = true;
        }
        self.map.clear();
        self.descriptor.entry_count = 0;
    }

    // --- persistence -----------------------------------------------------

    /// Rewrite the Index page chain from the in-memory map. Pages already in
    /// the chain are reused, extras are freed, and the root page id is
    /// (re)assigned on first save.
    pub fn save(&mut self, pager: &PageManager) -> Result<()> {
        let mut entries: Vec<Vec<u8>> = Vec::with_capacity(self.descriptor.entry_count as usize);
        for (key, ids) in &self.map {
            let key_bytes = key.encode()?;
            let key_len = u16::try_from(key_bytes.len()).map_err(|_| {
                Error::InvalidArgument("index key too large for an index page".into())
            })?;
            for id in ids {
                let mut entry = Vec::with_capacity(2 + key_bytes.len() + 6);
                entry.extend_from_slice(&key_len.to_le_bytes());
                entry.extend_from_slice(&key_bytes);
                entry.extend_from_slice(&id.page_id.to_le_bytes());
                entry.extend_from_slice(&id.slot.to_le_bytes());
                entries.push(entry);
            }
        }

        let mut chain = self.existing_chain(pager)?;
        let mut pos = 0usize;
        let mut current = take_chain_page(pager, &mut chain, &mut pos)?;
        self.descriptor.root_page = current.page_id();
        for entry in &entries {
            if entry.len() + 4 > current.capacity() {
                return Err(Error::InvalidArgument("index entry exceeds page capacity".into()));
            }
            if (current.free_bytes() as usize) < entry.len() + 4 {
                let next = take_chain_page(pager, &mut chain, &mut pos)?;
                current.set_next_page_id(next.page_id());
                pager.save_page(&current, false)?;
                current = next;
            }
            current.append(entry)?;
        }
        current.set_next_page_id(0);
        pager.save_page(&current, false)?;
        // Free chain pages the shrunken index no longer needs.
        for id in chain.drain(pos..) {
            pager.free_page(id)?;
        }
        self.dirty = false;
        Ok(())
    }

    fn existing_chain(&self, pager: &PageManager) -> Result<Vec<u32>> {
        let mut chain = Vec::new();
        let mut next = self.descriptor.root_page;
        while next != 0 {
            let page = pager.get_page(next, true)?;
            if page.page_type()? != PageType::Index {
                return Err(Error::corrupted(format!("page {next} is not an index page")));
            }
            chain.push(next);
            next = page.next_page_id();
        }
        Ok(chain)
    }

    /// Rebuild the in-memory map from the Index page chain.
    pub fn load(&mut self, pager: &PageManager) -> Result<()> {
        self.map.clear();
        self.descriptor.entry_count = 0;
        let mut next = self.descriptor.root_page;
        while next != 0 {
            let page = pager.get_page(next, true)?;
            if page.page_type()? != PageType::Index {
                return Err(Error::corrupted(format!("page {next} is not an index page")));
            }
            let mut offset = 0usize;
            for _ in 0..page.item_count() {
                let len_bytes = page.read_bytes(offset, 4)?;
                let slot_len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
                let entry = page.read_bytes(offset + 4, slot_len)?;
                offset += 4 + slot_len;
                if entry.len() < 8 {
                    return Err(Error::corrupted("index entry too short"));
                }
                let key_len = u16::from_le_bytes(entry[0..2].try_into().unwrap()) as usize;
                if 2 + key_len + 6 != entry.len() {
                    return Err(Error::corrupted("index entry framing mismatch"));
                }
                let key = IndexKey::decode(&entry[2..2 + key_len])?;
                let page_id =
                    u32::from_le_bytes(entry[2 + key_len..2 + key_len + 4].try_into().unwrap());
                let slot =
                    u16::from_le_bytes(entry[2 + key_len + 4..2 + key_len + 6].try_into().unwrap());
                if self.map.entry(key).or_default().insert(DocId { page_id, slot }) {
                    self.descriptor.entry_count += 1;
                }
            }
            next = page.next_page_id();
        }
        self.dirty = false;
        Ok(())
    }
}

/// Reuse the next page of an existing chain, or grow it by one.
fn take_chain_page(
    pager: &PageManager,
    chain: &mut Vec<u32>,
    pos: &mut usize,
) -> Result<std::sync::Arc<crate::storage::page::Page>> {
    let page = if let Some(&id) = chain.get(*pos) {
        let page = pager.get_page(id, true)?;
        page.reset(0);
        page.set_page_type(PageType::Index);
        page
    } else {
        let page = pager.new_page(PageType::Index)?;
        chain.push(page.page_id());
        page
    };
    *pos += 1;
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::DiskStream;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn key_i32(v: i32) -> IndexKey {
        IndexKey::single(Bson::Int32(v))
    }

    #[test]
    fn unique_index_rejects_duplicates_unchanged() {
        let mut idx = IndexStore::new("uq_email", vec!["email".into()], true);
        let a = DocId { page_id: 2, slot: 0 };
        let b = DocId { page_id: 2, slot: 1 };
        idx.insert(IndexKey::single(Bson::String("x@y".into())), a).unwrap();
        let err = idx.insert(IndexKey::single(Bson::String("x@y".into())), b);
        assert!(matches!(err, Err(Error::Conflict { .. })));
        assert_eq!(idx.entry_count(), 1);
        assert_eq!(idx.find_exact(&IndexKey::single(Bson::String("x@y".into()))), Some(a));
    }

    #[test]
    fn multi_index_accumulates_ids() {
        let mut idx = IndexStore::new("ix_tag", vec!["tag".into()], false);
        let a = DocId { page_id: 2, slot: 0 };
        let b = DocId { page_id: 2, slot: 1 };
        idx.insert(key_i32(5), a).unwrap();
        idx.insert(key_i32(5), b).unwrap();
        assert_eq!(idx.find(&key_i32(5)).len(), 2);
        assert!(idx.remove(&key_i32(5), a));
        assert_eq!(idx.find(&key_i32(5)), vec![b]);
    }

    #[test]
    fn range_respects_bounds() {
        let mut idx = IndexStore::new("ix_n", vec!["n".into()], false);
        for i in 0..10 {
            idx.insert(key_i32(i), DocId { page_id: 2, slot: i as u16 }).unwrap();
        }
        let hits = idx.find_range(&key_i32(3), &key_i32(6), true, false);
        let slots: Vec<u16> = hits.iter().map(|d| d.slot).collect();
        assert_eq!(slots, vec![3, 4, 5]);
    }

    #[test]
    fn composite_prefix_range_with_sentinel() {
        let mut idx = IndexStore::new("ix_ab", vec!["a".into(), "b".into()], false);
        for i in 0..100 {
            let key = IndexKey(vec![Bson::Int32(i % 10), Bson::Int32(i)]);
            idx.insert(key, DocId { page_id: 2, slot: i as u16 }).unwrap();
        }
        let min = IndexKey(vec![Bson::Int32(3), Bson::Int32(30)]);
        let max = IndexKey(vec![Bson::Int32(3), Bson::MaxKey]);
        let hits = idx.find_range(&min, &max, true, true);
        let mut slots: Vec<u16> = hits.iter().map(|d| d.slot).collect();
        slots.sort_unstable();
        assert_eq!(slots, vec![33, 43, 53, 63, 73, 83, 93]);
    }

    #[test]
    fn persistence_roundtrip() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskStream::open(&dir.path().join("t.db")).unwrap());
        let pager = PageManager::open(disk, 512, 64).unwrap();
        let mut idx = IndexStore::new("ix_n", vec!["n".into()], false);
        for i in 0..200 {
            idx.insert(key_i32(i), DocId { page_id: 2, slot: i as u16 }).unwrap();
        }
        idx.save(&pager).unwrap();
        let root = idx.descriptor.root_page;
        assert_ne!(root, 0);

        let mut reloaded = IndexStore::new("ix_n", vec!["n".into()], false);
        reloaded.descriptor.root_page = root;
        reloaded.load(&pager).unwrap();
        assert_eq!(reloaded.entry_count(), 200);
        assert_eq!(reloaded.find_exact(&key_i32(123)), Some(DocId { page_id: 2, slot: 123 }));
    }

    #[test]
    fn shrinking_index_frees_chain_pages() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskStream::open(&dir.path().join("t.db")).unwrap());
        let pager = PageManager::open(disk, 512, 64).unwrap();
        let mut idx = IndexStore::new("ix_n", vec!["n".into()], false);
        for i in 0..500 {
            idx.insert(key_i32(i), DocId { page_id: 2, slot: i as u16 }).unwrap();
        }
        idx.save(&pager).unwrap();
        idx.clear();
        idx.save(&pager).unwrap();
        assert_ne!(pager.header().first_free_page_id, 0);
        let mut reloaded = IndexStore::new("ix_n", vec!["n".into()], false);
        reloaded.descriptor.root_page = idx.descriptor.root_page;
        reloaded.load(&pager).unwrap();
        assert_eq!(reloaded.entry_count(), 0);
    }
}
