use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::{Mutex, RwLock};

use crate::errors::{Error, Result};
use crate::storage::disk::DiskStream;
use crate::storage::header::{DbHeader, HEADER_PAGE_ID};
use crate::storage::page::{PAGE_HEADER_SIZE, Page, PageType};

/// Owns the page cache, the allocation path and the database header state.
///
/// Exactly one live [`Page`] exists per page id while cached; callers share
/// pages via `Arc` and the pin/unpin protocol. Eviction picks the
/// least-recently-used unpinned page and flushes it first when dirty.
pub struct PageManager {
    disk: Arc<DiskStream>,
    page_size: usize,
    max_cached: usize,
    cache: Mutex<LruCache<u32, Arc<Page>>>,
    header_page: Arc<Page>,
    header: RwLock<DbHeader>,
    alloc: Mutex<()>,
    next_lsn: AtomicU64,
}

/// RAII pin: the page cannot be evicted while this guard lives.
pub struct PinGuard {
    page: Arc<Page>,
}

impl PinGuard {
    pub fn new(page: Arc<Page>) -> Self {
        page.pin();
        Self { page }
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.page.unpin();
    }
}

impl PageManager {
    /// Open an existing database file or initialize a fresh one.
    pub fn open(disk: Arc<DiskStream>, requested_page_size: u32, cache_size: usize) -> Result<Self> {
        let file_len = disk.len()?;
        if file_len == 0 {
            let page_size = requested_page_size as usize;
            let header_page =
                Arc::new(Page::new(HEADER_PAGE_ID, PageType::Header, page_size));
            let header = DbHeader::new(requested_page_size);
            header.store(&header_page)?;
            let pager = Self {
                disk,
                page_size,
                max_cached: cache_size,
                cache: Mutex::new(LruCache::unbounded()),
                header_page,
                header: RwLock::new(header),
                alloc: Mutex::new(()),
                next_lsn: AtomicU64::new(1),
            };
            pager.disk.set_length(page_size as u64)?;
            pager.flush_page(&pager.header_page)?;
            return Ok(pager);
        }

        // The stored page size lives in the header payload; sniff it from a
        // fixed-size prefix before reading the full page.
        let prefix = disk.read_page(0, (PAGE_HEADER_SIZE + 16).min(file_len as usize))?;
        if prefix.len() < PAGE_HEADER_SIZE + 16 {
            return Err(Error::corrupted("file too short for a header page"));
        }
        let page_size =
            u32::from_le_bytes(prefix[PAGE_HEADER_SIZE + 12..PAGE_HEADER_SIZE + 16].try_into().unwrap());
        if page_size < PAGE_HEADER_SIZE as u32 + 16 || u64::from(page_size) > file_len {
            return Err(Error::corrupted(format!("implausible page size {page_size}")));
        }
        let header_page = Arc::new(Page::from_bytes(disk.read_page(0, page_size as usize)?)?);
        let header = DbHeader::load(&header_page)?;
        let expected_len = u64::from(header.total_pages) * u64::from(page_size);
        if expected_len != file_len {
            // A crash between extending the file and flushing the header
            // leaves trailing zero pages; the header is authoritative and
            // journal replay re-extends as needed.
            log::warn!(
                "file length {file_len} disagrees with total_pages {}; trimming to {expected_len}",
                header.total_pages
            );
            disk.set_length(expected_len)?;
        }
        let pager = Self {
            disk,
            page_size: page_size as usize,
            max_cached: cache_size,
            cache: Mutex::new(LruCache::unbounded()),
            header_page,
            header: RwLock::new(header),
            alloc: Mutex::new(()),
            next_lsn: AtomicU64::new(1),
        };
        pager.rebuild_free_list_if_needed()?;
        Ok(pager)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Usable payload bytes on a data-bearing page.
    pub fn payload_capacity(&self) -> usize {
        self.page_size - PAGE_HEADER_SIZE
    }

    pub fn header(&self) -> DbHeader {
        self.header.read().clone()
    }

    pub fn update_header(&self, f: impl FnOnce(&mut DbHeader)) -> Result<()> {
        let mut header = self.header.write();
        f(&mut header);
        header.store(&self.header_page)
    }

    pub fn header_page(&self) -> Arc<Page> {
        Arc::clone(&self.header_page)
    }

    fn offset_of(&self, page_id: u32) -> u64 {
        u64::from(page_id - 1) * self.page_size as u64
    }

    pub fn get_page(&self, page_id: u32, use_cache: bool) -> Result<Arc<Page>> {
        if page_id == 0 {
            return Err(Error::InvalidArgument("page id 0".into()));
        }
        if page_id == HEADER_PAGE_ID {
            return Ok(Arc::clone(&self.header_page));
        }
        if use_cache
            && let Some(page) = self.cache.lock().get(&page_id)
        {
            return Ok(Arc::clone(page));
        }
        let bytes = self.disk.read_page(self.offset_of(page_id), self.page_size)?;
        let page = Arc::new(Page::from_bytes(bytes)?);
        if page.page_id() != page_id {
            return Err(Error::corrupted(format!(
                "page at slot {page_id} carries id {}",
                page.page_id()
            )));
        }
        if use_cache {
            self.insert_cached(page_id, Arc::clone(&page))?;
        }
        Ok(page)
    }

    pub async fn get_page_async(self: &Arc<Self>, page_id: u32, use_cache: bool) -> Result<Arc<Page>> {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || this.get_page(page_id, use_cache))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    fn insert_cached(&self, page_id: u32, page: Arc<Page>) -> Result<()> {
        let mut cache = self.cache.lock();
        cache.put(page_id, page);
        Self::evict_excess(&mut cache, self.max_cached);
        Ok(())
    }

    /// Evict least-recently-used pages beyond the bound. Pinned pages are
    /// never evicted; dirty pages are not either, since writing them to the
    /// data file before their journal record is durable would break the
    /// write-ahead contract.
    fn evict_excess(cache: &mut LruCache<u32, Arc<Page>>, max: usize) {
        while cache.len() > max {
            let victim = cache
                .iter()
                .rev()
                .find(|(_, p)| p.pin_count() == 0 && !p.is_dirty())
                .map(|(id, _)| *id);
            match victim {
                Some(id) => {
                    cache.pop(&id);
                }
                None => {
                    log::warn!(
                        "page cache over capacity ({} > {max}) with every page pinned or dirty",
                        cache.len()
                    );
                    break;
                }
            }
        }
    }

    /// Allocate a page: pop the free list head, else extend the file.
    pub fn new_page(&self, page_type: PageType) -> Result<Arc<Page>> {
        let _alloc = self.alloc.lock();
        let free_head = self.header.read().first_free_page_id;
        let page_id = if free_head != 0 {
            let freed = self.get_page(free_head, false)?;
            if freed.page_type()? != PageType::Empty {
                return Err(Error::corrupted(format!(
                    "free list head {free_head} is not an empty page"
                )));
            }
            let next = freed.next_page_id();
            self.update_header(|h| h.first_free_page_id = next)?;
            free_head
        } else {
            let mut id = 0;
            self.update_header(|h| {
                h.total_pages += 1;
                id = h.total_pages;
            })?;
            self.disk.set_length(u64::from(id) * self.page_size as u64)?;
            id
        };
        let page = Arc::new(Page::new(page_id, page_type, self.page_size));
        self.cache.lock().put(page_id, Arc::clone(&page));
        drop(_alloc);
        // Enforce the cache bound outside the allocation lock.
        self.shrink_cache()?;
        Ok(page)
    }

    fn shrink_cache(&self) -> Result<()> {
        let mut cache = self.cache.lock();
        Self::evict_excess(&mut cache, self.max_cached);
        Ok(())
    }

    /// Return a page to the free list: payload cleared, type `Empty`,
    /// relinked as the new head.
    pub fn free_page(&self, page_id: u32) -> Result<()> {
        if page_id <= HEADER_PAGE_ID {
            return Err(Error::InvalidArgument("cannot free the header page".into()));
        }
        let _alloc = self.alloc.lock();
        let page = self.get_page(page_id, true)?;
        page.reset(0);
        page.set_page_type(PageType::Empty);
        page.set_prev_page_id(0);
        let head = self.header.read().first_free_page_id;
        page.set_next_page_id(head);
        self.update_header(|h| h.first_free_page_id = page_id)?;
        Ok(())
    }

    /// Stamp an LSN and optionally write through to the data file.
    pub fn save_page(&self, page: &Arc<Page>, force_flush: bool) -> Result<()> {
        page.mark_dirty();
        page.set_lsn(self.next_lsn.fetch_add(1, Ordering::AcqRel));
        if force_flush {
            self.flush_page(page)?;
        }
        Ok(())
    }

    fn flush_page(&self, page: &Arc<Page>) -> Result<()> {
        page.update_checksum();
        page.with_bytes(|bytes| self.disk.write_page(self.offset_of(page.page_id()), bytes))?;
        page.mark_clean();
        Ok(())
    }

    pub fn has_dirty(&self) -> bool {
        self.header_page.is_dirty() || self.cache.lock().iter().any(|(_, p)| p.is_dirty())
    }

    /// Snapshot every dirty page (header first) for the journal.
    pub fn dirty_pages(&self) -> Vec<Arc<Page>> {
        let mut out = Vec::new();
        if self.header_page.is_dirty() {
            out.push(Arc::clone(&self.header_page));
        }
        for (_, page) in self.cache.lock().iter() {
            if page.is_dirty() {
                out.push(Arc::clone(page));
            }
        }
        out
    }

    /// Write every dirty page to the data file. Callers own the ordering
    /// contract: the journal must be durable first.
    pub fn flush_dirty(&self) -> Result<()> {
        {
            let header = self.header.read();
            header.store(&self.header_page)?;
        }
        if self.header_page.is_dirty() {
            self.flush_page(&self.header_page)?;
        }
        let dirty: Vec<Arc<Page>> = self
            .cache
            .lock()
            .iter()
            .filter(|(_, p)| p.is_dirty())
            .map(|(_, p)| Arc::clone(p))
            .collect();
        for page in dirty {
            self.flush_page(&page)?;
        }
        Ok(())
    }

    /// Drop cached pages. With `keep_pinned`, pages under a pin survive.
    pub fn clear_cache(&self, keep_pinned: bool) -> Result<()> {
        self.flush_dirty()?;
        let mut cache = self.cache.lock();
        if keep_pinned {
            let kept: Vec<(u32, Arc<Page>)> = cache
                .iter()
                .filter(|(_, p)| p.pin_count() > 0)
                .map(|(id, p)| (*id, Arc::clone(p)))
                .collect();
            cache.clear();
            for (id, p) in kept {
                cache.put(id, p);
            }
        } else {
            cache.clear();
        }
        Ok(())
    }

    /// WAL recovery hook: overwrite the page's bytes in the data file and
    /// invalidate any cached copy. Idempotent.
    pub fn restore_page(&self, page_id: u32, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.page_size {
            return Err(Error::corrupted(format!(
                "journal page image is {} bytes, page size is {}",
                bytes.len(),
                self.page_size
            )));
        }
        self.disk.write_page(self.offset_of(page_id), bytes)?;
        self.cache.lock().pop(&page_id);
        if page_id == HEADER_PAGE_ID {
            // Rebuild the in-memory header view from the restored image.
            let fresh = Page::from_bytes(bytes.to_vec())?;
            let header = DbHeader::load(&fresh)?;
            *self.header.write() = header.clone();
            header.store(&self.header_page)?;
            self.header_page.mark_clean();
        } else {
            // Keep total_pages consistent with any file growth from replay.
            let mut header = self.header.write();
            if page_id > header.total_pages {
                header.total_pages = page_id;
                header.store(&self.header_page)?;
            }
        }
        Ok(())
    }

    /// A zero free-list head with empty pages on disk means the chain was
    /// lost; rebuild it with a bounded scan.
    fn rebuild_free_list_if_needed(&self) -> Result<()> {
        let (head, total) = {
            let h = self.header.read();
            (h.first_free_page_id, h.total_pages)
        };
        if head != 0 || total <= 1 {
            return Ok(());
        }
        let mut empties = Vec::new();
        for id in 2..=total {
            let page = self.get_page(id, false)?;
            if page.page_type()? == PageType::Empty {
                empties.push((id, page));
            }
        }
        if empties.is_empty() {
            return Ok(());
        }
        log::warn!("free list head lost; relinking {} empty pages", empties.len());
        for i in 0..empties.len() {
            let next = empties.get(i + 1).map_or(0, |(id, _)| *id);
            empties[i].1.set_next_page_id(next);
            self.flush_page(&empties[i].1)?;
        }
        self.update_header(|h| h.first_free_page_id = empties[0].0)?;
        Ok(())
    }

    /// Page counts by type, for stats.
    pub fn page_census(&self) -> Result<std::collections::HashMap<&'static str, u32>> {
        let total = self.header.read().total_pages;
        let mut census = std::collections::HashMap::new();
        for id in 1..=total {
            // Through the cache: pages journaled but not yet written to the
            // data file only exist there.
            let page = self.get_page(id, true)?;
            let name = match page.page_type()? {
                PageType::Empty => "empty",
                PageType::Header => "header",
                PageType::Collection => "collection",
                PageType::Data => "data",
                PageType::Index => "index",
                PageType::Journal => "journal",
                PageType::LargeDocIndex => "large_doc_index",
                PageType::LargeDocData => "large_doc_data",
            };
            *census.entry(name).or_insert(0) += 1;
        }
        Ok(census)
    }

    pub fn cached_pages(&self) -> usize {
        self.cache.lock().len()
    }
}
