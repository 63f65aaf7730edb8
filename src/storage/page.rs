use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::RwLock;

use crate::errors::{Error, Result};

/// On-disk page header, little-endian, 49 bytes:
///
/// ```text
/// offset  size  field
///      0     1  page_type
///      1     4  page_id
///      5     4  prev_page_id
///      9     4  next_page_id
///     13     2  free_bytes
///     15     2  item_count
///     17     4  version
///     21     4  checksum
///     25     8  created_at_ticks (ms since Unix epoch)
///     33     8  modified_at_ticks
///     41     8  lsn
/// ```
pub const PAGE_HEADER_SIZE: usize = 49;

const OFF_TYPE: usize = 0;
const OFF_PAGE_ID: usize = 1;
const OFF_PREV: usize = 5;
const OFF_NEXT: usize = 9;
const OFF_FREE: usize = 13;
const OFF_ITEMS: usize = 15;
const OFF_VERSION: usize = 17;
const OFF_CHECKSUM: usize = 21;
const OFF_CREATED: usize = 25;
const OFF_MODIFIED: usize = 33;
const OFF_LSN: usize = 41;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    Empty = 0,
    Header = 1,
    Collection = 2,
    Data = 3,
    Index = 4,
    Journal = 5,
    LargeDocIndex = 6,
    LargeDocData = 7,
}

impl PageType {
    pub fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            0 => Self::Empty,
            1 => Self::Header,
            2 => Self::Collection,
            3 => Self::Data,
            4 => Self::Index,
            5 => Self::Journal,
            6 => Self::LargeDocIndex,
            7 => Self::LargeDocData,
            other => return Err(Error::corrupted(format!("unknown page type {other}"))),
        })
    }
}

/// A fixed-size page buffer. The header lives at the front of the buffer and
/// is read and written through typed accessors, so the bytes on disk are the
/// single source of truth. `pin_count` and the dirty bit are atomics shared
/// with the page cache.
pub struct Page {
    buf: RwLock<Vec<u8>>,
    dirty: AtomicBool,
    pins: AtomicU32,
}

impl Page {
    /// Fresh page of `size` bytes with a zeroed payload.
    pub fn new(page_id: u32, page_type: PageType, size: usize) -> Self {
        debug_assert!(size > PAGE_HEADER_SIZE);
        let mut buf = vec![0u8; size];
        buf[OFF_TYPE] = page_type as u8;
        buf[OFF_PAGE_ID..OFF_PAGE_ID + 4].copy_from_slice(&page_id.to_le_bytes());
        let free = (size - PAGE_HEADER_SIZE) as u16;
        buf[OFF_FREE..OFF_FREE + 2].copy_from_slice(&free.to_le_bytes());
        let now = now_ticks();
        buf[OFF_CREATED..OFF_CREATED + 8].copy_from_slice(&now.to_le_bytes());
        buf[OFF_MODIFIED..OFF_MODIFIED + 8].copy_from_slice(&now.to_le_bytes());
        Self { buf: RwLock::new(buf), dirty: AtomicBool::new(true), pins: AtomicU32::new(0) }
    }

    /// Wrap bytes loaded from disk. Header validity and checksum are checked.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() <= PAGE_HEADER_SIZE {
            return Err(Error::corrupted("page shorter than header"));
        }
        let page = Self {
            buf: RwLock::new(bytes),
            dirty: AtomicBool::new(false),
            pins: AtomicU32::new(0),
        };
        page.verify_integrity()?;
        Ok(page)
    }

    pub fn size(&self) -> usize {
        self.buf.read().len()
    }

    pub fn capacity(&self) -> usize {
        self.size() - PAGE_HEADER_SIZE
    }

    fn read_u16(&self, off: usize) -> u16 {
        let buf = self.buf.read();
        u16::from_le_bytes([buf[off], buf[off + 1]])
    }

    fn read_u32(&self, off: usize) -> u32 {
        let buf = self.buf.read();
        u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
    }

    fn read_u64(&self, off: usize) -> u64 {
        let buf = self.buf.read();
        u64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
    }

    fn write_u16(&self, off: usize, v: u16) {
        self.buf.write()[off..off + 2].copy_from_slice(&v.to_le_bytes());
        self.touch();
    }

    fn write_u32(&self, off: usize, v: u32) {
        self.buf.write()[off..off + 4].copy_from_slice(&v.to_le_bytes());
        self.touch();
    }

    pub fn page_type(&self) -> Result<PageType> {
        PageType::from_byte(self.buf.read()[OFF_TYPE])
    }

    pub fn set_page_type(&self, t: PageType) {
        self.buf.write()[OFF_TYPE] = t as u8;
        self.touch();
    }

    pub fn page_id(&self) -> u32 {
        self.read_u32(OFF_PAGE_ID)
    }

    pub fn prev_page_id(&self) -> u32 {
        self.read_u32(OFF_PREV)
    }

    pub fn set_prev_page_id(&self, id: u32) {
        self.write_u32(OFF_PREV, id);
    }

    pub fn next_page_id(&self) -> u32 {
        self.read_u32(OFF_NEXT)
    }

    pub fn set_next_page_id(&self, id: u32) {
        self.write_u32(OFF_NEXT, id);
    }

    pub fn free_bytes(&self) -> u16 {
        self.read_u16(OFF_FREE)
    }

    pub fn item_count(&self) -> u16 {
        self.read_u16(OFF_ITEMS)
    }

    pub fn version(&self) -> u32 {
        self.read_u32(OFF_VERSION)
    }

    pub fn set_version(&self, v: u32) {
        self.write_u32(OFF_VERSION, v);
    }

    pub fn lsn(&self) -> u64 {
        self.read_u64(OFF_LSN)
    }

    /// LSNs never move backwards on a page.
    pub fn set_lsn(&self, lsn: u64) {
        if lsn > self.lsn() {
            self.buf.write()[OFF_LSN..OFF_LSN + 8].copy_from_slice(&lsn.to_le_bytes());
        }
    }

    /// Next unused payload offset, derived from `free_bytes`.
    fn write_offset(&self) -> usize {
        PAGE_HEADER_SIZE + (self.capacity() - self.free_bytes() as usize)
    }

    /// Append a length-prefixed item into the next free slot. Returns the
    /// payload offset (past the length prefix) of the stored content.
    pub fn append(&self, content: &[u8]) -> Result<usize> {
        let needed = 4 + content.len();
        if (self.free_bytes() as usize) < needed {
            return Err(Error::InvalidArgument(format!(
                "page {} full: {} bytes free, {} needed",
                self.page_id(),
                self.free_bytes(),
                needed
            )));
        }
        let at = self.write_offset();
        {
            let mut buf = self.buf.write();
            buf[at..at + 4].copy_from_slice(&(content.len() as u32).to_le_bytes());
            buf[at + 4..at + 4 + content.len()].copy_from_slice(content);
        }
        self.write_u16(OFF_FREE, self.free_bytes() - needed as u16);
        self.write_u16(OFF_ITEMS, self.item_count() + 1);
        self.touch();
        Ok(at + 4)
    }

    /// Zero the payload and reset the slot bookkeeping, keeping `reserved`
    /// bytes at the front of the payload out of the free budget.
    pub fn reset(&self, reserved: usize) {
        {
            let mut buf = self.buf.write();
            let len = buf.len();
            buf[PAGE_HEADER_SIZE..len].fill(0);
        }
        self.write_u16(OFF_ITEMS, 0);
        self.write_u16(OFF_FREE, (self.capacity() - reserved) as u16);
        self.touch();
    }

    /// Replace the payload with a single item.
    pub fn set_content(&self, content: &[u8]) -> Result<()> {
        self.reset(0);
        self.append(content)?;
        Ok(())
    }

    /// Raw payload read; `offset` is relative to the payload start.
    pub fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let buf = self.buf.read();
        let start = PAGE_HEADER_SIZE + offset;
        if start + len > buf.len() {
            return Err(Error::corrupted(format!(
                "read past end of page {} ({offset}+{len})",
                self.page_id()
            )));
        }
        Ok(buf[start..start + len].to_vec())
    }

    /// Raw payload write; `offset` is relative to the payload start.
    pub fn write_data(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        let start = PAGE_HEADER_SIZE + offset;
        {
            let mut buf = self.buf.write();
            if start + bytes.len() > buf.len() {
                return Err(Error::InvalidArgument(format!(
                    "write past end of page {} ({offset}+{})",
                    self.page_id(),
                    bytes.len()
                )));
            }
            buf[start..start + bytes.len()].copy_from_slice(bytes);
        }
        self.touch();
        Ok(())
    }

    /// Run `f` over the whole page image without copying it out.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.buf.read())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.buf.read().clone()
    }

    /// Additive checksum over the page with the checksum field zeroed.
    fn compute_checksum(buf: &[u8]) -> u32 {
        let mut sum: u32 = 0;
        for (i, b) in buf.iter().enumerate() {
            if (OFF_CHECKSUM..OFF_CHECKSUM + 4).contains(&i) {
                continue;
            }
            sum = sum.wrapping_add(u32::from(*b));
        }
        sum
    }

    pub fn update_checksum(&self) {
        let mut buf = self.buf.write();
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].fill(0);
        let sum = Self::compute_checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&sum.to_le_bytes());
    }

    pub fn verify_integrity(&self) -> Result<()> {
        let buf = self.buf.read();
        PageType::from_byte(buf[OFF_TYPE])?;
        let page_id = u32::from_le_bytes(buf[OFF_PAGE_ID..OFF_PAGE_ID + 4].try_into().unwrap());
        if page_id == 0 {
            return Err(Error::corrupted("page_id must be >= 1"));
        }
        let free = u16::from_le_bytes([buf[OFF_FREE], buf[OFF_FREE + 1]]) as usize;
        if free > buf.len() - PAGE_HEADER_SIZE {
            return Err(Error::corrupted(format!("page {page_id}: free_bytes exceeds capacity")));
        }
        let stored = u32::from_le_bytes(buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].try_into().unwrap());
        let computed = Self::compute_checksum(&buf);
        if stored != computed {
            return Err(Error::corrupted(format!(
                "page {page_id}: checksum mismatch (stored {stored:#010x}, computed {computed:#010x})"
            )));
        }
        Ok(())
    }

    fn touch(&self) {
        self.dirty.store(true, Ordering::Release);
        let now = now_ticks();
        self.buf.write()[OFF_MODIFIED..OFF_MODIFIED + 8].copy_from_slice(&now.to_le_bytes());
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_clean(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn pin(&self) {
        self.pins.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unpin(&self) {
        let prev = self.pins.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin without matching pin");
    }

    pub fn pin_count(&self) -> u32 {
        self.pins.load(Ordering::Acquire)
    }
}

fn now_ticks() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_tracks_free_bytes_and_items() {
        let p = Page::new(7, PageType::Data, 256);
        let cap = p.capacity() as u16;
        p.append(b"abc").unwrap();
        assert_eq!(p.free_bytes(), cap - 7);
        assert_eq!(p.item_count(), 1);
        p.append(b"defgh").unwrap();
        assert_eq!(p.item_count(), 2);
    }

    #[test]
    fn append_fails_when_full() {
        let p = Page::new(1, PageType::Data, 64);
        let big = vec![0u8; 64];
        assert!(p.append(&big).is_err());
    }

    #[test]
    fn checksum_roundtrip() {
        let p = Page::new(3, PageType::Data, 128);
        p.append(b"payload").unwrap();
        p.update_checksum();
        let bytes = p.to_bytes();
        let reloaded = Page::from_bytes(bytes).unwrap();
        assert_eq!(reloaded.page_id(), 3);
        assert_eq!(reloaded.item_count(), 1);
    }

    #[test]
    fn corrupt_byte_fails_verification() {
        let p = Page::new(3, PageType::Data, 128);
        p.append(b"payload").unwrap();
        p.update_checksum();
        let mut bytes = p.to_bytes();
        bytes[80] ^= 0xFF;
        assert!(Page::from_bytes(bytes).is_err());
    }

    #[test]
    fn set_content_replaces_payload() {
        let p = Page::new(9, PageType::Collection, 256);
        p.append(b"one").unwrap();
        p.append(b"two").unwrap();
        p.set_content(b"only").unwrap();
        assert_eq!(p.item_count(), 1);
        assert_eq!(p.read_bytes(4, 4).unwrap(), b"only");
    }

    #[test]
    fn lsn_never_decreases() {
        let p = Page::new(4, PageType::Data, 128);
        p.set_lsn(10);
        p.set_lsn(5);
        assert_eq!(p.lsn(), 10);
    }
}
