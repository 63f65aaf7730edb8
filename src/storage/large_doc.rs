use crate::errors::{Error, Result};
use crate::storage::page::{PAGE_HEADER_SIZE, PageType};
use crate::storage::pager::PageManager;

const SENTINEL: i32 = -1;
const INDEX_FIXED_LEN: usize = 4 + 4 + 4 + 4 + 2;
const DATA_PREFIX_LEN: usize = 4 + 4 + 4;

/// Pointer to a large document chain, stored in place of the document bytes
/// on a regular data page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LargeDocRef {
    pub index_page_id: u32,
    pub total_len: u32,
}

impl LargeDocRef {
    pub fn to_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.index_page_id.to_le_bytes());
        out[4..].copy_from_slice(&self.total_len.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 8 {
            return Err(Error::corrupted("large document pointer must be 8 bytes"));
        }
        Ok(Self {
            index_page_id: u32::from_le_bytes(bytes[..4].try_into().unwrap()),
            total_len: u32::from_le_bytes(bytes[4..].try_into().unwrap()),
        })
    }
}

/// Payload bytes each chained data page can carry.
pub fn chunk_capacity(page_size: usize) -> usize {
    page_size - PAGE_HEADER_SIZE - DATA_PREFIX_LEN
}

/// Store `bytes` as an index page plus a chain of data pages.
pub fn store(pager: &PageManager, collection: &str, bytes: &[u8]) -> Result<LargeDocRef> {
    let chunk = chunk_capacity(pager.page_size());
    let page_count = bytes.len().div_ceil(chunk).max(1);

    // Build the chain front to back so each page can point at its successor.
    let mut data_ids = Vec::with_capacity(page_count);
    for _ in 0..page_count {
        data_ids.push(pager.new_page(PageType::LargeDocData)?);
    }
    for (i, page) in data_ids.iter().enumerate() {
        let start = i * chunk;
        let end = (start + chunk).min(bytes.len());
        let piece = &bytes[start..end];
        let next = data_ids.get(i + 1).map_or(0, |p| p.page_id());
        let mut payload = Vec::with_capacity(DATA_PREFIX_LEN + piece.len());
        payload.extend_from_slice(&(i as i32).to_le_bytes());
        payload.extend_from_slice(&next.to_le_bytes());
        payload.extend_from_slice(&(piece.len() as i32).to_le_bytes());
        payload.extend_from_slice(piece);
        page.write_data(0, &payload)?;
        pager.save_page(page, false)?;
    }

    let index = pager.new_page(PageType::LargeDocIndex)?;
    let name = collection.as_bytes();
    let mut payload = Vec::with_capacity(INDEX_FIXED_LEN + name.len());
    payload.extend_from_slice(&SENTINEL.to_le_bytes());
    payload.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
    payload.extend_from_slice(&(page_count as i32).to_le_bytes());
    payload.extend_from_slice(&data_ids[0].page_id().to_le_bytes());
    payload.extend_from_slice(&(name.len() as u16).to_le_bytes());
    payload.extend_from_slice(name);
    index.write_data(0, &payload)?;
    pager.save_page(&index, false)?;

    Ok(LargeDocRef { index_page_id: index.page_id(), total_len: bytes.len() as u32 })
}

struct IndexInfo {
    total_len: usize,
    page_count: usize,
    first_data_page: u32,
}

fn read_index(pager: &PageManager, index_page_id: u32) -> Result<IndexInfo> {
    let index = pager.get_page(index_page_id, true)?;
    if index.page_type()? != PageType::LargeDocIndex {
        return Err(Error::corrupted(format!(
            "page {index_page_id} is not a large-document index page"
        )));
    }
    let fixed = index.read_bytes(0, INDEX_FIXED_LEN)?;
    let sentinel = i32::from_le_bytes(fixed[0..4].try_into().unwrap());
    if sentinel != SENTINEL {
        return Err(Error::corrupted(format!(
            "large-document index page {index_page_id}: bad sentinel {sentinel}"
        )));
    }
    let total_len = i32::from_le_bytes(fixed[4..8].try_into().unwrap());
    let page_count = i32::from_le_bytes(fixed[8..12].try_into().unwrap());
    if total_len < 0 || page_count <= 0 {
        return Err(Error::corrupted("large-document index page: negative lengths"));
    }
    Ok(IndexInfo {
        total_len: total_len as usize,
        page_count: page_count as usize,
        first_data_page: u32::from_le_bytes(fixed[12..16].try_into().unwrap()),
    })
}

/// Reassemble the original bytes from a chain.
pub fn read(pager: &PageManager, index_page_id: u32) -> Result<Vec<u8>> {
    let info = read_index(pager, index_page_id)?;
    let mut out = Vec::with_capacity(info.total_len);
    let mut next = info.first_data_page;
    let mut position = 0usize;
    while next != 0 {
        if position >= info.page_count {
            return Err(Error::corrupted(format!(
                "large-document chain at {index_page_id} longer than its page_count"
            )));
        }
        let page = pager.get_page(next, true)?;
        if page.page_type()? != PageType::LargeDocData {
            return Err(Error::corrupted(format!("page {next} is not a large-document data page")));
        }
        let prefix = page.read_bytes(0, DATA_PREFIX_LEN)?;
        let page_number = i32::from_le_bytes(prefix[0..4].try_into().unwrap());
        if page_number != position as i32 {
            return Err(Error::corrupted(format!(
                "large-document chain at {index_page_id}: page {next} claims position {page_number}, expected {position}"
            )));
        }
        let chunk_len = i32::from_le_bytes(prefix[8..12].try_into().unwrap());
        if chunk_len < 0 || chunk_len as usize > chunk_capacity(pager.page_size()) {
            return Err(Error::corrupted("large-document chunk length out of range"));
        }
        out.extend_from_slice(&page.read_bytes(DATA_PREFIX_LEN, chunk_len as usize)?);
        next = u32::from_le_bytes(prefix[4..8].try_into().unwrap());
        position += 1;
    }
    if position != info.page_count {
        return Err(Error::corrupted(format!(
            "large-document chain at {index_page_id} has {position} pages, expected {}",
            info.page_count
        )));
    }
    if out.len() != info.total_len {
        return Err(Error::corrupted(format!(
            "large-document chain at {index_page_id} reassembled {} bytes, expected {}",
            out.len(),
            info.total_len
        )));
    }
    Ok(out)
}

/// Free every data page in the chain, then the index page.
pub fn delete(pager: &PageManager, index_page_id: u32) -> Result<()> {
    let info = read_index(pager, index_page_id)?;
    let mut next = info.first_data_page;
    let mut freed = 0usize;
    while next != 0 && freed <= info.page_count {
        let page = pager.get_page(next, true)?;
        let prefix = page.read_bytes(0, DATA_PREFIX_LEN)?;
        let following = u32::from_le_bytes(prefix[4..8].try_into().unwrap());
        pager.free_page(next)?;
        next = following;
        freed += 1;
    }
    pager.free_page(index_page_id)?;
    Ok(())
}
