use crate::errors::{Error, Result};
use crate::storage::page::{Page, PageType};

pub const MAGIC: [u8; 8] = *b"TinyDb01";
pub const FORMAT_VERSION: u32 = 1;

/// Database header page id. Page ids start at 1; page 1 sits at file offset 0.
pub const HEADER_PAGE_ID: u32 = 1;

const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 8;
const OFF_PAGE_SIZE: usize = 12;
const OFF_TOTAL_PAGES: usize = 16;
const OFF_FREE_HEAD: usize = 20;
const OFF_CATALOG_ROOT: usize = 24;
const OFF_SALT: usize = 28;
const OFF_KEY_HASH: usize = 44;
const OFF_PROTECTED: usize = 76;
const HEADER_PAYLOAD_LEN: usize = 77;

/// Opaque password-protection record stored in the header's fixed slot.
/// The storage core never interprets it beyond the presence flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityMetadata {
    pub salt: [u8; 16],
    pub key_hash: [u8; 32],
}

/// In-memory view of the database header (page 1). Mutations go back to the
/// page through [`DbHeader::store`].
#[derive(Debug, Clone)]
pub struct DbHeader {
    pub page_size: u32,
    pub total_pages: u32,
    pub first_free_page_id: u32,
    pub catalog_root: u32,
    pub security: Option<SecurityMetadata>,
}

impl DbHeader {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            total_pages: 1,
            first_free_page_id: 0,
            catalog_root: 0,
            security: None,
        }
    }

    pub fn load(page: &Page) -> Result<Self> {
        if page.page_type()? != PageType::Header {
            return Err(Error::corrupted("page 1 is not a header page"));
        }
        let payload = page.read_bytes(0, HEADER_PAYLOAD_LEN)?;
        if payload[OFF_MAGIC..OFF_MAGIC + 8] != MAGIC {
            return Err(Error::corrupted("bad magic"));
        }
        let version = read_u32(&payload, OFF_VERSION);
        if version != FORMAT_VERSION {
            return Err(Error::corrupted(format!("unsupported format version {version}")));
        }
        let page_size = read_u32(&payload, OFF_PAGE_SIZE);
        if page_size as usize != page.size() {
            return Err(Error::corrupted(format!(
                "header page_size {page_size} disagrees with page buffer {}",
                page.size()
            )));
        }
        let total_pages = read_u32(&payload, OFF_TOTAL_PAGES);
        if total_pages == 0 {
            return Err(Error::corrupted("total_pages must be >= 1"));
        }
        let security = if payload[OFF_PROTECTED] != 0 {
            let mut salt = [0u8; 16];
            salt.copy_from_slice(&payload[OFF_SALT..OFF_SALT + 16]);
            let mut key_hash = [0u8; 32];
            key_hash.copy_from_slice(&payload[OFF_KEY_HASH..OFF_KEY_HASH + 32]);
            Some(SecurityMetadata { salt, key_hash })
        } else {
            None
        };
        Ok(Self {
            page_size,
            total_pages,
            first_free_page_id: read_u32(&payload, OFF_FREE_HEAD),
            catalog_root: read_u32(&payload, OFF_CATALOG_ROOT),
            security,
        })
    }

    pub fn store(&self, page: &Page) -> Result<()> {
        let mut payload = vec![0u8; HEADER_PAYLOAD_LEN];
        payload[OFF_MAGIC..OFF_MAGIC + 8].copy_from_slice(&MAGIC);
        payload[OFF_VERSION..OFF_VERSION + 4].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        payload[OFF_PAGE_SIZE..OFF_PAGE_SIZE + 4].copy_from_slice(&self.page_size.to_le_bytes());
        payload[OFF_TOTAL_PAGES..OFF_TOTAL_PAGES + 4]
            .copy_from_slice(&self.total_pages.to_le_bytes());
        payload[OFF_FREE_HEAD..OFF_FREE_HEAD + 4]
            .copy_from_slice(&self.first_free_page_id.to_le_bytes());
        payload[OFF_CATALOG_ROOT..OFF_CATALOG_ROOT + 4]
            .copy_from_slice(&self.catalog_root.to_le_bytes());
        if let Some(sec) = &self.security {
            payload[OFF_SALT..OFF_SALT + 16].copy_from_slice(&sec.salt);
            payload[OFF_KEY_HASH..OFF_KEY_HASH + 32].copy_from_slice(&sec.key_hash);
            payload[OFF_PROTECTED] = 1;
        }
        page.write_data(0, &payload)?;
        Ok(())
    }
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let page = Page::new(HEADER_PAGE_ID, PageType::Header, 512);
        let mut hdr = DbHeader::new(512);
        hdr.total_pages = 9;
        hdr.first_free_page_id = 4;
        hdr.catalog_root = 2;
        hdr.security = Some(SecurityMetadata { salt: [7; 16], key_hash: [9; 32] });
        hdr.store(&page).unwrap();
        let loaded = DbHeader::load(&page).unwrap();
        assert_eq!(loaded.total_pages, 9);
        assert_eq!(loaded.first_free_page_id, 4);
        assert_eq!(loaded.catalog_root, 2);
        assert_eq!(loaded.security.unwrap().salt, [7; 16]);
    }

    #[test]
    fn bad_magic_is_corruption() {
        let page = Page::new(HEADER_PAGE_ID, PageType::Header, 512);
        page.write_data(0, b"notmagic").unwrap();
        assert!(matches!(DbHeader::load(&page), Err(Error::Corrupted(_))));
    }
}
