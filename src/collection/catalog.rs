use crate::errors::{Error, Result};
use crate::index::store::IndexDescriptor;
use crate::storage::page::PageType;
use crate::storage::pager::PageManager;

/// One catalog record: everything the engine needs to reopen a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRecord {
    pub name: String,
    pub head_page: u32,
    pub tail_page: u32,
    pub doc_count: u64,
    pub indexes: Vec<IndexDescriptor>,
}

fn push_str(out: &mut Vec<u8>, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    let len = u16::try_from(bytes.len())
        .map_err(|_| Error::InvalidArgument(format!("name too long: {s:.32}…")))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

fn read_str(bytes: &[u8], pos: &mut usize) -> Result<String> {
    let len = u16::from_le_bytes(
        bytes
            .get(*pos..*pos + 2)
            .ok_or_else(|| Error::corrupted("truncated catalog string"))?
            .try_into()
            .unwrap(),
    ) as usize;
    *pos += 2;
    let raw = bytes
        .get(*pos..*pos + len)
        .ok_or_else(|| Error::corrupted("truncated catalog string"))?;
    *pos += len;
    String::from_utf8(raw.to_vec()).map_err(|_| Error::corrupted("catalog string is not UTF-8"))
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    let raw = bytes
        .get(*pos..*pos + 4)
        .ok_or_else(|| Error::corrupted("truncated catalog record"))?;
    *pos += 4;
    Ok(u32::from_le_bytes(raw.try_into().unwrap()))
}

fn read_u64(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let raw = bytes
        .get(*pos..*pos + 8)
        .ok_or_else(|| Error::corrupted("truncated catalog record"))?;
    *pos += 8;
    Ok(u64::from_le_bytes(raw.try_into().unwrap()))
}

impl CollectionRecord {
    fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        push_str(&mut out, &self.name)?;
        out.extend_from_slice(&self.head_page.to_le_bytes());
        out.extend_from_slice(&self.tail_page.to_le_bytes());
        out.extend_from_slice(&self.doc_count.to_le_bytes());
        out.extend_from_slice(
            &u16::try_from(self.indexes.len())
                .map_err(|_| Error::InvalidArgument("too many indexes".into()))?
                .to_le_bytes(),
        );
        for ix in &self.indexes {
            push_str(&mut out, &ix.name)?;
            out.extend_from_slice(
                &u16::try_from(ix.fields.len())
                    .map_err(|_| Error::InvalidArgument("too many index fields".into()))?
                    .to_le_bytes(),
            );
            for f in &ix.fields {
                push_str(&mut out, f)?;
            }
            out.push(u8::from(ix.unique));
            out.extend_from_slice(&ix.root_page.to_le_bytes());
            out.extend_from_slice(&ix.entry_count.to_le_bytes());
        }
        Ok(out)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let name = read_str(bytes, &mut pos)?;
        let head_page = read_u32(bytes, &mut pos)?;
        let tail_page = read_u32(bytes, &mut pos)?;
        let doc_count = read_u64(bytes, &mut pos)?;
        let index_count = u16::from_le_bytes(
            bytes
                .get(pos..pos + 2)
                .ok_or_else(|| Error::corrupted("truncated catalog record"))?
                .try_into()
                .unwrap(),
        );
        pos += 2;
        let mut indexes = Vec::with_capacity(index_count as usize);
        for _ in 0..index_count {
            let ix_name = read_str(bytes, &mut pos)?;
            let field_count = u16::from_le_bytes(
                bytes
                    .get(pos..pos + 2)
                    .ok_or_else(|| Error::corrupted("truncated catalog record"))?
                    .try_into()
                    .unwrap(),
            );
            pos += 2;
            let mut fields = Vec::with_capacity(field_count as usize);
            for _ in 0..field_count {
                fields.push(read_str(bytes, &mut pos)?);
            }
            let unique = *bytes
                .get(pos)
                .ok_or_else(|| Error::corrupted("truncated catalog record"))?
                != 0;
            pos += 1;
            let root_page = read_u32(bytes, &mut pos)?;
            let entry_count = read_u64(bytes, &mut pos)?;
            indexes.push(IndexDescriptor {
                name: ix_name,
                fields,
                unique,
                root_page,
                entry_count,
            });
        }
        Ok(Self { name, head_page, tail_page, doc_count, indexes })
    }
}

/// Load every collection record from the Collection page chain rooted in the
/// database header.
pub fn load(pager: &PageManager) -> Result<Vec<CollectionRecord>> {
    let mut records = Vec::new();
    let mut next = pager.header().catalog_root;
    while next != 0 {
        let page = pager.get_page(next, true)?;
        if page.page_type()? != PageType::Collection {
            return Err(Error::corrupted(format!("page {next} is not a catalog page")));
        }
        let mut offset = 0usize;
        for _ in 0..page.item_count() {
            let len = u32::from_le_bytes(page.read_bytes(offset, 4)?.try_into().unwrap()) as usize;
            let body = page.read_bytes(offset + 4, len)?;
            offset += 4 + len;
            records.push(CollectionRecord::decode(&body)?);
        }
        next = page.next_page_id();
    }
    Ok(records)
}

/// Rewrite the catalog chain from `records`, reusing existing pages,
/// allocating more when the catalog grows and freeing surplus pages.
pub fn save(pager: &PageManager, records: &[CollectionRecord]) -> Result<()> {
    let mut chain = Vec::new();
    let mut next = pager.header().catalog_root;
    while next != 0 {
        let page = pager.get_page(next, true)?;
        chain.push(next);
        next = page.next_page_id();
    }

    let mut pos = 0usize;
    let mut current = take_page(pager, &mut chain, &mut pos)?;
    for record in records {
        let body = record.encode()?;
        if body.len() + 4 > current.capacity() {
            return Err(Error::InvalidArgument(format!(
                "catalog record for '{}' exceeds page capacity",
                record.name
            )));
        }
        if (current.free_bytes() as usize) < body.len() + 4 {
            let fresh = take_page(pager, &mut chain, &mut pos)?;
            current.set_next_page_id(fresh.page_id());
            pager.save_page(&current, false)?;
            current = fresh;
        }
        current.append(&body)?;
    }
    current.set_next_page_id(0);
    pager.save_page(&current, false)?;
    for id in chain.drain(pos..) {
        pager.free_page(id)?;
    }
    Ok(())
}

fn take_page(
    pager: &PageManager,
    chain: &mut Vec<u32>,
    pos: &mut usize,
) -> Result<std::sync::Arc<crate::storage::page::Page>> {
    let page = if let Some(&id) = chain.get(*pos) {
        let page = pager.get_page(id, true)?;
        page.reset(0);
        page.set_page_type(PageType::Collection);
        page
    } else {
        let page = pager.new_page(PageType::Collection)?;
        chain.push(page.page_id());
        page
    };
    if *pos == 0 {
        pager.update_header(|h| h.catalog_root = page.page_id())?;
    }
    *pos += 1;
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::DiskStream;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn record(name: &str) -> CollectionRecord {
        CollectionRecord {
            name: name.to_string(),
            head_page: 5,
            tail_page: 6,
            doc_count: 42,
            indexes: vec![IndexDescriptor {
                name: "_id_".into(),
                fields: vec!["_id".into()],
                unique: true,
                root_page: 9,
                entry_count: 42,
            }],
        }
    }

    #[test]
    fn catalog_roundtrip() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskStream::open(&dir.path().join("t.db")).unwrap());
        let pager = PageManager::open(disk, 512, 64).unwrap();
        let records = vec![record("users"), record("orders")];
        save(&pager, &records).unwrap();
        assert_ne!(pager.header().catalog_root, 0);
        let loaded = load(&pager).unwrap();
        assert_eq!(loaded, records);
    }

    #[test]
    fn catalog_grows_across_pages() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskStream::open(&dir.path().join("t.db")).unwrap());
        let pager = PageManager::open(disk, 512, 64).unwrap();
        let records: Vec<CollectionRecord> =
            (0..20).map(|i| record(&format!("collection_number_{i}"))).collect();
        save(&pager, &records).unwrap();
        let loaded = load(&pager).unwrap();
        assert_eq!(loaded.len(), 20);
        assert_eq!(loaded, records);
    }
}
