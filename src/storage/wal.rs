use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::errors::Result;

const REC_PAGE_PUT: u8 = 1;
const REC_HEADER_LEN: usize = 1 + 4 + 4 + 4;

/// Append-only write-ahead log of full page images.
///
/// Record layout: `type(1) | page_id(4) | length(4) | crc32(4) | bytes`.
/// There is no file header; replay scans from offset zero and truncates the
/// file to the end of the last record whose CRC matches.
pub struct Wal {
    inner: Mutex<File>,
    path: PathBuf,
}

impl Wal {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;
        Ok(Self { inner: Mutex::new(file), path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.inner.lock().metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Append a `PagePut` record for a page snapshot. No fsync; durability is
    /// the flush scheduler's business.
    pub fn append_page(&self, page_id: u32, bytes: &[u8]) -> Result<()> {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(bytes);
        let crc = hasher.finalize();

        let mut record = Vec::with_capacity(REC_HEADER_LEN + bytes.len());
        record.push(REC_PAGE_PUT);
        record.extend_from_slice(&page_id.to_le_bytes());
        record.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        record.extend_from_slice(&crc.to_le_bytes());
        record.extend_from_slice(bytes);

        let mut file = self.inner.lock();
        file.seek(SeekFrom::End(0))?;
        file.write_all(&record)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.inner.lock().sync_data()?;
        Ok(())
    }

    /// Replay every valid record in order through `apply`, then truncate the
    /// file to the last good record. Trailing garbage (bad type, implausible
    /// length, incomplete tail, CRC mismatch) is dropped silently apart from
    /// a warning; a torn final record is the expected crash artifact.
    pub fn replay(
        &self,
        page_size: usize,
        mut apply: impl FnMut(u32, &[u8]) -> Result<()>,
    ) -> Result<usize> {
        let mut file = self.inner.lock();
        file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut offset = 0usize;
        let mut good_end = 0usize;
        let mut applied = 0usize;
        while offset + REC_HEADER_LEN <= buf.len() {
            if buf[offset] != REC_PAGE_PUT {
                break;
            }
            let page_id = u32::from_le_bytes(buf[offset + 1..offset + 5].try_into().unwrap());
            let len = u32::from_le_bytes(buf[offset + 5..offset + 9].try_into().unwrap()) as usize;
            let crc = u32::from_le_bytes(buf[offset + 9..offset + 13].try_into().unwrap());
            if len != page_size || page_id == 0 {
                break;
            }
            let body_start = offset + REC_HEADER_LEN;
            let Some(body_end) = body_start.checked_add(len) else { break };
            if body_end > buf.len() {
                break;
            }
            let body = &buf[body_start..body_end];
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(body);
            if hasher.finalize() != crc {
                break;
            }
            apply(page_id, body)?;
            log::debug!("wal replay: restored page {page_id}");
            applied += 1;
            offset = body_end;
            good_end = body_end;
        }
        if good_end < buf.len() {
            log::warn!(
                "wal: truncating {} trailing bytes after {} valid records",
                buf.len() - good_end,
                applied
            );
            file.set_len(good_end as u64)?;
            file.sync_data()?;
        }
        Ok(applied)
    }

    /// Drop every record. Only call after the data file is durable; that
    /// ordering is the recovery contract.
    pub fn truncate(&self) -> Result<()> {
        let file = self.inner.lock();
        file.set_len(0)?;
        file.sync_data()?;
        Ok(())
    }
}
