use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::errors::Result;

/// Positional block I/O over an exclusively owned file handle.
///
/// Every call takes the inner mutex so a seek+read or seek+write pair is
/// atomic with respect to other callers. Byte-range locks are process
/// internal: an ordered list of half-open intervals, blocking on overlap.
pub struct DiskStream {
    file: Mutex<File>,
    path: PathBuf,
    regions: Mutex<Vec<(u64, u64)>>,
    region_freed: Condvar,
}

/// Handle returned by [`DiskStream::lock_region`]; pass it back to
/// [`DiskStream::unlock_region`] to release the range.
#[derive(Debug)]
pub struct RegionLock {
    offset: u64,
    len: u64,
}

impl DiskStream {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            regions: Mutex::new(Vec::new()),
            region_freed: Condvar::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    pub fn set_length(&self, n: u64) -> Result<()> {
        self.file.lock().set_len(n)?;
        Ok(())
    }

    pub fn read_page(&self, offset: u64, size: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; size];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn write_page(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut file = self.file.lock();
        let end = offset + bytes.len() as u64;
        if file.metadata()?.len() < end {
            file.set_len(end)?;
        }
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        Ok(())
    }

    pub fn flush(&self, fsync: bool) -> Result<()> {
        let mut file = self.file.lock();
        file.flush()?;
        if fsync {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Block until no held region overlaps `[offset, offset+len)`, then
    /// record the interval as held.
    pub fn lock_region(&self, offset: u64, len: u64) -> RegionLock {
        let mut regions = self.regions.lock();
        while regions.iter().any(|&(o, l)| offset < o + l && o < offset + len) {
            self.region_freed.wait(&mut regions);
        }
        let at = regions.partition_point(|&(o, _)| o < offset);
        regions.insert(at, (offset, len));
        RegionLock { offset, len }
    }

    pub fn unlock_region(&self, handle: RegionLock) {
        let mut regions = self.regions.lock();
        if let Some(i) = regions.iter().position(|&r| r == (handle.offset, handle.len)) {
            regions.remove(i);
        }
        self.region_freed.notify_all();
    }

    pub async fn read_page_async(self: &Arc<Self>, offset: u64, size: usize) -> Result<Vec<u8>> {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || this.read_page(offset, size))
            .await
            .map_err(|e| std::io::Error::other(e))?
    }

    pub async fn write_page_async(self: &Arc<Self>, offset: u64, bytes: Vec<u8>) -> Result<()> {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || this.write_page(offset, &bytes))
            .await
            .map_err(|e| std::io::Error::other(e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn positional_roundtrip() {
        let dir = tempdir().unwrap();
        let disk = DiskStream::open(&dir.path().join("t.db")).unwrap();
        disk.write_page(4096, b"hello").unwrap();
        assert_eq!(disk.read_page(4096, 5).unwrap(), b"hello");
        assert_eq!(disk.len().unwrap(), 4101);
    }

    #[tokio::test]
    async fn async_positional_roundtrip() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskStream::open(&dir.path().join("t.db")).unwrap());
        disk.write_page_async(128, b"abc".to_vec()).await.unwrap();
        assert_eq!(disk.read_page_async(128, 3).await.unwrap(), b"abc");
    }

    #[test]
    fn region_locks_block_overlap() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskStream::open(&dir.path().join("t.db")).unwrap());
        let held = disk.lock_region(0, 100);
        let other = Arc::clone(&disk);
        let t = std::thread::spawn(move || {
            let h = other.lock_region(50, 10);
            other.unlock_region(h);
        });
        // Non-overlapping region is granted immediately.
        let free = disk.lock_region(200, 10);
        disk.unlock_region(free);
        disk.unlock_region(held);
        t.join().unwrap();
    }
}
