use std::sync::Arc;
use std::time::Duration;

use crate::engine::CredentialScheme;
use crate::errors::{Error, Result};
use crate::storage::page::PAGE_HEADER_SIZE;

/// Durability level applied when a batch of pages is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteConcern {
    /// Pages are written to the journal without any fsync.
    None,
    /// The journal is fsynced before the commit returns; fsyncs from
    /// concurrent committers are coalesced by the flush scheduler.
    #[default]
    Journaled,
    /// The journal is fsynced, dirty pages are written to the data file,
    /// the data file is fsynced and the journal is truncated.
    Synced,
}

pub const DEFAULT_PAGE_SIZE: u32 = 8192;
pub const DEFAULT_CACHE_SIZE: usize = 1000;
pub const MIN_PAGE_SIZE: u32 = 256;
pub const DEFAULT_WAL_NAME_FORMAT: &str = "{name}-wal.{ext}";

/// Options accepted by [`crate::Engine::open`].
///
/// `page_size` is fixed at database creation; opening an existing file keeps
/// the stored page size regardless of this option.
#[derive(Clone)]
pub struct EngineOptions {
    pub password: Option<String>,
    pub page_size: u32,
    pub cache_size: usize,
    pub enable_journaling: bool,
    pub write_concern: WriteConcern,
    pub timeout: Option<Duration>,
    pub wal_name_format: String,
    pub credential_scheme: Option<Arc<dyn CredentialScheme>>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            password: None,
            page_size: DEFAULT_PAGE_SIZE,
            cache_size: DEFAULT_CACHE_SIZE,
            enable_journaling: true,
            write_concern: WriteConcern::Journaled,
            timeout: None,
            wal_name_format: DEFAULT_WAL_NAME_FORMAT.to_string(),
            credential_scheme: None,
        }
    }
}

impl std::fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineOptions")
            .field("password", &self.password.as_ref().map(|_| "<set>"))
            .field("page_size", &self.page_size)
            .field("cache_size", &self.cache_size)
            .field("enable_journaling", &self.enable_journaling)
            .field("write_concern", &self.write_concern)
            .field("timeout", &self.timeout)
            .field("wal_name_format", &self.wal_name_format)
            .finish_non_exhaustive()
    }
}

impl EngineOptions {
    pub fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE || self.page_size <= PAGE_HEADER_SIZE as u32 {
            return Err(Error::InvalidArgument(format!(
                "page_size must be at least {MIN_PAGE_SIZE} bytes"
            )));
        }
        if self.cache_size == 0 {
            return Err(Error::InvalidArgument("cache_size must be non-zero".into()));
        }
        if !self.wal_name_format.contains("{name}") {
            return Err(Error::InvalidArgument(
                "wal_name_format must contain the {name} placeholder".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the WAL file name for a database path using the
    /// `{name}`/`{ext}` placeholders.
    pub fn wal_path(&self, db_path: &std::path::Path) -> std::path::PathBuf {
        let stem = db_path.file_stem().and_then(|s| s.to_str()).unwrap_or("tinydb");
        let ext = db_path.extension().and_then(|s| s.to_str()).unwrap_or("db");
        let file = self.wal_name_format.replace("{name}", stem).replace("{ext}", ext);
        db_path.with_file_name(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wal_path_uses_format_placeholders() {
        let opts = EngineOptions::default();
        let p = opts.wal_path(std::path::Path::new("/tmp/app.db"));
        assert_eq!(p, std::path::PathBuf::from("/tmp/app-wal.db"));
    }

    #[test]
    fn rejects_tiny_pages() {
        let opts = EngineOptions { page_size: 64, ..Default::default() };
        assert!(opts.validate().is_err());
    }
}
