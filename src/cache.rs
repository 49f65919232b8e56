//! Receipt cache: one file per packed receipt.
//!
//! [`ReceiptStore`] is everything the batch flow needs from persistence.
//! [`DirStore`] implements it over a flat directory of `<uuid>.bin` files.
//!
//! # Ordering and expiry
//! `list_cached` returns handles newest first, by modification time, capped
//! at `max_files`.  Files older than `max_age` are deleted while listing.
//! `overwrite` carries the previous modification time over to the new
//! contents, so a receipt ages from when it was first cached no matter how
//! often a send attempt rewrites it.
//!
//! # Atomicity
//! Writes go to a temp file in the same directory which is then renamed
//! over the target, so a concurrent reader sees either the old or the new
//! receipt, never a torn one.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::config::CacheConfig;

/// Extension of cached receipt files.
pub const CACHE_FILE_EXT: &str = "bin";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache IO error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Cached receipt not found: {0}")]
    NotFound(String),
}

/// Persistence for packed receipts.
pub trait ReceiptStore {
    type Handle: Clone + fmt::Debug + fmt::Display;

    /// Persist a new receipt buffer.
    fn store(&self, data: &[u8]) -> Result<Self::Handle, CacheError>;
    fn load(&self, handle: &Self::Handle) -> Result<Vec<u8>, CacheError>;
    /// Replace the contents of an existing entry.
    fn overwrite(&self, handle: &Self::Handle, data: &[u8]) -> Result<(), CacheError>;
    fn delete(&self, handle: &Self::Handle) -> Result<(), CacheError>;
    /// Live entries, most recent first, bounded in count.
    fn list_cached(&self) -> Result<Vec<Self::Handle>, CacheError>;
}

/// Path of one cached receipt file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheHandle(PathBuf);

impl CacheHandle {
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for CacheHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.file_name() {
            Some(name) => write!(f, "{}", name.to_string_lossy()),
            None => write!(f, "{}", self.0.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirStore {
    dir:       PathBuf,
    max_files: usize,
    max_age:   Duration,
}

impl DirStore {
    /// Open (creating if needed) the cache directory.
    pub fn open(config: &CacheConfig) -> Result<Self, CacheError> {
        fs::create_dir_all(&config.dir).map_err(|e| io_err(&config.dir, e))?;
        let max_age = i64::try_from(config.max_age_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        Ok(Self { dir: config.dir.clone(), max_files: config.max_files, max_age })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn new_file_name() -> String {
        format!("{}.{CACHE_FILE_EXT}", Uuid::new_v4())
    }

    fn write_atomic(&self, target: &Path, data: &[u8], modified: Option<SystemTime>) -> Result<(), CacheError> {
        let mut temp = tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        temp.write_all(data).map_err(|e| io_err(temp.path(), e))?;
        if let Some(time) = modified {
            temp.as_file().set_modified(time).map_err(|e| io_err(temp.path(), e))?;
        }
        temp.persist(target).map_err(|e| io_err(target, e.error))?;
        Ok(())
    }

    fn is_receipt_file(path: &Path) -> bool {
        let visible = path
            .file_name()
            .map(|n| !n.to_string_lossy().starts_with('.'))
            .unwrap_or(false);
        visible && path.extension().map(|e| e == CACHE_FILE_EXT).unwrap_or(false)
    }
}

impl ReceiptStore for DirStore {
    type Handle = CacheHandle;

    fn store(&self, data: &[u8]) -> Result<CacheHandle, CacheError> {
        let path = self.dir.join(Self::new_file_name());
        self.write_atomic(&path, data, None)?;
        tracing::debug!("cached receipt {} ({} bytes)", path.display(), data.len());
        Ok(CacheHandle(path))
    }

    fn load(&self, handle: &CacheHandle) -> Result<Vec<u8>, CacheError> {
        fs::read(handle.path()).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CacheError::NotFound(handle.to_string()),
            _ => io_err(handle.path(), e),
        })
    }

    fn overwrite(&self, handle: &CacheHandle, data: &[u8]) -> Result<(), CacheError> {
        let first_cached = fs::metadata(handle.path())
            .and_then(|meta| meta.modified())
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => CacheError::NotFound(handle.to_string()),
                _ => io_err(handle.path(), e),
            })?;
        self.write_atomic(handle.path(), data, Some(first_cached))
    }

    fn delete(&self, handle: &CacheHandle) -> Result<(), CacheError> {
        fs::remove_file(handle.path()).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CacheError::NotFound(handle.to_string()),
            _ => io_err(handle.path(), e),
        })
    }

    fn list_cached(&self) -> Result<Vec<CacheHandle>, CacheError> {
        let now = Utc::now();
        let mut live: Vec<(DateTime<Utc>, CacheHandle)> = Vec::new();

        for entry in fs::read_dir(&self.dir).map_err(|e| io_err(&self.dir, e))? {
            let entry = entry.map_err(|e| io_err(&self.dir, e))?;
            let path = entry.path();
            if !Self::is_receipt_file(&path) {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!("skipping unreadable cache entry {}: {e}", path.display());
                    continue;
                }
            };
            let modified: DateTime<Utc> = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH).into();
            let handle = CacheHandle(path);

            if now.signed_duration_since(modified) > self.max_age {
                tracing::debug!("dropping expired receipt {handle}");
                if let Err(e) = self.delete(&handle) {
                    tracing::warn!("failed to delete expired receipt {handle}: {e}");
                }
                continue;
            }
            live.push((modified, handle));
        }

        live.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(live.into_iter().take(self.max_files).map(|(_, h)| h).collect())
    }
}

fn io_err(path: &Path, source: io::Error) -> CacheError {
    CacheError::Io { path: path.to_path_buf(), source }
}
