//! Timestamped cache files
//!
//! Every cached document has a paired stamp file holding the Unix time it
//! was captured. Both are written through a temp file and a rename, so a
//! concurrent reader sees either the old or the new version. Writers
//! serialize on an exclusive lock of `<cache>/.lock`.

use crate::error::RepositoryError;
use crate::fs_utils::write_atomic;
use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Snapshots and search indices older than this are rebuilt
pub const DEFAULT_TTL: Duration = Duration::from_secs(12 * 60 * 60);

const LOCK_FILE: &str = ".lock";

/// A cached document and its capture-time stamp.
#[derive(Debug, Clone, Copy)]
pub struct CacheFile {
    pub data: &'static str,
    pub stamp: &'static str,
}

pub const SNAPSHOT: CacheFile = CacheFile {
    data: "Cached File List.json",
    stamp: "Last File List Cache.txt",
};

pub const SEARCH_INDEX: CacheFile = CacheFile {
    data: "Search Index.json",
    stamp: "Last Search Index Cache.txt",
};

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Capture time, if the stamp exists and parses.
    pub fn captured_at(&self, file: &CacheFile) -> Option<u64> {
        std::fs::read_to_string(self.path(file.stamp))
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    /// Present and captured no more than `ttl` ago.
    pub fn is_fresh(&self, file: &CacheFile, ttl: Duration) -> bool {
        if !self.path(file.data).is_file() {
            return false;
        }
        self.captured_at(file)
            .is_some_and(|t| now_secs() <= t.saturating_add(ttl.as_secs()))
    }

    /// `None` when the document has never been written.
    pub fn load<T: DeserializeOwned>(&self, file: &CacheFile) -> Result<Option<T>, RepositoryError> {
        let path = self.path(file.data);
        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(RepositoryError::Io { path, source }),
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|source| RepositoryError::Parse {
                what: path.display().to_string(),
                source,
            })
    }

    /// Write the document, then stamp it with the current time.
    pub fn save<T: Serialize>(&self, file: &CacheFile, value: &T) -> Result<(), RepositoryError> {
        let data_path = self.path(file.data);
        let json = serde_json::to_vec_pretty(value).map_err(|source| RepositoryError::Parse {
            what: data_path.display().to_string(),
            source,
        })?;
        write_atomic(&data_path, &json).map_err(|source| RepositoryError::Io {
            path: data_path.clone(),
            source,
        })?;

        let stamp_path = self.path(file.stamp);
        write_atomic(&stamp_path, now_secs().to_string().as_bytes())
            .map_err(|source| RepositoryError::Io {
                path: stamp_path,
                source,
            })
    }

    /// Block until this process holds the cache write lock.
    pub fn lock(&self) -> Result<CacheLock, RepositoryError> {
        let path = self.path(LOCK_FILE);
        let io_err = |source| RepositoryError::Io {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(&self.dir).map_err(io_err)?;
        let file = File::create(&path).map_err(io_err)?;
        file.lock_exclusive().map_err(io_err)?;
        Ok(CacheLock { file })
    }
}

/// Releases the cache write lock when dropped.
///
/// The lock file itself stays; removing it would let a second writer lock
/// a fresh inode while the first still holds the old one.
#[derive(Debug)]
pub struct CacheLock {
    file: File,
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
