use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::warn;

const PREFIX_CHARS: usize = 2;

/// Advisory store of raw oracle output keyed by evaluation fingerprint.
/// A failing cache behaves like an empty one.
pub trait ResultCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, output: &str);
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache key: {0:?}")]
    InvalidKey(String),
    #[error("cache io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt cache entry {path}: {message}")]
    Corrupt { path: String, message: String },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError {
    let path = path.display().to_string();
    move |source| CacheError::Io { path, source }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    stdout: String,
    cached_at: String,
}

/// Content-addressed entries at `<root>/<key[..2]>/<key>.json`.
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, key: &str) -> Result<PathBuf, CacheError> {
        if key.len() < PREFIX_CHARS || !key.bytes().all(|byte| byte.is_ascii_alphanumeric()) {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        Ok(self
            .root
            .join(&key[..PREFIX_CHARS])
            .join(format!("{key}.json")))
    }

    pub fn read(&self, key: &str) -> Result<Option<String>, CacheError> {
        let path = self.entry_path(key)?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io_err(&path)(source)),
        };
        let record: CacheRecord =
            serde_json::from_str(&raw).map_err(|err| CacheError::Corrupt {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;
        Ok(Some(record.stdout))
    }

    /// Writes to a unique temp file in the shard directory, then renames it
    /// over the entry so readers only ever see complete records.
    pub fn write(&self, key: &str, output: &str) -> Result<(), CacheError> {
        let path = self.entry_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let record = CacheRecord {
            stdout: output.to_string(),
            cached_at: Utc::now().to_rfc3339(),
        };
        let payload = serde_json::to_string(&record).map_err(|err| CacheError::Corrupt {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let tmp_path = path.with_file_name(format!("{key}.{}.tmp", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp_path, payload).map_err(io_err(&tmp_path))?;
        if let Err(source) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(io_err(&path)(source));
        }
        Ok(())
    }
}

impl ResultCache for DiskCache {
    fn get(&self, key: &str) -> Option<String> {
        match self.read(key) {
            Ok(hit) => hit,
            Err(err) => {
                warn!(event = "cache_read_failed", key = key, error = %err);
                None
            }
        }
    }

    fn put(&self, key: &str, output: &str) {
        if let Err(err) = self.write(key, output) {
            warn!(event = "cache_write_failed", key = key, error = %err);
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn put(&self, key: &str, output: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), output.to_string());
    }
}
