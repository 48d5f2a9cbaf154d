//! Persistence backends for cached payloads
//!
//! A [`Store`] is a plain key/value store of JSON text with an optional
//! expiry. [`MemoryStore`] lives inside one process; [`FileStore`] writes to
//! disk so a background worker and a server process can share payloads.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Distinguishes temporary files of concurrent writers within one process
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Errors raised by a persistence backend
#[derive(Debug, Error)]
pub enum CacheError {
    /// Reading or writing the backing files failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored envelope could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend cannot be used at all
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Key/value persistence with optional per-entry expiry
///
/// Writes replace the whole value; a reader sees either the old value or the
/// new one. Expired entries read as absent.
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError>;
}

/// In-process store; contents do not survive a restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| CacheError::Unavailable("memory store lock poisoned".to_string()))?;
        Ok(entries
            .get(key)
            .filter(|entry| !is_expired(entry.expires_at))
            .map(|entry| entry.value.clone()))
    }

    fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CacheError::Unavailable("memory store lock poisoned".to_string()))?;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: expiry(ttl),
            },
        );
        Ok(())
    }
}

/// Wrapper struct for a value stored on disk
#[derive(Debug, Serialize, Deserialize)]
struct FileEnvelope {
    /// The stored value
    data: String,
    /// When the value was written
    cached_at: DateTime<Utc>,
    /// When the value stops being returned, if ever
    expires_at: Option<DateTime<Utc>>,
}

/// Stores each key as a JSON file
///
/// Files live in an XDG-compliant cache directory (`~/.cache/hkflights/` on
/// Linux). Each write goes to a temporary file that is then renamed over the
/// old one, so concurrent readers in other processes never see a half-written
/// entry.
#[derive(Debug, Clone)]
pub struct FileStore {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
}

impl FileStore {
    /// Creates a FileStore using the XDG-compliant cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "hkflights")?;
        let cache_dir = project_dirs.cache_dir().to_path_buf();
        Some(Self { cache_dir })
    }

    /// Creates a FileStore with a custom cache directory
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.cache_dir
    }

    /// Returns the path to the file for `key`; characters that are awkward in
    /// file names (such as `:`) become `_`
    fn cache_path(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.cache_dir.join(format!("{}.json", name))
    }
}

impl Store for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let content = match fs::read_to_string(self.cache_path(key)) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        // A torn or garbled file is lost data, not an unreachable backend
        let envelope: FileEnvelope = match serde_json::from_str(&content) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable cache file");
                return Ok(None);
            }
        };

        if is_expired(envelope.expires_at) {
            return Ok(None);
        }
        Ok(Some(envelope.data))
    }

    fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        fs::create_dir_all(&self.cache_dir)?;

        let envelope = FileEnvelope {
            data: value,
            cached_at: Utc::now(),
            expires_at: expiry(ttl),
        };
        let json = serde_json::to_string_pretty(&envelope)?;

        let path = self.cache_path(key);
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("json.{}.{}.tmp", std::process::id(), seq));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

fn expiry(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.and_then(|ttl| ChronoDuration::from_std(ttl).ok())
        .map(|ttl| Utc::now() + ttl)
}

fn is_expired(expires_at: Option<DateTime<Utc>>) -> bool {
    expires_at.is_some_and(|at| Utc::now() >= at)
}
