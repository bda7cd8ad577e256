//! Time-expiring response cache.
//!
//! # Design
//! Entries are raw response bytes keyed by `(namespace, url)`, where the
//! namespace is the owning client. Expiry is measured from insertion.
//! Decoding is left to the client so the cache stays type-agnostic, and a
//! cached payload is decoded exactly like a fresh one.
//!
//! Concurrent writers race with last-write-wins semantics.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use uuid::Uuid;

pub trait CacheManager: Send + Sync + fmt::Debug {
    /// Store `data` for `duration`, replacing any previous entry.
    fn add(&self, namespace: &str, key: &str, duration: Duration, data: Vec<u8>);

    /// Bytes stored under `key`, unless missing or expired.
    fn get(&self, namespace: &str, key: &str) -> Option<Vec<u8>>;

    /// Drop every entry of `namespace`, or everything when `None`.
    fn clean(&self, namespace: Option<&str>);
}

impl dyn CacheManager {
    /// Decode a cached JSON entry. An undecodable entry counts as a miss.
    pub fn get_as<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        let bytes = self.get(namespace, key)?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::debug!("Cached entry for {} is not the requested type: {}", key, err);
                None
            }
        }
    }
}

/// Cache that never stores anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct VoidCacheManager;

impl CacheManager for VoidCacheManager {
    fn add(&self, _namespace: &str, _key: &str, _duration: Duration, _data: Vec<u8>) {}

    fn get(&self, _namespace: &str, _key: &str) -> Option<Vec<u8>> {
        None
    }

    fn clean(&self, _namespace: Option<&str>) {}
}

#[derive(Debug)]
struct MemoryEntry {
    expires_at: Instant,
    data: Vec<u8>,
}

/// In-process cache.
#[derive(Debug, Default)]
pub struct MemoryCacheManager {
    entries: RwLock<HashMap<String, HashMap<String, MemoryEntry>>>,
}

impl MemoryCacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries across all namespaces.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .values()
            .flat_map(|ns| ns.values())
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheManager for MemoryCacheManager {
    fn add(&self, namespace: &str, key: &str, duration: Duration, data: Vec<u8>) {
        let Some(expires_at) = Instant::now().checked_add(duration) else {
            return;
        };
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), MemoryEntry { expires_at, data });
    }

    fn get(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            let entry = entries.get(namespace)?.get(key)?;
            if entry.expires_at > now {
                return Some(entry.data.clone());
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(ns) = entries.get_mut(namespace) {
            if ns.get(key).is_some_and(|entry| entry.expires_at <= now) {
                ns.remove(key);
            }
        }
        None
    }

    fn clean(&self, namespace: Option<&str>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match namespace {
            Some(ns) => {
                entries.remove(ns);
            }
            None => entries.clear(),
        }
    }
}

/// File-backed cache that survives restarts.
///
/// Layout: `<root>/<namespace>/<uuid-v5 of key>`. Each file starts with the
/// expiry as big-endian unix milliseconds followed by the payload. I/O
/// failures are logged and behave like a miss.
#[derive(Debug, Clone)]
pub struct DiskCacheManager {
    root: PathBuf,
}

const EXPIRY_LEN: usize = 8;

impl DiskCacheManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        let safe: String = namespace
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(safe)
    }

    fn entry_path(&self, namespace: &str, key: &str) -> PathBuf {
        let file = Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes());
        self.namespace_dir(namespace).join(file.to_string())
    }

    fn write_entry(&self, namespace: &str, key: &str, expires_at: u64, data: &[u8]) -> io::Result<()> {
        let dir = self.namespace_dir(namespace);
        fs::create_dir_all(&dir)?;

        let mut contents = Vec::with_capacity(EXPIRY_LEN + data.len());
        contents.extend_from_slice(&expires_at.to_be_bytes());
        contents.extend_from_slice(data);

        let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, self.entry_path(namespace, key))
    }
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn remove_dir(path: &Path) {
    match fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!("Failed to clean cache dir {}: {}", path.display(), err),
    }
}

impl CacheManager for DiskCacheManager {
    fn add(&self, namespace: &str, key: &str, duration: Duration, data: Vec<u8>) {
        let expires_at = unix_millis(SystemTime::now()).saturating_add(duration.as_millis() as u64);
        if let Err(err) = self.write_entry(namespace, key, expires_at, &data) {
            tracing::warn!("Failed to write cache entry for {}: {}", key, err);
        }
    }

    fn get(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        let path = self.entry_path(namespace, key);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!("Failed to read cache entry {}: {}", path.display(), err);
                return None;
            }
        };

        let expired = match contents.get(..EXPIRY_LEN) {
            Some(header) => {
                let mut expiry = [0u8; EXPIRY_LEN];
                expiry.copy_from_slice(header);
                u64::from_be_bytes(expiry) <= unix_millis(SystemTime::now())
            }
            None => true,
        };
        if expired {
            let _ = fs::remove_file(&path);
            return None;
        }
        Some(contents[EXPIRY_LEN..].to_vec())
    }

    fn clean(&self, namespace: Option<&str>) {
        match namespace {
            Some(ns) => remove_dir(&self.namespace_dir(ns)),
            None => remove_dir(&self.root),
        }
    }
}
