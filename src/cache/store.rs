//! Persistence backends for the response cache.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::{CacheError, Entries};

/// Default location of the cache file, relative to the working directory.
pub const DEFAULT_CACHE_FILE: &str = "proxy_cache.json";

/// Current on-disk format version.
const FORMAT_VERSION: u32 = 1;

/// Where the whole cache mapping is persisted.
///
/// Every method works on the complete mapping; there are no per-entry writes.
pub trait CacheStore: Send {
    /// Reads the persisted mapping. `Ok(None)` means nothing has been stored yet.
    fn load(&self) -> impl Future<Output = Result<Option<Entries>, CacheError>> + Send;

    /// Replaces the persisted mapping with `entries`.
    fn save(&self, entries: &Entries) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Deletes the persisted mapping. Returns `true` if something was removed.
    fn purge(&self) -> impl Future<Output = Result<bool, CacheError>> + Send;
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    entries: BTreeMap<&'a str, &'a [u8]>,
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    entries: HashMap<String, Vec<u8>>,
}

/// Stores the mapping as a single JSON file.
///
/// Writes go to a sibling `.tmp` file which is then renamed over the target,
/// so a reader never observes a half-written cache.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Creates a store for `path`. The file is not touched until the first load or save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the cache file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn encode(&self, entries: &Entries) -> Result<Vec<u8>, CacheError> {
        let snapshot = SnapshotRef {
            version: FORMAT_VERSION,
            entries: entries.iter().map(|(k, v)| (k.as_str(), &v[..])).collect(),
        };
        serde_json::to_vec(&snapshot).map_err(|e| CacheError::Encode {
            path: self.path.clone(),
            source: e,
        })
    }

    fn decode(&self, raw: &[u8]) -> Result<Entries, CacheError> {
        let snapshot: Snapshot = serde_json::from_slice(raw).map_err(|e| CacheError::Decode {
            path: self.path.clone(),
            source: e,
        })?;

        if snapshot.version != FORMAT_VERSION {
            return Err(CacheError::UnsupportedVersion {
                path: self.path.clone(),
                found: snapshot.version,
            });
        }

        Ok(snapshot
            .entries
            .into_iter()
            .map(|(k, v)| (k, Bytes::from(v)))
            .collect())
    }

    fn io_error(&self, source: std::io::Error) -> CacheError {
        CacheError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_FILE)
    }
}

impl CacheStore for FileStore {
    async fn load(&self) -> Result<Option<Entries>, CacheError> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        self.decode(&raw).map(Some)
    }

    async fn save(&self, entries: &Entries) -> Result<(), CacheError> {
        let encoded = self.encode(entries)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let temp_path = self.temp_path();
        fs::write(&temp_path, encoded)
            .await
            .map_err(|e| self.io_error(e))?;
        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| self.io_error(e))
    }

    async fn purge(&self) -> Result<bool, CacheError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

/// Keeps the "persisted" mapping in process memory.
///
/// Clones share the same backing slot, which lets a test hold one handle
/// while the cache owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<Entries>>>,
    saves: Arc<Mutex<usize>>,
}

impl MemoryStore {
    /// Creates a store with nothing persisted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with `entries` already persisted.
    pub fn with_entries(entries: Entries) -> Self {
        let store = Self::default();
        *lock(&store.slot) = Some(entries);
        store
    }

    /// Returns a copy of what is currently persisted.
    pub fn snapshot(&self) -> Option<Entries> {
        lock(&self.slot).clone()
    }

    /// Number of completed saves.
    pub fn save_count(&self) -> usize {
        *lock(&self.saves)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CacheStore for MemoryStore {
    async fn load(&self) -> Result<Option<Entries>, CacheError> {
        Ok(self.snapshot())
    }

    async fn save(&self, entries: &Entries) -> Result<(), CacheError> {
        *lock(&self.slot) = Some(entries.clone());
        *lock(&self.saves) += 1;
        Ok(())
    }

    async fn purge(&self) -> Result<bool, CacheError> {
        Ok(lock(&self.slot).take().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Entries {
        let mut entries = Entries::new();
        entries.insert(
            "http://localhost:9000/hello".to_owned(),
            Bytes::from_static(b"hi"),
        );
        entries.insert(
            "http://localhost:9000/bin".to_owned(),
            Bytes::from_static(&[0, 255, 10, 13]),
        );
        entries
    }

    fn create_test_store() -> (FileStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::new(temp_dir.path().join("cache.json"));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn load_missing_file_is_none() {
        let (store, _dir) = create_test_store();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_preserves_mapping() {
        let (store, _dir) = create_test_store();
        let entries = sample();
        store.save(&entries).await.unwrap();

        let reopened = FileStore::new(store.path());
        let loaded = reopened.load().await.unwrap().expect("cache file exists");
        assert_eq!(loaded, entries);
    }

    #[tokio::test]
    async fn save_overwrites_and_leaves_no_temp_file() {
        let (store, dir) = create_test_store();
        store.save(&sample()).await.unwrap();

        let mut smaller = Entries::new();
        smaller.insert("k".to_owned(), Bytes::from_static(b"v"));
        store.save(&smaller).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(smaller));
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("cache.json")]);
    }

    #[tokio::test]
    async fn save_creates_missing_parent_directories() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("nested").join("deeper").join("c.json"));
        store.save(&sample()).await.unwrap();
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn malformed_file_is_a_decode_error() {
        let (store, _dir) = create_test_store();
        std::fs::write(store.path(), b"\x80not json").unwrap();
        assert!(matches!(
            store.load().await,
            Err(CacheError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_version_is_rejected() {
        let (store, _dir) = create_test_store();
        std::fs::write(store.path(), br#"{"version":99,"entries":{}}"#).unwrap();
        assert!(matches!(
            store.load().await,
            Err(CacheError::UnsupportedVersion { found: 99, .. })
        ));
    }

    #[tokio::test]
    async fn purge_reports_whether_a_file_existed() {
        let (store, _dir) = create_test_store();
        assert!(!store.purge().await.unwrap());
        store.save(&sample()).await.unwrap();
        assert!(store.purge().await.unwrap());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn memory_store_shares_state_between_clones() {
        let store = MemoryStore::new();
        let handle = store.clone();
        store.save(&sample()).await.unwrap();
        assert_eq!(handle.snapshot(), Some(sample()));
        assert_eq!(handle.save_count(), 1);
        assert!(handle.purge().await.unwrap());
        assert!(store.load().await.unwrap().is_none());
    }
}
