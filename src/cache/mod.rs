//! Response cache: an in-memory URL → body mapping mirrored to a [`CacheStore`].
//!
//! The mapping is loaded lazily: every lookup against an empty cache asks the
//! store for a persisted copy. Each insert rewrites the whole persisted
//! mapping before returning. There is no expiry and no eviction; an entry
//! lives until [`ResponseCache::clear`].

use std::collections::HashMap;
use std::path::PathBuf;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info, warn};

mod store;

pub use store::{CacheStore, DEFAULT_CACHE_FILE, FileStore, MemoryStore};

/// The cached mapping: full target URL to raw response body.
pub type Entries = HashMap<String, Bytes>;

/// Errors raised by cache persistence.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode cache for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache file {path} is not valid: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache file {path} has unsupported format version {found}")]
    UnsupportedVersion { path: PathBuf, found: u32 },
}

/// In-memory cache backed by a persistence store.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use caching_proxy::cache::{MemoryStore, ResponseCache};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut cache = ResponseCache::new(MemoryStore::new());
/// assert!(cache.lookup("http://origin/a").await.is_none());
///
/// cache.insert("http://origin/a", Bytes::from_static(b"body")).await.unwrap();
/// assert_eq!(cache.lookup("http://origin/a").await.unwrap(), "body");
/// # }
/// ```
#[derive(Debug)]
pub struct ResponseCache<S> {
    entries: Entries,
    store: S,
}

impl<S: CacheStore> ResponseCache<S> {
    /// Creates an empty cache. Nothing is read from `store` until the first lookup.
    pub fn new(store: S) -> Self {
        Self {
            entries: Entries::new(),
            store,
        }
    }

    /// Returns the backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Number of entries held in memory.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is held in memory.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the cached body for `key`.
    ///
    /// When the in-memory mapping is empty the store is consulted first. A
    /// store that fails to load is logged and treated as empty.
    pub async fn lookup(&mut self, key: &str) -> Option<Bytes> {
        if self.entries.is_empty() {
            self.reload().await;
        }
        self.entries.get(key).cloned()
    }

    /// Stores `body` under `key`, replacing any previous entry, and persists
    /// the whole mapping.
    ///
    /// # Errors
    ///
    /// Returns the store's error if persisting fails. The entry is kept in
    /// memory either way.
    pub async fn insert(&mut self, key: impl Into<String>, body: Bytes) -> Result<(), CacheError> {
        let key = key.into();
        debug!(key = %key, bytes = body.len(), "caching response");
        self.entries.insert(key, body);
        self.store.save(&self.entries).await
    }

    /// Empties memory and deletes the persisted mapping.
    pub async fn clear(&mut self) -> Result<(), CacheError> {
        self.entries.clear();
        if self.store.purge().await? {
            info!("persisted cache removed");
        }
        Ok(())
    }

    async fn reload(&mut self) {
        match self.store.load().await {
            Ok(Some(entries)) => {
                debug!(entries = entries.len(), "cache loaded from store");
                self.entries = entries;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "ignoring unreadable cache store"),
        }
    }
}
