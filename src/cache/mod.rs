//! Result Cache Module
//!
//! Maps a `CacheKey` to a serialized query result plus metadata, on top of
//! a pluggable `CacheStore`.
//!
//! ## Design
//!
//! - Entries expire through the store's own TTL mechanism: each entry is
//!   written with `cache-control: max-age=<ttl>` and the store drops it on
//!   a later `match_key`.
//! - Writes are create-or-replace; the last write for a key wins.
//! - The cache is an optimization. Store failures are logged and surface as
//!   a miss (lookup) or a no-op (store), never as a query failure.
//! - While disabled, neither lookup nor store touches the backend.

mod error;
mod fs_store;
mod store;

pub use error::{CacheError, CacheResult};
pub use fs_store::FsCacheStore;
pub use store::{CacheStore, MemoryCacheStore, StoredResponse};

use crate::key::CacheKey;
use crate::value::{ColumnSchema, QueryResult, Value};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Serialized form of a cached result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub cache_key: CacheKey,
    /// Positional values per row, aligned with `schema`
    pub rows: Vec<Vec<Value>>,
    pub schema: Vec<ColumnSchema>,
    pub stored_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl CachedEntry {
    pub fn from_result(key: &CacheKey, result: &QueryResult, ttl_seconds: u64) -> Self {
        CachedEntry {
            cache_key: key.clone(),
            rows: result.row_values(),
            schema: result.schema.clone(),
            stored_at: Utc::now(),
            ttl_seconds,
        }
    }

    /// Rebuild the row objects
    pub fn into_result(self) -> QueryResult {
        QueryResult::new(self.schema, self.rows)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: u64,

    /// Lookups that found nothing (including failed lookups)
    pub misses: u64,

    /// Successful writes
    pub stores: u64,

    /// Writes the backend rejected
    pub store_failures: u64,

    /// Lookups the backend or decoder failed
    pub lookup_failures: u64,
}

impl CacheStats {
    /// Calculate hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn reset(&mut self) {
        *self = CacheStats::default();
    }
}

/// Query result cache
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    enabled: AtomicBool,
    default_ttl: u64,
    stats: Mutex<CacheStats>,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, default_ttl: u64) -> Self {
        ResultCache {
            store,
            enabled: AtomicBool::new(true),
            default_ttl,
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// In-memory cache, mostly for tests and embedding
    pub fn in_memory(name: &str, default_ttl: u64) -> Self {
        ResultCache::new(Arc::new(MemoryCacheStore::open(name)), default_ttl)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        debug!(enabled, "result cache toggled");
    }

    pub fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Fetch a cached result. Misses, failures, and a disabled cache all
    /// return `None`.
    pub async fn lookup(&self, key: &CacheKey) -> Option<CachedEntry> {
        if !self.is_enabled() {
            return None;
        }

        let entry = match self.fetch(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(hash = %key, error = %e, "cache lookup failed, treating as miss");
                self.stats.lock().lookup_failures += 1;
                None
            }
        };

        let mut stats = self.stats.lock();
        if entry.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        entry
    }

    async fn fetch(&self, key: &CacheKey) -> CacheResult<Option<CachedEntry>> {
        let Some(response) = self.store.match_key(key).await? else {
            return Ok(None);
        };
        let entry: CachedEntry = serde_json::from_str(&response.body)?;
        if entry.cache_key != *key {
            // A body filed under the wrong key is not ours to serve
            warn!(hash = %key, found = %entry.cache_key, "cache entry key mismatch");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// Best-effort store: failures are logged and counted, never returned.
    pub async fn store(&self, key: &CacheKey, result: &QueryResult, ttl_seconds: u64) {
        if let Err(e) = self.try_store(key, result, ttl_seconds).await {
            warn!(hash = %key, error = %e, "cache store failed");
        }
    }

    /// Store with the error surfaced. Disabled cache is an `Ok` no-op.
    pub async fn try_store(
        &self,
        key: &CacheKey,
        result: &QueryResult,
        ttl_seconds: u64,
    ) -> CacheResult<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let entry = CachedEntry::from_result(key, result, ttl_seconds);
        let outcome = match serde_json::to_string(&entry) {
            Ok(body) => {
                let response = StoredResponse::json(body, ttl_seconds, entry.stored_at);
                self.store.put(key, response).await
            }
            Err(e) => Err(e.into()),
        };

        let mut stats = self.stats.lock();
        match outcome {
            Ok(()) => {
                stats.stores += 1;
                debug!(hash = %key, rows = result.count, ttl_seconds, "cached query result");
                Ok(())
            }
            Err(e) => {
                stats.store_failures += 1;
                Err(e)
            }
        }
    }

    /// Drop one entry. Failures are logged and reported as `false`.
    pub async fn remove(&self, key: &CacheKey) -> bool {
        match self.store.delete(key).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!(hash = %key, error = %e, "cache delete failed");
                false
            }
        }
    }

    /// Drop every entry. Works whether or not the cache is enabled.
    pub async fn clear(&self) {
        match self.store.clear().await {
            Ok(()) => debug!(store = self.store.name(), "result cache cleared"),
            Err(e) => warn!(error = %e, "cache clear failed"),
        }
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }

    pub fn reset_stats(&self) {
        self.stats.lock().reset();
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("store", &self.store.name())
            .field("enabled", &self.is_enabled())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}
