//! Cache storage backends
//!
//! A `CacheStore` is a namespaced key → response store, modeled on the
//! browser Cache API: entries are `StoredResponse`s carrying headers and a
//! body, and expiry is driven by the `cache-control: max-age` header the
//! writer attached. Stores evaluate freshness themselves on `match_key`, so
//! callers never see an expired entry.

use super::error::CacheResult;
use crate::key::CacheKey;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CONTENT_TYPE: &str = "content-type";
pub const CACHE_CONTROL: &str = "cache-control";
pub const DATE: &str = "date";

/// A cached response: lowercase header names plus a text body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl StoredResponse {
    /// JSON response that stays fresh for `ttl_seconds` after `date`
    pub fn json(body: String, ttl_seconds: u64, date: DateTime<Utc>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(CONTENT_TYPE.to_string(), "application/json".to_string());
        headers.insert(CACHE_CONTROL.to_string(), format!("max-age={ttl_seconds}"));
        headers.insert(DATE.to_string(), date.to_rfc3339());
        StoredResponse { headers, body }
    }

    /// Header lookup, case-insensitive on the name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `max-age` directive from `cache-control`, in seconds
    pub fn max_age(&self) -> Option<u64> {
        self.header(CACHE_CONTROL)?
            .split(',')
            .filter_map(|directive| directive.split_once('='))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("max-age"))
            .and_then(|(_, secs)| secs.trim().parse().ok())
    }

    pub fn date(&self) -> Option<DateTime<Utc>> {
        let raw = self.header(DATE)?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|d| d.with_timezone(&Utc))
    }

    /// Freshness at `now`.
    ///
    /// No `max-age` means the response never expires. A `max-age` without a
    /// readable `date` cannot be aged and counts as stale.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        let Some(max_age) = self.max_age() else {
            return true;
        };
        let Some(date) = self.date() else {
            return false;
        };
        let age = now.signed_duration_since(date).num_seconds();
        age < 0 || (age as u64) < max_age
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }
}

/// Async key → response store.
///
/// Object safe, so the result cache can hold any backend behind
/// `Arc<dyn CacheStore>`.
pub trait CacheStore: Send + Sync {
    /// Namespace this store was opened with
    fn name(&self) -> &str;

    /// Fresh response for `key`, or `None`. Expired entries are evicted.
    fn match_key<'a>(&'a self, key: &'a CacheKey)
        -> BoxFuture<'a, CacheResult<Option<StoredResponse>>>;

    /// Create or replace the entry for `key`
    fn put<'a>(&'a self, key: &'a CacheKey, response: StoredResponse)
        -> BoxFuture<'a, CacheResult<()>>;

    /// Remove `key`; returns whether an entry existed
    fn delete<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, CacheResult<bool>>;

    /// Remove every entry in the namespace
    fn clear(&self) -> BoxFuture<'_, CacheResult<()>>;
}

/// In-process store backed by a concurrent map
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    name: String,
    entries: DashMap<CacheKey, StoredResponse>,
}

impl MemoryCacheStore {
    pub fn open(name: impl Into<String>) -> Self {
        MemoryCacheStore {
            name: name.into(),
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every stale entry; returns how many were removed.
    ///
    /// Runs on each `put`, so entries for queries that are never re-run do
    /// not outlive their max-age by more than one write.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, response| response.is_fresh_at(now));
        before.saturating_sub(self.entries.len())
    }
}

impl CacheStore for MemoryCacheStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_key<'a>(
        &'a self,
        key: &'a CacheKey,
    ) -> BoxFuture<'a, CacheResult<Option<StoredResponse>>> {
        Box::pin(async move {
            // Clone out before removing; holding the shard guard across
            // `remove` would deadlock.
            let found = self.entries.get(key).map(|entry| entry.value().clone());
            match found {
                Some(response) if response.is_fresh() => Ok(Some(response)),
                Some(_) => {
                    self.entries.remove(key);
                    Ok(None)
                }
                None => Ok(None),
            }
        })
    }

    fn put<'a>(
        &'a self,
        key: &'a CacheKey,
        response: StoredResponse,
    ) -> BoxFuture<'a, CacheResult<()>> {
        Box::pin(async move {
            self.purge_expired();
            self.entries.insert(key.clone(), response);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, CacheResult<bool>> {
        Box::pin(async move { Ok(self.entries.remove(key).is_some()) })
    }

    fn clear(&self) -> BoxFuture<'_, CacheResult<()>> {
        Box::pin(async move {
            self.entries.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::derive_key;
    use chrono::Duration;

    #[test]
    fn test_json_response_headers() {
        let now = Utc::now();
        let response = StoredResponse::json("{}".into(), 60, now);
        assert_eq!(response.header("Content-Type"), Some("application/json"));
        assert_eq!(response.max_age(), Some(60));
        assert_eq!(
            response.date().map(|d| d.timestamp()),
            Some(now.timestamp())
        );
    }

    #[test]
    fn test_freshness_window() {
        let stored_at = Utc::now();
        let response = StoredResponse::json("{}".into(), 10, stored_at);
        assert!(response.is_fresh_at(stored_at));
        assert!(response.is_fresh_at(stored_at + Duration::seconds(9)));
        assert!(!response.is_fresh_at(stored_at + Duration::seconds(10)));
    }

    #[test]
    fn test_no_max_age_never_expires() {
        let mut response = StoredResponse::json("{}".into(), 10, Utc::now());
        response.headers.remove(CACHE_CONTROL);
        assert!(response.is_fresh_at(Utc::now() + Duration::days(365)));
    }

    #[test]
    fn test_max_age_without_date_is_stale() {
        let mut response = StoredResponse::json("{}".into(), 10, Utc::now());
        response.headers.insert(DATE.into(), "yesterday".into());
        assert!(!response.is_fresh());
    }

    #[test]
    fn test_max_age_among_directives() {
        let mut response = StoredResponse::json("{}".into(), 10, Utc::now());
        response
            .headers
            .insert(CACHE_CONTROL.into(), "private, max-age = 42".into());
        assert_eq!(response.max_age(), Some(42));
    }

    #[tokio::test]
    async fn test_memory_store_crud() {
        let store = MemoryCacheStore::open("test");
        let key = derive_key("SELECT 1");
        assert_eq!(store.name(), "test");
        assert!(store.match_key(&key).await.unwrap().is_none());

        let response = StoredResponse::json("[1]".into(), 60, Utc::now());
        store.put(&key, response.clone()).await.unwrap();
        assert_eq!(store.match_key(&key).await.unwrap(), Some(response));

        assert!(store.delete(&key).await.unwrap());
        assert!(!store.delete(&key).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_evicts_expired() {
        let store = MemoryCacheStore::open("test");
        let key = derive_key("SELECT 1");
        let old = Utc::now() - Duration::seconds(120);
        store
            .put(&key, StoredResponse::json("[1]".into(), 60, old))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.match_key(&key).await.unwrap().is_none());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_put_sweeps_other_stale_entries() {
        let store = MemoryCacheStore::open("test");
        let old = Utc::now() - Duration::seconds(120);
        for sql in ["SELECT 1", "SELECT 2"] {
            store
                .put(&derive_key(sql), StoredResponse::json("[]".into(), 60, old))
                .await
                .unwrap();
        }
        // The second put already swept the first stale entry
        assert_eq!(store.len(), 1);

        let fresh = derive_key("SELECT 3");
        store
            .put(&fresh, StoredResponse::json("[3]".into(), 60, Utc::now()))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.match_key(&fresh).await.unwrap().is_some());
        assert_eq!(store.purge_expired(), 0);
    }

    #[tokio::test]
    async fn test_memory_store_clear() {
        let store = MemoryCacheStore::open("test");
        for sql in ["SELECT 1", "SELECT 2"] {
            store
                .put(&derive_key(sql), StoredResponse::json("[]".into(), 60, Utc::now()))
                .await
                .unwrap();
        }
        store.clear().await.unwrap();
        assert!(store.is_empty());
    }
}
