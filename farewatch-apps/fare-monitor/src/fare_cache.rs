//!  Farewatch Fare Monitor
//!
//!  Copyright (C) 2026  The Farewatch developers
//!
//!  This program is free software: you can redistribute it and/or modify
//!  it under the terms of the GNU Affero General Public License as published by
//!  the Free Software Foundation, either version 3 of the License, or
//!  (at your option) any later version.
//!
//!  This program is distributed in the hope that it will be useful,
//!  but WITHOUT ANY WARRANTY; without even the implied warranty of
//!  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//!  GNU Affero General Public License for more details.
//!
//!  You should have received a copy of the GNU Affero General Public License
//!  along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! # Fare cache
//!
//! Canonical query → search result with a per-call TTL, over a pluggable
//! [`CacheBackend`].
//!
//! [`FareCache::get_or_fetch`] is single-flight: while a fetch for a key is
//! outstanding, every other caller for that key waits on it and receives
//! its outcome instead of issuing a second scrape.
//!
//! Expired entries are dropped when read, and swept from the backend every
//! `sweep_every` stores so keys nobody asks for again do not pile up.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::clock::Clock;
use crate::errors::SearchError;
use crate::flights_query::CanonicalQuery;
use crate::flights_search::SearchResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub result: SearchResult,
    pub expires_at: DateTime<Utc>,
}

/// Storage for cache entries. Implementations only need to be safe under
/// concurrent access; expiry and single-flight live in [`FareCache`].
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn load(&self, key: &str) -> anyhow::Result<Option<CacheEntry>>;
    async fn store(&self, key: &str, entry: CacheEntry) -> anyhow::Result<()>;
    async fn remove(&self, key: &str) -> anyhow::Result<()>;

    /// Drop every entry expired at `now`, returning how many went. Backends
    /// with their own expiry can leave this as is.
    async fn purge_expired(&self, _now: DateTime<Utc>) -> anyhow::Result<usize> {
        Ok(0)
    }
}

#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: tokio::sync::RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn load(&self, key: &str) -> anyhow::Result<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn store(&self, key: &str, entry: CacheEntry) -> anyhow::Result<()> {
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        Ok(before - entries.len())
    }
}

pub const DEFAULT_SWEEP_EVERY: usize = 64;

type Flight = Arc<OnceCell<Result<SearchResult, SearchError>>>;

/// Where a [`FareCache::get_or_fetch`] answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Hit,
    /// This caller ran the fetch.
    Fetched,
    /// This caller waited on another caller's fetch.
    Joined,
}

pub struct FareCache {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
    inflight: Mutex<HashMap<String, Flight>>,
    stores: AtomicUsize,
    sweep_every: usize,
}

impl FareCache {
    pub fn new(backend: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            inflight: Mutex::new(HashMap::new()),
            stores: AtomicUsize::new(0),
            sweep_every: DEFAULT_SWEEP_EVERY,
        }
    }

    pub fn with_sweep_every(mut self, stores: usize) -> Self {
        self.sweep_every = stores.max(1);
        self
    }

    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new()), clock)
    }

    /// A live entry for `query`, never one past its expiry.
    pub async fn get(&self, query: &CanonicalQuery) -> Option<SearchResult> {
        self.get_by_key(&query.cache_key()).await
    }

    async fn get_by_key(&self, key: &str) -> Option<SearchResult> {
        let entry = match self.backend.load(key).await {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::warn!(key, "Cache backend load failed, treating as miss: {:#}", e);
                return None;
            }
        };
        if entry.expires_at > self.clock.now() {
            return Some(entry.result);
        }
        tracing::debug!(key, expired_at = %entry.expires_at, "Evicting expired cache entry");
        if let Err(e) = self.backend.remove(key).await {
            tracing::warn!(key, "Cache backend remove failed: {:#}", e);
        }
        None
    }

    /// Store or replace the entry for `query`, live for `ttl` from now.
    pub async fn put(&self, query: &CanonicalQuery, result: SearchResult, ttl: Duration) {
        self.put_by_key(&query.cache_key(), result, ttl).await
    }

    async fn put_by_key(&self, key: &str, result: SearchResult, ttl: Duration) {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(3650));
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if let Err(e) = self.backend.store(key, CacheEntry { result, expires_at }).await {
            tracing::warn!(key, "Cache backend store failed: {:#}", e);
        }
        if (self.stores.fetch_add(1, Ordering::Relaxed) + 1) % self.sweep_every == 0 {
            self.purge_expired().await;
        }
    }

    /// Sweep expired entries out of the backend.
    pub async fn purge_expired(&self) -> usize {
        match self.backend.purge_expired(self.clock.now()).await {
            Ok(purged) => {
                if purged > 0 {
                    tracing::debug!(purged, "Swept expired cache entries");
                }
                purged
            }
            Err(e) => {
                tracing::warn!("Cache sweep failed: {:#}", e);
                0
            }
        }
    }

    pub async fn invalidate(&self, query: &CanonicalQuery) {
        let key = query.cache_key();
        if let Err(e) = self.backend.remove(&key).await {
            tracing::warn!(key, "Cache backend remove failed: {:#}", e);
        }
    }

    /// Return the live entry for `query`, or run `fetch` once for all
    /// concurrent callers and cache a successful outcome for `ttl`.
    ///
    /// Errors are shared with the callers that joined the failed fetch but
    /// are never cached.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        query: &CanonicalQuery,
        ttl: Duration,
        fetch: F,
    ) -> Result<(SearchResult, CacheSource), SearchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SearchResult, SearchError>>,
    {
        let key = query.cache_key();
        if let Some(hit) = self.get_by_key(&key).await {
            tracing::debug!(key, "Cache hit");
            return Ok((hit, CacheSource::Hit));
        }

        let flight: Flight = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(inflight.entry(key.clone()).or_default())
        };

        let mut source = CacheSource::Joined;
        let outcome = flight
            .get_or_init(|| async {
                // Another flight for this key may have landed between our miss
                // and joining the map.
                if let Some(hit) = self.get_by_key(&key).await {
                    source = CacheSource::Hit;
                    return Ok(hit);
                }
                source = CacheSource::Fetched;
                let started = std::time::Instant::now();
                let result = fetch().await;
                match &result {
                    Ok(found) => {
                        tracing::debug!(key, elapsed = ?started.elapsed(), "Fetched, caching");
                        self.put_by_key(&key, found.clone(), ttl).await;
                    }
                    Err(e) => tracing::debug!(key, "Fetch failed, not caching: {}", e),
                }
                result
            })
            .await
            .clone();

        {
            let mut inflight = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
            if inflight.get(&key).is_some_and(|f| Arc::ptr_eq(f, &flight)) {
                inflight.remove(&key);
            }
        }

        outcome.map(|r| (r, source))
    }

    /// Keys with a fetch currently outstanding.
    pub fn inflight_count(&self) -> usize {
        self.inflight.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::flights_query::tests::one_way;
    use chrono::NaiveDate;

    fn result_for(query: &CanonicalQuery, id: &str) -> SearchResult {
        SearchResult {
            search_id: id.to_string(),
            query: query.clone(),
            fares: Vec::new(),
            deep_link: String::new(),
            fetched_at: Utc::now(),
            price_level: None,
        }
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let clock = Arc::new(ManualClock::at_date(NaiveDate::from_ymd_opt(2025, 12, 1).unwrap()));
        let cache = FareCache::in_memory(clock.clone());
        let q = one_way("JFK", "LHR", NaiveDate::from_ymd_opt(2025, 12, 25).unwrap());

        cache.put(&q, result_for(&q, "a"), Duration::from_secs(60)).await;
        clock.advance(chrono::Duration::seconds(59));
        assert_eq!(cache.get(&q).await.map(|r| r.search_id), Some("a".into()));

        clock.advance(chrono::Duration::seconds(1));
        assert!(cache.get(&q).await.is_none());
    }

    #[tokio::test]
    async fn test_unread_expired_entries_are_swept_on_store() {
        let clock = Arc::new(ManualClock::at_date(NaiveDate::from_ymd_opt(2025, 12, 1).unwrap()));
        let backend = Arc::new(MemoryCacheBackend::new());
        let cache = FareCache::new(backend.clone(), clock.clone()).with_sweep_every(4);

        let routes = [("JFK", "LHR"), ("ARN", "CDG"), ("NRT", "SFO")];
        for (origin, destination) in routes {
            let q = one_way(origin, destination, NaiveDate::from_ymd_opt(2025, 12, 25).unwrap());
            cache.put(&q, result_for(&q, origin), Duration::from_secs(60)).await;
        }
        assert_eq!(backend.len().await, 3);

        // None of the three is read again. The fourth store sweeps them.
        clock.advance(chrono::Duration::seconds(61));
        let fresh = one_way("OSL", "BER", NaiveDate::from_ymd_opt(2025, 12, 25).unwrap());
        cache.put(&fresh, result_for(&fresh, "fresh"), Duration::from_secs(60)).await;
        assert_eq!(backend.len().await, 1);
        assert!(cache.get(&fresh).await.is_some());
        assert_eq!(cache.purge_expired().await, 0);
    }

    #[tokio::test]
    async fn test_invalidate_removes_entry() {
        let clock = Arc::new(ManualClock::at_date(NaiveDate::from_ymd_opt(2025, 12, 1).unwrap()));
        let cache = FareCache::in_memory(clock);
        let q = one_way("JFK", "LHR", NaiveDate::from_ymd_opt(2025, 12, 25).unwrap());

        cache.put(&q, result_for(&q, "a"), Duration::from_secs(60)).await;
        cache.invalidate(&q).await;
        assert!(cache.get(&q).await.is_none());
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let clock = Arc::new(ManualClock::at_date(NaiveDate::from_ymd_opt(2025, 12, 1).unwrap()));
        let cache = FareCache::in_memory(clock);
        let q = one_way("JFK", "LHR", NaiveDate::from_ymd_opt(2025, 12, 25).unwrap());

        let failed = cache
            .get_or_fetch(&q, Duration::from_secs(60), || async {
                Err(SearchError::NotFound("x".into()))
            })
            .await;
        assert!(failed.is_err());
        assert_eq!(cache.inflight_count(), 0);

        let (ok, source) = cache
            .get_or_fetch(&q, Duration::from_secs(60), || async { Ok(result_for(&q, "b")) })
            .await
            .unwrap();
        assert_eq!(ok.search_id, "b");
        assert_eq!(source, CacheSource::Fetched);

        let (_, source) = cache
            .get_or_fetch(&q, Duration::from_secs(60), || async { Ok(result_for(&q, "c")) })
            .await
            .unwrap();
        assert_eq!(source, CacheSource::Hit);
    }
}
