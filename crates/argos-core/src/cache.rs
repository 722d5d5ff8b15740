//! In-memory cache of successful scrape results, keyed by URL.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;
use serde::Serialize;

use crate::result::{DEFAULT_CACHE_TTL, ScrapeResult};

const MAX_ENTRIES: u64 = 1_000;

/// Longest TTL an entry may be stored with; larger requests are clamped.
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct CachedEntry {
    result: Arc<ScrapeResult>,
    expires_at: Instant,
    ttl: Duration,
}

/// Expires every entry after its own TTL.
struct PerEntryTtl;

impl Expiry<String, CachedEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub default_ttl_secs: u64,
}

/// URL → result cache with per-entry TTL.
///
/// An entry is visible only while `now < stored_at + ttl`; moka evicts it
/// lazily afterwards. Cloning shares the underlying store.
#[derive(Clone)]
pub struct ResultCache {
    entries: Cache<String, CachedEntry>,
    default_ttl: Duration,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl ResultCache {
    pub fn new(default_ttl: Duration) -> Self {
        let entries = Cache::builder()
            .max_capacity(MAX_ENTRIES)
            .expire_after(PerEntryTtl)
            .build();

        Self {
            entries,
            default_ttl,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub async fn get(&self, url: &str) -> Option<Arc<ScrapeResult>> {
        let found = self
            .entries
            .get(url)
            .await
            .filter(|entry| Instant::now() < entry.expires_at)
            .map(|entry| entry.result);

        match found {
            Some(result) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(url, "Cache hit");
                Some(result)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `result` under `url`. `None` uses the default TTL; any TTL is
    /// clamped to [`MAX_CACHE_TTL`].
    pub async fn insert(&self, url: &str, result: ScrapeResult, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl).min(MAX_CACHE_TTL);
        if ttl.is_zero() {
            return;
        }
        let Some(expires_at) = Instant::now().checked_add(ttl) else {
            tracing::warn!(url, ttl_secs = ttl.as_secs(), "Cache TTL out of range, not caching");
            return;
        };
        let entry = CachedEntry {
            result: Arc::new(result),
            expires_at,
            ttl,
        };
        self.entries.insert(url.to_string(), entry).await;
    }

    pub async fn invalidate(&self, url: &str) {
        self.entries.invalidate(url).await;
    }

    pub async fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
        tracing::info!("Result cache cleared");
    }

    pub async fn stats(&self) -> CacheStats {
        self.entries.run_pending_tasks().await;
        CacheStats {
            entries: self.entries.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            default_ttl_secs: self.default_ttl.as_secs(),
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}
