//! TTL cache of aggregated responses keyed by a canonical query signature.
//!
//! The cache is an injected component ([`ResultCache`]) rather than a process
//! global, so the orchestrator can run against [`MemoryCache`], [`NoopCache`],
//! or a test double. Concurrent identical misses may both compute and both
//! insert; the last writer wins.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use serde::Serialize;

use super::types::{normalize_text, AggregatedResponse, Query, RankingStrategy, SourceId};
use crate::error::CacheError;

/// Canonical signature of a cache-equivalent query:
/// `blake3(normalized text, mode, sorted sources, options)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build the key from a query, the resolved adapter set and the resolved strategy.
    ///
    /// Source order and letter case / whitespace in the text do not affect the key.
    pub fn for_query(query: &Query, sources: &[SourceId], strategy: RankingStrategy) -> Self {
        let mut sorted: Vec<&str> = sources.iter().map(SourceId::as_str).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut options = query.options.clone();
        options.ranking_strategy = Some(strategy);

        let canonical = serde_json::json!({
            "text": normalize_text(&query.text),
            "mode": query.mode,
            "sources": sorted,
            "options": options,
        });

        let hash = blake3::hash(canonical.to_string().as_bytes());
        Self(hash.to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Point-in-time view of cache occupancy.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: u64,
    pub ttl_secs: u64,
}

/// Concurrency-safe store of aggregated responses.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Return the live entry for `key`. Expired entries are treated as absent.
    async fn get(&self, key: &CacheKey) -> Result<Option<AggregatedResponse>, CacheError>;

    async fn insert(&self, key: CacheKey, response: AggregatedResponse) -> Result<(), CacheError>;

    /// Drop every entry.
    async fn clear(&self) -> Result<(), CacheError>;

    fn stats(&self) -> CacheStats;
}

#[derive(Clone)]
struct CacheEntry {
    response: Arc<AggregatedResponse>,
    expires_at: Instant,
}

/// In-process cache backed by [`moka`].
///
/// Each entry carries its own `expires_at`; a lookup that finds an expired
/// entry evicts it and reports a miss. moka's own TTL bounds memory for
/// entries that are never looked up again.
pub struct MemoryCache {
    inner: Cache<CacheKey, CacheEntry>,
    ttl: Duration,
}

impl MemoryCache {
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { inner, ttl }
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<AggregatedResponse>, CacheError> {
        match self.inner.get(key).await {
            Some(entry) if entry.expires_at > Instant::now() => {
                Ok(Some(entry.response.as_ref().clone()))
            }
            Some(_) => {
                self.inner.invalidate(key).await;
                tracing::debug!(key = %key.as_str(), "evicted expired cache entry");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn insert(&self, key: CacheKey, response: AggregatedResponse) -> Result<(), CacheError> {
        let entry = CacheEntry {
            response: Arc::new(response),
            expires_at: Instant::now() + self.ttl,
        };
        self.inner.insert(key, entry).await;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: true,
            entries: self.inner.entry_count(),
            ttl_secs: self.ttl.as_secs(),
        }
    }
}

/// Cache that never stores anything. Used when caching is disabled.
pub struct NoopCache;

#[async_trait]
impl ResultCache for NoopCache {
    async fn get(&self, _key: &CacheKey) -> Result<Option<AggregatedResponse>, CacheError> {
        Ok(None)
    }

    async fn insert(&self, _key: CacheKey, _response: AggregatedResponse) -> Result<(), CacheError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: false,
            entries: 0,
            ttl_secs: 0,
        }
    }
}
