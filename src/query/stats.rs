//! Running counters over orchestrated queries.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use super::types::{QueryMode, SourceId};
use crate::error::ErrorKind;

#[derive(Debug, Default)]
struct Counters {
    total_queries: u64,
    by_mode: BTreeMap<String, u64>,
    by_source: BTreeMap<SourceId, u64>,
    failures_by_source: BTreeMap<SourceId, u64>,
    invalid_requests: u64,
    total_latency_ms: u64,
    cache_hits: u64,
    cache_misses: u64,
}

/// Serialisable view of [`QueryStats`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatsSnapshot {
    pub total_queries: u64,
    pub queries_by_mode: BTreeMap<String, u64>,
    pub queries_by_source: BTreeMap<SourceId, u64>,
    pub failures_by_source: BTreeMap<SourceId, u64>,
    pub invalid_requests: u64,
    pub average_latency_ms: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
}

#[derive(Debug, Default)]
pub struct QueryStats {
    counters: Mutex<Counters>,
}

impl QueryStats {
    pub fn new() -> Self {
        Self::default()
    }

    // Counters stay usable even if a recording thread panicked.
    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a query answered by dispatching to adapters.
    pub fn record_query(
        &self,
        mode: QueryMode,
        queried: &BTreeSet<SourceId>,
        failed: &BTreeMap<SourceId, ErrorKind>,
        took_ms: u64,
    ) {
        let mut c = self.lock();
        c.total_queries += 1;
        c.total_latency_ms += took_ms;
        *c.by_mode.entry(mode.as_str().to_string()).or_default() += 1;
        let touched: BTreeSet<&SourceId> = queried.iter().chain(failed.keys()).collect();
        for source in touched {
            *c.by_source.entry(source.clone()).or_default() += 1;
        }
        for source in failed.keys() {
            *c.failures_by_source.entry(source.clone()).or_default() += 1;
        }
    }

    /// Record a query answered from the cache.
    pub fn record_cache_hit(&self, mode: QueryMode, took_ms: u64) {
        let mut c = self.lock();
        c.total_queries += 1;
        c.total_latency_ms += took_ms;
        c.cache_hits += 1;
        *c.by_mode.entry(mode.as_str().to_string()).or_default() += 1;
    }

    pub fn record_cache_miss(&self) {
        self.lock().cache_misses += 1;
    }

    pub fn record_invalid(&self) {
        self.lock().invalid_requests += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = self.lock();
        let lookups = c.cache_hits + c.cache_misses;
        StatsSnapshot {
            total_queries: c.total_queries,
            queries_by_mode: c.by_mode.clone(),
            queries_by_source: c.by_source.clone(),
            failures_by_source: c.failures_by_source.clone(),
            invalid_requests: c.invalid_requests,
            average_latency_ms: if c.total_queries == 0 {
                0.0
            } else {
                c.total_latency_ms as f64 / c.total_queries as f64
            },
            cache_hits: c.cache_hits,
            cache_misses: c.cache_misses,
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                c.cache_hits as f64 / lookups as f64
            },
        }
    }
}
