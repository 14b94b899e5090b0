//! Query Orchestrator: validate, consult the cache, dispatch per mode, then
//! dedup and rank into one [`AggregatedResponse`].
//!
//! Adapter failures never fail a query. They are recorded in
//! `sources_failed` and the query answers from whatever else returned.
//! Only malformed input ([`QueryError::InvalidRequest`]) or a broken internal
//! invariant ([`QueryError::Internal`]) propagate to the caller.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::cache::{CacheKey, CacheStats, ResultCache};
use super::dedup::dedupe;
use super::dispatch::{call_one, fan_out, SourceOutcome};
use super::ranking::{rank, HybridWeights};
use super::stats::{QueryStats, StatsSnapshot};
use super::types::{AggregatedResponse, Query, QueryMode, QueryResult, RankingStrategy, SourceId};
use crate::adapters::{AdapterRegistry, BackendAdapter, SearchRequest};
use crate::config::MnemeConfig;
use crate::error::{ErrorKind, QueryError};

/// Cap on `key_terms` and `entities` carried between Sequential steps.
const CONTEXT_TERMS_LIMIT: usize = 10;

/// Orchestrator tuning, usually derived from [`MnemeConfig`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Global ceiling for one orchestrated query.
    pub query_timeout: Duration,
    /// Per-adapter candidate budget is `max_results * candidate_multiplier`.
    pub candidate_multiplier: usize,
    /// Prior results carried forward as Sequential context.
    pub context_top_k: usize,
    pub health_timeout: Duration,
    /// Smart-mode adapter set when the caller names none. Empty means all.
    pub default_sources: Vec<SourceId>,
    pub default_strategy: RankingStrategy,
    pub hybrid: HybridWeights,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(30),
            candidate_multiplier: 3,
            context_top_k: 5,
            health_timeout: Duration::from_secs(5),
            default_sources: Vec::new(),
            default_strategy: RankingStrategy::Relevance,
            hybrid: HybridWeights::default(),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &MnemeConfig) -> Self {
        Self {
            query_timeout: Duration::from_millis(config.orchestrator.query_timeout_ms),
            candidate_multiplier: config.orchestrator.candidate_multiplier.max(1),
            context_top_k: config.orchestrator.context_top_k,
            health_timeout: Duration::from_millis(config.orchestrator.health_timeout_ms),
            default_sources: config
                .orchestrator
                .default_sources
                .iter()
                .map(|s| SourceId::new(s.as_str()))
                .collect(),
            default_strategy: config.ranking.default_strategy,
            hybrid: HybridWeights {
                alpha: config.ranking.alpha,
                beta: config.ranking.beta,
                gamma: config.ranking.gamma,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub response_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub systems: BTreeMap<SourceId, SystemHealth>,
    pub overall_status: OverallStatus,
}

/// Outcome of fanning `store` out to several adapters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreOutcome {
    pub stored: BTreeMap<SourceId, String>,
    pub failed: BTreeMap<SourceId, ErrorKind>,
}

/// Everything collected from adapters before dedup and ranking.
#[derive(Default)]
struct Collected {
    pool: Vec<QueryResult>,
    queried: BTreeSet<SourceId>,
    failed: BTreeMap<SourceId, ErrorKind>,
}

impl Collected {
    fn absorb(&mut self, outcome: SourceOutcome) -> Option<Vec<QueryResult>> {
        match outcome.outcome {
            Ok(results) => {
                self.queried.insert(outcome.source.clone());
                self.failed.remove(&outcome.source);
                Some(results)
            }
            Err(e) => {
                self.failed.insert(outcome.source, e.kind());
                None
            }
        }
    }
}

pub struct Orchestrator {
    registry: AdapterRegistry,
    cache: Arc<dyn ResultCache>,
    settings: OrchestratorSettings,
    stats: QueryStats,
}

impl Orchestrator {
    pub fn new(
        registry: AdapterRegistry,
        cache: Arc<dyn ResultCache>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            cache,
            settings,
            stats: QueryStats::new(),
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run one orchestrated query.
    pub async fn query(&self, query: Query) -> Result<AggregatedResponse, QueryError> {
        let started = Instant::now();

        let adapters = match query.validate().and_then(|_| self.resolve_sources(&query)) {
            Ok(adapters) => adapters,
            Err(e) => {
                self.stats.record_invalid();
                tracing::info!(error = %e, "query rejected");
                return Err(e);
            }
        };

        let strategy = query
            .options
            .ranking_strategy
            .unwrap_or(self.settings.default_strategy);
        let source_ids: Vec<SourceId> = adapters.iter().map(|a| a.id().clone()).collect();
        let weights: HashMap<SourceId, f64> = adapters
            .iter()
            .map(|a| (a.id().clone(), a.descriptor().weight))
            .collect();

        let cache_key = query
            .mode
            .is_cacheable()
            .then(|| CacheKey::for_query(&query, &source_ids, strategy));

        if let Some(key) = &cache_key {
            match self.cache.get(key).await {
                Ok(Some(mut cached)) => {
                    cached.query_id = new_query_id();
                    cached.took_millis = started.elapsed().as_millis() as u64;
                    cached.cached = true;
                    self.stats.record_cache_hit(query.mode, cached.took_millis);
                    tracing::info!(
                        query_id = %cached.query_id,
                        mode = %query.mode,
                        results = cached.results.len(),
                        "query served from cache"
                    );
                    return Ok(cached);
                }
                Ok(None) => self.stats.record_cache_miss(),
                Err(e) => {
                    self.stats.record_cache_miss();
                    tracing::warn!(error = %e, "cache lookup failed, computing fresh");
                }
            }
        }

        let global_deadline = started + self.settings.query_timeout;
        let template = self.search_template(&query, global_deadline);
        let timeout_override = query.options.timeout_ms.map(Duration::from_millis);

        let (results, grouped, collected, total_candidates) = match query.mode {
            QueryMode::Parallel => {
                let outcomes = fan_out(&adapters, &template, timeout_override, global_deadline).await;
                let (results, grouped, collected, total) =
                    self.assemble_parallel(outcomes, query.options.max_results);
                (results, Some(grouped), collected, total)
            }
            QueryMode::Sequential => {
                let collected = self
                    .run_sequential(&adapters, &query, &template, timeout_override, global_deadline)
                    .await;
                let total = collected.pool.len();
                let results = self.merge_and_rank(&collected, &query, strategy, &weights)?;
                (results, None, collected, total)
            }
            QueryMode::Unified | QueryMode::Smart => {
                let mut collected = Collected::default();
                for outcome in fan_out(&adapters, &template, timeout_override, global_deadline).await {
                    if let Some(results) = collected.absorb(outcome) {
                        collected.pool.extend(results);
                    }
                }
                let total = collected.pool.len();
                let results = self.merge_and_rank(&collected, &query, strategy, &weights)?;
                (results, None, collected, total)
            }
        };

        let response = AggregatedResponse {
            query_id: new_query_id(),
            mode: query.mode,
            results,
            grouped_results: grouped,
            sources_queried: collected.queried,
            sources_failed: collected.failed,
            total_candidates,
            took_millis: started.elapsed().as_millis() as u64,
            cached: false,
        };

        self.stats.record_query(
            query.mode,
            &response.sources_queried,
            &response.sources_failed,
            response.took_millis,
        );

        // Degraded answers are not cached so a transient backend failure
        // does not outlive the query that saw it.
        if let Some(key) = cache_key.filter(|_| response.sources_failed.is_empty()) {
            if let Err(e) = self.cache.insert(key, response.clone()).await {
                tracing::warn!(error = %e, "cache insert failed");
            }
        }

        tracing::info!(
            query_id = %response.query_id,
            mode = %response.mode,
            results = response.results.len(),
            candidates = response.total_candidates,
            failed = response.sources_failed.len(),
            took_ms = response.took_millis,
            "query complete"
        );

        Ok(response)
    }

    /// Store `content` in every named adapter (or the default set) concurrently.
    pub async fn store(
        &self,
        content: &str,
        metadata: &Map<String, Value>,
        sources: &[SourceId],
    ) -> Result<StoreOutcome, QueryError> {
        if content.trim().is_empty() {
            self.stats.record_invalid();
            return Err(QueryError::InvalidRequest("content must not be empty".into()));
        }

        let adapters = if sources.is_empty() {
            self.default_adapters()?
        } else {
            self.lookup(sources)?
        };

        let mut set = JoinSet::new();
        for adapter in adapters {
            let content = content.to_string();
            let metadata = metadata.clone();
            set.spawn(async move {
                let timeout = adapter.descriptor().timeout;
                let result = match tokio::time::timeout(timeout, adapter.store(&content, &metadata)).await {
                    Ok(result) => result,
                    Err(_) => Err(crate::error::AdapterError::Timeout(format!(
                        "store did not finish within {}ms",
                        timeout.as_millis()
                    ))),
                };
                (adapter.id().clone(), result)
            });
        }

        let mut outcome = StoreOutcome::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((source, Ok(id))) => {
                    outcome.stored.insert(source, id);
                }
                Ok((source, Err(e))) => {
                    tracing::warn!(source = %source, kind = %e.kind(), error = %e, "store failed");
                    outcome.failed.insert(source, e.kind());
                }
                Err(join_error) => {
                    tracing::error!(error = %join_error, "store task did not complete");
                }
            }
        }

        if !outcome.stored.is_empty() {
            // New content can change any cached answer.
            if let Err(e) = self.cache.clear().await {
                tracing::warn!(error = %e, "cache clear after store failed");
            }
        }

        tracing::info!(stored = outcome.stored.len(), failed = outcome.failed.len(), "store complete");
        Ok(outcome)
    }

    /// Probe every registered adapter concurrently, each bounded by the health timeout.
    pub async fn check_health(&self) -> HealthReport {
        let timeout = self.settings.health_timeout;
        let mut set = JoinSet::new();

        for adapter in self.registry.iter() {
            let adapter = Arc::clone(adapter);
            set.spawn(async move {
                let started = Instant::now();
                let healthy = tokio::time::timeout(timeout, adapter.health_check())
                    .await
                    .unwrap_or(false);
                let health = SystemHealth {
                    status: if healthy {
                        HealthStatus::Healthy
                    } else {
                        HealthStatus::Unhealthy
                    },
                    response_time_ms: started.elapsed().as_millis() as u64,
                };
                (adapter.id().clone(), health)
            });
        }

        let mut systems = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((source, health)) => {
                    systems.insert(source, health);
                }
                Err(join_error) => tracing::error!(error = %join_error, "health task did not complete"),
            }
        }

        // Panicked probes count as unhealthy.
        for id in self.registry.ids() {
            systems.entry(id).or_insert(SystemHealth {
                status: HealthStatus::Unhealthy,
                response_time_ms: 0,
            });
        }

        let healthy = systems
            .values()
            .filter(|h| h.status == HealthStatus::Healthy)
            .count();
        let overall_status = if systems.is_empty() || healthy == 0 {
            OverallStatus::Unhealthy
        } else if healthy == systems.len() {
            OverallStatus::Healthy
        } else {
            OverallStatus::Degraded
        };

        HealthReport {
            systems,
            overall_status,
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// End the cache lifecycle. Queries still work afterwards, uncached entries simply recompute.
    pub async fn shutdown(&self) {
        if let Err(e) = self.cache.clear().await {
            tracing::warn!(error = %e, "cache clear on shutdown failed");
        }
        tracing::info!("orchestrator shut down");
    }

    fn lookup(&self, sources: &[SourceId]) -> Result<Vec<Arc<dyn BackendAdapter>>, QueryError> {
        let mut seen = HashSet::new();
        let mut adapters = Vec::new();
        for source in sources {
            if !seen.insert(source.as_str()) {
                continue;
            }
            let adapter = self
                .registry
                .get(source.as_str())
                .ok_or_else(|| QueryError::InvalidRequest(format!("unknown source: {source}")))?;
            adapters.push(adapter);
        }
        Ok(adapters)
    }

    fn default_adapters(&self) -> Result<Vec<Arc<dyn BackendAdapter>>, QueryError> {
        if self.settings.default_sources.is_empty() {
            Ok(self.registry.iter().cloned().collect())
        } else {
            self.lookup(&self.settings.default_sources)
        }
    }

    /// Named sources in caller order, or the default set when none are named.
    fn resolve_sources(&self, query: &Query) -> Result<Vec<Arc<dyn BackendAdapter>>, QueryError> {
        if !query.sources.is_empty() {
            return self.lookup(&query.sources);
        }
        match query.mode {
            QueryMode::Smart => self.default_adapters(),
            _ => Ok(self.registry.iter().cloned().collect()),
        }
    }

    fn search_template(&self, query: &Query, global_deadline: Instant) -> SearchRequest {
        let limit = query
            .options
            .max_results
            .saturating_mul(self.settings.candidate_multiplier);
        let mut template = SearchRequest::new(
            query.text.clone(),
            limit,
            global_deadline.saturating_duration_since(Instant::now()),
        );
        template.filters = query.options.filters.clone();
        template.user_id = query.options.user_id.clone();
        template
    }

    fn merge_and_rank(
        &self,
        collected: &Collected,
        query: &Query,
        strategy: RankingStrategy,
        weights: &HashMap<SourceId, f64>,
    ) -> Result<Vec<QueryResult>, QueryError> {
        let pool = if query.options.deduplicate {
            dedupe(collected.pool.clone())
        } else {
            collected.pool.clone()
        };
        let expected = pool.len();

        let mut ranked = rank(
            pool,
            strategy,
            weights,
            &self.settings.hybrid,
            Utc::now(),
        );
        if ranked.len() != expected {
            tracing::error!(expected, got = ranked.len(), "ranking changed the candidate count");
            return Err(QueryError::Internal("ranking dropped or invented candidates".into()));
        }

        ranked.truncate(query.options.max_results);
        Ok(ranked)
    }

    /// Per-source groups plus a round-robin interleave across them.
    fn assemble_parallel(
        &self,
        outcomes: Vec<SourceOutcome>,
        max_results: usize,
    ) -> (
        Vec<QueryResult>,
        BTreeMap<SourceId, Vec<QueryResult>>,
        Collected,
        usize,
    ) {
        let mut collected = Collected::default();
        let mut ordered_groups: Vec<Vec<QueryResult>> = Vec::new();
        let mut grouped = BTreeMap::new();
        let mut total = 0;

        for outcome in outcomes {
            let source = outcome.source.clone();
            if let Some(mut results) = collected.absorb(outcome) {
                total += results.len();
                results.truncate(max_results);
                grouped.insert(source, results.clone());
                ordered_groups.push(results);
            }
        }

        let mut interleaved = Vec::new();
        let longest = ordered_groups.iter().map(Vec::len).max().unwrap_or(0);
        'outer: for i in 0..longest {
            for group in &ordered_groups {
                if let Some(result) = group.get(i) {
                    if interleaved.len() == max_results {
                        break 'outer;
                    }
                    interleaved.push(result.clone());
                }
            }
        }

        (interleaved, grouped, collected, total)
    }

    /// Rounds over the adapters by descending weight, one call at a time.
    async fn run_sequential(
        &self,
        adapters: &[Arc<dyn BackendAdapter>],
        query: &Query,
        template: &SearchRequest,
        timeout_override: Option<Duration>,
        global_deadline: Instant,
    ) -> Collected {
        let mut ordered: Vec<Arc<dyn BackendAdapter>> = adapters.to_vec();
        // Stable: equal weights keep the caller's order.
        ordered.sort_by(|a, b| b.descriptor().weight.total_cmp(&a.descriptor().weight));

        let rounds = query.options.refinement_iterations.max(1);
        let mut collected = Collected::default();
        let mut seen: HashSet<(SourceId, String)> = HashSet::new();
        let mut context = Map::new();
        let mut retired: HashSet<SourceId> = HashSet::new();

        'rounds: for round in 0..rounds {
            let mut new_in_round = 0usize;

            for adapter in &ordered {
                if collected.failed.contains_key(adapter.id()) || retired.contains(adapter.id()) {
                    continue;
                }
                if Instant::now() >= global_deadline {
                    tracing::info!(round, "sequential query hit its deadline, stopping early");
                    break 'rounds;
                }

                let mut request = template.clone();
                if query.options.context_building {
                    request.context = context.clone();
                }

                let outcome =
                    call_one(Arc::clone(adapter), &request, timeout_override, global_deadline).await;

                // A source that answered in an earlier round keeps its results
                // and stays queried; it is only dropped from later rounds.
                if let Err(e) = &outcome.outcome {
                    if collected.queried.contains(&outcome.source) {
                        if Instant::now() >= global_deadline {
                            tracing::info!(
                                round,
                                source = %outcome.source,
                                "sequential query hit its deadline, stopping early"
                            );
                            break 'rounds;
                        }
                        tracing::debug!(
                            round,
                            source = %outcome.source,
                            kind = %e.kind(),
                            "refinement call failed, keeping earlier results"
                        );
                        retired.insert(outcome.source);
                        continue;
                    }
                }

                if let Some(results) = collected.absorb(outcome) {
                    for result in results {
                        if seen.insert((result.source.clone(), result.id.clone())) {
                            new_in_round += 1;
                        }
                        collected.pool.push(result);
                    }
                    if query.options.context_building {
                        context = build_context(&collected.pool, self.settings.context_top_k);
                    }
                }
            }

            if new_in_round == 0 {
                tracing::debug!(round, "round produced nothing new, stopping");
                break;
            }
        }

        collected
    }
}

/// Context handed to the next Sequential adapter: the top-K prior contents
/// plus keywords and entities seen so far.
fn build_context(pool: &[QueryResult], top_k: usize) -> Map<String, Value> {
    let mut by_score: Vec<&QueryResult> = pool.iter().collect();
    by_score.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));

    let prior: Vec<&str> = by_score
        .iter()
        .take(top_k)
        .map(|r| r.content.as_str())
        .collect();

    let mut context = Map::new();
    context.insert("prior_results".into(), json!(prior));

    let key_terms = collect_terms(pool, "keywords");
    if !key_terms.is_empty() {
        context.insert("key_terms".into(), json!(key_terms));
    }
    let entities = collect_terms(pool, "entities");
    if !entities.is_empty() {
        context.insert("entities".into(), json!(entities));
    }
    context
}

/// Distinct strings under `field` (string array or objects with `name`), first seen first.
fn collect_terms(pool: &[QueryResult], field: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut terms = Vec::new();

    for result in pool {
        let Some(Value::Array(values)) = result.metadata.get(field) else {
            continue;
        };
        for value in values {
            let term = match value {
                Value::String(s) => s.as_str(),
                Value::Object(o) => match o.get("name").and_then(Value::as_str) {
                    Some(name) => name,
                    None => continue,
                },
                _ => continue,
            };
            if seen.insert(term.to_string()) {
                terms.push(term.to_string());
                if terms.len() == CONTEXT_TERMS_LIMIT {
                    return terms;
                }
            }
        }
    }
    terms
}

fn new_query_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
