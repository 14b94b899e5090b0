//! Shared data shapes for orchestrated queries.
//!
//! Defines [`SourceId`] (adapter identity), [`QueryMode`] and [`RankingStrategy`]
//! (policy selectors), [`QueryOptions`] and [`Query`] (the request),
//! [`QueryResult`] (one candidate from one backend) and [`AggregatedResponse`]
//! (the final answer).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorKind, QueryError};

/// Score assigned to results whose backend reported none.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Stable identifier of a registered backend adapter (e.g. `"graph"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::borrow::Borrow<str> for SourceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Execution policy governing how adapters are dispatched and combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    /// Fan out concurrently, then dedup + rank into one list.
    Unified,
    /// One adapter at a time by descending weight, carrying context forward.
    Sequential,
    /// Fan out concurrently and keep results grouped per source.
    Parallel,
    /// Unified over the configured default sources when none are given.
    #[default]
    Smart,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unified => "unified",
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Smart => "smart",
        }
    }

    /// Whether responses in this mode populate the result cache.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, Self::Parallel)
    }
}

impl std::fmt::Display for QueryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unified" => Ok(Self::Unified),
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "smart" => Ok(Self::Smart),
            _ => Err(format!("unknown query mode: {s}")),
        }
    }
}

/// Scoring function used to order the final result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingStrategy {
    #[default]
    Relevance,
    Recency,
    Hybrid,
}

impl RankingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relevance => "relevance",
            Self::Recency => "recency",
            Self::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for RankingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RankingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relevance" => Ok(Self::Relevance),
            "recency" => Ok(Self::Recency),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(format!("unknown ranking strategy: {s}")),
        }
    }
}

/// Per-request knobs. Unset fields take the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Cap on the final aggregated output only, never on per-adapter calls.
    pub max_results: usize,
    pub include_metadata: bool,
    /// `None` falls back to the configured default strategy.
    pub ranking_strategy: Option<RankingStrategy>,
    /// Sequential mode: pass prior results to the next adapter as context.
    pub context_building: bool,
    /// Sequential mode: rounds through the adapter list (0 and 1 both mean one round).
    pub refinement_iterations: u32,
    /// Skip the deduplicator when `false`.
    pub deduplicate: bool,
    /// Backend-specific filters, forwarded untouched.
    pub filters: Option<Map<String, Value>>,
    /// Forwarded to multi-type stores that partition by user.
    pub user_id: Option<String>,
    /// Overrides every adapter's default timeout for this request.
    pub timeout_ms: Option<u64>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            max_results: 10,
            include_metadata: true,
            ranking_strategy: None,
            context_building: true,
            refinement_iterations: 1,
            deduplicate: true,
            filters: None,
            user_id: None,
            timeout_ms: None,
        }
    }
}

/// One logical query against the adapter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub mode: QueryMode,
    /// Requested adapters in caller order. Empty + `Smart` means auto-select.
    #[serde(default)]
    pub sources: Vec<SourceId>,
    #[serde(default)]
    pub options: QueryOptions,
}

impl Query {
    pub fn new(text: impl Into<String>, mode: QueryMode) -> Self {
        Self {
            text: text.into(),
            mode,
            sources: Vec::new(),
            options: QueryOptions::default(),
        }
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SourceId>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// Input checks that do not need the adapter registry.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.text.trim().is_empty() {
            return Err(QueryError::InvalidRequest("query text must not be empty".into()));
        }
        if self.options.max_results == 0 {
            return Err(QueryError::InvalidRequest(
                "max_results must be greater than 0".into(),
            ));
        }
        if self.options.timeout_ms == Some(0) {
            return Err(QueryError::InvalidRequest(
                "timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// One candidate produced by one adapter. Never mutated after creation;
/// dedup and ranking only re-order or replace whole values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Adapter-local identifier; `(source, id)` is globally unique.
    pub id: String,
    pub source: SourceId,
    pub content: String,
    /// Opaque adapter-defined data, preserved through dedup and ranking.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// In `[0, 1]`.
    pub relevance_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl QueryResult {
    pub fn key(&self) -> (&SourceId, &str) {
        (&self.source, self.id.as_str())
    }
}

/// Final answer of one orchestrated query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResponse {
    /// Per-request correlation id, never user supplied.
    pub query_id: String,
    pub mode: QueryMode,
    /// Ranked, deduplicated, at most `max_results` long.
    pub results: Vec<QueryResult>,
    /// Parallel mode only: untouched per-source result lists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouped_results: Option<BTreeMap<SourceId, Vec<QueryResult>>>,
    pub sources_queried: BTreeSet<SourceId>,
    pub sources_failed: BTreeMap<SourceId, ErrorKind>,
    /// Candidates seen before dedup and truncation.
    pub total_candidates: usize,
    pub took_millis: u64,
    #[serde(default)]
    pub cached: bool,
}

/// Lowercase and collapse runs of whitespace to single spaces.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips_through_str() {
        for mode in [
            QueryMode::Unified,
            QueryMode::Sequential,
            QueryMode::Parallel,
            QueryMode::Smart,
        ] {
            assert_eq!(mode.as_str().parse::<QueryMode>().unwrap(), mode);
        }
        assert!("broadcast".parse::<QueryMode>().is_err());
    }

    #[test]
    fn only_parallel_is_not_cacheable() {
        assert!(QueryMode::Unified.is_cacheable());
        assert!(QueryMode::Sequential.is_cacheable());
        assert!(QueryMode::Smart.is_cacheable());
        assert!(!QueryMode::Parallel.is_cacheable());
    }

    #[test]
    fn options_fill_defaults_from_partial_json() {
        let opts: QueryOptions =
            serde_json::from_str(r#"{"max_results": 3, "ranking_strategy": "hybrid"}"#).unwrap();
        assert_eq!(opts.max_results, 3);
        assert_eq!(opts.ranking_strategy, Some(RankingStrategy::Hybrid));
        assert!(opts.include_metadata);
        assert!(opts.deduplicate);
        assert_eq!(opts.refinement_iterations, 1);
    }

    #[test]
    fn validate_rejects_blank_text() {
        let q = Query::new("   \t", QueryMode::Unified);
        assert!(matches!(q.validate(), Err(QueryError::InvalidRequest(_))));
    }

    #[test]
    fn validate_rejects_zero_max_results() {
        let q = Query::new("auth patterns", QueryMode::Unified).with_options(QueryOptions {
            max_results: 0,
            ..Default::default()
        });
        assert!(matches!(q.validate(), Err(QueryError::InvalidRequest(_))));
    }

    #[test]
    fn normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize_text("  Auth\n  PATTERNS\tfor  Rust "), "auth patterns for rust");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn source_id_serializes_as_plain_string() {
        let id = SourceId::new("graph");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"graph\"");
    }
}
