//! Wire shapes of the HTTP API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorKind, QueryError};
use crate::query::types::{
    AggregatedResponse, Query, QueryMode, QueryOptions, QueryResult, RankingStrategy, SourceId,
};

/// Body of `POST /api/query`.
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub mode: QueryMode,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub options: RequestOptions,
}

/// Every field optional; unset ones keep [`QueryOptions`] defaults.
#[derive(Debug, Default, Deserialize)]
pub struct RequestOptions {
    /// Signed so that `0` and negatives reach validation instead of failing to parse.
    pub max_results: Option<i64>,
    pub include_metadata: Option<bool>,
    pub ranking_strategy: Option<RankingStrategy>,
    pub context_building: Option<bool>,
    pub refinement_iterations: Option<u32>,
    pub deduplicate: Option<bool>,
    pub filters: Option<Map<String, Value>>,
    pub user_id: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl QueryRequest {
    pub fn into_query(self) -> Result<Query, QueryError> {
        let defaults = QueryOptions::default();
        let o = self.options;

        let max_results = match o.max_results {
            None => defaults.max_results,
            Some(n) if n > 0 => usize::try_from(n).unwrap_or(usize::MAX),
            Some(n) => {
                return Err(QueryError::InvalidRequest(format!(
                    "max_results must be greater than 0, got {n}"
                )))
            }
        };

        let options = QueryOptions {
            max_results,
            include_metadata: o.include_metadata.unwrap_or(defaults.include_metadata),
            ranking_strategy: o.ranking_strategy,
            context_building: o.context_building.unwrap_or(defaults.context_building),
            refinement_iterations: o.refinement_iterations.unwrap_or(defaults.refinement_iterations),
            deduplicate: o.deduplicate.unwrap_or(defaults.deduplicate),
            filters: o.filters,
            user_id: o.user_id,
            timeout_ms: o.timeout_ms,
        };

        Ok(Query::new(self.query, self.mode)
            .with_sources(self.sources)
            .with_options(options))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResultView {
    pub id: String,
    pub content: String,
    pub source: SourceId,
    pub relevance_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ResultView {
    fn from_result(result: QueryResult, include_metadata: bool) -> Self {
        Self {
            id: result.id,
            content: result.content,
            source: result.source,
            relevance_score: result.relevance_score,
            metadata: include_metadata.then_some(result.metadata),
            timestamp: result.timestamp,
        }
    }
}

/// Body of a successful `POST /api/query`.
#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query_id: String,
    pub mode: QueryMode,
    pub results: Vec<ResultView>,
    pub total_results: usize,
    pub query_time_ms: u64,
    pub sources_queried: Vec<SourceId>,
    pub sources_failed: BTreeMap<SourceId, ErrorKind>,
    pub total_candidates: usize,
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouped_results: Option<BTreeMap<SourceId, Vec<ResultView>>>,
}

impl QueryResponse {
    pub fn from_aggregated(response: AggregatedResponse, include_metadata: bool) -> Self {
        let view = |results: Vec<QueryResult>| -> Vec<ResultView> {
            results
                .into_iter()
                .map(|r| ResultView::from_result(r, include_metadata))
                .collect()
        };

        Self {
            query_id: response.query_id,
            mode: response.mode,
            total_results: response.results.len(),
            results: view(response.results),
            query_time_ms: response.took_millis,
            sources_queried: response.sources_queried.into_iter().collect(),
            sources_failed: response.sources_failed,
            total_candidates: response.total_candidates,
            cached: response.cached,
            grouped_results: response
                .grouped_results
                .map(|groups| groups.into_iter().map(|(k, v)| (k, view(v))).collect()),
        }
    }
}

/// Body of `POST /api/store`.
#[derive(Debug, Deserialize)]
pub struct StoreRequest {
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: Value) -> QueryRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn minimal_request_takes_defaults() {
        let query = request(json!({"query": "auth"})).into_query().unwrap();
        assert_eq!(query.mode, QueryMode::Smart);
        assert!(query.sources.is_empty());
        assert_eq!(query.options, QueryOptions::default());
    }

    #[test]
    fn non_positive_max_results_is_invalid() {
        for n in [0, -3] {
            let err = request(json!({"query": "auth", "options": {"max_results": n}}))
                .into_query()
                .unwrap_err();
            assert!(matches!(err, QueryError::InvalidRequest(_)));
        }
    }

    #[test]
    fn options_are_mapped() {
        let query = request(json!({
            "query": "auth",
            "mode": "sequential",
            "sources": ["graph", "docs"],
            "options": {"max_results": 3, "ranking_strategy": "hybrid", "refinement_iterations": 2}
        }))
        .into_query()
        .unwrap();
        assert_eq!(query.mode, QueryMode::Sequential);
        assert_eq!(query.sources, vec![SourceId::new("graph"), SourceId::new("docs")]);
        assert_eq!(query.options.max_results, 3);
        assert_eq!(query.options.ranking_strategy, Some(RankingStrategy::Hybrid));
        assert_eq!(query.options.refinement_iterations, 2);
    }

    #[test]
    fn metadata_is_hidden_unless_requested() {
        let mut metadata = Map::new();
        metadata.insert("page".into(), json!(2));
        let result = QueryResult {
            id: "1".into(),
            source: SourceId::new("docs"),
            content: "c".into(),
            metadata,
            relevance_score: 0.5,
            timestamp: None,
        };
        let hidden = serde_json::to_value(ResultView::from_result(result.clone(), false)).unwrap();
        assert!(hidden.get("metadata").is_none());
        let shown = serde_json::to_value(ResultView::from_result(result, true)).unwrap();
        assert_eq!(shown["metadata"]["page"], json!(2));
    }
}
