//! MCP `unified_query` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `unified_query` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct UnifiedQueryParams {
    #[schemars(description = "Natural language or keyword query")]
    pub query: String,

    #[schemars(
        description = "Execution mode: 'unified' (merge and rank), 'sequential' (one source at a time, carrying context), 'parallel' (grouped per source), 'smart' (default sources). Defaults to 'smart'."
    )]
    pub mode: Option<String>,

    #[schemars(description = "Source ids to consult. Omit to use the default set.")]
    pub sources: Option<Vec<String>>,

    #[schemars(description = "Maximum number of results to return. Defaults to 10.")]
    pub max_results: Option<usize>,

    #[schemars(description = "Ranking strategy: 'relevance', 'recency' or 'hybrid'")]
    pub ranking_strategy: Option<String>,
}
