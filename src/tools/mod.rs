pub mod store_memory;
pub mod systems_health;
pub mod unified_query;

use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use serde_json::{Map, Value};
use std::sync::Arc;
use store_memory::StoreMemoryParams;
use systems_health::SystemsHealthParams;
use unified_query::UnifiedQueryParams;

use crate::api::types::QueryResponse;
use crate::query::orchestrator::Orchestrator;
use crate::query::types::{Query, QueryMode, QueryOptions, RankingStrategy, SourceId};

/// The MCP tool handler. Exposes the orchestrator through `#[tool_router]`.
#[derive(Clone)]
pub struct MnemeTools {
    tool_router: ToolRouter<Self>,
    orchestrator: Arc<Orchestrator>,
}

#[tool_router]
impl MnemeTools {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            orchestrator,
        }
    }

    /// Query every configured knowledge source at once.
    #[tool(description = "Search across all configured knowledge sources. Results are deduplicated and ranked unless mode is 'parallel', which groups them per source.")]
    async fn unified_query(
        &self,
        Parameters(params): Parameters<UnifiedQueryParams>,
    ) -> Result<String, String> {
        let query = build_query(params)?;
        tracing::info!(mode = %query.mode, sources = query.sources.len(), "unified_query called");

        let include_metadata = query.options.include_metadata;
        let response = self
            .orchestrator
            .query(query)
            .await
            .map_err(|e| e.to_string())?;

        serde_json::to_string(&QueryResponse::from_aggregated(response, include_metadata))
            .map_err(|e| format!("serialization failed: {e}"))
    }

    /// Report the health of every source.
    #[tool(description = "Check the health of every configured knowledge source.")]
    async fn systems_health(
        &self,
        Parameters(_params): Parameters<SystemsHealthParams>,
    ) -> Result<String, String> {
        tracing::info!("systems_health called");
        let report = self.orchestrator.check_health().await;
        serde_json::to_string(&report).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Store content in one or more sources.
    #[tool(description = "Store content in the named knowledge sources (or the default set). Returns the id assigned by each source.")]
    async fn store_memory(
        &self,
        Parameters(params): Parameters<StoreMemoryParams>,
    ) -> Result<String, String> {
        let metadata = match params.metadata {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Err("metadata must be a JSON object".into()),
        };
        let sources: Vec<SourceId> = params
            .sources
            .unwrap_or_default()
            .into_iter()
            .map(SourceId::from)
            .collect();

        tracing::info!(content_len = params.content.len(), sources = sources.len(), "store_memory called");

        let outcome = self
            .orchestrator
            .store(&params.content, &metadata, &sources)
            .await
            .map_err(|e| e.to_string())?;

        serde_json::to_string(&outcome).map_err(|e| format!("serialization failed: {e}"))
    }
}

fn build_query(params: UnifiedQueryParams) -> Result<Query, String> {
    let mode: QueryMode = match params.mode.as_deref() {
        Some(m) => m.parse()?,
        None => QueryMode::default(),
    };
    let ranking_strategy = params
        .ranking_strategy
        .as_deref()
        .map(str::parse::<RankingStrategy>)
        .transpose()?;

    let defaults = QueryOptions::default();
    let options = QueryOptions {
        max_results: params.max_results.unwrap_or(defaults.max_results),
        ranking_strategy,
        ..defaults
    };

    Ok(Query::new(params.query, mode)
        .with_sources(params.sources.unwrap_or_default())
        .with_options(options))
}

#[tool_handler]
impl ServerHandler for MnemeTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Mneme fronts several knowledge stores. Use unified_query to search them together, \
                 store_memory to save content, and systems_health to see which stores are up."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
