//! Process wiring for the HTTP API and the MCP transports.
//!
//! Provides [`serve_http`] and [`serve_stdio`] entry points that build the
//! adapter registry, the result cache and the orchestrator from configuration.

use crate::adapters;
use crate::api::{self, AppState};
use crate::config::MnemeConfig;
use crate::query::cache::{MemoryCache, NoopCache, ResultCache};
use crate::query::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::tools::MnemeTools;
use anyhow::{Context, Result};
use rmcp::ServiceExt;
use std::sync::Arc;
use std::time::Duration;

/// Caching is off when disabled or when entries would expire immediately.
pub fn build_cache(config: &MnemeConfig) -> Arc<dyn ResultCache> {
    if config.cache.enabled && config.cache.ttl_secs > 0 {
        Arc::new(MemoryCache::new(
            Duration::from_secs(config.cache.ttl_secs),
            config.cache.max_entries,
        ))
    } else {
        tracing::info!("result cache disabled");
        Arc::new(NoopCache)
    }
}

/// Shared setup: adapters, cache, orchestrator.
pub fn build_orchestrator(config: &MnemeConfig) -> Result<Arc<Orchestrator>> {
    let registry = adapters::build_registry(config).context("failed to build adapter registry")?;
    if registry.is_empty() {
        tracing::warn!("no adapters enabled, every query will return no results");
    }

    let cache = build_cache(config);
    let settings = OrchestratorSettings::from_config(config);
    Ok(Arc::new(Orchestrator::new(registry, cache, settings)))
}

/// Start the HTTP API on `server.host:server.port`.
pub async fn serve_http(config: MnemeConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, "starting mneme HTTP API");

    let orchestrator = build_orchestrator(&config)?;
    let state = AppState {
        orchestrator: Arc::clone(&orchestrator),
        config: Arc::new(config),
    };

    // The same tools the stdio transport serves, over Streamable HTTP.
    let mcp_orchestrator = Arc::clone(&orchestrator);
    let mcp = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(MnemeTools::new(Arc::clone(&mcp_orchestrator))),
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );
    let router = api::router(state).nest_service("/mcp", mcp);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "listening at http://{bind_addr}/api (MCP at /mcp)");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down HTTP API");
        })
        .await?;

    orchestrator.shutdown().await;
    Ok(())
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: MnemeConfig) -> Result<()> {
    tracing::info!("starting mneme MCP server on stdio");

    let orchestrator = build_orchestrator(&config)?;
    let tools = MnemeTools::new(Arc::clone(&orchestrator));

    let server = tools.serve(rmcp::transport::stdio()).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    orchestrator.shutdown().await;
    tracing::info!("MCP server shut down");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_follows_config() {
        let mut config = MnemeConfig::default();
        assert!(build_cache(&config).stats().enabled);

        config.cache.ttl_secs = 0;
        assert!(!build_cache(&config).stats().enabled);

        config.cache.ttl_secs = 60;
        config.cache.enabled = false;
        assert!(!build_cache(&config).stats().enabled);
    }
}
