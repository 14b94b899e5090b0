use anyhow::Result;

use crate::config::MnemeConfig;
use crate::query::types::{Query, QueryMode, QueryOptions};
use crate::server;

/// Run one orchestrated query from the terminal.
pub async fn search(
    config: &MnemeConfig,
    text: &str,
    mode: QueryMode,
    sources: Vec<String>,
    max_results: usize,
) -> Result<()> {
    let orchestrator = server::build_orchestrator(config)?;
    let query = Query::new(text, mode)
        .with_sources(sources)
        .with_options(QueryOptions {
            max_results,
            ..Default::default()
        });

    let response = orchestrator.query(query).await?;

    for (source, kind) in &response.sources_failed {
        println!("  ! {source} failed: {kind}");
    }

    if response.results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!(
        "Found {} result(s) from {} candidate(s) in {} ms\n",
        response.results.len(),
        response.total_candidates,
        response.took_millis
    );

    for (i, result) in response.results.iter().enumerate() {
        let preview: String = result.content.chars().take(120).collect();
        let ellipsis = if result.content.chars().count() > 120 { "..." } else { "" };

        println!(
            "  {}. [{}] {} (score: {:.4})",
            i + 1,
            result.source,
            result.id,
            result.relevance_score,
        );
        println!("     {preview}{ellipsis}");
        println!();
    }

    Ok(())
}
