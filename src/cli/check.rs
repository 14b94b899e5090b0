//! CLI `check` command: probe every enabled adapter and print a health report.

use anyhow::Result;

use crate::config::MnemeConfig;
use crate::query::orchestrator::{HealthStatus, OverallStatus};
use crate::server;

/// Run health checks and print a report. Returns `false` when nothing is healthy.
pub async fn check(config: &MnemeConfig) -> Result<bool> {
    let orchestrator = server::build_orchestrator(config)?;
    let report = orchestrator.check_health().await;

    println!("Mneme Health Report");
    println!("===================");
    println!();
    println!("Adapters:");
    for (id, adapter) in &config.adapters {
        let target = adapter
            .url
            .as_deref()
            .map(str::to_string)
            .unwrap_or_else(|| config.resolved_db_path().display().to_string());

        let line = match report.systems.get(id.as_str()) {
            Some(health) => {
                let status = match health.status {
                    HealthStatus::Healthy => "OK",
                    HealthStatus::Unhealthy => "FAILED",
                };
                format!("{status:<8} {:>5} ms", health.response_time_ms)
            }
            None => "disabled".to_string(),
        };
        println!("  {id:<10} {:<11} {line:<18} {target}", adapter.kind.as_str());
    }
    println!();

    let overall = match report.overall_status {
        OverallStatus::Healthy => "HEALTHY",
        OverallStatus::Degraded => "DEGRADED",
        OverallStatus::Unhealthy => "UNHEALTHY",
    };
    println!("Overall:           {overall}");
    println!("Query timeout:     {} ms", config.orchestrator.query_timeout_ms);
    println!(
        "Cache:             {}",
        if config.cache.enabled {
            format!("on ({}s TTL, {} entries max)", config.cache.ttl_secs, config.cache.max_entries)
        } else {
            "off".to_string()
        }
    );

    if report.overall_status == OverallStatus::Unhealthy {
        println!();
        println!("No adapter answered. Enable one in ~/.mneme/config.toml or set MNEME_<ID>_URL.");
    }

    Ok(report.overall_status != OverallStatus::Unhealthy)
}
