use mneme::adapters::local::LocalAdapter;
use mneme::adapters::{build_registry, AdapterDescriptor, AdapterKind, BackendAdapter, SearchRequest};
use mneme::config::MnemeConfig;
use mneme::db::{self, migrations};
use mneme::query::cache::NoopCache;
use mneme::query::orchestrator::{Orchestrator, OrchestratorSettings};
use mneme::query::types::{Query, QueryMode};
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn descriptor() -> AdapterDescriptor {
    AdapterDescriptor::new("local", AdapterKind::Local, 0.5, Duration::from_secs(2))
}

fn search(text: &str) -> SearchRequest {
    SearchRequest::new(text, 10, Duration::from_secs(2))
}

#[tokio::test]
async fn stored_memories_survive_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("local.db");

    let id = {
        let adapter = LocalAdapter::open(descriptor(), &path).unwrap();
        let mut meta = Map::new();
        meta.insert("tags".into(), json!(["auth"]));
        adapter.store("refresh tokens rotate hourly", &meta).await.unwrap()
    };

    let reopened = LocalAdapter::open(descriptor(), &path).unwrap();
    let hits = reopened.search(&search("rotate")).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, id);
    assert_eq!(hits[0].metadata["tags"], json!(["auth"]));
    assert!(hits[0].timestamp.is_some());
}

#[test]
fn open_creates_missing_parent_directories() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("nested").join("deeper").join("local.db");

    let conn = db::open_database(&path).unwrap();
    assert!(path.exists());
    assert_eq!(
        migrations::get_schema_version(&conn).unwrap(),
        migrations::CURRENT_SCHEMA_VERSION
    );

    let busy: i64 = conn
        .pragma_query_value(None, "busy_timeout", |row| row.get(0))
        .unwrap();
    assert_eq!(busy, 5000);
    let mode: String = conn
        .pragma_query_value(None, "journal_mode", |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[tokio::test]
async fn configured_local_store_answers_through_orchestrator() {
    let tmp = TempDir::new().unwrap();
    let mut config = MnemeConfig::default();
    config.storage.db_path = tmp.path().join("local.db").to_string_lossy().into_owned();

    let registry = build_registry(&config).unwrap();
    let orch = Orchestrator::new(registry, Arc::new(NoopCache), OrchestratorSettings::from_config(&config));

    let outcome = orch
        .store("deploy pipeline runs nightly", &Map::new(), &[])
        .await
        .unwrap();
    assert_eq!(outcome.stored.len(), 1);
    assert!(outcome.failed.is_empty());

    let response = orch
        .query(Query::new("pipeline", QueryMode::Smart))
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].content, "deploy pipeline runs nightly");
    assert!((0.0..=1.0).contains(&response.results[0].relevance_score));
}

#[tokio::test]
async fn quote_only_query_is_invalid_for_the_store() {
    let tmp = TempDir::new().unwrap();
    let adapter = LocalAdapter::open(descriptor(), &tmp.path().join("local.db")).unwrap();
    let err = adapter.search(&search("\"\" \"")).await.unwrap_err();
    assert_eq!(err.kind(), mneme::error::ErrorKind::InvalidQuery);
    assert!(adapter.health_check().await);
}
