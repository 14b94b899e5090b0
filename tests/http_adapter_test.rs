use mneme::adapters::http::HttpAdapter;
use mneme::adapters::{AdapterDescriptor, AdapterKind, AdapterRegistry, BackendAdapter, SearchRequest};
use mneme::error::{AdapterError, ErrorKind};
use mneme::query::cache::NoopCache;
use mneme::query::orchestrator::{Orchestrator, OrchestratorSettings};
use mneme::query::types::{Query, QueryMode, SourceId};
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn adapter(id: &str, kind: AdapterKind, url: &str, api_key: Option<&str>) -> HttpAdapter {
    let descriptor = AdapterDescriptor::new(id, kind, 0.3, Duration::from_secs(2));
    HttpAdapter::new(descriptor, url, api_key.map(String::from), Some("handbook".into())).unwrap()
}

fn search(text: &str) -> SearchRequest {
    SearchRequest::new(text, 10, Duration::from_secs(2))
}

/// A local address nothing listens on.
fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

#[tokio::test]
async fn graph_search_is_parsed_into_hits() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/search"))
        .and(body_partial_json(json!({"query": "auth patterns", "limit": 10})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {
                    "id": 42,
                    "content": "JWT refresh tokens rotate hourly",
                    "similarity_score": 0.91,
                    "entities": [{"name": "JWT"}],
                    "keywords": ["jwt", "rotation"],
                    "graph_depth": 2,
                    "timestamp": "2026-03-01T12:00:00Z"
                },
                {"id": "n-7", "content": "Sessions expire after a day"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let graph = adapter("graph", AdapterKind::Graph, &server.uri(), None);
    let hits = graph.search(&search("auth patterns")).await.unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "42");
    assert_eq!(hits[0].score, Some(0.91));
    assert_eq!(hits[0].metadata["keywords"], json!(["jwt", "rotation"]));
    assert_eq!(hits[0].metadata["graph_depth"], json!(2));
    assert!(hits[0].timestamp.is_some());
    assert_eq!(hits[1].id, "n-7");
    assert_eq!(hits[1].score, None);
}

#[tokio::test]
async fn document_search_uses_index_tool_and_bearer_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp/tools/query_handbook"))
        .and(header("authorization", "Bearer sk-docs"))
        .and(body_partial_json(json!({"query": "onboarding", "top_k": 10})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"doc_id": "d1", "text": "Day one checklist", "score": 0.7,
                 "document_name": "onboarding.md", "page": 3, "chunk_id": 12}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let docs = adapter("docs", AdapterKind::Document, &server.uri(), Some("sk-docs"));
    let hits = docs.search(&search("onboarding")).await.unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].metadata["document_name"], json!("onboarding.md"));
    assert_eq!(hits[0].metadata["page"], json!(3));
    assert_eq!(hits[0].metadata["chunk_id"], json!("12"));
}

#[tokio::test]
async fn rejected_credentials_map_to_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let kv = adapter("kv", AdapterKind::KeyValue, &server.uri(), Some("wrong"));
    let err = kv.search(&search("auth")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
}

#[tokio::test]
async fn server_errors_map_to_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let graph = adapter("graph", AdapterKind::Graph, &server.uri(), None);
    let err = graph.search(&search("auth")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unreachable);
}

#[tokio::test]
async fn bad_request_depends_on_operation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;

    let graph = adapter("graph", AdapterKind::Graph, &server.uri(), None);
    assert_eq!(graph.search(&search("auth")).await.unwrap_err().kind(), ErrorKind::InvalidQuery);
    assert_eq!(
        graph.store("note", &Map::new()).await.unwrap_err().kind(),
        ErrorKind::ValidationFailed
    );
}

#[tokio::test]
async fn slow_reply_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"results": []}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let graph = adapter("graph", AdapterKind::Graph, &server.uri(), None);
    let request = SearchRequest::new("auth", 10, Duration::from_millis(100));
    let err = graph.search(&request).await.unwrap_err();
    assert!(matches!(err, AdapterError::Timeout(_)), "got {err:?}");
}

#[tokio::test]
async fn refused_connection_is_unreachable() {
    let graph = adapter("graph", AdapterKind::Graph, &dead_url(), None);
    let err = graph.search(&search("auth")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unreachable);
    assert!(!graph.health_check().await);
}

#[tokio::test]
async fn key_value_store_sends_derived_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/store"))
        .and(body_partial_json(json!({"value": "tokens rotate hourly"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let kv = adapter("kv", AdapterKind::KeyValue, &server.uri(), None);
    let id = kv.store("tokens rotate hourly", &Map::new()).await.unwrap();
    assert!(id.starts_with("memory_"));
    assert_eq!(id.len(), "memory_".len() + 16);

    // An explicit key wins over the derived one.
    let mut meta = Map::new();
    meta.insert("key".into(), json!("auth/rotation"));
    let server2 = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/store"))
        .and(body_partial_json(json!({"key": "auth/rotation"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"key": "auth/rotation"})))
        .mount(&server2)
        .await;
    let kv = adapter("kv", AdapterKind::KeyValue, &server2.uri(), None);
    assert_eq!(kv.store("tokens rotate hourly", &meta).await.unwrap(), "auth/rotation");
}

#[tokio::test]
async fn multi_type_store_returns_memory_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/add"))
        .and(body_partial_json(json!({"user_id": "default"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"memory_id": "m-1"})))
        .mount(&server)
        .await;

    let multi = adapter("multi", AdapterKind::MultiType, &server.uri(), None);
    assert_eq!(multi.store("remember this", &Map::new()).await.unwrap(), "m-1");
}

#[tokio::test]
async fn health_follows_status_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let healthy = adapter("graph", AdapterKind::Graph, &server.uri(), None);
    assert!(healthy.health_check().await);

    let failing = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&failing)
        .await;
    let unhealthy = adapter("graph", AdapterKind::Graph, &failing.uri(), None);
    assert!(!unhealthy.health_check().await);
}

#[tokio::test]
async fn orchestrator_survives_a_dead_remote() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"id": "1", "content": "tokens rotate hourly", "similarity_score": 0.8},
                {"id": "2", "content": "sessions expire daily", "similarity_score": 0.4}
            ]
        })))
        .mount(&server)
        .await;

    let mut registry = AdapterRegistry::new();
    registry
        .register(Arc::new(adapter("graph", AdapterKind::Graph, &server.uri(), None)))
        .unwrap();
    registry
        .register(Arc::new(adapter("kv", AdapterKind::KeyValue, &dead_url(), None)))
        .unwrap();
    let orch = Orchestrator::new(registry, Arc::new(NoopCache), OrchestratorSettings::default());

    let response = orch.query(Query::new("tokens", QueryMode::Unified)).await.unwrap();
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.results[0].id, "1");
    assert_eq!(response.sources_failed[&SourceId::new("kv")], ErrorKind::Unreachable);
    assert!(response.sources_queried.contains("graph"));
}
