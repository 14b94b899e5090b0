mod helpers;

use helpers::{orchestrator, ScriptedAdapter};
use mneme::api::{router, AppState};
use mneme::config::MnemeConfig;
use serde_json::{json, Value};
use std::sync::Arc;

/// Serve the API on an ephemeral port and return its base URL.
async fn spawn_api(adapters: &[Arc<ScriptedAdapter>], config: MnemeConfig) -> String {
    let state = AppState {
        orchestrator: Arc::new(orchestrator(adapters)),
        config: Arc::new(config),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{addr}")
}

fn adapters() -> Vec<Arc<ScriptedAdapter>> {
    vec![
        Arc::new(ScriptedAdapter::new("graph", 0.3).with_scores(&[0.9, 0.7, 0.5, 0.3])),
        Arc::new(ScriptedAdapter::new("docs", 0.2).with_scores(&[0.8, 0.6, 0.2])),
    ]
}

async fn post(url: &str, body: Value) -> (u16, Value) {
    let response = reqwest::Client::new().post(url).json(&body).send().await.unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

async fn get(url: &str) -> (u16, Value) {
    let response = reqwest::get(url).await.unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn query_returns_ranked_results() {
    let base = spawn_api(&adapters(), MnemeConfig::default()).await;

    let (status, body) = post(
        &format!("{base}/api/query"),
        json!({
            "query": "auth patterns",
            "mode": "unified",
            "sources": ["graph", "docs"],
            "options": {"max_results": 5}
        }),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["mode"], "unified");
    assert_eq!(body["total_results"], 5);
    assert_eq!(body["total_candidates"], 7);
    assert_eq!(body["cached"], false);
    assert_eq!(body["sources_queried"], json!(["docs", "graph"]));
    assert_eq!(body["sources_failed"], json!({}));
    assert!(body["query_id"].as_str().is_some_and(|id| !id.is_empty()));

    let scores: Vec<f64> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["relevance_score"].as_f64().unwrap())
        .collect();
    assert_eq!(scores, vec![0.9, 0.8, 0.7, 0.6, 0.5]);
    assert!(body["results"][0].get("metadata").is_some());
    assert!(body.get("grouped_results").is_none());
}

#[tokio::test]
async fn metadata_can_be_left_out() {
    let base = spawn_api(&adapters(), MnemeConfig::default()).await;
    let (status, body) = post(
        &format!("{base}/api/query"),
        json!({"query": "auth", "options": {"include_metadata": false}}),
    )
    .await;

    assert_eq!(status, 200);
    assert!(body["results"][0].get("metadata").is_none());
}

#[tokio::test]
async fn parallel_query_exposes_groups() {
    let base = spawn_api(&adapters(), MnemeConfig::default()).await;
    let (status, body) = post(
        &format!("{base}/api/query"),
        json!({"query": "auth", "mode": "parallel", "options": {"max_results": 2}}),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["grouped_results"]["graph"].as_array().unwrap().len(), 2);
    assert_eq!(body["grouped_results"]["docs"].as_array().unwrap().len(), 2);
    assert_eq!(body["total_results"], 2);
}

#[tokio::test]
async fn invalid_queries_are_bad_requests() {
    let base = spawn_api(&adapters(), MnemeConfig::default()).await;
    let url = format!("{base}/api/query");

    for body in [
        json!({"query": ""}),
        json!({"query": "   "}),
        json!({"query": "auth", "options": {"max_results": 0}}),
        json!({"query": "auth", "sources": ["nowhere"]}),
        json!({"query": "auth", "mode": "broadcast"}),
        json!({"mode": "unified"}),
    ] {
        let (status, reply) = post(&url, body.clone()).await;
        assert_eq!(status, 400, "body {body}");
        assert_eq!(reply["error"], "invalid_request");
        assert!(reply["message"].as_str().is_some_and(|m| !m.is_empty()));
    }
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let base = spawn_api(&adapters(), MnemeConfig::default()).await;
    let response = reqwest::Client::new()
        .post(format!("{base}/api/query"))
        .header("content-type", "application/json")
        .body("{\"query\": ")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn partial_failure_is_still_ok() {
    let adapters = vec![
        Arc::new(ScriptedAdapter::new("graph", 0.3).with_scores(&[0.9])),
        Arc::new(
            ScriptedAdapter::new("kv", 0.2)
                .failing(mneme::error::AdapterError::Unreachable("connection refused".into())),
        ),
    ];
    let base = spawn_api(&adapters, MnemeConfig::default()).await;
    let (status, body) = post(&format!("{base}/api/query"), json!({"query": "auth"})).await;

    assert_eq!(status, 200);
    assert_eq!(body["sources_failed"], json!({"kv": "unreachable"}));
    assert_eq!(body["sources_queried"], json!(["graph"]));
}

#[tokio::test]
async fn liveness_answers_without_probing_adapters() {
    let down = vec![Arc::new(ScriptedAdapter::new("graph", 0.3).unhealthy())];
    let base = spawn_api(&down, MnemeConfig::default()).await;
    let (status, body) = get(&format!("{base}/health")).await;

    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "mneme");
}

#[tokio::test]
async fn systems_health_reports_each_adapter() {
    let adapters = vec![
        Arc::new(ScriptedAdapter::new("graph", 0.3)),
        Arc::new(ScriptedAdapter::new("kv", 0.2).unhealthy()),
    ];
    let base = spawn_api(&adapters, MnemeConfig::default()).await;
    let (status, body) = get(&format!("{base}/api/systems/health")).await;

    assert_eq!(status, 200);
    assert_eq!(body["systems"]["graph"]["status"], "healthy");
    assert_eq!(body["systems"]["kv"]["status"], "unhealthy");
    assert!(body["systems"]["kv"]["response_time_ms"].is_u64());
    assert_eq!(body["overall_status"], "degraded");
}

#[tokio::test]
async fn stats_reflect_served_queries() {
    let base = spawn_api(&adapters(), MnemeConfig::default()).await;
    let url = format!("{base}/api/query");
    post(&url, json!({"query": "auth", "mode": "unified"})).await;
    post(&url, json!({"query": "auth", "mode": "unified"})).await;

    let (status, body) = get(&format!("{base}/api/stats")).await;
    assert_eq!(status, 200);
    assert_eq!(body["queries"]["total_queries"], 2);
    assert_eq!(body["queries"]["cache_hits"], 1);
    assert_eq!(body["queries"]["queries_by_mode"]["unified"], 2);
    assert_eq!(body["cache"]["enabled"], true);
    assert_eq!(body["adapters"], json!(["graph", "docs"]));
}

#[tokio::test]
async fn config_never_exposes_api_keys() {
    let mut config = MnemeConfig::default();
    config.adapters.get_mut("graph").unwrap().api_key = Some("sk-secret".into());
    let base = spawn_api(&adapters(), config).await;

    let response = reqwest::get(format!("{base}/api/config")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let text = response.text().await.unwrap();
    assert!(!text.contains("sk-secret"));

    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["adapters"]["graph"]["kind"], "graph");
    assert!(body["adapters"]["graph"].get("api_key").is_none());
    assert_eq!(body["orchestrator"]["query_timeout_ms"], 30000);
}

#[tokio::test]
async fn store_reports_stored_and_failed_sources() {
    let adapters = vec![
        Arc::new(ScriptedAdapter::new("graph", 0.3)),
        Arc::new(
            ScriptedAdapter::new("kv", 0.2)
                .failing(mneme::error::AdapterError::ValidationFailed("too long".into())),
        ),
    ];
    let base = spawn_api(&adapters, MnemeConfig::default()).await;
    let url = format!("{base}/api/store");

    let (status, body) = post(&url, json!({"content": "tokens rotate hourly", "metadata": {"tags": ["auth"]}})).await;
    assert_eq!(status, 200);
    assert_eq!(body["stored"]["graph"], "graph-stored");
    assert_eq!(body["failed"]["kv"], "validation_failed");

    let (status, _) = post(&url, json!({"content": ""})).await;
    assert_eq!(status, 400);
    let (status, _) = post(&url, json!({"content": "x", "sources": ["nowhere"]})).await;
    assert_eq!(status, 400);
}
