//! Adapter for remote knowledge stores reached over HTTP/JSON.
//!
//! One client, four wire dialects chosen by [`AdapterKind`]: a semantic graph
//! store, a key-value memory store, a multi-type memory store, and a document
//! index. Every dialect shares the same status mapping and the same `GET /health`
//! probe.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{AdapterDescriptor, AdapterKind, BackendAdapter, Hit, SearchRequest};
use crate::error::AdapterError;

const DEFAULT_INDEX: &str = "default";
const DEFAULT_USER: &str = "default";

pub struct HttpAdapter {
    descriptor: AdapterDescriptor,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    index_name: String,
}

impl HttpAdapter {
    pub fn new(
        descriptor: AdapterDescriptor,
        base_url: &str,
        api_key: Option<String>,
        index_name: Option<String>,
    ) -> Result<Self> {
        if !descriptor.kind.is_remote() {
            bail!("adapter kind {} is not served over http", descriptor.kind);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(descriptor.timeout)
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            descriptor,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            index_name: index_name.unwrap_or_else(|| DEFAULT_INDEX.to_string()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// POST `body` to `path` and decode the JSON reply.
    async fn post(
        &self,
        path: &str,
        body: &Value,
        timeout: Duration,
        op: Operation,
    ) -> Result<Value, AdapterError> {
        let mut builder = self.client.post(self.url(path)).json(body).timeout(timeout);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| transport_error(&e, timeout))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(status_error(status, &detail, op));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| AdapterError::Unreachable(format!("undecodable response body: {e}")))
    }

    fn search_request(&self, request: &SearchRequest) -> (String, Value) {
        let context = (!request.context.is_empty()).then(|| Value::Object(request.context.clone()));

        match self.descriptor.kind {
            AdapterKind::Graph => (
                "/api/search".to_string(),
                json!({
                    "query": request.text,
                    "limit": request.limit,
                    "include_graph": true,
                    "semantic_search": true,
                    "context": context,
                }),
            ),
            AdapterKind::KeyValue => (
                "/search".to_string(),
                json!({
                    "query": request.text,
                    "limit": request.limit,
                }),
            ),
            AdapterKind::MultiType => (
                "/api/search".to_string(),
                json!({
                    "query": request.text,
                    "user_id": request.user_id.as_deref().unwrap_or(DEFAULT_USER),
                    "limit": request.limit,
                    "memory_types": ["text", "activation"],
                }),
            ),
            // Local kinds are rejected in `new`; treat anything else as a document index.
            _ => (
                format!("/mcp/tools/query_{}", self.index_name),
                json!({
                    "query": request.text,
                    "top_k": request.limit,
                    "filters": request.filters.clone().unwrap_or_default(),
                }),
            ),
        }
    }

    fn store_request(&self, content: &str, metadata: &Map<String, Value>) -> (String, Value) {
        match self.descriptor.kind {
            AdapterKind::Graph => (
                "/api/add".to_string(),
                json!({
                    "content": content,
                    "metadata": metadata,
                    "process_graph": true,
                }),
            ),
            AdapterKind::KeyValue => (
                "/store".to_string(),
                json!({
                    "key": kv_key(content, metadata),
                    "value": content,
                    "metadata": metadata,
                }),
            ),
            AdapterKind::MultiType => {
                let user_id = metadata
                    .get("user_id")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_USER);
                (
                    "/api/add".to_string(),
                    json!({
                        "messages": [{"role": "user", "content": content}],
                        "user_id": user_id,
                        "metadata": metadata,
                    }),
                )
            }
            _ => (
                "/api/ingest".to_string(),
                json!({
                    "content": content,
                    "metadata": metadata,
                    "index_name": self.index_name,
                }),
            ),
        }
    }
}

#[async_trait]
impl BackendAdapter for HttpAdapter {
    fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<Hit>, AdapterError> {
        let (path, body) = self.search_request(request);
        let reply = self.post(&path, &body, request.timeout, Operation::Search).await?;
        let hits = parse_search(self.descriptor.kind, reply)?;
        tracing::debug!(source = %self.descriptor.id, hits = hits.len(), "remote search complete");
        Ok(hits)
    }

    async fn store(&self, content: &str, metadata: &Map<String, Value>) -> Result<String, AdapterError> {
        if content.trim().is_empty() {
            return Err(AdapterError::ValidationFailed("content must not be empty".into()));
        }

        let (path, body) = self.store_request(content, metadata);
        let reply = self
            .post(&path, &body, self.descriptor.timeout, Operation::Store)
            .await?;

        let id = match self.descriptor.kind {
            AdapterKind::KeyValue => Some(
                string_field(&reply, "key").unwrap_or_else(|| kv_key(content, metadata)),
            ),
            AdapterKind::Graph => string_field(&reply, "id"),
            AdapterKind::MultiType => string_field(&reply, "memory_id"),
            _ => string_field(&reply, "document_id"),
        };

        id.ok_or_else(|| AdapterError::Unreachable("store reply carried no id".into()))
    }

    async fn health_check(&self) -> bool {
        let result = self
            .client
            .get(self.url("/health"))
            .timeout(self.descriptor.timeout)
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(source = %self.descriptor.id, error = %e, "health probe failed");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Search,
    Store,
}

fn transport_error(err: &reqwest::Error, timeout: Duration) -> AdapterError {
    if err.is_timeout() {
        AdapterError::Timeout(format!("no reply within {}ms", timeout.as_millis()))
    } else {
        AdapterError::Unreachable(err.to_string())
    }
}

fn status_error(status: StatusCode, detail: &str, op: Operation) -> AdapterError {
    let message = if detail.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {detail}")
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AdapterError::Unauthorized(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => match op {
            Operation::Search => AdapterError::InvalidQuery(message),
            Operation::Store => AdapterError::ValidationFailed(message),
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => AdapterError::Timeout(message),
        _ => AdapterError::Unreachable(message),
    }
}

/// Key-value stores need a caller-chosen key.
fn kv_key(content: &str, metadata: &Map<String, Value>) -> String {
    if let Some(key) = metadata.get("key").and_then(Value::as_str) {
        return key.to_string();
    }
    let digest = blake3::hash(content.as_bytes()).to_hex();
    format!("memory_{}", &digest[..16])
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    match value.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Ids arrive as strings or integers depending on the backend.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlexId {
    Text(String),
    Number(i64),
}

impl FlexId {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

/// RFC 3339 string or unix seconds.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlexTime {
    Text(String),
    Unix(f64),
}

impl FlexTime {
    fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
            Self::Unix(secs) => Utc.timestamp_opt(*secs as i64, 0).single(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphReply {
    #[serde(default)]
    results: Vec<GraphHit>,
}

#[derive(Debug, Deserialize)]
struct GraphHit {
    id: FlexId,
    content: String,
    similarity_score: Option<f64>,
    #[serde(default)]
    entities: Vec<Value>,
    #[serde(default)]
    relationships: Vec<Value>,
    #[serde(default)]
    keywords: Vec<Value>,
    graph_depth: Option<u32>,
    timestamp: Option<FlexTime>,
}

#[derive(Debug, Deserialize)]
struct KeyValueReply {
    #[serde(default)]
    memories: Vec<KeyValueHit>,
}

#[derive(Debug, Deserialize)]
struct KeyValueHit {
    key: String,
    value: Value,
    relevance: Option<f64>,
    timestamp: Option<FlexTime>,
    #[serde(default)]
    tags: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct MultiTypeReply {
    #[serde(default)]
    text_mem: Vec<TextMemory>,
    #[serde(default)]
    act_mem: Vec<ActivationMemory>,
}

#[derive(Debug, Deserialize)]
struct TextMemory {
    id: FlexId,
    content: String,
    score: Option<f64>,
    cube_id: Option<String>,
    timestamp: Option<FlexTime>,
}

#[derive(Debug, Deserialize)]
struct ActivationMemory {
    id: FlexId,
    summary: String,
    score: Option<f64>,
    context_length: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DocumentReply {
    #[serde(default)]
    results: Vec<DocumentHit>,
}

#[derive(Debug, Deserialize)]
struct DocumentHit {
    doc_id: FlexId,
    text: String,
    score: Option<f64>,
    document_name: Option<String>,
    page: Option<u32>,
    chunk_id: Option<FlexId>,
}

fn decode<T: serde::de::DeserializeOwned>(reply: Value) -> Result<T, AdapterError> {
    serde_json::from_value(reply)
        .map_err(|e| AdapterError::Unreachable(format!("unexpected response shape: {e}")))
}

fn insert_nonempty(metadata: &mut Map<String, Value>, key: &str, values: Vec<Value>) {
    if !values.is_empty() {
        metadata.insert(key.to_string(), Value::Array(values));
    }
}

/// Translate one dialect's search reply into raw hits.
fn parse_search(kind: AdapterKind, reply: Value) -> Result<Vec<Hit>, AdapterError> {
    let hits = match kind {
        AdapterKind::Graph => {
            let reply: GraphReply = decode(reply)?;
            reply
                .results
                .into_iter()
                .map(|r| {
                    let mut metadata = Map::new();
                    insert_nonempty(&mut metadata, "entities", r.entities);
                    insert_nonempty(&mut metadata, "relationships", r.relationships);
                    insert_nonempty(&mut metadata, "keywords", r.keywords);
                    if let Some(depth) = r.graph_depth {
                        metadata.insert("graph_depth".into(), json!(depth));
                    }
                    build_hit(r.id.into_string(), r.content, r.similarity_score, r.timestamp, metadata)
                })
                .collect()
        }
        AdapterKind::KeyValue => {
            let reply: KeyValueReply = decode(reply)?;
            reply
                .memories
                .into_iter()
                .map(|m| {
                    let content = match m.value {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    let mut metadata = Map::new();
                    metadata.insert("key".into(), json!(m.key));
                    insert_nonempty(&mut metadata, "tags", m.tags);
                    build_hit(m.key, content, m.relevance, m.timestamp, metadata)
                })
                .collect()
        }
        AdapterKind::MultiType => {
            let reply: MultiTypeReply = decode(reply)?;
            let text = reply.text_mem.into_iter().map(|m| {
                let mut metadata = Map::new();
                metadata.insert("memory_type".into(), json!("text"));
                if let Some(cube) = m.cube_id {
                    metadata.insert("cube_id".into(), json!(cube));
                }
                build_hit(m.id.into_string(), m.content, m.score, m.timestamp, metadata)
            });
            let activation = reply.act_mem.into_iter().map(|m| {
                let mut metadata = Map::new();
                metadata.insert("memory_type".into(), json!("activation"));
                if let Some(len) = m.context_length {
                    metadata.insert("context_length".into(), json!(len));
                }
                build_hit(m.id.into_string(), m.summary, m.score, None, metadata)
            });
            text.chain(activation).collect()
        }
        _ => {
            let reply: DocumentReply = decode(reply)?;
            reply
                .results
                .into_iter()
                .map(|d| {
                    let mut metadata = Map::new();
                    if let Some(name) = d.document_name {
                        metadata.insert("document_name".into(), json!(name));
                    }
                    if let Some(page) = d.page {
                        metadata.insert("page".into(), json!(page));
                    }
                    if let Some(chunk) = d.chunk_id {
                        metadata.insert("chunk_id".into(), json!(chunk.into_string()));
                    }
                    build_hit(d.doc_id.into_string(), d.text, d.score, None, metadata)
                })
                .collect()
        }
    };

    Ok(hits)
}

fn build_hit(
    id: String,
    content: String,
    score: Option<f64>,
    timestamp: Option<FlexTime>,
    metadata: Map<String, Value>,
) -> Hit {
    Hit {
        id,
        content,
        metadata,
        score,
        timestamp: timestamp.as_ref().and_then(FlexTime::to_datetime),
    }
}
