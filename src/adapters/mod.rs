//! Backend adapters: one uniform contract over every knowledge store.
//!
//! Provides the [`BackendAdapter`] trait, the [`AdapterDescriptor`] each adapter
//! declares (weight, timeout, retries), and the [`AdapterRegistry`] that maps
//! [`SourceId`]s to live adapters. New backends are added by implementing the
//! trait and registering, never by touching the orchestrator.

pub mod http;
pub mod local;
pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::MnemeConfig;
use crate::error::AdapterError;
use crate::query::types::SourceId;

/// Which backend family an adapter talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// Reference in-process store.
    Memory,
    /// SQLite FTS5 store on local disk.
    Local,
    /// Remote semantic graph store.
    Graph,
    /// Remote key-value memory store.
    KeyValue,
    /// Remote document index.
    Document,
    /// Remote multi-type memory store.
    MultiType,
}

impl AdapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Local => "local",
            Self::Graph => "graph",
            Self::KeyValue => "key_value",
            Self::Document => "document",
            Self::MultiType => "multi_type",
        }
    }

    /// Remote kinds need a base URL.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::Graph | Self::KeyValue | Self::Document | Self::MultiType
        )
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AdapterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(Self::Memory),
            "local" => Ok(Self::Local),
            "graph" => Ok(Self::Graph),
            "key_value" => Ok(Self::KeyValue),
            "document" => Ok(Self::Document),
            "multi_type" => Ok(Self::MultiType),
            _ => Err(format!("unknown adapter kind: {s}")),
        }
    }
}

/// Static facts an adapter declares about itself.
#[derive(Debug, Clone)]
pub struct AdapterDescriptor {
    pub id: SourceId,
    pub kind: AdapterKind,
    /// Relative trust in `[0, 1]`; orders Sequential mode and feeds Hybrid ranking.
    pub weight: f64,
    pub timeout: Duration,
    /// Extra attempts after a transient (`Unreachable`) failure.
    pub max_retries: u32,
}

impl AdapterDescriptor {
    pub fn new(id: impl Into<SourceId>, kind: AdapterKind, weight: f64, timeout: Duration) -> Self {
        Self {
            id: id.into(),
            kind,
            weight,
            timeout,
            max_retries: 0,
        }
    }
}

/// What the orchestrator asks of one adapter.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub text: String,
    /// Candidate budget; may exceed the caller's final `max_results`.
    pub limit: usize,
    /// Time left for this call. Adapters must give up once it elapses.
    pub timeout: Duration,
    pub filters: Option<Map<String, Value>>,
    pub user_id: Option<String>,
    /// Supplementary context from earlier Sequential steps. Adapters may ignore it.
    pub context: Map<String, Value>,
}

impl SearchRequest {
    pub fn new(text: impl Into<String>, limit: usize, timeout: Duration) -> Self {
        Self {
            text: text.into(),
            limit,
            timeout,
            filters: None,
            user_id: None,
            context: Map::new(),
        }
    }
}

/// A raw hit as reported by a backend, before the orchestrator tags it with a source.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
    /// `None` when the backend reports no score.
    pub score: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Hit {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: Map::new(),
            score: None,
            timestamp: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Uniform contract over one knowledge backend.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn descriptor(&self) -> &AdapterDescriptor;

    fn id(&self) -> &SourceId {
        &self.descriptor().id
    }

    /// Search the backend. Must fail with [`AdapterError::Timeout`] rather than
    /// block past `request.timeout`.
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Hit>, AdapterError>;

    /// Persist `content` and return the backend's id for it.
    async fn store(&self, content: &str, metadata: &Map<String, Value>) -> Result<String, AdapterError>;

    /// Best-effort liveness probe. Never panics; internal errors mean `false`.
    async fn health_check(&self) -> bool;
}

/// Maps [`SourceId`] → adapter, preserving registration order.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn BackendAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter. Ids must be unique.
    pub fn register(&mut self, adapter: Arc<dyn BackendAdapter>) -> Result<()> {
        if self.get(adapter.id().as_str()).is_some() {
            bail!("adapter already registered: {}", adapter.id());
        }
        tracing::debug!(
            source = %adapter.id(),
            kind = %adapter.descriptor().kind,
            weight = adapter.descriptor().weight,
            "adapter registered"
        );
        self.adapters.push(adapter);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn BackendAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.id().as_str() == id)
            .cloned()
    }

    pub fn ids(&self) -> Vec<SourceId> {
        self.adapters.iter().map(|a| a.id().clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn BackendAdapter>> {
        self.adapters.iter()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Declared weight of every registered adapter.
    pub fn weights(&self) -> HashMap<SourceId, f64> {
        self.adapters
            .iter()
            .map(|a| (a.id().clone(), a.descriptor().weight))
            .collect()
    }
}

/// Construct every enabled adapter named in the configuration.
pub fn build_registry(config: &MnemeConfig) -> Result<AdapterRegistry> {
    let mut registry = AdapterRegistry::new();

    for (id, adapter_config) in &config.adapters {
        if !adapter_config.enabled {
            tracing::debug!(source = %id, "adapter disabled, skipping");
            continue;
        }

        let descriptor = adapter_config.descriptor(id);
        let adapter: Arc<dyn BackendAdapter> = match adapter_config.kind {
            AdapterKind::Memory => Arc::new(memory::MemoryAdapter::new(descriptor)),
            AdapterKind::Local => {
                let db_path = config.resolved_db_path();
                let adapter = local::LocalAdapter::open(descriptor, &db_path)
                    .with_context(|| format!("failed to open local store for adapter {id}"))?;
                Arc::new(adapter)
            }
            AdapterKind::Graph
            | AdapterKind::KeyValue
            | AdapterKind::Document
            | AdapterKind::MultiType => {
                let Some(url) = adapter_config.url.as_deref() else {
                    bail!("adapter {id} of kind {} requires a url", adapter_config.kind);
                };
                let adapter = http::HttpAdapter::new(
                    descriptor,
                    url,
                    adapter_config.api_key.clone(),
                    adapter_config.index_name.clone(),
                )
                .with_context(|| format!("failed to build http client for adapter {id}"))?;
                Arc::new(adapter)
            }
        };

        registry.register(adapter)?;
    }

    tracing::info!(adapters = ?registry.ids(), "adapter registry ready");
    Ok(registry)
}
