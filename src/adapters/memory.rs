//! Reference in-process adapter.
//!
//! Holds entries in a `RwLock<Vec<_>>` and scores by query-term overlap. Useful
//! as a zero-dependency backend and as the baseline other adapters are
//! compared against in tests.

use std::collections::HashSet;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{AdapterDescriptor, BackendAdapter, Hit, SearchRequest};
use crate::error::AdapterError;

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    content: String,
    metadata: Map<String, Value>,
    created_at: DateTime<Utc>,
}

pub struct MemoryAdapter {
    descriptor: AdapterDescriptor,
    entries: RwLock<Vec<Entry>>,
}

impl MemoryAdapter {
    pub fn new(descriptor: AdapterDescriptor) -> Self {
        Self {
            descriptor,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BackendAdapter for MemoryAdapter {
    fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<Hit>, AdapterError> {
        let terms = query_terms(&request.text);
        if terms.is_empty() {
            return Err(AdapterError::InvalidQuery("query has no searchable terms".into()));
        }

        let entries = self
            .entries
            .read()
            .map_err(|e| AdapterError::Internal(format!("entry lock poisoned: {e}")))?;

        let mut scored: Vec<(f64, &Entry)> = entries
            .iter()
            .filter_map(|entry| {
                let score = overlap_score(&terms, &entry.content);
                (score > 0.0).then_some((score, entry))
            })
            .collect();

        // Stable: equal scores keep insertion order.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(request.limit);

        Ok(scored
            .into_iter()
            .map(|(score, entry)| {
                Hit::new(entry.id.clone(), entry.content.clone())
                    .with_score(score)
                    .with_timestamp(entry.created_at)
                    .with_metadata(entry.metadata.clone())
            })
            .collect())
    }

    async fn store(&self, content: &str, metadata: &Map<String, Value>) -> Result<String, AdapterError> {
        if content.trim().is_empty() {
            return Err(AdapterError::ValidationFailed("content must not be empty".into()));
        }

        let id = uuid::Uuid::now_v7().to_string();
        let mut entries = self
            .entries
            .write()
            .map_err(|e| AdapterError::Internal(format!("entry lock poisoned: {e}")))?;
        entries.push(Entry {
            id: id.clone(),
            content: content.to_string(),
            metadata: metadata.clone(),
            created_at: Utc::now(),
        });

        tracing::debug!(source = %self.descriptor.id, id = %id, "memory entry stored");
        Ok(id)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Distinct lowercase alphanumeric terms.
fn query_terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Fraction of query terms that occur in `content`.
fn overlap_score(terms: &HashSet<String>, content: &str) -> f64 {
    let content_terms = query_terms(content);
    let matched = terms.iter().filter(|t| content_terms.contains(*t)).count();
    matched as f64 / terms.len() as f64
}
