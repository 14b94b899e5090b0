//! SQLite FTS5 adapter over the on-disk local store.
//!
//! Search is BM25 over `memories_fts`. SQLite reports BM25 as a negative
//! number where lower is better; it is mapped onto `[0, 1)` with
//! `s = -r / (1 - r)` so it can be ranked against other backends.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde_json::{Map, Value};

use super::{AdapterDescriptor, BackendAdapter, Hit, SearchRequest};
use crate::db;
use crate::error::AdapterError;

pub struct LocalAdapter {
    descriptor: AdapterDescriptor,
    conn: Arc<Mutex<Connection>>,
}

impl LocalAdapter {
    /// Open (or create) the store at `path`.
    pub fn open(descriptor: AdapterDescriptor, path: &Path) -> Result<Self> {
        let conn = db::open_database(path)?;
        Ok(Self::with_connection(descriptor, conn))
    }

    /// Wrap an already-initialised connection.
    pub fn with_connection(descriptor: AdapterDescriptor, conn: Connection) -> Self {
        Self {
            descriptor,
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` against the connection on the blocking pool, bounded by `timeout`.
    async fn with_conn<T, F>(&self, timeout: std::time::Duration, f: F) -> Result<T, AdapterError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, AdapterError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| AdapterError::Internal(format!("connection lock poisoned: {e}")))?;
            f(&mut guard)
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(AdapterError::Internal(format!("local store task failed: {join}"))),
            Err(_) => Err(AdapterError::Timeout(format!(
                "local store did not answer within {}ms",
                timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl BackendAdapter for LocalAdapter {
    fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<Hit>, AdapterError> {
        let escaped = escape_fts_query(&request.text);
        if escaped.is_empty() {
            return Err(AdapterError::InvalidQuery("query has no searchable terms".into()));
        }
        let limit = request.limit as i64;

        let hits = self
            .with_conn(request.timeout, move |conn| {
                fts_search(conn, &escaped, limit).map_err(|e| match e {
                    rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("fts5") => {
                        AdapterError::InvalidQuery(msg)
                    }
                    other => AdapterError::Internal(other.to_string()),
                })
            })
            .await?;

        tracing::debug!(source = %self.descriptor.id, hits = hits.len(), "local search complete");
        Ok(hits)
    }

    async fn store(&self, content: &str, metadata: &Map<String, Value>) -> Result<String, AdapterError> {
        if content.trim().is_empty() {
            return Err(AdapterError::ValidationFailed("content must not be empty".into()));
        }

        let id = uuid::Uuid::now_v7().to_string();
        let content = content.to_string();
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| AdapterError::ValidationFailed(format!("metadata is not serialisable: {e}")))?;
        let row_id = id.clone();

        self.with_conn(self.descriptor.timeout, move |conn| {
            insert_memory(conn, &row_id, &content, &metadata_json)
                .map_err(|e| AdapterError::Internal(e.to_string()))
        })
        .await?;

        tracing::info!(source = %self.descriptor.id, id = %id, "local entry stored");
        Ok(id)
    }

    async fn health_check(&self) -> bool {
        self.with_conn(self.descriptor.timeout, |conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|e| AdapterError::Internal(e.to_string()))
        })
        .await
        .is_ok()
    }
}

fn insert_memory(
    conn: &mut Connection,
    id: &str,
    content: &str,
    metadata_json: &str,
) -> rusqlite::Result<()> {
    let now = Utc::now().to_rfc3339();
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO memories (id, content, metadata, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![id, content, metadata_json, now],
    )?;
    let rowid = tx.last_insert_rowid();

    tx.execute(
        "INSERT INTO memories_fts (rowid, content, id) VALUES (?1, ?2, ?3)",
        params![rowid, content, id],
    )?;

    tx.execute(
        "INSERT INTO memory_log (operation, memory_id, details, created_at) \
         VALUES ('create', ?1, NULL, ?2)",
        params![id, now],
    )?;

    tx.commit()
}

fn fts_search(conn: &Connection, escaped: &str, limit: i64) -> rusqlite::Result<Vec<Hit>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.content, m.metadata, m.created_at, f.rank \
         FROM memories_fts f JOIN memories m ON m.rowid = f.rowid \
         WHERE memories_fts MATCH ?1 ORDER BY f.rank LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![escaped, limit], |row| {
        let id: String = row.get(0)?;
        let content: String = row.get(1)?;
        let metadata: Option<String> = row.get(2)?;
        let created_at: String = row.get(3)?;
        let rank: f64 = row.get(4)?;
        Ok((id, content, metadata, created_at, rank))
    })?;

    let mut hits = Vec::new();
    for row in rows {
        let (id, content, metadata, created_at, rank) = row?;
        let metadata = metadata
            .and_then(|m| serde_json::from_str::<Map<String, Value>>(&m).ok())
            .unwrap_or_default();

        let mut hit = Hit::new(id, content)
            .with_score(bm25_to_score(rank))
            .with_metadata(metadata);
        if let Ok(ts) = DateTime::parse_from_rfc3339(&created_at) {
            hit = hit.with_timestamp(ts.with_timezone(&Utc));
        }
        hits.push(hit);
    }
    Ok(hits)
}

/// Map an FTS5 BM25 rank (negative, lower is better) onto `[0, 1)`.
fn bm25_to_score(rank: f64) -> f64 {
    let r = rank.min(0.0);
    -r / (1.0 - r)
}

/// Escape free text for FTS5 MATCH.
///
/// Each whitespace-delimited word is quoted so FTS5 operators in user input
/// are taken literally. Words are OR-ed; BM25 rewards rows matching more of them.
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| word.replace('"', ""))
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{w}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}
