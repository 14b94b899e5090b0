//! Adapter fan-out with per-call deadlines and bounded retry.
//!
//! Every call runs under `min(call deadline, global deadline)`. Concurrent
//! dispatch uses a [`JoinSet`]; when the global deadline passes, unfinished
//! calls are aborted and reported as [`AdapterError::Timeout`]. Outcomes are
//! always returned in the order the adapters were given, never in completion
//! order.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;

use super::types::{QueryResult, SourceId, NEUTRAL_SCORE};
use crate::adapters::{BackendAdapter, Hit, SearchRequest};
use crate::error::AdapterError;

/// First retry waits this long; each further retry doubles it.
const BASE_BACKOFF: Duration = Duration::from_millis(100);

/// What one adapter produced for one orchestrated call.
#[derive(Debug)]
pub struct SourceOutcome {
    pub source: SourceId,
    pub outcome: Result<Vec<QueryResult>, AdapterError>,
    pub elapsed: Duration,
}

/// Deadline for one adapter call.
pub fn call_deadline(
    adapter: &dyn BackendAdapter,
    timeout_override: Option<Duration>,
    global_deadline: Instant,
) -> Instant {
    let timeout = timeout_override.unwrap_or(adapter.descriptor().timeout);
    (Instant::now() + timeout).min(global_deadline)
}

/// Search one adapter, retrying transient failures until `deadline`.
pub async fn search_with_retry(
    adapter: &dyn BackendAdapter,
    template: &SearchRequest,
    deadline: Instant,
) -> Result<Vec<Hit>, AdapterError> {
    let max_retries = adapter.descriptor().max_retries;
    let mut attempt: u32 = 0;

    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(AdapterError::Timeout("deadline passed before the call started".into()));
        }

        let mut request = template.clone();
        request.timeout = deadline - now;

        let result = match tokio::time::timeout_at(deadline, adapter.search(&request)).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout(format!(
                "no answer within {}ms",
                request.timeout.as_millis()
            ))),
        };

        match result {
            Err(e) if e.is_transient() && attempt < max_retries => {
                let backoff = BASE_BACKOFF * 2u32.saturating_pow(attempt);
                if Instant::now() + backoff >= deadline {
                    return Err(e);
                }
                tracing::debug!(
                    source = %adapter.id(),
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "retrying transient failure"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Call one adapter and tag its hits with the adapter's id.
pub async fn call_one(
    adapter: Arc<dyn BackendAdapter>,
    template: &SearchRequest,
    timeout_override: Option<Duration>,
    global_deadline: Instant,
) -> SourceOutcome {
    let started = Instant::now();
    let source = adapter.id().clone();
    let deadline = call_deadline(adapter.as_ref(), timeout_override, global_deadline);

    let outcome = search_with_retry(adapter.as_ref(), template, deadline)
        .await
        .map(|hits| to_results(&source, hits));
    let elapsed = started.elapsed();

    match &outcome {
        Ok(results) => tracing::debug!(
            source = %source,
            results = results.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "adapter answered"
        ),
        Err(e) => tracing::warn!(
            source = %source,
            kind = %e.kind(),
            error = %e,
            elapsed_ms = elapsed.as_millis() as u64,
            "adapter call failed"
        ),
    }

    SourceOutcome {
        source,
        outcome,
        elapsed,
    }
}

/// Call every adapter concurrently and collect until `global_deadline`.
pub async fn fan_out(
    adapters: &[Arc<dyn BackendAdapter>],
    template: &SearchRequest,
    timeout_override: Option<Duration>,
    global_deadline: Instant,
) -> Vec<SourceOutcome> {
    let mut slots: Vec<Option<SourceOutcome>> = adapters.iter().map(|_| None).collect();
    let mut set = JoinSet::new();

    for (index, adapter) in adapters.iter().enumerate() {
        let adapter = Arc::clone(adapter);
        let request = template.clone();
        set.spawn(async move {
            let outcome = call_one(adapter, &request, timeout_override, global_deadline).await;
            (index, outcome)
        });
    }

    let mut ceiling_hit = false;
    loop {
        match tokio::time::timeout_at(global_deadline, set.join_next()).await {
            Ok(Some(Ok((index, outcome)))) => slots[index] = Some(outcome),
            Ok(Some(Err(join_error))) => {
                tracing::error!(error = %join_error, "adapter task did not complete");
            }
            Ok(None) => break,
            Err(_) => {
                ceiling_hit = true;
                set.abort_all();
                break;
            }
        }
    }

    adapters
        .iter()
        .zip(slots)
        .map(|(adapter, slot)| {
            slot.unwrap_or_else(|| {
                let error = if ceiling_hit {
                    AdapterError::Timeout("global query deadline reached".into())
                } else {
                    AdapterError::Internal("adapter task panicked or was cancelled".into())
                };
                tracing::warn!(source = %adapter.id(), kind = %error.kind(), "adapter call abandoned");
                SourceOutcome {
                    source: adapter.id().clone(),
                    outcome: Err(error),
                    elapsed: Duration::ZERO,
                }
            })
        })
        .collect()
}

/// Tag raw hits with their source; missing or non-finite scores become neutral.
pub fn to_results(source: &SourceId, hits: Vec<Hit>) -> Vec<QueryResult> {
    hits.into_iter()
        .map(|hit| QueryResult {
            id: hit.id,
            source: source.clone(),
            content: hit.content,
            metadata: hit.metadata,
            relevance_score: normalize_score(hit.score),
            timestamp: hit.timestamp,
        })
        .collect()
}

fn normalize_score(score: Option<f64>) -> f64 {
    match score {
        Some(s) if s.is_finite() => s.clamp(0.0, 1.0),
        _ => NEUTRAL_SCORE,
    }
}
