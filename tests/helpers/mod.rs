#![allow(dead_code)]

use async_trait::async_trait;
use mneme::adapters::{AdapterDescriptor, AdapterKind, AdapterRegistry, BackendAdapter, Hit, SearchRequest};
use mneme::error::AdapterError;
use mneme::query::cache::{MemoryCache, ResultCache};
use mneme::query::orchestrator::{Orchestrator, OrchestratorSettings};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared record of which adapter was called, in call order.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Adapter with canned answers, optional latency and failure, and call recording.
pub struct ScriptedAdapter {
    descriptor: AdapterDescriptor,
    hits: Vec<Hit>,
    failure: Option<AdapterError>,
    later_failure: Option<AdapterError>,
    latency: Duration,
    later_latency: Option<Duration>,
    followup: Option<(String, Hit)>,
    healthy: bool,
    calls: AtomicUsize,
    contexts: Mutex<Vec<Map<String, Value>>>,
    log: Option<CallLog>,
}

impl ScriptedAdapter {
    pub fn new(id: &str, weight: f64) -> Self {
        Self {
            descriptor: AdapterDescriptor::new(id, AdapterKind::Memory, weight, Duration::from_secs(2)),
            hits: Vec::new(),
            failure: None,
            later_failure: None,
            latency: Duration::ZERO,
            later_latency: None,
            followup: None,
            healthy: true,
            calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
            log: None,
        }
    }

    /// One hit per score, ids `<id>-<n>`, distinct content.
    pub fn with_scores(mut self, scores: &[f64]) -> Self {
        let id = self.descriptor.id.to_string();
        self.hits = scores
            .iter()
            .enumerate()
            .map(|(i, s)| Hit::new(format!("{id}-{i}"), format!("{id} result {i}")).with_score(*s))
            .collect();
        self
    }

    pub fn with_hits(mut self, hits: Vec<Hit>) -> Self {
        self.hits = hits;
        self
    }

    pub fn failing(mut self, error: AdapterError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Answer the first search normally, fail every later one.
    pub fn then_failing(mut self, error: AdapterError) -> Self {
        self.later_failure = Some(error);
        self
    }

    /// Answer the first search at the normal latency, every later one at `latency`.
    pub fn then_slow(mut self, latency: Duration) -> Self {
        self.later_latency = Some(latency);
        self
    }

    /// Also return `hit` once the Sequential context carries a prior result containing `trigger`.
    pub fn with_followup(mut self, trigger: &str, hit: Hit) -> Self {
        self.followup = Some((trigger.to_string(), hit));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.descriptor.timeout = timeout;
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn with_log(mut self, log: &CallLog) -> Self {
        self.log = Some(Arc::clone(log));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Context received by each search call, in order.
    pub fn contexts(&self) -> Vec<Map<String, Value>> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendAdapter for ScriptedAdapter {
    fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<Hit>, AdapterError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().unwrap().push(request.context.clone());
        if let Some(log) = &self.log {
            log.lock().unwrap().push(self.descriptor.id.to_string());
        }

        let latency = match self.later_latency {
            Some(later) if call > 0 => later,
            _ => self.latency,
        };
        tokio::time::sleep(latency).await;

        let failure = match &self.later_failure {
            Some(later) if call > 0 => Some(later),
            _ => self.failure.as_ref(),
        };
        if let Some(error) = failure {
            return Err(error.clone());
        }

        let mut hits = self.hits.clone();
        if let Some((trigger, hit)) = &self.followup {
            let triggered = request
                .context
                .get("prior_results")
                .and_then(Value::as_array)
                .is_some_and(|prior| {
                    prior
                        .iter()
                        .any(|p| p.as_str().is_some_and(|s| s.contains(trigger.as_str())))
                });
            if triggered {
                hits.push(hit.clone());
            }
        }
        hits.truncate(request.limit);
        Ok(hits)
    }

    async fn store(&self, _content: &str, _metadata: &Map<String, Value>) -> Result<String, AdapterError> {
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(format!("{}-stored", self.descriptor.id)),
        }
    }

    async fn health_check(&self) -> bool {
        tokio::time::sleep(self.latency).await;
        self.healthy
    }
}

pub fn registry(adapters: &[Arc<ScriptedAdapter>]) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    for adapter in adapters {
        registry.register(adapter.clone()).unwrap();
    }
    registry
}

pub fn cache() -> Arc<dyn ResultCache> {
    Arc::new(MemoryCache::new(Duration::from_secs(60), 100))
}

/// Orchestrator with default settings and a live cache.
pub fn orchestrator(adapters: &[Arc<ScriptedAdapter>]) -> Orchestrator {
    Orchestrator::new(registry(adapters), cache(), OrchestratorSettings::default())
}

pub fn orchestrator_with(adapters: &[Arc<ScriptedAdapter>], settings: OrchestratorSettings) -> Orchestrator {
    Orchestrator::new(registry(adapters), cache(), settings)
}
