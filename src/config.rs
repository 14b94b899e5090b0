use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::adapters::{AdapterDescriptor, AdapterKind};
use crate::query::types::RankingStrategy;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MnemeConfig {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub orchestrator: OrchestratorConfig,
    pub ranking: RankingConfig,
    pub storage: StorageConfig,
    /// Keyed by source id. A `[adapters]` table in the file replaces the default set.
    pub adapters: BTreeMap<String, AdapterConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Global ceiling for one orchestrated query.
    pub query_timeout_ms: u64,
    pub candidate_multiplier: usize,
    pub context_top_k: usize,
    pub health_timeout_ms: u64,
    /// Smart-mode sources when a query names none. Empty means every enabled adapter.
    pub default_sources: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RankingConfig {
    pub default_strategy: RankingStrategy,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file for the local adapter.
    pub db_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AdapterConfig {
    pub kind: AdapterKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub max_retries: u32,
    /// Document indexes only.
    #[serde(default)]
    pub index_name: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_weight() -> f64 {
    0.5
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for MnemeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            ranking: RankingConfig::default(),
            storage: StorageConfig::default(),
            adapters: default_adapters(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8505,
            log_level: "info".into(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            max_entries: 1000,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: 30_000,
            candidate_multiplier: 3,
            context_top_k: 5,
            health_timeout_ms: 5_000,
            default_sources: Vec::new(),
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            default_strategy: RankingStrategy::Relevance,
            alpha: 0.6,
            beta: 0.2,
            gamma: 0.2,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_mneme_dir()
            .join("local.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl AdapterConfig {
    fn remote(kind: AdapterKind, url: &str, weight: f64, timeout_ms: u64) -> Self {
        Self {
            kind,
            enabled: false,
            url: Some(url.into()),
            api_key: None,
            weight,
            timeout_ms,
            max_retries: 1,
            index_name: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn descriptor(&self, id: &str) -> AdapterDescriptor {
        let mut descriptor = AdapterDescriptor::new(id, self.kind, self.weight, self.timeout());
        descriptor.max_retries = self.max_retries;
        descriptor
    }
}

fn default_adapters() -> BTreeMap<String, AdapterConfig> {
    let mut adapters = BTreeMap::new();
    adapters.insert(
        "graph".into(),
        AdapterConfig::remote(AdapterKind::Graph, "http://localhost:8001", 0.3, 5_000),
    );
    adapters.insert(
        "kv".into(),
        AdapterConfig::remote(AdapterKind::KeyValue, "http://localhost:8002", 0.2, 3_000),
    );
    adapters.insert(
        "multi".into(),
        AdapterConfig::remote(AdapterKind::MultiType, "http://localhost:8003", 0.3, 5_000),
    );
    let mut docs = AdapterConfig::remote(AdapterKind::Document, "http://localhost:8004", 0.2, 10_000);
    docs.index_name = Some("default".into());
    adapters.insert("docs".into(), docs);
    adapters.insert(
        "local".into(),
        AdapterConfig {
            kind: AdapterKind::Local,
            enabled: true,
            url: None,
            api_key: None,
            weight: 0.5,
            timeout_ms: 2_000,
            max_retries: 0,
            index_name: None,
        },
    );
    adapters
}

/// Returns `~/.mneme/`, or `./.mneme/` when no home directory is known.
pub fn default_mneme_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mneme")
}

/// Returns the default config file path: `~/.mneme/config.toml`
pub fn default_config_path() -> PathBuf {
    default_mneme_dir().join("config.toml")
}

impl MnemeConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, apply env var overrides, then validate.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MnemeConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Global: `MNEME_LOG_LEVEL`, `MNEME_HOST`, `MNEME_PORT`, `MNEME_CACHE_TTL_SECS`,
    /// `MNEME_QUERY_TIMEOUT_MS`, `MNEME_DB`. Per adapter (id upper-cased, `-` → `_`):
    /// `MNEME_<ID>_URL`, `MNEME_<ID>_API_KEY`, `MNEME_<ID>_ENABLED`.
    /// Unparseable numeric values are ignored with a warning.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MNEME_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("MNEME_HOST") {
            self.server.host = val;
        }
        if let Some(val) = env_parse("MNEME_PORT") {
            self.server.port = val;
        }
        if let Some(val) = env_parse("MNEME_CACHE_TTL_SECS") {
            self.cache.ttl_secs = val;
        }
        if let Some(val) = env_parse("MNEME_QUERY_TIMEOUT_MS") {
            self.orchestrator.query_timeout_ms = val;
        }
        if let Ok(val) = std::env::var("MNEME_DB") {
            self.storage.db_path = val;
        }

        for (id, adapter) in self.adapters.iter_mut() {
            let prefix = format!("MNEME_{}", id.to_uppercase().replace('-', "_"));
            if let Ok(val) = std::env::var(format!("{prefix}_URL")) {
                adapter.url = Some(val);
            }
            if let Ok(val) = std::env::var(format!("{prefix}_API_KEY")) {
                adapter.api_key = Some(val);
            }
            if let Some(val) = env_parse::<bool>(&format!("{prefix}_ENABLED")) {
                adapter.enabled = val;
            }
        }
    }

    /// Reject configurations the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be greater than 0");
        }
        if self.orchestrator.query_timeout_ms == 0 {
            bail!("orchestrator.query_timeout_ms must be greater than 0");
        }
        if self.orchestrator.health_timeout_ms == 0 {
            bail!("orchestrator.health_timeout_ms must be greater than 0");
        }
        for (name, value) in [
            ("alpha", self.ranking.alpha),
            ("beta", self.ranking.beta),
            ("gamma", self.ranking.gamma),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("ranking.{name} must be a non-negative number, got {value}");
            }
        }

        for (id, adapter) in &self.adapters {
            if !(0.0..=1.0).contains(&adapter.weight) {
                bail!("adapters.{id}.weight must be within [0, 1], got {}", adapter.weight);
            }
            if adapter.timeout_ms == 0 {
                bail!("adapters.{id}.timeout_ms must be greater than 0");
            }
            if adapter.enabled && adapter.kind.is_remote() && adapter.url.is_none() {
                bail!("adapters.{id} of kind {} requires a url", adapter.kind);
            }
        }

        for source in &self.orchestrator.default_sources {
            match self.adapters.get(source) {
                Some(adapter) if adapter.enabled => {}
                Some(_) => bail!("orchestrator.default_sources names disabled adapter {source}"),
                None => bail!("orchestrator.default_sources names unknown adapter {source}"),
            }
        }

        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(val) => Some(val),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
