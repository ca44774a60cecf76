//! Service configuration
//!
//! One TOML document with a section per subsystem. Every field has a default,
//! so an empty file is a complete configuration. Secrets are never stored in
//! the file: the cache encryption key and the RESP password are read from the
//! environment variables the file names.

use crate::errors::{AgentError, Result};
use clearance_cache::{
    CacheError, NamespacePolicy, RespConfig, ScopePolicy, ScopedCacheConfig, ValueCipher,
    DEFAULT_MAX_ENTRIES,
};
use clearance_retrieval::{QualityMetric, RetrievalConfig};
use clearance_store::WorkflowPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted for the cache key when none is named.
pub const DEFAULT_KEY_ENV: &str = "CLEARANCE_CACHE_KEY";

/// Longest accepted workflow or maintenance duration, ten years.
const MAX_HOURS: u32 = 87_600;

/// Longest accepted cache TTL, one year.
const MAX_CACHE_TTL_SECS: u64 = 365 * 24 * 3600;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClearanceConfig {
    /// Adaptive retrieval
    pub retrieval: RetrievalSection,
    /// Scoped cache
    pub cache: CacheSection,
    /// Override request workflow
    pub workflow: WorkflowSection,
    /// Background maintenance
    pub maintenance: MaintenanceSection,
    /// Durable store
    pub store: StoreSection,
    /// Static identity directory
    pub directory: DirectorySection,
}

/// Quality metric names accepted in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityMetricKind {
    /// Best single score
    #[default]
    TopScore,
    /// Mean of the `quality_top_n` best scores
    MeanTopN,
}

/// `[retrieval]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalSection {
    /// First fan-out
    pub min_k: usize,
    /// Largest fan-out
    pub max_k: usize,
    /// Fan-out multiplier per escalation
    pub k_growth_factor: usize,
    /// Quality needed to stop escalating
    pub quality_threshold: f64,
    /// Quality metric
    pub quality_metric: QualityMetricKind,
    /// `n` for `mean_top_n`
    pub quality_top_n: usize,
    /// Run the rerank pass
    pub rerank_enabled: bool,
    /// Bound on each collaborator call
    pub collaborator_timeout_ms: u64,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            min_k: 5,
            max_k: 20,
            k_growth_factor: 2,
            quality_threshold: 0.5,
            quality_metric: QualityMetricKind::TopScore,
            quality_top_n: 3,
            rerank_enabled: false,
            collaborator_timeout_ms: 5_000,
        }
    }
}

/// Which cache backend to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    /// In-process map
    #[default]
    Memory,
    /// Networked RESP server
    Resp,
}

/// `[cache.resp]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RespSection {
    /// `host:port`
    pub address: String,
    /// Logical database
    pub database: u32,
    /// Environment variable holding the password
    pub password_env: Option<String>,
    /// Connect and round-trip bound
    pub timeout_ms: u64,
}

impl Default for RespSection {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:6379".to_string(),
            database: 0,
            password_env: None,
            timeout_ms: 500,
        }
    }
}

/// `[cache]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSection {
    /// Backend selection
    pub backend: CacheBackendKind,
    /// Networked backend settings
    pub resp: RespSection,
    /// Lifetime of retrieval results
    pub retrieval_ttl_secs: u64,
    /// Lifetime of conversation history
    pub conversation_ttl_secs: u64,
    /// Encrypt retrieval results
    pub encrypt_retrieval: bool,
    /// Encrypt conversation history
    pub encrypt_conversation: bool,
    /// Environment variable holding the hex 32-byte key
    pub key_env: String,
    /// Capacity of the in-process backend
    pub max_entries: usize,
    /// When department scoping applies
    pub scope_policy: ScopePolicy,
    /// Coalesce concurrent misses per key
    pub single_flight: bool,
    /// Turns kept per conversation
    pub conversation_max_turns: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            resp: RespSection::default(),
            retrieval_ttl_secs: 300,
            conversation_ttl_secs: 3_600,
            encrypt_retrieval: false,
            encrypt_conversation: true,
            key_env: DEFAULT_KEY_ENV.to_string(),
            max_entries: DEFAULT_MAX_ENTRIES,
            scope_policy: ScopePolicy::Conservative,
            single_flight: true,
            conversation_max_turns: 20,
        }
    }
}

/// `[workflow]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkflowSection {
    /// Undecided requests older than this are escalated to admins
    pub escalation_timeout_hours: u32,
    /// Undecided requests older than this expire
    pub request_ttl_hours: u32,
    /// Duration granted when a request asks for 0 hours
    pub default_duration_hours: u32,
    /// Cap on requested and approved durations
    pub max_duration_hours: u32,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            escalation_timeout_hours: 48,
            request_ttl_hours: 168,
            default_duration_hours: 24,
            max_duration_hours: 720,
        }
    }
}

/// `[maintenance]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaintenanceSection {
    /// Interval between sweeps
    pub sweep_interval_secs: u64,
    /// Horizon for expiring-soon notices
    pub expiring_soon_hours: u32,
}

impl Default for MaintenanceSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 3_600,
            expiring_soon_hours: 24,
        }
    }
}

/// `[store]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSection {
    /// Fact journal; in-memory when absent
    pub journal_path: Option<PathBuf>,
}

/// `[directory]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DirectorySection {
    /// Static identity directory file
    pub path: Option<PathBuf>,
}

impl ClearanceConfig {
    /// Parse a TOML document. Does not validate.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|source| AgentError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    /// Read and parse `path`. Does not validate.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| AgentError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        toml::from_str(&text).map_err(|source| AgentError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate against the process environment.
    pub fn validate(&self) -> Result<()> {
        self.validate_with(&|name| std::env::var(name).ok())
    }

    /// Validate, resolving secrets through `env`.
    pub fn validate_with(&self, env: &dyn Fn(&str) -> Option<String>) -> Result<()> {
        let r = &self.retrieval;
        if r.min_k == 0 {
            return Err(invalid("retrieval.min_k must be at least 1"));
        }
        if r.max_k < r.min_k {
            return Err(invalid(format!(
                "retrieval.max_k ({}) is below retrieval.min_k ({})",
                r.max_k, r.min_k
            )));
        }
        if r.k_growth_factor < 2 {
            return Err(invalid("retrieval.k_growth_factor must be at least 2"));
        }
        if !(0.0..=1.0).contains(&r.quality_threshold) {
            return Err(invalid(format!(
                "retrieval.quality_threshold {} is outside [0, 1]",
                r.quality_threshold
            )));
        }
        if r.quality_metric == QualityMetricKind::MeanTopN && r.quality_top_n == 0 {
            return Err(invalid("retrieval.quality_top_n must be at least 1"));
        }
        if r.collaborator_timeout_ms == 0 {
            return Err(invalid("retrieval.collaborator_timeout_ms must be positive"));
        }

        let c = &self.cache;
        if c.retrieval_ttl_secs == 0 || c.conversation_ttl_secs == 0 {
            return Err(invalid("cache TTLs must be positive"));
        }
        if c.retrieval_ttl_secs.max(c.conversation_ttl_secs) > MAX_CACHE_TTL_SECS {
            return Err(invalid(format!(
                "cache TTLs must not exceed {MAX_CACHE_TTL_SECS} seconds"
            )));
        }
        if c.backend == CacheBackendKind::Resp && c.resp.timeout_ms == 0 {
            return Err(invalid("cache.resp.timeout_ms must be positive"));
        }
        self.cipher_with(env)?;

        let w = &self.workflow;
        if w.escalation_timeout_hours == 0 || w.request_ttl_hours == 0 {
            return Err(invalid("workflow timeouts must be positive"));
        }
        let longest = w
            .escalation_timeout_hours
            .max(w.request_ttl_hours)
            .max(w.max_duration_hours)
            .max(self.maintenance.expiring_soon_hours);
        if longest > MAX_HOURS {
            return Err(invalid(format!(
                "workflow and maintenance durations must not exceed {MAX_HOURS} hours"
            )));
        }
        if w.default_duration_hours == 0 {
            return Err(invalid("workflow.default_duration_hours must be positive"));
        }
        if w.default_duration_hours > w.max_duration_hours {
            return Err(invalid(format!(
                "workflow.default_duration_hours ({}) exceeds workflow.max_duration_hours ({})",
                w.default_duration_hours, w.max_duration_hours
            )));
        }

        if self.maintenance.sweep_interval_secs == 0 {
            return Err(invalid("maintenance.sweep_interval_secs must be positive"));
        }
        Ok(())
    }

    /// Retrieval orchestrator settings.
    pub fn retrieval_config(&self) -> RetrievalConfig {
        let r = &self.retrieval;
        RetrievalConfig {
            min_k: r.min_k,
            max_k: r.max_k,
            k_growth_factor: r.k_growth_factor,
            quality_threshold: r.quality_threshold,
            quality_metric: match r.quality_metric {
                QualityMetricKind::TopScore => QualityMetric::TopScore,
                QualityMetricKind::MeanTopN => QualityMetric::MeanTopN {
                    n: r.quality_top_n,
                },
            },
            rerank_enabled: r.rerank_enabled,
            collaborator_timeout: Duration::from_millis(r.collaborator_timeout_ms),
        }
    }

    /// Per-namespace cache policies.
    pub fn scoped_cache_config(&self) -> ScopedCacheConfig {
        ScopedCacheConfig {
            retrieval: NamespacePolicy {
                ttl: Duration::from_secs(self.cache.retrieval_ttl_secs),
                encrypt: self.cache.encrypt_retrieval,
            },
            conversation: NamespacePolicy {
                ttl: Duration::from_secs(self.cache.conversation_ttl_secs),
                encrypt: self.cache.encrypt_conversation,
            },
        }
    }

    /// Cache cipher, when any namespace is encrypted.
    pub fn cipher_with(&self, env: &dyn Fn(&str) -> Option<String>) -> Result<Option<ValueCipher>> {
        if !(self.cache.encrypt_retrieval || self.cache.encrypt_conversation) {
            return Ok(None);
        }
        let key = env(&self.cache.key_env).ok_or_else(|| {
            invalid(format!(
                "cache encryption is enabled but {} is not set",
                self.cache.key_env
            ))
        })?;
        ValueCipher::from_hex(&key).map(Some).map_err(|e| match e {
            CacheError::Config(message) => invalid(format!("{}: {message}", self.cache.key_env)),
            other => AgentError::Cache(other),
        })
    }

    /// Networked backend settings.
    pub fn resp_config_with(&self, env: &dyn Fn(&str) -> Option<String>) -> RespConfig {
        let section = &self.cache.resp;
        RespConfig {
            address: section.address.clone(),
            database: section.database,
            password: section.password_env.as_deref().and_then(env),
            timeout: Duration::from_millis(section.timeout_ms),
        }
    }

    /// Request workflow limits.
    pub fn workflow_policy(&self) -> WorkflowPolicy {
        let w = &self.workflow;
        WorkflowPolicy {
            escalation_timeout: chrono::Duration::hours(i64::from(w.escalation_timeout_hours)),
            request_ttl: chrono::Duration::hours(i64::from(w.request_ttl_hours)),
            default_duration_hours: w.default_duration_hours,
            max_duration_hours: w.max_duration_hours,
        }
    }

    /// Interval between maintenance sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance.sweep_interval_secs)
    }

    /// Horizon for expiring-soon notices.
    pub fn expiring_soon(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.maintenance.expiring_soon_hours))
    }
}

fn invalid(message: impl Into<String>) -> AgentError {
    AgentError::Config(message.into())
}
