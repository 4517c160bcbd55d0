use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::RetrievalError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub lexical: LexicalConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub http_rerank: Option<HttpRerankConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "default_rrf_k")]
    pub k: u32,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            k: default_rrf_k(),
            lexical_weight: default_lexical_weight(),
            vector_weight: default_vector_weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_k1")]
    pub k1: f64,
    #[serde(default = "default_b")]
    pub b: f64,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            k1: default_k1(),
            b: default_b(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Each backend is asked for `candidate_multiplier * top_k` candidates.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
    /// Vector searches allowed in flight at once, counting ones that have
    /// already timed out but not yet returned.
    #[serde(default = "default_vector_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            candidate_multiplier: default_candidate_multiplier(),
            timeout_ms: default_provider_timeout_ms(),
            max_concurrent: default_vector_max_concurrent(),
        }
    }
}

impl VectorConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rerank_window")]
    pub window: usize,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            window: default_rerank_window(),
            timeout_ms: default_provider_timeout_ms(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl RerankConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Bounds for a single cache pool. `ttl_secs = 0` disables expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_count: usize,
    pub max_bytes: usize,
    #[serde(default)]
    pub ttl_secs: u64,
}

impl PoolConfig {
    #[must_use]
    pub const fn ttl(&self) -> Option<Duration> {
        if self.ttl_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.ttl_secs))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_query_pool")]
    pub query: PoolConfig,
    #[serde(default = "default_document_pool")]
    pub document: PoolConfig,
    #[serde(default = "default_embedding_pool")]
    pub embedding: PoolConfig,
    #[serde(default = "default_metadata_pool")]
    pub metadata: PoolConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            query: default_query_pool(),
            document: default_document_pool(),
            embedding: default_embedding_pool(),
            metadata: default_metadata_pool(),
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Remote cross-encoder endpoint (`http-rerank` feature).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRerankConfig {
    pub api_base: String,
    #[serde(default = "default_rerank_path")]
    pub path: String,
    pub model: String,
    /// Name of the environment variable holding the bearer token, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
}

impl EngineConfig {
    /// Reject settings the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Configuration`] naming the first offending field.
    pub fn validate(&self) -> Result<(), RetrievalError> {
        let fusion = &self.fusion;
        if fusion.k == 0 {
            return Err(RetrievalError::configuration("fusion.k must be positive"));
        }
        for (name, weight) in [
            ("fusion.lexical_weight", fusion.lexical_weight),
            ("fusion.vector_weight", fusion.vector_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(RetrievalError::configuration(format!(
                    "{name} must be a finite non-negative number, got {weight}"
                )));
            }
        }

        if !self.lexical.k1.is_finite() || self.lexical.k1 < 0.0 {
            return Err(RetrievalError::configuration(format!(
                "lexical.k1 must be >= 0, got {}",
                self.lexical.k1
            )));
        }
        if !(0.0..=1.0).contains(&self.lexical.b) {
            return Err(RetrievalError::configuration(format!(
                "lexical.b must be within [0, 1], got {}",
                self.lexical.b
            )));
        }

        if self.vector.candidate_multiplier == 0 {
            return Err(RetrievalError::configuration(
                "vector.candidate_multiplier must be positive",
            ));
        }
        if self.vector.max_concurrent == 0 {
            return Err(RetrievalError::configuration(
                "vector.max_concurrent must be positive",
            ));
        }
        if self.rerank.window == 0 {
            return Err(RetrievalError::configuration("rerank.window must be positive"));
        }
        if self.rerank.max_concurrent == 0 {
            return Err(RetrievalError::configuration(
                "rerank.max_concurrent must be positive",
            ));
        }

        for (name, pool) in [
            ("cache.query", &self.cache.query),
            ("cache.document", &self.cache.document),
            ("cache.embedding", &self.cache.embedding),
            ("cache.metadata", &self.cache.metadata),
        ] {
            if pool.max_count == 0 || pool.max_bytes == 0 {
                return Err(RetrievalError::configuration(format!(
                    "{name} needs positive max_count and max_bytes"
                )));
            }
        }

        if let Some(http) = &self.http_rerank {
            if http.api_base.trim().is_empty() || http.model.trim().is_empty() {
                return Err(RetrievalError::rerank_model(
                    "http_rerank requires api_base and model",
                ));
            }
        }

        Ok(())
    }
}

/// Load the engine config from `path`, falling back to defaults when the
/// file does not exist.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid TOML.
pub fn load_engine_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<EngineConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Default per-user config location: `<config_dir>/quarry/config.toml`.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("quarry/config.toml"))
}

/// Resolve which config file to load.
///
/// Precedence: explicit path, then `QUARRY_CONFIG`, then the user config
/// directory. Returns `None` when nothing applies.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>, env_value: Option<String>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(raw) = env_value.filter(|v| !v.trim().is_empty()) {
        return Some(PathBuf::from(raw));
    }
    user_config_path()
}

const fn default_true() -> bool {
    true
}

const fn default_rrf_k() -> u32 {
    60
}

const fn default_lexical_weight() -> f64 {
    0.3
}

const fn default_vector_weight() -> f64 {
    0.7
}

const fn default_k1() -> f64 {
    1.5
}

const fn default_b() -> f64 {
    0.75
}

const fn default_candidate_multiplier() -> usize {
    4
}

const fn default_provider_timeout_ms() -> u64 {
    2_000
}

const fn default_rerank_window() -> usize {
    20
}

const fn default_max_concurrent() -> usize {
    4
}

const fn default_vector_max_concurrent() -> usize {
    16
}

const fn default_sweep_interval_secs() -> u64 {
    300
}

const fn default_query_pool() -> PoolConfig {
    PoolConfig {
        max_count: 1_000,
        max_bytes: 64 * 1024 * 1024,
        ttl_secs: 3_600,
    }
}

const fn default_document_pool() -> PoolConfig {
    PoolConfig {
        max_count: 5_000,
        max_bytes: 128 * 1024 * 1024,
        ttl_secs: 86_400,
    }
}

const fn default_embedding_pool() -> PoolConfig {
    PoolConfig {
        max_count: 10_000,
        max_bytes: 256 * 1024 * 1024,
        ttl_secs: 86_400,
    }
}

const fn default_metadata_pool() -> PoolConfig {
    PoolConfig {
        max_count: 5_000,
        max_bytes: 16 * 1024 * 1024,
        ttl_secs: 86_400,
    }
}

fn default_rerank_path() -> String {
    "/v1/rerank".to_string()
}
