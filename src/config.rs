//! TOML configuration parsing.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields a working local setup. A handful of `TABGROUP_*` environment
//! variables override the file before validation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub labels: LabelConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_embedding_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_embedding_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_retries() -> u32 {
    2
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

/// Density clustering and size-filter parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct ClusteringConfig {
    /// Maximum cosine distance for two tabs to count as neighbors.
    #[serde(default = "default_eps")]
    pub eps: f32,
    /// Smallest group presented as a cluster; smaller groups are dissolved.
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    /// Neighborhood size (including the point itself) that makes a core
    /// point. Falls back to `min_cluster_size` when unset.
    #[serde(default)]
    pub min_samples: Option<usize>,
}

impl ClusteringConfig {
    pub fn effective_min_samples(&self) -> usize {
        self.min_samples.unwrap_or(self.min_cluster_size)
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            eps: default_eps(),
            min_cluster_size: default_min_cluster_size(),
            min_samples: None,
        }
    }
}

fn default_eps() -> f32 {
    0.3
}
fn default_min_cluster_size() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelConfig {
    #[serde(default = "default_label_provider")]
    pub provider: String,
    #[serde(default = "default_label_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_label_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_fallback_title")]
    pub fallback_title: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            provider: default_label_provider(),
            model: default_label_model(),
            url: None,
            timeout_secs: default_label_timeout_secs(),
            max_retries: 0,
            max_concurrency: default_max_concurrency(),
            fallback_title: default_fallback_title(),
        }
    }
}

fn default_label_provider() -> String {
    "ollama".to_string()
}
fn default_label_model() -> String {
    "phi4-mini".to_string()
}
fn default_label_timeout_secs() -> u64 {
    20
}
fn default_max_concurrency() -> usize {
    4
}
fn default_fallback_title() -> String {
    "New Group".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

/// Default Ollama endpoint used by both embedding and label providers.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse, apply environment overrides, and validate a config document.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Overlay `TABGROUP_*` variables, looked up through `lookup`.
pub fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(model) = lookup("TABGROUP_EMBEDDING_MODEL") {
        config.embedding.model = model;
    }
    if let Some(size) = lookup("TABGROUP_MIN_CLUSTER_SIZE") {
        config.clustering.min_cluster_size = size
            .parse()
            .with_context(|| format!("TABGROUP_MIN_CLUSTER_SIZE is not an integer: {}", size))?;
    }
    if let Some(eps) = lookup("TABGROUP_EPS") {
        config.clustering.eps = eps
            .parse()
            .with_context(|| format!("TABGROUP_EPS is not a number: {}", eps))?;
    }
    if let Some(model) = lookup("TABGROUP_LABEL_MODEL") {
        config.labels.model = model;
    }
    Ok(())
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate clustering
    let eps = config.clustering.eps;
    if !eps.is_finite() || eps <= 0.0 {
        anyhow::bail!("clustering.eps must be a finite number > 0 (got {})", eps);
    }
    if config.clustering.min_cluster_size == 0 {
        anyhow::bail!("clustering.min_cluster_size must be >= 1");
    }
    if config.clustering.min_samples == Some(0) {
        anyhow::bail!("clustering.min_samples must be >= 1 when set");
    }

    // Validate embedding
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.timeout_secs == 0 {
        anyhow::bail!("embedding.timeout_secs must be > 0");
    }
    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0 when set");
    }
    match config.embedding.provider.as_str() {
        "disabled" | "local" | "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, local, ollama, or openai.",
            other
        ),
    }

    // Validate labels
    if config.labels.timeout_secs == 0 {
        anyhow::bail!("labels.timeout_secs must be > 0");
    }
    if config.labels.max_concurrency == 0 {
        anyhow::bail!("labels.max_concurrency must be >= 1");
    }
    match config.labels.provider.as_str() {
        "disabled" | "domain" | "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown label provider: '{}'. Must be disabled, domain, ollama, or openai.",
            other
        ),
    }

    Ok(())
}
