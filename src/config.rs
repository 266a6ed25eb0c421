use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory holding one subdirectory per user.
    pub data_root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Embedding dimension D. Fixed for the lifetime of an existing index;
    /// changing it requires `admin reindex`.
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_hnsw_m")]
    pub hnsw_m: usize,
    #[serde(default = "default_ef_construction")]
    pub hnsw_ef_construction: usize,
    #[serde(default = "default_ef_search")]
    pub hnsw_ef_search: usize,
    /// Tombstone ratio at which a delete triggers compaction.
    #[serde(default = "default_compact_threshold")]
    pub compact_threshold: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dims: default_dims(),
            hnsw_m: default_hnsw_m(),
            hnsw_ef_construction: default_ef_construction(),
            hnsw_ef_search: default_ef_search(),
            compact_threshold: default_compact_threshold(),
        }
    }
}

fn default_dims() -> usize {
    384
}
fn default_hnsw_m() -> usize {
    16
}
fn default_ef_construction() -> usize {
    200
}
fn default_ef_search() -> usize {
    64
}
fn default_compact_threshold() -> f64 {
    0.25
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"hashing"` (local, deterministic) or `"openai"` (remote API).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// Opaque model identity recorded alongside the index.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            base_url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hashing".to_string()
}
fn default_embedding_model() -> String {
    "token-hash-v1".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `"openai"` (any OpenAI-compatible chat endpoint), `"ollama"`, or
    /// `"disabled"` (deterministic extractive fallback answers).
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: String::new(),
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

fn default_llm_provider() -> String {
    "disabled".to_string()
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_temperature() -> f32 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Default K for retrieval; per-request values are clamped to 1..=20.
    #[serde(default = "default_k")]
    pub k_default: usize,
    /// Character budget for assembled grounding context.
    #[serde(default = "default_context_budget")]
    pub context_budget_chars: usize,
    /// Per-source snippet length used during context assembly.
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_default: default_k(),
            context_budget_chars: default_context_budget(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_context_budget() -> usize {
    8000
}
fn default_snippet_chars() -> usize {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    /// Per-question deadline; elapsing at any await point cancels the call.
    #[serde(default = "default_query_deadline_secs")]
    pub query_deadline_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            max_message_chars: default_max_message_chars(),
            query_deadline_secs: default_query_deadline_secs(),
        }
    }
}

fn default_max_file_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_max_message_chars() -> usize {
    100_000
}
fn default_query_deadline_secs() -> u64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.index.dims == 0 {
        anyhow::bail!("index.dims must be > 0");
    }

    if !(1..=20).contains(&config.retrieval.k_default) {
        anyhow::bail!("retrieval.k_default must be in 1..=20");
    }

    if config.retrieval.context_budget_chars == 0 || config.retrieval.snippet_chars == 0 {
        anyhow::bail!("retrieval budgets must be > 0");
    }

    if !(0.0..=1.0).contains(&config.index.compact_threshold) {
        anyhow::bail!("index.compact_threshold must be in [0.0, 1.0]");
    }

    match config.embedding.provider.as_str() {
        "hashing" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hashing or openai.",
            other
        ),
    }

    if config.embedding.provider == "openai" && config.embedding.model.is_empty() {
        anyhow::bail!("embedding.model must be set when provider is 'openai'");
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.llm.provider != "disabled" && config.llm.model.is_empty() {
        anyhow::bail!("llm.model must be set when provider is '{}'", config.llm.provider);
    }

    Ok(())
}
