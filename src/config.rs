//! Configuration parsing and validation.
//!
//! The engine is configured via a TOML file (default: `config/ueq.toml`).
//! The config names the two index artifacts (vector file, metadata store),
//! the embedding provider, the chunking parameters that must match the ones
//! used at index-build time, retrieval tuning, and the server bind address.
//!
//! The engine never writes the index; mismatches between the config and the
//! on-disk artifacts (missing files, wrong embedding dimensionality) are
//! fatal at engine construction or at query time respectively.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Locations of the pre-built index artifacts.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Dense vector matrix: raw row-major little-endian f32, with a JSON
    /// sidecar (`<stem>.json`) declaring `rows`, `dims`, and `model`.
    pub vectors: PathBuf,
    /// SQLite metadata store (files, chunks, entities, definitions, FTS).
    pub metadata: PathBuf,
}

/// Chunking parameters. These must match the values used when the index was
/// built; chunk-text reconstruction re-runs the chunker with them.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    /// Split at C++ structural boundaries instead of fixed-size windows.
    #[serde(default = "default_true")]
    pub semantic: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            min_chunk_size: default_min_chunk_size(),
            overlap: default_overlap(),
            semantic: true,
        }
    }
}

fn default_max_chunk_size() -> usize {
    2000
}
fn default_min_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    200
}
fn default_true() -> bool {
    true
}

/// Retrieval tuning. The sparse-score magnitudes are calibration choices,
/// not derived quantities, so they live in configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Candidate multiplier used when reranking or deduplicating by file.
    #[serde(default = "default_oversample")]
    pub oversample: usize,
    /// Sparse score added when a query token appears in the file base name.
    #[serde(default = "default_sparse_file_weight")]
    pub sparse_file_weight: f32,
    /// Sparse score added when a query token appears in the full path.
    #[serde(default = "default_sparse_path_weight")]
    pub sparse_path_weight: f32,
    /// Sparse score added when a query token equals an entity name.
    #[serde(default = "default_sparse_entity_weight")]
    pub sparse_entity_weight: f32,
    /// Sparse score added when a query token is a substring of an entity name.
    #[serde(default = "default_sparse_entity_substring_weight")]
    pub sparse_entity_substring_weight: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            oversample: default_oversample(),
            sparse_file_weight: default_sparse_file_weight(),
            sparse_path_weight: default_sparse_path_weight(),
            sparse_entity_weight: default_sparse_entity_weight(),
            sparse_entity_substring_weight: default_sparse_entity_substring_weight(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_oversample() -> usize {
    10
}
fn default_sparse_file_weight() -> f32 {
    0.4
}
fn default_sparse_path_weight() -> f32 {
    0.1
}
fn default_sparse_entity_weight() -> f32 {
    0.5
}
fn default_sparse_entity_substring_weight() -> f32 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled`, `hash`, `openai`, `ollama`, or `local`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Vector dimensionality. Must match the sidecar schema of the vector
    /// store; validated on every query.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 32,
            max_retries: 5,
            timeout_secs: 30,
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Cross-encoder reranker settings. The model loads lazily on first use;
/// queries that do not pass `--use-reranker` never touch it.
#[derive(Debug, Deserialize, Clone)]
pub struct RerankerConfig {
    #[serde(default = "default_reranker_model")]
    pub model: String,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            model: default_reranker_model(),
        }
    }
}

fn default_reranker_model() -> String {
    "bge-reranker-base".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Environment variable holding the API key. Auth is enforced only when
    /// the variable resolves to a non-empty value at startup.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// In-flight search cap; requests beyond it get a retryable 503.
    #[serde(default = "default_max_concurrent_searches")]
    pub max_concurrent_searches: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_key_env: default_api_key_env(),
            max_concurrent_searches: default_max_concurrent_searches(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}
fn default_api_key_env() -> String {
    "UEQ_API_KEY".to_string()
}
fn default_max_concurrent_searches() -> usize {
    8
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chunk_size == 0 {
        anyhow::bail!("chunking.max_chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.max_chunk_size {
        anyhow::bail!("chunking.overlap must be smaller than chunking.max_chunk_size");
    }

    if config.retrieval.oversample == 0 {
        anyhow::bail!("retrieval.oversample must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
            other
        ),
    }

    if config.embedding.is_enabled() && config.embedding.provider != "hash" {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.provider == "hash" && config.embedding.dims.unwrap_or(0) == 0 {
        anyhow::bail!("embedding.dims must be > 0 when provider is 'hash'");
    }

    if config.server.max_concurrent_searches == 0 {
        anyhow::bail!("server.max_concurrent_searches must be >= 1");
    }

    Ok(())
}
