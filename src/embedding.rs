//! Query embedding providers.
//!
//! The bi-encoder that turns query text into a vector comparable with the
//! stored chunk matrix. Backends:
//!
//! - **disabled** — always errors; definition-only deployments.
//! - **hash** — deterministic feature-hashing embedder. No model, no
//!   network, fully reproducible; used by tests and smoke setups.
//! - **openai** — `POST /v1/embeddings` with batching, retry, and backoff.
//! - **ollama** — local Ollama `/api/embed` endpoint.
//! - **local** — fastembed models, downloaded once and cached process-wide
//!   (feature `local-models`).
//!
//! Whatever the backend, [`encode_query`] L2-normalizes the result and
//! verifies its dimensionality against the vector store before any search
//! runs: a mismatch fails the query, never a partial search.
//!
//! # Retry strategy (HTTP providers)
//!
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, ... capped).
//! - Other 4xx → fail immediately.
//! - Network errors → retry.

use std::time::Duration;

use anyhow::{bail, Result};

use crate::config::EmbeddingConfig;
use crate::error::QueryError;
use crate::vectors::l2_normalize;

/// Metadata interface implemented by every embedding backend.
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality, when known up front.
    fn dims(&self) -> Option<usize>;
}

/// Create the provider described by the configuration.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "hash" => Ok(Box::new(HashProvider::new(config)?)),
        "openai" => Ok(Box::new(RemoteProvider::new(config, "openai")?)),
        "ollama" => Ok(Box::new(RemoteProvider::new(config, "ollama")?)),
        #[cfg(feature = "local-models")]
        "local" => Ok(Box::new(LocalProvider::new(config))),
        #[cfg(not(feature = "local-models"))]
        "local" => bail!("Local embedding provider requires --features local-models"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Embed a batch of texts with the configured backend.
pub async fn embed_texts(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    match config.provider.as_str() {
        "hash" => {
            let dims = config
                .dims
                .ok_or_else(|| anyhow::anyhow!("embedding.dims required for hash provider"))?;
            Ok(texts.iter().map(|t| hash_embed(t, dims)).collect())
        }
        "openai" => embed_openai(config, texts).await,
        "ollama" => embed_ollama(config, texts).await,
        #[cfg(feature = "local-models")]
        "local" => embed_local(config, texts).await,
        #[cfg(not(feature = "local-models"))]
        "local" => bail!("Local embedding provider requires --features local-models"),
        "disabled" => bail!("Embedding provider is disabled"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a single query: embed, L2-normalize, and enforce the store's
/// dimensionality. This is the only embedding entry point the query
/// pipeline uses.
pub async fn encode_query(
    config: &EmbeddingConfig,
    text: &str,
    expected_dims: usize,
) -> Result<Vec<f32>, QueryError> {
    let mut vectors = embed_texts(config, &[text.to_string()])
        .await
        .map_err(QueryError::Internal)?;
    let mut vector = vectors
        .pop()
        .ok_or_else(|| QueryError::Internal(anyhow::anyhow!("empty embedding response")))?;

    if vector.len() != expected_dims {
        return Err(QueryError::DimensionMismatch {
            query: vector.len(),
            store: expected_dims,
        });
    }

    l2_normalize(&mut vector);
    Ok(vector)
}

// ============ Disabled ============

/// Placeholder provider for deployments without semantic search.
pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> Option<usize> {
        None
    }
}

// ============ Hash ============

/// Deterministic feature-hashing embedder.
///
/// Tokens are FNV-1a hashed into `dims` signed buckets and the result is
/// L2-normalized. Nowhere near a learned model in quality, but exactly
/// reproducible with zero dependencies, which is what index smoke tests and
/// CI need.
pub struct HashProvider {
    dims: usize,
}

impl HashProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for hash provider"))?;
        anyhow::ensure!(dims > 0, "embedding.dims must be > 0");
        Ok(Self { dims })
    }
}

impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        "feature-hash"
    }
    fn dims(&self) -> Option<usize> {
        Some(self.dims)
    }
}

/// Feature-hash `text` into a normalized `dims`-vector.
pub fn hash_embed(text: &str, dims: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dims];
    for token in text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
    {
        let hash = fnv1a(token.to_lowercase().as_bytes());
        let bucket = (hash % dims as u64) as usize;
        let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }
    l2_normalize(&mut vector);
    vector
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

// ============ Remote (OpenAI / Ollama) ============

/// Metadata for the HTTP-backed providers.
pub struct RemoteProvider {
    model: String,
    dims: Option<usize>,
}

impl RemoteProvider {
    fn new(config: &EmbeddingConfig, kind: &str) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for {kind} provider"))?;
        if kind == "openai" && std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }
        Ok(Self {
            model,
            dims: config.dims,
        })
    }
}

impl EmbeddingProvider for RemoteProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> Option<usize> {
        self.dims
    }
}

/// POST a JSON body with exponential backoff on 429/5xx and network errors.
async fn post_with_backoff(
    config: &EmbeddingConfig,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
) -> Result<serde_json::Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }
                let text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow::anyhow!("embedding API error {status}: {text}"));
                    continue;
                }
                bail!("embedding API error {status}: {text}");
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding failed after retries")))
}

async fn embed_openai(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;

    let body = serde_json::json!({ "model": model, "input": texts });
    let json = post_with_backoff(
        config,
        "https://api.openai.com/v1/embeddings",
        Some(&api_key),
        &body,
    )
    .await?;

    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid OpenAI response: missing data array"))?;

    data.iter()
        .map(|item| {
            item.get("embedding")
                .and_then(|e| e.as_array())
                .map(|values| {
                    values
                        .iter()
                        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                        .collect()
                })
                .ok_or_else(|| anyhow::anyhow!("invalid OpenAI response: missing embedding"))
        })
        .collect()
}

async fn embed_ollama(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;
    let base = config.url.as_deref().unwrap_or("http://localhost:11434");

    let body = serde_json::json!({ "model": model, "input": texts });
    let json = post_with_backoff(config, &format!("{base}/api/embed"), None, &body).await?;

    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| {
                    values
                        .iter()
                        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                        .collect()
                })
                .ok_or_else(|| anyhow::anyhow!("invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-models")]
pub use local::LocalProvider;

#[cfg(feature = "local-models")]
mod local {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;

    /// Process-wide model cache: the bi-encoder loads once, on first use,
    /// and is shared by every query thereafter. Keyed by model name so a
    /// per-query model override can swap it.
    static MODEL_CACHE: Lazy<Mutex<Option<(String, fastembed::TextEmbedding)>>> =
        Lazy::new(|| Mutex::new(None));

    /// Embedding provider running fastembed models locally. Models download
    /// on first use and are cached; after that no network is needed.
    pub struct LocalProvider {
        model_name: String,
        dims: usize,
    }

    impl LocalProvider {
        pub fn new(config: &EmbeddingConfig) -> Self {
            let model_name = config
                .model
                .clone()
                .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
            let dims = config.dims.unwrap_or_else(|| default_dims(&model_name));
            Self { model_name, dims }
        }
    }

    impl EmbeddingProvider for LocalProvider {
        fn model_name(&self) -> &str {
            &self.model_name
        }
        fn dims(&self) -> Option<usize> {
            Some(self.dims)
        }
    }

    fn default_dims(model_name: &str) -> usize {
        match model_name {
            "all-minilm-l6-v2" | "bge-small-en-v1.5" | "multilingual-e5-small" => 384,
            "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5"
            | "multilingual-e5-base" => 768,
            "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
            _ => 384,
        }
    }

    fn to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
            "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
            "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
            "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
            "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
            other => bail!(
                "Unknown local embedding model: '{}'. Supported: all-minilm-l6-v2, \
                 bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
                 nomic-embed-text-v1, nomic-embed-text-v1.5, \
                 multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
                other
            ),
        }
    }

    /// Encode with the cached model, (re)initializing it when the requested
    /// model differs. CPU-bound, so async callers run it off the reactor.
    pub(super) async fn embed_local(
        config: &EmbeddingConfig,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let batch_size = config.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut cache = MODEL_CACHE.lock().expect("embedding model cache poisoned");

            let needs_init = !matches!(&*cache, Some((cached, _)) if cached == &model_name);
            if needs_init {
                let fastembed_model = to_fastembed_model(&model_name)?;
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
                )
                .map_err(|e| anyhow::anyhow!("failed to initialize embedding model: {e}"))?;
                *cache = Some((model_name.clone(), model));
            }

            let (_, model) = cache.as_mut().expect("cache populated above");
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("local embedding failed: {e}"))
        })
        .await?
    }
}

#[cfg(feature = "local-models")]
use local::embed_local;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectors::dot;

    #[test]
    fn test_disabled_provider() {
        let config = EmbeddingConfig::default();
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "disabled");
        assert_eq!(provider.dims(), None);
    }

    #[tokio::test]
    async fn test_disabled_embed_fails() {
        let config = EmbeddingConfig::default();
        let err = embed_texts(&config, &["hello".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    fn hash_config(dims: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "hash".to_string(),
            dims: Some(dims),
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_hash_embedding_is_deterministic_and_normalized() {
        let config = hash_config(64);
        let first = embed_texts(&config, &["FHitResult collision".to_string()])
            .await
            .unwrap();
        let second = embed_texts(&config, &["FHitResult collision".to_string()])
            .await
            .unwrap();
        assert_eq!(first, second);

        let v = &first[0];
        assert_eq!(v.len(), 64);
        let norm = dot(v, v).sqrt();
        assert!((norm - 1.0).abs() <= 1e-3, "norm = {norm}");
    }

    #[tokio::test]
    async fn test_hash_embedding_separates_topics() {
        let config = hash_config(128);
        let vectors = embed_texts(
            &config,
            &[
                "collision hit trace".to_string(),
                "collision hit trace impact".to_string(),
                "audio sound playback".to_string(),
            ],
        )
        .await
        .unwrap();

        let related = dot(&vectors[0], &vectors[1]);
        let unrelated = dot(&vectors[0], &vectors[2]);
        assert!(related > unrelated, "related texts should score higher");
    }

    #[tokio::test]
    async fn test_encode_query_checks_dims() {
        let config = hash_config(64);
        let err = encode_query(&config, "hello", 384).await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::DimensionMismatch { query: 64, store: 384 }
        ));

        let ok = encode_query(&config, "hello", 64).await.unwrap();
        assert_eq!(ok.len(), 64);
    }

    #[test]
    fn test_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "quantum".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(create_provider(&config).is_err());
    }

    #[test]
    fn test_fnv_is_stable() {
        // The bucket assignment is part of the index contract for hash
        // deployments; the constants must not drift.
        assert_eq!(fnv1a(b"FHitResult"), fnv1a(b"FHitResult"));
        assert_ne!(fnv1a(b"FHitResult"), fnv1a(b"FVector"));
    }
}
