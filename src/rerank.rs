//! Cross-encoder reranking.
//!
//! A cross-encoder scores (query, document) pairs jointly, which is slower
//! but considerably more precise than bi-encoder cosine similarity. It is
//! strictly optional: the engine oversamples the semantic candidates by a
//! configured factor, reranks them here, and truncates back to `top_k`.
//!
//! The model loads lazily on first use, at most once per process, behind a
//! mutex. Queries that never ask for reranking never pay for it.
//!
//! Each candidate is paired with its best available text: the stored or
//! hydrated chunk snippet, falling back to a synthetic string built from
//! the path and entity names.

use anyhow::Result;

use crate::models::SemanticHit;

/// Lazily-initialized cross-encoder reranker.
pub struct Reranker {
    model_name: String,
    #[cfg(feature = "local-models")]
    model: std::sync::Mutex<Option<fastembed::TextRerank>>,
}

impl std::fmt::Debug for Reranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reranker")
            .field("model_name", &self.model_name)
            .finish()
    }
}

impl Reranker {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            #[cfg(feature = "local-models")]
            model: std::sync::Mutex::new(None),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Rescore `hits` against `query` and return the best `top_k`.
    ///
    /// The pre-rerank score is preserved as `vector_score` on every hit for
    /// diagnostics. Without the `local-models` feature this truncates the
    /// input unchanged.
    pub fn rerank(
        &self,
        query: &str,
        mut hits: Vec<SemanticHit>,
        top_k: usize,
    ) -> Result<Vec<SemanticHit>> {
        if hits.is_empty() {
            return Ok(hits);
        }

        let documents: Vec<String> = hits.iter().map(pair_text).collect();
        let scores = self.score_pairs(query, &documents)?;

        let Some(scores) = scores else {
            hits.truncate(top_k);
            return Ok(hits);
        };

        for (hit, score) in hits.iter_mut().zip(&scores) {
            hit.vector_score = Some(hit.score);
            hit.rerank_score = Some(*score);
            hit.score = *score;
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    #[cfg(feature = "local-models")]
    fn score_pairs(&self, query: &str, documents: &[String]) -> Result<Option<Vec<f32>>> {
        let mut guard = self.model.lock().expect("reranker cache poisoned");

        if guard.is_none() {
            tracing::info!(model = %self.model_name, "loading cross-encoder");
            let model = to_rerank_model(&self.model_name)?;
            let reranker = fastembed::TextRerank::try_new(
                fastembed::RerankInitOptions::new(model).with_show_download_progress(true),
            )
            .map_err(|e| anyhow::anyhow!("failed to initialize cross-encoder: {e}"))?;
            *guard = Some(reranker);
        }

        let reranker = guard.as_mut().expect("initialized above");
        let refs: Vec<&str> = documents.iter().map(String::as_str).collect();
        let results = reranker
            .rerank(query, refs, false, None)
            .map_err(|e| anyhow::anyhow!("cross-encoder scoring failed: {e}"))?;

        // fastembed returns results sorted by score; restore input order.
        let mut scores = vec![0.0f32; documents.len()];
        for result in results {
            scores[result.index] = result.score;
        }
        Ok(Some(scores))
    }

    #[cfg(not(feature = "local-models"))]
    fn score_pairs(&self, _query: &str, _documents: &[String]) -> Result<Option<Vec<f32>>> {
        tracing::warn!("reranker requested but the local-models feature is disabled");
        Ok(None)
    }
}

#[cfg(feature = "local-models")]
fn to_rerank_model(name: &str) -> Result<fastembed::RerankerModel> {
    match name {
        "bge-reranker-base" => Ok(fastembed::RerankerModel::BGERerankerBase),
        "jina-reranker-v1-turbo-en" => Ok(fastembed::RerankerModel::JINARerankerV1TurboEn),
        other => anyhow::bail!(
            "Unknown reranker model: '{}'. Supported: bge-reranker-base, \
             jina-reranker-v1-turbo-en",
            other
        ),
    }
}

/// Best available document text for a candidate.
fn pair_text(hit: &SemanticHit) -> String {
    match &hit.text_snippet {
        Some(text) if !text.is_empty() => text.clone(),
        _ => format!("{} {}", hit.path, hit.entities.join(" ")),
    }
}
