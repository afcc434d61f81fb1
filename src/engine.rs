//! Hybrid query orchestration.
//!
//! The engine wires the whole pipeline together:
//!
//! ```text
//! question → intent → expansion → (definitions ∥ semantic) → merge → format
//! ```
//!
//! Construction fails fast when either index artifact is missing; after
//! that the engine is stateless across queries ("loaded" is its only
//! state). The memory-mapped matrix and the metadata snapshot are shared
//! read-only by all queries; per-query scratch lives on the request.
//!
//! # Branch degradation
//!
//! The definition and semantic branches can fail independently. A failure
//! in one degrades the query to the other branch's results; only dimension
//! mismatches and cancellation abort the query outright.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::chunker::Chunker;
use crate::config::Config;
use crate::definitions::{
    dedupe_and_rank, match_quality, CandidateFile, DefinitionExtractor, DefinitionMatch,
};
use crate::embedding::encode_query;
use crate::error::QueryError;
use crate::expansion;
use crate::filter::SearchFilters;
use crate::intent::{infer_entity_kind, is_ue5_entity_token, Intent, IntentAnalyzer};
use crate::models::{
    CancelToken, CombinedHit, DefinitionHit, EntityKind, IntentReport, QueryResult, QueryType,
    Scope, SemanticHit, Timing,
};
use crate::paths;
use crate::rerank::Reranker;
use crate::search::{FilteredSearch, SearchHit, SearchOptions};
use crate::store::{FtsDefinition, MetadataStore};
use crate::vectors::VectorStore;

/// Definition text is truncated to this many bytes for transport.
const MAX_DEFINITION_CHARS: usize = 32_000;
/// Members shown per definition result; the rest are counted only.
const MAX_MEMBERS_SHOWN: usize = 10;
/// The definition branch falls back to semantic search below this count.
const DEFINITION_FALLBACK_THRESHOLD: usize = 3;

/// Per-query options for [`HybridQueryEngine::query`].
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub question: String,
    pub top_k: usize,
    pub scope: Scope,
    pub use_reranker: bool,
    /// Relational filters. The `origin` field is overridden by `scope`.
    pub filters: SearchFilters,
    /// Per-query embedding model override.
    pub model: Option<String>,
    pub cancel: CancelToken,
}

impl QueryOptions {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            top_k: 5,
            scope: Scope::Engine,
            use_reranker: false,
            filters: SearchFilters::default(),
            model: None,
            cancel: CancelToken::new(),
        }
    }
}

/// The hybrid search engine. One instance per index; cheap to share behind
/// an `Arc` across request handlers.
#[derive(Debug)]
pub struct HybridQueryEngine {
    config: Config,
    store: MetadataStore,
    vectors: Arc<VectorStore>,
    search: FilteredSearch,
    analyzer: IntentAnalyzer,
    reranker: Reranker,
    chunker: Chunker,
    /// Candidate files per scope, computed once from the metadata store.
    scope_cache: HashMap<Scope, Vec<CandidateFile>>,
}

impl HybridQueryEngine {
    /// Open both index artifacts, verify they agree, and build the filter
    /// structures. Fails fast with [`QueryError::NotReady`] when an
    /// artifact is missing.
    pub async fn open(config: Config) -> Result<Self, QueryError> {
        let vectors = Arc::new(VectorStore::open(&config.index.vectors)?);
        let store = MetadataStore::open(&config.index.metadata).await?;
        store.verify_vector_indices(vectors.rows()).await?;

        // Instantiating the provider validates its configuration (model
        // name, API key) before the first query. A declared-dimension
        // mismatch is only a warning here; the hard check runs on every
        // encoded query.
        if config.embedding.is_enabled() {
            let provider =
                crate::embedding::create_provider(&config.embedding).map_err(QueryError::Internal)?;
            if let Some(dims) = provider.dims() {
                if dims != vectors.dims() {
                    warn!(
                        model = provider.model_name(),
                        declared = dims,
                        store = vectors.dims(),
                        "embedding model dimensionality disagrees with the vector store; \
                         semantic queries will fail"
                    );
                }
            }
        }

        let meta = store.load_chunk_meta().await.map_err(QueryError::Internal)?;
        let search = FilteredSearch::new(meta, Arc::clone(&vectors), config.retrieval.clone())?;

        let files = store.indexed_files().await.map_err(QueryError::Internal)?;
        let mut scope_cache: HashMap<Scope, Vec<CandidateFile>> = HashMap::new();
        for scope in [Scope::All, Scope::Engine, Scope::Project] {
            scope_cache.insert(scope, Vec::new());
        }
        for (path, origin) in files {
            let candidate = CandidateFile {
                path: PathBuf::from(&path),
                origin,
            };
            scope_cache
                .get_mut(&Scope::All)
                .expect("all scopes pre-seeded")
                .push(candidate.clone());
            let scope = match origin {
                crate::models::Origin::Engine => Scope::Engine,
                crate::models::Origin::Project => Scope::Project,
            };
            scope_cache
                .get_mut(&scope)
                .expect("all scopes pre-seeded")
                .push(candidate);
        }

        info!(
            chunks = search.chunk_count(),
            dims = vectors.dims(),
            model = vectors.model(),
            "hybrid query engine ready"
        );

        let reranker = Reranker::new(&config.reranker.model);
        let chunker = Chunker::from_config(&config.chunking);

        Ok(Self {
            config,
            store,
            vectors,
            search,
            analyzer: IntentAnalyzer::new(),
            reranker,
            chunker,
            scope_cache,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn vectors(&self) -> &VectorStore {
        &self.vectors
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Run the full hybrid pipeline for one query.
    pub async fn query(&self, options: &QueryOptions) -> Result<QueryResult, QueryError> {
        let question = options.question.as_str();
        if question.trim().is_empty() {
            return Ok(QueryResult::empty(question, options.scope));
        }

        let total_timer = Instant::now();
        let mut timing = Timing::default();

        let t = Instant::now();
        let intent = self.analyzer.analyze(question);
        timing.intent_analysis_s = Some(t.elapsed().as_secs_f64());

        let t = Instant::now();
        let expanded_terms = expansion::expand(question);
        timing.expansion_s = Some(t.elapsed().as_secs_f64());

        let expanded_query = if expanded_terms.len() > 1 {
            expanded_terms.join(" ")
        } else {
            intent.enhanced_query.clone()
        };

        // Expansion that surfaces a UE5 identifier upgrades a semantic
        // query to run the definition branch too ("how does hit detection
        // work" should also try FHitResult). The reported intent keeps its
        // original classification.
        let expansion_has_entities = intent.query_type == QueryType::Semantic
            && expanded_terms.iter().any(|t| is_ue5_entity_token(t));
        if expansion_has_entities {
            info!("expansion produced UE5 entities; running the definition branch as well");
        }

        let run_definitions = matches!(
            intent.query_type,
            QueryType::Definition | QueryType::Hybrid
        ) || expansion_has_entities;

        let mut definition_results: Vec<DefinitionHit> = Vec::new();
        let mut definition_error: Option<QueryError> = None;

        if run_definitions {
            let t = Instant::now();
            match self
                .definition_branch(&intent, options.scope, &expanded_terms, &options.cancel)
                .await
            {
                Ok(hits) => definition_results = hits,
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "definition branch failed; degrading to semantic results");
                    definition_error = Some(e);
                }
            }
            timing.definition_extraction_s = Some(t.elapsed().as_secs_f64());
        }

        if options.cancel.is_cancelled() {
            return Err(QueryError::Cancelled);
        }

        let is_fallback = intent.query_type == QueryType::Definition
            && definition_results.len() < DEFINITION_FALLBACK_THRESHOLD;
        let run_semantic = matches!(intent.query_type, QueryType::Semantic | QueryType::Hybrid)
            || is_fallback;

        let mut semantic_results: Vec<SemanticHit> = Vec::new();
        let mut semantic_error: Option<QueryError> = None;

        if run_semantic {
            if is_fallback {
                info!(
                    found = definition_results.len(),
                    "falling back to semantic search"
                );
            }
            let t = Instant::now();
            match self
                .semantic_branch(&intent, options, &expanded_query, &mut timing)
                .await
            {
                Ok(hits) => semantic_results = hits,
                // Dimension mismatches and cancellation abort the query.
                Err(e @ QueryError::DimensionMismatch { .. }) | Err(e @ QueryError::Cancelled) => {
                    return Err(e)
                }
                Err(e) => {
                    warn!(error = %e, "semantic branch failed; degrading to definition results");
                    semantic_error = Some(e);
                }
            }
            timing.semantic_search_s = Some(t.elapsed().as_secs_f64());
        }

        // Dual failure surfaces the first error; a branch that failed while
        // the other never ran has nothing to degrade to.
        match (definition_error, semantic_error) {
            (Some(first), Some(_)) => return Err(first),
            (Some(e), None) if !run_semantic => return Err(e),
            (None, Some(e)) if !run_definitions => return Err(e),
            _ => {}
        }

        let combined_results =
            merge_results(&definition_results, &semantic_results, options.top_k);

        timing.total_s = total_timer.elapsed().as_secs_f64();

        Ok(QueryResult {
            question: question.to_string(),
            intent: IntentReport {
                query_type: intent.query_type,
                entity_type: intent.entity_kind,
                entity_name: intent.entity_name.clone(),
                confidence: intent.confidence,
                reasoning: intent.reasoning.clone(),
                enhanced_query: intent.enhanced_query.clone(),
                scope: options.scope.as_str().to_string(),
                expanded_terms,
                is_file_search: intent.is_file_search,
            },
            definition_results,
            semantic_results,
            combined_results,
            timing,
        })
    }

    // -- definition branch --------------------------------------------------

    async fn definition_branch(
        &self,
        intent: &Intent,
        scope: Scope,
        expanded_terms: &[String],
        cancel: &CancelToken,
    ) -> Result<Vec<DefinitionHit>, QueryError> {
        let mut targets: Vec<(String, EntityKind)> = Vec::new();
        if let Some(name) = &intent.entity_name {
            targets.push((name.clone(), intent.entity_kind.unwrap_or(EntityKind::Unknown)));
        }
        for term in expanded_terms {
            if targets.iter().any(|(name, _)| name == term) {
                continue;
            }
            let kind = infer_entity_kind(term);
            if kind != EntityKind::Unknown {
                targets.push((term.clone(), kind));
            }
        }
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let files = self
            .scope_cache
            .get(&scope)
            .or_else(|| self.scope_cache.get(&Scope::All))
            .cloned()
            .unwrap_or_default();

        // File scanning is CPU+IO bound; keep it off the async reactor.
        let cancel = cancel.clone();
        let targets_for_scan = targets.clone();
        let matches = tokio::task::spawn_blocking(move || {
            let extractor = DefinitionExtractor::new(files);
            let mut all: Vec<DefinitionMatch> = Vec::new();
            for (name, kind) in &targets_for_scan {
                all.extend(extractor.extract(name, *kind, true, &cancel)?);
            }
            Ok::<_, QueryError>(dedupe_and_rank(all))
        })
        .await
        .map_err(|e| QueryError::Internal(e.into()))??;

        if !matches.is_empty() {
            return Ok(matches.iter().map(format_definition).collect());
        }

        // Fallback: the FTS index over stored definitions can still answer
        // when no candidate source file matched (or files moved).
        let needle = intent
            .entity_name
            .clone()
            .unwrap_or_else(|| targets[0].0.clone());
        let fts_hits = self
            .store
            .search_definitions(&needle, DEFINITION_FALLBACK_THRESHOLD as i64 * 2)
            .await
            .map_err(QueryError::Internal)?;

        Ok(fts_hits
            .iter()
            .map(|row| format_fts_definition(row, &needle))
            .collect())
    }

    // -- semantic branch ----------------------------------------------------

    async fn semantic_branch(
        &self,
        intent: &Intent,
        options: &QueryOptions,
        expanded_query: &str,
        timing: &mut Timing,
    ) -> Result<Vec<SemanticHit>, QueryError> {
        if options.cancel.is_cancelled() {
            return Err(QueryError::Cancelled);
        }

        // Per-query model override, if any.
        let mut embed_config = self.config.embedding.clone();
        if let Some(model) = &options.model {
            embed_config.model = Some(model.clone());
        }

        let t = Instant::now();
        let query_vec = encode_query(&embed_config, expanded_query, self.vectors.dims()).await?;
        timing.embed_s = Some(t.elapsed().as_secs_f64());

        let oversample = options.use_reranker || intent.is_file_search;
        let search_k = if oversample {
            options.top_k * self.config.retrieval.oversample
        } else {
            options.top_k
        };

        let mut filters = options.filters.clone();
        if let Some(origin) = options.scope.origin_filter() {
            filters.origin = Some(origin);
        }

        let boost_entities: Vec<String> = intent.entity_name.clone().into_iter().collect();

        let t = Instant::now();
        let search_options = SearchOptions {
            top_k: search_k,
            filters,
            boost_entities: &boost_entities,
            boost_macros: true,
            use_logical_boosts: true,
            query_text: Some(expanded_query),
            query_type: Some(intent.query_type),
        };
        let raw_hits = self.search.search(&query_vec, &search_options)?;
        timing.select_s = Some(t.elapsed().as_secs_f64());

        let mut hits: Vec<SemanticHit> = Vec::with_capacity(raw_hits.len());
        let mut seen_files = std::collections::HashSet::new();
        for hit in raw_hits {
            if intent.is_file_search && !seen_files.insert(hit.path.clone()) {
                continue;
            }
            hits.push(to_semantic_hit(hit));
        }

        if options.use_reranker {
            if options.cancel.is_cancelled() {
                return Err(QueryError::Cancelled);
            }
            let t = Instant::now();
            for hit in &mut hits {
                if hit.text_snippet.is_none() {
                    hit.text_snippet = self.chunk_text(&hit.path, hit.chunk_index);
                }
            }
            match self
                .reranker
                .rerank(&options.question, std::mem::take(&mut hits), options.top_k)
            {
                Ok(reranked) => hits = reranked,
                Err(e) => {
                    warn!(error = %e, "rerank failed; keeping vector order");
                    // `hits` was taken; re-run the cheap conversion path.
                    let fallback = self.search.search(&query_vec, &search_options)?;
                    hits = fallback.into_iter().map(to_semantic_hit).collect();
                    hits.truncate(options.top_k);
                }
            }
            timing.rerank_s = Some(t.elapsed().as_secs_f64());
        } else {
            hits.truncate(options.top_k);
        }

        Ok(hits)
    }

    /// Recover a chunk's text by re-reading the file and re-running the
    /// chunker with the index-time parameters. The chunker is deterministic,
    /// so `chunks[chunk_index]` is the original text.
    fn chunk_text(&self, path: &str, chunk_index: i64) -> Option<String> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path, error = %e, "cannot re-read file for chunk text");
                return None;
            }
        };
        let text = String::from_utf8_lossy(&bytes);
        let chunks = self.chunker.chunk(&text);
        usize::try_from(chunk_index)
            .ok()
            .and_then(|i| chunks.into_iter().nth(i))
    }
}

/// Merge per the formatting contract: definitions first (already ranked),
/// then semantic hits whose path is not already covered by a definition,
/// truncated to `top_k`.
pub fn merge_results(
    definitions: &[DefinitionHit],
    semantic: &[SemanticHit],
    top_k: usize,
) -> Vec<CombinedHit> {
    let mut combined: Vec<CombinedHit> = Vec::new();

    if !definitions.is_empty() && !semantic.is_empty() {
        combined.extend(definitions.iter().cloned().map(CombinedHit::Definition));
        let covered: std::collections::HashSet<String> = definitions
            .iter()
            .map(|d| paths::normalize_for_compare(&d.file_path))
            .collect();
        for hit in semantic {
            if !covered.contains(&paths::normalize_for_compare(&hit.path)) {
                combined.push(CombinedHit::Semantic(hit.clone()));
            }
        }
        combined.truncate(top_k);
    } else if !definitions.is_empty() {
        combined.extend(definitions.iter().cloned().map(CombinedHit::Definition));
        combined.truncate(top_k);
    } else {
        combined.extend(semantic.iter().cloned().map(CombinedHit::Semantic));
        combined.truncate(top_k);
    }

    combined
}

fn to_semantic_hit(hit: SearchHit) -> SemanticHit {
    SemanticHit {
        result_type: "semantic".to_string(),
        path: hit.path,
        chunk_index: hit.chunk_index,
        total_chunks: hit.total_chunks,
        score: hit.score,
        boosted: true,
        origin: hit.origin,
        entities: hit.entities,
        text_snippet: hit.text_snippet,
        vector_score: None,
        rerank_score: None,
    }
}

fn format_definition(m: &DefinitionMatch) -> DefinitionHit {
    let path = m.file_path.display().to_string();
    let module_info = paths::guess_module_and_include(&path);

    let mut definition = m.definition.clone();
    if definition.len() > MAX_DEFINITION_CHARS {
        let cut = (0..=MAX_DEFINITION_CHARS)
            .rev()
            .find(|&i| definition.is_char_boundary(i))
            .unwrap_or(0);
        definition.truncate(cut);
    }

    DefinitionHit {
        result_type: "definition".to_string(),
        file_path: path,
        line_start: m.line_start,
        line_end: m.line_end,
        entity_type: m.kind,
        entity_name: m.entity_name.clone(),
        definition,
        members: m
            .members
            .iter()
            .take(MAX_MEMBERS_SHOWN)
            .map(|member| member.display())
            .collect(),
        total_members: m.members.len(),
        match_quality: m.match_quality,
        origin: m.origin,
        module: module_info.module,
        include: module_info.include,
    }
}

fn format_fts_definition(row: &FtsDefinition, query_name: &str) -> DefinitionHit {
    let module_info = paths::guess_module_and_include(&row.file_path);
    DefinitionHit {
        result_type: "definition".to_string(),
        file_path: row.file_path.clone(),
        line_start: row.line_start.max(0) as u32,
        line_end: row.line_end.max(0) as u32,
        entity_type: row.entity_kind,
        entity_name: row.entity_name.clone(),
        definition: row.content.clone(),
        members: Vec::new(),
        total_members: 0,
        match_quality: match_quality(query_name, &row.entity_name, true),
        origin: row.origin,
        module: module_info.module,
        include: module_info.include,
    }
}

/// Machine-readable tool schema for agent integrations (`ueq describe`).
pub fn tool_schema() -> serde_json::Value {
    serde_json::json!({
        "name": "ue_source_search",
        "description": "Hybrid semantic search and definition extraction for Unreal Engine 5 \
                        source code. Use this to find C++ classes, structs, functions, and \
                        related implementation code.",
        "input_schema": {
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The search query (e.g. 'How does FHitResult work?', \
                                    'UCharacterMovementComponent::PhysSlide')"
                },
                "scope": {
                    "type": "string",
                    "enum": ["engine", "project", "all"],
                    "default": "engine",
                    "description": "Limit search to engine source, project source, or both."
                },
                "top_k": {
                    "type": "integer",
                    "default": 5,
                    "description": "Number of results to return."
                },
                "format": {
                    "type": "string",
                    "enum": ["text", "json", "jsonl", "xml", "markdown", "code", "path"],
                    "default": "text",
                    "description": "Output format. Use 'json' for programmatic parsing."
                }
            },
            "required": ["question"]
        },
        "capabilities": {
            "semantic_search": true,
            "exact_definition_lookup": true,
            "streaming": false
        }
    })
}
