//! Filtered semantic search.
//!
//! Given a normalized query vector, applies relational filters, computes
//! cosine similarity on the surviving subset of the memory-mapped matrix,
//! adds a sparse keyword score, applies rule-based boosts, and returns the
//! top-k chunks.
//!
//! # Filter bitmaps
//!
//! At construction the component precomputes one bitset of length N per
//! denormalized flag (macro flags, header/implementation, origin). Filter
//! intersection is then O(N/64) bitwise AND over words. List-membership
//! filters (entity name / kind) are applied in a second pass over the
//! surviving indices, since they are not pre-bitmapped.
//!
//! # Scoring
//!
//! ```text
//! score = (E[i] · q + sparse(i)) × boosts(i)
//! ```
//!
//! Dense and sparse fuse additively; the rule-based boosts multiply, as a
//! deliberately auditable alternative to a learned ranker. The sparse
//! magnitudes come from configuration (they are calibration constants).

use std::sync::Arc;

use tracing::debug;

use crate::config::RetrievalConfig;
use crate::definitions::strip_ue5_prefix;
use crate::error::QueryError;
use crate::filter::SearchFilters;
use crate::models::{FileType, Origin, QueryType};
use crate::store::ChunkMeta;
use crate::vectors::VectorStore;

/// Stop words removed from sparse-score queries. English-only; the query
/// language of UE5 source identifiers is English.
const STOP_WORDS: [&str; 20] = [
    "the", "a", "an", "is", "are", "of", "in", "on", "to", "for", "how", "does", "do", "what",
    "where", "which", "and", "or", "work", "works",
];

/// Boost factors. Unlike the sparse weights these are structural rules, not
/// calibration knobs.
const BOOST_ENTITY_MATCH: f32 = 1.2;
const BOOST_MACRO: f32 = 1.15;
const BOOST_FILENAME: f32 = 3.0;
const BOOST_HEADER: f32 = 2.5;
const BOOST_IMPLEMENTATION: f32 = 0.5;
const BOOST_NO_ENTITY_OVERLAP: f32 = 0.1;
const BOOST_RICH_DEFINITION: f32 = 1.3;
const RICH_DEFINITION_MIN_ENTITIES: usize = 3;

/// One retrieved chunk before output formatting.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub vector_index: usize,
    pub path: String,
    pub chunk_index: i64,
    pub total_chunks: i64,
    pub score: f32,
    pub origin: Origin,
    pub entities: Vec<String>,
    pub text_snippet: Option<String>,
}

/// Per-search options beyond the query vector itself.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions<'a> {
    pub top_k: usize,
    pub filters: SearchFilters,
    /// Entity names that boost chunks referencing them.
    pub boost_entities: &'a [String],
    /// Boost chunks carrying any UE5 reflection macro.
    pub boost_macros: bool,
    /// Enable the rule-based logical boosts (filename, header priority,
    /// co-occurrence penalty, rich-definition bonus).
    pub use_logical_boosts: bool,
    /// Raw query text for sparse keyword scoring.
    pub query_text: Option<&'a str>,
    /// Drives header-vs-implementation prioritization.
    pub query_type: Option<QueryType>,
}

/// Word-packed bitset over chunk indices.
#[derive(Debug)]
struct Bitmap {
    words: Vec<u64>,
}

impl Bitmap {
    fn zeros(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
        }
    }

    fn ones(len: usize) -> Self {
        let mut bitmap = Self {
            words: vec![u64::MAX; len.div_ceil(64)],
        };
        // Clear bits past the logical length.
        let tail = len % 64;
        if tail != 0 {
            if let Some(last) = bitmap.words.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
        bitmap
    }

    fn set(&mut self, i: usize) {
        self.words[i / 64] |= 1 << (i % 64);
    }

    fn and(&mut self, other: &Bitmap) {
        for (word, other_word) in self.words.iter_mut().zip(&other.words) {
            *word &= other_word;
        }
    }

    fn and_not(&mut self, other: &Bitmap) {
        for (word, other_word) in self.words.iter_mut().zip(&other.words) {
            *word &= !other_word;
        }
    }

    fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(word_idx, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    None
                } else {
                    let bit = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    Some(word_idx * 64 + bit)
                }
            })
        })
    }
}

/// Flag bitmaps rebuilt whenever the metadata store is (re)loaded — in
/// practice once, at engine construction.
#[derive(Debug)]
struct FlagBitmaps {
    uproperty: Bitmap,
    uclass: Bitmap,
    ufunction: Bitmap,
    ustruct: Bitmap,
    uenum: Bitmap,
    header: Bitmap,
    implementation: Bitmap,
    origin_engine: Bitmap,
}

/// Lowercased text cached per chunk for sparse scoring and boosts.
#[derive(Debug)]
struct SparseMeta {
    file_name: String,
    path: String,
    entities: Vec<String>,
}

/// Filtered cosine search over the chunk matrix.
#[derive(Debug)]
pub struct FilteredSearch {
    meta: Vec<ChunkMeta>,
    sparse: Vec<SparseMeta>,
    bitmaps: FlagBitmaps,
    vectors: Arc<VectorStore>,
    retrieval: RetrievalConfig,
}

impl FilteredSearch {
    /// Build the search structures. `meta` must be ordered by
    /// `vector_index` and aligned with the vector matrix rows.
    pub fn new(
        meta: Vec<ChunkMeta>,
        vectors: Arc<VectorStore>,
        retrieval: RetrievalConfig,
    ) -> Result<Self, QueryError> {
        if meta.len() != vectors.rows() {
            return Err(QueryError::Internal(anyhow::anyhow!(
                "metadata store has {} chunks but the vector file has {} rows",
                meta.len(),
                vectors.rows()
            )));
        }
        for (position, chunk) in meta.iter().enumerate() {
            if chunk.vector_index != position {
                return Err(QueryError::Internal(anyhow::anyhow!(
                    "chunk metadata out of order: position {} holds vector_index {}",
                    position,
                    chunk.vector_index
                )));
            }
        }

        let n = meta.len();
        let mut bitmaps = FlagBitmaps {
            uproperty: Bitmap::zeros(n),
            uclass: Bitmap::zeros(n),
            ufunction: Bitmap::zeros(n),
            ustruct: Bitmap::zeros(n),
            uenum: Bitmap::zeros(n),
            header: Bitmap::zeros(n),
            implementation: Bitmap::zeros(n),
            origin_engine: Bitmap::zeros(n),
        };

        let mut sparse = Vec::with_capacity(n);
        for (i, chunk) in meta.iter().enumerate() {
            if chunk.has_uproperty {
                bitmaps.uproperty.set(i);
            }
            if chunk.has_uclass {
                bitmaps.uclass.set(i);
            }
            if chunk.has_ufunction {
                bitmaps.ufunction.set(i);
            }
            if chunk.has_ustruct {
                bitmaps.ustruct.set(i);
            }
            if chunk.has_uenum {
                bitmaps.uenum.set(i);
            }
            if chunk.is_header {
                bitmaps.header.set(i);
            }
            if chunk.is_implementation {
                bitmaps.implementation.set(i);
            }
            if chunk.origin == Origin::Engine {
                bitmaps.origin_engine.set(i);
            }

            let path_lower = chunk.path.to_lowercase().replace('\\', "/");
            let file_name = path_lower
                .rsplit('/')
                .next()
                .unwrap_or(&path_lower)
                .to_string();
            sparse.push(SparseMeta {
                file_name,
                path: path_lower,
                entities: chunk
                    .entities
                    .iter()
                    .map(|(name, _)| name.to_lowercase())
                    .collect(),
            });
        }

        Ok(Self {
            meta,
            sparse,
            bitmaps,
            vectors,
            retrieval,
        })
    }

    pub fn chunk_count(&self) -> usize {
        self.meta.len()
    }

    /// Run a filtered search. `query_vec` must match the store's
    /// dimensionality; the subset cosine scores are exact dot products
    /// since both sides are L2-normalized.
    pub fn search(
        &self,
        query_vec: &[f32],
        options: &SearchOptions<'_>,
    ) -> Result<Vec<SearchHit>, QueryError> {
        if options.top_k == 0 {
            return Ok(Vec::new());
        }

        let indices = self.filtered_indices(&options.filters);
        if indices.is_empty() {
            debug!("no chunks survived the relational filters");
            return Ok(Vec::new());
        }

        let dense = self.vectors.subset_scores(&indices, query_vec)?;

        let sparse_tokens = options.query_text.map(tokenize).unwrap_or_default();

        let mut scored: Vec<(usize, f32)> = Vec::with_capacity(indices.len());
        for (position, &index) in indices.iter().enumerate() {
            let mut score = dense[position];
            if !sparse_tokens.is_empty() {
                score += self.sparse_score(index, &sparse_tokens);
            }
            score *= self.boost_factor(index, options);
            scored.push((index, score));
        }

        // Stable sort: equal scores keep ascending vector_index order, so
        // identical inputs always produce identical output order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(options.top_k);

        Ok(scored
            .into_iter()
            .map(|(index, score)| {
                let chunk = &self.meta[index];
                SearchHit {
                    vector_index: index,
                    path: chunk.path.clone(),
                    chunk_index: chunk.chunk_index,
                    total_chunks: chunk.total_chunks,
                    score,
                    origin: chunk.origin,
                    entities: chunk.entity_names(),
                    text_snippet: chunk.content.clone(),
                }
            })
            .collect())
    }

    /// Bitmap intersection for the pre-bitmapped flags, then a second pass
    /// for list-membership filters.
    fn filtered_indices(&self, filters: &SearchFilters) -> Vec<usize> {
        let mut mask = Bitmap::ones(self.meta.len());

        if filters.has_uproperty == Some(true) {
            mask.and(&self.bitmaps.uproperty);
        }
        if filters.has_uclass == Some(true) {
            mask.and(&self.bitmaps.uclass);
        }
        if filters.has_ufunction == Some(true) {
            mask.and(&self.bitmaps.ufunction);
        }
        if filters.has_ustruct == Some(true) {
            mask.and(&self.bitmaps.ustruct);
        }
        if filters.has_uenum == Some(true) {
            mask.and(&self.bitmaps.uenum);
        }
        match filters.file_type {
            Some(FileType::Header) => mask.and(&self.bitmaps.header),
            Some(FileType::Implementation) => mask.and(&self.bitmaps.implementation),
            None => {}
        }
        match filters.origin {
            Some(Origin::Engine) => mask.and(&self.bitmaps.origin_engine),
            Some(Origin::Project) => mask.and_not(&self.bitmaps.origin_engine),
            None => {}
        }

        let needs_entity_pass = filters.entity.is_some() || filters.entity_type.is_some();
        mask.iter_set()
            .filter(|&i| {
                if !needs_entity_pass {
                    return true;
                }
                let chunk = &self.meta[i];
                if let Some(entity) = &filters.entity {
                    if !chunk.entities.iter().any(|(name, _)| name == entity) {
                        return false;
                    }
                }
                if let Some(kind) = filters.entity_type {
                    if !chunk.entities.iter().any(|(_, k)| *k == kind) {
                        return false;
                    }
                }
                true
            })
            .collect()
    }

    /// Sparse keyword score for one chunk: filename, path, and entity
    /// matches summed across query tokens.
    fn sparse_score(&self, index: usize, tokens: &[String]) -> f32 {
        let sparse = &self.sparse[index];
        let weights = &self.retrieval;
        let mut score = 0.0;

        for token in tokens {
            if sparse.file_name.contains(token.as_str()) {
                score += weights.sparse_file_weight;
            } else if sparse.path.contains(token.as_str()) {
                score += weights.sparse_path_weight;
            }

            if sparse.entities.iter().any(|e| e == token) {
                score += weights.sparse_entity_weight;
            } else if sparse.entities.iter().any(|e| e.contains(token.as_str())) {
                score += weights.sparse_entity_substring_weight;
            }
        }

        score
    }

    fn boost_factor(&self, index: usize, options: &SearchOptions<'_>) -> f32 {
        let chunk = &self.meta[index];
        let sparse = &self.sparse[index];
        let mut factor = 1.0;

        let entity_overlap = !options.boost_entities.is_empty()
            && chunk.entities.iter().any(|(name, _)| {
                options
                    .boost_entities
                    .iter()
                    .any(|boost| boost.eq_ignore_ascii_case(name))
            });
        if entity_overlap {
            factor *= BOOST_ENTITY_MATCH;
        }

        if options.boost_macros
            && (chunk.has_uproperty
                || chunk.has_uclass
                || chunk.has_ufunction
                || chunk.has_ustruct
                || chunk.has_uenum)
        {
            factor *= BOOST_MACRO;
        }

        if options.use_logical_boosts && !options.boost_entities.is_empty() {
            let filename_match = options.boost_entities.iter().any(|entity| {
                let base = strip_ue5_prefix(entity).to_lowercase();
                !base.is_empty() && sparse.file_name.contains(&base)
            });
            if filename_match {
                factor *= BOOST_FILENAME;
            }

            if matches!(
                options.query_type,
                Some(QueryType::Definition) | Some(QueryType::Hybrid)
            ) {
                if chunk.is_header {
                    factor *= BOOST_HEADER;
                } else if chunk.is_implementation {
                    factor *= BOOST_IMPLEMENTATION;
                }
            }

            if !entity_overlap {
                factor *= BOOST_NO_ENTITY_OVERLAP;
            }

            if chunk.entities.len() > RICH_DEFINITION_MIN_ENTITIES {
                factor *= BOOST_RICH_DEFINITION;
            }
        }

        factor
    }
}

/// Lowercase, whitespace-split, stop-word-free tokens.
fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| !t.is_empty() && !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityKind;
    use crate::vectors::{l2_normalize, write_vector_store};

    fn unit(mut v: Vec<f32>) -> Vec<f32> {
        l2_normalize(&mut v);
        v
    }

    fn make_chunk(vector_index: usize, path: &str, origin: Origin) -> ChunkMeta {
        ChunkMeta {
            vector_index,
            path: path.to_string(),
            origin,
            chunk_index: 0,
            total_chunks: 1,
            is_header: path.ends_with(".h"),
            is_implementation: path.ends_with(".cpp"),
            has_uproperty: false,
            has_uclass: false,
            has_ufunction: false,
            has_ustruct: false,
            has_uenum: false,
            entities: Vec::new(),
            content: None,
        }
    }

    fn build_search(meta: Vec<ChunkMeta>, rows: &[Vec<f32>]) -> (tempfile::TempDir, FilteredSearch) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.f32");
        write_vector_store(&path, rows, "test").unwrap();
        let vectors = Arc::new(VectorStore::open(&path).unwrap());
        let search = FilteredSearch::new(meta, vectors, RetrievalConfig::default()).unwrap();
        (dir, search)
    }

    fn fixture() -> (tempfile::TempDir, FilteredSearch) {
        let mut hit_header = make_chunk(0, "/Engine/Source/Runtime/HitResult.h", Origin::Engine);
        hit_header.has_ustruct = true;
        hit_header.has_uproperty = true;
        hit_header.entities = vec![
            ("FHitResult".to_string(), EntityKind::Struct),
            ("FVector".to_string(), EntityKind::Struct),
        ];
        hit_header.content = Some("struct FHitResult".to_string());

        let mut movement_cpp = make_chunk(
            1,
            "/Engine/Source/Runtime/CharacterMovementComponent.cpp",
            Origin::Engine,
        );
        movement_cpp.entities = vec![(
            "UCharacterMovementComponent".to_string(),
            EntityKind::Class,
        )];

        let project_chunk = make_chunk(2, "/Game/Source/MyGame/MyActor.cpp", Origin::Project);

        let rows = vec![
            unit(vec![1.0, 0.0, 0.0]),
            unit(vec![0.8, 0.6, 0.0]),
            unit(vec![0.0, 0.0, 1.0]),
        ];
        build_search(vec![hit_header, movement_cpp, project_chunk], &rows)
    }

    fn options(top_k: usize) -> SearchOptions<'static> {
        SearchOptions {
            top_k,
            use_logical_boosts: true,
            ..SearchOptions::default()
        }
    }

    #[test]
    fn test_plain_dense_ranking() {
        let (_dir, search) = fixture();
        let query = unit(vec![1.0, 0.0, 0.0]);
        let hits = search.search(&query, &options(3)).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].vector_index, 0);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_top_k_zero_returns_empty() {
        let (_dir, search) = fixture();
        let query = unit(vec![1.0, 0.0, 0.0]);
        assert!(search.search(&query, &options(0)).unwrap().is_empty());
    }

    #[test]
    fn test_origin_filter() {
        let (_dir, search) = fixture();
        let query = unit(vec![1.0, 1.0, 1.0]);

        let mut engine_options = options(10);
        engine_options.filters.origin = Some(Origin::Engine);
        let hits = search.search(&query, &engine_options).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.origin == Origin::Engine));

        let mut project_options = options(10);
        project_options.filters.origin = Some(Origin::Project);
        let hits = search.search(&query, &project_options).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].origin, Origin::Project);
    }

    #[test]
    fn test_macro_flag_filter() {
        let (_dir, search) = fixture();
        let query = unit(vec![1.0, 1.0, 1.0]);
        let mut opts = options(10);
        opts.filters.has_ustruct = Some(true);
        let hits = search.search(&query, &opts).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].vector_index, 0);
    }

    #[test]
    fn test_entity_membership_filter() {
        let (_dir, search) = fixture();
        let query = unit(vec![1.0, 1.0, 1.0]);
        let mut opts = options(10);
        opts.filters.entity = Some("UCharacterMovementComponent".to_string());
        let hits = search.search(&query, &opts).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].vector_index, 1);

        let mut kind_opts = options(10);
        kind_opts.filters.entity_type = Some(EntityKind::Class);
        let hits = search.search(&query, &kind_opts).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].vector_index, 1);
    }

    #[test]
    fn test_file_type_filter() {
        let (_dir, search) = fixture();
        let query = unit(vec![1.0, 1.0, 1.0]);
        let mut opts = options(10);
        opts.filters.file_type = Some(FileType::Header);
        let hits = search.search(&query, &opts).unwrap();
        assert!(hits.iter().all(|h| h.path.ends_with(".h")));
    }

    #[test]
    fn test_filename_boost_outweighs_dense_gap() {
        let (_dir, search) = fixture();
        // Query vector favors chunk 1 slightly; the filename boost on
        // "hitresult" flips the order.
        let query = unit(vec![0.8, 0.6, 0.0]);
        let boost = vec!["FHitResult".to_string()];
        let opts = SearchOptions {
            top_k: 3,
            boost_entities: &boost,
            boost_macros: true,
            use_logical_boosts: true,
            query_type: Some(QueryType::Definition),
            ..SearchOptions::default()
        };
        let hits = search.search(&query, &opts).unwrap();
        assert_eq!(hits[0].vector_index, 0, "filename + header boost should win");
    }

    #[test]
    fn test_co_occurrence_penalty() {
        let (_dir, search) = fixture();
        let query = unit(vec![0.0, 0.0, 1.0]);
        let boost = vec!["FHitResult".to_string()];
        let opts = SearchOptions {
            top_k: 3,
            boost_entities: &boost,
            use_logical_boosts: true,
            ..SearchOptions::default()
        };
        let hits = search.search(&query, &opts).unwrap();
        // Chunk 2 has perfect cosine but no entity overlap; the x0.1 penalty
        // still leaves it first (0.1) over orthogonal chunks, but its score
        // must reflect the penalty.
        let project_hit = hits.iter().find(|h| h.vector_index == 2).unwrap();
        assert!(project_hit.score < 0.2);
    }

    #[test]
    fn test_sparse_entity_score() {
        let (_dir, search) = fixture();
        // Orthogonal query vector: dense scores are ~0 everywhere, so the
        // sparse entity match decides the order.
        let query = unit(vec![0.0, 1.0, 0.0]);
        let mut opts = options(3);
        opts.query_text = Some("fhitresult lifecycle");
        let hits = search.search(&query, &opts).unwrap();
        assert_eq!(hits[0].vector_index, 1, "dense still favors chunk 1");
        let hit0 = hits.iter().find(|h| h.vector_index == 0).unwrap();
        assert!(hit0.score >= 0.5, "exact entity match adds 0.5: {}", hit0.score);
    }

    #[test]
    fn test_deterministic_ordering() {
        let (_dir, search) = fixture();
        let query = unit(vec![0.5, 0.5, 0.5]);
        let first = search.search(&query, &options(3)).unwrap();
        let second = search.search(&query, &options(3)).unwrap();
        let order_a: Vec<usize> = first.iter().map(|h| h.vector_index).collect();
        let order_b: Vec<usize> = second.iter().map(|h| h.vector_index).collect();
        assert_eq!(order_a, order_b);
    }

    #[test]
    fn test_dimension_mismatch_fails() {
        let (_dir, search) = fixture();
        let err = search.search(&[1.0, 0.0], &options(3)).unwrap_err();
        assert!(matches!(err, QueryError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_misaligned_meta_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.f32");
        write_vector_store(&path, &[unit(vec![1.0, 0.0])], "test").unwrap();
        let vectors = Arc::new(VectorStore::open(&path).unwrap());

        // Two chunks, one row.
        let meta = vec![
            make_chunk(0, "/a.h", Origin::Engine),
            make_chunk(1, "/b.h", Origin::Engine),
        ];
        assert!(FilteredSearch::new(meta, vectors, RetrievalConfig::default()).is_err());
    }

    #[test]
    fn test_tokenize_removes_stop_words() {
        let tokens = tokenize("How does the FHitResult work");
        assert_eq!(tokens, vec!["fhitresult".to_string()]);
    }
}
