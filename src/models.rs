//! Core data types that flow through the query pipeline.
//!
//! These mirror the wire shapes consumed by the CLI, the HTTP server, and
//! agent integrations: a [`QueryResult`] bundles the analyzed intent, the
//! definition branch output, the semantic branch output, the merged view,
//! and per-phase timing.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// UE5 identifier prefixes and the entity kind each one conventionally marks.
pub const UE5_ENTITY_PREFIXES: [char; 5] = ['F', 'U', 'A', 'I', 'E'];

/// How a query should be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Exact symbol lookup via the definition extractor.
    Definition,
    /// Vector similarity over chunk embeddings.
    Semantic,
    /// Both branches run and merge.
    Hybrid,
    /// Empty / unparseable query.
    Unknown,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Definition => "definition",
            QueryType::Semantic => "semantic",
            QueryType::Hybrid => "hybrid",
            QueryType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a C++ entity tracked by the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Struct,
    Class,
    Enum,
    Function,
    Delegate,
    Unknown,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Struct => "struct",
            EntityKind::Class => "class",
            EntityKind::Enum => "enum",
            EntityKind::Function => "function",
            EntityKind::Delegate => "delegate",
            EntityKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "struct" => Ok(EntityKind::Struct),
            "class" => Ok(EntityKind::Class),
            "enum" => Ok(EntityKind::Enum),
            "function" => Ok(EntityKind::Function),
            "delegate" => Ok(EntityKind::Delegate),
            "unknown" => Ok(EntityKind::Unknown),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// Which slice of the index a query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Engine,
    Project,
    All,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Engine => "engine",
            Scope::Project => "project",
            Scope::All => "all",
        }
    }

    /// The `origin` filter this scope implies, if any.
    pub fn origin_filter(&self) -> Option<Origin> {
        match self {
            Scope::Engine => Some(Origin::Engine),
            Scope::Project => Some(Origin::Project),
            Scope::All => None,
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "engine" => Ok(Scope::Engine),
            "project" => Ok(Scope::Project),
            "all" => Ok(Scope::All),
            other => Err(format!("unknown scope: {other} (use engine, project, or all)")),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a file belongs to the engine tree or the game project tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    #[default]
    Engine,
    Project,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Engine => "engine",
            Origin::Project => "project",
        }
    }
}

impl FromStr for Origin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "engine" => Ok(Origin::Engine),
            "project" => Ok(Origin::Project),
            other => Err(format!("unknown origin: {other}")),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header vs implementation, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Header,
    Implementation,
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "header" => Ok(FileType::Header),
            "implementation" => Ok(FileType::Implementation),
            other => Err(format!("unknown file type: {other}")),
        }
    }
}

/// The analyzed intent behind a query, as reported to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentReport {
    /// `definition`, `semantic`, `hybrid`, or `unknown`.
    #[serde(rename = "type")]
    pub query_type: QueryType,
    pub entity_type: Option<EntityKind>,
    pub entity_name: Option<String>,
    /// Classifier confidence in `[0.0, 1.0]`.
    pub confidence: f32,
    /// Human-readable explanation of the classification.
    pub reasoning: String,
    /// Query string augmented for the embedding model (e.g. kind word appended).
    pub enhanced_query: String,
    pub scope: String,
    /// Synonym-expanded term set, original query included.
    pub expanded_terms: Vec<String>,
    /// True for "where is X" / "what file" style queries.
    pub is_file_search: bool,
}

/// One extracted definition, ready for output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionHit {
    /// Always `"definition"`; distinguishes hits in merged/JSONL output.
    #[serde(rename = "type")]
    pub result_type: String,
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub entity_type: EntityKind,
    pub entity_name: String,
    /// The brace-balanced definition block (truncated for transport).
    pub definition: String,
    /// Display strings for the first few parsed members, e.g. `"float Time"`.
    pub members: Vec<String>,
    pub total_members: usize,
    /// Name-match score in `[0.0, 1.0]`; `1.0` is an exact match.
    pub match_quality: f32,
    pub origin: Origin,
    /// UE module name guessed from the path (component after `Source`).
    pub module: Option<String>,
    /// `#include`-style relative path guessed from the UE layout.
    pub include: Option<String>,
}

/// One semantically retrieved chunk, ready for output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticHit {
    /// Always `"semantic"`.
    #[serde(rename = "type")]
    pub result_type: String,
    pub path: String,
    pub chunk_index: i64,
    pub total_chunks: i64,
    /// Final fused score (dense + sparse + boosts, or reranker score).
    pub score: f32,
    pub boosted: bool,
    pub origin: Origin,
    /// Entity names referenced by this chunk.
    pub entities: Vec<String>,
    /// Chunk text when the store kept it (or after rerank hydration).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_snippet: Option<String>,
    /// Pre-rerank dense score, kept for diagnostics when reranking ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

/// A merged result: either branch's output in the combined ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CombinedHit {
    Definition(DefinitionHit),
    Semantic(SemanticHit),
}

impl CombinedHit {
    /// The filesystem path this hit points at.
    pub fn path(&self) -> &str {
        match self {
            CombinedHit::Definition(d) => &d.file_path,
            CombinedHit::Semantic(s) => &s.path,
        }
    }
}

/// Per-phase elapsed seconds. Phases that did not run stay `None` and are
/// omitted from serialized output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timing {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_analysis_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expansion_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition_extraction_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_search_s: Option<f64>,
    pub total_s: f64,
}

/// Everything a query produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub question: String,
    pub intent: IntentReport,
    pub definition_results: Vec<DefinitionHit>,
    pub semantic_results: Vec<SemanticHit>,
    pub combined_results: Vec<CombinedHit>,
    pub timing: Timing,
}

impl QueryResult {
    /// The empty result returned for whitespace-only queries.
    pub fn empty(question: &str, scope: Scope) -> Self {
        QueryResult {
            question: question.to_string(),
            intent: IntentReport {
                query_type: QueryType::Unknown,
                entity_type: None,
                entity_name: None,
                confidence: 0.0,
                reasoning: "Empty or invalid query".to_string(),
                enhanced_query: question.to_string(),
                scope: scope.as_str().to_string(),
                expanded_terms: Vec::new(),
                is_file_search: false,
            },
            definition_results: Vec::new(),
            semantic_results: Vec::new(),
            combined_results: Vec::new(),
            timing: Timing {
                total_s: 0.0,
                ..Timing::default()
            },
        }
    }

    pub fn has_results(&self) -> bool {
        !self.definition_results.is_empty() || !self.semantic_results.is_empty()
    }
}

/// Cooperative cancellation flag shared between a caller and a running query.
///
/// Checked at the pipeline's suspension points: before the embed call,
/// between the definition and semantic branches, before rerank, and between
/// batches of parallel file scans. Cancellation discards partial results.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
