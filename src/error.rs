//! Query error taxonomy.
//!
//! Every failure the query pipeline can surface is one of these kinds.
//! The policy per kind:
//!
//! | Kind | Policy |
//! |------|--------|
//! | [`QueryError::NotReady`] | Fail fast at engine construction with the missing path. |
//! | [`QueryError::DimensionMismatch`] | Fail the query; no partial search is attempted. |
//! | [`QueryError::EmptyQuery`] | Callers usually map this to an empty `QueryResult` instead. |
//! | [`QueryError::FilterSyntax`] | Rejected before any search runs; carries the byte position. |
//! | [`QueryError::Cancelled`] | Partial results are discarded; nothing to roll back. |
//! | [`QueryError::Internal`] | Invariant violations and unexpected failures; never swallowed. |
//!
//! Unreadable source files during definition extraction are *not* errors:
//! the extractor skips them and logs a warning.

use std::path::PathBuf;

/// Typed errors surfaced by the query pipeline.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// A required index artifact is missing or unreadable at engine construction.
    #[error("index not ready: {reason} (expected at {path})")]
    NotReady { path: PathBuf, reason: String },

    /// The query encoder produced a vector whose dimensionality does not
    /// match the stored matrix. Rebuild the index or change the model.
    #[error(
        "dimension mismatch: query vector has {query} dimensions but the vector store has {store}; \
         rebuild the index with the configured model or change the embedding model"
    )]
    DimensionMismatch { query: usize, store: usize },

    /// Whitespace-only or empty query string.
    #[error("empty or invalid query")]
    EmptyQuery,

    /// A `--filter` expression failed to parse. `pos` is the byte offset of
    /// the offending token in the original expression.
    #[error("invalid filter expression at byte {pos}: {message}")]
    FilterSyntax { pos: usize, message: String },

    /// The caller signaled cancellation. No partial results are returned.
    #[error("query cancelled")]
    Cancelled,

    /// Anything else: invariant violations, storage failures, model errors.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl QueryError {
    /// Whether a client may retry the identical request and expect success.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueryError::Cancelled)
    }
}
