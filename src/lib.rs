//! # Unreal Source Query
//!
//! **A local-first hybrid code search engine for Unreal Engine 5 source trees.**
//!
//! Given a natural-language or symbol query, the engine returns exact
//! symbol definitions extracted from C++ source and semantically similar
//! code chunks ranked by vector similarity, optionally re-ranked by a
//! cross-encoder. Results serve developers via the `ueq` CLI and AI agents
//! via a structured JSON API.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!     question ──▶│    Intent    │──▶ definition / semantic / hybrid
//!                 └──────┬───────┘
//!                        ▼
//!                 ┌──────────────┐
//!                 │  Expansion   │──▶ UE5 synonym variants
//!                 └──────┬───────┘
//!            ┌───────────┴───────────┐
//!            ▼                       ▼
//!    ┌───────────────┐       ┌───────────────┐
//!    │  Definition   │       │   Filtered    │
//!    │  Extractor    │       │   Semantic    │──▶ optional rerank
//!    │ (regex+braces)│       │ (mmap cosine) │
//!    └───────┬───────┘       └───────┬───────┘
//!            └───────────┬───────────┘
//!                        ▼
//!                  merge ▶ format ▶ CLI / HTTP
//! ```
//!
//! ## Index artifacts
//!
//! The engine consumes a pre-built index made of two artifacts:
//!
//! - a dense vector matrix (`.f32` + JSON sidecar), memory-mapped read-only
//!   ([`vectors`]);
//! - a SQLite metadata store (files, chunks, entities, definitions, FTS5)
//!   ([`store`], schema in [`migrate`]).
//!
//! ## Modules
//!
//! - [`config`] — TOML configuration parsing and validation
//! - [`models`] — result types: `QueryResult`, `Intent`, hits, timing
//! - [`intent`] — query classification and entity inference
//! - [`expansion`] — UE5 synonym expansion (embedded dictionary)
//! - [`definitions`] — brace-matched C++ definition extraction
//! - [`chunker`] — deterministic semantic / character chunkers
//! - [`vectors`] — memory-mapped dense vector store
//! - [`store`] — relational metadata store (SQLite + FTS5)
//! - [`search`] — filtered cosine search with sparse fusion and boosts
//! - [`embedding`] — query embedding providers
//! - [`rerank`] — optional cross-encoder reranker
//! - [`engine`] — hybrid orchestration
//! - [`filter`] — `--filter` expression parsing
//! - [`format`] — text / json / jsonl / xml / markdown / code / path output
//! - [`server`] — Axum HTTP server
//! - [`paths`] — UE path conventions
//!
//! ## Quick start
//!
//! ```bash
//! ueq init                                  # create the metadata schema
//! ueq search "FHitResult"                   # exact definition lookup
//! ueq search "how does collision work" --scope engine --format json
//! ueq serve                                 # start the HTTP server
//! ```

pub mod chunker;
pub mod config;
pub mod definitions;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod expansion;
pub mod filter;
pub mod format;
pub mod intent;
pub mod migrate;
pub mod models;
pub mod paths;
pub mod rerank;
pub mod search;
pub mod server;
pub mod store;
pub mod vectors;

pub use engine::{HybridQueryEngine, QueryOptions};
pub use error::QueryError;
pub use models::{QueryResult, Scope};
