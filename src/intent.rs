//! Query intent analysis.
//!
//! Classifies a raw query as DEFINITION, SEMANTIC, or HYBRID, extracts the
//! target entity when one is present, and produces an enhanced query string
//! for the embedding model.
//!
//! Classification rules, in priority order:
//!
//! 1. "where is" / "what file" / "location of" phrasing marks a file-search
//!    query and forces HYBRID.
//! 2. A `Class::Method` token forces HYBRID with the class as the entity.
//! 3. A single-token query shaped like a UE5 identifier (`F`/`U`/`A`/`I`/`E`
//!    followed by an uppercase letter) is a DEFINITION lookup; the entity
//!    kind is inferred from the prefix. Other single-token identifiers are
//!    DEFINITION lookups of unknown kind at lower confidence, which lets
//!    lowercase spellings like `fhitresult` still reach the extractor.
//! 4. A UE5-shaped token embedded in natural language is HYBRID.
//! 5. Everything else is SEMANTIC.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{EntityKind, QueryType};

/// A UE5 identifier: reflection prefix, uppercase second letter, then
/// ordinary identifier characters.
static UE5_ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[FUAIE][A-Z][A-Za-z0-9_]*$").unwrap());

/// Any plausible C/C++ identifier of three or more characters.
static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{2,}$").unwrap());

/// Phrasings that indicate the caller wants a file location.
static FILE_SEARCH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(where\s+is|what\s+file|which\s+file|location\s+of|path\s+to)\b").unwrap()
});

/// Common English words that should never be mistaken for a symbol lookup
/// when they appear as a single-token query.
const QUERY_STOP_WORDS: [&str; 12] = [
    "the", "and", "for", "how", "what", "where", "when", "why", "does", "with", "this", "that",
];

/// Analyzed intent, before the engine adds scope and expansion context.
#[derive(Debug, Clone)]
pub struct Intent {
    pub query_type: QueryType,
    pub entity_kind: Option<EntityKind>,
    pub entity_name: Option<String>,
    pub confidence: f32,
    pub reasoning: String,
    pub enhanced_query: String,
    pub is_file_search: bool,
}

/// Infer the entity kind from a UE5 identifier prefix.
///
/// `F` → struct, `U`/`A`/`I` → class, `E` → enum. Tokens that do not match
/// the UE5 identifier shape infer as [`EntityKind::Unknown`].
pub fn infer_entity_kind(token: &str) -> EntityKind {
    if !UE5_ENTITY_RE.is_match(token) {
        return EntityKind::Unknown;
    }
    match token.chars().next() {
        Some('F') => EntityKind::Struct,
        Some('U') | Some('A') | Some('I') => EntityKind::Class,
        Some('E') => EntityKind::Enum,
        _ => EntityKind::Unknown,
    }
}

/// Whether a token is shaped like a UE5-prefixed identifier.
pub fn is_ue5_entity_token(token: &str) -> bool {
    UE5_ENTITY_RE.is_match(token)
}

/// Stateless query classifier.
#[derive(Debug, Default)]
pub struct IntentAnalyzer;

impl IntentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, query: &str) -> Intent {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Intent {
                query_type: QueryType::Unknown,
                entity_kind: None,
                entity_name: None,
                confidence: 0.0,
                reasoning: "Empty or invalid query".to_string(),
                enhanced_query: query.to_string(),
                is_file_search: false,
            };
        }

        let is_file_search = FILE_SEARCH_RE.is_match(trimmed);
        let tokens: Vec<&str> = trimmed
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != ':'))
            .filter(|t| !t.is_empty())
            .collect();

        // Qualified Class::Method tokens carry both an exact target and a
        // behavioral question, so they always go hybrid.
        if let Some((class_name, method)) = tokens.iter().find_map(|t| split_qualified(t)) {
            let kind = infer_entity_kind(class_name);
            let kind = if kind == EntityKind::Unknown {
                EntityKind::Class
            } else {
                kind
            };
            return Intent {
                query_type: QueryType::Hybrid,
                entity_kind: Some(kind),
                entity_name: Some(class_name.to_string()),
                confidence: 0.8,
                reasoning: format!(
                    "Qualified member reference {class_name}::{method}; searching both the \
                     class definition and related code"
                ),
                enhanced_query: format!("{trimmed} {class_name} {method}"),
                is_file_search,
            };
        }

        let ue5_tokens: Vec<&str> = tokens
            .iter()
            .copied()
            .filter(|t| is_ue5_entity_token(t))
            .collect();

        if is_file_search {
            let entity = ue5_tokens.first().copied().map(str::to_string);
            let kind = entity.as_deref().map(infer_entity_kind);
            return Intent {
                query_type: QueryType::Hybrid,
                entity_kind: kind,
                entity_name: entity,
                confidence: 0.75,
                reasoning: "File-location phrasing; combining definition lookup with \
                            semantic search"
                    .to_string(),
                enhanced_query: trimmed.to_string(),
                is_file_search: true,
            };
        }

        if tokens.len() == 1 {
            let token = tokens[0];
            if is_ue5_entity_token(token) {
                let kind = infer_entity_kind(token);
                return Intent {
                    query_type: QueryType::Definition,
                    entity_kind: Some(kind),
                    entity_name: Some(token.to_string()),
                    confidence: 0.9,
                    reasoning: format!(
                        "Single UE5-prefixed identifier; treating as a {kind} definition lookup"
                    ),
                    enhanced_query: format!("{token} {kind}"),
                    is_file_search: false,
                };
            }
            if IDENTIFIER_RE.is_match(token)
                && !QUERY_STOP_WORDS.contains(&token.to_ascii_lowercase().as_str())
            {
                return Intent {
                    query_type: QueryType::Definition,
                    entity_kind: Some(EntityKind::Unknown),
                    entity_name: Some(token.to_string()),
                    confidence: 0.6,
                    reasoning: "Single identifier without a recognizable UE5 prefix; trying \
                                fuzzy definition lookup across all kinds"
                        .to_string(),
                    enhanced_query: trimmed.to_string(),
                    is_file_search: false,
                };
            }
        }

        if let Some(entity) = ue5_tokens.first() {
            let kind = infer_entity_kind(entity);
            return Intent {
                query_type: QueryType::Hybrid,
                entity_kind: Some(kind),
                entity_name: Some((*entity).to_string()),
                confidence: 0.7,
                reasoning: format!(
                    "Natural-language query mentioning {entity}; combining definition \
                     lookup with semantic search"
                ),
                enhanced_query: format!("{trimmed} {kind}"),
                is_file_search: false,
            };
        }

        Intent {
            query_type: QueryType::Semantic,
            entity_kind: None,
            entity_name: None,
            confidence: 0.5,
            reasoning: "No entity reference detected; semantic search only".to_string(),
            enhanced_query: trimmed.to_string(),
            is_file_search: false,
        }
    }
}

/// Split a `Class::Method` token; returns `None` for plain identifiers and
/// for tokens where either side is not identifier-shaped.
fn split_qualified(token: &str) -> Option<(&str, &str)> {
    let (class_name, method) = token.split_once("::")?;
    if IDENTIFIER_RE.is_match(class_name) && IDENTIFIER_RE.is_match(method) {
        Some((class_name, method))
    } else {
        None
    }
}
