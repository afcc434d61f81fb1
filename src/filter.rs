//! `--filter` expression parsing.
//!
//! Filter expressions are conjunctions of `key:value` clauses joined by
//! `AND` (case-insensitive), e.g.
//!
//! ```text
//! type:struct AND macro:uproperty AND origin:engine AND file:header
//! ```
//!
//! Recognized keys:
//!
//! | Key | Values |
//! |-----|--------|
//! | `type` | `struct`, `class`, `enum`, `function`, `delegate` |
//! | `macro` | `uproperty`, `uclass`, `ufunction`, `ustruct`, `uenum` |
//! | `origin` | `engine`, `project` |
//! | `file` | `header`, `implementation` |
//! | `entity` | any entity name (exact match) |
//!
//! Malformed expressions are rejected before any search runs; the error
//! carries the byte position of the offending clause.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::QueryError;
use crate::models::{EntityKind, FileType, Origin};

static AND_SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+AND\s+").unwrap());

/// Relational filters applied before vector scoring.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SearchFilters {
    /// Only chunks referencing this entity name.
    pub entity: Option<String>,
    /// Only chunks referencing an entity of this kind.
    pub entity_type: Option<EntityKind>,
    pub origin: Option<Origin>,
    pub has_uproperty: Option<bool>,
    pub has_uclass: Option<bool>,
    pub has_ufunction: Option<bool>,
    pub has_ustruct: Option<bool>,
    pub has_uenum: Option<bool>,
    pub file_type: Option<FileType>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        *self == SearchFilters::default()
    }
}

/// Parse a filter expression into [`SearchFilters`].
///
/// An empty or whitespace-only expression yields the empty filter set.
pub fn parse_filter(expr: &str) -> Result<SearchFilters, QueryError> {
    let mut filters = SearchFilters::default();
    if expr.trim().is_empty() {
        return Ok(filters);
    }

    // Walk the clauses between AND separators, tracking byte offsets so
    // errors can point into the original expression.
    let mut clause_start = 0;
    let mut spans: Vec<(usize, usize)> = Vec::new();
    for sep in AND_SEPARATOR_RE.find_iter(expr) {
        spans.push((clause_start, sep.start()));
        clause_start = sep.end();
    }
    spans.push((clause_start, expr.len()));

    for (start, end) in spans {
        let raw = &expr[start..end];
        let clause = raw.trim();
        if clause.is_empty() {
            return Err(QueryError::FilterSyntax {
                pos: start,
                message: "empty clause".to_string(),
            });
        }
        let clause_pos = start + (raw.len() - raw.trim_start().len());

        let Some((key, value)) = clause.split_once(':') else {
            return Err(QueryError::FilterSyntax {
                pos: clause_pos,
                message: format!("expected key:value, got '{clause}'"),
            });
        };
        let value = value.trim();
        if value.is_empty() {
            return Err(QueryError::FilterSyntax {
                pos: clause_pos,
                message: format!("missing value for key '{key}'"),
            });
        }

        match key.trim().to_ascii_lowercase().as_str() {
            "type" => {
                let kind = value.parse::<EntityKind>().map_err(|e| QueryError::FilterSyntax {
                    pos: clause_pos,
                    message: e,
                })?;
                filters.entity_type = Some(kind);
            }
            "macro" => match value.to_ascii_lowercase().as_str() {
                "uproperty" => filters.has_uproperty = Some(true),
                "uclass" => filters.has_uclass = Some(true),
                "ufunction" => filters.has_ufunction = Some(true),
                "ustruct" => filters.has_ustruct = Some(true),
                "uenum" => filters.has_uenum = Some(true),
                other => {
                    return Err(QueryError::FilterSyntax {
                        pos: clause_pos,
                        message: format!(
                            "unknown macro '{other}' (use uproperty, uclass, ufunction, ustruct, or uenum)"
                        ),
                    })
                }
            },
            "origin" => {
                let origin = value.parse::<Origin>().map_err(|e| QueryError::FilterSyntax {
                    pos: clause_pos,
                    message: e,
                })?;
                filters.origin = Some(origin);
            }
            "file" => {
                let file_type = value.parse::<FileType>().map_err(|e| QueryError::FilterSyntax {
                    pos: clause_pos,
                    message: e,
                })?;
                filters.file_type = Some(file_type);
            }
            "entity" => {
                filters.entity = Some(value.to_string());
            }
            other => {
                return Err(QueryError::FilterSyntax {
                    pos: clause_pos,
                    message: format!(
                        "unknown filter key '{other}' (use type, macro, origin, file, or entity)"
                    ),
                })
            }
        }
    }

    Ok(filters)
}
