//! Query expansion over a fixed dictionary of UE5 domain synonyms.
//!
//! The dictionary maps short aliases to canonical identifiers (`"vec"` →
//! `FVector`, `"hit"` → `FHitResult`, ...). It is data, not code: the table
//! lives in `assets/synonyms.json` and is embedded into the binary at
//! compile time.
//!
//! Expansion is stateless and deterministic: the original query always comes
//! first, followed by token-replaced variants and standalone synonyms in
//! query-token order. Expanding terms that are already canonical identifiers
//! is a fixpoint, since dictionary keys are lowercase aliases only.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Embedded synonym table, parsed once.
static SYNONYMS: Lazy<HashMap<String, Vec<String>>> = Lazy::new(|| {
    serde_json::from_str(include_str!("../assets/synonyms.json"))
        .expect("embedded synonyms.json is valid")
});

/// Expand a query into a list of related search terms.
///
/// The returned list always starts with the original query and contains no
/// duplicates. For each query token found in the dictionary, two kinds of
/// terms are added: the query with that token replaced by the synonym, and
/// the synonym on its own.
pub fn expand(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    push_unique(&mut terms, query.to_string());

    let lowered = query.to_lowercase();

    // Whole-query alias, e.g. the query is just "hit".
    if let Some(synonyms) = SYNONYMS.get(lowered.as_str()) {
        for synonym in synonyms {
            push_unique(&mut terms, synonym.clone());
        }
    }

    for token in lowered.split_whitespace() {
        if let Some(synonyms) = SYNONYMS.get(token) {
            for synonym in synonyms {
                push_unique(&mut terms, lowered.replace(token, synonym));
                push_unique(&mut terms, synonym.clone());
            }
        }
    }

    terms
}

/// The canonical identifiers related to a single alias, if any.
pub fn related_entities(term: &str) -> &'static [String] {
    SYNONYMS
        .get(term.to_lowercase().as_str())
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn push_unique(terms: &mut Vec<String>, term: String) {
    if !terms.iter().any(|t| t == &term) {
        terms.push(term);
    }
}
