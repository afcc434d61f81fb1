//! Exact-definition extraction from C++ source.
//!
//! Given a target `(name, kind)` and a set of candidate files, the extractor
//! scans each file with a kind-specific header regex, extracts the full
//! definition block by brace balancing (strings and comments are skipped,
//! so braces inside them never affect depth), parses members, and scores
//! each candidate name against the query with UE5-prefix-aware fuzzy
//! matching.
//!
//! This is regex + brace-balanced extraction, not a compiler: pathological
//! C++ (macro-generated signatures, preprocessor tricks) may be missed, and
//! that is acceptable. Unreadable files are skipped, never fatal.
//!
//! Large candidate sets are scanned in parallel batches; cancellation is
//! honored between batches.

use std::path::PathBuf;

use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use tracing::warn;

use crate::error::QueryError;
use crate::models::{CancelToken, EntityKind, Origin, UE5_ENTITY_PREFIXES};

/// Files scanned per parallel batch; cancellation is checked between batches.
const SCAN_BATCH: usize = 256;

/// A file eligible for definition extraction, tagged with its origin.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub origin: Origin,
}

/// One member parsed out of a definition block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub name: String,
    /// Declared type for fields; `None` for enum variants and parameters
    /// whose type could not be split from the name.
    pub member_type: Option<String>,
    pub is_uproperty: bool,
    pub is_ufunction: bool,
}

impl MemberInfo {
    /// Display string, e.g. `"float Time"` or a bare enum variant name.
    pub fn display(&self) -> String {
        match &self.member_type {
            Some(t) => format!("{t} {}", self.name),
            None => self.name.clone(),
        }
    }
}

/// A ranked definition extracted from source.
#[derive(Debug, Clone)]
pub struct DefinitionMatch {
    pub file_path: PathBuf,
    pub origin: Origin,
    /// 1-based line of the matched header.
    pub line_start: u32,
    /// 1-based line of the closing brace (or terminating `;`).
    pub line_end: u32,
    pub kind: EntityKind,
    pub entity_name: String,
    /// Full source text of the definition block, header included.
    pub definition: String,
    pub members: Vec<MemberInfo>,
    pub match_quality: f32,
}

// ---------------------------------------------------------------------------
// Header regexes, one per kind
// ---------------------------------------------------------------------------

static STRUCT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:USTRUCT\s*\([^)]*\)\s*)?struct\s+(?:[A-Z][A-Z0-9_]*_API\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*(?:final\s*)?(?::\s*(?:public\s+|protected\s+|private\s+)?[A-Za-z_][\w:<>, \t]*)?\s*\{",
    )
    .unwrap()
});

static CLASS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:UCLASS\s*\([^)]*\)\s*)?class\s+(?:[A-Z][A-Z0-9_]*_API\s+)?([UAI][A-Z][A-Za-z0-9_]*)\s*(?:final\s*)?(?::[^{;]+)?\{",
    )
    .unwrap()
});

static ENUM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:UENUM\s*\([^)]*\)\s*)?enum\s+(?:class\s+|struct\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*(?::\s*[A-Za-z_][\w:]*\s*)?\{",
    )
    .unwrap()
});

static FUNCTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:UFUNCTION\s*\([^)]*\)\s*)?(?:(?:virtual|static|inline|FORCEINLINE|explicit|constexpr|friend)\s+)*[A-Za-z_][\w:]*(?:\s*<[^;{}>]*>)?(?:\s*[*&])*\s+([A-Za-z_][\w:]*)\s*\(",
    )
    .unwrap()
});

static DELEGATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*DECLARE_\w*DELEGATE\w*\s*\(\s*([A-Za-z_]\w*)").unwrap());

fn header_regex(kind: EntityKind) -> Option<&'static Regex> {
    match kind {
        EntityKind::Struct => Some(&STRUCT_RE),
        EntityKind::Class => Some(&CLASS_RE),
        EntityKind::Enum => Some(&ENUM_RE),
        EntityKind::Function => Some(&FUNCTION_RE),
        EntityKind::Delegate => Some(&DELEGATE_RE),
        EntityKind::Unknown => None,
    }
}

// ---------------------------------------------------------------------------
// Match quality
// ---------------------------------------------------------------------------

/// Treat the first character as a UE5 prefix iff it is one of `F U A I E`
/// and the second character is uppercase.
pub fn strip_ue5_prefix(name: &str) -> &str {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(first), Some(second))
            if UE5_ENTITY_PREFIXES.contains(&first) && second.is_ascii_uppercase() =>
        {
            &name[1..]
        }
        _ => name,
    }
}

/// Score a candidate name against the query, respecting UE5 prefixes.
///
/// Exact and prefix-stripped tiers are always active; substring and
/// Levenshtein tiers require `fuzzy`. Returns `0.0` when nothing matches.
pub fn match_quality(query: &str, candidate: &str, fuzzy: bool) -> f32 {
    if query.is_empty() || candidate.is_empty() {
        return 0.0;
    }
    if query == candidate {
        return 1.0;
    }
    if query.eq_ignore_ascii_case(candidate) {
        return 0.95;
    }

    let query_stripped = strip_ue5_prefix(query);
    let candidate_stripped = strip_ue5_prefix(candidate);
    let query_has_prefix = query_stripped.len() != query.len();
    let candidate_has_prefix = candidate_stripped.len() != candidate.len();

    if query_has_prefix
        && candidate_has_prefix
        && query_stripped.eq_ignore_ascii_case(candidate_stripped)
    {
        return 0.90;
    }
    if !query_has_prefix && candidate_has_prefix && query.eq_ignore_ascii_case(candidate_stripped) {
        return 0.88;
    }
    if query_has_prefix && !candidate_has_prefix && query_stripped.eq_ignore_ascii_case(candidate) {
        return 0.85;
    }

    if !fuzzy {
        return 0.0;
    }

    let q_lower = query_stripped.to_ascii_lowercase();
    let c_lower = candidate_stripped.to_ascii_lowercase();

    let ratio = |q: &str, c: &str| q.len() as f32 / c.len() as f32;

    if c_lower.starts_with(&q_lower) {
        return 0.80 * ratio(query_stripped, candidate_stripped);
    }
    if c_lower.contains(&q_lower) {
        return 0.75 * ratio(query_stripped, candidate_stripped);
    }
    if candidate
        .to_ascii_lowercase()
        .contains(&query.to_ascii_lowercase())
    {
        return 0.70 * ratio(query, candidate);
    }

    if query_stripped.len() > 3 && candidate_stripped.len() > 3 {
        let distance = levenshtein(&q_lower, &c_lower);
        if distance <= 2 {
            let max_len = q_lower.len().max(c_lower.len()) as f32;
            return 0.65 * (1.0 - distance as f32 / max_len);
        }
    }
    let distance = levenshtein(
        &query.to_ascii_lowercase(),
        &candidate.to_ascii_lowercase(),
    );
    if distance <= 2 {
        let max_len = query.len().max(candidate.len()) as f32;
        return 0.60 * (1.0 - distance as f32 / max_len);
    }

    0.0
}

/// Classic two-row Levenshtein distance over bytes.
fn levenshtein(a: &str, b: &str) -> usize {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

// ---------------------------------------------------------------------------
// Brace / paren balancing
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq)]
enum ScanState {
    Code,
    LineComment,
    BlockComment,
    StringLit,
    CharLit,
}

/// Find the byte index of the delimiter closing `open` at `open_idx`,
/// skipping string literals, character literals, and comments.
fn find_closing(text: &str, open_idx: usize, open: u8, close: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    debug_assert_eq!(bytes.get(open_idx), Some(&open));

    let mut depth = 1usize;
    let mut state = ScanState::Code;
    let mut i = open_idx + 1;

    while i < bytes.len() {
        let b = bytes[i];
        match state {
            ScanState::Code => match b {
                b'/' if bytes.get(i + 1) == Some(&b'/') => {
                    state = ScanState::LineComment;
                    i += 1;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    state = ScanState::BlockComment;
                    i += 1;
                }
                b'"' => state = ScanState::StringLit,
                b'\'' => state = ScanState::CharLit,
                _ if b == open => depth += 1,
                _ if b == close => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            },
            ScanState::LineComment => {
                if b == b'\n' {
                    state = ScanState::Code;
                }
            }
            ScanState::BlockComment => {
                if b == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    state = ScanState::Code;
                    i += 1;
                }
            }
            ScanState::StringLit => match b {
                b'\\' => i += 1,
                b'"' => state = ScanState::Code,
                _ => {}
            },
            ScanState::CharLit => match b {
                b'\\' => i += 1,
                b'\'' => state = ScanState::Code,
                _ => {}
            },
        }
        i += 1;
    }

    None
}

fn line_of(text: &str, byte_idx: usize) -> u32 {
    text[..byte_idx].bytes().filter(|&b| b == b'\n').count() as u32 + 1
}

// ---------------------------------------------------------------------------
// Member parsing
// ---------------------------------------------------------------------------

static FIELD_DECL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:mutable\s+|static\s+)?(?:const\s+)?([A-Za-z_][\w:]*(?:\s*<[^;>]*>)?(?:\s*[*&])*)\s+([A-Za-z_]\w*)(?:\s*\[[^\]]*\])?\s*(?:=[^;]*)?;",
    )
    .unwrap()
});

static METHOD_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[\w:<>*&~\s]+?([A-Za-z_]\w*)\s*\(").unwrap());

static ENUM_VARIANT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([A-Za-z_]\w*)").unwrap());

const FIELD_TYPE_KEYWORDS: [&str; 8] = [
    "return", "if", "else", "for", "while", "using", "typedef", "delete",
];

/// Parse struct/class members: `UPROPERTY`-decorated fields, plain field
/// declarations, and `UFUNCTION`-decorated method names.
fn parse_record_members(block: &str) -> Vec<MemberInfo> {
    let mut members: Vec<MemberInfo> = Vec::new();
    let mut pending_uproperty = false;
    let mut pending_ufunction = false;

    for line in block.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with("//")
            || trimmed.starts_with("/*")
            || trimmed.starts_with('*')
        {
            continue;
        }
        if trimmed.starts_with("UPROPERTY") {
            pending_uproperty = true;
            continue;
        }
        if trimmed.starts_with("UFUNCTION") {
            pending_ufunction = true;
            continue;
        }
        if trimmed.starts_with("GENERATED_") || trimmed.starts_with("UMETA") {
            continue;
        }
        if trimmed.ends_with(':')
            && matches!(trimmed.trim_end_matches(':'), "public" | "protected" | "private")
        {
            continue;
        }

        if pending_ufunction {
            if let Some(caps) = METHOD_NAME_RE.captures(trimmed) {
                push_member(
                    &mut members,
                    MemberInfo {
                        name: caps[1].to_string(),
                        member_type: None,
                        is_uproperty: false,
                        is_ufunction: true,
                    },
                );
                pending_ufunction = false;
            }
            continue;
        }

        // Field declaration: no parens, ends in ';', type + name split.
        if !trimmed.contains('(') {
            if let Some(caps) = FIELD_DECL_RE.captures(trimmed) {
                let field_type = caps[1].trim().to_string();
                if !FIELD_TYPE_KEYWORDS.contains(&field_type.as_str()) {
                    push_member(
                        &mut members,
                        MemberInfo {
                            name: caps[2].to_string(),
                            member_type: Some(field_type),
                            is_uproperty: pending_uproperty,
                            is_ufunction: false,
                        },
                    );
                }
            }
            pending_uproperty = false;
        } else {
            // A signature or macro line consumes any dangling UPROPERTY.
            pending_uproperty = false;
        }
    }

    members
}

/// Parse enum variants: the leading identifier of each line, with value
/// assignments and trailing punctuation stripped, `GENERATED_*` excluded.
fn parse_enum_members(block: &str) -> Vec<MemberInfo> {
    let mut members = Vec::new();

    for line in block.lines() {
        let mut cleaned = line;
        if let Some(eq) = cleaned.find('=') {
            cleaned = &cleaned[..eq];
        }
        let cleaned = cleaned
            .trim()
            .trim_end_matches(',')
            .trim_end_matches('}')
            .trim();
        if cleaned.is_empty() || cleaned.starts_with("//") || cleaned.starts_with('/') {
            continue;
        }
        if let Some(caps) = ENUM_VARIANT_RE.captures(cleaned) {
            let name = caps[1].to_string();
            if name.starts_with("GENERATED_") || name == "UMETA" || name == "enum" || name == "class"
            {
                continue;
            }
            push_member(
                &mut members,
                MemberInfo {
                    name,
                    member_type: None,
                    is_uproperty: false,
                    is_ufunction: false,
                },
            );
        }
    }

    members
}

/// Parse function/delegate parameters by comma-splitting the parameter list.
fn parse_parameter_members(params: &str) -> Vec<MemberInfo> {
    let mut members = Vec::new();
    for param in params.split(',') {
        let param = param.trim();
        if param.is_empty() || param == "void" {
            continue;
        }
        push_member(
            &mut members,
            MemberInfo {
                name: param.to_string(),
                member_type: None,
                is_uproperty: false,
                is_ufunction: false,
            },
        );
    }
    members
}

fn push_member(members: &mut Vec<MemberInfo>, member: MemberInfo) {
    if !members.iter().any(|m| m.name == member.name) {
        members.push(member);
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Scans candidate files for definitions matching a `(name, kind)` target.
///
/// The extractor holds only the candidate list; file contents are read per
/// query so results always reflect the source on disk.
#[derive(Debug, Clone)]
pub struct DefinitionExtractor {
    files: Vec<CandidateFile>,
}

impl DefinitionExtractor {
    pub fn new(files: Vec<CandidateFile>) -> Self {
        Self { files }
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Extract and rank definitions of `kind` matching `name`.
    ///
    /// Results are deduplicated by `(file, line_start)` and sorted by
    /// match quality descending (ties broken by path and line for
    /// deterministic output).
    pub fn extract(
        &self,
        name: &str,
        kind: EntityKind,
        fuzzy: bool,
        cancel: &CancelToken,
    ) -> Result<Vec<DefinitionMatch>, QueryError> {
        if kind == EntityKind::Unknown {
            // Unknown targets fan out across every extractable kind.
            let mut all = Vec::new();
            for k in [
                EntityKind::Struct,
                EntityKind::Class,
                EntityKind::Enum,
                EntityKind::Function,
            ] {
                all.extend(self.extract(name, k, fuzzy, cancel)?);
            }
            return Ok(dedupe_and_rank(all));
        }

        let mut matches: Vec<DefinitionMatch> = Vec::new();

        for batch in self.files.chunks(SCAN_BATCH) {
            if cancel.is_cancelled() {
                return Err(QueryError::Cancelled);
            }
            let batch_matches: Vec<DefinitionMatch> = batch
                .par_iter()
                .flat_map(|file| scan_file(file, name, kind, fuzzy))
                .collect();
            matches.extend(batch_matches);
        }

        Ok(dedupe_and_rank(matches))
    }

    pub fn extract_struct(
        &self,
        name: &str,
        fuzzy: bool,
        cancel: &CancelToken,
    ) -> Result<Vec<DefinitionMatch>, QueryError> {
        self.extract(name, EntityKind::Struct, fuzzy, cancel)
    }

    pub fn extract_class(
        &self,
        name: &str,
        fuzzy: bool,
        cancel: &CancelToken,
    ) -> Result<Vec<DefinitionMatch>, QueryError> {
        self.extract(name, EntityKind::Class, fuzzy, cancel)
    }

    pub fn extract_enum(
        &self,
        name: &str,
        fuzzy: bool,
        cancel: &CancelToken,
    ) -> Result<Vec<DefinitionMatch>, QueryError> {
        self.extract(name, EntityKind::Enum, fuzzy, cancel)
    }

    pub fn extract_function(
        &self,
        name: &str,
        fuzzy: bool,
        cancel: &CancelToken,
    ) -> Result<Vec<DefinitionMatch>, QueryError> {
        self.extract(name, EntityKind::Function, fuzzy, cancel)
    }
}

/// Sort by match quality (descending, deterministic tie-break) and drop
/// duplicate `(file, line_start)` sites, keeping the best-scoring one.
pub(crate) fn dedupe_and_rank(mut matches: Vec<DefinitionMatch>) -> Vec<DefinitionMatch> {
    matches.sort_by(|a, b| {
        b.match_quality
            .partial_cmp(&a.match_quality)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.file_path.cmp(&b.file_path))
            .then_with(|| a.line_start.cmp(&b.line_start))
    });

    let mut seen = std::collections::HashSet::new();
    matches.retain(|m| seen.insert((m.file_path.clone(), m.line_start)));
    matches
}

/// Scan one file for definitions of `kind` matching `name`.
///
/// Unreadable files are skipped with a warning.
fn scan_file(file: &CandidateFile, name: &str, kind: EntityKind, fuzzy: bool) -> Vec<DefinitionMatch> {
    let bytes = match std::fs::read(&file.path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %file.path.display(), error = %e, "skipping unreadable file");
            return Vec::new();
        }
    };
    let text = String::from_utf8_lossy(&bytes);
    scan_text(&text, file, name, kind, fuzzy)
}

fn scan_text(
    text: &str,
    file: &CandidateFile,
    name: &str,
    kind: EntityKind,
    fuzzy: bool,
) -> Vec<DefinitionMatch> {
    let Some(regex) = header_regex(kind) else {
        return Vec::new();
    };

    let mut matches = Vec::new();

    for caps in regex.captures_iter(text) {
        let full = caps.get(0).expect("group 0 always present");
        let captured_name = caps.get(1).expect("header regexes capture the name").as_str();

        let quality = score_candidate(name, captured_name, kind, fuzzy);
        if quality <= 0.0 {
            continue;
        }

        let Some(extracted) = extract_body(text, kind, full.start(), full.end()) else {
            continue;
        };

        matches.push(DefinitionMatch {
            file_path: file.path.clone(),
            origin: file.origin,
            line_start: line_of(text, full.start()),
            line_end: line_of(text, extracted.end),
            kind,
            entity_name: display_name(captured_name),
            definition: text[full.start()..=extracted.end].to_string(),
            members: extracted.members,
            match_quality: quality,
        });
    }

    matches
}

/// Out-of-line definitions capture `Class::Method`; match either form and
/// report the qualified name.
fn score_candidate(query: &str, captured: &str, kind: EntityKind, fuzzy: bool) -> f32 {
    let direct = match_quality(query, captured, fuzzy);
    if kind == EntityKind::Function {
        if let Some(last) = captured.rsplit("::").next() {
            return direct.max(match_quality(query, last, fuzzy));
        }
    }
    direct
}

fn display_name(captured: &str) -> String {
    captured.to_string()
}

struct ExtractedBody {
    /// Byte index of the last character of the definition.
    end: usize,
    members: Vec<MemberInfo>,
}

/// Locate the end of the definition starting at the regex match and parse
/// its members.
fn extract_body(
    text: &str,
    kind: EntityKind,
    match_start: usize,
    match_end: usize,
) -> Option<ExtractedBody> {
    match kind {
        EntityKind::Struct | EntityKind::Class | EntityKind::Enum => {
            // The header regex ends at the opening brace.
            let open = match_end - 1;
            let close = find_closing(text, open, b'{', b'}')?;
            let block = &text[open + 1..close];
            let members = if kind == EntityKind::Enum {
                parse_enum_members(block)
            } else {
                parse_record_members(block)
            };
            Some(ExtractedBody { end: close, members })
        }
        EntityKind::Function => {
            // The header regex ends at the opening paren; the body (if any)
            // starts at the next top-level brace before a semicolon.
            let open_paren = match_end - 1;
            let close_paren = find_closing(text, open_paren, b'(', b')')?;
            let members = parse_parameter_members(&text[open_paren + 1..close_paren]);

            let rest = &text[close_paren + 1..];
            for (offset, ch) in rest.char_indices() {
                match ch {
                    '{' => {
                        let open_brace = close_paren + 1 + offset;
                        let close_brace = find_closing(text, open_brace, b'{', b'}')?;
                        return Some(ExtractedBody {
                            end: close_brace,
                            members,
                        });
                    }
                    ';' => {
                        // Pure declaration: the signature is the definition.
                        return Some(ExtractedBody {
                            end: close_paren + 1 + offset,
                            members,
                        });
                    }
                    _ => {}
                }
            }
            None
        }
        EntityKind::Delegate => {
            let open_paren = text[match_start..].find('(').map(|p| match_start + p)?;
            let close_paren = find_closing(text, open_paren, b'(', b')')?;
            // Skip the delegate type name (first macro argument).
            let args = &text[open_paren + 1..close_paren];
            let params = match args.split_once(',') {
                Some((_, rest)) => rest,
                None => "",
            };
            Some(ExtractedBody {
                end: close_paren,
                members: parse_parameter_members(params),
            })
        }
        EntityKind::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HIT_RESULT_H: &str = r#"
#include "CoreMinimal.h"

/** Result of a trace against the world. */
USTRUCT(BlueprintType)
struct ENGINE_API FHitResult
{
    GENERATED_USTRUCT_BODY()

    UPROPERTY()
    int32 FaceIndex;

    /** 'Time' of impact along trace direction. */
    UPROPERTY()
    float Time;

    UPROPERTY()
    float Distance;

    UPROPERTY()
    FVector ImpactPoint;

    UPROPERTY()
    FVector Normal;

    FHitResult()
    {
        Init();
    }

    void Init()
    {
        Time = 1.f; // sentinel "{" inside comment
    }
};

UENUM(BlueprintType)
enum class ECollisionChannel : uint8
{
    ECC_WorldStatic = 0,
    ECC_WorldDynamic,
    ECC_Pawn UMETA(DisplayName="Pawn"),
    ECC_MAX,
};
"#;

    fn candidate(path: &str) -> CandidateFile {
        CandidateFile {
            path: PathBuf::from(path),
            origin: Origin::Engine,
        }
    }

    fn scan(text: &str, name: &str, kind: EntityKind, fuzzy: bool) -> Vec<DefinitionMatch> {
        scan_text(text, &candidate("/Engine/Source/Runtime/HitResult.h"), name, kind, fuzzy)
    }

    #[test]
    fn test_struct_extraction_exact() {
        let matches = scan(HIT_RESULT_H, "FHitResult", EntityKind::Struct, false);
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.entity_name, "FHitResult");
        assert_eq!(m.match_quality, 1.0);
        assert!(m.line_start < m.line_end);
        assert!(m.definition.starts_with("USTRUCT"));
        assert!(m.definition.trim_end().ends_with('}'));
    }

    #[test]
    fn test_struct_members_parsed() {
        let matches = scan(HIT_RESULT_H, "FHitResult", EntityKind::Struct, false);
        let displays: Vec<String> = matches[0].members.iter().map(|m| m.display()).collect();
        assert!(displays.contains(&"float Time".to_string()), "{displays:?}");
        assert!(displays.contains(&"FVector ImpactPoint".to_string()));
        assert!(displays.contains(&"int32 FaceIndex".to_string()));
        // GENERATED_USTRUCT_BODY is not a member.
        assert!(!displays.iter().any(|d| d.contains("GENERATED")));
        // UPROPERTY flags survived.
        let time = matches[0].members.iter().find(|m| m.name == "Time").unwrap();
        assert!(time.is_uproperty);
    }

    #[test]
    fn test_members_have_no_duplicates() {
        let matches = scan(HIT_RESULT_H, "FHitResult", EntityKind::Struct, false);
        let mut names: Vec<&str> = matches[0].members.iter().map(|m| m.name.as_str()).collect();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
    }

    #[test]
    fn test_brace_in_comment_does_not_break_balance() {
        // Init() contains a "{" inside a comment and a string-free body;
        // the struct block must still close at the real brace.
        let matches = scan(HIT_RESULT_H, "FHitResult", EntityKind::Struct, false);
        assert!(matches[0].definition.contains("void Init()"));
        assert!(!matches[0].definition.contains("ECollisionChannel"));
    }

    #[test]
    fn test_enum_extraction_and_variants() {
        let matches = scan(HIT_RESULT_H, "ECollisionChannel", EntityKind::Enum, false);
        assert_eq!(matches.len(), 1);
        let names: Vec<&str> = matches[0].members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["ECC_WorldStatic", "ECC_WorldDynamic", "ECC_Pawn", "ECC_MAX"]
        );
    }

    #[test]
    fn test_class_extraction() {
        let src = r#"
UCLASS(config=Game)
class ENGINE_API ACharacter : public APawn, public INavAgentInterface
{
    GENERATED_BODY()

    UPROPERTY(Category=Character, VisibleAnywhere)
    USkeletalMeshComponent* Mesh;

    UFUNCTION(BlueprintCallable)
    virtual void Jump();
};
"#;
        let matches = scan(src, "ACharacter", EntityKind::Class, false);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].entity_name, "ACharacter");
        let jump = matches[0].members.iter().find(|m| m.name == "Jump").unwrap();
        assert!(jump.is_ufunction);
        let mesh = matches[0].members.iter().find(|m| m.name == "Mesh").unwrap();
        assert!(mesh.is_uproperty);
    }

    #[test]
    fn test_function_definition_and_params() {
        let src = r#"
void UCharacterMovementComponent::PhysSlide(float deltaTime, int32 Iterations)
{
    if (deltaTime < MIN_TICK_TIME)
    {
        return;
    }
}
"#;
        let matches = scan(src, "PhysSlide", EntityKind::Function, false);
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.entity_name, "UCharacterMovementComponent::PhysSlide");
        assert_eq!(m.members.len(), 2);
        assert!(m.definition.contains("MIN_TICK_TIME"));
        assert!(m.definition.trim_end().ends_with('}'));
    }

    #[test]
    fn test_function_declaration_without_body() {
        let src = "    virtual void PhysSlide(float deltaTime, int32 Iterations);\n";
        let matches = scan(src, "PhysSlide", EntityKind::Function, false);
        assert_eq!(matches.len(), 1);
        assert!(matches[0].definition.trim_end().ends_with(';'));
        assert_eq!(matches[0].line_start, matches[0].line_end);
    }

    #[test]
    fn test_delegate_extraction() {
        let src = "DECLARE_DYNAMIC_MULTICAST_DELEGATE_TwoParams(FOnDamaged, float, Damage, AActor*, Causer);\n";
        let matches = scan(src, "FOnDamaged", EntityKind::Delegate, false);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].entity_name, "FOnDamaged");
        assert!(!matches[0].members.is_empty());
    }

    #[test]
    fn test_match_quality_tiers() {
        // Exact beats everything.
        assert_eq!(match_quality("FHitResult", "FHitResult", true), 1.0);
        // Case-insensitive exact.
        assert_eq!(match_quality("fhitresult", "FHitResult", true), 0.95);
        // Both prefixed, stripped equal.
        assert_eq!(match_quality("UHitResult", "FHitResult", true), 0.90);
        // Query lacks prefix.
        assert_eq!(match_quality("HitResult", "FHitResult", true), 0.88);
        assert_eq!(match_quality("hitresult", "FHitResult", true), 0.88);
        // Candidate lacks prefix.
        assert_eq!(match_quality("FHitResult", "HitResult", true), 0.85);
        // Prefix tier: stripped candidate starts with stripped query.
        let score = match_quality("FHitRes", "FHitResult", true);
        let expected = 0.80 * (6.0 / 9.0);
        assert!((score - expected).abs() < 1e-6, "got {score}");
        // Non-fuzzy disables the inexact tiers.
        assert_eq!(match_quality("FHitRes", "FHitResult", false), 0.0);
        // Unrelated names score zero.
        assert_eq!(match_quality("FVector", "UAudioComponent", true), 0.0);
    }

    #[test]
    fn test_match_quality_levenshtein_tier() {
        // One substitution on stripped names, no containment either way.
        let score = match_quality("FHitResulb", "FHitResult", true);
        let expected = 0.65 * (1.0 - 1.0 / 9.0);
        assert!((score - expected).abs() < 1e-6, "got {score}");
    }

    #[test]
    fn test_exact_outranks_everything() {
        let others = ["FHitResults", "Hitresult", "FHitRes", "hitresult"];
        let exact = match_quality("FHitResult", "FHitResult", true);
        for other in others {
            assert!(exact > match_quality("FHitResult", other, true));
        }
    }

    #[test]
    fn test_strip_prefix_rules() {
        assert_eq!(strip_ue5_prefix("FHitResult"), "HitResult");
        assert_eq!(strip_ue5_prefix("AActor"), "Actor");
        // Lowercase second char: not a prefix.
        assert_eq!(strip_ue5_prefix("False"), "False");
        // Non-prefix first char.
        assert_eq!(strip_ue5_prefix("TArray"), "TArray");
        assert_eq!(strip_ue5_prefix("F"), "F");
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_unknown_kind_searches_all() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("HitResult.h");
        std::fs::write(&path, HIT_RESULT_H).unwrap();

        let extractor = DefinitionExtractor::new(vec![CandidateFile {
            path,
            origin: Origin::Engine,
        }]);
        let cancel = CancelToken::new();
        let matches = extractor
            .extract("hitresult", EntityKind::Unknown, true, &cancel)
            .unwrap();
        assert!(!matches.is_empty());
        assert_eq!(matches[0].entity_name, "FHitResult");
        assert!((0.88..=0.95).contains(&matches[0].match_quality));
    }

    #[test]
    fn test_unreadable_files_are_skipped() {
        let extractor = DefinitionExtractor::new(vec![candidate("/does/not/exist.h")]);
        let cancel = CancelToken::new();
        let matches = extractor
            .extract("FHitResult", EntityKind::Struct, true, &cancel)
            .unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_cancellation_between_batches() {
        let files: Vec<CandidateFile> = (0..600)
            .map(|i| candidate(&format!("/missing/{i}.h")))
            .collect();
        let extractor = DefinitionExtractor::new(files);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = extractor
            .extract("FHitResult", EntityKind::Struct, true, &cancel)
            .unwrap_err();
        assert!(matches!(err, QueryError::Cancelled));
    }

    #[test]
    fn test_results_sorted_by_quality_and_deduped() {
        let src = r#"
struct FHitResult { int32 A; };
struct FHitResultLite { int32 B; };
"#;
        let mut matches = scan(src, "FHitResult", EntityKind::Struct, true);
        matches = dedupe_and_rank(matches);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].entity_name, "FHitResult");
        assert!(matches[0].match_quality > matches[1].match_quality);
    }
}
