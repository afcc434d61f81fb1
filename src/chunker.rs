//! Deterministic C++ source chunkers.
//!
//! Two modes, selected by configuration and fixed at index-build time:
//!
//! - **Semantic** — split at structural boundaries (function, class, struct,
//!   enum, UE5 macro, namespace, comment block), falling back to paragraph
//!   and then character splitting, enforcing min/max chunk sizes and adding
//!   an overlap tail between neighbors for context continuity.
//! - **Character** — slide a window of `max_chunk_size` with step
//!   `max_chunk_size − overlap`, dropping trailing chunks shorter than 300
//!   characters (when not the first chunk).
//!
//! Both modes are byte-for-byte deterministic for a given input and
//! parameter set. That determinism is load-bearing: when reranking needs
//! chunk text the index did not store, the engine re-reads the file and
//! re-runs the chunker with the index-time parameters, and
//! `chunks[chunk_index]` must recover the original text.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ChunkingConfig;

/// Trailing chunks shorter than this are dropped (character mode) or merged
/// into their predecessor (semantic fallback).
const MIN_TAIL_CHARS: usize = 300;

/// Structural boundary patterns, tried in this order at each position.
static BOUNDARY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // Function definitions, free or member-qualified.
        Regex::new(
            r"(?m)^\s*(?:(?:inline|static|virtual|explicit|constexpr|template\s*<[^>]*>)\s+)*[\w:]+(?:\s*<[^>]*>)?\s+[\w:]+\s*\([^)]*\)\s*(?:const\s*)?(?:override\s*)?(?:final\s*)?\{",
        )
        .unwrap(),
        // Class / struct definitions.
        Regex::new(r"(?m)^\s*(?:class|struct)\s+[\w_]+\s*(?::\s*public\s+[\w_]+)?\s*\{").unwrap(),
        // Enum definitions.
        Regex::new(r"(?m)^\s*(?:enum\s+class|enum)\s+[\w_]+\s*(?::\s*[\w_]+)?\s*\{").unwrap(),
        // UE5 reflection macros.
        Regex::new(r"(?m)^\s*U(?:CLASS|STRUCT|ENUM|FUNCTION|PROPERTY|INTERFACE)\s*\(").unwrap(),
        // Namespaces.
        Regex::new(r"(?m)^\s*namespace\s+[\w_]+\s*\{").unwrap(),
        // Comment blocks (`/**` or `// -----` rules).
        Regex::new(r"(?m)^\s*(?:/\*\*|//\s*[-=]{5,})").unwrap(),
    ]
});

/// Deterministic source chunker configured to match the index build.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_chunk_size: usize,
    min_chunk_size: usize,
    overlap: usize,
    semantic: bool,
}

impl Chunker {
    pub fn new(max_chunk_size: usize, min_chunk_size: usize, overlap: usize, semantic: bool) -> Self {
        Self {
            max_chunk_size,
            min_chunk_size,
            overlap,
            semantic,
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(
            config.max_chunk_size,
            config.min_chunk_size,
            config.overlap,
            config.semantic,
        )
    }

    /// Split `text` into chunks using the configured mode.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        if self.semantic {
            self.semantic_chunks(text)
        } else {
            self.char_chunks(text)
        }
    }

    // -- semantic mode ------------------------------------------------------

    fn semantic_chunks(&self, text: &str) -> Vec<String> {
        if text.len() <= self.max_chunk_size {
            return vec![text.to_string()];
        }

        let boundaries = find_boundaries(text);
        let sections = self.split_at_boundaries(text, &boundaries);
        self.post_process(sections)
    }

    /// Split at structural boundaries, accumulating sections until they
    /// reach `max_chunk_size`.
    fn split_at_boundaries(&self, text: &str, boundaries: &[usize]) -> Vec<String> {
        if boundaries.is_empty() {
            return self.fallback_chunks(text);
        }

        let mut sections = Vec::new();
        let mut last_pos = 0;

        for &pos in boundaries {
            if pos <= last_pos {
                continue;
            }
            if pos - last_pos < self.max_chunk_size {
                continue;
            }
            let section = &text[last_pos..pos];
            if !section.trim().is_empty() {
                sections.push(section.to_string());
            }
            last_pos = pos;
        }

        if last_pos < text.len() {
            let remaining = &text[last_pos..];
            if !remaining.trim().is_empty() {
                sections.push(remaining.to_string());
            }
        }

        if sections.is_empty() {
            vec![text.to_string()]
        } else {
            sections
        }
    }

    /// Split oversized sections further, merge undersized neighbors, and
    /// add overlap tails.
    fn post_process(&self, sections: Vec<String>) -> Vec<String> {
        let mut queue: std::collections::VecDeque<String> = sections.into();
        let mut processed: Vec<String> = Vec::new();

        while let Some(section) = queue.pop_front() {
            if section.len() > self.max_chunk_size {
                for piece in self.split_at_paragraphs(&section) {
                    if piece.len() > self.max_chunk_size {
                        processed.extend(self.fallback_chunks(&piece));
                    } else {
                        processed.push(piece);
                    }
                }
                continue;
            }

            if section.len() < self.min_chunk_size {
                if let Some(next) = queue.front_mut() {
                    let merged_len = section.len() + next.len();
                    if merged_len <= self.max_chunk_size {
                        let merged = format!("{section}{next}");
                        *next = merged;
                        continue;
                    }
                }
            }

            processed.push(section);
        }

        if processed.len() > 1 && self.overlap > 0 {
            self.add_overlap(processed)
        } else {
            processed
        }
    }

    /// Split on blank-line boundaries, keeping every byte (separators stay
    /// attached to the preceding piece).
    fn split_at_paragraphs(&self, text: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut current_start = 0;
        let bytes = text.as_bytes();
        let mut i = 0;

        while i + 1 < bytes.len() {
            if bytes[i] == b'\n' && bytes[i + 1] == b'\n' {
                let candidate_end = i + 2;
                if candidate_end - current_start >= self.max_chunk_size {
                    pieces.push(text[current_start..candidate_end].to_string());
                    current_start = candidate_end;
                }
                i += 2;
            } else {
                i += 1;
            }
        }

        if current_start < text.len() {
            pieces.push(text[current_start..].to_string());
        }

        if pieces.is_empty() {
            vec![text.to_string()]
        } else {
            pieces
        }
    }

    /// Character-window fallback. Short tails merge into the previous chunk
    /// so no byte is lost.
    fn fallback_chunks(&self, text: &str) -> Vec<String> {
        let step = self.max_chunk_size.saturating_sub(self.overlap).max(1);
        let mut chunks: Vec<String> = Vec::new();
        let mut start = 0;

        while start < text.len() {
            let end = char_floor(text, (start + self.max_chunk_size).min(text.len()));
            let piece = &text[start..end];

            if piece.len() < MIN_TAIL_CHARS && start != 0 {
                if let Some(last) = chunks.last_mut() {
                    last.push_str(piece);
                }
                break;
            }

            chunks.push(piece.to_string());
            if end == text.len() {
                break;
            }
            start = advance(text, start, step);
        }

        if chunks.is_empty() {
            chunks.push(text.to_string());
        }
        chunks
    }

    /// Append the head of each chunk to its predecessor for context.
    fn add_overlap(&self, chunks: Vec<String>) -> Vec<String> {
        let mut overlapped: Vec<String> = Vec::with_capacity(chunks.len());

        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                let prev = overlapped.last_mut().expect("i > 0 implies a predecessor");
                let tail_end = char_floor(chunk, self.overlap.min(chunk.len()));
                let overlap_text = &chunk[..tail_end];
                if prev.len() + overlap_text.len() <= self.max_chunk_size {
                    prev.push_str(overlap_text);
                }
            }
            overlapped.push(chunk.clone());
        }

        overlapped
    }

    // -- character mode -----------------------------------------------------

    /// Fixed-window chunking matching the index builder's character mode:
    /// trailing windows shorter than 300 chars are dropped (unless first).
    fn char_chunks(&self, text: &str) -> Vec<String> {
        let step = self.max_chunk_size.saturating_sub(self.overlap).max(1);
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < text.len() {
            let end = char_floor(text, (start + self.max_chunk_size).min(text.len()));
            let piece = &text[start..end];
            if piece.len() < MIN_TAIL_CHARS && start != 0 {
                break;
            }
            chunks.push(piece.to_string());
            if end == text.len() {
                break;
            }
            start = advance(text, start, step);
        }

        if chunks.is_empty() {
            chunks.push(text.to_string());
        }
        chunks
    }
}

/// Advance a window start by `step`, snapped to a character boundary, and
/// always by at least one character.
fn advance(text: &str, start: usize, step: usize) -> usize {
    let next = char_floor(text, start + step);
    if next > start {
        next
    } else {
        start
            + text[start..]
                .chars()
                .next()
                .map(char::len_utf8)
                .unwrap_or(1)
    }
}

/// All structural boundary positions, sorted and deduplicated.
fn find_boundaries(text: &str) -> Vec<usize> {
    let mut positions: Vec<usize> = BOUNDARY_PATTERNS
        .iter()
        .flat_map(|pattern| pattern.find_iter(text).map(|m| m.start()))
        .collect();
    positions.sort_unstable();
    positions.dedup();
    positions
}

/// Snap a byte index down to the nearest UTF-8 character boundary.
fn char_floor(text: &str, idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    let mut i = idx;
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_source() -> String {
        let mut src = String::new();
        src.push_str("// HitResult.h\n\n#include \"CoreMinimal.h\"\n\n");
        for i in 0..30 {
            src.push_str(&format!(
                "/** Doc for Fn{i}. */\nvoid Fn{i}(int32 Value)\n{{\n    DoWork(Value + {i});\n    MoreWork();\n}}\n\n"
            ));
        }
        src
    }

    #[test]
    fn test_small_input_single_chunk() {
        let chunker = Chunker::new(2000, 500, 200, true);
        let chunks = chunker.chunk("short file");
        assert_eq!(chunks, vec!["short file".to_string()]);
    }

    #[test]
    fn test_semantic_chunks_respect_max_size_mostly() {
        let src = sample_source();
        let chunker = Chunker::new(600, 200, 50, true);
        let chunks = chunker.chunk(&src);
        assert!(chunks.len() > 1);
        // Overlap tails and short-tail merges can push a chunk past max,
        // but never by more than a merged tail.
        for chunk in &chunks {
            assert!(chunk.len() <= 600 + 300, "chunk of {} chars", chunk.len());
        }
    }

    #[test]
    fn test_deterministic() {
        let src = sample_source();
        let chunker = Chunker::new(600, 200, 50, true);
        assert_eq!(chunker.chunk(&src), chunker.chunk(&src));
        let char_chunker = Chunker::new(600, 200, 50, false);
        assert_eq!(char_chunker.chunk(&src), char_chunker.chunk(&src));
    }

    #[test]
    fn test_semantic_round_trip_coverage() {
        // Every byte of the input appears in at least one chunk: walking the
        // chunks in order must be able to consume the entire original.
        let src = sample_source();
        let chunker = Chunker::new(600, 200, 0, true);
        let chunks = chunker.chunk(&src);

        let mut pos = 0;
        for chunk in &chunks {
            assert!(
                src[pos..].starts_with(chunk.as_str()),
                "chunk does not continue coverage at byte {pos}"
            );
            pos += chunk.len();
        }
        assert_eq!(pos, src.len(), "bytes {pos}..{} not covered", src.len());
    }

    #[test]
    fn test_char_mode_windows() {
        let text = "a".repeat(3000);
        let chunker = Chunker::new(1500, 500, 200, false);
        let chunks = chunker.chunk(&text);
        // Windows: [0..1500), [1300..2800), [2600..3000); the 400-char tail
        // survives because it is >= 300.
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1500);
        assert_eq!(chunks[1].len(), 1500);
        assert_eq!(chunks[2].len(), 400);
    }

    #[test]
    fn test_char_mode_drops_short_tail() {
        let text = "b".repeat(1600);
        let chunker = Chunker::new(1500, 500, 200, false);
        let chunks = chunker.chunk(&text);
        // Second window would be 300 bytes starting at 1300... that one
        // stays; the next would start at 2600 past the end.
        assert!(chunks.iter().all(|c| c.len() >= 300));
    }

    #[test]
    fn test_char_mode_first_chunk_never_dropped() {
        let chunker = Chunker::new(1500, 500, 200, false);
        let chunks = chunker.chunk("tiny");
        assert_eq!(chunks, vec!["tiny".to_string()]);
    }

    #[test]
    fn test_reconstruction_by_index() {
        // chunks[i] must be recoverable by re-running the chunker.
        let src = sample_source();
        let chunker = Chunker::new(600, 200, 50, true);
        let original = chunker.chunk(&src);
        let again = chunker.chunk(&src);
        for (i, chunk) in original.iter().enumerate() {
            assert_eq!(chunk, &again[i]);
        }
    }

    #[test]
    fn test_utf8_safety() {
        // Multi-byte characters at window edges must not panic.
        let text = "é".repeat(2000);
        let chunker = Chunker::new(1500, 500, 200, false);
        let chunks = chunker.chunk(&text);
        assert!(!chunks.is_empty());
        let semantic = Chunker::new(1500, 500, 200, true);
        assert!(!semantic.chunk(&text).is_empty());
    }

    #[test]
    fn test_boundaries_found_in_ue_source() {
        let src = "USTRUCT()\nstruct FThing\n{\n};\n\nnamespace Foo {\n}\n";
        let boundaries = find_boundaries(src);
        assert!(boundaries.len() >= 2);
    }
}
