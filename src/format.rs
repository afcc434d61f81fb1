//! Output formatting.
//!
//! A pure function from a [`QueryResult`] to a string in one of seven
//! formats. Definitions always precede semantic results, matching the
//! merge contract.
//!
//! | Format | Audience |
//! |--------|----------|
//! | `text` | Humans at a terminal |
//! | `json` | Agents and scripts (single pretty document with summary) |
//! | `jsonl` | Agents streaming per-result lines |
//! | `xml` | Toolchains that ingest XML |
//! | `markdown` | Chat clients and docs |
//! | `code` | Comment-headered definition snippets only |
//! | `path` | Unique file paths, definitions first |

use std::fmt::Write as _;
use std::str::FromStr;

use anyhow::Result;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::models::QueryResult;

/// Output format selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Jsonl,
    Xml,
    Markdown,
    Code,
    Path,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "jsonl" => Ok(OutputFormat::Jsonl),
            "xml" => Ok(OutputFormat::Xml),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "code" => Ok(OutputFormat::Code),
            "path" => Ok(OutputFormat::Path),
            other => Err(format!(
                "unknown format: {other} (use text, json, jsonl, xml, markdown, code, or path)"
            )),
        }
    }
}

/// Render a query result.
///
/// `include_code` controls whether definition bodies appear;
/// `max_snippet_lines` caps each emitted code block.
pub fn format_result(
    result: &QueryResult,
    format: OutputFormat,
    include_code: bool,
    max_snippet_lines: usize,
) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(format_text(result, include_code, max_snippet_lines)),
        OutputFormat::Json => format_json(result),
        OutputFormat::Jsonl => format_jsonl(result),
        OutputFormat::Xml => format_xml(result, include_code, max_snippet_lines),
        OutputFormat::Markdown => Ok(format_markdown(result, include_code, max_snippet_lines)),
        OutputFormat::Code => Ok(format_code(result, max_snippet_lines)),
        OutputFormat::Path => Ok(format_paths(result)),
    }
}

/// Truncate `text` to `max_lines`, noting how much was elided.
fn limit_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= max_lines {
        return text.to_string();
    }
    let mut out = lines[..max_lines].join("\n");
    let _ = write!(out, "\n... ({} more lines)", lines.len() - max_lines);
    out
}

fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

// ============ text ============

fn format_text(result: &QueryResult, include_code: bool, max_snippet_lines: usize) -> String {
    let mut out = String::new();

    if !result.definition_results.is_empty() {
        let _ = writeln!(
            out,
            "=== Definition Results ({}) ===",
            result.definition_results.len()
        );
        for (i, hit) in result.definition_results.iter().enumerate() {
            let _ = writeln!(
                out,
                "\n[{}] {} {}",
                i + 1,
                hit.entity_type.as_str().to_uppercase(),
                hit.entity_name
            );
            let _ = writeln!(out, "    File: {}", hit.file_path);
            let _ = writeln!(out, "    Lines: {}-{}", hit.line_start, hit.line_end);
            let _ = writeln!(out, "    Quality: {:.2}", hit.match_quality);
            if !hit.members.is_empty() {
                let shown = hit.members.len().min(5);
                let suffix = if hit.total_members > shown { ", ..." } else { "" };
                let _ = writeln!(
                    out,
                    "    Members: {}{}",
                    hit.members[..shown].join(", "),
                    suffix
                );
            }
            if let Some(include) = &hit.include {
                let _ = writeln!(out, "    Include: #include \"{include}\"");
            }
            let _ = writeln!(out, "    Origin: {}", hit.origin);
            if include_code {
                for line in limit_lines(&hit.definition, max_snippet_lines).lines() {
                    let _ = writeln!(out, "    | {line}");
                }
            }
        }
    }

    if !result.semantic_results.is_empty() {
        let _ = writeln!(
            out,
            "\n=== Semantic Results ({}) ===",
            result.semantic_results.len()
        );
        for (i, hit) in result.semantic_results.iter().enumerate() {
            let _ = writeln!(
                out,
                "[{}] score={:.3} | {} | chunk {}/{}",
                i + 1,
                hit.score,
                file_name(&hit.path),
                hit.chunk_index + 1,
                hit.total_chunks
            );
            let _ = writeln!(out, "    Origin: {}", hit.origin);
        }
    }

    if result.definition_results.is_empty() && result.semantic_results.is_empty() {
        let _ = writeln!(out, "No results.");
    }

    let _ = writeln!(out, "\n=== Timing ===");
    if let Ok(serde_json::Value::Object(map)) = serde_json::to_value(&result.timing) {
        for (key, value) in map {
            if let Some(seconds) = value.as_f64() {
                let _ = writeln!(out, "{key}: {seconds:.3}s");
            }
        }
    }

    out
}

// ============ json / jsonl ============

fn format_json(result: &QueryResult) -> Result<String> {
    let document = serde_json::json!({
        "query": {
            "question": result.question,
            "intent": result.intent,
        },
        "results": {
            "definitions": result.definition_results,
            "semantic": result.semantic_results,
            "combined": result.combined_results,
        },
        "timing": result.timing,
        "summary": {
            "definition_count": result.definition_results.len(),
            "semantic_count": result.semantic_results.len(),
            "combined_count": result.combined_results.len(),
        },
    });
    Ok(serde_json::to_string_pretty(&document)?)
}

fn format_jsonl(result: &QueryResult) -> Result<String> {
    let mut out = String::new();
    for hit in &result.combined_results {
        let _ = writeln!(out, "{}", serde_json::to_string(hit)?);
    }
    Ok(out)
}

// ============ xml ============

fn format_xml(result: &QueryResult, include_code: bool, max_snippet_lines: usize) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer.write_event(Event::Start(BytesStart::new("query_result")))?;

    // <query>
    writer.write_event(Event::Start(BytesStart::new("query")))?;
    write_text_element(&mut writer, "question", &result.question)?;
    let mut intent = BytesStart::new("intent");
    intent.push_attribute(("type", result.intent.query_type.as_str()));
    intent.push_attribute(("confidence", format!("{:.2}", result.intent.confidence).as_str()));
    if let Some(name) = &result.intent.entity_name {
        intent.push_attribute(("entity", name.as_str()));
    }
    writer.write_event(Event::Start(intent))?;
    writer.write_event(Event::Text(BytesText::new(&result.intent.reasoning)))?;
    writer.write_event(Event::End(BytesEnd::new("intent")))?;
    writer.write_event(Event::End(BytesEnd::new("query")))?;

    // <results>
    writer.write_event(Event::Start(BytesStart::new("results")))?;

    writer.write_event(Event::Start(BytesStart::new("definitions")))?;
    for hit in &result.definition_results {
        let mut element = BytesStart::new("definition");
        element.push_attribute(("entity", hit.entity_name.as_str()));
        element.push_attribute(("kind", hit.entity_type.as_str()));
        element.push_attribute(("file", hit.file_path.as_str()));
        element.push_attribute(("line_start", hit.line_start.to_string().as_str()));
        element.push_attribute(("line_end", hit.line_end.to_string().as_str()));
        element.push_attribute(("quality", format!("{:.2}", hit.match_quality).as_str()));
        element.push_attribute(("origin", hit.origin.as_str()));
        writer.write_event(Event::Start(element))?;
        if include_code {
            write_text_element(
                &mut writer,
                "code",
                &limit_lines(&hit.definition, max_snippet_lines),
            )?;
        }
        for member in &hit.members {
            write_text_element(&mut writer, "member", member)?;
        }
        writer.write_event(Event::End(BytesEnd::new("definition")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("definitions")))?;

    writer.write_event(Event::Start(BytesStart::new("semantic")))?;
    for hit in &result.semantic_results {
        let mut element = BytesStart::new("chunk");
        element.push_attribute(("path", hit.path.as_str()));
        element.push_attribute(("index", hit.chunk_index.to_string().as_str()));
        element.push_attribute(("total", hit.total_chunks.to_string().as_str()));
        element.push_attribute(("score", format!("{:.4}", hit.score).as_str()));
        element.push_attribute(("origin", hit.origin.as_str()));
        writer.write_event(Event::Empty(element))?;
    }
    writer.write_event(Event::End(BytesEnd::new("semantic")))?;

    writer.write_event(Event::End(BytesEnd::new("results")))?;

    let mut timing = BytesStart::new("timing");
    timing.push_attribute(("total_s", format!("{:.3}", result.timing.total_s).as_str()));
    writer.write_event(Event::Empty(timing))?;

    writer.write_event(Event::End(BytesEnd::new("query_result")))?;

    Ok(String::from_utf8(writer.into_inner())?)
}

fn write_text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

// ============ markdown ============

fn format_markdown(result: &QueryResult, include_code: bool, max_snippet_lines: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Search: {}\n", result.question);
    let _ = writeln!(
        out,
        "**Intent:** {} (confidence {:.2}) - {}\n",
        result.intent.query_type, result.intent.confidence, result.intent.reasoning
    );

    if !result.definition_results.is_empty() {
        let _ = writeln!(out, "## Definitions ({})\n", result.definition_results.len());
        for (i, hit) in result.definition_results.iter().enumerate() {
            let _ = writeln!(
                out,
                "### {}. {} `{}`\n",
                i + 1,
                hit.entity_type,
                hit.entity_name
            );
            let _ = writeln!(
                out,
                "- File: `{}` (lines {}-{}, {})",
                hit.file_path, hit.line_start, hit.line_end, hit.origin
            );
            let _ = writeln!(out, "- Match quality: {:.2}", hit.match_quality);
            if !hit.members.is_empty() {
                let _ = writeln!(out, "- Members: {}", hit.members.join(", "));
            }
            if include_code {
                let _ = writeln!(
                    out,
                    "\n```cpp\n{}\n```",
                    limit_lines(&hit.definition, max_snippet_lines)
                );
            }
            let _ = writeln!(out);
        }
    }

    if !result.semantic_results.is_empty() {
        let _ = writeln!(out, "## Semantic matches ({})\n", result.semantic_results.len());
        for (i, hit) in result.semantic_results.iter().enumerate() {
            let _ = writeln!(
                out,
                "{}. `{}` (chunk {}/{}, score {:.3}, {})",
                i + 1,
                hit.path,
                hit.chunk_index + 1,
                hit.total_chunks,
                hit.score,
                hit.origin
            );
        }
    }

    out
}

// ============ code / path ============

fn format_code(result: &QueryResult, max_snippet_lines: usize) -> String {
    let mut out = String::new();
    for hit in &result.definition_results {
        let _ = writeln!(
            out,
            "// {}:{}-{} ({} {})",
            hit.file_path, hit.line_start, hit.line_end, hit.entity_type, hit.entity_name
        );
        let _ = writeln!(out, "{}\n", limit_lines(&hit.definition, max_snippet_lines));
    }
    out
}

fn format_paths(result: &QueryResult) -> String {
    let mut out = String::new();
    let mut seen = std::collections::HashSet::new();
    for hit in &result.combined_results {
        let path = hit.path();
        if seen.insert(crate::paths::normalize_for_compare(path)) {
            let _ = writeln!(out, "{path}");
        }
    }
    // Fall back to the branch lists when the merge was truncated away
    // (top_k = 0 still deserves path output of nothing, but single-branch
    // results should always list).
    if out.is_empty() {
        for hit in &result.definition_results {
            if seen.insert(crate::paths::normalize_for_compare(&hit.file_path)) {
                let _ = writeln!(out, "{}", hit.file_path);
            }
        }
        for hit in &result.semantic_results {
            if seen.insert(crate::paths::normalize_for_compare(&hit.path)) {
                let _ = writeln!(out, "{}", hit.path);
            }
        }
    }
    out
}
