//! Helper library available inside the sandbox (C2).
//!
//! Pure, synchronous helpers (`peek`, `search`, `count_tokens`, `truncate`,
//! `extract_code_blocks`) operate directly on [`serde_json::Value`] and are
//! independent of the scripting engine. The async-shaped helpers (`llm`,
//! `llm_batch`, `summarize`, `find_relevant`, `map_reduce`, `verify_claim`,
//! `audit_reasoning`) mint a [`DeferredOperation`] via the session's
//! [`DeferredRegistry`] instead of producing a value directly; the sandbox
//! wires these into script-callable closures (see [`crate::sandbox`]).

use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value, json};

use crate::deferred::{DeferredOperation, DeferredRegistry, OperationKind};

/// Peeks at a slice of a string or array, returning a display string.
///
/// Mirrors the original's dispatch: string data is line-sliced and rejoined;
/// array data of all strings is rejoined with newlines, otherwise rendered
/// with Rust's `Debug` as the closest analogue to Python's `repr`.
#[must_use]
pub fn peek(data: &Value, start: usize, end: Option<usize>) -> String {
    match data {
        Value::String(s) => {
            let lines: Vec<&str> = s.lines().collect();
            slice(&lines, start, end).join("\n")
        }
        Value::Array(items) => {
            let sliced = slice(items, start, end);
            if sliced.iter().all(Value::is_string) {
                sliced
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                format!("{sliced:?}")
            }
        }
        other => format!("{other:?}"),
    }
}

fn slice<T: Clone>(items: &[T], start: usize, end: Option<usize>) -> Vec<T> {
    let len = items.len();
    let start = start.min(len);
    let end = end.map_or(len, |e| e.min(len));
    if start >= end {
        Vec::new()
    } else {
        items[start..end].to_vec()
    }
}

/// A single search match.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchMatch {
    /// Index (line number, list index, or `None` for dict keys).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// The dict key, when searching a JSON object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// The matched content.
    pub content: Value,
    /// Surrounding context lines, when `context_lines > 0` and `data` is a string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Options accepted by [`search`].
#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    /// Treat `pattern` as a regular expression rather than a literal string.
    pub regex: bool,
    /// Case-sensitive matching.
    pub case_sensitive: bool,
    /// Lines of context to include around string matches.
    pub context_lines: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            regex: false,
            case_sensitive: true,
            context_lines: 0,
        }
    }
}

/// Searches `data` for `pattern`, returning matches with their locations.
///
/// # Errors
///
/// Returns an error if `pattern` (or its escaped literal form) is not a
/// valid regular expression.
pub fn search(data: &Value, pattern: &str, opts: SearchOptions) -> Result<Vec<SearchMatch>, String> {
    let pattern = if opts.regex {
        pattern.to_string()
    } else {
        regex::escape(pattern)
    };
    let compiled = RegexBuilder::new(&pattern)
        .case_insensitive(!opts.case_sensitive)
        .build()
        .map_err(|e| e.to_string())?;

    let mut matches = Vec::new();
    match data {
        Value::String(s) => {
            let lines: Vec<&str> = s.lines().collect();
            for (i, line) in lines.iter().enumerate() {
                if compiled.is_match(line) {
                    let context = if opts.context_lines > 0 {
                        let start = i.saturating_sub(opts.context_lines);
                        let end = (i + opts.context_lines + 1).min(lines.len());
                        Some(lines[start..end].join("\n"))
                    } else {
                        None
                    };
                    matches.push(SearchMatch {
                        index: Some(i),
                        key: None,
                        content: Value::String((*line).to_string()),
                        context,
                    });
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let item_str = value_to_display_string(item);
                if compiled.is_match(&item_str) {
                    matches.push(SearchMatch {
                        index: Some(i),
                        key: None,
                        content: item.clone(),
                        context: None,
                    });
                }
            }
        }
        Value::Object(map) => {
            for (key, value) in map {
                let value_str = value_to_display_string(value);
                if compiled.is_match(key) || compiled.is_match(&value_str) {
                    matches.push(SearchMatch {
                        index: None,
                        key: Some(key.clone()),
                        content: value.clone(),
                        context: None,
                    });
                }
            }
        }
        _ => {}
    }
    Ok(matches)
}

fn value_to_display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Splits text into overlapping line-based chunks.
///
/// Ported verbatim from the original's `_chunk_text`: a running chunk
/// accumulates lines until adding one would exceed `chunk_size` characters,
/// at which point the chunk is flushed and a trailing window of lines
/// (bounded by `overlap` characters) seeds the next chunk.
#[must_use]
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_size = 0usize;

    for line in text.lines() {
        let line_size = line.chars().count();
        if current_size + line_size > chunk_size && !current.is_empty() {
            chunks.push(current.join("\n"));
            let mut overlap_lines: Vec<&str> = Vec::new();
            let mut overlap_size = 0usize;
            for prev in current.iter().rev() {
                let prev_size = prev.chars().count();
                if overlap_size + prev_size > overlap {
                    break;
                }
                overlap_lines.insert(0, prev);
                overlap_size += prev_size;
            }
            current = overlap_lines;
            current_size = overlap_size;
        }
        current.push(line);
        current_size += line_size;
    }

    if !current.is_empty() {
        chunks.push(current.join("\n"));
    }
    chunks
}

const DEFAULT_CHUNK_SIZE: usize = 500;
const DEFAULT_OVERLAP: usize = 50;

/// Mints a deferred `embed`-backed relevance search operation.
pub fn find_relevant(
    registry: &mut DeferredRegistry,
    data: &Value,
    query: &str,
    top_k: u32,
) -> DeferredOperation {
    let chunks: Vec<String> = match data {
        Value::String(s) => chunk_text(s, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP),
        Value::Array(items) => items.iter().map(value_to_display_string).collect(),
        other => vec![value_to_display_string(other)],
    };
    let mut params = HashMap::new();
    params.insert("query".to_string(), json!(query));
    params.insert("chunks".to_string(), json!(chunks));
    params.insert("top_k".to_string(), json!(top_k));
    registry.create(OperationKind::Embed, params)
}

/// Mints a deferred summarization operation.
pub fn summarize(
    registry: &mut DeferredRegistry,
    data: &Value,
    max_tokens: u32,
    focus: Option<&str>,
) -> DeferredOperation {
    let content = value_to_display_string(data);
    let mut prompt = format!("Summarize the following in at most {max_tokens} tokens");
    if let Some(focus) = focus {
        prompt.push_str(&format!(", focusing on {focus}"));
    }
    prompt.push_str(&format!(":\n\n{content}"));

    let mut params = HashMap::new();
    params.insert("content".to_string(), json!(content));
    params.insert("max_tokens".to_string(), json!(max_tokens));
    params.insert("focus".to_string(), json!(focus));
    params.insert("prompt".to_string(), json!(prompt));
    registry.create(OperationKind::Summarize, params)
}

/// Mints a deferred single LLM call.
pub fn llm(
    registry: &mut DeferredRegistry,
    prompt: &str,
    context: Option<&str>,
    model: Option<&str>,
    max_tokens: u32,
    temperature: f64,
) -> DeferredOperation {
    let mut params = HashMap::new();
    params.insert("prompt".to_string(), json!(prompt));
    params.insert("context".to_string(), json!(context));
    params.insert("model".to_string(), json!(model));
    params.insert("max_tokens".to_string(), json!(max_tokens));
    params.insert("temperature".to_string(), json!(temperature));
    registry.create(OperationKind::LlmCall, params)
}

/// Mints a deferred batch of parallel LLM calls.
///
/// # Errors
///
/// Returns an error if `contexts` is provided and its length does not match
/// `prompts`.
pub fn llm_batch(
    registry: &mut DeferredRegistry,
    prompts: &[String],
    contexts: Option<&[String]>,
    max_parallel: u32,
    model: Option<&str>,
    max_tokens: u32,
) -> Result<DeferredOperation, String> {
    if let Some(contexts) = contexts {
        if contexts.len() != prompts.len() {
            return Err("contexts must have same length as prompts".to_string());
        }
    }
    let mut params = HashMap::new();
    params.insert("prompts".to_string(), json!(prompts));
    params.insert("contexts".to_string(), json!(contexts));
    params.insert("max_parallel".to_string(), json!(max_parallel));
    params.insert("model".to_string(), json!(model));
    params.insert("max_tokens".to_string(), json!(max_tokens));
    Ok(registry.create(OperationKind::LlmBatch, params))
}

/// Compatibility alias for [`llm_batch`].
///
/// Deprecated: use `llm_batch` instead. Retained because the sandbox surface
/// carries it forward unchanged from the original helper library.
///
/// # Errors
///
/// See [`llm_batch`].
pub fn llm_query_batched(
    registry: &mut DeferredRegistry,
    prompts: &[String],
    contexts: Option<&[String]>,
    max_parallel: u32,
    model: Option<&str>,
    max_tokens: u32,
) -> Result<DeferredOperation, String> {
    tracing::warn!("llm_query_batched() is deprecated; use llm_batch() instead");
    llm_batch(registry, prompts, contexts, max_parallel, model, max_tokens)
}

/// Mints a deferred map-reduce fan-out/fan-in operation.
pub fn map_reduce(
    registry: &mut DeferredRegistry,
    data: &[Value],
    map_prompt: &str,
    reduce_prompt: &str,
    chunk_size: usize,
) -> DeferredOperation {
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<Vec<Value>> = data.chunks(chunk_size).map(<[Value]>::to_vec).collect();
    let mut params = HashMap::new();
    params.insert("chunks".to_string(), json!(chunks));
    params.insert("map_prompt".to_string(), json!(map_prompt));
    params.insert("reduce_prompt".to_string(), json!(reduce_prompt));
    registry.create(OperationKind::MapReduce, params)
}

/// Mints a deferred claim-verification operation.
pub fn verify_claim(
    registry: &mut DeferredRegistry,
    claim: &str,
    evidence: &str,
    confidence: f64,
) -> DeferredOperation {
    let mut params = HashMap::new();
    params.insert("type".to_string(), json!("verify_claim"));
    params.insert("claim".to_string(), json!(claim));
    params.insert("evidence".to_string(), json!(evidence));
    params.insert("target_confidence".to_string(), json!(confidence));
    registry.create(OperationKind::LlmCall, params)
}

/// Mints a deferred reasoning-trace audit operation.
pub fn audit_reasoning(
    registry: &mut DeferredRegistry,
    steps: &[String],
    sources: Option<&[String]>,
) -> DeferredOperation {
    let mut params = HashMap::new();
    params.insert("type".to_string(), json!("audit_reasoning"));
    params.insert("steps".to_string(), json!(steps));
    params.insert("sources".to_string(), json!(sources));
    registry.create(OperationKind::LlmCall, params)
}

/// Approximate token count using the ~4-chars-per-token heuristic.
#[must_use]
pub fn count_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Truncates text to approximately `max_tokens` tokens.
#[must_use]
pub fn truncate(text: &str, max_tokens: usize) -> String {
    let max_chars = max_tokens * 4;
    let char_count = text.chars().count();
    if char_count <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str("...");
    truncated
}

fn code_block_pattern() -> Regex {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?s)```(\w*)\n(.*?)```").unwrap()
}

/// Extracts fenced code blocks from markdown text.
#[must_use]
pub fn extract_code_blocks(text: &str) -> Vec<Map<String, Value>> {
    code_block_pattern()
        .captures_iter(text)
        .map(|caps| {
            let lang = caps.get(1).map_or("", |m| m.as_str());
            let code = caps.get(2).map_or("", |m| m.as_str()).trim();
            let mut obj = Map::new();
            obj.insert(
                "language".to_string(),
                json!(if lang.is_empty() { "text" } else { lang }),
            );
            obj.insert("code".to_string(), json!(code));
            obj
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_string_slices_lines() {
        let data = json!("a\nb\nc\nd");
        assert_eq!(peek(&data, 1, Some(3)), "b\nc");
    }

    #[test]
    fn peek_array_of_strings_joins() {
        let data = json!(["a", "b", "c"]);
        assert_eq!(peek(&data, 0, Some(2)), "a\nb");
    }

    #[test]
    fn peek_array_of_other_uses_debug_repr() {
        let data = json!([1, 2, 3]);
        assert_eq!(peek(&data, 0, None), "[Number(1), Number(2), Number(3)]");
    }

    #[test]
    fn search_string_literal_finds_lines() {
        let data = json!("def foo():\n    pass\ndef bar():\n    pass");
        let matches = search(&data, "def ", SearchOptions::default()).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].index, Some(0));
    }

    #[test]
    fn search_regex_case_insensitive() {
        let data = json!("ERROR: timeout\nok\nerror: retry");
        let opts = SearchOptions {
            regex: true,
            case_sensitive: false,
            context_lines: 0,
        };
        let matches = search(&data, r"error.*", opts).unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn search_object_matches_key_or_value() {
        let data = json!({"status": "failed", "code": 500});
        let matches = search(&data, "failed", SearchOptions::default()).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].key.as_deref(), Some("status"));
    }

    #[test]
    fn chunk_text_respects_overlap() {
        let text = (0..10).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\n");
        let chunks = chunk_text(&text, 20, 5);
        assert!(chunks.len() > 1);
        // the start of chunk N+1 should echo the tail of chunk N (the overlap window)
        assert!(chunks[1].starts_with(chunks[0].lines().last().unwrap_or("")));
    }

    #[test]
    fn llm_batch_rejects_mismatched_contexts() {
        let mut registry = DeferredRegistry::new();
        let prompts = vec!["a".to_string()];
        let contexts = vec!["x".to_string(), "y".to_string()];
        let result = llm_batch(&mut registry, &prompts, Some(&contexts), 5, None, 1024);
        assert!(result.is_err());
    }

    #[test]
    fn find_relevant_chunks_string_data() {
        let mut registry = DeferredRegistry::new();
        let data = json!("short text");
        let op = find_relevant(&mut registry, &data, "query", 5);
        assert_eq!(op.operation_type, OperationKind::Embed);
        assert!(op.params.contains_key("chunks"));
    }

    #[test]
    fn map_reduce_chunks_data_by_size() {
        let mut registry = DeferredRegistry::new();
        let data: Vec<Value> = (0..25).map(Value::from).collect();
        let op = map_reduce(&mut registry, &data, "map {item}", "reduce {results}", 10);
        let chunks = op.params.get("chunks").unwrap().as_array().unwrap();
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn count_tokens_uses_four_char_heuristic() {
        assert_eq!(count_tokens("abcdefgh"), 2);
    }

    #[test]
    fn truncate_appends_ellipsis_when_over_budget() {
        let text = "a".repeat(20);
        let truncated = truncate(&text, 2);
        assert_eq!(truncated.len(), 8);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn truncate_noop_under_budget() {
        let text = "short";
        assert_eq!(truncate(text, 1000), text);
    }

    #[test]
    fn extract_code_blocks_finds_language_and_code() {
        let text = "intro\n```rust\nfn main() {}\n```\nmore\n```\nplain\n```";
        let blocks = extract_code_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["language"], json!("rust"));
        assert_eq!(blocks[0]["code"], json!("fn main() {}"));
        assert_eq!(blocks[1]["language"], json!("text"));
    }
}
