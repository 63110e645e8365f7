//! Tool-output compaction and externalization
//!
//! Oversized tool results must never reach the model verbatim. This stage
//! classifies tool-message content, shrinks medium-sized payloads inline,
//! and externalizes large ones into the artifact store, leaving a short
//! pointer behind.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use headroom_core::{Message, Role};

use crate::artifact::{ArtifactKey, ArtifactStore};

/// Below this size, tool output passes through untouched.
const INLINE_THRESHOLD: usize = 2 * 1024;

/// At or above this size, tool output is externalized regardless of kind.
const EXTERNALIZE_THRESHOLD: usize = 8 * 1024;

/// Log payloads with more lines than this get their middle collapsed.
const LOG_COLLAPSE_LINES: usize = 120;
const LOG_HEAD_LINES: usize = 50;
const LOG_TAIL_LINES: usize = 50;

/// JSON arrays longer than this are reduced to a head+tail window.
const JSON_ARRAY_WINDOW: usize = 20;
const JSON_ARRAY_HEAD: usize = 10;
const JSON_ARRAY_TAIL: usize = 10;

static LOG_LEVEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(TRACE|DEBUG|INFO|WARN|WARNING|ERROR|FATAL)\b").unwrap());
static TIMESTAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}|\d{2}:\d{2}:\d{2}").unwrap());
static TRACE_FRAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s+at\s+\S+").unwrap());

/// Heuristic classification of tool-output content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// A parseable JSON object or array
    Json,
    /// Multi-line log output with level markers and timestamps
    Log,
    /// A stack trace or error dump
    ErrorTrace,
    /// Binary-ish content such as a data URI or a base64 blob
    Binary,
    /// Anything else
    Text,
}

impl ContentKind {
    /// Short hint string embedded in externalization pointers
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Log => "log",
            Self::ErrorTrace => "error-trace",
            Self::Binary => "binary",
            Self::Text => "text",
        }
    }
}

/// Classify tool-output content.
///
/// Pure and infallible: content that merely looks like JSON but does not
/// parse is plain text, never an error.
pub fn classify(content: &str) -> ContentKind {
    let trimmed = content.trim();

    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<Value>(trimmed).is_ok()
    {
        return ContentKind::Json;
    }

    if trimmed.starts_with("data:") && trimmed.contains(";base64,") {
        return ContentKind::Binary;
    }
    if trimmed.len() > 512
        && !trimmed.contains(char::is_whitespace)
        && trimmed
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
    {
        return ContentKind::Binary;
    }

    if trimmed.contains("Traceback (most recent call last)")
        || trimmed.contains("stack backtrace:")
        || trimmed.contains("panicked at")
        || TRACE_FRAME_RE.find_iter(trimmed).take(3).count() >= 3
    {
        return ContentKind::ErrorTrace;
    }

    if trimmed.lines().count() >= 2
        && LOG_LEVEL_RE.is_match(trimmed)
        && TIMESTAMP_RE.is_match(trimmed)
    {
        return ContentKind::Log;
    }

    ContentKind::Text
}

/// Compacts tool-result messages, externalizing the largest payloads
pub struct ToolOutputCompactor {
    store: Arc<dyn ArtifactStore>,
}

impl ToolOutputCompactor {
    /// Create a compactor that externalizes into the given store
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Compact every tool message in the sequence.
    ///
    /// Non-tool messages pass through unchanged, as do tool messages below
    /// the inline threshold. Tool-call identifiers are preserved through
    /// every transformation. This never fails the pipeline: any compression
    /// or storage error degrades to leaving the content inline.
    pub async fn compact(&self, messages: Vec<Message>) -> Vec<Message> {
        let mut result = Vec::with_capacity(messages.len());
        for msg in messages {
            if msg.role != Role::Tool || msg.content.len() < INLINE_THRESHOLD {
                result.push(msg);
                continue;
            }
            result.push(self.compact_tool_message(msg).await);
        }
        result
    }

    async fn compact_tool_message(&self, msg: Message) -> Message {
        let kind = classify(&msg.content);

        if msg.content.len() >= EXTERNALIZE_THRESHOLD {
            let key = ArtifactKey::for_content(&msg.content);
            match self.store.store(&key, &msg.content).await {
                Ok(()) => {
                    debug!(
                        "Externalized {} bytes of {} tool output as {}",
                        msg.content.len(),
                        kind.hint(),
                        key
                    );
                    let pointer = format!(
                        "[EXTERNALIZED {}] artifact {} ({} bytes)",
                        kind.hint(),
                        key,
                        msg.content.len()
                    );
                    return msg.with_content(pointer);
                }
                Err(e) => {
                    // Degrade to inline content rather than failing the run.
                    warn!("Artifact store rejected externalization: {}", e);
                }
            }
        }

        match kind {
            ContentKind::Json => {
                let compacted = compact_json(&msg.content);
                msg.with_content(compacted)
            }
            ContentKind::Log => {
                let collapsed = collapse_log(&msg.content);
                msg.with_content(collapsed)
            }
            _ => msg,
        }
    }
}

/// Inline JSON compaction: drop null and empty-string fields, reduce long
/// arrays to a head+tail window with an omitted-count marker.
///
/// Unparsable input is returned unchanged.
fn compact_json(content: &str) -> String {
    match serde_json::from_str::<Value>(content.trim()) {
        Ok(value) => {
            let pruned = prune_value(value);
            serde_json::to_string(&pruned).unwrap_or_else(|_| content.to_string())
        }
        Err(_) => content.to_string(),
    }
}

fn prune_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let pruned = map
                .into_iter()
                .filter(|(_, v)| !matches!(v, Value::Null) && v.as_str() != Some(""))
                .map(|(k, v)| (k, prune_value(v)))
                .collect();
            Value::Object(pruned)
        }
        Value::Array(items) if items.len() > JSON_ARRAY_WINDOW => {
            let omitted = items.len() - JSON_ARRAY_HEAD - JSON_ARRAY_TAIL;
            let tail_start = items.len() - JSON_ARRAY_TAIL;
            let mut window: Vec<Value> = Vec::with_capacity(JSON_ARRAY_WINDOW + 1);
            for (i, item) in items.into_iter().enumerate() {
                if i < JSON_ARRAY_HEAD {
                    window.push(prune_value(item));
                } else if i == JSON_ARRAY_HEAD {
                    window.push(Value::String(format!("... {omitted} items omitted ...")));
                } else if i >= tail_start {
                    window.push(prune_value(item));
                }
            }
            Value::Array(window)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(prune_value).collect()),
        other => other,
    }
}

/// Collapse the middle of a long log, preserving head and tail lines.
fn collapse_log(content: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= LOG_COLLAPSE_LINES {
        return content.to_string();
    }
    let collapsed = lines.len() - LOG_HEAD_LINES - LOG_TAIL_LINES;
    let mut out: Vec<&str> = Vec::with_capacity(LOG_HEAD_LINES + LOG_TAIL_LINES + 1);
    out.extend(&lines[..LOG_HEAD_LINES]);
    let marker = format!("... [{collapsed} lines collapsed] ...");
    let mut text = out.join("\n");
    text.push('\n');
    text.push_str(&marker);
    text.push('\n');
    text.push_str(&lines[lines.len() - LOG_TAIL_LINES..].join("\n"));
    text
}
