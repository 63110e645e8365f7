//! Deterministic history compression
//!
//! An ordered set of pure text rules applied to assistant messages when a
//! conversation is over its cap. The rules are data, not a class hierarchy:
//! each is a named `fn(Vec<Message>) -> Vec<Message>` so it can be unit
//! tested in isolation and reordered without touching the engine.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

use headroom_core::{Message, Role};

use crate::artifact::ArtifactStore;
use crate::compactor::ToolOutputCompactor;
use crate::counter::{TokenCounter, CONVERSATION_OVERHEAD_TOKENS};

/// Assistant responses estimated above this many tokens get truncated.
const VERBOSE_TOKEN_LIMIT: usize = 400;

/// Rough chars-per-token estimate used by the verbosity rule.
const ESTIMATED_CHARS_PER_TOKEN: usize = 4;

static FILLER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(well|you know|basically|like),\s+").unwrap());
static REDUNDANT_PHRASE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(as i (mentioned|said) (before|earlier),\s*|like i said,\s*|as previously (discussed|mentioned),\s*|as noted (above|earlier),\s*)",
    )
    .unwrap()
});
static SENTENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^.!?]+[.!?]+\s*|[^.!?]+$").unwrap());

/// A named, pure compression rule
pub struct CompressionRule {
    /// Name used in logs
    pub name: &'static str,
    /// The transformation itself
    pub apply: fn(Vec<Message>) -> Vec<Message>,
}

/// The subjective rule set, in application order.
///
/// Every rule touches assistant content only; user and tool messages pass
/// through each rule byte-identical.
pub const SUBJECTIVE_RULES: &[CompressionRule] = &[
    CompressionRule {
        name: "remove_filler_words",
        apply: remove_filler_words,
    },
    CompressionRule {
        name: "compress_repetitive_content",
        apply: compress_repetitive_content,
    },
    CompressionRule {
        name: "truncate_verbose_responses",
        apply: truncate_verbose_responses,
    },
    CompressionRule {
        name: "consolidate_examples",
        apply: consolidate_examples,
    },
    CompressionRule {
        name: "remove_redundant_phrases",
        apply: remove_redundant_phrases,
    },
];

fn rewrite_assistant(messages: Vec<Message>, rewrite: impl Fn(&str) -> String) -> Vec<Message> {
    messages
        .into_iter()
        .map(|msg| {
            if msg.role == Role::Assistant {
                let rewritten = rewrite(&msg.content);
                if rewritten != msg.content {
                    return msg.with_content(rewritten);
                }
                msg
            } else {
                msg
            }
        })
        .collect()
}

fn looks_like_json(content: &str) -> bool {
    let trimmed = content.trim_start();
    trimmed.starts_with('{') || trimmed.starts_with('[')
}

/// Strip conversational filler ("well,", "you know,", "basically,",
/// "like,") from transcript-like prose.
///
/// Fenced code blocks and JSON-looking content are never touched.
pub fn remove_filler_words(messages: Vec<Message>) -> Vec<Message> {
    rewrite_assistant(messages, |content| {
        if looks_like_json(content) {
            return content.to_string();
        }
        // Segments at even indices are prose, odd indices are fenced code.
        content
            .split("```")
            .enumerate()
            .map(|(i, segment)| {
                if i % 2 == 0 {
                    FILLER_RE.replace_all(segment, "").into_owned()
                } else {
                    segment.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("```")
    })
}

/// Collapse runs of consecutive identical sentences into `sentence ×N`.
///
/// Single occurrences are untouched.
pub fn compress_repetitive_content(messages: Vec<Message>) -> Vec<Message> {
    rewrite_assistant(messages, |content| {
        let sentences: Vec<&str> = SENTENCE_RE
            .find_iter(content)
            .map(|m| m.as_str())
            .collect();
        if sentences.len() < 2 {
            return content.to_string();
        }

        let mut out: Vec<String> = Vec::with_capacity(sentences.len());
        let mut run_start = 0;
        let mut collapsed_any = false;
        for i in 1..=sentences.len() {
            let run_ended =
                i == sentences.len() || sentences[i].trim() != sentences[run_start].trim();
            if !run_ended {
                continue;
            }
            let run_len = i - run_start;
            if run_len > 1 {
                out.push(format!("{} ×{run_len} ", sentences[run_start].trim()));
                collapsed_any = true;
            } else {
                out.push(sentences[run_start].to_string());
            }
            run_start = i;
        }

        if collapsed_any {
            out.concat().trim_end().to_string()
        } else {
            content.to_string()
        }
    })
}

/// Shorten assistant responses estimated above ~400 tokens' worth of text.
pub fn truncate_verbose_responses(messages: Vec<Message>) -> Vec<Message> {
    let char_limit = VERBOSE_TOKEN_LIMIT * ESTIMATED_CHARS_PER_TOKEN;
    rewrite_assistant(messages, |content| {
        if content.chars().count() <= char_limit {
            return content.to_string();
        }
        let mut kept: String = content.chars().take(char_limit).collect();
        // Cut back to a word boundary so the truncation reads cleanly.
        if let Some(boundary) = kept.rfind(char::is_whitespace) {
            kept.truncate(boundary);
        }
        kept.push_str("… [response shortened]");
        kept
    })
}

fn is_single_example(msg: &Message) -> bool {
    if msg.role != Role::Assistant || !msg.tool_calls.is_empty() {
        return false;
    }
    let lowered = msg.content.trim_start().to_lowercase();
    lowered.starts_with("example")
        || lowered.starts_with("for example")
        || lowered.starts_with("e.g.")
        || lowered.starts_with("another example")
}

/// Merge runs of consecutive single-example assistant messages into one.
///
/// This is the only rule allowed to change the message count, and it never
/// merges non-example messages.
pub fn consolidate_examples(messages: Vec<Message>) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    let mut run: Vec<Message> = Vec::new();

    let flush = |out: &mut Vec<Message>, run: &mut Vec<Message>| {
        if run.len() > 1 {
            let combined = run
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            out.push(Message::assistant(combined));
        } else {
            out.append(run);
        }
        run.clear();
    };

    for msg in messages {
        if is_single_example(&msg) {
            run.push(msg);
        } else {
            flush(&mut out, &mut run);
            out.push(msg);
        }
    }
    flush(&mut out, &mut run);
    out
}

/// Strip canned meta-commentary ("as I mentioned before,", "like I said,")
/// while preserving the substantive remainder of the sentence.
pub fn remove_redundant_phrases(messages: Vec<Message>) -> Vec<Message> {
    rewrite_assistant(messages, |content| {
        REDUNDANT_PHRASE_RE.replace_all(content, "").into_owned()
    })
}

/// Applies tool-output compaction and the subjective rule set.
pub struct DeterministicCompressor {
    compactor: ToolOutputCompactor,
}

impl DeterministicCompressor {
    /// Create a compressor whose tool-compaction step externalizes into the
    /// given store
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            compactor: ToolOutputCompactor::new(store),
        }
    }

    /// Compress a message sequence down toward `cap` tokens.
    ///
    /// Tool-output compaction always runs first, independent of the cap:
    /// oversized tool payloads must never reach the model. The subjective
    /// rules run only when `enable_subjective_edits` is set and the
    /// conversation is still over the cap after compaction, stopping as
    /// soon as the cap is satisfied.
    pub async fn compress(
        &self,
        messages: Vec<Message>,
        counter: &dyn TokenCounter,
        cap: usize,
        enable_subjective_edits: bool,
    ) -> Vec<Message> {
        if messages.is_empty() {
            return messages;
        }

        let mut messages = self.compactor.compact(messages).await;

        let total = |msgs: &[Message]| counter.count_messages(msgs) + CONVERSATION_OVERHEAD_TOKENS;

        if !enable_subjective_edits || total(&messages) <= cap {
            return messages;
        }

        for rule in SUBJECTIVE_RULES {
            let before = total(&messages);
            messages = (rule.apply)(messages);
            let after = total(&messages);
            if after != before {
                debug!("Rule {} saved {} tokens", rule.name, before - after);
            }
            if after <= cap {
                break;
            }
        }
        messages
    }
}
