//! Model-assisted digest compression
//!
//! A rolling digest grows every time older history is condensed into it.
//! When a digest message itself exceeds its token target, the only thing
//! that can shrink it further is the model: this stage asks the compression
//! oracle for a shorter rendition and swaps it in place.

use tracing::{debug, warn};

use headroom_core::{
    conversation::is_digest, CompressionOracle, Conversation, Message, HISTORY_SUMMARY_MARKER,
};

use crate::counter::TokenCounter;

const SQUEEZE_SYSTEM_PROMPT: &str =
    "You condense conversation digests. Rewrite the digest you are given so it is \
     substantially shorter while keeping every decision, file path, and open item. \
     Reply with the condensed digest only.";

/// Re-summarize oversized rolling-digest messages via the oracle.
///
/// Only messages prefixed with `[HISTORY_SUMMARY]` are candidates; each one
/// over `cap_tokens` costs exactly one oracle call. If no digest is over the
/// cap the oracle is never called. An oracle failure leaves that digest
/// unmodified and the run continues. Message order and count are preserved.
pub async fn squeeze_digest(
    messages: Vec<Message>,
    counter: &dyn TokenCounter,
    oracle: &dyn CompressionOracle,
    cap_tokens: usize,
) -> Vec<Message> {
    let mut result = Vec::with_capacity(messages.len());
    for msg in messages {
        if !is_digest(&msg) || counter.count_message(&msg) <= cap_tokens {
            result.push(msg);
            continue;
        }

        let body = msg
            .content
            .strip_prefix(HISTORY_SUMMARY_MARKER)
            .unwrap_or(&msg.content)
            .trim_start();
        let prompt: Conversation = vec![
            Message::system(SQUEEZE_SYSTEM_PROMPT),
            Message::user(format!(
                "Condense this digest to roughly {cap_tokens} tokens:\n\n{body}"
            )),
        ]
        .into();

        match oracle.complete(&prompt).await {
            Ok(squeezed) => {
                debug!(
                    "Squeezed digest from {} to {} tokens",
                    counter.count_message(&msg),
                    counter.count_text(&squeezed)
                );
                // Re-apply the marker so the message stays pinned.
                result.push(
                    msg.with_content(format!("{HISTORY_SUMMARY_MARKER} {}", squeezed.trim())),
                );
            }
            Err(e) => {
                warn!("Oracle failed to squeeze digest, leaving it unmodified: {}", e);
                result.push(msg);
            }
        }
    }
    result
}
