//! Final hard-budget trimming
//!
//! The last line of defense: drop the oldest droppable messages until the
//! conversation fits the effective budget. A leading `[HISTORY_SUMMARY]`
//! digest is pinned and survives trimming as long as anything else can go.

use tracing::debug;

use headroom_core::Conversation;

use crate::counter::TokenCounter;
use crate::error::ContextError;

/// Snapshot of token usage against a budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextUsage {
    /// Tokens currently used by the conversation
    pub current_tokens: usize,
    /// The nominal budget
    pub budget: usize,
    /// Whether the conversation fits the budget
    pub within_budget: bool,
    /// `round(current / budget * 100)`
    pub utilization_percent: u32,
}

/// Result of a trim operation
#[derive(Debug, Clone, PartialEq)]
pub struct TrimOutcome {
    /// The possibly-trimmed conversation
    pub conversation: Conversation,
    /// Whether any message was removed
    pub was_trimmed: bool,
    /// Number of removed messages
    pub removed_count: usize,
    /// Usage after trimming, against the nominal budget
    pub usage: ContextUsage,
}

fn validate(
    conversation: &Conversation,
    budget: usize,
    headroom_percent: f32,
) -> Result<(), ContextError> {
    if budget == 0 {
        return Err(ContextError::Validation(
            "budget must be positive".to_string(),
        ));
    }
    if !(0.0..1.0).contains(&headroom_percent) {
        return Err(ContextError::Validation(format!(
            "headroom percent must be in [0, 1), got {headroom_percent}"
        )));
    }
    if conversation.is_empty() {
        return Err(ContextError::Validation(
            "cannot trim an empty conversation".to_string(),
        ));
    }
    Ok(())
}

fn effective_budget(budget: usize, headroom_percent: f32) -> usize {
    (budget as f32 * (1.0 - headroom_percent)) as usize
}

/// Drop the oldest non-pinned messages until the conversation fits
/// `budget * (1 - headroom_percent)`.
///
/// At least one message is always retained, even if it alone exceeds the
/// budget. Validation failures (zero budget, headroom outside `[0, 1)`,
/// empty conversation) are hard errors and perform no trimming.
pub fn trim_to_budget(
    conversation: Conversation,
    counter: &dyn TokenCounter,
    budget: usize,
    headroom_percent: f32,
) -> Result<TrimOutcome, ContextError> {
    validate(&conversation, budget, headroom_percent)?;

    let target = effective_budget(budget, headroom_percent);
    let current = counter.count_conversation(&conversation);

    if current <= target {
        let usage = usage_info(&conversation, counter, budget);
        return Ok(TrimOutcome {
            conversation,
            was_trimmed: false,
            removed_count: 0,
            usage,
        });
    }

    let pinned_digest = conversation.starts_with_digest();
    let mut messages = conversation.into_messages();
    let mut removed = 0;

    // The removal cursor skips a pinned leading digest. Trimming may go all
    // the way down to one message: the digest when one is pinned, otherwise
    // the newest message.
    let drop_index = usize::from(pinned_digest);
    while messages.len() > drop_index.max(1) {
        let tokens =
            counter.count_messages(&messages) + crate::counter::CONVERSATION_OVERHEAD_TOKENS;
        if tokens <= target {
            break;
        }
        messages.remove(drop_index);
        removed += 1;
    }

    let conversation: Conversation = messages.into();
    let usage = usage_info(&conversation, counter, budget);
    debug!(
        "Trimmed {} messages, now {} of {} tokens",
        removed, usage.current_tokens, budget
    );
    Ok(TrimOutcome {
        conversation,
        was_trimmed: removed > 0,
        removed_count: removed,
        usage,
    })
}

/// Whether the conversation fits the effective budget
pub fn fits_in_budget(
    conversation: &Conversation,
    counter: &dyn TokenCounter,
    budget: usize,
    headroom_percent: f32,
) -> bool {
    counter.count_conversation(conversation) <= effective_budget(budget, headroom_percent)
}

/// Current usage against the nominal budget
pub fn usage_info(
    conversation: &Conversation,
    counter: &dyn TokenCounter,
    budget: usize,
) -> ContextUsage {
    let current_tokens = counter.count_conversation(conversation);
    ContextUsage {
        current_tokens,
        budget,
        within_budget: current_tokens <= budget,
        utilization_percent: ((current_tokens as f64 / budget as f64) * 100.0).round() as u32,
    }
}
