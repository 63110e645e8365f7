//! Token counting against model-family tokenizer profiles

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tiktoken_rs::CoreBPE;

use headroom_core::{Conversation, Message};

use crate::error::ContextError;

/// Fixed overhead added per message for role framing and structure.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Fixed overhead added once per conversation.
pub(crate) const CONVERSATION_OVERHEAD_TOKENS: usize = 10;

/// Width of content previews in token breakdowns.
const PREVIEW_WIDTH: usize = 50;

/// Token-counting scheme approximating a model family's tokenizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenizerProfile {
    /// o200k_base, used by the gpt-4o family
    O200kBase,
    /// cl100k_base, used by gpt-4 / gpt-3.5 era models (default fallback)
    Cl100kBase,
    /// p50k_base, used by code models and late davinci completions
    P50kBase,
    /// r50k_base, used by first-generation completion models
    R50kBase,
}

impl TokenizerProfile {
    /// Resolve an explicit tokenizer identifier.
    ///
    /// Unknown identifiers fail here, at construction time, never at
    /// counting time.
    pub fn from_id(id: &str) -> Result<Self, ContextError> {
        match id {
            "o200k_base" => Ok(Self::O200kBase),
            "cl100k_base" => Ok(Self::Cl100kBase),
            "p50k_base" => Ok(Self::P50kBase),
            "r50k_base" => Ok(Self::R50kBase),
            _ => Err(ContextError::UnknownTokenizer(id.to_string())),
        }
    }

    /// Pick the profile for a model by family-prefix matching.
    ///
    /// All members of a model family map to the same profile; models we do
    /// not recognize fall back to [`TokenizerProfile::Cl100kBase`] rather
    /// than failing.
    pub fn for_model(model: &str) -> Self {
        if model.starts_with("gpt-4o") || model.starts_with("chatgpt-4o") || model.starts_with("o1")
        {
            Self::O200kBase
        } else if model.starts_with("gpt-4")
            || model.starts_with("gpt-3.5")
            || model.starts_with("text-embedding")
        {
            Self::Cl100kBase
        } else if model.starts_with("code-")
            || model.starts_with("text-davinci-002")
            || model.starts_with("text-davinci-003")
        {
            Self::P50kBase
        } else if model.starts_with("davinci")
            || model.starts_with("curie")
            || model.starts_with("babbage")
            || model.starts_with("ada")
        {
            Self::R50kBase
        } else {
            Self::Cl100kBase
        }
    }

    /// The canonical identifier for this profile
    pub fn id(&self) -> &'static str {
        match self {
            Self::O200kBase => "o200k_base",
            Self::Cl100kBase => "cl100k_base",
            Self::P50kBase => "p50k_base",
            Self::R50kBase => "r50k_base",
        }
    }

    fn build_encoder(&self) -> Result<CoreBPE, ContextError> {
        let result = match self {
            Self::O200kBase => tiktoken_rs::o200k_base(),
            Self::Cl100kBase => tiktoken_rs::cl100k_base(),
            Self::P50kBase => tiktoken_rs::p50k_base(),
            Self::R50kBase => tiktoken_rs::r50k_base(),
        };
        result.map_err(|e| ContextError::TokenizerConstruction(format!("{}: {}", self.id(), e)))
    }
}

// Encoder construction is expensive (it parses the full BPE vocabulary), so
// constructed encoders are shared process-wide behind a read-through cache.
static ENCODER_CACHE: Lazy<Mutex<HashMap<TokenizerProfile, Arc<CoreBPE>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn encoder_for(profile: TokenizerProfile) -> Result<Arc<CoreBPE>, ContextError> {
    let mut cache = ENCODER_CACHE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(encoder) = cache.get(&profile) {
        return Ok(Arc::clone(encoder));
    }
    let encoder = Arc::new(profile.build_encoder()?);
    cache.insert(profile, Arc::clone(&encoder));
    Ok(encoder)
}

/// Drop all cached encoders. Intended for tests that need to exercise
/// construction paths.
pub fn clear_encoder_cache() {
    ENCODER_CACHE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clear();
}

/// Per-message entry in a [`TokenBreakdown`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTokens {
    /// Role of the message, as a string
    pub role: String,
    /// Content preview, truncated to 50 characters
    pub preview: String,
    /// Token count for this message
    pub tokens: usize,
}

/// Diagnostic view of where a conversation's tokens go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBreakdown {
    /// One entry per message, in conversation order
    pub per_message: Vec<MessageTokens>,
    /// Conversation-level overhead tokens
    pub overhead: usize,
    /// Total tokens, equal to the sum of per-message counts plus overhead
    pub total: usize,
}

/// Converts messages and conversations into token counts.
///
/// Counting must be a pure, deterministic function of content: identical
/// input always yields an identical count. The pipeline's idempotence
/// contract depends on this.
pub trait TokenCounter: Send + Sync {
    /// Count the tokens in a raw piece of text
    fn count_text(&self, text: &str) -> usize;

    /// Count one message: role framing, content, tool-call arguments, and
    /// the fixed per-message overhead
    fn count_message(&self, message: &Message) -> usize {
        let mut tokens = self.count_text(message.role.as_str());
        tokens += self.count_text(&message.content);

        // Tool-call requests cost tokens proportional to their serialized
        // arguments.
        for call in &message.tool_calls {
            tokens += self.count_text(&call.name);
            tokens += self.count_text(&call.arguments);
        }
        if let Some(id) = &message.tool_call_id {
            tokens += self.count_text(id);
        }

        tokens + MESSAGE_OVERHEAD_TOKENS
    }

    /// Sum of per-message counts, without the conversation-level overhead
    fn count_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|msg| self.count_message(msg)).sum()
    }

    /// Count a whole conversation; an empty conversation costs exactly the
    /// conversation-level overhead
    fn count_conversation(&self, conversation: &Conversation) -> usize {
        self.count_messages(conversation.messages()) + CONVERSATION_OVERHEAD_TOKENS
    }

    /// Diagnostic per-message breakdown with truncated content previews
    fn breakdown(&self, conversation: &Conversation) -> TokenBreakdown {
        let per_message: Vec<MessageTokens> = conversation
            .iter()
            .map(|msg| MessageTokens {
                role: msg.role.as_str().to_string(),
                preview: truncate_preview(&msg.content),
                tokens: self.count_message(msg),
            })
            .collect();
        let total = per_message.iter().map(|m| m.tokens).sum::<usize>()
            + CONVERSATION_OVERHEAD_TOKENS;
        TokenBreakdown {
            per_message,
            overhead: CONVERSATION_OVERHEAD_TOKENS,
            total,
        }
    }
}

fn truncate_preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_WIDTH {
        content.to_string()
    } else {
        content.chars().take(PREVIEW_WIDTH).collect()
    }
}

/// Token counter backed by a tiktoken BPE encoder
pub struct TiktokenCounter {
    encoder: Arc<CoreBPE>,
    profile: TokenizerProfile,
}

impl TiktokenCounter {
    /// Build a counter for a model, matching by family prefix.
    ///
    /// Unknown models fall back to the default profile; the only failure
    /// mode is encoder construction itself.
    pub fn for_model(model: &str) -> Result<Self, ContextError> {
        let profile = TokenizerProfile::for_model(model);
        Ok(Self {
            encoder: encoder_for(profile)?,
            profile,
        })
    }

    /// Build a counter for an explicit tokenizer identifier.
    ///
    /// Fails with [`ContextError::UnknownTokenizer`] if the id is not
    /// recognized.
    pub fn for_tokenizer(id: &str) -> Result<Self, ContextError> {
        let profile = TokenizerProfile::from_id(id)?;
        Ok(Self {
            encoder: encoder_for(profile)?,
            profile,
        })
    }

    /// The profile this counter was constructed with
    pub fn profile(&self) -> TokenizerProfile {
        self.profile
    }
}

impl TokenCounter for TiktokenCounter {
    fn count_text(&self, text: &str) -> usize {
        self.encoder.encode_ordinary(text).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headroom_core::{Message, ToolCall};

    /// Simple approximation: ~1 token per 4 chars.
    struct MockCounter;

    impl TokenCounter for MockCounter {
        fn count_text(&self, text: &str) -> usize {
            text.len() / 4
        }
    }

    #[test]
    fn empty_conversation_costs_only_the_overhead() {
        let counter = MockCounter;
        assert_eq!(
            counter.count_conversation(&Conversation::new()),
            CONVERSATION_OVERHEAD_TOKENS
        );
    }

    #[test]
    fn counting_is_deterministic() {
        let counter = MockCounter;
        let conv: Conversation = vec![
            Message::system("You are a helpful assistant."),
            Message::user("Hello!"),
            Message::assistant("Hi there!"),
        ]
        .into();

        let first = counter.count_conversation(&conv);
        for _ in 0..5 {
            assert_eq!(counter.count_conversation(&conv), first);
        }
    }

    #[test]
    fn tool_calls_add_tokens() {
        let counter = MockCounter;
        let plain = Message::assistant("Searching now");
        let with_tools = Message::assistant_with_tools(
            "Searching now",
            vec![ToolCall {
                id: "call_1".into(),
                name: "search".into(),
                arguments: r#"{"query":"token budgets in practice"}"#.into(),
            }],
        );
        assert!(counter.count_message(&with_tools) > counter.count_message(&plain));
    }

    #[test]
    fn breakdown_previews_are_truncated() {
        let counter = MockCounter;
        let long = "x".repeat(200);
        let conv: Conversation = vec![Message::user(long)].into();
        let breakdown = counter.breakdown(&conv);

        assert_eq!(breakdown.per_message.len(), 1);
        assert_eq!(breakdown.per_message[0].role, "user");
        assert_eq!(breakdown.per_message[0].preview.chars().count(), 50);
        assert_eq!(
            breakdown.total,
            breakdown.per_message[0].tokens + breakdown.overhead
        );
    }

    #[test]
    fn model_family_prefix_matching() {
        assert_eq!(
            TokenizerProfile::for_model("gpt-4o-2024-05-13"),
            TokenizerProfile::O200kBase
        );
        assert_eq!(
            TokenizerProfile::for_model("gpt-4-turbo"),
            TokenizerProfile::Cl100kBase
        );
        assert_eq!(
            TokenizerProfile::for_model("text-davinci-003"),
            TokenizerProfile::P50kBase
        );
        // Unknown models fall back instead of failing
        assert_eq!(
            TokenizerProfile::for_model("some-future-model"),
            TokenizerProfile::Cl100kBase
        );
    }

    #[test]
    fn encoder_cache_survives_clearing() {
        let a = TiktokenCounter::for_tokenizer("cl100k_base").unwrap();
        clear_encoder_cache();
        let b = TiktokenCounter::for_tokenizer("cl100k_base").unwrap();
        assert_eq!(a.profile(), b.profile());
        assert_eq!(a.count_text("hello world"), b.count_text("hello world"));
    }

    #[test]
    fn explicit_tokenizer_id_is_validated_at_construction() {
        assert!(TokenizerProfile::from_id("cl100k_base").is_ok());
        assert!(matches!(
            TokenizerProfile::from_id("not-a-tokenizer"),
            Err(ContextError::UnknownTokenizer(_))
        ));
    }
}
