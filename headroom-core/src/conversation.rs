//! Ordered conversations and the rolling-digest convention

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Marker prefix identifying a rolling digest of older history.
///
/// A message whose content starts with this marker is a previously generated
/// condensation of earlier turns. It is pinned against trimming but remains
/// subject to digest-specific compression.
pub const HISTORY_SUMMARY_MARKER: &str = "[HISTORY_SUMMARY]";

/// An ordered sequence of messages
///
/// Order is chronological and semantically significant: the pipeline never
/// reorders messages, only removes, rewrites, or replaces them in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Create an empty conversation
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the conversation has no messages
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The messages, in chronological order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Consume the conversation, yielding its messages
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Iterate over the messages in order
    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    /// Whether the first message is a pinned rolling digest
    pub fn starts_with_digest(&self) -> bool {
        self.messages.first().is_some_and(is_digest)
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

impl FromIterator<Message> for Conversation {
    fn from_iter<T: IntoIterator<Item = Message>>(iter: T) -> Self {
        Self {
            messages: iter.into_iter().collect(),
        }
    }
}

/// Whether a message is a rolling digest of older history
pub fn is_digest(message: &Message) -> bool {
    message.content.starts_with(HISTORY_SUMMARY_MARKER)
}
