//! Conversation identity

use std::fmt;

use serde::{Deserialize, Serialize};

use super::UserId;

/// Joins the two participant ids of a conversation.
///
/// `UserId::parse` refuses ids containing it, so a joined id always splits
/// back into exactly the pair that produced it.
pub const SEPARATOR: char = '#';

/// Canonical identifier of the conversation between two users.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Join an already ordered pair. Use `chat::key::derive` for arbitrary pairs.
    pub(crate) fn from_ordered(low: &UserId, high: &UserId) -> Self {
        Self(format!("{}{}{}", low, SEPARATOR, high))
    }

    /// The two participant ids, lower one first.
    pub fn participants(&self) -> Option<(&str, &str)> {
        self.0.split_once(SEPARATOR)
    }

    /// Collection holding this conversation's message documents.
    pub fn messages_collection(&self) -> String {
        format!("chats/{}/messages", self.0)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
