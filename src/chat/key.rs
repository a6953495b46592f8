//! Conversation identity for a pair of users

use crate::models::{ConversationId, UserId};

/// Canonical id of the conversation between `a` and `b`.
///
/// Commutative: the lower id (byte-wise) always comes first.
pub fn derive(a: &UserId, b: &UserId) -> ConversationId {
    if a.as_str() <= b.as_str() {
        ConversationId::from_ordered(a, b)
    } else {
        ConversationId::from_ordered(b, a)
    }
}
