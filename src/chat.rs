use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Normalize an unordered participant pair into storage order.
/// The smaller id always lands in `participant_a`, so the pair maps to
/// exactly one row regardless of who initiated the conversation.
pub fn canonical_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// A two-party thread identified by its unordered participant pair.
/// `last_active_at` moves forward whenever a message is appended and
/// governs inbox ordering. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(user_a: &str, user_b: &str) -> Self {
        let (participant_a, participant_b) = canonical_pair(user_a, user_b);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            participant_a,
            participant_b,
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.participant_a == user_id || self.participant_b == user_id
    }

    /// The other side of the pair, from `user_id`'s point of view.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        if self.participant_a == user_id {
            Some(&self.participant_b)
        } else if self.participant_b == user_id {
            Some(&self.participant_a)
        } else {
            None
        }
    }
}

/// An immutable message. `id` and `created_at` are assigned on this side of
/// the store boundary but the stored row is what counts for ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        conversation_id: impl Into<String>,
        sender_id: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}

/// Reject empty and whitespace-only bodies before any store interaction.
/// Returns the body unmodified (not trimmed): interior whitespace and
/// leading/trailing spaces the user typed are theirs to keep.
pub fn validate_body(body: &str) -> Result<&str> {
    if body.trim().is_empty() {
        return Err(EngineError::ValidationFailed(
            "message body is empty".to_string(),
        ));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_pair_is_order_insensitive() {
        assert_eq!(canonical_pair("u1", "u2"), canonical_pair("u2", "u1"));
    }

    #[test]
    fn peer_of_returns_other_participant() {
        let conv = Conversation::new("alice", "bob");
        assert_eq!(conv.peer_of("alice"), Some("bob"));
        assert_eq!(conv.peer_of("bob"), Some("alice"));
        assert_eq!(conv.peer_of("carol"), None);
    }

    #[test]
    fn empty_body_is_rejected() {
        assert!(matches!(
            validate_body(""),
            Err(EngineError::ValidationFailed(_))
        ));
        assert!(matches!(
            validate_body("   \n\t"),
            Err(EngineError::ValidationFailed(_))
        ));
        assert_eq!(validate_body(" hi ").unwrap(), " hi ");
    }
}
