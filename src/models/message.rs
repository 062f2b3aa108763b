use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// Lifecycle of an assistant reply produced by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Queued,
    Generating,
    Complete,
    Error,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Generating => "generating",
            MessageStatus::Complete => "complete",
            MessageStatus::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(MessageStatus::Queued),
            "generating" => Some(MessageStatus::Generating),
            "complete" => Some(MessageStatus::Complete),
            "error" => Some(MessageStatus::Error),
            _ => None,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, MessageStatus::Complete | MessageStatus::Error)
    }

    /// `queued -> generating -> {complete|error}`; settled states are final.
    pub fn can_advance_to(&self, next: MessageStatus) -> bool {
        match self {
            MessageStatus::Queued => next == MessageStatus::Generating || next.is_settled(),
            MessageStatus::Generating => next.is_settled(),
            MessageStatus::Complete | MessageStatus::Error => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Absent on messages from older history; treated as complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            thinking: None,
            created_at: Utc::now(),
            status: Some(MessageStatus::Complete),
        }
    }

    /// Empty assistant reply waiting for its turn in the generation queue.
    pub fn assistant_placeholder() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: String::new(),
            thinking: None,
            created_at: Utc::now(),
            status: Some(MessageStatus::Queued),
        }
    }

    pub fn effective_status(&self) -> MessageStatus {
        self.status.unwrap_or(MessageStatus::Complete)
    }

    /// Move the status forward. Returns `false` and leaves the message
    /// untouched when the transition would go backwards.
    pub fn advance(&mut self, next: MessageStatus) -> bool {
        if !self.effective_status().can_advance_to(next) {
            tracing::warn!(
                "Refusing status transition {} -> {} for message {}",
                self.effective_status().as_str(),
                next.as_str(),
                self.id
            );
            return false;
        }
        self.status = Some(next);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_only_moves_forward() {
        let mut msg = Message::assistant_placeholder();
        assert!(msg.advance(MessageStatus::Generating));
        assert!(!msg.advance(MessageStatus::Queued));
        assert!(msg.advance(MessageStatus::Complete));
        assert!(!msg.advance(MessageStatus::Error));
        assert_eq!(msg.status, Some(MessageStatus::Complete));
    }

    #[test]
    fn test_queued_can_fail_without_generating() {
        let mut msg = Message::assistant_placeholder();
        assert!(msg.advance(MessageStatus::Error));
        assert_eq!(msg.effective_status(), MessageStatus::Error);
    }

    #[test]
    fn test_missing_status_reads_as_complete() {
        let json = r#"{"id":"m1","role":"Assistant","content":"hi","created_at":"2024-05-01T10:00:00Z"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.status, None);
        assert_eq!(msg.effective_status(), MessageStatus::Complete);
    }

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [Role::User, Role::Assistant, Role::System] {
            assert_eq!(Role::from_str(role.as_str()), Some(role));
        }
        assert_eq!(Role::from_str("tool"), None);
    }
}
