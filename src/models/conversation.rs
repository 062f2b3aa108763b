use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::{Message, MessageStatus, Role};

pub const DEFAULT_CONVERSATION_TITLE: &str = "New Chat";

const TITLE_MAX_WORDS: usize = 6;
const TITLE_MAX_CHARS: usize = 40;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: DEFAULT_CONVERSATION_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Messages that represent settled exchanges, suitable for seeding a
    /// backend session.
    ///
    /// Assistant replies that are not complete are skipped together with the
    /// user turn they answer, so a pending or failed request never shows up
    /// in the replayed context as an unanswered prompt.
    pub fn settled_history(&self) -> Vec<Message> {
        let mut history = Vec::with_capacity(self.messages.len());
        for (idx, msg) in self.messages.iter().enumerate() {
            if msg.effective_status() != MessageStatus::Complete {
                continue;
            }
            if msg.role == Role::User {
                let reply_unsettled = self.messages.get(idx + 1).is_some_and(|next| {
                    next.role == Role::Assistant
                        && next.effective_status() != MessageStatus::Complete
                });
                if reply_unsettled {
                    continue;
                }
            }
            history.push(msg.clone());
        }
        history
    }

    pub fn preview(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| !m.content.is_empty())
            .map(|m| m.content.chars().take(100).collect())
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive a conversation title from the first user message: the first few
/// words, cut at 40 characters with a trailing ellipsis.
pub fn derive_title(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().take(TITLE_MAX_WORDS).collect();
    let joined = words.join(" ");
    if joined.chars().count() > TITLE_MAX_CHARS {
        let cut: String = joined.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", cut.trim_end())
    } else {
        joined
    }
}
