use std::fmt::Write;

use crate::models::{Message, MessageStatus, Role};
use crate::services::chat::ChatSnapshot;
use crate::services::settings::AppSettings;

/// Turns successive snapshots into append-only terminal output.
///
/// Remembers how much of the displayed conversation was already printed so
/// a streaming reply is written as deltas rather than redrawn.
#[derive(Debug, Default)]
pub struct Renderer {
    conversation_id: Option<String>,
    next_message: usize,
    started: bool,
    printed: usize,
    status: Option<String>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to append so the terminal reflects `snapshot`.
    pub fn update(&mut self, snapshot: &ChatSnapshot) -> String {
        let mut out = String::new();

        if snapshot.backend_status != self.status {
            if let Some(status) = &snapshot.backend_status {
                let _ = writeln!(out, "[{}]", status);
            }
            self.status.clone_from(&snapshot.backend_status);
        }

        let Some(conversation) = &snapshot.active else {
            if self.conversation_id.take().is_some() {
                out.push_str("\n(no conversation)\n");
            }
            return out;
        };

        if self.conversation_id.as_deref() != Some(conversation.id.as_str()) {
            if self.started {
                out.push('\n');
            }
            let _ = writeln!(out, "\n== {} ==", conversation.title);
            self.conversation_id = Some(conversation.id.clone());
            self.next_message = 0;
            self.started = false;
            self.printed = 0;
        }

        while let Some(message) = conversation.messages.get(self.next_message) {
            if !self.started {
                out.push_str(prefix(message));
                self.started = true;
            }
            if message.effective_status() == MessageStatus::Error {
                if self.printed > 0 {
                    out.push('\n');
                }
                let _ = writeln!(out, "! {}", message.content);
                self.finish_message();
                continue;
            }

            let content = message.content.as_str();
            if content.len() > self.printed && content.is_char_boundary(self.printed) {
                out.push_str(&content[self.printed..]);
                self.printed = content.len();
            }
            if !message.effective_status().is_settled() {
                break;
            }
            out.push('\n');
            self.finish_message();
        }
        out
    }

    fn finish_message(&mut self) {
        self.next_message += 1;
        self.started = false;
        self.printed = 0;
    }
}

fn prefix(message: &Message) -> &'static str {
    match message.role {
        Role::User => "you> ",
        Role::Assistant => "ai> ",
        Role::System => "system> ",
    }
}

/// Numbered conversation list as shown by `/list`.
pub fn conversation_list(snapshot: &ChatSnapshot) -> String {
    if snapshot.conversations.is_empty() {
        return "No conversations yet.\n".to_string();
    }
    let active = snapshot.active.as_ref().map(|c| c.id.as_str());
    let mut out = String::new();
    for (idx, summary) in snapshot.conversations.iter().enumerate() {
        let marker = if Some(summary.id.as_str()) == active { '*' } else { ' ' };
        let _ = write!(out, "{} {:>2}. {}", marker, idx + 1, summary.title);
        if summary.generating {
            out.push_str("  (generating)");
        }
        if summary.queued > 0 {
            let _ = write!(out, "  ({} queued)", summary.queued);
        }
        out.push('\n');
    }
    out
}

pub fn settings_summary(settings: &AppSettings) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "  backend       {}", settings.backend.as_str());
    let _ = writeln!(out, "  local-model   {}", settings.local_model);
    let _ = writeln!(out, "  remote-model  {}", settings.remote_model);
    let _ = writeln!(
        out,
        "  url           {}",
        settings.remote_base_url.as_deref().unwrap_or("(default)")
    );
    let _ = writeln!(out, "  theme         {}", settings.color_scheme.as_str());
    let _ = writeln!(out, "  temperature   {}", settings.temperature);
    let _ = writeln!(
        out,
        "  system        {}",
        settings.system_prompt.as_deref().unwrap_or("(none)")
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Conversation;
    use crate::services::chat::ConversationSummary;

    fn snapshot_with(conversation: &Conversation) -> ChatSnapshot {
        ChatSnapshot {
            active: Some(conversation.clone()),
            ..Default::default()
        }
    }

    #[test]
    fn test_streaming_reply_prints_only_deltas() {
        let mut conversation = Conversation::new();
        conversation.title = "Hello".to_string();
        conversation.messages.push(Message::user("Hello"));
        let mut reply = Message::assistant_placeholder();
        reply.status = Some(MessageStatus::Generating);
        conversation.messages.push(reply);

        let mut renderer = Renderer::new();
        assert_eq!(
            renderer.update(&snapshot_with(&conversation)),
            "\n== Hello ==\nyou> Hello\nai> "
        );

        conversation.messages[1].content = "Hi".to_string();
        assert_eq!(renderer.update(&snapshot_with(&conversation)), "Hi");

        conversation.messages[1].content = "Hi there".to_string();
        conversation.messages[1].status = Some(MessageStatus::Complete);
        assert_eq!(renderer.update(&snapshot_with(&conversation)), " there\n");

        assert_eq!(renderer.update(&snapshot_with(&conversation)), "");
    }

    #[test]
    fn test_failed_reply_prints_error_line() {
        let mut conversation = Conversation::new();
        conversation.messages.push(Message::user("q"));
        let mut reply = Message::assistant_placeholder();
        reply.status = Some(MessageStatus::Generating);
        reply.content = "par".to_string();
        conversation.messages.push(reply);

        let mut renderer = Renderer::new();
        renderer.update(&snapshot_with(&conversation));

        conversation.messages[1].status = Some(MessageStatus::Error);
        conversation.messages[1].content = "failed".to_string();
        assert_eq!(renderer.update(&snapshot_with(&conversation)), "\n! failed\n");
    }

    #[test]
    fn test_status_and_cleared_conversation() {
        let conversation = Conversation::new();
        let mut renderer = Renderer::new();
        renderer.update(&snapshot_with(&conversation));

        let snapshot = ChatSnapshot {
            backend_status: Some("Ready".to_string()),
            ..Default::default()
        };
        assert_eq!(renderer.update(&snapshot), "[Ready]\n\n(no conversation)\n");
        assert_eq!(renderer.update(&snapshot), "");
    }

    #[test]
    fn test_conversation_list_marks_active_and_activity() {
        let active = Conversation::new();
        let summary = |id: &str, title: &str, generating: bool, queued: usize| ConversationSummary {
            id: id.to_string(),
            title: title.to_string(),
            updated_at: chrono::Utc::now(),
            preview: None,
            generating,
            queued,
        };
        let snapshot = ChatSnapshot {
            conversations: vec![
                summary(&active.id, "Current", false, 0),
                summary("other", "Background", true, 2),
            ],
            active: Some(active.clone()),
            ..Default::default()
        };
        assert_eq!(
            conversation_list(&snapshot),
            "*  1. Current\n   2. Background  (generating)  (2 queued)\n"
        );
        assert_eq!(
            conversation_list(&ChatSnapshot::default()),
            "No conversations yet.\n"
        );
    }

    #[test]
    fn test_settings_summary_marks_unset_fields() {
        let out = settings_summary(&AppSettings::default());
        assert!(out.contains("backend       local"));
        assert!(out.contains("url           (default)"));
        assert!(out.contains("system        (none)"));
    }
}
