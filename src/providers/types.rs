use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Message, Role};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend is not initialized")]
    NotReady,

    #[error("A generation is already in progress")]
    Busy,

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Model file not found: {}", .0.display())]
    ModelMissing(PathBuf),

    #[error("Failed to start inference engine: {0}")]
    EngineStart(String),

    #[error("Inference engine exited: {0}")]
    EngineExited(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendId {
    Local,
    Remote,
}

impl BackendId {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendId::Local => "local",
            BackendId::Remote => "remote",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            BackendId::Local => "Local Inference",
            BackendId::Remote => "Remote API (OpenAI Compatible)",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "local" => Some(BackendId::Local),
            "remote" => Some(BackendId::Remote),
            _ => None,
        }
    }
}

/// A streamed piece of a generation, delivered in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Thinking(String),
    Token(String),
}

/// How a `generate` call settled. A user-requested stop is reported as
/// `aborted`, with whatever text streamed before it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateOutcome {
    pub response: String,
    pub thinking: String,
    pub aborted: bool,
}

/// One turn of backend conversational context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
        }
    }
}

/// Sampling and prompt options shared by every request a backend sends.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub model: String,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
}
