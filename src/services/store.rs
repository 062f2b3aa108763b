use anyhow::Result;
use async_trait::async_trait;

use super::settings::{AppSettings, SettingsPatch};
use crate::models::Conversation;

/// Durable home of conversations, the current-conversation pointer and the
/// app settings.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// All conversations, most recently updated first.
    async fn get_all(&self) -> Result<Vec<Conversation>>;

    async fn get(&self, id: &str) -> Result<Option<Conversation>>;

    /// Persist a fresh empty conversation and make it current.
    async fn create(&self) -> Result<Conversation>;

    /// Upsert by id, including the full ordered message list.
    async fn save(&self, conversation: &Conversation) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;

    async fn current_id(&self) -> Result<Option<String>>;

    async fn set_current_id(&self, id: Option<&str>) -> Result<()>;

    async fn load_settings(&self) -> Result<AppSettings>;

    async fn update_settings(&self, patch: &SettingsPatch) -> Result<AppSettings>;
}
