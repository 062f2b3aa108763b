use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use super::types::{BackendError, BackendId, GenerateOutcome, StreamEvent};
use crate::models::Message;

/// Capability surface over a language model backend.
///
/// A backend owns exactly one conversational session. Only the chat
/// controller mutates it (`generate`, `reset_session`, `load_history`).
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn backend_id(&self) -> BackendId;

    /// Prepare the backend. Calling it again once ready is a no-op.
    async fn initialize(&self) -> Result<(), BackendError>;

    fn is_ready(&self) -> bool;

    /// Generate a reply to `prompt` on top of the current session, streaming
    /// chunks through `tx` before resolving. Fails with
    /// [`BackendError::NotReady`] before `initialize` has succeeded and with
    /// [`BackendError::Busy`] if another generation is in flight.
    ///
    /// `cancel` belongs to the caller and may fire before the turn has
    /// started; either way the call settles with an aborted outcome.
    async fn generate(
        &self,
        prompt: &str,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<GenerateOutcome, BackendError>;

    /// Request cancellation of the in-flight generation, if any.
    fn stop(&self);

    /// Clear the session. Waits for an in-flight generation to settle first.
    async fn reset_session(&self) -> Result<(), BackendError>;

    /// Seed the session with prior turns without generating.
    async fn load_history(&self, messages: &[Message]) -> Result<(), BackendError>;

    /// Human readable lifecycle updates (startup, model loading, readiness).
    fn subscribe_status(&self) -> broadcast::Receiver<String>;
}
