use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::types::{BackendError, ChatMessage};
use crate::models::Message;

const STATUS_CHANNEL_CAPACITY: usize = 32;

/// The single mutable conversational context of a backend, plus the
/// bookkeeping that keeps at most one generation running against it.
pub struct SessionContext {
    history: Mutex<Vec<ChatMessage>>,
    generation: tokio::sync::Mutex<()>,
    cancel: Mutex<Option<CancellationToken>>,
    ready: AtomicBool,
    status_tx: broadcast::Sender<String>,
}

/// Held for the duration of one `generate` call.
pub struct GenerationTurn<'a> {
    _guard: tokio::sync::MutexGuard<'a, ()>,
    ctx: &'a SessionContext,
    prompt: String,
    pub messages: Vec<ChatMessage>,
    pub cancel: CancellationToken,
}

impl SessionContext {
    pub fn new() -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            history: Mutex::new(Vec::new()),
            generation: tokio::sync::Mutex::new(()),
            cancel: Mutex::new(None),
            ready: AtomicBool::new(false),
            status_tx,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn emit_status(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::info!("Backend status: {}", text);
        // No subscribers is fine.
        let _ = self.status_tx.send(text);
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<String> {
        self.status_tx.subscribe()
    }

    /// Start a generation turn for `prompt`, cancelled through `cancel` or
    /// [`SessionContext::stop`]. Rejects immediately rather than waiting when
    /// the backend is not ready or already generating.
    pub fn begin(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<GenerationTurn<'_>, BackendError> {
        if !self.is_ready() {
            return Err(BackendError::NotReady);
        }
        let guard = self
            .generation
            .try_lock()
            .map_err(|_| BackendError::Busy)?;

        *lock(&self.cancel) = Some(cancel.clone());

        let mut messages = lock(&self.history).clone();
        messages.push(ChatMessage::user(prompt));

        Ok(GenerationTurn {
            _guard: guard,
            ctx: self,
            prompt: prompt.to_string(),
            messages,
            cancel,
        })
    }

    pub fn stop(&self) {
        if let Some(token) = lock(&self.cancel).as_ref() {
            token.cancel();
        }
    }

    pub async fn reset(&self) {
        let _guard = self.generation.lock().await;
        lock(&self.history).clear();
    }

    pub async fn load(&self, messages: &[Message]) {
        let _guard = self.generation.lock().await;
        let mut history = lock(&self.history);
        history.clear();
        history.extend(messages.iter().map(ChatMessage::from));
    }

    #[cfg(test)]
    pub fn history(&self) -> Vec<ChatMessage> {
        lock(&self.history).clone()
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationTurn<'_> {
    /// Record the finished exchange in the session. Failed generations are
    /// never committed, so the session only ever holds settled turns.
    pub fn commit(self, response: &str) {
        let mut history = lock(&self.ctx.history);
        history.push(ChatMessage::user(self.prompt.as_str()));
        history.push(ChatMessage::assistant(response));
    }
}

impl Drop for GenerationTurn<'_> {
    fn drop(&mut self) {
        lock(&self.ctx.cancel).take();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn ready_context() -> SessionContext {
        let ctx = SessionContext::new();
        ctx.set_ready(true);
        ctx
    }

    #[test]
    fn test_begin_requires_ready() {
        let ctx = SessionContext::new();
        assert!(matches!(ctx.begin("hi", CancellationToken::new()), Err(BackendError::NotReady)));
    }

    #[test]
    fn test_second_turn_is_rejected() {
        let ctx = ready_context();
        let _turn = ctx.begin("first", CancellationToken::new()).unwrap();
        assert!(matches!(ctx.begin("second", CancellationToken::new()), Err(BackendError::Busy)));
    }

    #[test]
    fn test_commit_appends_exchange() {
        let ctx = ready_context();
        let turn = ctx.begin("hello", CancellationToken::new()).unwrap();
        assert_eq!(turn.messages, vec![ChatMessage::user("hello")]);
        turn.commit("hi there");

        assert_eq!(
            ctx.history(),
            vec![ChatMessage::user("hello"), ChatMessage::assistant("hi there")]
        );
        let next = ctx.begin("again", CancellationToken::new()).unwrap();
        assert_eq!(next.messages.len(), 3);
    }

    #[test]
    fn test_dropped_turn_leaves_history_untouched() {
        let ctx = ready_context();
        drop(ctx.begin("lost", CancellationToken::new()).unwrap());
        assert!(ctx.history().is_empty());
    }

    #[test]
    fn test_stop_cancels_active_turn() {
        let ctx = ready_context();
        let turn = ctx.begin("hi", CancellationToken::new()).unwrap();
        ctx.stop();
        assert!(turn.cancel.is_cancelled());
    }

    #[test]
    fn test_turn_uses_callers_token() {
        let ctx = ready_context();
        let cancel = CancellationToken::new();
        let turn = ctx.begin("hi", cancel.clone()).unwrap();
        cancel.cancel();
        assert!(turn.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_load_replaces_history() {
        let ctx = ready_context();
        ctx.begin("stale", CancellationToken::new()).unwrap().commit("old");

        ctx.load(&[Message::user("fresh")]).await;
        assert_eq!(ctx.history(), vec![ChatMessage::user("fresh")]);

        ctx.reset().await;
        assert!(ctx.history().is_empty());
    }

    #[tokio::test]
    async fn test_reset_waits_for_active_turn() {
        let ctx = Arc::new(ready_context());
        let turn_ctx = ctx.clone();

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let worker = tokio::spawn(async move {
            let turn = turn_ctx.begin("slow", CancellationToken::new()).unwrap();
            let _ = started_tx.send(());
            tokio::time::sleep(Duration::from_millis(50)).await;
            turn.commit("done");
        });

        started_rx.await.unwrap();
        ctx.reset().await;
        worker.await.unwrap();

        // The reset ran after the commit, so nothing survives.
        assert!(ctx.history().is_empty());
    }
}
