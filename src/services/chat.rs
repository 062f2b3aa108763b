use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::queue::{GenerationQueue, QueueItem};
use super::session::{PendingReset, SessionSwitch, SessionTarget};
use super::settings::{AppSettings, SettingsPatch};
use super::store::ConversationStore;
use crate::models::{derive_title, Conversation, Message, MessageStatus, Role};
use crate::providers::{BackendError, ChatBackend, GenerateOutcome, StreamEvent};

/// Content of an assistant reply whose generation failed.
pub const GENERATION_ERROR_TEXT: &str = "Sorry, something went wrong while generating a response.";

const COMMAND_CHANNEL_CAPACITY: usize = 32;
const CHUNK_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Chat controller is no longer running")]
    ControllerClosed,
}

/// One row of the conversation list.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub preview: Option<String>,
    pub generating: bool,
    pub queued: usize,
}

/// Everything a presentation layer needs to draw the chat state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatSnapshot {
    /// Most recently updated first.
    pub conversations: Vec<ConversationSummary>,
    /// The displayed conversation, with the live text of a streaming reply.
    pub active: Option<Conversation>,
    pub generating_for: Option<String>,
    pub background_generation: Option<String>,
    pub pending_reset: PendingReset,
    pub queue_len: usize,
    pub backend_status: Option<String>,
    pub backend_ready: bool,
}

enum Command {
    Send {
        content: String,
        done: oneshot::Sender<()>,
    },
    Stop {
        done: oneshot::Sender<()>,
    },
    Create {
        done: oneshot::Sender<Option<String>>,
    },
    Select {
        id: String,
        done: oneshot::Sender<()>,
    },
    Delete {
        id: String,
        done: oneshot::Sender<()>,
    },
    Rename {
        id: String,
        title: String,
        done: oneshot::Sender<()>,
    },
    Initialize {
        done: oneshot::Sender<bool>,
    },
    /// Read the settings, or apply `patch` first when given.
    Settings {
        patch: Option<SettingsPatch>,
        done: oneshot::Sender<Option<AppSettings>>,
    },
}

enum Event {
    Chunk {
        conversation_id: String,
        event: StreamEvent,
    },
    Settled {
        item: QueueItem,
        result: Result<GenerateOutcome, BackendError>,
    },
    Status(String),
    Ready(bool),
}

/// Acknowledgement owed to a caller, sent once the command's effects
/// (including any generation it started) are visible in the snapshot.
enum Reply {
    Unit(oneshot::Sender<()>),
    Created(oneshot::Sender<Option<String>>, Option<String>),
    Settings(oneshot::Sender<Option<AppSettings>>, Option<AppSettings>),
    Later,
}

impl Reply {
    fn send(self) {
        match self {
            Reply::Unit(done) => {
                let _ = done.send(());
            }
            Reply::Created(done, id) => {
                let _ = done.send(id);
            }
            Reply::Settings(done, settings) => {
                let _ = done.send(settings);
            }
            Reply::Later => {}
        }
    }
}

/// Cheap, cloneable entry point to a running [`ChatController`].
#[derive(Clone)]
pub struct ChatHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<ChatSnapshot>,
}

impl ChatHandle {
    /// Queue `content` as a new user turn in the displayed conversation,
    /// creating one if nothing is displayed. Returns before generation ends.
    pub async fn send_message(&self, content: impl Into<String>) -> Result<(), ChatError> {
        let content = content.into();
        self.request(|done| Command::Send { content, done }).await
    }

    pub async fn stop_generation(&self) -> Result<(), ChatError> {
        self.request(|done| Command::Stop { done }).await
    }

    /// Returns the new conversation's id, or `None` if the store failed.
    pub async fn create_conversation(&self) -> Result<Option<String>, ChatError> {
        self.request(|done| Command::Create { done }).await
    }

    pub async fn select_conversation(&self, id: &str) -> Result<(), ChatError> {
        let id = id.to_string();
        self.request(|done| Command::Select { id, done }).await
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<(), ChatError> {
        let id = id.to_string();
        self.request(|done| Command::Delete { id, done }).await
    }

    pub async fn rename_conversation(&self, id: &str, title: &str) -> Result<(), ChatError> {
        let id = id.to_string();
        let title = title.to_string();
        self.request(|done| Command::Rename { id, title, done }).await
    }

    /// Initialize the backend; resolves to whether it became ready.
    pub async fn initialize_backend(&self) -> Result<bool, ChatError> {
        self.request(|done| Command::Initialize { done }).await
    }

    /// Stored settings, or `None` if the store failed.
    pub async fn settings(&self) -> Result<Option<AppSettings>, ChatError> {
        self.request(|done| Command::Settings { patch: None, done }).await
    }

    /// Apply a partial update and return the resulting settings. Backend,
    /// model and generation options are read at startup.
    pub async fn update_settings(
        &self,
        patch: SettingsPatch,
    ) -> Result<Option<AppSettings>, ChatError> {
        self.request(|done| Command::Settings {
            patch: Some(patch),
            done,
        })
        .await
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshot.clone()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ChatError> {
        let (done, rx) = oneshot::channel();
        self.commands
            .send(build(done))
            .await
            .map_err(|_| ChatError::ControllerClosed)?;
        rx.await.map_err(|_| ChatError::ControllerClosed)
    }
}

/// Partial output of the in-flight generation.
#[derive(Debug, Default)]
struct StreamAccumulator {
    content: String,
    thinking: String,
}

impl StreamAccumulator {
    fn push(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Token(text) => self.content.push_str(&text),
            StreamEvent::Thinking(text) => self.thinking.push_str(&text),
        }
    }

    fn mirror_into(&self, message: &mut Message) {
        message.content = self.content.clone();
        message.thinking = (!self.thinking.is_empty()).then(|| self.thinking.clone());
    }
}

/// Owns the conversations, the generation queue and the backend session.
///
/// Runs as a single task. Every mutation happens on that task, so the queue,
/// the single in-flight slot and the deferred session reset never race each
/// other; the backend's `generate` runs on a separate task and reports back
/// through chunk and settlement events.
pub struct ChatController {
    store: Arc<dyn ConversationStore>,
    backend: Arc<dyn ChatBackend>,
    conversations: Vec<Conversation>,
    current_id: Option<String>,
    queue: GenerationQueue,
    in_flight: Option<QueueItem>,
    // Cancels the in-flight generation even before the backend has started it.
    stop_token: CancellationToken,
    accumulators: HashMap<String, StreamAccumulator>,
    session: SessionSwitch,
    backend_status: Option<String>,
    backend_ready: bool,
    // Unbounded: a generation must never stall on the controller being busy.
    events_tx: mpsc::UnboundedSender<Event>,
    snapshot_tx: watch::Sender<ChatSnapshot>,
}

impl ChatController {
    /// Load persisted state, restore the last displayed conversation into the
    /// backend session and start the controller task.
    pub async fn spawn(
        store: Arc<dyn ConversationStore>,
        backend: Arc<dyn ChatBackend>,
    ) -> ChatHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(ChatSnapshot::default());

        forward_status(backend.subscribe_status(), events_tx.clone());

        let mut controller = ChatController {
            store,
            backend_ready: backend.is_ready(),
            backend,
            conversations: Vec::new(),
            current_id: None,
            queue: GenerationQueue::new(),
            in_flight: None,
            stop_token: CancellationToken::new(),
            accumulators: HashMap::new(),
            session: SessionSwitch::new(),
            backend_status: None,
            events_tx,
            snapshot_tx,
        };
        controller.restore().await;
        controller.publish();

        tokio::spawn(controller.run(command_rx, events_rx));

        ChatHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    let reply = self.handle_command(command).await;
                    self.drain_queue().await;
                    self.publish();
                    reply.send();
                }
                Some(event) = events.recv() => {
                    self.handle_event(event).await;
                    self.drain_queue().await;
                    self.publish();
                }
            }
        }

        if self.in_flight.is_some() {
            self.cancel_in_flight();
        }
        tracing::debug!("Chat controller stopped");
    }

    async fn handle_command(&mut self, command: Command) -> Reply {
        match command {
            Command::Send { content, done } => {
                self.send_message(content).await;
                Reply::Unit(done)
            }
            Command::Stop { done } => {
                self.stop_generation();
                Reply::Unit(done)
            }
            Command::Create { done } => {
                let id = self.create_conversation().await;
                Reply::Created(done, id)
            }
            Command::Select { id, done } => {
                self.select_conversation(&id).await;
                Reply::Unit(done)
            }
            Command::Delete { id, done } => {
                self.delete_conversation(&id).await;
                Reply::Unit(done)
            }
            Command::Rename { id, title, done } => {
                self.rename_conversation(&id, &title).await;
                Reply::Unit(done)
            }
            Command::Initialize { done } => {
                self.initialize_backend(done);
                Reply::Later
            }
            Command::Settings { patch, done } => {
                let settings = self.settings(patch.as_ref()).await;
                Reply::Settings(done, settings)
            }
        }
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Chunk {
                conversation_id,
                event,
            } => self.apply_chunk(&conversation_id, event),
            Event::Settled { item, result } => self.settle(item, result).await,
            Event::Status(text) => self.backend_status = Some(text),
            Event::Ready(ready) => self.backend_ready = ready,
        }
    }

    async fn restore(&mut self) {
        match self.store.get_all().await {
            Ok(conversations) => self.conversations = conversations,
            Err(e) => tracing::error!("Failed to load conversations: {}", e),
        }

        let stale: Vec<String> = self
            .conversations
            .iter_mut()
            .filter_map(|c| settle_stale_replies(c).then(|| c.id.clone()))
            .collect();
        for id in &stale {
            self.persist(id).await;
        }

        let current = match self.store.current_id().await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("Failed to load current conversation: {}", e);
                None
            }
        };
        if let Some(id) = current.filter(|id| self.conversation(id).is_some()) {
            tracing::info!("Restoring conversation {}", id);
            self.current_id = Some(id.clone());
            self.reset_session_to(SessionTarget::Conversation(id)).await;
        }
    }

    async fn send_message(&mut self, content: String) {
        if content.trim().is_empty() {
            return;
        }

        let conversation_id = match self.current_id.clone() {
            Some(id) => id,
            None => match self.create_conversation().await {
                Some(id) => id,
                None => return,
            },
        };

        let user = Message::user(content.as_str());
        let reply = Message::assistant_placeholder();
        let item = QueueItem {
            id: reply.id.clone(),
            content,
            conversation_id: conversation_id.clone(),
        };

        let Some(conversation) = self.conversation_mut(&conversation_id) else {
            return;
        };
        if conversation.messages.is_empty() {
            conversation.title = derive_title(&item.content);
        }
        conversation.messages.push(user);
        conversation.messages.push(reply);
        conversation.touch();
        self.persist(&conversation_id).await;

        tracing::debug!("Queued reply {} in conversation {}", item.id, conversation_id);
        self.queue.push(item);
    }

    fn stop_generation(&self) {
        if let Some(item) = &self.in_flight {
            tracing::info!("Stopping generation in conversation {}", item.conversation_id);
            self.cancel_in_flight();
        }
    }

    fn cancel_in_flight(&self) {
        self.stop_token.cancel();
        self.backend.stop();
    }

    async fn create_conversation(&mut self) -> Option<String> {
        let conversation = match self.store.create().await {
            Ok(conversation) => conversation,
            Err(e) => {
                tracing::error!("Failed to create conversation: {}", e);
                return None;
            }
        };
        let id = conversation.id.clone();
        tracing::info!("Created conversation {}", id);

        self.conversations.push(conversation);
        self.current_id = Some(id.clone());
        self.request_session_reset(SessionTarget::Conversation(id.clone()))
            .await;
        Some(id)
    }

    async fn select_conversation(&mut self, id: &str) {
        if self.conversation(id).is_none() && !self.adopt_stored(id).await {
            tracing::warn!("Cannot select unknown conversation {}", id);
            return;
        }
        if self.current_id.as_deref() == Some(id) {
            return;
        }

        self.current_id = Some(id.to_string());
        if let Err(e) = self.store.set_current_id(Some(id)).await {
            tracing::error!("Failed to persist current conversation: {}", e);
        }
        self.mirror_stream();
        self.request_session_reset(SessionTarget::Conversation(id.to_string()))
            .await;
    }

    /// Pick up a conversation another writer saved since startup.
    async fn adopt_stored(&mut self, id: &str) -> bool {
        match self.store.get(id).await {
            Ok(Some(conversation)) => {
                tracing::info!("Loaded conversation {} from the store", id);
                self.conversations.push(conversation);
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::error!("Failed to load conversation {}: {}", id, e);
                false
            }
        }
    }

    async fn delete_conversation(&mut self, id: &str) {
        if self.conversation(id).is_none() {
            tracing::warn!("Cannot delete unknown conversation {}", id);
            return;
        }
        if let Err(e) = self.store.delete(id).await {
            tracing::error!("Failed to delete conversation {}: {}", id, e);
            return;
        }

        self.conversations.retain(|c| c.id != id);
        let dropped = self.queue.remove_conversation(id);
        if dropped > 0 {
            tracing::info!("Dropped {} queued replies for deleted conversation {}", dropped, id);
        }
        if self
            .in_flight
            .as_ref()
            .is_some_and(|item| item.conversation_id == id)
        {
            tracing::info!("Stopping generation for deleted conversation {}", id);
            self.cancel_in_flight();
        }
        self.session.forget(id);

        if self.current_id.as_deref() != Some(id) {
            return;
        }
        self.current_id = None;

        let next = self.recent_first().first().map(|c| c.id.clone());
        match next {
            Some(next) => self.select_conversation(&next).await,
            None => {
                if let Err(e) = self.store.set_current_id(None).await {
                    tracing::error!("Failed to clear current conversation: {}", e);
                }
                self.request_session_reset(SessionTarget::Blank).await;
            }
        }
    }

    async fn rename_conversation(&mut self, id: &str, title: &str) {
        let title = title.trim();
        if title.is_empty() {
            return;
        }
        let Some(conversation) = self.conversation_mut(id) else {
            tracing::warn!("Cannot rename unknown conversation {}", id);
            return;
        };
        conversation.title = title.to_string();
        conversation.touch();
        self.persist(id).await;
    }

    async fn settings(&self, patch: Option<&SettingsPatch>) -> Option<AppSettings> {
        let result = match patch {
            Some(patch) => self.store.update_settings(patch).await,
            None => self.store.load_settings().await,
        };
        match result {
            Ok(settings) => Some(settings),
            Err(e) => {
                tracing::error!("Failed to access settings: {}", e);
                None
            }
        }
    }

    fn initialize_backend(&self, done: oneshot::Sender<bool>) {
        let backend = Arc::clone(&self.backend);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let ready = match backend.initialize().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!("Backend initialization failed: {}", e);
                    let _ = events.send(Event::Status(format!("Backend unavailable: {}", e)));
                    false
                }
            };
            let _ = events.send(Event::Ready(ready));
            let _ = done.send(ready);
        });
    }

    /// Start the next queued reply if nothing is generating. Items whose
    /// conversation or placeholder has gone away are dropped silently.
    async fn drain_queue(&mut self) {
        while self.in_flight.is_none() {
            let Some(item) = self.queue.pop_front() else {
                return;
            };
            if !self.is_pending_reply(&item) {
                tracing::debug!("Dropping queued reply {}: target no longer exists", item.id);
                continue;
            }

            if !self.session.holds(&item.conversation_id) {
                self.reset_session_to(SessionTarget::Conversation(item.conversation_id.clone()))
                    .await;
            }

            if let Some(conversation) = self.conversation_mut(&item.conversation_id) {
                if let Some(message) = conversation.message_mut(&item.id) {
                    message.advance(MessageStatus::Generating);
                }
                conversation.touch();
            }
            self.persist(&item.conversation_id).await;

            tracing::info!(
                "Generating reply {} in conversation {}",
                item.id,
                item.conversation_id
            );
            self.accumulators
                .insert(item.conversation_id.clone(), StreamAccumulator::default());
            self.stop_token = CancellationToken::new();
            self.spawn_generation(item.clone(), self.stop_token.clone());
            self.in_flight = Some(item);
        }
    }

    fn is_pending_reply(&self, item: &QueueItem) -> bool {
        self.conversation(&item.conversation_id)
            .and_then(|c| c.messages.iter().find(|m| m.id == item.id))
            .is_some_and(|m| {
                m.role == Role::Assistant && m.effective_status() == MessageStatus::Queued
            })
    }

    fn spawn_generation(&self, item: QueueItem, cancel: CancellationToken) {
        let backend = Arc::clone(&self.backend);
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            let (tx, mut rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
            let conversation_id = item.conversation_id.clone();

            let forward = async {
                while let Some(event) = rx.recv().await {
                    let _ = events.send(Event::Chunk {
                        conversation_id: conversation_id.clone(),
                        event,
                    });
                }
            };
            let generate = AssertUnwindSafe(backend.generate(&item.content, tx, cancel)).catch_unwind();

            let (result, ()) = tokio::join!(generate, forward);
            let result = result.unwrap_or_else(|_| {
                Err(BackendError::RequestFailed("generation task panicked".to_string()))
            });
            let _ = events.send(Event::Settled { item, result });
        });
    }

    fn apply_chunk(&mut self, conversation_id: &str, event: StreamEvent) {
        let in_flight = self
            .in_flight
            .as_ref()
            .is_some_and(|item| item.conversation_id == conversation_id);
        if !in_flight {
            return;
        }
        if let Some(stream) = self.accumulators.get_mut(conversation_id) {
            stream.push(event);
        }
        self.mirror_stream();
    }

    /// Copy the in-flight stream into its message if that conversation is
    /// the one on screen.
    fn mirror_stream(&mut self) {
        let Some(item) = &self.in_flight else {
            return;
        };
        if self.current_id.as_deref() != Some(item.conversation_id.as_str()) {
            return;
        }
        let Some(stream) = self.accumulators.get(&item.conversation_id) else {
            return;
        };
        let message = self
            .conversations
            .iter_mut()
            .find(|c| c.id == item.conversation_id)
            .and_then(|c| c.message_mut(&item.id));
        if let Some(message) = message {
            stream.mirror_into(message);
        }
    }

    async fn settle(&mut self, item: QueueItem, result: Result<GenerateOutcome, BackendError>) {
        if self.in_flight.as_ref().map(|i| i.id.as_str()) != Some(item.id.as_str()) {
            tracing::warn!("Ignoring settlement of reply {} which is not in flight", item.id);
            return;
        }
        self.in_flight = None;
        let stream = self
            .accumulators
            .remove(&item.conversation_id)
            .unwrap_or_default();

        let (status, content, thinking) = match result {
            Ok(outcome) => {
                if outcome.aborted {
                    tracing::info!("Generation in conversation {} was stopped", item.conversation_id);
                }
                let content = if stream.content.is_empty() {
                    outcome.response
                } else {
                    stream.content
                };
                let thinking = if stream.thinking.is_empty() {
                    outcome.thinking
                } else {
                    stream.thinking
                };
                (MessageStatus::Complete, content, thinking)
            }
            Err(e) => {
                tracing::error!(
                    "Generation failed in conversation {}: {}",
                    item.conversation_id,
                    e
                );
                (MessageStatus::Error, GENERATION_ERROR_TEXT.to_string(), stream.thinking)
            }
        };

        match self.conversation_mut(&item.conversation_id) {
            Some(conversation) => {
                if let Some(message) = conversation.message_mut(&item.id) {
                    message.advance(status);
                    message.content = content;
                    message.thinking = (!thinking.is_empty()).then_some(thinking);
                }
                conversation.touch();
                self.persist(&item.conversation_id).await;
            }
            None => tracing::debug!(
                "Discarding reply for deleted conversation {}",
                item.conversation_id
            ),
        }

        if let Some(target) = self.session.settle() {
            tracing::info!("Applying deferred session reset");
            self.reset_session_to(target).await;
        }
    }

    /// Reset now, or after the in-flight generation settles.
    async fn request_session_reset(&mut self, target: SessionTarget) {
        let generating = self.in_flight.as_ref().map(|i| i.conversation_id.clone());
        match generating {
            Some(generating) => {
                tracing::info!(
                    "Deferring session reset until generation in {} settles",
                    generating
                );
                self.session.defer(target, &generating);
            }
            None => self.reset_session_to(target).await,
        }
    }

    /// Clear the backend session and replay the target's settled exchanges.
    async fn reset_session_to(&mut self, target: SessionTarget) {
        if let Err(e) = self.backend.reset_session().await {
            tracing::error!("Failed to reset backend session: {}", e);
        }
        if let SessionTarget::Conversation(id) = &target {
            let history = self
                .conversation(id)
                .map(Conversation::settled_history)
                .unwrap_or_default();
            if !history.is_empty() {
                if let Err(e) = self.backend.load_history(&history).await {
                    tracing::error!("Failed to load history for {}: {}", id, e);
                }
            }
        }
        self.session.mark_reset(target);
    }

    async fn persist(&self, conversation_id: &str) {
        let Some(conversation) = self.conversation(conversation_id) else {
            return;
        };
        if let Err(e) = self.store.save(conversation).await {
            tracing::error!("Failed to save conversation {}: {}", conversation_id, e);
        }
    }

    fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    fn conversation_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    /// Conversations in list order: most recently updated first.
    fn recent_first(&self) -> Vec<&Conversation> {
        let mut ordered: Vec<&Conversation> = self.conversations.iter().collect();
        ordered.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        ordered
    }

    fn snapshot(&self) -> ChatSnapshot {
        let generating_for = self.in_flight.as_ref().map(|i| i.conversation_id.clone());

        let conversations = self
            .recent_first()
            .into_iter()
            .map(|c| ConversationSummary {
                id: c.id.clone(),
                title: c.title.clone(),
                updated_at: c.updated_at,
                preview: c.preview(),
                generating: generating_for.as_deref() == Some(c.id.as_str()),
                queued: self.queue.count_for(&c.id),
            })
            .collect();

        ChatSnapshot {
            conversations,
            active: self
                .current_id
                .as_deref()
                .and_then(|id| self.conversation(id))
                .cloned(),
            generating_for,
            background_generation: self.session.background().map(str::to_string),
            pending_reset: self.session.pending().clone(),
            queue_len: self.queue.len(),
            backend_status: self.backend_status.clone(),
            backend_ready: self.backend_ready,
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}

/// Replies left unsettled by an earlier run can never resume.
fn settle_stale_replies(conversation: &mut Conversation) -> bool {
    let mut changed = false;
    for message in &mut conversation.messages {
        if message.role == Role::Assistant && !message.effective_status().is_settled() {
            message.advance(MessageStatus::Error);
            if message.content.is_empty() {
                message.content = GENERATION_ERROR_TEXT.to_string();
            }
            changed = true;
        }
    }
    if changed {
        tracing::warn!(
            "Marked interrupted replies as failed in conversation {}",
            conversation.id
        );
    }
    changed
}

fn forward_status(mut status: broadcast::Receiver<String>, events: mpsc::UnboundedSender<Event>) {
    tokio::spawn(async move {
        loop {
            match status.recv().await {
                Ok(text) => {
                    if events.send(Event::Status(text)).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Skipped {} backend status updates", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
