use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::client::{run_turn, CompletionClient};
use crate::models::Message;
use crate::providers::context::SessionContext;
use crate::providers::traits::ChatBackend;
use crate::providers::types::{
    BackendError, BackendId, GenerateOutcome, GenerationOptions, StreamEvent,
};

/// Hosted OpenAI-compatible completions API.
pub struct RemoteBackend {
    client: CompletionClient,
    options: GenerationOptions,
    session: SessionContext,
}

impl RemoteBackend {
    pub fn new(base_url: Url, api_key: Option<String>, options: GenerationOptions) -> Self {
        Self {
            client: CompletionClient::new(base_url, api_key),
            options,
            session: SessionContext::new(),
        }
    }
}

#[async_trait]
impl ChatBackend for RemoteBackend {
    fn backend_id(&self) -> BackendId {
        BackendId::Remote
    }

    async fn initialize(&self) -> Result<(), BackendError> {
        if self.session.is_ready() {
            return Ok(());
        }

        let host = self.client.base_url().host_str().unwrap_or("remote API");
        self.session.emit_status(format!("Connecting to {}", host));

        let models = match self.client.list_models().await {
            Ok(models) => models,
            Err(e) => {
                self.session.emit_status(format!("Connection failed: {}", e));
                return Err(e);
            }
        };

        if !models.iter().any(|m| m == &self.options.model) {
            tracing::warn!(
                "Model '{}' not advertised by {} ({} models listed)",
                self.options.model,
                host,
                models.len()
            );
        }

        self.session.set_ready(true);
        self.session
            .emit_status(format!("Ready ({})", self.options.model));
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.session.is_ready()
    }

    async fn generate(
        &self,
        prompt: &str,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<GenerateOutcome, BackendError> {
        run_turn(&self.session, &self.client, &self.options, prompt, tx, cancel).await
    }

    fn stop(&self) {
        self.session.stop();
    }

    async fn reset_session(&self) -> Result<(), BackendError> {
        self.session.reset().await;
        Ok(())
    }

    async fn load_history(&self, messages: &[Message]) -> Result<(), BackendError> {
        self.session.load(messages).await;
        Ok(())
    }

    fn subscribe_status(&self) -> broadcast::Receiver<String> {
        self.session.subscribe_status()
    }
}
