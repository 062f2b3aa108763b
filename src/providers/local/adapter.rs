use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::engine::{EngineConfig, EngineProcess};
use crate::models::Message;
use crate::providers::context::SessionContext;
use crate::providers::openai::client::{run_turn, CompletionClient};
use crate::providers::traits::ChatBackend;
use crate::providers::types::{
    BackendError, BackendId, GenerateOutcome, GenerationOptions, StreamEvent,
};

const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);
const STARTUP_TIMEOUT: Duration = Duration::from_secs(120);

/// On-device inference through a locally launched engine server.
pub struct LocalBackend {
    config: EngineConfig,
    options: GenerationOptions,
    client: CompletionClient,
    session: SessionContext,
    engine: Mutex<Option<EngineProcess>>,
    // Serializes `initialize` calls. Never taken by `generate`.
    starting: Mutex<()>,
}

impl LocalBackend {
    pub fn new(config: EngineConfig, options: GenerationOptions) -> Result<Self, BackendError> {
        let base = format!("http://127.0.0.1:{}", config.port);
        let base_url = Url::parse(&base)
            .map_err(|e| BackendError::EngineStart(format!("Invalid engine address: {}", e)))?;
        Ok(Self {
            config,
            options,
            client: CompletionClient::new(base_url, None),
            session: SessionContext::new(),
            engine: Mutex::new(None),
            starting: Mutex::new(()),
        })
    }

    async fn wait_until_healthy(&self, engine: &mut EngineProcess) -> Result<(), BackendError> {
        let deadline = tokio::time::Instant::now() + STARTUP_TIMEOUT;
        loop {
            if let Some(status) = engine.exit_status() {
                return Err(BackendError::EngineExited(status));
            }
            if self.client.health().await {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BackendError::Timeout(format!(
                    "engine not healthy after {}s",
                    STARTUP_TIMEOUT.as_secs()
                )));
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
    }

    /// Fails if the engine process has exited since it became healthy. Never
    /// waits: a slot that is briefly locked by `initialize` counts as alive.
    fn engine_alive(&self) -> Result<(), BackendError> {
        let Ok(mut engine) = self.engine.try_lock() else {
            return Ok(());
        };
        let exited = engine.as_mut().and_then(|e| e.exit_status());
        match exited {
            Some(status) => {
                engine.take();
                self.session.set_ready(false);
                self.session
                    .emit_status(format!("Inference engine stopped ({})", status));
                Err(BackendError::EngineExited(status))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChatBackend for LocalBackend {
    fn backend_id(&self) -> BackendId {
        BackendId::Local
    }

    async fn initialize(&self) -> Result<(), BackendError> {
        let _starting = self.starting.lock().await;
        if self.session.is_ready() && self.engine.lock().await.is_some() {
            return Ok(());
        }

        if !self.config.model_path.exists() {
            self.session.emit_status("Model not downloaded");
            return Err(BackendError::ModelMissing(self.config.model_path.clone()));
        }

        self.session.emit_status("Starting inference engine");
        let mut engine = EngineProcess::spawn(&self.config)?;

        let model_name = self
            .config
            .model_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.options.model.clone());
        self.session.emit_status(format!("Loading {}", model_name));

        if let Err(e) = self.wait_until_healthy(&mut engine).await {
            self.session.emit_status(format!("Engine failed to start: {}", e));
            return Err(e);
        }

        *self.engine.lock().await = Some(engine);
        self.session.set_ready(true);
        self.session.emit_status("Ready");
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
        if !self.session.is_ready() {
            return Err(BackendError::NotReady);
        }
        self.engine_alive()?;
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

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;

    fn backend(binary: PathBuf, model_path: PathBuf, port: u16) -> LocalBackend {
        LocalBackend::new(
            EngineConfig {
                binary,
                model_path,
                port,
                context_size: 2048,
            },
            GenerationOptions {
                model: "local".to_string(),
                temperature: None,
                system_prompt: None,
                max_tokens: None,
            },
        )
        .unwrap()
    }

    fn missing_model() -> LocalBackend {
        backend(
            PathBuf::from("llama-server"),
            PathBuf::from("/nonexistent/model.gguf"),
            18089,
        )
    }

    #[tokio::test]
    async fn test_initialize_without_model_reports_missing() {
        let backend = missing_model();
        let mut status = backend.subscribe_status();

        let result = backend.initialize().await;
        assert!(matches!(result, Err(BackendError::ModelMissing(_))));
        assert!(!backend.is_ready());
        assert_eq!(status.recv().await.unwrap(), "Model not downloaded");
    }

    #[tokio::test]
    async fn test_generate_before_initialize_is_rejected() {
        let backend = missing_model();
        let (tx, _rx) = mpsc::channel(8);
        assert!(matches!(
            backend.generate("hi", tx, CancellationToken::new()).await,
            Err(BackendError::NotReady)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_generate_while_engine_is_starting_is_rejected() {
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        let dir = std::env::temp_dir().join(format!("murmur-engine-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let model = dir.join("model.gguf");
        std::fs::write(&model, b"GGUF").unwrap();
        // An engine that never passes its health check.
        let engine = dir.join("engine.sh");
        std::fs::write(&engine, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o755)).unwrap();

        let backend = Arc::new(backend(engine, model, 18093));
        let mut status = backend.subscribe_status();
        let starting = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.initialize().await })
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            while status.recv().await.unwrap() != "Loading model.gguf" {}
        })
        .await
        .expect("engine never started");

        let (tx, _rx) = mpsc::channel(8);
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            backend.generate("hi", tx, CancellationToken::new()),
        )
        .await
        .expect("generate waited on engine startup");
        assert!(matches!(result, Err(BackendError::NotReady)));

        starting.abort();
        let _ = starting.await;
        let _ = std::fs::remove_dir_all(&dir);
    }
}
