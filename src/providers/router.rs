use std::collections::HashMap;
use std::sync::Arc;

use super::local::{EngineConfig, LocalBackend};
use super::openai::RemoteBackend;
use super::traits::ChatBackend;
use super::types::{BackendError, BackendId, GenerationOptions};
use crate::config::AppConfig;
use crate::models::model;
use crate::services::settings::AppSettings;

const LOCAL_CONTEXT_SIZE: u32 = 4096;

pub struct BackendRouter {
    backends: HashMap<BackendId, Arc<dyn ChatBackend>>,
}

impl BackendRouter {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Register the local engine and the remote API backends configured for
    /// this machine and these settings.
    pub fn standard(config: &AppConfig, settings: &AppSettings) -> Result<Self, BackendError> {
        let temperature = if (settings.temperature - 1.0).abs() < f32::EPSILON {
            None
        } else {
            Some(settings.temperature)
        };
        let system_prompt = settings
            .system_prompt
            .clone()
            .filter(|s| !s.trim().is_empty());

        let mut router = Self::new();

        let local_model = model::find_model(&settings.local_model)
            .or_else(|| model::find_model(model::DEFAULT_LOCAL_MODEL));
        if let Some(spec) = local_model {
            let engine = EngineConfig {
                binary: config.engine_binary.clone(),
                model_path: config.models_dir.join(&spec.filename),
                port: config.engine_port,
                context_size: LOCAL_CONTEXT_SIZE,
            };
            let options = GenerationOptions {
                model: spec.id,
                temperature,
                system_prompt: system_prompt.clone(),
                max_tokens: None,
            };
            router.register(Arc::new(LocalBackend::new(engine, options)?));
        }

        let remote_base = settings
            .remote_base_url
            .as_deref()
            .and_then(|raw| match crate::config::parse_base_url(raw) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!("Ignoring saved remote URL: {}", e);
                    None
                }
            })
            .unwrap_or_else(|| config.remote_base_url.clone());
        router.register(Arc::new(RemoteBackend::new(
            remote_base,
            config.remote_api_key.clone(),
            GenerationOptions {
                model: settings.remote_model.clone(),
                temperature,
                system_prompt,
                max_tokens: None,
            },
        )));

        Ok(router)
    }

    pub fn register(&mut self, backend: Arc<dyn ChatBackend>) {
        self.backends.insert(backend.backend_id(), backend);
    }

    pub fn get(&self, id: BackendId) -> Option<Arc<dyn ChatBackend>> {
        self.backends.get(&id).cloned()
    }

    #[cfg(test)]
    pub fn ids(&self) -> Vec<BackendId> {
        let mut ids: Vec<BackendId> = self.backends.keys().copied().collect();
        ids.sort_by_key(|id| id.as_str());
        ids
    }
}

impl Default for BackendRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn config() -> AppConfig {
        AppConfig {
            data_dir: PathBuf::from("/tmp/murmur-test"),
            models_dir: PathBuf::from("/tmp/murmur-test/models"),
            engine_binary: PathBuf::from("llama-server"),
            engine_port: 18090,
            remote_base_url: crate::config::parse_base_url("http://127.0.0.1:9").unwrap(),
            remote_api_key: None,
        }
    }

    #[test]
    fn test_standard_registers_both_backends() {
        let router = BackendRouter::standard(&config(), &AppSettings::default()).unwrap();
        assert_eq!(router.ids(), vec![BackendId::Local, BackendId::Remote]);
        assert_eq!(
            router.get(BackendId::Remote).unwrap().backend_id(),
            BackendId::Remote
        );
    }

    #[test]
    fn test_unknown_backend_is_absent() {
        let router = BackendRouter::new();
        assert!(router.get(BackendId::Local).is_none());
    }
}
