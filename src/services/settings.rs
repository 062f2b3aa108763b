use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::database::Database;
use crate::models::model::DEFAULT_LOCAL_MODEL;
use crate::providers::BackendId;

const SETTINGS_KEY: &str = "app_settings";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub backend: BackendId,
    pub local_model: String,
    pub remote_model: String,
    pub remote_base_url: Option<String>,
    pub color_scheme: ColorScheme,
    pub temperature: f32,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorScheme {
    System,
    Light,
    Dark,
}

impl ColorScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorScheme::System => "system",
            ColorScheme::Light => "light",
            ColorScheme::Dark => "dark",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "system" => Some(ColorScheme::System),
            "light" => Some(ColorScheme::Light),
            "dark" => Some(ColorScheme::Dark),
            _ => None,
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            backend: BackendId::Local,
            local_model: DEFAULT_LOCAL_MODEL.to_string(),
            remote_model: "gpt-4o-mini".to_string(),
            remote_base_url: None,
            color_scheme: ColorScheme::System,
            temperature: 1.0,
            system_prompt: None,
        }
    }
}

/// Partial settings update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsPatch {
    pub backend: Option<BackendId>,
    pub local_model: Option<String>,
    pub remote_model: Option<String>,
    pub remote_base_url: Option<Option<String>>,
    pub color_scheme: Option<ColorScheme>,
    pub temperature: Option<f32>,
    pub system_prompt: Option<Option<String>>,
}

impl AppSettings {
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(backend) = patch.backend {
            self.backend = backend;
        }
        if let Some(model) = &patch.local_model {
            self.local_model.clone_from(model);
        }
        if let Some(model) = &patch.remote_model {
            self.remote_model.clone_from(model);
        }
        if let Some(url) = &patch.remote_base_url {
            self.remote_base_url.clone_from(url);
        }
        if let Some(scheme) = patch.color_scheme {
            self.color_scheme = scheme;
        }
        if let Some(temperature) = patch.temperature {
            self.temperature = temperature.clamp(0.0, 2.0);
        }
        if let Some(prompt) = &patch.system_prompt {
            self.system_prompt.clone_from(prompt);
        }
    }

    /// Model identifier of the selected backend.
    pub fn selected_model(&self) -> &str {
        match self.backend {
            BackendId::Local => &self.local_model,
            BackendId::Remote => &self.remote_model,
        }
    }
}

pub struct SettingsService;

impl SettingsService {
    pub async fn load(db: &Database) -> AppSettings {
        match db.get_setting(SETTINGS_KEY).await {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("Discarding unreadable settings: {}", e);
                AppSettings::default()
            }),
            Ok(None) => AppSettings::default(),
            Err(e) => {
                tracing::error!("Failed to load settings: {}", e);
                AppSettings::default()
            }
        }
    }

    pub async fn save(db: &Database, settings: &AppSettings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        db.set_setting(SETTINGS_KEY, &json).await
    }

    pub async fn update(db: &Database, patch: &SettingsPatch) -> Result<AppSettings> {
        let mut settings = Self::load(db).await;
        settings.apply(patch);
        Self::save(db, &settings).await?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_defaults_when_unset() {
        let db = Database::new_in_memory().unwrap();
        assert_eq!(SettingsService::load(&db).await, AppSettings::default());
    }

    #[tokio::test]
    async fn test_partial_update_keeps_other_fields() {
        let db = Database::new_in_memory().unwrap();
        let patch = SettingsPatch {
            backend: Some(BackendId::Remote),
            color_scheme: Some(ColorScheme::Dark),
            ..Default::default()
        };
        let updated = SettingsService::update(&db, &patch).await.unwrap();
        assert_eq!(updated.backend, BackendId::Remote);
        assert_eq!(updated.local_model, DEFAULT_LOCAL_MODEL);

        let reloaded = SettingsService::load(&db).await;
        assert_eq!(reloaded.color_scheme, ColorScheme::Dark);
        assert_eq!(reloaded.selected_model(), "gpt-4o-mini");
    }

    #[test]
    fn test_patch_can_clear_optional_fields() {
        let mut settings = AppSettings {
            system_prompt: Some("be kind".to_string()),
            ..Default::default()
        };
        settings.apply(&SettingsPatch {
            system_prompt: Some(None),
            temperature: Some(5.0),
            ..Default::default()
        });
        assert_eq!(settings.system_prompt, None);
        assert_eq!(settings.temperature, 2.0);
    }

    #[test]
    fn test_older_settings_json_fills_defaults() {
        let settings: AppSettings = serde_json::from_str(r#"{"backend":"Remote"}"#).unwrap();
        assert_eq!(settings.backend, BackendId::Remote);
        assert_eq!(settings.color_scheme, ColorScheme::System);
    }
}
