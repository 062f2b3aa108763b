use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use url::Url;

pub const APP_NAME: &str = "Murmur";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_REMOTE_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_ENGINE_BINARY: &str = "llama-server";
const DEFAULT_ENGINE_PORT: u16 = 8089;

/// Process-level configuration resolved from the environment.
///
/// User-facing preferences live in [`crate::services::settings::AppSettings`];
/// this only covers paths and endpoints that differ per machine.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub models_dir: PathBuf,
    pub engine_binary: PathBuf,
    pub engine_port: u16,
    pub remote_base_url: Url,
    pub remote_api_key: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let data_dir = match std::env::var("XDG_DATA_HOME") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => {
                let home = std::env::var("HOME").context("HOME not set")?;
                PathBuf::from(home).join(".local/share")
            }
        }
        .join("murmur");

        let models_dir = std::env::var("MURMUR_MODELS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let engine_binary = std::env::var("MURMUR_ENGINE_BINARY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_ENGINE_BINARY));

        let engine_port = match std::env::var("MURMUR_ENGINE_PORT") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("Invalid MURMUR_ENGINE_PORT: {}", raw))?,
            Err(_) => DEFAULT_ENGINE_PORT,
        };

        let raw_base = std::env::var("MURMUR_API_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_REMOTE_BASE_URL.to_string());
        let remote_base_url = parse_base_url(&raw_base)?;

        let remote_api_key = std::env::var("MURMUR_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());

        Ok(Self {
            data_dir,
            models_dir,
            engine_binary,
            engine_port,
            remote_base_url,
            remote_api_key,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("murmur.db")
    }
}

/// Parse and validate an API base URL. Only http(s) endpoints are accepted.
pub fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("Invalid base URL: {}", raw))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => bail!("Unsupported URL scheme '{}' in {}", other, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_base_url_accepts_http() {
        let url = parse_base_url("http://127.0.0.1:8080").unwrap();
        assert_eq!(url.host_str(), Some("127.0.0.1"));
        assert_eq!(url.port(), Some(8080));
    }

    #[test]
    fn test_parse_base_url_rejects_other_schemes() {
        assert!(parse_base_url("ftp://example.com").is_err());
        assert!(parse_base_url("not a url").is_err());
    }
}
