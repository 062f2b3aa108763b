use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::model::{self, ModelSpec};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Download cancelled")]
    Cancelled,

    #[error("HTTP {0}")]
    Http(StatusCode),

    #[error("Network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Network(_) => true,
            DownloadError::Http(status) => status.is_server_error(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadProgress {
    pub percent: f32,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
}

impl DownloadProgress {
    pub fn new(downloaded_bytes: u64, total_bytes: Option<u64>) -> Self {
        let percent = match total_bytes {
            Some(total) if total > 0 => {
                ((downloaded_bytes as f64 / total as f64) * 100.0).min(100.0) as f32
            }
            _ => 0.0,
        };
        Self {
            percent,
            downloaded_bytes,
            total_bytes,
        }
    }
}

/// Fetches model files for the local inference engine.
pub struct ModelDownloader {
    client: Client,
    models_dir: PathBuf,
    cancel: Mutex<Option<CancellationToken>>,
}

impl ModelDownloader {
    pub fn new(models_dir: PathBuf) -> Self {
        Self {
            client: Client::new(),
            models_dir,
            cancel: Mutex::new(None),
        }
    }

    pub fn model_path(&self, spec: &ModelSpec) -> PathBuf {
        self.models_dir.join(&spec.filename)
    }

    pub fn is_downloaded(&self, spec: &ModelSpec) -> bool {
        self.model_path(spec).is_file()
    }

    pub fn cancel_download(&self) {
        if let Some(token) = self.cancel.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            token.cancel();
        }
    }

    /// Download a catalog model and return its local path. A partial file
    /// from an earlier attempt is resumed when the server supports ranges.
    pub async fn download(
        &self,
        model_id: &str,
        progress: mpsc::Sender<DownloadProgress>,
    ) -> Result<PathBuf, DownloadError> {
        let spec = model::find_model(model_id)
            .ok_or_else(|| DownloadError::UnknownModel(model_id.to_string()))?;
        self.download_spec(&spec, progress).await
    }

    async fn download_spec(
        &self,
        spec: &ModelSpec,
        progress: mpsc::Sender<DownloadProgress>,
    ) -> Result<PathBuf, DownloadError> {
        let target = self.model_path(spec);
        if target.is_file() {
            tracing::info!("Model {} already present at {}", spec.id, target.display());
            return Ok(target);
        }
        fs::create_dir_all(&self.models_dir).await?;

        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());

        let partial = partial_path(&target);
        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            match self.fetch(spec, &partial, &progress, &token).await {
                Ok(()) => break Ok(()),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(
                        "Download of {} failed (attempt {}/{}): {}",
                        spec.id,
                        attempt,
                        MAX_ATTEMPTS,
                        e
                    );
                    tokio::select! {
                        _ = token.cancelled() => break Err(DownloadError::Cancelled),
                        _ = tokio::time::sleep(RETRY_BACKOFF * attempt) => {}
                    }
                }
                Err(e) => break Err(e),
            }
        };

        self.cancel.lock().unwrap_or_else(PoisonError::into_inner).take();
        result?;

        fs::rename(&partial, &target).await?;
        tracing::info!("Downloaded {} to {}", spec.id, target.display());
        Ok(target)
    }

    async fn fetch(
        &self,
        spec: &ModelSpec,
        partial: &Path,
        progress: &mpsc::Sender<DownloadProgress>,
        token: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let existing = match fs::metadata(partial).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let mut req = self.client.get(&spec.url);
        if existing > 0 {
            req = req.header(header::RANGE, format!("bytes={}-", existing));
        }

        let response = tokio::select! {
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            response = req.send() => response.map_err(|e| DownloadError::Network(e.to_string()))?,
        };

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE && existing > 0 {
            // The partial file already holds the whole body.
            return Ok(());
        }
        if !status.is_success() {
            return Err(DownloadError::Http(status));
        }

        let resumed = status == StatusCode::PARTIAL_CONTENT;
        let mut downloaded = if resumed { existing } else { 0 };
        let total = response
            .content_length()
            .map(|len| len + downloaded)
            .or(spec.size_bytes);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(resumed)
            .truncate(!resumed)
            .open(partial)
            .await?;

        let _ = progress.try_send(DownloadProgress::new(downloaded, total));

        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                _ = token.cancelled() => {
                    file.flush().await?;
                    return Err(DownloadError::Cancelled);
                }
                chunk = stream.next() => chunk,
            };
            let bytes = match chunk {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    file.flush().await?;
                    return Err(DownloadError::Network(e.to_string()));
                }
                None => break,
            };
            file.write_all(&bytes).await?;
            downloaded += bytes.len() as u64;
            // Progress is advisory; drop updates if the receiver lags.
            let _ = progress.try_send(DownloadProgress::new(downloaded, total));
        }

        file.flush().await?;
        Ok(())
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        let p = DownloadProgress::new(250, Some(1000));
        assert_eq!(p.percent, 25.0);
        assert_eq!(DownloadProgress::new(10, None).percent, 0.0);
        assert_eq!(DownloadProgress::new(10, Some(0)).percent, 0.0);
        assert_eq!(DownloadProgress::new(2000, Some(1000)).percent, 100.0);
    }

    #[test]
    fn test_partial_path_appends_suffix() {
        let p = partial_path(Path::new("/models/tiny.gguf"));
        assert_eq!(p, PathBuf::from("/models/tiny.gguf.part"));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(DownloadError::Network("reset".into()).is_retryable());
        assert!(DownloadError::Http(StatusCode::BAD_GATEWAY).is_retryable());
        assert!(!DownloadError::Http(StatusCode::NOT_FOUND).is_retryable());
        assert!(!DownloadError::Cancelled.is_retryable());
    }

    #[tokio::test]
    async fn test_unknown_model_is_rejected() {
        let downloader = ModelDownloader::new(std::env::temp_dir().join("murmur-dl-test"));
        let (tx, _rx) = mpsc::channel(4);
        let result = downloader.download("no-such-model", tx).await;
        assert!(matches!(result, Err(DownloadError::UnknownModel(_))));
    }

    #[tokio::test]
    async fn test_existing_file_is_returned_without_fetching() {
        let dir = std::env::temp_dir().join(format!("murmur-dl-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let spec = ModelSpec {
            id: "fixture".to_string(),
            name: "Fixture".to_string(),
            url: "http://127.0.0.1:9/never-fetched".to_string(),
            filename: "fixture.gguf".to_string(),
            size_bytes: Some(4),
        };
        std::fs::write(dir.join("fixture.gguf"), b"GGUF").unwrap();

        let downloader = ModelDownloader::new(dir.clone());
        let (tx, _rx) = mpsc::channel(4);
        let path = downloader.download_spec(&spec, tx).await.unwrap();
        assert_eq!(path, dir.join("fixture.gguf"));
        assert!(downloader.is_downloaded(&spec));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_a_failing_download() {
        let dir = std::env::temp_dir().join(format!("murmur-dl-{}", uuid::Uuid::new_v4()));
        let spec = ModelSpec {
            id: "unreachable".to_string(),
            name: "Unreachable".to_string(),
            url: "http://127.0.0.1:9/model.gguf".to_string(),
            filename: "unreachable.gguf".to_string(),
            size_bytes: None,
        };
        let downloader = std::sync::Arc::new(ModelDownloader::new(dir.clone()));
        let (tx, _rx) = mpsc::channel(4);

        let task = {
            let downloader = downloader.clone();
            tokio::spawn(async move { downloader.download_spec(&spec, tx).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        downloader.cancel_download();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(DownloadError::Cancelled)));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
