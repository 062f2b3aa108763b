mod config;
mod models;
mod providers;
mod services;
mod ui;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use config::{AppConfig, APP_NAME, VERSION};
use models::model;
use providers::{BackendId, BackendRouter};
use services::download::{DownloadError, DownloadProgress};
use services::settings::AppSettings;
use services::{ChatController, Database, ModelDownloader, SettingsService};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!("{} {} using data dir {}", APP_NAME, VERSION, config.data_dir.display());

    let db = Arc::new(Database::open(&config.database_path()).await?);
    let settings = SettingsService::load(&db).await;

    if settings.backend == BackendId::Local {
        ensure_local_model(&config, &settings).await;
    }

    let router = BackendRouter::standard(&config, &settings)?;
    let backend = router
        .get(settings.backend)
        .or_else(|| router.get(BackendId::Remote))
        .context("No chat backend available")?;
    println!("{} {} ({})", APP_NAME, VERSION, backend.backend_id().display_name());

    let handle = ChatController::spawn(db, backend).await;

    let init = handle.clone();
    tokio::spawn(async move {
        match init.initialize_backend().await {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Backend is not ready; messages will fail until it is"),
            Err(e) => tracing::error!("{}", e),
        }
    });

    ui::terminal::run(handle).await
}

/// Fetch the configured local model if it is not on disk yet. Ctrl-C cancels
/// the download. Failures are logged; the local backend then reports the
/// missing model on startup.
async fn ensure_local_model(config: &AppConfig, settings: &AppSettings) {
    let Some(spec) = model::find_model(&settings.local_model)
        .or_else(|| model::find_model(model::DEFAULT_LOCAL_MODEL))
    else {
        return;
    };
    let downloader = Arc::new(ModelDownloader::new(config.models_dir.clone()));
    if downloader.is_downloaded(&spec) {
        return;
    }

    println!("Downloading {} (Ctrl-C to skip)...", spec.name);
    let (tx, mut rx) = mpsc::channel::<DownloadProgress>(16);
    let printer = tokio::spawn(async move {
        let mut last = -1;
        while let Some(progress) = rx.recv().await {
            let percent = progress.percent as i32;
            if percent != last {
                eprint!("\r{:3}%", percent);
                last = percent;
            }
        }
        eprintln!();
    });

    let interrupt = {
        let downloader = Arc::clone(&downloader);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                downloader.cancel_download();
            }
        })
    };
    let result = downloader.download(&spec.id, tx).await;
    interrupt.abort();
    let _ = printer.await;
    match result {
        Ok(_) => {}
        Err(DownloadError::Cancelled) => {
            println!("Download skipped; it resumes on next start.");
        }
        Err(e) => tracing::error!("Failed to download {}: {}", spec.id, e),
    }
}
