// SPDX-License-Identifier: GPL-3.0-only
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use crx_updater::api::{ApiHandlers, HttpServer};
use crx_updater::checker::HttpUpdateChecker;
use crx_updater::config::{Config, Configurator};
use crx_updater::downloader::HttpCrxDownloader;
use crx_updater::engine::{ComponentUpdateService, Status};
use crx_updater::history::{History, HistoryRecorder, SqliteHistory};
use crx_updater::installer::{DefaultComponentInstaller, FileComponentTraits};
use crx_updater::logging::setup_logging;
use crx_updater::ping::PingManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    setup_logging(&config.log_level, config.log_json)?;

    info!("Starting crx-updater v{}", env!("CARGO_PKG_VERSION"));

    // Initialize history
    let history: Arc<dyn History> = Arc::new(SqliteHistory::new(&config.history_db_path).await?);
    info!("History initialized at {}", config.history_db_path.display());

    tokio::fs::create_dir_all(&config.components_dir).await?;
    tokio::fs::create_dir_all(&config.download_dir).await?;

    let config = Arc::new(config);
    let configurator: Arc<dyn Configurator> = config.clone();

    // Build the engine
    let checker = Arc::new(HttpUpdateChecker::new(configurator.clone())?);
    let downloader = Arc::new(HttpCrxDownloader::new(config.download_dir.clone()).await?);
    let pings = PingManager::new(configurator.clone())?;
    let (service, engine_task) =
        ComponentUpdateService::spawn(configurator, checker, downloader, pings);

    let recorder_task = HistoryRecorder::new(service.clone(), history.clone()).spawn();

    // Register file components declared in config
    for component in &config.components {
        let traits = match FileComponentTraits::from_config(component, &config.components_dir) {
            Ok(traits) => Arc::new(traits),
            Err(e) => {
                error!(component = %component.name, error = %e, "Skipping component");
                continue;
            }
        };

        let installer = Arc::new(DefaultComponentInstaller::new(traits));
        let scan = Arc::clone(&installer);
        match tokio::task::spawn_blocking(move || scan.load_installed()).await? {
            Ok(Some(installed)) => {
                info!(component = %component.name, version = %installed.version, "Found installed version");
            }
            Ok(None) => {
                info!(component = %component.name, "Component not installed yet");
            }
            Err(e) => {
                warn!(component = %component.name, error = %e, "Failed to scan installed versions");
            }
        }

        match service.register_component(installer.crx_component()).await {
            Status::Ok | Status::Replaced => {}
            status => {
                error!(component = %component.name, ?status, "Failed to register component");
            }
        }
    }

    service.start();

    // Start HTTP server
    let http_server = HttpServer::new(
        ApiHandlers::new(service.clone(), history),
        config.local_api_bind,
    );
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.serve().await {
            error!(error = %e, "HTTP server error");
        }
    });

    info!("All services started. Waiting for shutdown signal...");

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal (Ctrl+C)");
        }
        Err(err) => {
            error!(error = %err, "Unable to listen for shutdown signal");
        }
    }

    // Graceful shutdown
    info!("Initiating graceful shutdown...");

    http_task.abort();
    recorder_task.abort();
    service.shutdown();

    // Let an in-flight download or install finish
    match tokio::time::timeout(tokio::time::Duration::from_secs(30), engine_task).await {
        Ok(_) => info!("Update engine finished"),
        Err(_) => warn!("Update engine did not finish in time"),
    }

    info!("Shutdown complete");
    Ok(())
}
