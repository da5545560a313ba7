/// Service setup and initialization
///
/// Wires together storage, the workflow engine and the cron scheduler, and
/// serves the health endpoint until Ctrl-C.

use crate::{
    config::Config,
    runtime::{engine::WorkflowEngine, scheduler::{TokioCronBackend, WorkflowScheduler}},
    workflow::storage::{SqliteRepository, WorkflowRepository},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::{path::Path, sync::Arc};
use tokio::net::TcpListener;

/// Running components of the service
pub struct App {
    pub engine: Arc<WorkflowEngine>,
    pub scheduler: Arc<WorkflowScheduler>,
    pub router: Router,
}

/// Build storage, engine and scheduler, and register scheduled workflows
pub async fn create_app(config: &Config) -> Result<App> {
    ensure_database_dir(&config.database.url)?;

    tracing::info!("🗄️ Opening workflow database: {}", config.database.url);
    let repository: Arc<dyn WorkflowRepository> = Arc::new(
        SqliteRepository::connect(&config.database.url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open workflow database: {}", e))?,
    );

    tracing::info!("🚀 Initializing workflow engine");
    let engine = Arc::new(WorkflowEngine::from_config(
        Arc::clone(&repository),
        &config.engine,
        &config.services,
    ));

    tracing::info!("⏰ Initializing cron scheduler");
    let backend = TokioCronBackend::new()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize cron scheduler: {}", e))?;
    let scheduler = Arc::new(WorkflowScheduler::new(Arc::clone(&engine), Arc::new(backend)));
    scheduler
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start cron scheduler: {}", e))?;

    let router = Router::new().route("/healthz", get(health_check));

    tracing::info!("✅ Application initialized successfully");
    Ok(App { engine, scheduler, router })
}

/// Start the service with the given configuration
///
/// Serves until Ctrl-C, then stops the scheduler and cancels in-flight executions.
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Flowgrid engine...");

    let app = create_app(&config).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Health endpoint listening on http://{}/healthz", bind_addr);

    axum::serve(listener, app.router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = app.scheduler.stop().await {
        tracing::warn!("⚠️ Scheduler did not stop cleanly: {}", e);
    }
    app.engine.shutdown().await;
    tracing::info!("👋 Flowgrid stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("⏹️ Shutdown signal received");
}

/// Create the parent directory of a file-backed SQLite URL
fn ensure_database_dir(url: &str) -> Result<()> {
    let Some(path) = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:")) else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        tracing::info!("📁 Ensuring database directory exists: {}", parent.display());
        std::fs::create_dir_all(parent).map_err(|e| {
            anyhow::anyhow!("Failed to create database directory '{}': {}", parent.display(), e)
        })?;
    }
    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
