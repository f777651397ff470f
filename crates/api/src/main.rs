use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use longrun_api::background::log_sync::{self, LogSync};
use longrun_api::config::ServerConfig;
use longrun_api::router::build_app_router;
use longrun_api::state::AppState;
use longrun_db::repositories::{PgEngineLogStore, PgJobStore};
use longrun_engine::api::EngineApi;
use longrun_pipeline::orchestrator::JobOrchestrator;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "longrun_api=debug,longrun_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let pool = longrun_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    longrun_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    longrun_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Engine client ---
    let engine_config = config.engine_config();
    tracing::info!(
        base_url = %engine_config.base_url,
        api_key = %engine_config.masked_key(),
        timeout_secs = engine_config.timeout.as_secs(),
        "Engine client configured",
    );
    let engine = Arc::new(EngineApi::new(engine_config).context("Failed to build engine client")?);

    // --- Stores and orchestrator ---
    let jobs = Arc::new(PgJobStore::new(pool.clone()));
    let logs = Arc::new(PgEngineLogStore::new(pool));
    let orchestrator = JobOrchestrator::new(jobs.clone(), engine.clone(), config.orchestrator_config());
    let log_sync = Arc::new(LogSync::new(engine, logs.clone()));

    // --- Engine log sync ---
    let sync_cancel = CancellationToken::new();
    let sync_handle = match config.log_sync_interval() {
        Some(period) => Some(tokio::spawn(log_sync::run(
            Arc::clone(&log_sync),
            period,
            sync_cancel.clone(),
        ))),
        None => {
            tracing::info!("Engine log sync disabled");
            None
        }
    };

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        jobs,
        logs,
        orchestrator: Arc::clone(&orchestrator),
        log_sync,
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let host = config
        .host
        .parse()
        .with_context(|| format!("Invalid HOST address '{}'", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    sync_cancel.cancel();
    if let Some(handle) = sync_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        tracing::info!("Engine log sync stopped");
    }

    drain_jobs(&orchestrator, Duration::from_secs(config.shutdown_timeout_secs)).await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Give in-flight jobs up to `timeout` to record their outcome.
async fn drain_jobs(orchestrator: &JobOrchestrator, timeout: Duration) {
    let active = orchestrator.active_count();
    if active == 0 {
        return;
    }
    tracing::info!(active, timeout_secs = timeout.as_secs(), "Waiting for in-flight jobs");

    let drained = tokio::time::timeout(timeout, async {
        while orchestrator.active_count() > 0 {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            remaining = orchestrator.active_count(),
            "Shutting down with jobs still running; they stay in processing",
        );
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
