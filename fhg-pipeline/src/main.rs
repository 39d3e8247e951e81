//! fhg-pipeline - FHIR bundle validation service
//!
//! Accepts bundles over HTTP, runs them through the validation pipeline on
//! a bounded worker pool and serves status, reports and SSE progress.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fhg_common::config::{default_data_dir, load_toml_or_default, resolve_config_path};
use fhg_common::events::EventBus;
use fhg_pipeline::config::{PipelineConfig, MODULE_NAME};
use fhg_pipeline::db::SqliteTaskStore;
use fhg_pipeline::pipeline::{recovery, Orchestrator, PipelineService, TaskSignals, WorkerPool};
use fhg_pipeline::stages::StageExecutors;
use fhg_pipeline::store::TaskStore;
use fhg_pipeline::AppState;

/// Command-line arguments for fhg-pipeline
#[derive(Parser, Debug)]
#[command(name = "fhg-pipeline")]
#[command(about = "FHIR bundle validation pipeline")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "FHG_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the configuration file)
    #[arg(short, long)]
    bind: Option<String>,

    /// SQLite database file
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Number of pipeline workers
    #[arg(short, long)]
    workers: Option<usize>,
}

fn load_config(args: &Args) -> Result<(PipelineConfig, Option<PathBuf>)> {
    let path = resolve_config_path(args.config.as_deref(), "FHG_CONFIG", MODULE_NAME);
    let mut config: PipelineConfig = load_toml_or_default(path.as_deref())?;
    config.apply_env_overrides();

    if let Some(bind) = &args.bind {
        config.bind_address = bind.clone();
    }
    if let Some(database) = &args.database {
        config.database_path = Some(database.clone());
    }
    if let Some(workers) = args.workers {
        config.pipeline.worker_count = workers;
    }
    config.validate()?;
    Ok((config, path))
}

fn init_tracing(level: &str) {
    let default_filter = if level.contains('=') {
        level.to_string()
    } else {
        format!("fhg_pipeline={level},fhg_common={level},tower_http={level}")
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (config, config_path) = load_config(&args)?;
    init_tracing(&config.logging.level);

    info!("Starting {} v{}", MODULE_NAME, env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: compiled defaults"),
    }

    let db_path = config
        .database_path
        .clone()
        .unwrap_or_else(|| default_data_dir(MODULE_NAME).join("fhg-pipeline.db"));
    info!("Database: {}", db_path.display());
    let store: Arc<dyn TaskStore> = Arc::new(
        SqliteTaskStore::open(&db_path)
            .await
            .context("Failed to open task store")?,
    );

    let settings = config.pipeline.clone();
    let event_bus = EventBus::new(settings.event_capacity);
    let executors = StageExecutors::from_config(&config.services)
        .context("Failed to build stage executors")?;
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        event_bus.clone(),
        executors,
        settings.clone(),
    ));

    let (queue_tx, queue_rx) = mpsc::channel(settings.queue_capacity);
    let signals = TaskSignals::new();
    let service = PipelineService::new(store.clone(), event_bus.clone(), signals.clone(), queue_tx);

    let shutdown = CancellationToken::new();
    let fatal = CancellationToken::new();
    let workers = WorkerPool::spawn(
        settings.worker_count,
        queue_rx,
        orchestrator,
        signals,
        shutdown.clone(),
        fatal.clone(),
    );

    let recovered = recovery::recover(store.as_ref())
        .await
        .context("Restart recovery failed")?;
    if !recovered.is_empty() {
        // Queue may be smaller than the backlog; feed it in the background
        let requeue = service.clone();
        tokio::spawn(async move {
            if let Err(e) = requeue.requeue(recovered).await {
                warn!("Requeue of recovered tasks stopped: {}", e);
            }
        });
    }

    let state = AppState::new(service, event_bus, settings.max_bundle_bytes);
    let app = fhg_pipeline::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address))?;
    info!("Listening on http://{}", config.bind_address);
    info!("Health check: http://{}/health", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(fatal.clone()))
        .await
        .context("Server error")?;

    shutdown.cancel();
    workers.join(settings.shutdown_grace()).await;
    store.close().await;

    if fatal.is_cancelled() {
        anyhow::bail!("Task store failure; unfinished tasks resume on next start");
    }
    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C, SIGTERM or a fatal worker error
async fn shutdown_signal(fatal: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
        _ = fatal.cancelled() => {
            warn!("Fatal pipeline error, shutting down");
        },
    }
}
