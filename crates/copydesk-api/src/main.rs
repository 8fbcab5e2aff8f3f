//! Copydesk API server.

use anyhow::Context;
use clap::Parser;
use copydesk_api::{AppState, Backends, routes};
use copydesk_config::{LogFormat, SystemConfig, load_system_config};
use copydesk_core::SystemClock;
use copydesk_db::{PgActivityRepo, PgScheduleRepo, PgWorkItemRepo, create_pool, run_migrations};
use copydesk_scheduler::broker::PgJobBroker;
use copydesk_scheduler::BrokerConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "copydesk-server")]
#[command(about = "Copydesk content pipeline server")]
struct Args {
    /// Path to the KDL configuration file
    #[arg(short, long, env = "COPYDESK_CONFIG", default_value = "copydesk.kdl")]
    config: PathBuf,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

fn load_config(path: &Path) -> anyhow::Result<SystemConfig> {
    if path.exists() {
        return load_system_config(path)
            .with_context(|| format!("failed to load {}", path.display()));
    }
    let mut config = SystemConfig::default();
    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config)?;
    init_tracing(config.server.log_format);
    if !args.config.exists() {
        warn!(path = %args.config.display(), "config file not found, using defaults");
    }

    // Create database pool
    info!("Connecting to database...");
    let pool = create_pool(&config.database.url, config.database.max_connections).await?;
    run_migrations(&pool).await?;
    info!("Database connected");

    let collaborators = copydesk_services::collaborators_from_config(&config.services)
        .context("collaborator endpoints")?;
    let backends = Backends {
        work_items: Arc::new(PgWorkItemRepo::new(pool.clone())),
        schedules: Arc::new(PgScheduleRepo::new(pool.clone())),
        activity: Arc::new(PgActivityRepo::new(pool.clone())),
        broker: Arc::new(PgJobBroker::new(
            pool.clone(),
            BrokerConfig::from_system(&config),
        )),
        pool: Some(pool),
    };
    let state = AppState::new(backends, &config, collaborators, Arc::new(SystemClock));

    state.workers.ensure_running().await;
    if config.scheduler.autostart {
        state.scheduler.start().await;
    }

    let cancel = CancellationToken::new();
    let monitor = state.monitor.clone();
    let monitor_token = cancel.child_token();
    let stall_scan_every = (config.worker.stall_after / 2).max(Duration::from_secs(1));
    let monitor_task =
        tokio::spawn(async move { monitor.run(stall_scan_every, monitor_token).await });

    // Build router
    let app = routes::router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server
    let listener = TcpListener::bind(&config.server.listen).await?;
    info!("Starting server on {}", config.server.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
        })
        .await?;

    state.scheduler.stop().await;
    state.workers.stop().await;
    cancel.cancel();
    if let Err(e) = monitor_task.await {
        warn!(error = %e, "monitor task ended abnormally");
    }
    info!("Server stopped");

    Ok(())
}
