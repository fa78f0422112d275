//! BetTracker horse registry
//!
//! REST API and CLI for PMU horse data: snapshot import, weekly merge of raw
//! horse records into unique horses, and read access to the result.

mod cli;
mod config;
mod import;
mod merge;
mod routes;
mod scheduler;
mod storage;
mod types;

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{load_config, open_repository, Cli, Commands};
use crate::routes::AppState;
use crate::scheduler::{run_weekly, shutdown_channel, spawn_ctrl_c_listener, wait_for_shutdown};

/// Used when `RUST_LOG` is unset. Targets are module paths of the `bettracker` binary.
const DEFAULT_LOG_FILTER: &str = "bettracker=debug,tower_http=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging; stdout is kept for command output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            no_schedule,
        } => run_server(host, port, no_schedule, cli.db).await,
        Commands::Import { input } => cli::run_import(input, cli.db),
        Commands::Merge {
            skip_failures,
            format,
        } => cli::run_merge_now(skip_failures, format, cli.db),
        Commands::Schedule => cli::run_schedule(cli.db).await,
        Commands::Horse { name, format } => cli::run_show_horse(name, format, cli.db),
    }
}

/// Run the API server.
async fn run_server(
    host: Option<String>,
    port: Option<u16>,
    no_schedule: bool,
    db: Option<PathBuf>,
) -> anyhow::Result<()> {
    // Load configuration
    let mut config = load_config(db)?;

    // Override with CLI args
    config.server.apply_overrides(host, port);

    tracing::info!("Configuration loaded");
    tracing::info!("Database path: {}", config.database.path);

    let repo = Arc::new(Mutex::new(open_repository(&config)?));

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    spawn_ctrl_c_listener(shutdown_tx);

    let scheduler = if config.merge.schedule_enabled && !no_schedule {
        let schedule = config.merge.schedule()?;
        tracing::info!("Weekly horse merge enabled: {:?}", schedule);
        Some(tokio::spawn(run_weekly(
            repo.clone(),
            schedule,
            config.merge.failure_policy,
            shutdown_rx.clone(),
        )))
    } else {
        tracing::info!("Weekly horse merge disabled");
        None
    };

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);

    // Create application state
    let state = Arc::new(AppState { repo, config });
    let app = routes::router(state);

    // Start server
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
        .await?;

    if let Some(handle) = scheduler {
        handle.await?;
    }
    tracing::info!("Server stopped");

    Ok(())
}
