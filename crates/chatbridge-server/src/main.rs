//! Chatbridge server - HTTP/WebSocket front for the room chat client.

use anyhow::Result;
use chatbridge_server::{config, event_processor, logging, routes, scheduler, state};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use config::Config;
use logging::{LogConfig, LogFormat};
use state::AppState;

/// Chatbridge server - bridges upstream chat rooms to REST and WebSocket clients.
#[derive(Parser, Debug)]
#[command(name = "chatbridge-server")]
#[command(about = "HTTP/WebSocket bridge for streaming chat rooms")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override port from config
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging (INFO level for most targets)
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging (DEBUG level, heartbeat at INFO)
    #[arg(short, long)]
    debug: bool,

    /// Enable trace logging (TRACE level for everything)
    #[arg(long)]
    trace: bool,

    /// Quiet mode (WARN and ERROR only)
    #[arg(short, long)]
    quiet: bool,

    /// Set log level for specific targets (e.g., "channel=debug" or "parser=trace")
    /// Can be specified multiple times. Targets are prefixed with "chatbridge::" automatically.
    #[arg(long = "log", value_name = "TARGET=LEVEL")]
    log_overrides: Vec<String>,

    /// Log output format
    #[arg(long = "log-format", value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_cli(
        cli.verbose,
        cli.debug,
        cli.trace,
        cli.quiet,
        cli.log_overrides,
        cli.log_format,
    );
    logging::init(&log_config);

    // A missing .env is not an error.
    dotenvy::dotenv().ok();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.apply_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    config.validate()?;

    tracing::info!(
        target: "chatbridge::startup",
        "Loaded configuration (port: {}, rooms: {})",
        config.port,
        config.rooms.len()
    );

    let state = Arc::new(AppState::new(config.clone())?);
    tracing::info!(target: "chatbridge::startup", "Initialized application state");

    event_processor::spawn_event_processor(state.clone());

    state.client.init(config.room_ids()).await?;
    tracing::info!(
        target: "chatbridge::startup",
        "Logged in as {}, {} rooms known",
        state.client.session().username(),
        state.client.list_rooms().len()
    );

    if let Some(period) = config.relogin_interval() {
        scheduler::spawn_relogin_schedule(state.client.clone(), period);
        tracing::info!(
            target: "chatbridge::startup",
            "Scheduled relogin every {} hours",
            config.relogin_interval_hours
        );
    }

    let app = routes::router(state.clone())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!(target: "chatbridge::startup", "Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(target: "chatbridge::startup", "Shutting down chat client");
    state.client.shutdown().await;

    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(target: "chatbridge::startup", "Failed to listen for Ctrl-C: {}", e);
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
                tracing::error!(target: "chatbridge::startup", "Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!(target: "chatbridge::startup", "Shutdown signal received");
}
