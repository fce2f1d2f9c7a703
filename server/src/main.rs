//! TaskSync Server - Main entry point.
//!
//! This binary starts the TaskSync hub with:
//! - Structured JSON logging
//! - The sync directory watcher
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//!
//! # Configuration
//!
//! See [`tasksync_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! TASKSYNC_DIR=./tasksync PORT=8000 cargo run --release --bin tasksync-server
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use tasksync_server::config::Config;
use tasksync_server::pipeline::Pipeline;
use tasksync_server::routes::{create_router, AppState};
use tasksync_server::watcher::FileWatcher;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  PORT                  - HTTP server port (default: 8000)");
            eprintln!("  TASKSYNC_DIR          - Directory with tasks.md and log.md (default: ./tasksync)");
            eprintln!("  TASKSYNC_WORKSPACE    - Root of the file tree listing (default: current dir)");
            eprintln!("  TASKSYNC_DEBOUNCE_MS  - Notification coalescing window (default: 100)");
            eprintln!("  RUST_LOG              - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    info!(
        port = config.port,
        sync_dir = %config.sync_dir.display(),
        workspace_dir = %config.workspace_dir.display(),
        debounce_ms = config.debounce.as_millis(),
        "TaskSync server starting"
    );

    let pipeline = Arc::new(Pipeline::new(&config));
    let watcher = match FileWatcher::bootstrap(Arc::clone(&pipeline), config.debounce).await {
        Ok(watcher) => watcher,
        Err(err) => {
            error!(error = %err, "Failed to start file watcher");
            return ExitCode::from(1);
        }
    };

    let app = create_router(AppState::new(pipeline));

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => {
            info!(port = config.port, address = %bind_addr, "Server listening");
            listener
        }
        Err(err) => {
            error!(error = %err, address = %bind_addr, "Failed to bind to address");
            return ExitCode::from(1);
        }
    };

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    info!("Server ready to accept connections");

    if let Err(err) = server.await {
        error!(error = %err, "Server error");
        return ExitCode::from(1);
    }

    info!("Server shutting down gracefully");
    drop(watcher);
    info!("Server shutdown complete");
    ExitCode::SUCCESS
}

/// Initialize structured logging with tracing.
///
/// JSON output, filtered by `RUST_LOG` (default `info,tower_http=debug`).
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
