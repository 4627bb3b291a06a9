//! Realtime hub server binary.
//!
//! Reads configuration from the environment and command line, starts the hub,
//! serves `/ws`, `/internal/publish` and `/health`, and on Ctrl-C or SIGTERM
//! stops accepting connections before draining every connected client.

use log::*;
use service::{config::Config, init_hub, logging::Logger, AppState};
use std::sync::Arc;
use tokio::signal;
use tokio::time::timeout;

#[tokio::main]
async fn main() {
    let config = Config::new();

    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to start logger: {e}");
    }

    info!("Starting up Realtime Hub...");
    info!("Runtime environment: {}", config.runtime_env());

    let hub = match init_hub(&config) {
        Ok(hub) => Arc::new(hub),
        Err(e) => {
            error!("Invalid hub configuration: {e}");
            std::process::exit(1);
        }
    };

    let app_state = AppState::new(config.clone(), &hub);

    if let Err(e) = web::init_server(app_state, shutdown_signal()).await {
        error!("Server error: {e}");
    }

    let shutdown_timeout = config.shutdown_timeout();
    if timeout(shutdown_timeout, hub.shutdown()).await.is_err() {
        warn!(
            "Timed out after {:?} waiting for {} client(s) to close",
            shutdown_timeout,
            hub.client_count()
        );
    }

    info!("Realtime Hub stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
