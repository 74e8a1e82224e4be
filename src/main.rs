use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fundraise_gate::{AppState, Config, InMemoryUserStore, LogFormat, build_router, metrics};

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is normal in production
    let _ = dotenvy::dotenv();

    init_tracing(LogFormat::from_env());

    info!(
        "Starting Fundraise Gate v{}",
        env!("CARGO_PKG_VERSION")
    );

    match run().await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Run the application, returning an exit code on error.
async fn run() -> Result<(), exitcode::ExitCode> {
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {e}");
        exitcode::CONFIG
    })?;
    info!(
        host = %config.host,
        port = %config.port,
        access_ttl_secs = config.access_token_ttl.as_secs(),
        refresh_ttl_secs = config.refresh_token_ttl.as_secs(),
        proxy_sources = config.trusted_proxy_sources.len(),
        client_ip_header = %config.client_ip_header,
        "Configuration loaded"
    );

    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;

    let state = AppState::new(config, Arc::new(InMemoryUserStore::new())).map_err(|e| {
        error!("Failed to build application state: {e}");
        exitcode::SOFTWARE
    })?;
    let app = build_router(state.clone()).map_err(|e| {
        error!("Failed to build router: {e}");
        exitcode::CONFIG
    })?;

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET  /health                        - Health check");
    info!("  GET  /ready                         - Readiness check");
    info!("  POST /auth/register                 - Create account");
    info!("  POST /auth/login                    - Obtain token pair");
    info!("  POST /auth/refresh                  - Rotate token pair");
    info!("  POST /auth/logout-all               - Revoke all sessions");
    info!("  GET  /users/me                      - Current identity");
    info!("  GET  /admin/users/{{id}}              - Inspect user");
    info!("  PUT  /admin/users/{{id}}/permissions  - Set permissions");

    // Peer addresses feed client IP resolution
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires; the
/// other one still can.
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
            Ok(mut signal) => {
                signal.recv().await;
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
        () = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        () = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
