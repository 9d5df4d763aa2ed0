//! PakMirror server - main entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use pakmirror_core::{
    api::{self, AppState},
    config::Config,
    jobs::JobRegistry,
    notify, observability,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config: {}. Using defaults.", e);
        Config::default()
    });

    observability::init(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        home_dir = %config.mirror.home_dir.display(),
        "Starting PakMirror server"
    );

    let config = Arc::new(config);
    let dispatcher = notify::from_config(&config.notifications, &config.tools);

    // Build the registry and restore bookkeeping from disk
    let registry = Arc::new(JobRegistry::new(config.clone(), dispatcher));
    let recovered = registry.recover()?;
    tracing::info!(recovered, "job registry ready");

    // Build router
    let state = AppState {
        registry,
        config: config.clone(),
    };
    let app = api::build_router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to install signal handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
