pub mod config;
pub mod engine;
pub mod native;
pub mod providers;
pub mod upstream;

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::engine::Orchestrator;
use crate::native::container::DockerRuntime;
use crate::native::transmission::TransmissionClient;
use crate::providers::busy::TransmissionOracle;
use crate::upstream::server::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("container_wecker=info,tower_http=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting container-wecker");

    let config = config::load_config()?;
    let bind_addr = config.bind_addr();

    // Docker
    let runtime = DockerRuntime::connect()?;
    match runtime.version().await {
        Ok(version) => tracing::info!("Connected to Docker engine {}", version),
        Err(err) => tracing::warn!("Docker not reachable yet ({}). Wakes will fail until it is.", err),
    }

    // Transmission
    let transmission = Arc::new(TransmissionClient::new(
        &config.transmission.rpc_url,
        config.request_timeout(),
    )?);
    let oracle = Arc::new(TransmissionOracle::new(transmission.clone(), config.breaker()));
    tracing::info!(url = %transmission.url(), "Transmission busy check configured");

    let settings = config.watch_settings();
    let orchestrator = Orchestrator::new(Arc::new(runtime), oracle, settings);
    tracing::info!(
        inactivity_timeout_secs = settings.inactivity_timeout.as_secs(),
        poll_interval_secs = settings.poll_interval.as_secs(),
        "Inactivity watch configured"
    );

    let app = router(AppState::new(orchestrator.clone(), transmission));
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("container-wecker listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Containers keep running; only the watchers go away.
    orchestrator.shutdown();
    tracing::info!("container-wecker stopped");

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
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
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
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
    tracing::info!("Shutdown signal received");
}
