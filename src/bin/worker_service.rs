//! Worker Service binary: loopback HTTP server on port 3848.

use std::sync::Arc;

use hydra_plus_backend::config::AppConfig;
use hydra_plus_backend::worker::spotify::SpotifyConfig;
use hydra_plus_backend::worker::{build_worker_state, create_worker_router, spawn_cache_cleanup};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let state = build_worker_state(&config, SpotifyConfig::default());
    spawn_cache_cleanup(Arc::clone(&state.context.covers));
    let router = create_worker_router(state);

    let listener = match tokio::net::TcpListener::bind(config.worker_addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(addr = %config.worker_addr, %error, "Failed to bind; is another instance running?");
            std::process::exit(1);
        }
    };

    tracing::info!(addr = %config.worker_addr, "Worker service listening");

    let serve = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());
    if let Err(error) = serve.await {
        tracing::error!(%error, "Server error");
        std::process::exit(1);
    }

    tracing::info!("Worker service stopped");
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "Failed to listen for shutdown signal");
    }
}
