//! State Service binary: loopback HTTP server on port 3847.

use hydra_plus_backend::config::AppConfig;
use hydra_plus_backend::state_service::{build_app_state, create_state_router, spawn_cleanup};
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

    let state = build_app_state(&config);
    spawn_cleanup(state.clone());
    let router = create_state_router(state);

    let listener = match tokio::net::TcpListener::bind(config.state_addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(addr = %config.state_addr, %error, "Failed to bind; is another instance running?");
            std::process::exit(1);
        }
    };

    tracing::info!(addr = %config.state_addr, "State service listening");

    let serve = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());
    if let Err(error) = serve.await {
        tracing::error!(%error, "Server error");
        std::process::exit(1);
    }

    tracing::info!("State service stopped");
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "Failed to listen for shutdown signal");
    }
}
