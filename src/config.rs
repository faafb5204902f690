//! Application configuration module
//!
//! Centralized, environment-aware configuration for both loopback services.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Default State Service port.
pub const STATE_SERVICE_PORT: u16 = 3847;
/// Default Worker Service port.
pub const WORKER_SERVICE_PORT: u16 = 3848;

/// Complete application configuration.
///
/// Both services bind loopback only; non-local traffic is refused by
/// construction rather than by filtering.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub state_addr: SocketAddr,
    pub worker_addr: SocketAddr,
    /// Directory holding the queue, credentials, and debug-settings files.
    pub server_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);
        Self {
            state_addr: SocketAddr::new(loopback, STATE_SERVICE_PORT),
            worker_addr: SocketAddr::new(loopback, WORKER_SERVICE_PORT),
            server_dir: PathBuf::from("Server"),
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment, falling back to defaults.
    ///
    /// Recognized variables: `HYDRA_STATE_PORT`, `HYDRA_WORKER_PORT`,
    /// `HYDRA_SERVER_DIR`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("HYDRA_STATE_PORT") {
            config.state_addr.set_port(parse_port("HYDRA_STATE_PORT", &port)?);
        }
        if let Ok(port) = std::env::var("HYDRA_WORKER_PORT") {
            config.worker_addr.set_port(parse_port("HYDRA_WORKER_PORT", &port)?);
        }
        if let Ok(dir) = std::env::var("HYDRA_SERVER_DIR") {
            config.server_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    pub fn queue_file(&self) -> PathBuf {
        self.server_dir.join("nicotine-queue.json")
    }

    pub fn credentials_file(&self) -> PathBuf {
        self.server_dir.join("spotify-credentials.json")
    }

    pub fn debug_settings_file(&self) -> PathBuf {
        self.server_dir.join("debug-settings.json")
    }

    /// Base URL of the State Service as seen by its loopback peers.
    pub fn state_base_url(&self) -> String {
        format!("http://{}", self.state_addr)
    }

    /// Base URL of the Worker Service as seen by its loopback peers.
    pub fn worker_base_url(&self) -> String {
        format!("http://{}", self.worker_addr)
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{value}' is not a valid port"),
    })
}
