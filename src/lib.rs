//! Hydra+ Backend
//!
//! Local coordination and enrichment backend bridging a browser music
//! discovery surface to a Soulseek-compatible client. Three tiers share
//! this crate: the State Service (cheap state plane), the Worker Service
//! (heavy enrichment data plane), and the plugin coordinator embedded in
//! the host P2P client.

pub mod api;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod plugin;
pub mod state_service;
pub mod store;
pub mod worker;

// Re-export commonly used types
pub use api::{EventCursor, StateApi, WorkerApi};
pub use config::{AppConfig, ConfigError};
pub use error::{AppError, ErrorResponse, Result};
pub use models::*;
pub use plugin::{Coordinator, PluginConfig, SearchResultFile, SoulseekClient, TransferSnapshot};
pub use state_service::{build_app_state, create_state_router, AppState};
pub use store::{EventLog, ProgressTable, QueueStore, SettingsStore};
pub use worker::{build_worker_state, create_worker_router, WorkerState};
