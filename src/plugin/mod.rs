//! Plugin coordinator hosted inside the Soulseek-compatible client.

pub mod client;
pub mod coordinator;
pub mod scoring;

pub use client::{SearchResultFile, SoulseekClient, TransferSnapshot};
pub use coordinator::{Coordinator, PluginConfig};
pub use scoring::{score_candidate, Candidate, ScoreTarget};
