//! Typed HTTP clients the three tiers use to talk to each other, plus the
//! consumer-side event cursor.

pub mod events;
pub mod state_api;
pub mod worker_api;

pub use events::EventCursor;
pub use state_api::StateApi;
pub use worker_api::WorkerApi;
