pub mod events;
pub mod progress;
pub mod queue;
pub mod settings;

pub use events::EventLog;
pub use progress::ProgressTable;
pub use queue::QueueStore;
pub use settings::SettingsStore;
