//! Persistent credentials/debug settings and the in-memory rename patterns.
//!
//! Credentials and the debug toggle survive restarts; rename patterns do
//! not need to, because the browser re-sends them on every connect.

use std::path::PathBuf;
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::AppConfig;
use crate::models::{DebugSettings, RenamePatterns, SpotifyCredentials};

use super::queue::write_atomic;

pub struct SettingsStore {
    credentials_path: PathBuf,
    debug_path: PathBuf,
    credentials: RwLock<SpotifyCredentials>,
    debug: RwLock<DebugSettings>,
    patterns: RwLock<RenamePatterns>,
}

impl SettingsStore {
    /// Load persisted settings from the server directory, defaulting each
    /// document that is absent or unreadable.
    pub fn load(config: &AppConfig) -> Self {
        if let Err(error) = std::fs::create_dir_all(&config.server_dir) {
            tracing::warn!(dir = %config.server_dir.display(), %error, "Failed to create server directory");
        }

        let credentials_path = config.credentials_file();
        let debug_path = config.debug_settings_file();

        Self {
            credentials: RwLock::new(read_document(&credentials_path)),
            debug: RwLock::new(read_document(&debug_path)),
            patterns: RwLock::new(RenamePatterns::default()),
            credentials_path,
            debug_path,
        }
    }

    pub fn credentials(&self) -> SpotifyCredentials {
        self.credentials.read().expect("settings poisoned").clone()
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials().is_present()
    }

    /// Replace credentials in memory and persist best-effort: a write
    /// failure logs a warning but does not fail the caller.
    pub async fn set_credentials(&self, credentials: SpotifyCredentials) {
        *self.credentials.write().expect("settings poisoned") = credentials.clone();
        persist_document(&self.credentials_path, &credentials).await;
    }

    pub fn debug(&self) -> DebugSettings {
        *self.debug.read().expect("settings poisoned")
    }

    pub async fn set_debug(&self, settings: DebugSettings) {
        *self.debug.write().expect("settings poisoned") = settings;
        persist_document(&self.debug_path, &settings).await;
    }

    pub fn patterns(&self) -> RenamePatterns {
        self.patterns.read().expect("settings poisoned").clone()
    }

    pub fn set_patterns(&self, patterns: RenamePatterns) {
        *self.patterns.write().expect("settings poisoned") = patterns;
    }
}

fn read_document<T: DeserializeOwned + Default>(path: &PathBuf) -> T {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|error| {
            tracing::warn!(path = %path.display(), %error, "Settings document failed to parse");
            T::default()
        }),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => T::default(),
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "Settings document unreadable");
            T::default()
        }
    }
}

async fn persist_document<T: Serialize>(path: &PathBuf, document: &T) {
    let json = match serde_json::to_vec_pretty(document) {
        Ok(json) => json,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "Failed to serialize settings");
            return;
        }
    };
    if let Err(error) = write_atomic(path, json).await {
        tracing::warn!(path = %path.display(), %error, "Failed to persist settings");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &tempfile::TempDir) -> AppConfig {
        AppConfig {
            server_dir: dir.path().to_path_buf(),
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn credentials_persist_camel_case_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(&config_in(&dir));
        assert!(!store.has_credentials());

        store
            .set_credentials(SpotifyCredentials {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            })
            .await;

        let raw = std::fs::read_to_string(dir.path().join("spotify-credentials.json")).unwrap();
        assert!(raw.contains("clientId"));

        let reloaded = SettingsStore::load(&config_in(&dir));
        assert!(reloaded.has_credentials());
        assert_eq!(reloaded.credentials().client_id, "id");
    }

    #[tokio::test]
    async fn debug_toggle_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(&config_in(&dir));
        assert!(!store.debug().debug_windows);

        store
            .set_debug(DebugSettings { debug_windows: true })
            .await;

        let reloaded = SettingsStore::load(&config_in(&dir));
        assert!(reloaded.debug().debug_windows);
    }

    #[test]
    fn patterns_default_and_replace_in_memory_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(&config_in(&dir));
        assert_eq!(store.patterns().single_track, "{artist} - {track}");

        store.set_patterns(RenamePatterns {
            single_track: "{track}".to_string(),
            album_track: "{trackNum} {track}".to_string(),
        });
        assert_eq!(store.patterns().single_track, "{track}");

        // Not persisted: a fresh load gets defaults again.
        let reloaded = SettingsStore::load(&config_in(&dir));
        assert_eq!(reloaded.patterns().single_track, "{artist} - {track}");
    }
}
