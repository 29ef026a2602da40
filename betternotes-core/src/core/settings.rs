//! Client settings persistence for Better Notes.
//!
//! Stores the API location, the offline cache location and editor timing in a
//! JSON file at an OS-appropriate location.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::Result;

/// Persisted client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Base URL of the notes API, e.g. `https://notes.example.com/api`.
    pub api_base_url: String,
    /// SQLite file holding the offline cache.
    pub cache_path: String,
    /// Quiescence window before an edit is saved.
    pub save_debounce_ms: u64,
    pub request_timeout_secs: u64,
    /// Create a welcome note when the first sync finds no notes.
    pub seed_welcome_note: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            cache_path: default_cache_path().to_string_lossy().to_string(),
            save_debounce_ms: 500,
            request_timeout_secs: 10,
            seed_welcome_note: true,
        }
    }
}

impl ClientSettings {
    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Returns the path to the settings JSON file.
///
/// - macOS / Linux: `~/.config/betternotes/settings.json`
/// - Windows: `%APPDATA%/BetterNotes/settings.json`
pub fn settings_file_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("BetterNotes").join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config").join("betternotes").join("settings.json")
    }
}

/// Returns the default cache file: `<data dir>/BetterNotes/cache.db`.
pub fn default_cache_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".local")
                .join("share")
        })
        .join("BetterNotes")
        .join("cache.db")
}

/// Loads settings from the default location.
pub fn load_settings() -> ClientSettings {
    load_settings_from(&settings_file_path())
}

/// Loads settings from `path`; returns defaults if the file is missing or corrupt.
pub fn load_settings_from(path: &Path) -> ClientSettings {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("Ignoring corrupt settings file {}: {e}", path.display());
            ClientSettings::default()
        }),
        Err(_) => ClientSettings::default(),
    }
}

pub fn save_settings(settings: &ClientSettings) -> Result<()> {
    save_settings_to(&settings_file_path(), settings)
}

/// Saves settings to `path`, creating parent directories as needed.
pub fn save_settings_to(path: &Path, settings: &ClientSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;
    Ok(())
}
