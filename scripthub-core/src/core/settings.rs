//! Application settings persistence for ScriptHub.
//!
//! Stores user preferences (database location, subscription limits) in a
//! JSON file at an OS-appropriate location.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::remote::DEFAULT_SCRIPT_EXTENSIONS;
use crate::core::store::DEFAULT_RECENT_LIMIT;
use crate::Result;

/// Downloads above this size need explicit confirmation.
pub const DEFAULT_SIZE_THRESHOLD_BYTES: u64 = 50 * 1024 * 1024;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Persisted application settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// SQLite file holding the library.
    pub database_path: String,
    /// Extensions (without the dot) offered by subscription previews.
    pub script_extensions: Vec<String>,
    pub size_threshold_bytes: u64,
    pub request_timeout_secs: u64,
    /// Length of the recently-copied list.
    pub recent_limit: usize,
    /// Personal access token for GitHub; the environment is consulted when unset.
    pub github_token: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: default_database_path().to_string_lossy().to_string(),
            script_extensions: DEFAULT_SCRIPT_EXTENSIONS.iter().map(|e| (*e).to_string()).collect(),
            size_threshold_bytes: DEFAULT_SIZE_THRESHOLD_BYTES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            recent_limit: DEFAULT_RECENT_LIMIT,
            github_token: None,
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The configured token, else `GITHUB_TOKEN`, else `GH_TOKEN`.
    pub fn resolve_github_token(&self) -> Option<String> {
        self.github_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| env_token("GITHUB_TOKEN"))
            .or_else(|| env_token("GH_TOKEN"))
    }
}

fn env_token(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|t| !t.trim().is_empty())
}

/// Returns the path to the settings JSON file.
///
/// - macOS / Linux: `~/.config/scripthub/settings.json`
/// - Windows: `%APPDATA%/ScriptHub/settings.json`
pub fn settings_file_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("ScriptHub").join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config").join("scripthub").join("settings.json")
    }
}

/// Returns the default database location: `<data dir>/ScriptHub/scripthub.db`.
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ScriptHub")
        .join("scripthub.db")
}

/// Loads settings from disk; returns defaults if the file is missing or corrupt.
pub fn load_settings() -> Settings {
    load_settings_from(&settings_file_path())
}

pub fn load_settings_from(path: &Path) -> Settings {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("ignoring unreadable settings at {}: {e}", path.display());
            Settings::default()
        }),
        Err(_) => Settings::default(),
    }
}

/// Saves settings to disk, creating parent directories as needed.
pub fn save_settings(settings: &Settings) -> Result<()> {
    save_settings_to(&settings_file_path(), settings)
}

pub fn save_settings_to(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;
    Ok(())
}
