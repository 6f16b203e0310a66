use std::env;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{HotkeyChord, Modifier};

pub const PID_FILENAME: &str = "xpander-daemon.pid";
pub const SETTINGS_FILENAME: &str = "xpander.json";
pub const PHRASES_DIRNAME: &str = "Phrases";
pub const TOGGLE_REQUEST_FILENAME: &str = "toggle-request";
pub const RELOAD_REQUEST_FILENAME: &str = "reload-request";

/// Get the xpander configuration directory (`~/.xpander`).
pub fn get_config_dir() -> PathBuf {
    env::var("HOME")
        .map(|home| PathBuf::from(home).join(".xpander"))
        .unwrap_or_else(|_| PathBuf::from(".xpander"))
}

pub fn get_phrases_dir() -> PathBuf {
    get_config_dir().join(PHRASES_DIRNAME)
}

pub fn get_pid_file_path() -> PathBuf {
    get_config_dir().join(PID_FILENAME)
}

pub fn get_settings_path() -> PathBuf {
    get_config_dir().join(SETTINGS_FILENAME)
}

/// Marker file the CLI drops to ask the running daemon to pause/resume.
/// The daemon consumes and removes it.
pub fn get_toggle_request_path() -> PathBuf {
    get_config_dir().join(TOGGLE_REQUEST_FILENAME)
}

/// Marker file asking the daemon to reload the phrase directory now instead
/// of waiting for the mtime poll.
pub fn get_reload_request_path() -> PathBuf {
    get_config_dir().join(RELOAD_REQUEST_FILENAME)
}

/// Ensure the configuration directory tree exists, writing default settings
/// on first run.
pub fn ensure_config_dir() -> Result<PathBuf> {
    let config_dir = get_config_dir();
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }
    let phrases_dir = get_phrases_dir();
    if !phrases_dir.exists() {
        fs::create_dir_all(&phrases_dir)?;
    }
    let settings_path = get_settings_path();
    if !settings_path.exists() {
        Settings::default().save_to(&settings_path)?;
    }
    Ok(config_dir)
}

/// Check if the daemon is running according to the PID file. A stale or
/// unreadable PID file is removed and treated as not running.
pub fn is_daemon_running() -> Result<Option<u32>> {
    let pid_file = get_pid_file_path();

    if pid_file.exists() {
        match fs::read_to_string(&pid_file) {
            Ok(contents) => match contents.trim().parse::<u32>() {
                Ok(pid) => Ok(Some(pid)),
                Err(_) => {
                    let _ = fs::remove_file(&pid_file);
                    Ok(None)
                }
            },
            Err(_) => {
                let _ = fs::remove_file(&pid_file);
                Ok(None)
            }
        }
    } else {
        Ok(None)
    }
}

/// Engine settings, persisted as JSON next to the phrase directory. Missing
/// fields fall back to defaults so old files keep loading.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// One Backspace right after an expansion removes the whole expansion.
    pub backspace_undo: bool,
    /// Reserved chord toggling pause/resume; active even while paused.
    pub pause_service: Option<HotkeyChord>,
    /// Reserved chord asking the collaborator UI to show the phrase manager.
    pub show_manager: Option<HotkeyChord>,
    pub clipboard_timeout_ms: u64,
    pub command_timeout_ms: u64,
    /// How long a cached active-window lookup stays valid.
    pub window_cache_ms: u64,
    /// How many per-window match buffers are retained before LRU eviction.
    pub buffer_retention: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backspace_undo: true,
            pause_service: Some(HotkeyChord::new("p", &[Modifier::Shift, Modifier::Super])),
            show_manager: Some(HotkeyChord::new("m", &[Modifier::Shift, Modifier::Super])),
            clipboard_timeout_ms: 50,
            command_timeout_ms: 3000,
            window_cache_ms: 200,
            buffer_retention: 8,
        }
    }
}

impl Settings {
    /// Load settings from the config directory, falling back to defaults when
    /// the file is missing or unreadable.
    pub fn load() -> Self {
        Self::load_from(&get_settings_path())
    }

    pub fn load_from(path: &PathBuf) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => settings,
                Err(err) => {
                    log::warn!("invalid settings file {}: {}", path.display(), err);
                    Settings::default()
                }
            },
            Err(_) => Settings::default(),
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&get_settings_path())
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILENAME);

        let mut settings = Settings::default();
        settings.backspace_undo = false;
        settings.command_timeout_ms = 500;
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path);
        assert_eq!(loaded, settings);
    }

    #[test]
    fn missing_settings_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        assert_eq!(Settings::load_from(&path), Settings::default());
    }

    #[test]
    fn partial_settings_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILENAME);
        std::fs::write(&path, r#"{"backspace_undo": false}"#).unwrap();

        let loaded = Settings::load_from(&path);
        assert!(!loaded.backspace_undo);
        assert_eq!(loaded.command_timeout_ms, 3000);
        assert!(loaded.pause_service.is_some());
    }
}
