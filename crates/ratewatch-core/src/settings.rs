//! User settings
//!
//! Stored as JSON in the platform config directory
//! (`ProjectDirs::from("com", "ratewatch", "Ratewatch")`), or at the path in
//! `RATEWATCH_CONFIG_PATH`. A missing file means defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::services::quota::{session_log, PollMode};

/// Environment variable overriding the settings file path
pub const CONFIG_PATH_ENV: &str = "RATEWATCH_CONFIG_PATH";

/// Refresh intervals the user may pick, in seconds
pub const SUPPORTED_INTERVALS: [u64; 3] = [60, 120, 300];

/// Refresh interval used when none (or an unsupported one) is saved
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

/// Model used for remote probes when none is saved
pub const DEFAULT_MODEL: &str = "gpt-5-codex";

const SETTINGS_FILE: &str = "settings.json";

/// Keys accepted by [`Settings::get`] and [`Settings::set`]
pub const SETTINGS_KEYS: [&str; 4] = ["refresh_interval", "mode", "model", "sessions_dir"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base refresh interval in seconds
    pub refresh_interval_secs: u64,
    /// Saved poll mode; `None` until the user picks one
    pub mode: Option<PollMode>,
    /// Model for remote probes
    pub model: String,
    /// Session log root; `None` uses the default
    pub sessions_dir: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: DEFAULT_INTERVAL_SECS,
            mode: None,
            model: DEFAULT_MODEL.to_string(),
            sessions_dir: None,
        }
    }
}

impl Settings {
    /// Load from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&get_config_path()?)
    }

    /// Load from a specific file
    ///
    /// Unsupported intervals are normalized to the default.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("[settings] {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let mut settings: Settings = serde_json::from_str(&content)?;
        settings.refresh_interval_secs = normalize_interval(settings.refresh_interval_secs);
        Ok(settings)
    }

    /// Save to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        log::info!("[settings] Saved settings to {:?}", path);
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(normalize_interval(self.refresh_interval_secs))
    }

    /// Session log root, with `~` expanded
    pub fn sessions_root(&self) -> PathBuf {
        match self.sessions_dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => PathBuf::from(shellexpand::tilde(dir).into_owned()),
            _ => session_log::default_sessions_dir(),
        }
    }

    /// Saved mode, or the detected default when none is saved
    ///
    /// Without a saved mode, a Codex login or a recent session log selects
    /// local session mode.
    pub fn effective_mode(&self, codex_login: bool, recent_session: bool) -> PollMode {
        self.mode
            .unwrap_or_else(|| detect_default_mode(codex_login, recent_session))
    }

    /// Value of a settings key as text
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "refresh_interval" => Some(self.refresh_interval_secs.to_string()),
            "mode" => self.mode.map(|m| m.to_string()),
            "model" => Some(self.model.clone()),
            "sessions_dir" => self.sessions_dir.clone(),
            _ => None,
        }
    }

    /// Set a settings key from text
    ///
    /// # Errors
    ///
    /// `Error::Validation` for unknown keys and invalid values.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "refresh_interval" => {
                let secs: u64 = value
                    .parse()
                    .map_err(|_| Error::validation(format!("Invalid interval: {}", value)))?;
                if !SUPPORTED_INTERVALS.contains(&secs) {
                    return Err(Error::validation(format!(
                        "Unsupported refresh interval: {} (choose 60, 120 or 300)",
                        secs
                    )));
                }
                self.refresh_interval_secs = secs;
            }
            "mode" => {
                self.mode = Some(value.parse::<PollMode>().map_err(Error::Validation)?);
            }
            "model" => {
                if value.is_empty() {
                    return Err(Error::validation("Model cannot be empty."));
                }
                self.model = value.to_string();
            }
            "sessions_dir" => {
                self.sessions_dir = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            other => {
                return Err(Error::validation(format!("Unknown config key: {}", other)));
            }
        }
        Ok(())
    }
}

/// Map an interval to a supported one
pub fn normalize_interval(secs: u64) -> u64 {
    if SUPPORTED_INTERVALS.contains(&secs) {
        secs
    } else {
        DEFAULT_INTERVAL_SECS
    }
}

/// Mode to use when the user has not picked one
pub fn detect_default_mode(codex_login: bool, recent_session: bool) -> PollMode {
    if codex_login || recent_session {
        PollMode::LocalSession
    } else {
        PollMode::RemoteApi
    }
}

/// Directory holding the settings file and the fallback key file
pub fn get_config_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("com", "ratewatch", "Ratewatch")
        .ok_or_else(|| Error::config("Could not determine project directories"))?;
    Ok(dirs.config_dir().to_path_buf())
}

/// Settings file path
/// Priority: RATEWATCH_CONFIG_PATH env var > platform config directory
pub fn get_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(shellexpand::tilde(&path).into_owned()));
        }
    }
    Ok(get_config_dir()?.join(SETTINGS_FILE))
}
