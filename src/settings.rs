//! Typed configuration values the core consumes.
//!
//! The file is optional — a missing file yields `Settings::default()`.
//! Every field carries `#[serde(default)]` semantics so any subset of keys
//! can be specified; the shell owns where the file lives and when it is
//! written back.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in settings file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Settings file exceeds the maximum allowed size.
    #[error("Settings file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Settings
// ============================================================================

/// Configuration keys consumed by the core.
///
/// Values are plain typed settings; the core never interprets them beyond
/// their documented meaning. The shell may expose more keys of its own in
/// the same file — unknown keys are ignored.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Default per-subscription item cap applied when a subscription uses
    /// `CacheLimit::Default`. 0 = unlimited.
    pub default_max_items: u32,

    /// Global auto-update interval in minutes, used by subscriptions with
    /// `update_interval == -1`. 0 = no automatic updates.
    pub default_update_interval: i64,

    /// Network timeout in seconds for HTTP fetches.
    pub network_timeout: u64,

    /// Where enclosure downloads land.
    pub enclosure_download_path: PathBuf,

    /// Last zoom level of the item view; stored for the shell.
    pub last_zoom_level: i32,

    /// strftime-style date format for item rendering; stored for the shell.
    pub date_format: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_max_items: 100,
            default_update_interval: 60,
            network_timeout: 60,
            enclosure_download_path: PathBuf::from("."),
            last_zoom_level: 100,
            date_format: "%b %d %H:%M".to_string(),
        }
    }
}

impl Settings {
    /// Maximum settings file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load settings from a TOML file.
    ///
    /// - Missing file → `Ok(Settings::default())`
    /// - Empty file → `Ok(Settings::default())`
    /// - Invalid TOML → `Err(SettingsError::Parse)` with line info
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(SettingsError::TooLarge(format!(
                    "Settings file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No settings file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(SettingsError::Io(e)),
            Ok(_) => {}
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }
}
