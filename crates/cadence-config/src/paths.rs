//! Platform-specific configuration paths.
//!
//! - Linux: `~/.config/cadence/`
//! - macOS: `~/Library/Application Support/cadence/`
//! - Windows: `%APPDATA%\cadence\`

use std::path::PathBuf;

use crate::error::ConfigError;

/// Application name used for directory paths.
const APP_NAME: &str = "cadence";

/// File name of the engine configuration inside the config directory.
pub const CONFIG_FILE_NAME: &str = "engine.toml";

/// Returns the user-specific configuration directory.
///
/// Returns a fallback path if the config directory cannot be determined.
pub fn user_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Path of the engine configuration file `load_or_default` reads.
pub fn default_config_path() -> PathBuf {
    user_config_dir().join(CONFIG_FILE_NAME)
}

/// Creates the user configuration directory if it does not exist.
pub fn ensure_user_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = user_config_dir();
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| ConfigError::create_dir(&dir, e))?;
    }
    Ok(dir)
}
