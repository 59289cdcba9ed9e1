//! Platform-specific locations for derivepass files

use std::path::PathBuf;

const APP_DIR: &str = "derivepass";

/// Get the platform-specific data directory
///
/// Returns:
/// - Windows: %LOCALAPPDATA%\derivepass
/// - macOS: ~/Library/Application Support/derivepass
/// - Linux/Other: ~/.local/share/derivepass
pub fn get_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".data")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

/// Get the platform-specific config directory
///
/// Returns:
/// - Windows: %APPDATA%\derivepass
/// - macOS: ~/Library/Application Support/derivepass
/// - Linux/Other: ~/.config/derivepass
pub fn get_config_dir() -> PathBuf {
    let base = dirs::config_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

/// Default location of the record database
pub fn get_default_store_path() -> PathBuf {
    get_data_dir().join("derivepass.db")
}

/// Default location of the client configuration file
pub fn get_default_config_path() -> PathBuf {
    get_config_dir().join("config.toml")
}

/// Ensure the data directory exists, creating it if necessary
pub fn ensure_data_dir() -> std::io::Result<PathBuf> {
    let dir = get_data_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
