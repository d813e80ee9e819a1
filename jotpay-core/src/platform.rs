//! Platform-specific locations and defaults

use std::path::PathBuf;

/// Get the platform-specific data directory for the ledger
///
/// Returns:
/// - Windows: %LOCALAPPDATA%\JotPay
/// - macOS: ~/Library/Application Support/JotPay
/// - Linux/Other: ~/.local/share/JotPay
pub fn get_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".data")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join("JotPay")
}

/// Get the platform-specific config directory
pub fn get_config_dir() -> PathBuf {
    let base = dirs::config_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join("JotPay")
}

pub fn get_default_config_path() -> PathBuf {
    get_config_dir().join("jotpay.toml")
}

/// Get the default local ledger database path
pub fn get_default_ledger_path() -> PathBuf {
    get_data_dir().join("ledger.db")
}

/// Get the default shared remote tree path
pub fn get_default_remote_path() -> PathBuf {
    get_data_dir().join("remote.db")
}

/// Name shown in the vault's device list when none is configured
pub fn get_default_device_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("{} device", get_platform()))
}

/// Get current platform as a string
pub fn get_platform() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else {
        "unknown"
    }
}
