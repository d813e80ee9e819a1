//! Ledger configuration loaded from TOML.

use crate::platform;
use crate::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncOptions {
    /// Attempts per job before reporting failure.
    pub max_attempts: u32,
    /// Backoff unit; attempt `n` waits `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
    /// Runs allowed at once across all vaults.
    pub max_concurrent_runs: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_ms: 2_000,
            max_concurrent_runs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    pub database_path: PathBuf,
    /// Shared SQLite file acting as the remote tree.
    pub remote_path: PathBuf,
    pub device_name: String,
    pub sync: SyncOptions,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: platform::get_default_ledger_path(),
            remote_path: platform::get_default_remote_path(),
            device_name: platform::get_default_device_name(),
            sync: SyncOptions::default(),
        }
    }
}

impl LedgerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| LedgerError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jotpay.toml");
        std::fs::write(
            &path,
            "device_name = \"Work laptop\"\n\n[sync]\nmax_attempts = 5\n",
        )
        .unwrap();

        let config = LedgerConfig::load(&path).unwrap();
        assert_eq!(config.device_name, "Work laptop");
        assert_eq!(config.sync.max_attempts, 5);
        assert_eq!(config.sync.retry_backoff_ms, 2_000);
        assert_eq!(config.database_path, platform::get_default_ledger_path());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let config = LedgerConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, LedgerConfig::default());
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "sync = 3").unwrap();
        assert!(matches!(
            LedgerConfig::load(&path),
            Err(LedgerError::Config(_))
        ));
    }
}
