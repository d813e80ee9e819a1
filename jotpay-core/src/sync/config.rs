//! Vault credentials and sync metadata stored in the settings store.

use crate::crypto::{derive_key, VaultKey};
use crate::settings::SettingsStore;
use crate::sync::remote::VaultPaths;
use crate::Result;
use uuid::Uuid;

const VAULT_ID_KEY: &str = "vault_id";
const SECRET_KEY_KEY: &str = "secret_key";
const INSTALLATION_ID_KEY: &str = "installation_id";
const LAST_SYNC_AT_KEY: &str = "last_sync_at";
const LAST_SYNC_MESSAGE_KEY: &str = "last_sync_message";

/// Length of generated vault secrets.
pub const SECRET_LENGTH: usize = 16;

/// Identity of the vault this installation syncs with.
#[derive(Clone, PartialEq, Eq)]
pub struct VaultConfig {
    pub vault_id: String,
    pub secret_key: String,
    pub installation_id: String,
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("vault_id", &self.vault_id)
            .field("secret_key", &"..")
            .field("installation_id", &self.installation_id)
            .finish()
    }
}

fn generate_secret() -> String {
    Uuid::new_v4().to_string().chars().take(SECRET_LENGTH).collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl VaultConfig {
    /// Stored credentials, or `None` when this installation is not linked.
    pub fn load(settings: &dyn SettingsStore) -> Result<Option<Self>> {
        let vault_id = non_empty(settings.get_string(VAULT_ID_KEY)?);
        let secret_key = non_empty(settings.get_string(SECRET_KEY_KEY)?);
        match (vault_id, secret_key) {
            (Some(vault_id), Some(secret_key)) => Ok(Some(Self {
                vault_id,
                secret_key,
                installation_id: Self::installation_id(settings)?,
            })),
            _ => Ok(None),
        }
    }

    /// Stored credentials, creating a fresh private vault on first run.
    pub fn ensure(settings: &dyn SettingsStore) -> Result<Self> {
        if let Some(config) = Self::load(settings)? {
            return Ok(config);
        }
        let config = Self {
            vault_id: Uuid::new_v4().to_string(),
            secret_key: generate_secret(),
            installation_id: Self::installation_id(settings)?,
        };
        config.save(settings)?;
        tracing::info!(vault_id = %config.vault_id, "Created new vault");
        Ok(config)
    }

    pub fn save(&self, settings: &dyn SettingsStore) -> Result<()> {
        settings.set_string(VAULT_ID_KEY, &self.vault_id)?;
        settings.set_string(SECRET_KEY_KEY, &self.secret_key)?;
        settings.set_string(INSTALLATION_ID_KEY, &self.installation_id)
    }

    /// Replace vault id and secret, keeping the installation id.
    pub fn rotate(settings: &dyn SettingsStore) -> Result<Self> {
        let config = Self {
            vault_id: Uuid::new_v4().to_string(),
            secret_key: generate_secret(),
            installation_id: Self::installation_id(settings)?,
        };
        config.save(settings)?;
        Ok(config)
    }

    /// This installation's id, generated and persisted on first use.
    pub fn installation_id(settings: &dyn SettingsStore) -> Result<String> {
        if let Some(id) = non_empty(settings.get_string(INSTALLATION_ID_KEY)?) {
            return Ok(id);
        }
        let id = Uuid::new_v4().to_string();
        settings.set_string(INSTALLATION_ID_KEY, &id)?;
        Ok(id)
    }

    pub fn key(&self) -> VaultKey {
        derive_key(&self.secret_key)
    }

    pub fn paths(&self) -> VaultPaths {
        VaultPaths::new(&self.vault_id)
    }
}

/// Result of the most recent sync run, for display.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncMetadata {
    /// Milliseconds since the epoch of the last successful run.
    pub last_sync_at: Option<i64>,
    pub last_sync_message: Option<String>,
}

impl SyncMetadata {
    pub fn load(settings: &dyn SettingsStore) -> Result<Self> {
        Ok(Self {
            last_sync_at: settings
                .get_string(LAST_SYNC_AT_KEY)?
                .and_then(|s| s.parse().ok()),
            last_sync_message: settings.get_string(LAST_SYNC_MESSAGE_KEY)?,
        })
    }

    pub fn record_success(settings: &dyn SettingsStore, at: i64, message: &str) -> Result<()> {
        settings.set_string(LAST_SYNC_AT_KEY, &at.to_string())?;
        settings.set_string(LAST_SYNC_MESSAGE_KEY, message)
    }

    pub fn record_failure(settings: &dyn SettingsStore, message: &str) -> Result<()> {
        settings.set_string(LAST_SYNC_MESSAGE_KEY, message)
    }
}
