//! Vault lifecycle: link codes, joining another device's vault, unlinking.

use crate::crypto::{decrypt, encrypt};
use crate::database::RecordStore;
use crate::settings::SettingsStore;
use crate::sync::config::VaultConfig;
use crate::sync::device::DeviceRegistry;
use crate::sync::journal::SyncJournal;
use crate::sync::models::LinkCode;
use crate::{LedgerError, Result};
use std::sync::Arc;
use tracing::{info, warn};

const KEY_PROBE: &str = "test";

/// What to do with existing local history when joining a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkStrategy {
    /// Keep local records and let the next sync reconcile them.
    #[default]
    Merge,
    /// Wipe local records and the journal before joining.
    Overwrite,
}

pub struct VaultRegistry {
    records: Arc<dyn RecordStore>,
    settings: Arc<dyn SettingsStore>,
    journal: SyncJournal,
    devices: DeviceRegistry,
    device_name: String,
}

impl VaultRegistry {
    pub fn new(
        records: Arc<dyn RecordStore>,
        settings: Arc<dyn SettingsStore>,
        journal: SyncJournal,
        devices: DeviceRegistry,
        device_name: impl Into<String>,
    ) -> Self {
        Self {
            records,
            settings,
            journal,
            devices,
            device_name: device_name.into(),
        }
    }

    /// Current credentials, creating a private vault on first run.
    pub fn current(&self) -> Result<VaultConfig> {
        VaultConfig::ensure(self.settings.as_ref())
    }

    /// Code another device scans to join this vault.
    pub fn link_code(&self) -> Result<LinkCode> {
        let vault = self.current()?;
        Ok(LinkCode::new(vault.vault_id, vault.secret_key))
    }

    /// Whether linking has to ask between merge and overwrite.
    pub fn needs_link_decision(&self) -> Result<bool> {
        Ok(self.records.count()? > 0)
    }

    /// Join the vault described by `code`.
    ///
    /// Presence registration is best effort; a transport failure there
    /// leaves the link in place. The caller schedules a forced-push sync.
    pub async fn link(&self, code: &LinkCode, strategy: LinkStrategy) -> Result<VaultConfig> {
        validate_secret(&code.secret_key)?;

        if strategy == LinkStrategy::Overwrite {
            self.records.delete_all()?;
            self.journal.clear()?;
            info!("Cleared local history before linking");
        }

        let vault = VaultConfig {
            vault_id: code.vault_id.clone(),
            secret_key: code.secret_key.clone(),
            installation_id: VaultConfig::installation_id(self.settings.as_ref())?,
        };
        vault.save(self.settings.as_ref())?;
        info!(vault_id = %vault.vault_id, ?strategy, "Linked to vault");

        if let Err(e) = self.devices.register_in(&vault, &self.device_name).await {
            warn!("Device registration deferred: {}", e);
        }
        Ok(vault)
    }

    /// Leave the current vault and start a fresh private one.
    ///
    /// Presence removal must reach the old vault first; a transport failure
    /// aborts without touching local credentials.
    pub async fn unlink(&self) -> Result<VaultConfig> {
        if let Some(old) = VaultConfig::load(self.settings.as_ref())? {
            self.devices.unregister_from(&old).await?;
        }
        let fresh = VaultConfig::rotate(self.settings.as_ref())?;
        self.journal.clear()?;
        info!(vault_id = %fresh.vault_id, "Unlinked; switched to a fresh vault");
        Ok(fresh)
    }
}

fn validate_secret(secret: &str) -> Result<()> {
    let probe = encrypt(KEY_PROBE, secret);
    if probe.is_empty() || decrypt(&probe, secret) != KEY_PROBE {
        return Err(LedgerError::InvalidInput(
            "Invalid or corrupted key in link code".to_string(),
        ));
    }
    Ok(())
}
