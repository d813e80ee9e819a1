//! Device presence in the vault's `devices` subtree.
//!
//! Display only; presence never takes part in conflict resolution.

use crate::settings::SettingsStore;
use crate::sync::config::VaultConfig;
use crate::sync::models::DeviceInfo;
use crate::sync::remote::{RemoteStore, RemoteValue};
use crate::{LedgerError, Result};
use std::sync::Arc;

#[derive(Clone)]
pub struct DeviceRegistry {
    settings: Arc<dyn SettingsStore>,
    remote: Arc<dyn RemoteStore>,
}

impl DeviceRegistry {
    pub fn new(settings: Arc<dyn SettingsStore>, remote: Arc<dyn RemoteStore>) -> Self {
        Self { settings, remote }
    }

    fn vault(&self) -> Result<VaultConfig> {
        VaultConfig::load(self.settings.as_ref())?.ok_or(LedgerError::NotLinked)
    }

    /// Announce this installation under `name` in the current vault.
    pub async fn register(&self, name: &str) -> Result<()> {
        let vault = self.vault()?;
        self.register_in(&vault, name).await
    }

    pub(crate) async fn register_in(&self, vault: &VaultConfig, name: &str) -> Result<()> {
        let path = vault.paths().device(&vault.installation_id);
        self.remote.set(&path, RemoteValue::from(name)).await?;
        tracing::debug!(vault_id = %vault.vault_id, "Registered device presence");
        Ok(())
    }

    /// Remove this installation from the current vault's device list.
    pub async fn unregister(&self) -> Result<()> {
        let vault = self.vault()?;
        self.unregister_from(&vault).await
    }

    pub(crate) async fn unregister_from(&self, vault: &VaultConfig) -> Result<()> {
        self.remote
            .remove(&vault.paths().device(&vault.installation_id))
            .await
    }

    /// Devices registered in the current vault, current one flagged.
    pub async fn list(&self) -> Result<Vec<DeviceInfo>> {
        let vault = self.vault()?;
        let devices = self.remote.children(&vault.paths().devices()).await?;
        Ok(devices
            .into_iter()
            .map(|(installation_id, value)| DeviceInfo {
                is_current: installation_id == vault.installation_id,
                device_name: match value {
                    RemoteValue::Text(name) => name,
                    RemoteValue::Integer(n) => n.to_string(),
                },
                installation_id,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettings;
    use crate::sync::remote::MemoryRemoteStore;

    fn registry() -> (DeviceRegistry, Arc<MemoryRemoteStore>, VaultConfig) {
        let settings = Arc::new(MemorySettings::new());
        let vault = VaultConfig::ensure(settings.as_ref()).unwrap();
        let remote = Arc::new(MemoryRemoteStore::new());
        (DeviceRegistry::new(settings, remote.clone()), remote, vault)
    }

    #[tokio::test]
    async fn register_and_list() {
        let (devices, remote, vault) = registry();
        devices.register("Pixel").await.unwrap();
        remote
            .set(&vault.paths().device("other"), "Tablet".into())
            .await
            .unwrap();

        let list = devices.list().await.unwrap();
        assert_eq!(list.len(), 2);
        let me = list.iter().find(|d| d.is_current).unwrap();
        assert_eq!(me.device_name, "Pixel");
        assert_eq!(me.installation_id, vault.installation_id);
        assert!(list.iter().any(|d| !d.is_current && d.device_name == "Tablet"));
    }

    #[tokio::test]
    async fn unregister_removes_only_this_device() {
        let (devices, remote, vault) = registry();
        devices.register("Pixel").await.unwrap();
        remote
            .set(&vault.paths().device("other"), "Tablet".into())
            .await
            .unwrap();

        devices.unregister().await.unwrap();
        let list = devices.list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].installation_id, "other");
    }

    #[tokio::test]
    async fn unlinked_registry_reports_not_linked() {
        let devices = DeviceRegistry::new(
            Arc::new(MemorySettings::new()),
            Arc::new(MemoryRemoteStore::new()),
        );
        assert!(matches!(
            devices.list().await,
            Err(LedgerError::NotLinked)
        ));
    }
}
