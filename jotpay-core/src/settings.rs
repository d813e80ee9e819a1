//! Small durable key-value store for vault credentials and the sync journal.
//!
//! The sync engine and journal only ever talk to [`SettingsStore`], so they
//! can run against the SQLite-backed [`crate::Database`] in production and
//! against [`MemorySettings`] in tests.

use crate::{DatabaseError, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

/// Typed get/set of strings, string sets and booleans, persisted across
/// process restarts.
pub trait SettingsStore: Send + Sync {
    fn get_string(&self, key: &str) -> Result<Option<String>>;

    fn set_string(&self, key: &str, value: &str) -> Result<()>;

    fn get_string_set(&self, key: &str) -> Result<BTreeSet<String>>;

    fn set_string_set(&self, key: &str, values: &BTreeSet<String>) -> Result<()>;

    /// Remove a key of any type. Missing keys are ignored.
    fn remove(&self, key: &str) -> Result<()>;

    fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(match self.get_string(key)?.as_deref() {
            Some("true") => true,
            Some("false") => false,
            _ => default,
        })
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set_string(key, if value { "true" } else { "false" })
    }
}

#[derive(Debug, Clone)]
enum SettingValue {
    Text(String),
    Set(BTreeSet<String>),
}

/// In-memory settings store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, SettingValue>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, SettingValue>>> {
        self.values
            .lock()
            .map_err(|_| DatabaseError::LockPoisoned("settings".to_string()).into())
    }
}

impl SettingsStore for MemorySettings {
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.values()?.get(key) {
            Some(SettingValue::Text(s)) => Ok(Some(s.clone())),
            Some(SettingValue::Set(_)) => Err(DatabaseError::Serialization(format!(
                "Setting '{}' holds a string set",
                key
            ))
            .into()),
            None => Ok(None),
        }
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.values()?
            .insert(key.to_string(), SettingValue::Text(value.to_string()));
        Ok(())
    }

    fn get_string_set(&self, key: &str) -> Result<BTreeSet<String>> {
        match self.values()?.get(key) {
            Some(SettingValue::Set(set)) => Ok(set.clone()),
            Some(SettingValue::Text(_)) => Err(DatabaseError::Serialization(format!(
                "Setting '{}' holds a string",
                key
            ))
            .into()),
            None => Ok(BTreeSet::new()),
        }
    }

    fn set_string_set(&self, key: &str, values: &BTreeSet<String>) -> Result<()> {
        self.values()?
            .insert(key.to_string(), SettingValue::Set(values.clone()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_values_have_defaults() {
        let settings = MemorySettings::new();
        assert_eq!(settings.get_string("vault_id").unwrap(), None);
        assert!(settings.get_string_set("pending_deletes").unwrap().is_empty());
        assert!(settings.get_bool("flag", true).unwrap());
    }

    #[test]
    fn typed_values_roundtrip() {
        let settings = MemorySettings::new();
        settings.set_string("vault_id", "abc").unwrap();
        settings.set_bool("flag", false).unwrap();
        let set: BTreeSet<String> = ["1".to_string(), "2".to_string()].into();
        settings.set_string_set("pending_deletes", &set).unwrap();

        assert_eq!(settings.get_string("vault_id").unwrap().as_deref(), Some("abc"));
        assert!(!settings.get_bool("flag", true).unwrap());
        assert_eq!(settings.get_string_set("pending_deletes").unwrap(), set);

        settings.remove("vault_id").unwrap();
        assert_eq!(settings.get_string("vault_id").unwrap(), None);
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let settings = MemorySettings::new();
        settings.set_string("key", "value").unwrap();
        assert!(settings.get_string_set("key").is_err());
    }
}
