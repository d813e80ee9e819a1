//! Durable journal of local edits and deletes awaiting sync.
//!
//! Pending edits map a record timestamp to an opaque token; a newer edit on
//! the same timestamp replaces the token. The sync engine clears an edit only
//! with the token it observed, so a confirmation for an older edit can never
//! clear a newer one. Pending deletes are a plain set of timestamps.

use crate::settings::SettingsStore;
use crate::{DatabaseError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

const PENDING_EDITS_KEY: &str = "pending_edits";
const PENDING_DELETES_KEY: &str = "pending_deletes";

/// Separates timestamp and token inside one stored pending-edit element.
const EDIT_SEPARATOR: char = '|';

/// Journal over a [`SettingsStore`]. Cloning shares the same store and lock.
#[derive(Clone)]
pub struct SyncJournal {
    settings: Arc<dyn SettingsStore>,
    lock: Arc<Mutex<()>>,
}

impl SyncJournal {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            settings,
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| DatabaseError::LockPoisoned("sync journal".to_string()).into())
    }

    fn load_edits(&self) -> Result<BTreeMap<i64, String>> {
        let raw = self.settings.get_string_set(PENDING_EDITS_KEY)?;
        Ok(raw
            .iter()
            .filter_map(|entry| {
                let (ts, token) = entry.split_once(EDIT_SEPARATOR)?;
                Some((ts.parse().ok()?, token.to_string()))
            })
            .collect())
    }

    fn store_edits(&self, edits: &BTreeMap<i64, String>) -> Result<()> {
        let raw: BTreeSet<String> = edits
            .iter()
            .map(|(ts, token)| format!("{}{}{}", ts, EDIT_SEPARATOR, token))
            .collect();
        self.settings.set_string_set(PENDING_EDITS_KEY, &raw)
    }

    fn load_deletes(&self) -> Result<BTreeSet<i64>> {
        let raw = self.settings.get_string_set(PENDING_DELETES_KEY)?;
        Ok(raw.iter().filter_map(|ts| ts.parse().ok()).collect())
    }

    fn store_deletes(&self, deletes: &BTreeSet<i64>) -> Result<()> {
        let raw: BTreeSet<String> = deletes.iter().map(|ts| ts.to_string()).collect();
        self.settings.set_string_set(PENDING_DELETES_KEY, &raw)
    }

    /// Record a local edit on `timestamp`, replacing any earlier token.
    /// Returns the new token.
    pub fn queue_edit(&self, timestamp: i64) -> Result<String> {
        let _guard = self.guard()?;
        let token = Uuid::new_v4().to_string();
        let mut edits = self.load_edits()?;
        edits.insert(timestamp, token.clone());
        self.store_edits(&edits)?;
        Ok(token)
    }

    /// Live token for `timestamp`, if an edit is pending.
    pub fn pending_edit_token(&self, timestamp: i64) -> Result<Option<String>> {
        let _guard = self.guard()?;
        Ok(self.load_edits()?.remove(&timestamp))
    }

    /// Snapshot of every pending edit.
    pub fn pending_edits(&self) -> Result<BTreeMap<i64, String>> {
        let _guard = self.guard()?;
        self.load_edits()
    }

    /// Clear the pending edit on `timestamp` only if its token is still
    /// `token`. Returns `false` when the token is stale or absent.
    pub fn remove_pending_edit(&self, timestamp: i64, token: &str) -> Result<bool> {
        let _guard = self.guard()?;
        let mut edits = self.load_edits()?;
        if edits.get(&timestamp).map(String::as_str) != Some(token) {
            return Ok(false);
        }
        edits.remove(&timestamp);
        self.store_edits(&edits)?;
        Ok(true)
    }

    /// Record a local delete of the record at `timestamp`.
    pub fn queue_delete(&self, timestamp: i64) -> Result<()> {
        let _guard = self.guard()?;
        let mut deletes = self.load_deletes()?;
        if deletes.insert(timestamp) {
            self.store_deletes(&deletes)?;
        }
        Ok(())
    }

    /// Timestamps whose tombstones have not been confirmed yet.
    pub fn pending_deletes(&self) -> Result<BTreeSet<i64>> {
        let _guard = self.guard()?;
        self.load_deletes()
    }

    pub fn is_delete_pending(&self, timestamp: i64) -> Result<bool> {
        let _guard = self.guard()?;
        Ok(self.load_deletes()?.contains(&timestamp))
    }

    /// Clear a delete once its tombstone and key removal are confirmed.
    pub fn remove_pending_delete(&self, timestamp: i64) -> Result<()> {
        let _guard = self.guard()?;
        let mut deletes = self.load_deletes()?;
        if deletes.remove(&timestamp) {
            self.store_deletes(&deletes)?;
        }
        Ok(())
    }

    /// Drop every pending edit and delete.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.guard()?;
        self.settings.remove(PENDING_EDITS_KEY)?;
        self.settings.remove(PENDING_DELETES_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettings;

    fn journal() -> SyncJournal {
        SyncJournal::new(Arc::new(MemorySettings::new()))
    }

    #[test]
    fn queue_edit_replaces_token() {
        let journal = journal();
        let first = journal.queue_edit(1000).unwrap();
        let second = journal.queue_edit(1000).unwrap();

        assert_ne!(first, second);
        assert_eq!(journal.pending_edit_token(1000).unwrap(), Some(second));
        assert_eq!(journal.pending_edits().unwrap().len(), 1);
    }

    #[test]
    fn stale_token_does_not_clear_newer_edit() {
        let journal = journal();
        let stale = journal.queue_edit(1000).unwrap();
        let live = journal.queue_edit(1000).unwrap();

        assert!(!journal.remove_pending_edit(1000, &stale).unwrap());
        assert_eq!(journal.pending_edit_token(1000).unwrap(), Some(live.clone()));

        assert!(journal.remove_pending_edit(1000, &live).unwrap());
        assert!(journal.pending_edit_token(1000).unwrap().is_none());
    }

    #[test]
    fn remove_missing_edit_is_false() {
        assert!(!journal().remove_pending_edit(5, "nope").unwrap());
    }

    #[test]
    fn edits_on_different_timestamps_are_independent() {
        let journal = journal();
        let a = journal.queue_edit(1).unwrap();
        let b = journal.queue_edit(2).unwrap();

        assert!(journal.remove_pending_edit(1, &a).unwrap());
        assert_eq!(journal.pending_edit_token(2).unwrap(), Some(b));
    }

    #[test]
    fn deletes_are_a_set() {
        let journal = journal();
        journal.queue_delete(10).unwrap();
        journal.queue_delete(10).unwrap();
        journal.queue_delete(20).unwrap();
        assert_eq!(journal.pending_deletes().unwrap(), [10, 20].into());

        journal.remove_pending_delete(10).unwrap();
        assert_eq!(journal.pending_deletes().unwrap(), [20].into());
        assert!(!journal.is_delete_pending(10).unwrap());
        assert!(journal.is_delete_pending(20).unwrap());
    }

    #[test]
    fn journal_survives_new_instance_over_same_store() {
        let settings: Arc<dyn SettingsStore> = Arc::new(MemorySettings::new());
        let token = SyncJournal::new(settings.clone()).queue_edit(77).unwrap();
        SyncJournal::new(settings.clone()).queue_delete(88).unwrap();

        let reopened = SyncJournal::new(settings);
        assert_eq!(reopened.pending_edit_token(77).unwrap(), Some(token));
        assert!(reopened.pending_deletes().unwrap().contains(&88));
    }

    #[test]
    fn malformed_entries_are_ignored() {
        let settings = Arc::new(MemorySettings::new());
        let raw: BTreeSet<String> = ["garbage".to_string(), "12|tok".to_string()].into();
        settings.set_string_set(PENDING_EDITS_KEY, &raw).unwrap();

        let journal = SyncJournal::new(settings);
        assert_eq!(journal.pending_edit_token(12).unwrap().as_deref(), Some("tok"));
        assert_eq!(journal.pending_edits().unwrap().len(), 1);
    }

    #[test]
    fn clear_empties_everything() {
        let journal = journal();
        journal.queue_edit(1).unwrap();
        journal.queue_delete(2).unwrap();
        journal.clear().unwrap();
        assert!(journal.pending_edits().unwrap().is_empty());
        assert!(journal.pending_deletes().unwrap().is_empty());
    }
}
