//! In-memory record store for tests.

use crate::database::{Record, RecordStore};
use crate::{DatabaseError, LedgerError, Result};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    records: Vec<Record>,
}

/// Record store backed by a `Vec`, mirroring [`crate::Database`] semantics.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    inner: Mutex<Inner>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `records` (ids are reassigned).
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Result<Self> {
        let store = Self::new();
        for record in records {
            store.insert(&record)?;
        }
        Ok(store)
    }

    fn inner(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| DatabaseError::LockPoisoned("memory records".to_string()).into())
    }
}

fn missing(record: &Record) -> LedgerError {
    match record.id {
        Some(id) => LedgerError::NotFound(format!("record {}", id)),
        None => LedgerError::InvalidInput(format!(
            "Record at {} has no local id",
            record.timestamp
        )),
    }
}

impl RecordStore for MemoryRecordStore {
    fn insert(&self, record: &Record) -> Result<i64> {
        let mut inner = self.inner()?;
        inner.next_id += 1;
        let id = inner.next_id;
        let mut stored = record.clone();
        stored.id = Some(id);
        inner.records.push(stored);
        Ok(id)
    }

    fn update(&self, record: &Record) -> Result<()> {
        let mut inner = self.inner()?;
        let slot = inner
            .records
            .iter_mut()
            .find(|r| r.id.is_some() && r.id == record.id)
            .ok_or_else(|| missing(record))?;
        *slot = record.clone();
        Ok(())
    }

    fn delete(&self, record: &Record) -> Result<()> {
        if record.id.is_none() {
            return Err(missing(record));
        }
        self.inner()?.records.retain(|r| r.id != record.id);
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<Record>> {
        let mut records = self.inner()?.records.clone();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(records)
    }

    fn get_by_timestamp(&self, timestamp: i64) -> Result<Option<Record>> {
        Ok(self
            .inner()?
            .records
            .iter()
            .filter(|r| r.timestamp == timestamp)
            .min_by_key(|r| r.id)
            .cloned())
    }

    fn delete_all(&self) -> Result<()> {
        self.inner()?.records.clear();
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.inner()?.records.len())
    }
}
