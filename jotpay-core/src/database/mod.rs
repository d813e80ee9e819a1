//! Local persistence for the ledger.
//!
//! This module holds the record model, the [`RecordStore`] contract the sync
//! engine relies on, and its SQLite and in-memory implementations.

pub mod memory;
pub mod models;
pub mod schema;

pub use memory::MemoryRecordStore;
pub use models::{Nature, Record};
pub use schema::Database;

use crate::Result;

/// Record storage used by the ledger facade and the sync engine.
///
/// Every call is synchronous and durable once it returns.
pub trait RecordStore: Send + Sync {
    /// Insert a record and return its local row id.
    fn insert(&self, record: &Record) -> Result<i64>;

    /// Overwrite the record with the same local row id.
    fn update(&self, record: &Record) -> Result<()>;

    /// Remove the record with the same local row id.
    fn delete(&self, record: &Record) -> Result<()>;

    /// All records, newest timestamp first.
    fn get_all(&self) -> Result<Vec<Record>>;

    /// First record found with the given timestamp.
    fn get_by_timestamp(&self, timestamp: i64) -> Result<Option<Record>>;

    /// Remove every record.
    fn delete_all(&self) -> Result<()>;

    /// Number of stored records.
    fn count(&self) -> Result<usize> {
        Ok(self.get_all()?.len())
    }
}
