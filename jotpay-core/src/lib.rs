//! JotPay Ledger Core Library
//!
//! This library provides the background synchronization engine that lets
//! several devices share one encrypted transaction history through a plain
//! remote key-value tree, together with the local stores, the mutation
//! journal and the vault lifecycle it depends on.

pub mod config;
pub mod crypto;
pub mod database;
pub mod ledger;
pub mod platform;
pub mod settings;
pub mod sync;

pub use config::{LedgerConfig, SyncOptions};
pub use crypto::{decrypt, derive_key, encrypt, CryptoError, VaultKey};
pub use database::{Database, MemoryRecordStore, Nature, Record, RecordStore};
pub use ledger::{Ledger, Totals};
pub use settings::{MemorySettings, SettingsStore};
pub use sync::{
    generate_stable_id, JobStatus, LinkCode, LinkStrategy, MemoryRemoteStore, RemoteStore,
    SqliteRemoteStore, SyncEngine, SyncHandle, SyncJournal, SyncOutcome, SyncReport,
    SyncRequest, SyncScheduler, VaultConfig, VaultRegistry,
};

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors raised by the local record and settings stores
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{0}")]
    Other(String),
}

/// General error type for ledger and sync operations
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed payload: {0}")]
    Parse(String),

    #[error("Device is not linked to a vault")]
    NotLinked,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::Sqlite(e))
    }
}
