//! Database schema and connection management.

use crate::database::{Nature, Record, RecordStore};
use crate::settings::SettingsStore;
use crate::{DatabaseError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Current schema version. Incremented when the schema changes.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Main database connection and schema manager.
///
/// Holds the ledger records and the settings/journal key-value table in one
/// SQLite file.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).map_err(DatabaseError::Sqlite)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(DatabaseError::Sqlite)?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize_schema()?;
        db.validate_schema_version()?;
        Ok(db)
    }

    /// Create a new in-memory database for testing
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(DatabaseError::Sqlite)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize the database schema
    pub fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS db_metadata (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                original_text TEXT NOT NULL,
                amount REAL NOT NULL,
                description TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                nature TEXT NOT NULL DEFAULT 'NORMAL',
                obligation_amount REAL NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_records_timestamp ON records(timestamp);",
        )
        .map_err(DatabaseError::Sqlite)?;

        conn.execute(
            "INSERT OR IGNORE INTO db_metadata (id, version, created_at) VALUES (1, ?1, ?2)",
            params![CURRENT_SCHEMA_VERSION, chrono::Utc::now().timestamp()],
        )
        .map_err(DatabaseError::Sqlite)?;

        Ok(())
    }

    /// Refuse files written by a different schema version.
    fn validate_schema_version(&self) -> Result<()> {
        let version: i32 = self
            .conn()?
            .query_row("SELECT version FROM db_metadata WHERE id = 1", [], |row| {
                row.get(0)
            })
            .map_err(DatabaseError::Sqlite)?;

        if version == CURRENT_SCHEMA_VERSION {
            Ok(())
        } else {
            Err(DatabaseError::Other(format!(
                "Schema version mismatch: expected {}, found {}",
                CURRENT_SCHEMA_VERSION, version
            ))
            .into())
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DatabaseError::LockPoisoned("database".to_string()).into())
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Record> {
    let nature: String = row.get(5)?;
    Ok(Record {
        id: Some(row.get(0)?),
        original_text: row.get(1)?,
        amount: row.get(2)?,
        description: row.get(3)?,
        timestamp: row.get(4)?,
        nature: Nature::parse(&nature),
        obligation_amount: row.get(6)?,
    })
}

fn require_id(record: &Record) -> Result<i64> {
    record.id.ok_or_else(|| {
        crate::LedgerError::InvalidInput(format!(
            "Record at {} has no local id",
            record.timestamp
        ))
    })
}

const RECORD_COLUMNS: &str =
    "id, original_text, amount, description, timestamp, nature, obligation_amount";

impl RecordStore for Database {
    fn insert(&self, record: &Record) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO records (original_text, amount, description, timestamp, nature, obligation_amount)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.original_text,
                record.amount,
                record.description,
                record.timestamp,
                record.nature.as_str(),
                record.obligation_amount,
            ],
        )
        .map_err(DatabaseError::Sqlite)?;
        Ok(conn.last_insert_rowid())
    }

    fn update(&self, record: &Record) -> Result<()> {
        let id = require_id(record)?;
        let changed = self
            .conn()?
            .execute(
                "UPDATE records SET
                    original_text = ?1, amount = ?2, description = ?3,
                    timestamp = ?4, nature = ?5, obligation_amount = ?6
                 WHERE id = ?7",
                params![
                    record.original_text,
                    record.amount,
                    record.description,
                    record.timestamp,
                    record.nature.as_str(),
                    record.obligation_amount,
                    id,
                ],
            )
            .map_err(DatabaseError::Sqlite)?;

        if changed == 0 {
            return Err(crate::LedgerError::NotFound(format!("record {}", id)));
        }
        Ok(())
    }

    fn delete(&self, record: &Record) -> Result<()> {
        let id = require_id(record)?;
        self.conn()?
            .execute("DELETE FROM records WHERE id = ?1", [id])
            .map_err(DatabaseError::Sqlite)?;
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<Record>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM records ORDER BY timestamp DESC, id DESC",
                RECORD_COLUMNS
            ))
            .map_err(DatabaseError::Sqlite)?;

        let records = stmt
            .query_map([], record_from_row)
            .map_err(DatabaseError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(DatabaseError::Sqlite)?;
        Ok(records)
    }

    fn get_by_timestamp(&self, timestamp: i64) -> Result<Option<Record>> {
        let record = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT {} FROM records WHERE timestamp = ?1 ORDER BY id LIMIT 1",
                    RECORD_COLUMNS
                ),
                [timestamp],
                record_from_row,
            )
            .optional()
            .map_err(DatabaseError::Sqlite)?;
        Ok(record)
    }

    fn delete_all(&self) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM records", [])
            .map_err(DatabaseError::Sqlite)?;
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
            .map_err(DatabaseError::Sqlite)?;
        Ok(count as usize)
    }
}

impl SettingsStore for Database {
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()?
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(DatabaseError::Sqlite)?;
        Ok(value)
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(DatabaseError::Sqlite)?;
        Ok(())
    }

    fn get_string_set(&self, key: &str) -> Result<BTreeSet<String>> {
        match self.get_string(key)? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| DatabaseError::Serialization(e.to_string()).into()),
            None => Ok(BTreeSet::new()),
        }
    }

    fn set_string_set(&self, key: &str, values: &BTreeSet<String>) -> Result<()> {
        let json =
            serde_json::to_string(values).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.set_string(key, &json)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM settings WHERE key = ?1", [key])
            .map_err(DatabaseError::Sqlite)?;
        Ok(())
    }
}
