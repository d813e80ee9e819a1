//! Remote tree stored in a shared SQLite file.
//!
//! Several ledgers pointed at the same file behave like devices linked
//! through one hosted tree. Failures surface as transport errors so the
//! sync engine treats them like an unreachable remote.

use crate::sync::remote::{direct_child, normalize, RemoteStore, RemoteValue};
use crate::{LedgerError, Result};
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone)]
pub struct SqliteRemoteStore {
    conn: Arc<Mutex<Connection>>,
}

fn transport(e: rusqlite::Error) -> LedgerError {
    LedgerError::Transport(e.to_string())
}

fn to_sql(value: RemoteValue) -> Value {
    match value {
        RemoteValue::Integer(n) => Value::Integer(n),
        RemoteValue::Text(s) => Value::Text(s),
    }
}

fn from_sql(value: Value) -> Option<RemoteValue> {
    match value {
        Value::Integer(n) => Some(RemoteValue::Integer(n)),
        Value::Text(s) => Some(RemoteValue::Text(s)),
        _ => None,
    }
}

impl SqliteRemoteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(transport)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
            .map_err(transport)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(transport)?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS nodes (
                path TEXT PRIMARY KEY,
                value NOT NULL
            );",
        )
        .map_err(transport)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| LedgerError::Transport(format!("Lock error: {}", e)))
    }
}

#[async_trait]
impl RemoteStore for SqliteRemoteStore {
    async fn get(&self, path: &str) -> Result<Option<RemoteValue>> {
        let conn = self.conn()?;
        let value: Option<Value> = conn
            .query_row(
                "SELECT value FROM nodes WHERE path = ?1",
                [normalize(path)],
                |row| row.get(0),
            )
            .optional()
            .map_err(transport)?;
        Ok(value.and_then(from_sql))
    }

    async fn children(&self, path: &str) -> Result<BTreeMap<String, RemoteValue>> {
        let parent = normalize(path);
        let prefix = format!("{}/", parent);
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT path, value FROM nodes WHERE substr(path, 1, length(?1)) = ?1")
            .map_err(transport)?;
        let rows = stmt
            .query_map([&prefix], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Value>(1)?))
            })
            .map_err(transport)?;

        let mut children = BTreeMap::new();
        for row in rows {
            let (key, value) = row.map_err(transport)?;
            if let (Some(child), Some(value)) = (direct_child(parent, &key), from_sql(value)) {
                children.insert(child.to_string(), value);
            }
        }
        Ok(children)
    }

    async fn set(&self, path: &str, value: RemoteValue) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO nodes (path, value) VALUES (?1, ?2)
                 ON CONFLICT(path) DO UPDATE SET value = excluded.value",
                params![normalize(path), to_sql(value)],
            )
            .map_err(transport)?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let target = normalize(path);
        self.conn()?
            .execute(
                "DELETE FROM nodes WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2",
                params![target, format!("{}/", target)],
            )
            .map_err(transport)?;
        Ok(())
    }
}
