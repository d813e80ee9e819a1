//! Shared hierarchical key-value tree the devices of a vault sync through.
//!
//! Paths are `/`-separated. Leaves hold an integer or a string; removing a
//! path removes its whole subtree.

use crate::{LedgerError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Leaf value in the remote tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteValue {
    Integer(i64),
    Text(String),
}

impl RemoteValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Integer(_) => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::Text(s) => s.parse().ok(),
        }
    }
}

impl From<i64> for RemoteValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<String> for RemoteValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for RemoteValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Transport to the remote tree. Every failure is a [`LedgerError::Transport`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Leaf value at `path`, if any.
    async fn get(&self, path: &str) -> Result<Option<RemoteValue>>;

    /// Direct leaf children of `path`, keyed by their last path segment.
    async fn children(&self, path: &str) -> Result<BTreeMap<String, RemoteValue>>;

    async fn set(&self, path: &str, value: RemoteValue) -> Result<()>;

    /// Remove `path` and everything below it. Missing paths are not an error.
    async fn remove(&self, path: &str) -> Result<()>;
}

/// Path builder for one vault's subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultPaths {
    root: String,
}

impl VaultPaths {
    pub fn new(vault_id: &str) -> Self {
        Self {
            root: format!("vaults/{}", vault_id),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn transactions(&self) -> String {
        format!("{}/transactions", self.root)
    }

    pub fn transaction(&self, stable_id: &str) -> String {
        format!("{}/transactions/{}", self.root, stable_id)
    }

    pub fn tombstones(&self) -> String {
        format!("{}/deleted", self.root)
    }

    pub fn tombstone(&self, stable_id: &str) -> String {
        format!("{}/deleted/{}", self.root, stable_id)
    }

    pub fn devices(&self) -> String {
        format!("{}/devices", self.root)
    }

    pub fn device(&self, installation_id: &str) -> String {
        format!("{}/devices/{}", self.root, installation_id)
    }
}

pub(crate) fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

/// Last segment of `key` when it is a direct child of `parent`.
pub(crate) fn direct_child<'a>(parent: &str, key: &'a str) -> Option<&'a str> {
    let rest = key.strip_prefix(parent)?.strip_prefix('/')?;
    (!rest.is_empty() && !rest.contains('/')).then_some(rest)
}

/// In-process remote tree for tests and single-process demos.
///
/// `set_offline(true)` makes every call fail with a transport error.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    entries: RwLock<BTreeMap<String, RemoteValue>>,
    offline: AtomicBool,
    writes: AtomicU64,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of successful `set` and `remove` calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Copy of every leaf, keyed by full path.
    pub async fn snapshot(&self) -> BTreeMap<String, RemoteValue> {
        self.entries.read().await.clone()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Transport("remote store unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, path: &str) -> Result<Option<RemoteValue>> {
        self.check_online()?;
        Ok(self.entries.read().await.get(normalize(path)).cloned())
    }

    async fn children(&self, path: &str) -> Result<BTreeMap<String, RemoteValue>> {
        self.check_online()?;
        let parent = normalize(path);
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter_map(|(key, value)| {
                direct_child(parent, key).map(|child| (child.to_string(), value.clone()))
            })
            .collect())
    }

    async fn set(&self, path: &str, value: RemoteValue) -> Result<()> {
        self.check_online()?;
        self.entries
            .write()
            .await
            .insert(normalize(path).to_string(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.check_online()?;
        let target = normalize(path);
        let nested = format!("{}/", target);
        self.entries
            .write()
            .await
            .retain(|key, _| key != target && !key.starts_with(&nested));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vault_paths_layout() {
        let paths = VaultPaths::new("v1");
        assert_eq!(paths.transaction("abc"), "vaults/v1/transactions/abc");
        assert_eq!(paths.tombstone("abc"), "vaults/v1/deleted/abc");
        assert_eq!(paths.device("dev"), "vaults/v1/devices/dev");
        assert_eq!(paths.transactions(), "vaults/v1/transactions");
    }

    #[test]
    fn remote_value_json_is_untagged() {
        assert_eq!(serde_json::to_string(&RemoteValue::Integer(5)).unwrap(), "5");
        assert_eq!(
            serde_json::from_str::<RemoteValue>("\"x\"").unwrap(),
            RemoteValue::Text("x".into())
        );
        assert_eq!(RemoteValue::Text("12".into()).as_integer(), Some(12));
    }

    #[tokio::test]
    async fn children_lists_direct_leaves_only() {
        let store = MemoryRemoteStore::new();
        store.set("a/b/c", "1".into()).await.unwrap();
        store.set("a/b/d", 2.into()).await.unwrap();
        store.set("a/b/e/f", "deep".into()).await.unwrap();
        store.set("a/bb/c", "other".into()).await.unwrap();

        let children = store.children("a/b").await.unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children["c"], RemoteValue::Text("1".into()));
        assert_eq!(children["d"], RemoteValue::Integer(2));
    }

    #[tokio::test]
    async fn remove_drops_subtree() {
        let store = MemoryRemoteStore::new();
        store.set("a/b/c", "1".into()).await.unwrap();
        store.set("a/bc", "keep".into()).await.unwrap();
        store.remove("a/b").await.unwrap();
        store.remove("missing").await.unwrap();

        assert!(store.get("a/b/c").await.unwrap().is_none());
        assert!(store.get("a/bc").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn offline_store_fails_with_transport_error() {
        let store = MemoryRemoteStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.get("x").await,
            Err(LedgerError::Transport(_))
        ));
        assert!(store.set("x", 1.into()).await.is_err());
        assert_eq!(store.write_count(), 0);

        store.set_offline(false);
        store.set("x", 1.into()).await.unwrap();
        assert_eq!(store.write_count(), 1);
    }
}
