//! Encrypted multi-device sync.
//!
//! Devices share one vault through a remote key-value tree:
//! - Records live at `transactions/{md5(timestamp)}`, AES-128-CBC encrypted
//! - Deletes become permanent tombstones under `deleted/`
//! - A local journal of pending edits and deletes protects unsynced changes
//! - Conflicts resolve whole records: tombstone, pending edit, forced push,
//!   then remote wins

pub mod config;
pub mod conflict;
pub mod crypto;
pub mod device;
pub mod engine;
pub mod identity;
pub mod journal;
pub mod models;
pub mod remote;
pub mod scheduler;
pub mod sqlite_remote;
pub mod status;
pub mod vault;

pub use config::{SyncMetadata, VaultConfig};
pub use conflict::{ConflictResolver, Resolution};
pub use device::DeviceRegistry;
pub use engine::SyncEngine;
pub use identity::{allocate_timestamp, generate_stable_id, sanitize_timestamps};
pub use journal::SyncJournal;
pub use models::{DeviceInfo, LinkCode, RecordPayload, SyncOutcome, SyncReport, SyncRequest};
pub use remote::{MemoryRemoteStore, RemoteStore, RemoteValue, VaultPaths};
pub use scheduler::{JobStatus, SyncHandle, SyncScheduler};
pub use sqlite_remote::SqliteRemoteStore;
pub use status::{LedgerSnapshot, StatusHub, SubscriptionId};
pub use vault::{LinkStrategy, VaultRegistry};
