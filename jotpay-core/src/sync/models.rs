//! Sync data models: payload wire format, run requests and outcomes.

use crate::database::{Nature, Record};
use serde::{Deserialize, Deserializer, Serialize};

/// Decrypted record payload stored under `transactions/{stableId}`.
///
/// Field names are the short keys every installation reads and writes.
/// `n` and `oa` are optional on the wire and default to `NORMAL` and `0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPayload {
    #[serde(rename = "o")]
    pub original_text: String,
    #[serde(rename = "a")]
    pub amount: f64,
    #[serde(rename = "d")]
    pub description: String,
    #[serde(rename = "t")]
    pub timestamp: i64,
    #[serde(rename = "n", default, deserialize_with = "lenient_nature")]
    pub nature: Nature,
    #[serde(rename = "oa", default)]
    pub obligation_amount: f64,
}

fn lenient_nature<'de, D: Deserializer<'de>>(d: D) -> Result<Nature, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw.as_deref().map(Nature::parse).unwrap_or_default())
}

impl RecordPayload {
    /// Canonical payload for a local record.
    pub fn from_record(record: &Record) -> Self {
        Self {
            original_text: record.original_text.clone(),
            amount: record.amount,
            description: record.description.clone(),
            timestamp: record.timestamp,
            nature: record.nature,
            obligation_amount: record.obligation_amount,
        }
    }

    /// Unsaved local record carrying this payload's content.
    pub fn to_record(&self) -> Record {
        Record {
            id: None,
            original_text: self.original_text.clone(),
            amount: self.amount,
            description: self.description.clone(),
            timestamp: self.timestamp,
            nature: self.nature,
            obligation_amount: self.obligation_amount,
        }
    }

    /// Copy this payload's content onto an existing local record, keeping
    /// its row id.
    pub fn apply_to(&self, record: &mut Record) {
        record.original_text = self.original_text.clone();
        record.amount = self.amount;
        record.description = self.description.clone();
        record.timestamp = self.timestamp;
        record.nature = self.nature;
        record.obligation_amount = self.obligation_amount;
    }
}

/// Parameters of one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncRequest {
    /// Local content wins every conflict in this run.
    pub force_push: bool,
}

impl SyncRequest {
    pub fn forced() -> Self {
        Self { force_push: true }
    }

    /// Combine two requests queued for the same vault.
    pub fn merge(self, other: SyncRequest) -> Self {
        Self {
            force_push: self.force_push || other.force_push,
        }
    }
}

/// Counters collected during one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Remote entries written from local content
    pub pushed: u64,
    /// Remote records inserted locally
    pub inserted: u64,
    /// Local records overwritten with remote content
    pub updated: u64,
    /// Local records removed because of a remote tombstone
    pub deleted_local: u64,
    /// Tombstones written from the pending-delete journal
    pub tombstoned: u64,
    /// Remote entries skipped because they could not be decrypted or parsed
    pub skipped: u64,
}

impl SyncReport {
    /// Total number of changes this run applied locally or remotely.
    pub fn applied_changes(&self) -> u64 {
        self.pushed + self.inserted + self.updated + self.deleted_local + self.tombstoned
    }

    /// Coarse, user-facing summary of the run.
    pub fn summary(&self) -> String {
        match self.applied_changes() {
            0 => "Sync complete: up to date".to_string(),
            1 => "1 update synced".to_string(),
            n => format!("{} updates synced", n),
        }
    }
}

/// Terminal result of one sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The run finished and reconciled both stores.
    Completed(SyncReport),
    /// No vault is configured; nothing to do.
    NotLinked,
    /// Transport or storage failure; the journal is untouched.
    Failed(String),
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }

    /// Number of applied changes, zero for anything but a completed run.
    pub fn applied_changes(&self) -> u64 {
        match self {
            Self::Completed(report) => report.applied_changes(),
            _ => 0,
        }
    }

    /// Coarse, user-facing message.
    pub fn message(&self) -> String {
        match self {
            Self::Completed(report) => report.summary(),
            Self::NotLinked => "Skipped: device not linked".to_string(),
            Self::Failed(reason) => format!("Sync error: {}", reason),
        }
    }
}

/// Vault credentials exchanged between devices when linking
/// (the content of the pairing QR code).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCode {
    #[serde(rename = "v")]
    pub vault_id: String,
    #[serde(rename = "k")]
    pub secret_key: String,
}

impl LinkCode {
    pub fn new(vault_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            vault_id: vault_id.into(),
            secret_key: secret_key.into(),
        }
    }

    /// JSON text suitable for a QR code.
    pub fn encode(&self) -> String {
        serde_json::json!({ "v": self.vault_id, "k": self.secret_key }).to_string()
    }

    /// Parse scanned link-code text.
    pub fn parse(text: &str) -> crate::Result<Self> {
        let code: LinkCode = serde_json::from_str(text.trim())
            .map_err(|e| crate::LedgerError::InvalidInput(format!("Invalid link code: {}", e)))?;
        if code.vault_id.trim().is_empty() || code.secret_key.is_empty() {
            return Err(crate::LedgerError::InvalidInput(
                "Link code is missing the vault or key".to_string(),
            ));
        }
        Ok(code)
    }
}

/// A device registered in the vault's presence list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub installation_id: String,
    pub device_name: String,
    pub is_current: bool,
}
