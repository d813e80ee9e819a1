//! Ledger facade: local mutations, totals, and sync wiring.
//!
//! Every mutation updates the record store and the journal before it
//! returns, then hands a sync request to the scheduler.

use crate::config::{LedgerConfig, SyncOptions};
use crate::database::{Database, Nature, Record, RecordStore};
use crate::settings::SettingsStore;
use crate::sync::config::{SyncMetadata, VaultConfig};
use crate::sync::conflict::AMOUNT_TOLERANCE;
use crate::sync::identity::{allocate_timestamp, allocate_timestamp_from};
use crate::sync::{
    DeviceRegistry, JobStatus, LedgerSnapshot, LinkCode, LinkStrategy, RemoteStore,
    SqliteRemoteStore, StatusHub, SubscriptionId, SyncEngine, SyncHandle, SyncJournal,
    SyncRequest, SyncScheduler, VaultRegistry,
};
use crate::{LedgerError, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Window within which an imported record counts as a duplicate.
pub const IMPORT_DUPLICATE_WINDOW_MS: i64 = 60_000;

/// Aggregates over all local records.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    /// Sum of all amounts
    pub balance: f64,
    /// Money owed to this ledger (sum of asset obligations)
    pub receivable: f64,
    /// Money this ledger owes (absolute sum of liability obligations)
    pub payable: f64,
}

impl Totals {
    pub fn from_records(records: &[Record]) -> Self {
        records.iter().fold(Self::default(), |mut totals, record| {
            totals.balance += record.amount;
            match record.nature {
                Nature::Asset => totals.receivable += record.obligation_amount,
                Nature::Liability => totals.payable += record.obligation_amount.abs(),
                Nature::Normal => {}
            }
            totals
        })
    }
}

pub struct Ledger {
    records: Arc<dyn RecordStore>,
    settings: Arc<dyn SettingsStore>,
    journal: SyncJournal,
    scheduler: SyncScheduler,
    vaults: VaultRegistry,
    devices: DeviceRegistry,
    status: StatusHub,
}

impl Ledger {
    /// Wire a ledger over the given stores. Creates a private vault on first
    /// run. Must be called inside a tokio runtime.
    pub fn new(
        records: Arc<dyn RecordStore>,
        settings: Arc<dyn SettingsStore>,
        remote: Arc<dyn RemoteStore>,
        device_name: impl Into<String>,
        options: SyncOptions,
    ) -> Result<Self> {
        VaultConfig::ensure(settings.as_ref())?;

        let engine = Arc::new(SyncEngine::new(
            records.clone(),
            settings.clone(),
            remote.clone(),
        ));
        let journal = engine.journal().clone();
        let devices = DeviceRegistry::new(settings.clone(), remote);
        let vaults = VaultRegistry::new(
            records.clone(),
            settings.clone(),
            journal.clone(),
            devices.clone(),
            device_name,
        );

        Ok(Self {
            records,
            settings,
            journal,
            scheduler: SyncScheduler::new(engine, options),
            vaults,
            devices,
            status: StatusHub::new(),
        })
    }

    /// Open the SQLite ledger and remote tree named by `config`.
    pub fn open(config: &LedgerConfig) -> Result<Self> {
        for path in [&config.database_path, &config.remote_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Arc::new(Database::open(&config.database_path)?);
        let remote = Arc::new(SqliteRemoteStore::open(&config.remote_path)?);
        Self::new(
            db.clone(),
            db,
            remote,
            config.device_name.clone(),
            config.sync.clone(),
        )
    }

    pub fn records(&self) -> Result<Vec<Record>> {
        self.records.get_all()
    }

    pub fn record_at(&self, timestamp: i64) -> Result<Option<Record>> {
        self.records.get_by_timestamp(timestamp)
    }

    /// Records whose description contains `keyword`, ignoring case.
    pub fn search(&self, keyword: &str) -> Result<Vec<Record>> {
        let needle = keyword.to_lowercase();
        Ok(self
            .records
            .get_all()?
            .into_iter()
            .filter(|r| r.description.to_lowercase().contains(&needle))
            .collect())
    }

    pub fn totals(&self) -> Result<Totals> {
        Ok(Totals::from_records(&self.records.get_all()?))
    }

    /// Record a new entry stamped with the current time.
    pub fn add_record(
        &self,
        original_text: &str,
        amount: f64,
        description: &str,
        nature: Nature,
    ) -> Result<(Record, SyncHandle)> {
        let timestamp = allocate_timestamp(self.records.as_ref())?;
        let mut record = Record::new(original_text, amount, description, timestamp, nature);
        record.id = Some(self.records.insert(&record)?);
        self.journal.queue_edit(timestamp)?;
        debug!(timestamp, "Added record");
        Ok((record, self.request_sync(SyncRequest::default())))
    }

    /// Persist changed content of an existing record. The timestamp is the
    /// record's identity and must not change.
    pub fn update_record(&self, record: &Record) -> Result<SyncHandle> {
        if record.id.is_none() {
            return Err(LedgerError::InvalidInput(
                "Cannot update a record that was never saved".to_string(),
            ));
        }
        let mut record = record.clone();
        record.refresh_obligation();
        self.records.update(&record)?;
        self.journal.queue_edit(record.timestamp)?;
        debug!(timestamp = record.timestamp, "Updated record");
        Ok(self.request_sync(SyncRequest::default()))
    }

    /// Journal the delete first so the tombstone is written even if the
    /// process dies right after the local removal.
    pub fn delete_record(&self, record: &Record) -> Result<SyncHandle> {
        self.journal.queue_delete(record.timestamp)?;
        self.records.delete(record)?;
        debug!(timestamp = record.timestamp, "Deleted record");
        Ok(self.request_sync(SyncRequest::default()))
    }

    /// Insert records that have no near-duplicate (same amount and
    /// description within a minute). Returns how many were inserted.
    pub fn import_records(&self, incoming: &[Record]) -> Result<(usize, SyncHandle)> {
        let mut existing = self.records.get_all()?;
        let mut inserted = 0;

        for candidate in incoming {
            let duplicate = existing.iter().any(|r| {
                (r.timestamp - candidate.timestamp).abs() <= IMPORT_DUPLICATE_WINDOW_MS
                    && (r.amount - candidate.amount).abs() < AMOUNT_TOLERANCE
                    && r.description == candidate.description
            });
            if duplicate {
                continue;
            }

            let mut record = candidate.clone();
            record.timestamp = allocate_timestamp_from(self.records.as_ref(), candidate.timestamp)?;
            record.refresh_obligation();
            record.id = Some(self.records.insert(&record)?);
            self.journal.queue_edit(record.timestamp)?;
            existing.push(record);
            inserted += 1;
        }

        info!(inserted, skipped = incoming.len() - inserted, "Imported records");
        Ok((inserted, self.request_sync(SyncRequest::default())))
    }

    pub fn request_sync(&self, request: SyncRequest) -> SyncHandle {
        self.scheduler.submit(request)
    }

    /// Run a sync to completion and publish the resulting snapshot.
    pub async fn sync_now(&self, force_push: bool) -> Result<JobStatus> {
        let status = self
            .request_sync(SyncRequest { force_push })
            .wait()
            .await;
        self.publish_snapshot()?;
        Ok(status)
    }

    pub fn link_code(&self) -> Result<LinkCode> {
        self.vaults.link_code()
    }

    pub fn needs_link_decision(&self) -> Result<bool> {
        self.vaults.needs_link_decision()
    }

    /// Join another device's vault and push local history into it.
    pub async fn link(&self, code: &LinkCode, strategy: LinkStrategy) -> Result<SyncHandle> {
        self.vaults.link(code, strategy).await?;
        Ok(self.request_sync(SyncRequest::forced()))
    }

    pub async fn unlink(&self) -> Result<VaultConfig> {
        let fresh = self.vaults.unlink().await?;
        self.publish_snapshot()?;
        Ok(fresh)
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn vault(&self) -> Result<VaultConfig> {
        self.vaults.current()
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    pub fn snapshot(&self) -> Result<LedgerSnapshot> {
        let records = self.records.get_all()?;
        let meta = SyncMetadata::load(self.settings.as_ref())?;
        Ok(LedgerSnapshot {
            record_count: records.len(),
            totals: Totals::from_records(&records),
            pending_edits: self.journal.pending_edits()?.len(),
            pending_deletes: self.journal.pending_deletes()?.len(),
            last_sync_at: meta.last_sync_at,
            last_sync_message: meta.last_sync_message,
        })
    }

    pub fn publish_snapshot(&self) -> Result<()> {
        self.status.publish(self.snapshot()?);
        Ok(())
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&LedgerSnapshot) + Send + 'static,
    {
        self.status.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.status.unsubscribe(id);
    }

    pub fn status(&self) -> &StatusHub {
        &self.status
    }
}
