//! Sync engine: one push/pull reconciliation run against the remote tree.
//!
//! A run sanitizes local timestamps, drains pending deletes into
//! tombstones, snapshots the remote records and tombstones once, resolves
//! and pushes every local record, then pulls what it did not settle. Only
//! transport and storage failures abort a run; undecryptable or malformed
//! remote entries are skipped one at a time. Journal entries are cleared
//! only after the matching remote write is confirmed, so an aborted or
//! cancelled run leaves everything in place for the next one.

use crate::crypto::VaultKey;
use crate::database::RecordStore;
use crate::settings::SettingsStore;
use crate::sync::config::{SyncMetadata, VaultConfig};
use crate::sync::conflict::{ConflictResolver, RemoteState, Resolution};
use crate::sync::crypto::{open_payload, seal_payload};
use crate::sync::identity::{generate_stable_id, sanitize_timestamps};
use crate::sync::journal::SyncJournal;
use crate::sync::models::{RecordPayload, SyncOutcome, SyncReport, SyncRequest};
use crate::sync::remote::{RemoteStore, RemoteValue, VaultPaths};
use crate::Result;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Runs reconciliation for the vault stored in the settings store.
pub struct SyncEngine {
    records: Arc<dyn RecordStore>,
    settings: Arc<dyn SettingsStore>,
    remote: Arc<dyn RemoteStore>,
    journal: SyncJournal,
}

/// Remote state captured once per run.
struct RemoteSnapshot {
    /// Decoded records by stable id; `None` when the entry is unreadable.
    records: BTreeMap<String, Option<RecordPayload>>,
    tombstones: HashSet<String>,
}

impl SyncEngine {
    pub fn new(
        records: Arc<dyn RecordStore>,
        settings: Arc<dyn SettingsStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        let journal = SyncJournal::new(settings.clone());
        Self {
            records,
            settings,
            remote,
            journal,
        }
    }

    /// Journal shared with every local mutation path.
    pub fn journal(&self) -> &SyncJournal {
        &self.journal
    }

    /// Perform one sync run and report its terminal outcome.
    pub async fn run(&self, request: &SyncRequest) -> SyncOutcome {
        let outcome = match self.run_inner(request).await {
            Ok(Some(report)) => SyncOutcome::Completed(report),
            Ok(None) => {
                debug!("Sync skipped: device not linked");
                return SyncOutcome::NotLinked;
            }
            Err(e) => {
                error!("Sync run aborted: {}", e);
                SyncOutcome::Failed(e.to_string())
            }
        };

        let message = outcome.message();
        let stored = match &outcome {
            SyncOutcome::Completed(_) => SyncMetadata::record_success(
                self.settings.as_ref(),
                chrono::Utc::now().timestamp_millis(),
                &message,
            ),
            _ => SyncMetadata::record_failure(self.settings.as_ref(), &message),
        };
        if let Err(e) = stored {
            warn!("Failed to store sync status: {}", e);
        }
        outcome
    }

    async fn run_inner(&self, request: &SyncRequest) -> Result<Option<SyncReport>> {
        let Some(vault) = VaultConfig::load(self.settings.as_ref())? else {
            return Ok(None);
        };
        let key = vault.key();
        let paths = vault.paths();
        let mut report = SyncReport::default();

        sanitize_timestamps(self.records.as_ref(), &self.journal)?;

        self.drain_deletes(&paths, &mut report).await?;

        let snapshot = self.fetch_snapshot(&key, &paths, &mut report).await?;

        let settled = self
            .push_local(&key, &paths, &snapshot, request, &mut report)
            .await?;

        self.pull_remote(&snapshot, &settled, &mut report)?;

        info!(
            vault_id = %vault.vault_id,
            pushed = report.pushed,
            inserted = report.inserted,
            updated = report.updated,
            deleted_local = report.deleted_local,
            tombstoned = report.tombstoned,
            skipped = report.skipped,
            force_push = request.force_push,
            "Sync run complete"
        );
        Ok(Some(report))
    }

    /// Turn journaled deletes into tombstones.
    async fn drain_deletes(&self, paths: &VaultPaths, report: &mut SyncReport) -> Result<()> {
        for timestamp in self.journal.pending_deletes()? {
            let stable_id = generate_stable_id(timestamp);
            self.remote.remove(&paths.transaction(&stable_id)).await?;
            let deleted_at = chrono::Utc::now().timestamp_millis();
            self.remote
                .set(&paths.tombstone(&stable_id), RemoteValue::Integer(deleted_at))
                .await?;
            self.journal.remove_pending_delete(timestamp)?;
            debug!(timestamp, "Wrote tombstone");
            report.tombstoned += 1;
        }
        Ok(())
    }

    async fn fetch_snapshot(
        &self,
        key: &VaultKey,
        paths: &VaultPaths,
        report: &mut SyncReport,
    ) -> Result<RemoteSnapshot> {
        let raw = self.remote.children(&paths.transactions()).await?;
        let tombstones = self
            .remote
            .children(&paths.tombstones())
            .await?
            .into_keys()
            .collect();

        let records = raw
            .into_iter()
            .map(|(stable_id, value)| {
                let decoded = match &value {
                    RemoteValue::Text(sealed) => match open_payload(key, sealed) {
                        Ok(payload) => Some(payload),
                        Err(e) => {
                            warn!(stable_id = %stable_id, "Skipping unreadable remote record: {}", e);
                            None
                        }
                    },
                    RemoteValue::Integer(_) => {
                        warn!(stable_id = %stable_id, "Skipping non-text remote record");
                        None
                    }
                };
                if decoded.is_none() {
                    report.skipped += 1;
                }
                (stable_id, decoded)
            })
            .collect();

        Ok(RemoteSnapshot {
            records,
            tombstones,
        })
    }

    /// Resolve every local record against the snapshot. Returns the stable
    /// ids the pull phase must leave alone.
    async fn push_local(
        &self,
        key: &VaultKey,
        paths: &VaultPaths,
        snapshot: &RemoteSnapshot,
        request: &SyncRequest,
        report: &mut SyncReport,
    ) -> Result<HashSet<String>> {
        let pending = self.journal.pending_edits()?;
        let mut settled = HashSet::new();

        for record in self.records.get_all()? {
            let timestamp = record.timestamp;
            let stable_id = generate_stable_id(timestamp);
            let local = RecordPayload::from_record(&record);
            let token = pending.get(&timestamp);

            let remote = match snapshot.records.get(&stable_id) {
                None => RemoteState::Missing,
                Some(None) => RemoteState::Unreadable,
                Some(Some(payload)) => RemoteState::Present(payload),
            };

            let resolution = ConflictResolver::resolve(
                &local,
                remote,
                snapshot.tombstones.contains(&stable_id),
                token.is_some(),
                request.force_push,
            );
            debug!(timestamp, ?resolution, "Resolved local record");

            match resolution {
                Resolution::DeleteLocal => {
                    self.records.delete(&record)?;
                    if let Some(live) = self.journal.pending_edit_token(timestamp)? {
                        self.journal.remove_pending_edit(timestamp, &live)?;
                    }
                    report.deleted_local += 1;
                    settled.insert(stable_id);
                }
                Resolution::PushLocal => {
                    let sealed = seal_payload(key, &local)?;
                    self.remote
                        .set(&paths.transaction(&stable_id), RemoteValue::Text(sealed))
                        .await?;
                    if let Some(token) = token {
                        self.journal.remove_pending_edit(timestamp, token)?;
                    }
                    report.pushed += 1;
                    settled.insert(stable_id);
                }
                Resolution::InSync => {
                    if let Some(token) = token {
                        self.journal.remove_pending_edit(timestamp, token)?;
                    }
                    settled.insert(stable_id);
                }
                Resolution::KeepRemote => {}
            }
        }
        Ok(settled)
    }

    /// Apply remote records that the push phase did not settle.
    fn pull_remote(
        &self,
        snapshot: &RemoteSnapshot,
        settled: &HashSet<String>,
        report: &mut SyncReport,
    ) -> Result<()> {
        for (stable_id, payload) in &snapshot.records {
            if settled.contains(stable_id) || snapshot.tombstones.contains(stable_id) {
                continue;
            }
            let Some(payload) = payload else {
                continue;
            };
            let timestamp = payload.timestamp;

            // Live journal state, not the snapshot: a local edit or delete
            // made during this run must not be clobbered.
            if self.journal.is_delete_pending(timestamp)?
                || self.journal.pending_edit_token(timestamp)?.is_some()
            {
                debug!(timestamp, "Pull skipped: local change pending");
                continue;
            }

            match self.records.get_by_timestamp(timestamp)? {
                None => {
                    self.records.insert(&payload.to_record())?;
                    debug!(timestamp, "Inserted remote record");
                    report.inserted += 1;
                }
                Some(mut local) if ConflictResolver::record_differs(&local, payload) => {
                    payload.apply_to(&mut local);
                    self.records.update(&local)?;
                    debug!(timestamp, "Updated local record from remote");
                    report.updated += 1;
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
