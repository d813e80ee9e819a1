//! Record identity: stable remote ids and unique local timestamps.

use crate::database::RecordStore;
use crate::sync::journal::SyncJournal;
use crate::Result;
use md5::{Digest, Md5};
use tracing::{debug, info};

/// Remote key for the record created at `timestamp`.
///
/// Hex MD5 of the timestamp's decimal string. Depends on the timestamp only,
/// so an edited record keeps its remote location.
pub fn generate_stable_id(timestamp: i64) -> String {
    hex::encode(Md5::digest(timestamp.to_string().as_bytes()))
}

/// Current wall-clock time in milliseconds, bumped until no local record
/// uses it.
pub fn allocate_timestamp(records: &dyn RecordStore) -> Result<i64> {
    allocate_timestamp_from(records, chrono::Utc::now().timestamp_millis())
}

/// Smallest timestamp `>= start` that no local record uses.
pub fn allocate_timestamp_from(records: &dyn RecordStore, start: i64) -> Result<i64> {
    let mut candidate = start;
    while records.get_by_timestamp(candidate)?.is_some() {
        candidate += 1;
    }
    Ok(candidate)
}

/// Repair duplicate timestamps while preserving relative order.
///
/// Walks records oldest first; a record whose timestamp is not greater than
/// the previous one is moved to `previous + 1`. Moved records get a pending
/// edit so they are pushed under their new stable id. Returns the number of
/// records moved.
pub fn sanitize_timestamps(records: &dyn RecordStore, journal: &SyncJournal) -> Result<usize> {
    let mut all = records.get_all()?;
    all.reverse();

    let mut moved = 0;
    let mut last: Option<i64> = None;

    for mut record in all {
        if let Some(prev) = last {
            if record.timestamp <= prev {
                let old = record.timestamp;
                record.timestamp = prev + 1;
                records.update(&record)?;
                journal.queue_edit(record.timestamp)?;
                debug!(from = old, to = record.timestamp, "Reassigned colliding timestamp");
                moved += 1;
            }
        }
        last = Some(record.timestamp);
    }

    if moved > 0 {
        info!(moved, "Sanitized colliding record timestamps");
    }
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MemoryRecordStore, Nature, Record};
    use crate::settings::MemorySettings;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn record(ts: i64, desc: &str) -> Record {
        Record::new(format!("-1 {}", desc), -1.0, desc, ts, Nature::Normal)
    }

    #[test]
    fn stable_id_is_md5_of_decimal_timestamp() {
        assert_eq!(generate_stable_id(1000), "a9b7ba70783b617e9998dc4dd82eb3c5");
        assert_eq!(generate_stable_id(0), "cfcd208495d565ef66e7dff9f98764da");
    }

    #[test]
    fn stable_id_is_deterministic() {
        for ts in [0, 1, 1_700_000_000_000, -5] {
            assert_eq!(generate_stable_id(ts), generate_stable_id(ts));
        }
    }

    #[test]
    fn stable_ids_do_not_collide_in_range() {
        let base = 1_700_000_000_000i64;
        let ids: HashSet<String> = (base..base + 10_000).map(generate_stable_id).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn allocate_skips_taken_timestamps() {
        let store =
            MemoryRecordStore::with_records([record(100, "a"), record(101, "b")]).unwrap();
        assert_eq!(allocate_timestamp_from(&store, 100).unwrap(), 102);
        assert_eq!(allocate_timestamp_from(&store, 50).unwrap(), 50);
    }

    #[test]
    fn allocate_uses_clock() {
        let store = MemoryRecordStore::new();
        let before = chrono::Utc::now().timestamp_millis();
        let ts = allocate_timestamp(&store).unwrap();
        assert!(ts >= before);
    }

    #[test]
    fn sanitize_makes_timestamps_unique_and_keeps_order() {
        let store = MemoryRecordStore::with_records([
            record(100, "first"),
            record(100, "second"),
            record(100, "third"),
            record(101, "fourth"),
            record(500, "fifth"),
        ])
        .unwrap();
        let journal = SyncJournal::new(Arc::new(MemorySettings::new()));

        let moved = sanitize_timestamps(&store, &journal).unwrap();
        assert_eq!(moved, 3);

        let mut all = store.get_all().unwrap();
        all.reverse();
        let order: Vec<(&str, i64)> = all
            .iter()
            .map(|r| (r.description.as_str(), r.timestamp))
            .collect();
        assert_eq!(
            order,
            vec![
                ("first", 100),
                ("second", 101),
                ("third", 102),
                ("fourth", 103),
                ("fifth", 500),
            ]
        );

        let unique: HashSet<i64> = all.iter().map(|r| r.timestamp).collect();
        assert_eq!(unique.len(), all.len());

        for ts in [101, 102, 103] {
            assert!(journal.pending_edit_token(ts).unwrap().is_some());
        }
        assert!(journal.pending_edit_token(100).unwrap().is_none());
    }

    #[test]
    fn sanitize_is_noop_on_clean_history() {
        let store =
            MemoryRecordStore::with_records([record(1, "a"), record(2, "b")]).unwrap();
        let journal = SyncJournal::new(Arc::new(MemorySettings::new()));
        assert_eq!(sanitize_timestamps(&store, &journal).unwrap(), 0);
        assert!(journal.pending_edits().unwrap().is_empty());
    }
}
