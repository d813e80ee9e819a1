//! Whole-record conflict resolution.
//!
//! Precedence, strongest first: remote tombstone, live pending edit,
//! forced push, remote wins.

use crate::database::Record;
use crate::sync::models::RecordPayload;

/// Absolute tolerance for amount comparisons, absorbing float round-trip noise.
pub const AMOUNT_TOLERANCE: f64 = 1e-3;

/// Decision for one local record during the push phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Write the local payload to the remote store.
    PushLocal,
    /// Remote already holds identical content.
    InSync,
    /// Leave the remote copy in place; the pull phase reconciles it.
    KeepRemote,
    /// The record was deleted elsewhere; remove the local copy.
    DeleteLocal,
}

/// What the resolver knows about the remote side of one stable id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemoteState<'a> {
    /// No entry under the transactions subtree.
    Missing,
    /// An entry exists but could not be decrypted or parsed.
    Unreadable,
    /// A decoded entry.
    Present(&'a RecordPayload),
}

pub struct ConflictResolver;

impl ConflictResolver {
    /// Decide what to do with a local record.
    pub fn resolve(
        local: &RecordPayload,
        remote: RemoteState<'_>,
        tombstoned: bool,
        has_pending_edit: bool,
        force_push: bool,
    ) -> Resolution {
        if tombstoned {
            return Resolution::DeleteLocal;
        }
        match remote {
            RemoteState::Missing => Resolution::PushLocal,
            RemoteState::Present(remote) if Self::payload_matches(local, remote) => {
                Resolution::InSync
            }
            RemoteState::Present(_) | RemoteState::Unreadable => {
                if has_pending_edit || force_push {
                    Resolution::PushLocal
                } else {
                    Resolution::KeepRemote
                }
            }
        }
    }

    /// Field-wise equality with tolerance on the two amounts.
    pub fn payload_matches(a: &RecordPayload, b: &RecordPayload) -> bool {
        a.original_text == b.original_text
            && a.description == b.description
            && a.timestamp == b.timestamp
            && a.nature == b.nature
            && amounts_equal(a.amount, b.amount)
            && amounts_equal(a.obligation_amount, b.obligation_amount)
    }

    /// Whether applying `remote` would change `local`.
    pub fn record_differs(local: &Record, remote: &RecordPayload) -> bool {
        !Self::payload_matches(&RecordPayload::from_record(local), remote)
    }
}

fn amounts_equal(a: f64, b: f64) -> bool {
    (a - b).abs() < AMOUNT_TOLERANCE
}
