//! Change detection for rerun passes.

use crate::catalog::{EntryStatus, NewEntry};

/// What a reconciliation pass does with one observed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Not in the catalog yet.
    Insert,
    /// Transferred before and unchanged since.
    Skip,
    /// Needs (re)transfer.
    Reset,
}

/// Whether `observed` is the same object the catalog last recorded.
///
/// When both sides carry an etag, etag and size decide. Otherwise size and
/// mtime do. An unreadable entry (empty mtime) is never unchanged.
pub fn is_unchanged(stored: &EntryStatus, observed: &NewEntry) -> bool {
    if stored.size != observed.size {
        return false;
    }
    match (stored.etag.as_deref(), observed.etag.as_deref()) {
        (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => a == b,
        _ => !observed.mtime.is_empty() && stored.mtime == observed.mtime,
    }
}

pub fn decide(stored: Option<&EntryStatus>, observed: &NewEntry) -> Decision {
    match stored {
        None => Decision::Insert,
        Some(status) if status.object_state.is_transferred() && is_unchanged(status, observed) => {
            Decision::Skip
        }
        Some(_) => Decision::Reset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ObjectState;

    fn status(state: ObjectState, size: u64, mtime: &str, etag: Option<&str>) -> EntryStatus {
        EntryStatus {
            sequence: 1,
            object_state: state,
            mtime: mtime.to_string(),
            etag: etag.map(str::to_string),
            size,
            skip_check: false,
            pass_no: 1,
        }
    }

    fn observed(size: u64, mtime: &str, etag: Option<&str>) -> NewEntry {
        NewEntry {
            etag: etag.map(str::to_string),
            ..NewEntry::file("k", size, mtime)
        }
    }

    #[test]
    fn test_absent_is_inserted() {
        assert_eq!(decide(None, &observed(1, "t", None)), Decision::Insert);
    }

    #[test]
    fn test_done_and_unchanged_is_skipped() {
        let stored = status(ObjectState::Done, 10, "t1", None);
        assert_eq!(decide(Some(&stored), &observed(10, "t1", None)), Decision::Skip);

        let deleted = status(ObjectState::Deleted, 0, "t1", None);
        assert_eq!(decide(Some(&deleted), &observed(0, "t1", None)), Decision::Skip);
    }

    #[test]
    fn test_not_transferred_is_reset() {
        for state in [ObjectState::Pending, ObjectState::Claimed, ObjectState::Failed] {
            let stored = status(state, 10, "t1", None);
            assert_eq!(decide(Some(&stored), &observed(10, "t1", None)), Decision::Reset);
        }
    }

    #[test]
    fn test_mtime_or_size_change_is_reset() {
        let stored = status(ObjectState::Done, 10, "t1", None);
        assert_eq!(decide(Some(&stored), &observed(10, "t2", None)), Decision::Reset);
        assert_eq!(decide(Some(&stored), &observed(11, "t1", None)), Decision::Reset);
    }

    #[test]
    fn test_etag_wins_over_mtime() {
        let stored = status(ObjectState::Done, 10, "t1", Some("e1"));
        // A touched object with identical content stays skipped.
        assert_eq!(
            decide(Some(&stored), &observed(10, "t2", Some("e1"))),
            Decision::Skip
        );
        assert_eq!(
            decide(Some(&stored), &observed(10, "t1", Some("e2"))),
            Decision::Reset
        );
    }

    #[test]
    fn test_empty_etag_falls_back_to_mtime() {
        let stored = status(ObjectState::Done, 10, "t1", Some(""));
        assert_eq!(
            decide(Some(&stored), &observed(10, "t1", Some("e1"))),
            Decision::Skip
        );
    }

    #[test]
    fn test_unreadable_is_never_unchanged() {
        let stored = status(ObjectState::Done, 0, "", None);
        assert!(!is_unchanged(&stored, &observed(0, "", None)));
    }

    #[test]
    fn test_directory_unchanged() {
        let stored = status(ObjectState::Done, 0, "-", None);
        let dir = NewEntry::directory("docs/");
        assert!(is_unchanged(&stored, &dir));
    }
}
