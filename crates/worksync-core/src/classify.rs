//! Pure classification predicates.
//!
//! The triviality heuristics here mirror observed source behavior rather
//! than a documented contract, so each one can be switched off through
//! [`TrivialityPolicy`]. Significance is the stricter, load-bearing side:
//! only changes that imply an actual state mutation reach the store.

use crate::change::{EventSnapshot, FileSnapshot};

/// Tunable triviality heuristics for file changes.
///
/// A change matching any enabled heuristic is suppressed as metadata noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrivialityPolicy {
    /// Snapshot carries no `modified_time` at all.
    pub missing_modified_time: bool,
    /// `modified_time` is present but neither `size` nor `name` came with it.
    pub no_size_or_name: bool,
    /// Only permissions or starred state moved, without `modified_time`.
    pub permissions_or_starred_only: bool,
}

impl Default for TrivialityPolicy {
    fn default() -> Self {
        Self {
            missing_modified_time: true,
            no_size_or_name: true,
            permissions_or_starred_only: true,
        }
    }
}

/// Returns true if a file snapshot matches an enabled triviality heuristic.
///
/// Only applies to live snapshots; removals never take this path.
pub fn file_change_is_trivial(snapshot: &FileSnapshot, policy: &TrivialityPolicy) -> bool {
    if policy.missing_modified_time && snapshot.modified_time.is_none() {
        return true;
    }
    if policy.no_size_or_name
        && snapshot.modified_time.is_some()
        && snapshot.size.is_none()
        && snapshot.name.is_none()
    {
        return true;
    }
    if policy.permissions_or_starred_only
        && snapshot.modified_time.is_none()
        && (snapshot.starred.is_some() || !snapshot.permission_ids.is_empty())
    {
        return true;
    }
    false
}

/// Returns true if a file change carries an applicable state mutation.
///
/// Significant when any of: a live snapshot is embedded; a removal names the
/// file; the snapshot is a folder; or `modified_time` arrives with size,
/// name, MIME type, or parents.
pub fn file_change_is_significant(
    snapshot: Option<&FileSnapshot>,
    removed: bool,
    file_id: &str,
) -> bool {
    if removed {
        return !file_id.is_empty();
    }
    match snapshot {
        Some(s) => {
            !s.id.is_empty()
                || s.is_folder()
                || (s.modified_time.is_some()
                    && (s.size.is_some()
                        || s.name.is_some()
                        || s.mime_type.is_some()
                        || !s.parents.is_empty()))
        }
        None => false,
    }
}

/// Returns true if an event snapshot warrants an upsert.
///
/// Cancelled events never qualify (they take the deletion path); live events
/// need both time bounds and at least a summary or description.
pub fn event_is_significant(snapshot: &EventSnapshot) -> bool {
    if snapshot.is_cancelled() {
        return false;
    }
    snapshot.start.is_some()
        && snapshot.end.is_some()
        && (snapshot.summary.is_some() || snapshot.description.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn full_snapshot() -> FileSnapshot {
        let mut s = FileSnapshot::new("f1");
        s.name = Some("report.pdf".to_string());
        s.size = Some(1024);
        s.mime_type = Some("application/pdf".to_string());
        s.modified_time = Some(Utc::now());
        s
    }

    #[test]
    fn missing_modified_time_is_trivial() {
        let snapshot = FileSnapshot::new("f1");
        assert!(file_change_is_trivial(&snapshot, &TrivialityPolicy::default()));
    }

    #[test]
    fn modified_without_size_or_name_is_trivial() {
        let mut snapshot = FileSnapshot::new("f1");
        snapshot.modified_time = Some(Utc::now());
        assert!(file_change_is_trivial(&snapshot, &TrivialityPolicy::default()));
    }

    #[test]
    fn starred_only_without_modified_time_is_trivial() {
        let mut snapshot = FileSnapshot::new("f1");
        snapshot.starred = Some(true);

        let policy = TrivialityPolicy {
            missing_modified_time: false,
            no_size_or_name: false,
            permissions_or_starred_only: true,
        };
        assert!(file_change_is_trivial(&snapshot, &policy));
    }

    #[test]
    fn content_change_is_not_trivial() {
        assert!(!file_change_is_trivial(
            &full_snapshot(),
            &TrivialityPolicy::default()
        ));
    }

    #[test]
    fn disabled_policy_suppresses_nothing() {
        let policy = TrivialityPolicy {
            missing_modified_time: false,
            no_size_or_name: false,
            permissions_or_starred_only: false,
        };
        assert!(!file_change_is_trivial(&FileSnapshot::new("f1"), &policy));
    }

    #[test]
    fn live_snapshot_is_significant() {
        assert!(file_change_is_significant(Some(&full_snapshot()), false, "f1"));
    }

    #[test]
    fn removal_with_id_is_significant() {
        assert!(file_change_is_significant(None, true, "f1"));
        assert!(!file_change_is_significant(None, true, ""));
    }

    #[test]
    fn missing_snapshot_is_not_significant() {
        assert!(!file_change_is_significant(None, false, "f1"));
    }

    #[test]
    fn complete_event_is_significant() {
        let now = Utc::now();
        let mut snapshot = EventSnapshot::new("e1");
        snapshot.summary = Some("Planning".to_string());
        snapshot.start = Some(now);
        snapshot.end = Some(now + chrono::Duration::hours(1));
        assert!(event_is_significant(&snapshot));
    }

    #[test]
    fn cancelled_event_is_not_significant() {
        let now = Utc::now();
        let mut snapshot = EventSnapshot::new("e1");
        snapshot.summary = Some("Planning".to_string());
        snapshot.start = Some(now);
        snapshot.end = Some(now + chrono::Duration::hours(1));
        snapshot.status = Some("cancelled".to_string());
        assert!(!event_is_significant(&snapshot));
    }

    #[test]
    fn unbounded_event_is_not_significant() {
        let mut snapshot = EventSnapshot::new("e1");
        snapshot.summary = Some("Planning".to_string());
        snapshot.start = Some(Utc::now());
        assert!(!event_is_significant(&snapshot));
    }

    #[test]
    fn untitled_event_is_not_significant() {
        let now = Utc::now();
        let mut snapshot = EventSnapshot::new("e1");
        snapshot.start = Some(now);
        snapshot.end = Some(now + chrono::Duration::hours(1));
        assert!(!event_is_significant(&snapshot));
    }
}
