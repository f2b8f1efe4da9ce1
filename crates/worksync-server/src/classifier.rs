//! Change classification against the suppression caches.
//!
//! [`ChangeClassifier`] owns no I/O. It consults the dedup and trivial
//! caches, applies the triviality and significance predicates from
//! `worksync-core`, and returns a [`Decision`] for the reconciler to act
//! on.

use tracing::trace;

use worksync_core::classify::{
    TrivialityPolicy, event_is_significant, file_change_is_significant, file_change_is_trivial,
};
use worksync_core::{ChangeRecord, Decision};

use crate::cache::{SeenKey, SharedSeenCache};

/// Stateful classifier shared by all reconciliation passes.
pub struct ChangeClassifier {
    dedup: SharedSeenCache,
    trivial: SharedSeenCache,
    policy: TrivialityPolicy,
}

impl ChangeClassifier {
    pub fn new(dedup: SharedSeenCache, trivial: SharedSeenCache, policy: TrivialityPolicy) -> Self {
        Self {
            dedup,
            trivial,
            policy,
        }
    }

    /// Classifies one delivered change. First match wins.
    ///
    /// Every classified change is recorded in the dedup cache so an exact
    /// redelivery within its TTL reads as [`Decision::Duplicate`]. Only
    /// changes that classify trivial are recorded in the trivial cache, so
    /// a significant change redelivered after the dedup window is still
    /// applied.
    pub fn classify(&self, resource_id: &str, change: &ChangeRecord) -> Decision {
        let key = SeenKey::for_change(resource_id, change);

        {
            let mut dedup = self.dedup.lock().unwrap_or_else(|e| e.into_inner());
            if dedup.check_and_mark(key.clone()) {
                trace!(resource_id, change_id = change.change_id(), "dedup cache hit");
                return Decision::Duplicate;
            }
        }

        {
            let trivial = self.trivial.lock().unwrap_or_else(|e| e.into_inner());
            if trivial.was_seen_before(&key) {
                trace!(resource_id, change_id = change.change_id(), "trivial cache hit");
                return Decision::Trivial;
            }
        }

        let decision = match change {
            ChangeRecord::FileChange {
                file_id, snapshot, ..
            } => match snapshot {
                Some(s) if file_change_is_trivial(s, &self.policy) => Decision::Trivial,
                s => {
                    if file_change_is_significant(s.as_ref(), false, file_id) {
                        Decision::SignificantUpsert
                    } else {
                        Decision::Insignificant
                    }
                }
            },
            ChangeRecord::FileRemoval { file_id, .. } => {
                if file_change_is_significant(None, true, file_id) {
                    Decision::SignificantDelete
                } else {
                    Decision::Insignificant
                }
            }
            ChangeRecord::EventChange {
                event_id, snapshot, ..
            } => {
                if snapshot.is_cancelled() {
                    if event_id.is_empty() {
                        Decision::Insignificant
                    } else {
                        Decision::SignificantDelete
                    }
                } else if event_is_significant(snapshot) {
                    Decision::SignificantUpsert
                } else {
                    Decision::Insignificant
                }
            }
        };

        if decision == Decision::Trivial {
            let mut trivial = self.trivial.lock().unwrap_or_else(|e| e.into_inner());
            trivial.mark_seen(key);
        }

        decision
    }
}
