//! In-memory suppression caches with TTL support.
//!
//! Two instances of [`SeenCache`] back the classifier: a short-lived
//! deduplication cache and a longer-lived trivial-change suppression
//! cache. Entries expire on a monotonic clock and are swept by a
//! background eviction task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use worksync_core::ChangeRecord;

/// Identity of a delivered change within one watched resource.
///
/// The discriminant carries content beyond the change id when the upstream
/// API reuses ids across revisions (calendar events keep their id but bump
/// their `updated` timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeenKey {
    resource_id: String,
    change_id: String,
    discriminant: Option<String>,
}

impl SeenKey {
    pub fn new(
        resource_id: impl Into<String>,
        change_id: impl Into<String>,
        discriminant: Option<String>,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            change_id: change_id.into(),
            discriminant,
        }
    }

    /// Builds the cache key for a change delivered on the given channel.
    pub fn for_change(resource_id: &str, change: &ChangeRecord) -> Self {
        Self::new(resource_id, change.change_id(), change.dedup_discriminant())
    }
}

/// A TTL set of already-seen change keys.
///
/// Lookups and insertions are split so callers decide when observation
/// should count as a mark; [`SeenCache::check_and_mark`] combines both for
/// the common path.
#[derive(Debug)]
pub struct SeenCache {
    ttl: Duration,
    entries: HashMap<SeenKey, Instant>,
}

impl SeenCache {
    /// Creates a cache whose entries expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Returns the configured TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns true if the key was recorded within the TTL window.
    ///
    /// Does not mutate the cache. An expired entry reads as unseen even if
    /// the eviction sweep has not removed it yet.
    pub fn was_seen_before(&self, key: &SeenKey) -> bool {
        match self.entries.get(key) {
            Some(inserted) => inserted.elapsed() < self.ttl,
            None => false,
        }
    }

    /// Records the key as seen now, restarting its TTL window.
    pub fn mark_seen(&mut self, key: SeenKey) {
        self.entries.insert(key, Instant::now());
    }

    /// Returns whether the key was already seen, recording it if absent.
    ///
    /// An already-present entry keeps its original insertion time so repeat
    /// deliveries cannot extend the window indefinitely.
    pub fn check_and_mark(&mut self, key: SeenKey) -> bool {
        if self.was_seen_before(&key) {
            return true;
        }
        self.mark_seen(key);
        false
    }

    /// Removes all expired entries, returning how many were dropped.
    pub fn evict_expired(&mut self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|key, inserted| {
            let keep = inserted.elapsed() < ttl;
            if !keep {
                trace!(?key, "evicting expired seen entry");
            }
            keep
        });
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(evicted, "evicted expired seen entries");
        }
        evicted
    }

    /// Returns the number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared handle to a [`SeenCache`], usable across request tasks.
pub type SharedSeenCache = Arc<Mutex<SeenCache>>;

/// Creates a shared cache with the given TTL.
pub fn shared_seen_cache(ttl: Duration) -> SharedSeenCache {
    Arc::new(Mutex::new(SeenCache::new(ttl)))
}

/// Spawns a background task sweeping expired entries from each cache.
///
/// The returned handle can be aborted on shutdown.
pub fn spawn_eviction(caches: Vec<SharedSeenCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately; skip it so the initial sweep waits
        // a full interval.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for cache in &caches {
                let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
                cache.evict_expired();
            }
        }
    })
}
