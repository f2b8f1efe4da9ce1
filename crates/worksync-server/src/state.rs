//! Shared daemon state exposed through the status endpoint.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::renewal::RenewalReport;

/// Result of the most recent renewal run.
#[derive(Debug, Clone, Serialize)]
pub struct LastRenewal {
    pub at: DateTime<Utc>,
    pub successes: usize,
    pub failures: usize,
    pub report: RenewalReport,
}

/// Counters and snapshots gathered while the daemon runs.
#[derive(Debug)]
pub struct ServerState {
    started_at: DateTime<Utc>,
    notifications_received: u64,
    jobs_dropped: u64,
    last_renewal: Option<LastRenewal>,
}

impl ServerState {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            notifications_received: 0,
            jobs_dropped: 0,
            last_renewal: None,
        }
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    pub fn record_notification(&mut self) {
        self.notifications_received += 1;
    }

    pub fn record_dropped_job(&mut self) {
        self.jobs_dropped += 1;
    }

    pub fn set_last_renewal(&mut self, report: RenewalReport) {
        self.last_renewal = Some(LastRenewal {
            at: Utc::now(),
            successes: report.successes.len(),
            failures: report.failures.len(),
            report,
        });
    }

    pub fn notifications_received(&self) -> u64 {
        self.notifications_received
    }

    pub fn jobs_dropped(&self) -> u64 {
        self.jobs_dropped
    }

    pub fn last_renewal(&self) -> Option<&LastRenewal> {
        self.last_renewal.as_ref()
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedState = Arc<RwLock<ServerState>>;

pub fn new_shared_state() -> SharedState {
    Arc::new(RwLock::new(ServerState::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let mut state = ServerState::new();
        state.record_notification();
        state.record_notification();
        state.record_dropped_job();
        assert_eq!(state.notifications_received(), 2);
        assert_eq!(state.jobs_dropped(), 1);
    }

    #[test]
    fn last_renewal_snapshot() {
        let mut state = ServerState::new();
        assert!(state.last_renewal().is_none());

        state.set_last_renewal(RenewalReport::default());
        let last = state.last_renewal().unwrap();
        assert_eq!(last.successes, 0);
        assert_eq!(last.failures, 0);
    }
}
