//! Push-notification channel renewal.
//!
//! Channels expire roughly seven days after creation; the renewer
//! re-registers every principal's channels well before that, serially and
//! with a small pause between registrations to stay under the source's
//! rate limits.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use worksync_core::ResourceKind;
use worksync_providers::{ChangeSource, WatchRequest};

use crate::error::{ServerError, ServerResult};
use crate::store::{ChannelRecord, SyncStore};

/// One successfully renewed channel.
#[derive(Debug, Clone, Serialize)]
pub struct RenewalOutcome {
    pub principal: String,
    pub target: ResourceKind,
    pub channel_id: String,
    pub resource_id: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// One failed renewal. Other principals are unaffected.
#[derive(Debug, Clone, Serialize)]
pub struct RenewalFailure {
    pub principal: String,
    pub target: ResourceKind,
    pub reason: String,
}

/// Outcome of a full renewal run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RenewalReport {
    pub successes: Vec<RenewalOutcome>,
    pub failures: Vec<RenewalFailure>,
}

impl RenewalReport {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Re-registers channels for every known principal and resource stream.
pub struct SubscriptionRenewer {
    source: Arc<dyn ChangeSource>,
    store: Arc<dyn SyncStore>,
    callback_url: String,
    pause_between: Duration,
}

impl SubscriptionRenewer {
    pub fn new(
        source: Arc<dyn ChangeSource>,
        store: Arc<dyn SyncStore>,
        callback_url: impl Into<String>,
        pause_between: Duration,
    ) -> Self {
        Self {
            source,
            store,
            callback_url: callback_url.into(),
            pause_between,
        }
    }

    /// Renews every principal's channels, serially.
    ///
    /// A failing principal is recorded and skipped; an error is returned
    /// only when the principal list itself cannot be loaded.
    pub async fn renew_all(&self) -> ServerResult<RenewalReport> {
        let principals = self.store.list_principals().await?;
        let mut report = RenewalReport::default();
        let mut first = true;

        for principal in &principals {
            for target in principal.targets() {
                if !first {
                    tokio::time::sleep(self.pause_between).await;
                }
                first = false;

                match self.renew_one(&principal.email, target.clone()).await {
                    Ok(outcome) => {
                        info!(
                            principal = %outcome.principal,
                            target = %outcome.target,
                            channel_id = %outcome.channel_id,
                            expires_at = %outcome.expires_at,
                            "channel renewed"
                        );
                        report.successes.push(outcome);
                    }
                    Err(err) => {
                        warn!(
                            principal = %principal.email,
                            target = %target,
                            error = %err,
                            "channel renewal failed"
                        );
                        report.failures.push(RenewalFailure {
                            principal: principal.email.clone(),
                            target,
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            successes = report.successes.len(),
            failures = report.failures.len(),
            "renewal run complete"
        );
        Ok(report)
    }

    /// Registers a fresh channel for one principal and stream, supersedes
    /// the stored one, and best-effort stops the old registration upstream.
    async fn renew_one(
        &self,
        principal: &str,
        target: ResourceKind,
    ) -> ServerResult<RenewalOutcome> {
        let channel_id = Uuid::new_v4().to_string();
        let lease = self
            .source
            .watch(WatchRequest {
                principal: principal.to_string(),
                target: target.clone(),
                channel_id: channel_id.clone(),
                callback_url: self.callback_url.clone(),
            })
            .await
            .map_err(ServerError::from)?;

        let record = ChannelRecord {
            principal: principal.to_string(),
            target: target.clone(),
            channel_id: lease.channel_id.clone(),
            resource_id: lease.resource_id.clone(),
            expires_at: lease.expires_at,
        };
        let superseded = self.store.save_channel(record).await?;

        if let Some(old) = superseded {
            if let Err(err) = self
                .source
                .stop_channel(
                    old.principal.clone(),
                    old.channel_id.clone(),
                    old.resource_id.clone(),
                )
                .await
            {
                warn!(
                    principal,
                    old_channel_id = %old.channel_id,
                    error = %err,
                    "failed to stop superseded channel, it will lapse at expiry"
                );
            }
        }

        Ok(RenewalOutcome {
            principal: principal.to_string(),
            target,
            channel_id: lease.channel_id,
            resource_id: lease.resource_id,
            expires_at: lease.expires_at,
        })
    }
}
