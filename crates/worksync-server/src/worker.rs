//! Post-ack reconciliation worker.
//!
//! Webhook handlers enqueue a [`ReconcileJob`] and return immediately; the
//! worker drains the queue and runs each pass in its own task so
//! notifications for different resources proceed concurrently.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use worksync_core::ResourceKind;

use crate::reconciler::ChangeReconciler;

/// One queued reconciliation request.
#[derive(Debug, Clone)]
pub struct ReconcileJob {
    /// The resource id carried by the notification headers.
    pub resource_id: String,
    /// Stream the receiving endpoint serves, used when the resource id
    /// does not resolve to a stored channel.
    pub fallback_target: ResourceKind,
}

/// Creates the bounded job queue connecting handlers to the worker.
pub fn reconcile_queue(capacity: usize) -> (mpsc::Sender<ReconcileJob>, mpsc::Receiver<ReconcileJob>) {
    mpsc::channel(capacity)
}

/// Spawns the drain loop. Exits when every sender is dropped.
pub fn spawn_reconcile_worker(
    mut jobs: mpsc::Receiver<ReconcileJob>,
    reconciler: Arc<ChangeReconciler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = jobs.recv().await {
            let reconciler = reconciler.clone();
            tokio::spawn(async move {
                match reconciler
                    .handle_notification(&job.resource_id, job.fallback_target)
                    .await
                {
                    Ok(report) => {
                        debug!(
                            resource_id = %job.resource_id,
                            total = report.total(),
                            "reconcile job finished"
                        );
                    }
                    Err(err) => {
                        // Terminal for this notification; the next delivery
                        // retries from the un-advanced cursor.
                        error!(
                            resource_id = %job.resource_id,
                            error = %err,
                            "reconcile job failed"
                        );
                    }
                }
            });
        }
        info!("reconcile worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use worksync_core::TrivialityPolicy;
    use worksync_providers::source::BoxFuture;
    use worksync_providers::{ChangeBatch, ChangeSource, ChannelLease, SourceResult, WatchRequest};

    use crate::cache::shared_seen_cache;
    use crate::classifier::ChangeClassifier;
    use crate::store::MemoryStore;

    struct EmptySource;

    impl ChangeSource for EmptySource {
        fn name(&self) -> &str {
            "empty"
        }

        fn get_start_cursor(
            &self,
            _principal: String,
            _target: ResourceKind,
        ) -> BoxFuture<'_, SourceResult<String>> {
            Box::pin(async move { Ok("c0".to_string()) })
        }

        fn list_changes_since(
            &self,
            _principal: String,
            _target: ResourceKind,
            cursor: String,
        ) -> BoxFuture<'_, SourceResult<ChangeBatch>> {
            Box::pin(async move { Ok(ChangeBatch::empty(format!("{cursor}+"))) })
        }

        fn watch(&self, _request: WatchRequest) -> BoxFuture<'_, SourceResult<ChannelLease>> {
            unimplemented!("not used")
        }

        fn stop_channel(
            &self,
            _principal: String,
            _channel_id: String,
            _resource_id: String,
        ) -> BoxFuture<'_, SourceResult<()>> {
            Box::pin(async move { Ok(()) })
        }
    }

    #[tokio::test]
    async fn worker_drains_jobs_and_stops_on_close() {
        let store = Arc::new(MemoryStore::new());
        let classifier = ChangeClassifier::new(
            shared_seen_cache(Duration::from_secs(600)),
            shared_seen_cache(Duration::from_secs(3600)),
            TrivialityPolicy::default(),
        );
        let reconciler = Arc::new(ChangeReconciler::new(
            Arc::new(EmptySource),
            store.clone(),
            classifier,
            "admin@corp.test",
            Duration::from_secs(30),
        ));

        let (tx, rx) = reconcile_queue(8);
        let worker = spawn_reconcile_worker(rx, reconciler);

        tx.send(ReconcileJob {
            resource_id: "res-1".to_string(),
            fallback_target: ResourceKind::Drive,
        })
        .await
        .unwrap();
        drop(tx);

        worker.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            store.cursor("admin@corp.test", &ResourceKind::Drive).as_deref(),
            Some("c0+")
        );
    }
}
