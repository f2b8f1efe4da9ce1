//! Change reconciliation: notification in, store mutations out.
//!
//! One [`ChangeReconciler::handle_notification`] call covers one delivered
//! webhook: resolve the channel, load the cursor, pull the change window,
//! classify each record, apply the significant ones, persist the new
//! cursor once per batch.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use worksync_core::{ChangeRecord, Decision, ResourceKind};
use worksync_providers::{ChangeBatch, ChangeSource};

use crate::classifier::ChangeClassifier;
use crate::error::{ServerError, ServerResult};
use crate::store::{EntityKind, SyncStore};

/// Per-batch outcome counters, logged after every pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub duplicates: usize,
    pub trivial: usize,
    pub upserts: usize,
    pub deletes: usize,
    pub insignificant: usize,
    /// Records whose store mutation failed. Never aborts the batch.
    pub failures: usize,
    /// Cursor persisted at the end of the pass.
    pub new_cursor: String,
}

impl ReconcileReport {
    /// Total records examined in the pass.
    pub fn total(&self) -> usize {
        self.duplicates + self.trivial + self.upserts + self.deletes + self.insignificant
            + self.failures
    }
}

/// Orchestrates one reconciliation pass per incoming notification.
///
/// Passes for different resource ids run concurrently; racing passes for
/// the same resource id are tolerated because upserts are idempotent and
/// cursor writes are last-write-wins.
pub struct ChangeReconciler {
    source: Arc<dyn ChangeSource>,
    store: Arc<dyn SyncStore>,
    classifier: ChangeClassifier,
    admin_principal: String,
    source_timeout: Duration,
}

impl ChangeReconciler {
    pub fn new(
        source: Arc<dyn ChangeSource>,
        store: Arc<dyn SyncStore>,
        classifier: ChangeClassifier,
        admin_principal: impl Into<String>,
        source_timeout: Duration,
    ) -> Self {
        Self {
            source,
            store,
            classifier,
            admin_principal: admin_principal.into(),
            source_timeout,
        }
    }

    /// Runs one reconciliation pass for a delivered notification.
    ///
    /// `fallback_target` names the stream the webhook endpoint serves, used
    /// when the resource id does not resolve to a stored channel. A source
    /// failure drops the pass without advancing the cursor; the next
    /// delivery retries the same window.
    pub async fn handle_notification(
        &self,
        resource_id: &str,
        fallback_target: ResourceKind,
    ) -> ServerResult<ReconcileReport> {
        let (principal, target) = match self.store.resolve_channel(resource_id.to_string()).await? {
            Some(channel) => (channel.principal, channel.target),
            None => {
                warn!(
                    resource_id,
                    admin = %self.admin_principal,
                    "resource id does not resolve, falling back to admin principal"
                );
                (self.admin_principal.clone(), fallback_target)
            }
        };

        let cursor = match self
            .store
            .get_cursor(principal.clone(), target.clone())
            .await?
        {
            Some(cursor) => cursor,
            None => {
                debug!(principal = %principal, target = %target, "no stored cursor, fetching a fresh one");
                self.bounded(self.source.get_start_cursor(principal.clone(), target.clone()))
                    .await?
            }
        };

        let batch = self
            .bounded(
                self.source
                    .list_changes_since(principal.clone(), target.clone(), cursor),
            )
            .await?;

        let report = self.apply_batch(resource_id, &principal, &target, batch).await?;

        info!(
            principal = %principal,
            target = %target,
            resource_id,
            total = report.total(),
            upserts = report.upserts,
            deletes = report.deletes,
            duplicates = report.duplicates,
            trivial = report.trivial,
            insignificant = report.insignificant,
            failures = report.failures,
            "reconciliation pass complete"
        );
        Ok(report)
    }

    async fn apply_batch(
        &self,
        resource_id: &str,
        principal: &str,
        target: &ResourceKind,
        batch: ChangeBatch,
    ) -> ServerResult<ReconcileReport> {
        let mut report = ReconcileReport {
            new_cursor: batch.new_cursor.clone(),
            ..Default::default()
        };

        for record in &batch.changes {
            match self.classifier.classify(resource_id, record) {
                Decision::Duplicate => report.duplicates += 1,
                Decision::Trivial => report.trivial += 1,
                Decision::Insignificant => {
                    debug!(
                        principal,
                        resource_id,
                        change_id = record.change_id(),
                        "insignificant change, skipping"
                    );
                    report.insignificant += 1;
                }
                Decision::SignificantUpsert => match self.apply_upsert(record).await {
                    Ok(()) => report.upserts += 1,
                    Err(err) => {
                        error!(
                            principal,
                            resource_id,
                            change_id = record.change_id(),
                            entity_id = record.entity_id(),
                            error = %err,
                            "failed to apply upsert"
                        );
                        report.failures += 1;
                    }
                },
                Decision::SignificantDelete => {
                    match self
                        .store
                        .mark_deleted(entity_kind(record), record.entity_id().to_string())
                        .await
                    {
                        Ok(()) => report.deletes += 1,
                        Err(err) => {
                            error!(
                                principal,
                                resource_id,
                                change_id = record.change_id(),
                                entity_id = record.entity_id(),
                                error = %err,
                                "failed to apply delete"
                            );
                            report.failures += 1;
                        }
                    }
                }
            }
        }

        // Once per batch. A crash before this line reprocesses the whole
        // window on the next delivery, which is safe: upserts are
        // idempotent and the dedup cache absorbs exact redeliveries.
        self.store
            .save_cursor(
                principal.to_string(),
                target.clone(),
                batch.new_cursor.clone(),
            )
            .await?;

        Ok(report)
    }

    async fn apply_upsert(&self, record: &ChangeRecord) -> ServerResult<()> {
        let attributes = match record {
            ChangeRecord::FileChange { snapshot, .. } => serde_json::to_value(snapshot)
                .map_err(|e| ServerError::config(format!("unserializable snapshot: {e}")))?,
            ChangeRecord::EventChange { snapshot, .. } => serde_json::to_value(snapshot)
                .map_err(|e| ServerError::config(format!("unserializable snapshot: {e}")))?,
            ChangeRecord::FileRemoval { .. } => {
                // Removals never classify as upserts.
                return Ok(());
            }
        };
        self.store
            .upsert_entity(entity_kind(record), record.entity_id().to_string(), attributes)
            .await?;
        Ok(())
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = worksync_providers::SourceResult<T>>,
    ) -> ServerResult<T> {
        match tokio::time::timeout(self.source_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ServerError::SourceTimeout(self.source_timeout)),
        }
    }
}

fn entity_kind(record: &ChangeRecord) -> EntityKind {
    match record {
        ChangeRecord::FileChange { .. } | ChangeRecord::FileRemoval { .. } => EntityKind::File,
        ChangeRecord::EventChange { .. } => EntityKind::Event,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::Utc;
    use worksync_core::{FileSnapshot, TrivialityPolicy};
    use worksync_providers::source::{BoxFuture, ChannelLease, WatchRequest};
    use worksync_providers::{SourceError, SourceResult};

    use crate::cache::shared_seen_cache;
    use crate::store::MemoryStore;

    /// Serves canned change batches keyed by (target, cursor).
    struct ScriptedSource {
        start_cursor: String,
        batches: Mutex<HashMap<(String, String), ChangeBatch>>,
        fail_listing: bool,
    }

    impl ScriptedSource {
        fn new(start_cursor: &str) -> Self {
            Self {
                start_cursor: start_cursor.to_string(),
                batches: Mutex::new(HashMap::new()),
                fail_listing: false,
            }
        }

        fn failing() -> Self {
            Self {
                start_cursor: "c0".to_string(),
                batches: Mutex::new(HashMap::new()),
                fail_listing: true,
            }
        }

        fn script(&self, target: &ResourceKind, cursor: &str, batch: ChangeBatch) {
            self.batches
                .lock()
                .unwrap()
                .insert((target.storage_key(), cursor.to_string()), batch);
        }
    }

    impl ChangeSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        fn get_start_cursor(
            &self,
            _principal: String,
            _target: ResourceKind,
        ) -> BoxFuture<'_, SourceResult<String>> {
            Box::pin(async move { Ok(self.start_cursor.clone()) })
        }

        fn list_changes_since(
            &self,
            _principal: String,
            target: ResourceKind,
            cursor: String,
        ) -> BoxFuture<'_, SourceResult<ChangeBatch>> {
            Box::pin(async move {
                if self.fail_listing {
                    return Err(SourceError::network("connection reset"));
                }
                let batches = self.batches.lock().unwrap();
                match batches.get(&(target.storage_key(), cursor.clone())) {
                    Some(batch) => Ok(batch.clone()),
                    None => Ok(ChangeBatch::empty(cursor)),
                }
            })
        }

        fn watch(&self, _request: WatchRequest) -> BoxFuture<'_, SourceResult<ChannelLease>> {
            Box::pin(async move { Err(SourceError::internal("not scripted")) })
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

    /// Never completes a listing; the timeout bound has to cut it off.
    struct HangingSource;

    impl ChangeSource for HangingSource {
        fn name(&self) -> &str {
            "hanging"
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
            _cursor: String,
        ) -> BoxFuture<'_, SourceResult<ChangeBatch>> {
            Box::pin(std::future::pending())
        }

        fn watch(&self, _request: WatchRequest) -> BoxFuture<'_, SourceResult<ChannelLease>> {
            Box::pin(async move { Err(SourceError::internal("not supported")) })
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

    fn classifier() -> ChangeClassifier {
        ChangeClassifier::new(
            shared_seen_cache(Duration::from_secs(600)),
            shared_seen_cache(Duration::from_secs(3600)),
            TrivialityPolicy::default(),
        )
    }

    fn reconciler(
        source: Arc<ScriptedSource>,
        store: Arc<MemoryStore>,
    ) -> ChangeReconciler {
        ChangeReconciler::new(
            source,
            store,
            classifier(),
            "admin@corp.test",
            Duration::from_secs(30),
        )
    }

    fn full_snapshot(id: &str, name: &str) -> FileSnapshot {
        FileSnapshot {
            name: Some(name.to_string()),
            size: Some(1024),
            mime_type: Some("application/pdf".to_string()),
            modified_time: Some(Utc::now()),
            ..FileSnapshot::new(id)
        }
    }

    #[tokio::test]
    async fn mixed_batch_applies_and_advances_cursor() {
        let source = Arc::new(ScriptedSource::new("c0"));
        let trivial = ChangeRecord::FileChange {
            change_id: "ch1".to_string(),
            file_id: "f0".to_string(),
            snapshot: Some(FileSnapshot::new("f0")),
        };
        let removal = ChangeRecord::FileRemoval {
            change_id: "ch2".to_string(),
            file_id: "f1".to_string(),
        };
        let upsert = ChangeRecord::FileChange {
            change_id: "ch3".to_string(),
            file_id: "f2".to_string(),
            snapshot: Some(full_snapshot("f2", "a.pdf")),
        };
        source.script(
            &ResourceKind::Drive,
            "c0",
            ChangeBatch::new(vec![trivial, removal, upsert], "c1"),
        );

        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(source, store.clone());

        let report = reconciler
            .handle_notification("res-1", ResourceKind::Drive)
            .await
            .unwrap();

        assert_eq!(report.trivial, 1);
        assert_eq!(report.deletes, 1);
        assert_eq!(report.upserts, 1);
        assert_eq!(report.failures, 0);
        assert!(store.is_deleted(EntityKind::File, "f1"));
        let stored = store.entity(EntityKind::File, "f2").unwrap();
        assert_eq!(stored["name"], "a.pdf");
        assert_eq!(
            store.cursor("admin@corp.test", &ResourceKind::Drive).as_deref(),
            Some("c1")
        );
    }

    #[tokio::test]
    async fn redelivered_batch_counts_duplicates_without_mutation() {
        let source = Arc::new(ScriptedSource::new("c0"));
        let upsert = ChangeRecord::FileChange {
            change_id: "ch1".to_string(),
            file_id: "f1".to_string(),
            snapshot: Some(full_snapshot("f1", "a.pdf")),
        };
        source.script(
            &ResourceKind::Drive,
            "c0",
            ChangeBatch::new(vec![upsert.clone()], "c1"),
        );
        source.script(
            &ResourceKind::Drive,
            "c1",
            ChangeBatch::new(vec![upsert], "c1"),
        );

        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(source, store.clone());

        let first = reconciler
            .handle_notification("res-1", ResourceKind::Drive)
            .await
            .unwrap();
        assert_eq!(first.upserts, 1);

        let second = reconciler
            .handle_notification("res-1", ResourceKind::Drive)
            .await
            .unwrap();
        assert_eq!(second.duplicates, 1);
        assert_eq!(second.upserts, 0);
    }

    #[tokio::test]
    async fn source_failure_leaves_cursor_untouched() {
        let source = Arc::new(ScriptedSource::failing());
        let store = Arc::new(MemoryStore::new());
        store
            .save_cursor(
                "admin@corp.test".to_string(),
                ResourceKind::Drive,
                "c5".to_string(),
            )
            .await
            .unwrap();

        let reconciler = reconciler(source, store.clone());
        let result = reconciler
            .handle_notification("res-1", ResourceKind::Drive)
            .await;

        assert!(matches!(result, Err(ServerError::Source(_))));
        assert_eq!(
            store.cursor("admin@corp.test", &ResourceKind::Drive).as_deref(),
            Some("c5")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hung_source_times_out_without_advancing_cursor() {
        let store = Arc::new(MemoryStore::new());
        store
            .save_cursor(
                "admin@corp.test".to_string(),
                ResourceKind::Drive,
                "c5".to_string(),
            )
            .await
            .unwrap();

        let reconciler = ChangeReconciler::new(
            Arc::new(HangingSource),
            store.clone(),
            classifier(),
            "admin@corp.test",
            Duration::from_secs(30),
        );

        let result = reconciler
            .handle_notification("res-1", ResourceKind::Drive)
            .await;

        assert!(matches!(
            result,
            Err(ServerError::SourceTimeout(d)) if d == Duration::from_secs(30)
        ));
        assert_eq!(
            store.cursor("admin@corp.test", &ResourceKind::Drive).as_deref(),
            Some("c5")
        );
    }

    #[tokio::test]
    async fn cursor_never_regresses_across_passes() {
        let source = Arc::new(ScriptedSource::new("c0"));
        for n in 0..3 {
            let upsert = ChangeRecord::FileChange {
                change_id: format!("ch{n}"),
                file_id: format!("f{n}"),
                snapshot: Some(full_snapshot(&format!("f{n}"), "a.pdf")),
            };
            source.script(
                &ResourceKind::Drive,
                &format!("c{n}"),
                ChangeBatch::new(vec![upsert], format!("c{}", n + 1)),
            );
        }

        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(source, store.clone());

        let mut last = String::new();
        for _ in 0..3 {
            reconciler
                .handle_notification("res-1", ResourceKind::Drive)
                .await
                .unwrap();
            let cursor = store
                .cursor("admin@corp.test", &ResourceKind::Drive)
                .unwrap();
            assert!(cursor > last);
            last = cursor;
        }
        assert_eq!(last, "c3");
    }

    #[tokio::test]
    async fn resolved_channel_routes_to_its_principal() {
        let source = Arc::new(ScriptedSource::new("c0"));
        source.script(
            &ResourceKind::calendar("primary"),
            "c0",
            ChangeBatch::empty("c1"),
        );

        let store = Arc::new(MemoryStore::new());
        store
            .save_channel(crate::store::ChannelRecord {
                principal: "alice@corp.test".to_string(),
                target: ResourceKind::calendar("primary"),
                channel_id: "ch-a".to_string(),
                resource_id: "res-cal".to_string(),
                expires_at: Utc::now() + chrono::Duration::days(7),
            })
            .await
            .unwrap();

        let reconciler = reconciler(source, store.clone());
        reconciler
            .handle_notification("res-cal", ResourceKind::Drive)
            .await
            .unwrap();

        // Cursor lands under the channel's principal and target, not the
        // fallback.
        assert_eq!(
            store
                .cursor("alice@corp.test", &ResourceKind::calendar("primary"))
                .as_deref(),
            Some("c1")
        );
        assert!(store.cursor("admin@corp.test", &ResourceKind::Drive).is_none());
    }

    #[tokio::test]
    async fn same_snapshot_upserts_are_idempotent() {
        let source = Arc::new(ScriptedSource::new("c0"));
        let snapshot = full_snapshot("f1", "a.pdf");
        let first = ChangeRecord::FileChange {
            change_id: "ch1".to_string(),
            file_id: "f1".to_string(),
            snapshot: Some(snapshot.clone()),
        };
        let second = ChangeRecord::FileChange {
            change_id: "ch2".to_string(),
            file_id: "f1".to_string(),
            snapshot: Some(snapshot),
        };
        source.script(
            &ResourceKind::Drive,
            "c0",
            ChangeBatch::new(vec![first], "c1"),
        );
        source.script(
            &ResourceKind::Drive,
            "c1",
            ChangeBatch::new(vec![second], "c2"),
        );

        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(source, store.clone());

        reconciler
            .handle_notification("res-1", ResourceKind::Drive)
            .await
            .unwrap();
        let after_first = store.entity(EntityKind::File, "f1").unwrap();

        reconciler
            .handle_notification("res-1", ResourceKind::Drive)
            .await
            .unwrap();
        let after_second = store.entity(EntityKind::File, "f1").unwrap();

        assert_eq!(after_first, after_second);
    }
}
