//! Persistence boundary: cursors, channels, and synced entities.
//!
//! [`SyncStore`] is the collaborator interface the reconciler and renewer
//! talk to. [`MemoryStore`] is the in-process implementation used by the
//! daemon and the tests; a database-backed store slots in behind the same
//! trait.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use worksync_core::ResourceKind;
use worksync_providers::BoxFuture;

/// Error from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The write conflicts with existing state.
    #[error("store constraint violated: {0}")]
    Constraint(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The kind of entity a store mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    File,
    Event,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Event => "event",
        }
    }
}

/// A persisted push-notification channel registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    /// The principal the channel watches on behalf of.
    pub principal: String,
    /// Which resource stream the channel covers.
    pub target: ResourceKind,
    /// Our generated channel id.
    pub channel_id: String,
    /// The source-assigned resource id notifications will carry.
    pub resource_id: String,
    /// Source-imposed expiry.
    pub expires_at: DateTime<Utc>,
}

/// A known principal and the calendars watched for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub email: String,
    pub calendar_ids: Vec<String>,
}

impl Principal {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            calendar_ids: vec!["primary".to_string()],
        }
    }

    pub fn with_calendars(email: impl Into<String>, calendar_ids: Vec<String>) -> Self {
        Self {
            email: email.into(),
            calendar_ids,
        }
    }

    /// All resource streams to watch for this principal.
    pub fn targets(&self) -> Vec<ResourceKind> {
        let mut targets = vec![ResourceKind::Drive];
        targets.extend(
            self.calendar_ids
                .iter()
                .map(|id| ResourceKind::calendar(id.clone())),
        );
        targets
    }
}

/// Persistence operations the reconciliation core depends on.
///
/// Implementations must be safe to call concurrently; the reconciler
/// re-fetches state on every pass instead of caching across invocations.
pub trait SyncStore: Send + Sync {
    /// Maps an incoming notification's resource id back to its channel.
    ///
    /// Returns `None` for unknown or superseded resource ids.
    fn resolve_channel(&self, resource_id: String)
    -> BoxFuture<'_, StoreResult<Option<ChannelRecord>>>;

    /// Creates or replaces an entity from a significant upsert.
    fn upsert_entity(
        &self,
        kind: EntityKind,
        natural_key: String,
        attributes: serde_json::Value,
    ) -> BoxFuture<'_, StoreResult<()>>;

    /// Tombstones an entity from a significant delete.
    fn mark_deleted(&self, kind: EntityKind, natural_key: String) -> BoxFuture<'_, StoreResult<()>>;

    /// Loads the persisted cursor for a principal's resource stream.
    fn get_cursor(
        &self,
        principal: String,
        target: ResourceKind,
    ) -> BoxFuture<'_, StoreResult<Option<String>>>;

    /// Persists the cursor for a principal's resource stream.
    fn save_cursor(
        &self,
        principal: String,
        target: ResourceKind,
        cursor: String,
    ) -> BoxFuture<'_, StoreResult<()>>;

    /// Persists a channel, superseding any prior one for the same
    /// principal and target. Returns the superseded channel so the caller
    /// can stop it upstream; the old resource id stops resolving
    /// immediately.
    fn save_channel(
        &self,
        record: ChannelRecord,
    ) -> BoxFuture<'_, StoreResult<Option<ChannelRecord>>>;

    /// All currently active channels.
    fn list_channels(&self) -> BoxFuture<'_, StoreResult<Vec<ChannelRecord>>>;

    /// All principals subscriptions are maintained for.
    fn list_principals(&self) -> BoxFuture<'_, StoreResult<Vec<Principal>>>;
}

#[derive(Default)]
struct MemoryInner {
    channels_by_resource: HashMap<String, ChannelRecord>,
    cursors: HashMap<(String, String), String>,
    entities: HashMap<(EntityKind, String), serde_json::Value>,
    deleted: HashSet<(EntityKind, String)>,
    principals: Vec<Principal>,
}

/// In-process [`SyncStore`] backed by hash maps.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with the given principals.
    pub fn with_principals(principals: Vec<Principal>) -> Self {
        Self {
            inner: RwLock::new(MemoryInner {
                principals,
                ..Default::default()
            }),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the stored attributes for an entity, if present and live.
    pub fn entity(&self, kind: EntityKind, natural_key: &str) -> Option<serde_json::Value> {
        self.read()
            .entities
            .get(&(kind, natural_key.to_string()))
            .cloned()
    }

    /// Returns true if the entity carries a deletion tombstone.
    pub fn is_deleted(&self, kind: EntityKind, natural_key: &str) -> bool {
        self.read().deleted.contains(&(kind, natural_key.to_string()))
    }

    /// Returns the stored cursor for a principal's resource stream.
    pub fn cursor(&self, principal: &str, target: &ResourceKind) -> Option<String> {
        self.read()
            .cursors
            .get(&(principal.to_string(), target.storage_key()))
            .cloned()
    }
}

impl SyncStore for MemoryStore {
    fn resolve_channel(
        &self,
        resource_id: String,
    ) -> BoxFuture<'_, StoreResult<Option<ChannelRecord>>> {
        Box::pin(async move {
            Ok(self.read().channels_by_resource.get(&resource_id).cloned())
        })
    }

    fn upsert_entity(
        &self,
        kind: EntityKind,
        natural_key: String,
        attributes: serde_json::Value,
    ) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.write();
            inner.deleted.remove(&(kind, natural_key.clone()));
            inner.entities.insert((kind, natural_key), attributes);
            Ok(())
        })
    }

    fn mark_deleted(
        &self,
        kind: EntityKind,
        natural_key: String,
    ) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.write();
            inner.entities.remove(&(kind, natural_key.clone()));
            inner.deleted.insert((kind, natural_key));
            Ok(())
        })
    }

    fn get_cursor(
        &self,
        principal: String,
        target: ResourceKind,
    ) -> BoxFuture<'_, StoreResult<Option<String>>> {
        Box::pin(async move {
            Ok(self
                .read()
                .cursors
                .get(&(principal, target.storage_key()))
                .cloned())
        })
    }

    fn save_cursor(
        &self,
        principal: String,
        target: ResourceKind,
        cursor: String,
    ) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            self.write()
                .cursors
                .insert((principal, target.storage_key()), cursor);
            Ok(())
        })
    }

    fn save_channel(
        &self,
        record: ChannelRecord,
    ) -> BoxFuture<'_, StoreResult<Option<ChannelRecord>>> {
        Box::pin(async move {
            let mut inner = self.write();
            let superseded = inner
                .channels_by_resource
                .values()
                .find(|c| c.principal == record.principal && c.target == record.target)
                .cloned();
            if let Some(old) = &superseded {
                inner.channels_by_resource.remove(&old.resource_id);
                debug!(
                    principal = %record.principal,
                    target = %record.target,
                    old_resource_id = %old.resource_id,
                    new_resource_id = %record.resource_id,
                    "superseding channel"
                );
            }
            inner
                .channels_by_resource
                .insert(record.resource_id.clone(), record);
            Ok(superseded)
        })
    }

    fn list_channels(&self) -> BoxFuture<'_, StoreResult<Vec<ChannelRecord>>> {
        Box::pin(async move {
            let mut channels: Vec<_> = self.read().channels_by_resource.values().cloned().collect();
            channels.sort_by(|a, b| {
                (a.principal.clone(), a.target.storage_key())
                    .cmp(&(b.principal.clone(), b.target.storage_key()))
            });
            Ok(channels)
        })
    }

    fn list_principals(&self) -> BoxFuture<'_, StoreResult<Vec<Principal>>> {
        Box::pin(async move { Ok(self.read().principals.clone()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(principal: &str, target: ResourceKind, resource_id: &str) -> ChannelRecord {
        ChannelRecord {
            principal: principal.to_string(),
            target,
            channel_id: format!("ch-{resource_id}"),
            resource_id: resource_id.to_string(),
            expires_at: Utc::now() + chrono::Duration::days(7),
        }
    }

    #[tokio::test]
    async fn upsert_then_delete_leaves_tombstone() {
        let store = MemoryStore::new();
        store
            .upsert_entity(
                EntityKind::File,
                "f1".to_string(),
                serde_json::json!({"name": "a.pdf"}),
            )
            .await
            .unwrap();
        assert!(store.entity(EntityKind::File, "f1").is_some());

        store
            .mark_deleted(EntityKind::File, "f1".to_string())
            .await
            .unwrap();
        assert!(store.entity(EntityKind::File, "f1").is_none());
        assert!(store.is_deleted(EntityKind::File, "f1"));
    }

    #[tokio::test]
    async fn upsert_clears_tombstone() {
        let store = MemoryStore::new();
        store
            .mark_deleted(EntityKind::File, "f1".to_string())
            .await
            .unwrap();
        store
            .upsert_entity(EntityKind::File, "f1".to_string(), serde_json::json!({}))
            .await
            .unwrap();
        assert!(!store.is_deleted(EntityKind::File, "f1"));
    }

    #[tokio::test]
    async fn cursor_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(
            store
                .get_cursor("alice@corp.test".to_string(), ResourceKind::Drive)
                .await
                .unwrap(),
            None
        );

        store
            .save_cursor(
                "alice@corp.test".to_string(),
                ResourceKind::Drive,
                "cursor-5".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(
            store
                .get_cursor("alice@corp.test".to_string(), ResourceKind::Drive)
                .await
                .unwrap()
                .as_deref(),
            Some("cursor-5")
        );
        // Calendar cursor is independent of the drive cursor.
        assert_eq!(
            store
                .get_cursor(
                    "alice@corp.test".to_string(),
                    ResourceKind::calendar("primary")
                )
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn save_channel_supersedes_prior_mapping() {
        let store = MemoryStore::new();
        store
            .save_channel(channel("alice@corp.test", ResourceKind::Drive, "res-old"))
            .await
            .unwrap();
        assert!(
            store
                .resolve_channel("res-old".to_string())
                .await
                .unwrap()
                .is_some()
        );

        let superseded = store
            .save_channel(channel("alice@corp.test", ResourceKind::Drive, "res-new"))
            .await
            .unwrap();
        assert_eq!(superseded.unwrap().resource_id, "res-old");

        // Stale resource id no longer resolves.
        assert!(
            store
                .resolve_channel("res-old".to_string())
                .await
                .unwrap()
                .is_none()
        );
        let resolved = store
            .resolve_channel("res-new".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.principal, "alice@corp.test");
    }

    #[tokio::test]
    async fn channels_for_different_targets_coexist() {
        let store = MemoryStore::new();
        store
            .save_channel(channel("alice@corp.test", ResourceKind::Drive, "res-d"))
            .await
            .unwrap();
        let superseded = store
            .save_channel(channel(
                "alice@corp.test",
                ResourceKind::calendar("primary"),
                "res-c",
            ))
            .await
            .unwrap();
        assert!(superseded.is_none());
        assert_eq!(store.list_channels().await.unwrap().len(), 2);
    }

    #[test]
    fn principal_targets_cover_drive_and_calendars() {
        let principal =
            Principal::with_calendars("alice@corp.test", vec!["primary".to_string(), "team".to_string()]);
        let targets = principal.targets();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0], ResourceKind::Drive);
        assert_eq!(targets[1], ResourceKind::calendar("primary"));
    }
}
