//! ChangeSource trait definition.
//!
//! This module defines [`ChangeSource`], the capability the reconciliation
//! core consumes: an incremental change stream with an opaque resumable
//! cursor, plus push-notification channel registration.
//!
//! Implementations are responsible for authentication, pagination, and the
//! wire format; callers only ever see [`ChangeRecord`]s and cursors.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use worksync_core::{ChangeRecord, ResourceKind};

use crate::error::{SourceError, SourceResult};

/// A boxed future for async trait methods, keeping the trait object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One batch of changes plus the cursor to resume from next time.
///
/// The cursor only ever advances; callers must persist it after a successful
/// pass and never cache it across invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    /// The changes since the requested cursor, in stream order.
    pub changes: Vec<ChangeRecord>,
    /// The cursor marking the end of this window.
    pub new_cursor: String,
}

impl ChangeBatch {
    /// Creates a batch.
    pub fn new(changes: Vec<ChangeRecord>, new_cursor: impl Into<String>) -> Self {
        Self {
            changes,
            new_cursor: new_cursor.into(),
        }
    }

    /// Creates an empty batch that only advances the cursor.
    pub fn empty(new_cursor: impl Into<String>) -> Self {
        Self::new(Vec::new(), new_cursor)
    }
}

/// Parameters for registering a push-notification channel.
#[derive(Debug, Clone)]
pub struct WatchRequest {
    /// The principal the channel acts for.
    pub principal: String,
    /// What the channel watches.
    pub target: ResourceKind,
    /// Caller-generated globally unique channel id.
    pub channel_id: String,
    /// HTTPS endpoint the source will push notifications to.
    pub callback_url: String,
}

/// An active push-notification channel as granted by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLease {
    /// The channel id echoed back by the source.
    pub channel_id: String,
    /// Source-assigned opaque id correlating notifications to this channel.
    pub resource_id: String,
    /// Source-imposed expiry; observed maximum around seven days out.
    pub expires_at: DateTime<Utc>,
}

/// The change-notification capability the reconciliation core consumes.
///
/// # Implementation Notes
///
/// - `list_changes_since` must absorb pagination internally and return the
///   whole window in one logical batch; the reconciler issues exactly one
///   call per notification.
/// - Cursors are opaque; implementations must hand back a cursor even for an
///   empty window so the caller can keep advancing.
/// - All methods act under delegated access for the named principal.
pub trait ChangeSource: Send + Sync {
    /// Returns the name of this source (e.g., "google").
    fn name(&self) -> &str;

    /// Returns a fresh cursor positioned at "now" for the target.
    ///
    /// Used on the first ever notification for a principal, when nothing has
    /// been persisted yet.
    fn get_start_cursor(
        &self,
        principal: String,
        target: ResourceKind,
    ) -> BoxFuture<'_, SourceResult<String>>;

    /// Lists all changes between `cursor` and the head of the stream.
    fn list_changes_since(
        &self,
        principal: String,
        target: ResourceKind,
        cursor: String,
    ) -> BoxFuture<'_, SourceResult<ChangeBatch>>;

    /// Registers a push-notification channel for the target.
    fn watch(&self, request: WatchRequest) -> BoxFuture<'_, SourceResult<ChannelLease>>;

    /// Stops a superseded channel under the owning principal's delegated
    /// access. Best-effort; stale channels expire on their own within the
    /// lease window.
    fn stop_channel(
        &self,
        principal: String,
        channel_id: String,
        resource_id: String,
    ) -> BoxFuture<'_, SourceResult<()>>;
}

/// A source that fails every operation with a fixed error.
///
/// Useful in tests and as a placeholder when a real source fails to
/// initialize.
#[derive(Debug)]
pub struct FailingSource {
    name: String,
    error: SourceError,
}

impl FailingSource {
    /// Creates a new failing source.
    pub fn new(name: impl Into<String>, error: SourceError) -> Self {
        Self {
            name: name.into(),
            error,
        }
    }

    fn error(&self) -> SourceError {
        SourceError::new(self.error.code(), self.error.message())
    }
}

impl ChangeSource for FailingSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_start_cursor(
        &self,
        principal: String,
        _target: ResourceKind,
    ) -> BoxFuture<'_, SourceResult<String>> {
        let error = self.error().with_principal(principal);
        Box::pin(async move { Err(error) })
    }

    fn list_changes_since(
        &self,
        principal: String,
        _target: ResourceKind,
        _cursor: String,
    ) -> BoxFuture<'_, SourceResult<ChangeBatch>> {
        let error = self.error().with_principal(principal);
        Box::pin(async move { Err(error) })
    }

    fn watch(&self, request: WatchRequest) -> BoxFuture<'_, SourceResult<ChannelLease>> {
        let error = self.error().with_principal(request.principal);
        Box::pin(async move { Err(error) })
    }

    fn stop_channel(
        &self,
        principal: String,
        _channel_id: String,
        _resource_id: String,
    ) -> BoxFuture<'_, SourceResult<()>> {
        let error = self.error().with_principal(principal);
        Box::pin(async move { Err(error) })
    }
}
