//! Google Workspace change source implementation.
//!
//! This module implements the [`ChangeSource`] trait over the Drive changes
//! API and the Calendar events API. Access tokens arrive through a
//! [`TokenProvider`] callback: the deployment performs domain-wide
//! delegation (a service identity minting a token for each principal) and
//! this crate never sees credentials, only short-lived bearer tokens.
//!
//! # Example
//!
//! ```ignore
//! use worksync_providers::google::{GoogleChangeSource, TokenProvider};
//!
//! let tokens: TokenProvider = Arc::new(|principal| {
//!     Box::pin(async move { mint_delegated_token(&principal).await })
//! });
//! let source = GoogleChangeSource::new(tokens, Duration::from_secs(30));
//! ```

pub(crate) mod calendar;
pub(crate) mod drive;

use std::sync::Arc;
use std::time::Duration;

use worksync_core::ResourceKind;

use crate::error::SourceResult;
use crate::source::{BoxFuture, ChangeBatch, ChangeSource, ChannelLease, WatchRequest};

pub use calendar::CalendarEventsClient;
pub use drive::DriveChangesClient;

/// Callback minting a delegated access token for a principal.
pub type TokenProvider =
    Arc<dyn Fn(String) -> BoxFuture<'static, SourceResult<String>> + Send + Sync>;

/// Change source backed by the Google Drive and Calendar APIs.
pub struct GoogleChangeSource {
    tokens: TokenProvider,
    timeout: Duration,
}

impl GoogleChangeSource {
    /// Creates a new source with the given token provider and per-request
    /// timeout bound.
    pub fn new(tokens: TokenProvider, timeout: Duration) -> Self {
        Self { tokens, timeout }
    }

    /// Creates a source that serves one fixed token for every principal.
    ///
    /// Suitable for single-principal deployments and manual testing.
    pub fn with_static_token(token: impl Into<String>, timeout: Duration) -> Self {
        let token = token.into();
        let tokens: TokenProvider = Arc::new(move |_principal| {
            let token = token.clone();
            Box::pin(async move { Ok(token) })
        });
        Self::new(tokens, timeout)
    }

    async fn token_for(&self, principal: &str) -> SourceResult<String> {
        (self.tokens)(principal.to_string()).await
    }
}

impl ChangeSource for GoogleChangeSource {
    fn name(&self) -> &str {
        "google"
    }

    fn get_start_cursor(
        &self,
        principal: String,
        target: ResourceKind,
    ) -> BoxFuture<'_, SourceResult<String>> {
        Box::pin(async move {
            let token = self.token_for(&principal).await?;
            match target {
                ResourceKind::Drive => {
                    DriveChangesClient::new(token, self.timeout)
                        .get_start_page_token()
                        .await
                }
                ResourceKind::Calendar(calendar_id) => {
                    CalendarEventsClient::new(token, self.timeout)
                        .get_start_sync_token(&calendar_id)
                        .await
                }
            }
            .map_err(|e| e.with_principal(principal))
        })
    }

    fn list_changes_since(
        &self,
        principal: String,
        target: ResourceKind,
        cursor: String,
    ) -> BoxFuture<'_, SourceResult<ChangeBatch>> {
        Box::pin(async move {
            let token = self.token_for(&principal).await?;
            let (changes, new_cursor) = match target {
                ResourceKind::Drive => {
                    DriveChangesClient::new(token, self.timeout)
                        .list_changes(&cursor)
                        .await
                }
                ResourceKind::Calendar(calendar_id) => {
                    CalendarEventsClient::new(token, self.timeout)
                        .list_changes(&calendar_id, &cursor)
                        .await
                }
            }
            .map_err(|e| e.with_principal(principal))?;

            Ok(ChangeBatch::new(changes, new_cursor))
        })
    }

    fn watch(&self, request: WatchRequest) -> BoxFuture<'_, SourceResult<ChannelLease>> {
        Box::pin(async move {
            let token = self.token_for(&request.principal).await?;
            match &request.target {
                ResourceKind::Drive => {
                    // Drive channels are anchored to a change cursor.
                    let client = DriveChangesClient::new(token, self.timeout);
                    let cursor = client.get_start_page_token().await?;
                    client
                        .watch(&request.channel_id, &request.callback_url, &cursor)
                        .await
                }
                ResourceKind::Calendar(calendar_id) => {
                    CalendarEventsClient::new(token, self.timeout)
                        .watch(calendar_id, &request.channel_id, &request.callback_url)
                        .await
                }
            }
            .map_err(|e| e.with_principal(request.principal))
        })
    }

    fn stop_channel(
        &self,
        principal: String,
        channel_id: String,
        resource_id: String,
    ) -> BoxFuture<'_, SourceResult<()>> {
        Box::pin(async move {
            // The stop endpoint is shared across APIs, but the token must be
            // delegated for the principal that owns the channel.
            let token = self.token_for(&principal).await?;
            DriveChangesClient::new(token, self.timeout)
                .stop_channel(&channel_id, &resource_id)
                .await
                .map_err(|e| e.with_principal(principal))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token_provider_serves_every_principal() {
        let source = GoogleChangeSource::with_static_token("tok-1", Duration::from_secs(30));

        assert_eq!(source.name(), "google");
        assert_eq!(source.token_for("amy@example.com").await.unwrap(), "tok-1");
        assert_eq!(source.token_for("bob@example.com").await.unwrap(), "tok-1");
    }
}
