//! Google Drive changes API client.
//!
//! Low-level HTTP client for the Drive v3 changes surface: start page
//! tokens, paginated change listing, and push-notification channels.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use worksync_core::{ChangeRecord, FileSnapshot};

use crate::error::{SourceError, SourceResult};
use crate::source::ChannelLease;

/// Base URL for the Drive API v3.
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Page size requested per changes.list call.
const PAGE_SIZE: usize = 100;

/// Runaway guard: maximum internal pages absorbed per logical listing.
const MAX_PAGES: usize = 25;

/// Drive changes API client, scoped to one principal's access token.
#[derive(Debug)]
pub struct DriveChangesClient {
    http_client: reqwest::Client,
    access_token: String,
}

impl DriveChangesClient {
    /// Creates a new client with the given access token.
    pub fn new(access_token: impl Into<String>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to create HTTP client");

        Self {
            http_client,
            access_token: access_token.into(),
        }
    }

    /// Fetches a fresh start page token positioned at "now".
    pub async fn get_start_page_token(&self) -> SourceResult<String> {
        let url = format!("{}/changes/startPageToken", DRIVE_API_BASE);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(request_error)?;

        let body = check_status(response).await?.text().await.map_err(|e| {
            SourceError::network(format!("failed to read response: {}", e))
        })?;

        let parsed: StartPageTokenResponse = serde_json::from_str(&body).map_err(|e| {
            SourceError::invalid_response(format!("failed to parse response: {}", e))
        })?;

        Ok(parsed.start_page_token)
    }

    /// Lists all changes from `page_token` to the head of the stream.
    ///
    /// Absorbs pagination internally; returns the converted records plus the
    /// new start page token to resume from.
    pub async fn list_changes(
        &self,
        page_token: &str,
    ) -> SourceResult<(Vec<ChangeRecord>, String)> {
        let mut all_changes = Vec::new();
        let mut token = page_token.to_string();

        for _ in 0..MAX_PAGES {
            let page = self.list_changes_page(&token).await?;

            for item in page.changes {
                if let Some(record) = convert_change(item) {
                    all_changes.push(record);
                }
            }

            if let Some(next) = page.next_page_token {
                token = next;
                continue;
            }

            let new_cursor = page.new_start_page_token.ok_or_else(|| {
                SourceError::invalid_response("final changes page carried no newStartPageToken")
            })?;

            debug!(count = all_changes.len(), "fetched drive changes");
            return Ok((all_changes, new_cursor));
        }

        Err(SourceError::invalid_response(format!(
            "changes listing did not terminate within {} pages",
            MAX_PAGES
        )))
    }

    /// Fetches a single page of changes.
    async fn list_changes_page(&self, page_token: &str) -> SourceResult<ChangeListResponse> {
        let url = format!("{}/changes", DRIVE_API_BASE);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&[
                ("pageToken", page_token.to_string()),
                ("pageSize", PAGE_SIZE.to_string()),
                ("includeRemoved", "true".to_string()),
                (
                    "fields",
                    "changes(fileId,removed,time,file(id,name,mimeType,size,modifiedTime,\
                     parents,starred,permissionIds,trashed)),nextPageToken,newStartPageToken"
                        .to_string(),
                ),
            ])
            .send()
            .await
            .map_err(request_error)?;

        let body = check_status(response).await?.text().await.map_err(|e| {
            SourceError::network(format!("failed to read response: {}", e))
        })?;

        serde_json::from_str(&body).map_err(|e| {
            SourceError::invalid_response(format!("failed to parse response: {}", e))
        })
    }

    /// Registers a push-notification channel over the changes stream.
    pub async fn watch(
        &self,
        channel_id: &str,
        callback_url: &str,
        page_token: &str,
    ) -> SourceResult<ChannelLease> {
        let url = format!("{}/changes/watch", DRIVE_API_BASE);

        let request_body = WatchRequestBody {
            id: channel_id.to_string(),
            channel_type: "web_hook".to_string(),
            address: callback_url.to_string(),
        };

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.access_token)
            .query(&[("pageToken", page_token)])
            .json(&request_body)
            .send()
            .await
            .map_err(request_error)?;

        let body = check_status(response).await?.text().await.map_err(|e| {
            SourceError::network(format!("failed to read response: {}", e))
        })?;

        let channel: ChannelResponse = serde_json::from_str(&body).map_err(|e| {
            SourceError::invalid_response(format!("failed to parse response: {}", e))
        })?;

        channel.into_lease()
    }

    /// Stops a channel. The source keeps accepting the call even for
    /// already-expired channels.
    pub async fn stop_channel(&self, channel_id: &str, resource_id: &str) -> SourceResult<()> {
        let url = format!("{}/channels/stop", DRIVE_API_BASE);

        let request_body = StopRequestBody {
            id: channel_id.to_string(),
            resource_id: resource_id.to_string(),
        };

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&request_body)
            .send()
            .await
            .map_err(request_error)?;

        check_status(response).await?;
        Ok(())
    }
}

/// Maps reqwest transport errors onto the source taxonomy.
pub(crate) fn request_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::network("request timeout")
    } else if e.is_connect() {
        SourceError::network(format!("connection failed: {}", e))
    } else {
        SourceError::network(format!("request failed: {}", e))
    }
}

/// Triage of non-success statuses shared by the Google clients.
pub(crate) async fn check_status(response: reqwest::Response) -> SourceResult<reqwest::Response> {
    let status = response.status();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        return Err(SourceError::rate_limited(format!(
            "rate limit exceeded{}",
            retry_after
                .map(|s| format!(", retry after {} seconds", s))
                .unwrap_or_default()
        )));
    }

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(SourceError::authentication(
            "access token expired or invalid",
        ));
    }

    if status == reqwest::StatusCode::FORBIDDEN {
        return Err(SourceError::authorization("access denied to resource"));
    }

    if status == reqwest::StatusCode::GONE {
        // Expired cursor: the caller must request a fresh start token.
        return Err(SourceError::not_found("cursor expired, full resync needed"));
    }

    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(SourceError::not_found("resource not found"));
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SourceError::server(format!(
            "API error ({}): {}",
            status, body
        )));
    }

    Ok(response)
}

/// Converts a Drive API change entry into a tagged [`ChangeRecord`].
fn convert_change(change: ApiChange) -> Option<ChangeRecord> {
    let file_id = match change.file_id {
        Some(id) => id,
        None => {
            warn!("change entry carried no fileId, skipping");
            return None;
        }
    };

    // Drive v3 changes carry no change id of their own; the entry's time
    // plus the file id identifies a delivery within the stream.
    let change_id = match &change.time {
        Some(time) => format!("{}@{}", file_id, time),
        None => file_id.clone(),
    };

    if change.removed.unwrap_or(false) {
        return Some(ChangeRecord::FileRemoval { change_id, file_id });
    }

    let snapshot = change.file.map(|f| FileSnapshot {
        id: f.id.unwrap_or_else(|| file_id.clone()),
        name: f.name,
        mime_type: f.mime_type,
        size: f.size.and_then(|s| s.parse().ok()),
        modified_time: f
            .modified_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc)),
        parents: f.parents.unwrap_or_default(),
        starred: f.starred,
        permission_ids: f.permission_ids.unwrap_or_default(),
        trashed: f.trashed,
    });

    Some(ChangeRecord::FileChange {
        change_id,
        file_id,
        snapshot,
    })
}

/// Response from changes.getStartPageToken.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPageTokenResponse {
    start_page_token: String,
}

/// Response from the changes.list endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeListResponse {
    #[serde(default)]
    changes: Vec<ApiChange>,
    next_page_token: Option<String>,
    new_start_page_token: Option<String>,
}

/// A single change entry from the API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiChange {
    file_id: Option<String>,
    removed: Option<bool>,
    time: Option<String>,
    file: Option<ApiFile>,
}

/// File snapshot embedded in a change entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiFile {
    id: Option<String>,
    name: Option<String>,
    mime_type: Option<String>,
    // The API serializes int64 sizes as strings.
    size: Option<String>,
    modified_time: Option<String>,
    parents: Option<Vec<String>>,
    starred: Option<bool>,
    permission_ids: Option<Vec<String>>,
    trashed: Option<bool>,
}

/// Body for changes.watch.
#[derive(Debug, Serialize)]
struct WatchRequestBody {
    id: String,
    #[serde(rename = "type")]
    channel_type: String,
    address: String,
}

/// Body for channels.stop.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StopRequestBody {
    id: String,
    resource_id: String,
}

/// Channel as returned by a watch call.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChannelResponse {
    pub(crate) id: String,
    pub(crate) resource_id: String,
    // Epoch millis, serialized as a string.
    pub(crate) expiration: Option<String>,
}

impl ChannelResponse {
    pub(crate) fn into_lease(self) -> SourceResult<ChannelLease> {
        let expires_at = match self.expiration.as_deref() {
            Some(millis) => {
                let millis: i64 = millis.parse().map_err(|_| {
                    SourceError::invalid_response("channel expiration is not epoch millis")
                })?;
                DateTime::from_timestamp_millis(millis).ok_or_else(|| {
                    SourceError::invalid_response("channel expiration out of range")
                })?
            }
            // Observed default lease when the source omits expiration.
            None => Utc::now() + chrono::Duration::days(7),
        };

        Ok(ChannelLease {
            channel_id: self.id,
            resource_id: self.resource_id,
            expires_at,
        })
    }
}
