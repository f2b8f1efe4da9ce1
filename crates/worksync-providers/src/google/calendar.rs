//! Google Calendar events API client.
//!
//! Incremental event listing via sync tokens plus push-notification
//! channels over a calendar's event collection. Cancelled events are
//! included in listings (`showDeleted`) because cancellation is the
//! source's deletion signal.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use worksync_core::{ChangeRecord, EventSnapshot};

use crate::error::{SourceError, SourceResult};
use crate::google::drive::{check_status, request_error};
use crate::source::ChannelLease;

/// Base URL for the Calendar API v3.
const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Page size requested per events.list call.
const PAGE_SIZE: usize = 250;

/// Runaway guard: maximum internal pages absorbed per logical listing.
const MAX_PAGES: usize = 25;

/// Calendar events API client, scoped to one principal's access token.
#[derive(Debug)]
pub struct CalendarEventsClient {
    http_client: reqwest::Client,
    access_token: String,
}

impl CalendarEventsClient {
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

    /// Obtains a fresh sync token positioned at "now".
    ///
    /// The API only hands out a sync token at the end of a full listing, so
    /// this pages through the collection discarding items.
    pub async fn get_start_sync_token(&self, calendar_id: &str) -> SourceResult<String> {
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page = self
                .list_events_page(calendar_id, None, page_token.as_deref())
                .await?;

            match (page.next_page_token, page.next_sync_token) {
                (Some(next), _) => page_token = Some(next),
                (None, Some(sync)) => return Ok(sync),
                (None, None) => {
                    return Err(SourceError::invalid_response(
                        "final events page carried no nextSyncToken",
                    ));
                }
            }
        }

        Err(SourceError::invalid_response(format!(
            "sync token bootstrap did not terminate within {} pages",
            MAX_PAGES
        )))
    }

    /// Lists all event changes since `sync_token`.
    pub async fn list_changes(
        &self,
        calendar_id: &str,
        sync_token: &str,
    ) -> SourceResult<(Vec<ChangeRecord>, String)> {
        let mut all_changes = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page = self
                .list_events_page(calendar_id, Some(sync_token), page_token.as_deref())
                .await?;

            for item in page.items {
                if let Some(record) = convert_event(item) {
                    all_changes.push(record);
                }
            }

            match (page.next_page_token, page.next_sync_token) {
                (Some(next), _) => page_token = Some(next),
                (None, Some(sync)) => {
                    debug!(
                        calendar_id = %calendar_id,
                        count = all_changes.len(),
                        "fetched calendar changes"
                    );
                    return Ok((all_changes, sync));
                }
                (None, None) => {
                    return Err(SourceError::invalid_response(
                        "final events page carried no nextSyncToken",
                    ));
                }
            }
        }

        Err(SourceError::invalid_response(format!(
            "events listing did not terminate within {} pages",
            MAX_PAGES
        )))
    }

    /// Fetches a single page of events.
    async fn list_events_page(
        &self,
        calendar_id: &str,
        sync_token: Option<&str>,
        page_token: Option<&str>,
    ) -> SourceResult<EventListResponse> {
        let url = format!(
            "{}/calendars/{}/events",
            CALENDAR_API_BASE,
            urlencoding::encode(calendar_id)
        );

        let mut request = self
            .http_client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&[
                ("maxResults", PAGE_SIZE.to_string()),
                ("showDeleted", "true".to_string()),
                ("singleEvents", "false".to_string()),
            ]);

        if let Some(token) = sync_token {
            request = request.query(&[("syncToken", token)]);
        }

        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request.send().await.map_err(request_error)?;

        let body = check_status(response).await?.text().await.map_err(|e| {
            SourceError::network(format!("failed to read response: {}", e))
        })?;

        serde_json::from_str(&body).map_err(|e| {
            SourceError::invalid_response(format!("failed to parse response: {}", e))
        })
    }

    /// Registers a push-notification channel over the calendar's events.
    pub async fn watch(
        &self,
        calendar_id: &str,
        channel_id: &str,
        callback_url: &str,
    ) -> SourceResult<ChannelLease> {
        let url = format!(
            "{}/calendars/{}/events/watch",
            CALENDAR_API_BASE,
            urlencoding::encode(calendar_id)
        );

        let request_body = WatchRequestBody {
            id: channel_id.to_string(),
            channel_type: "web_hook".to_string(),
            address: callback_url.to_string(),
        };

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&request_body)
            .send()
            .await
            .map_err(request_error)?;

        let body = check_status(response).await?.text().await.map_err(|e| {
            SourceError::network(format!("failed to read response: {}", e))
        })?;

        let channel: super::drive::ChannelResponse = serde_json::from_str(&body).map_err(|e| {
            SourceError::invalid_response(format!("failed to parse response: {}", e))
        })?;

        channel.into_lease()
    }

    /// Stops a superseded channel.
    pub async fn stop_channel(&self, channel_id: &str, resource_id: &str) -> SourceResult<()> {
        let url = format!("{}/channels/stop", CALENDAR_API_BASE);

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

/// Converts a Calendar API event into a tagged [`ChangeRecord`].
fn convert_event(event: ApiEvent) -> Option<ChangeRecord> {
    let id = match event.id {
        Some(id) => id,
        None => {
            warn!("event entry carried no id, skipping");
            return None;
        }
    };

    let updated = event
        .updated
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc));

    let snapshot = EventSnapshot {
        id: id.clone(),
        status: event.status,
        summary: event.summary,
        description: event.description,
        start: event.start.and_then(parse_event_time),
        end: event.end.and_then(parse_event_time),
        updated,
    };

    Some(ChangeRecord::EventChange {
        change_id: id.clone(),
        event_id: id,
        snapshot,
    })
}

/// Event times arrive either as RFC3339 datetimes or all-day dates.
fn parse_event_time(time: ApiEventTime) -> Option<DateTime<Utc>> {
    if let Some(dt) = time.date_time {
        return DateTime::parse_from_rfc3339(&dt)
            .ok()
            .map(|t| t.with_timezone(&Utc));
    }
    if let Some(date) = time.date {
        let parsed = chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d").ok()?;
        return parsed.and_hms_opt(0, 0, 0).map(|t| t.and_utc());
    }
    None
}

/// Response from the events.list endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<ApiEvent>,
    next_page_token: Option<String>,
    next_sync_token: Option<String>,
}

/// A single event from the API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    id: Option<String>,
    status: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    updated: Option<String>,
    start: Option<ApiEventTime>,
    end: Option<ApiEventTime>,
}

/// Event time from the API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    date: Option<String>,
    date_time: Option<String>,
}

/// Body for events.watch.
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
