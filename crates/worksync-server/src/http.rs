//! Webhook HTTP surface.
//!
//! The source enforces short response deadlines on notification delivery
//! and disables channels that ack slowly, so `/webhook/drive` and
//! `/webhook/calendar` return 200 unconditionally after enqueueing a job.
//! Processing failures surface only in logs and counters.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use serde::Serialize;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use worksync_core::ResourceKind;

use crate::renewal::SubscriptionRenewer;
use crate::state::{LastRenewal, SharedState};
use crate::store::{ChannelRecord, SyncStore};
use crate::worker::ReconcileJob;

/// Notification header names, source-system convention.
pub const HEADER_RESOURCE_ID: &str = "x-goog-resource-id";
pub const HEADER_CHANNEL_ID: &str = "x-goog-channel-id";
pub const HEADER_RESOURCE_STATE: &str = "x-goog-resource-state";
pub const HEADER_MESSAGE_NUMBER: &str = "x-goog-message-number";

/// Everything the handlers need.
#[derive(Clone)]
pub struct AppState {
    pub jobs: mpsc::Sender<ReconcileJob>,
    pub store: Arc<dyn SyncStore>,
    pub state: SharedState,
    /// Absent when no callback URL is configured; renewal then fails
    /// synchronously with a configuration error.
    pub renewer: Option<Arc<SubscriptionRenewer>>,
}

/// Builds the webhook router.
pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/webhook/drive", post(drive_webhook))
        .route("/webhook/calendar", post(calendar_webhook))
        .route("/webhook/renew", post(renew_webhook))
        .route("/webhook/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

async fn drive_webhook(State(app): State<AppState>, headers: HeaderMap) -> StatusCode {
    accept_notification(&app, &headers, ResourceKind::Drive).await
}

async fn calendar_webhook(State(app): State<AppState>, headers: HeaderMap) -> StatusCode {
    // Which calendar the channel covers is stored at creation time; the
    // fallback only applies to unresolvable resource ids.
    accept_notification(&app, &headers, ResourceKind::calendar("primary")).await
}

/// Acks the notification and enqueues reconciliation. Always 200.
async fn accept_notification(
    app: &AppState,
    headers: &HeaderMap,
    fallback_target: ResourceKind,
) -> StatusCode {
    let resource_id = header_value(headers, HEADER_RESOURCE_ID);
    let resource_state = header_value(headers, HEADER_RESOURCE_STATE);
    debug!(
        resource_id = resource_id.as_deref().unwrap_or("-"),
        channel_id = header_value(headers, HEADER_CHANNEL_ID).as_deref().unwrap_or("-"),
        state = resource_state.as_deref().unwrap_or("-"),
        message_number = header_value(headers, HEADER_MESSAGE_NUMBER).as_deref().unwrap_or("-"),
        target = %fallback_target,
        "notification received"
    );

    let Some(resource_id) = resource_id else {
        warn!("notification without a resource id header, acking without work");
        return StatusCode::OK;
    };

    // "sync" is the registration handshake, not a change signal.
    if resource_state.as_deref() == Some("sync") {
        debug!(resource_id = %resource_id, "channel sync handshake");
        return StatusCode::OK;
    }

    // Handshakes and headerless posts were acked above without counting;
    // only change signals reach here.
    app.state.write().await.record_notification();

    let job = ReconcileJob {
        resource_id,
        fallback_target,
    };
    if let Err(err) = app.jobs.try_send(job) {
        warn!(error = %err, "reconcile queue full, dropping notification");
        app.state.write().await.record_dropped_job();
    }

    StatusCode::OK
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn renew_webhook(State(app): State<AppState>) -> impl IntoResponse {
    let Some(renewer) = app.renewer.clone() else {
        // A deployment condition, not an internal fault.
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "error": "renewal is not configured: callback URL is not set",
            })),
        );
    };

    let state = app.state.clone();
    tokio::spawn(async move {
        match renewer.renew_all().await {
            Ok(report) => {
                info!(
                    successes = report.successes.len(),
                    failures = report.failures.len(),
                    "manual renewal run complete"
                );
                state.write().await.set_last_renewal(report);
            }
            Err(err) => {
                warn!(error = %err, "manual renewal run failed");
            }
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "accepted" })),
    )
}

#[derive(Debug, Serialize)]
struct StatusBody {
    uptime_seconds: i64,
    notifications_received: u64,
    jobs_dropped: u64,
    last_renewal: Option<LastRenewal>,
    channels: Vec<ChannelRecord>,
}

async fn status(State(app): State<AppState>) -> impl IntoResponse {
    let channels = match app.store.list_channels().await {
        Ok(channels) => channels,
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": err.to_string() })),
            );
        }
    };

    let state = app.state.read().await;
    let body = StatusBody {
        uptime_seconds: state.uptime_seconds(),
        notifications_received: state.notifications_received(),
        jobs_dropped: state.jobs_dropped(),
        last_renewal: state.last_renewal().cloned(),
        channels,
    };
    (
        StatusCode::OK,
        Json(serde_json::to_value(body).unwrap_or_default()),
    )
}
