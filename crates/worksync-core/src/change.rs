//! Change records from the change-notification source.
//!
//! This module defines [`ChangeRecord`], a tagged representation of the
//! change entries the source system delivers for a watched resource. The
//! upstream wire format is loosely shaped (fields appear and disappear per
//! change type), so the record is modeled as an explicit variant per shape
//! and the classifier pattern-matches on the tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// MIME type the source system uses for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// The kind of watched resource a channel or cursor refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ResourceKind {
    /// The principal's Drive change stream (one per principal).
    Drive,
    /// A specific calendar's event stream.
    Calendar(String),
}

impl ResourceKind {
    /// Creates a calendar resource kind.
    pub fn calendar(calendar_id: impl Into<String>) -> Self {
        Self::Calendar(calendar_id.into())
    }

    /// Returns a stable string key for cursor and channel storage.
    pub fn storage_key(&self) -> String {
        match self {
            Self::Drive => "drive".to_string(),
            Self::Calendar(id) => format!("calendar:{id}"),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Snapshot of a file's current state as embedded in a change record.
///
/// Every field except `id` is optional: the source omits fields freely, and
/// absence is load-bearing for classification (a snapshot without
/// `modified_time` is metadata noise, not a content change).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    /// The file identifier.
    pub id: String,
    /// The file name, if carried.
    pub name: Option<String>,
    /// MIME type; folders use [`FOLDER_MIME_TYPE`].
    pub mime_type: Option<String>,
    /// File size in bytes, if carried.
    pub size: Option<i64>,
    /// Last content modification time, if carried.
    pub modified_time: Option<DateTime<Utc>>,
    /// Parent folder ids.
    pub parents: Vec<String>,
    /// Whether the file is starred, if carried.
    pub starred: Option<bool>,
    /// Permission ids attached to the change, if carried.
    pub permission_ids: Vec<String>,
    /// Whether the file is trashed, if carried.
    pub trashed: Option<bool>,
}

impl FileSnapshot {
    /// Creates a snapshot with only the id set.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Returns true if this snapshot represents a folder.
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
    }
}

/// Snapshot of a calendar event's current state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSnapshot {
    /// The event identifier.
    pub id: String,
    /// Event status (`confirmed`, `tentative`, `cancelled`).
    pub status: Option<String>,
    /// Event summary (title).
    pub summary: Option<String>,
    /// Event description.
    pub description: Option<String>,
    /// Start bound.
    pub start: Option<DateTime<Utc>>,
    /// End bound.
    pub end: Option<DateTime<Utc>>,
    /// Last update time. The source re-delivers the same event id on every
    /// field change, so this participates in the dedup key.
    pub updated: Option<DateTime<Utc>>,
}

impl EventSnapshot {
    /// Creates a snapshot with only the id set.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Returns true if the event is cancelled (the source's deletion signal).
    pub fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some("cancelled")
    }
}

/// A single change entry from the source's change stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeRecord {
    /// A file was created or mutated. The snapshot may be absent when the
    /// source did not embed one; such records carry no applicable state.
    FileChange {
        /// Change id, unique within this resource's stream.
        change_id: String,
        /// The affected file.
        file_id: String,
        /// Current state of the file, when embedded.
        snapshot: Option<FileSnapshot>,
    },
    /// A file was removed from the principal's view.
    FileRemoval {
        /// Change id, unique within this resource's stream.
        change_id: String,
        /// The removed file.
        file_id: String,
    },
    /// A calendar event was created, mutated, or cancelled.
    EventChange {
        /// Change id (the event's etag-derived id within the stream).
        change_id: String,
        /// The affected event.
        event_id: String,
        /// Current state of the event.
        snapshot: EventSnapshot,
    },
}

impl ChangeRecord {
    /// Returns the change id.
    pub fn change_id(&self) -> &str {
        match self {
            Self::FileChange { change_id, .. }
            | Self::FileRemoval { change_id, .. }
            | Self::EventChange { change_id, .. } => change_id,
        }
    }

    /// Returns the id of the affected entity.
    pub fn entity_id(&self) -> &str {
        match self {
            Self::FileChange { file_id, .. } | Self::FileRemoval { file_id, .. } => file_id,
            Self::EventChange { event_id, .. } => event_id,
        }
    }

    /// Returns the extra component the dedup key must incorporate, if any.
    ///
    /// Calendar events recur under the same id on every property change, so
    /// their `updated` timestamp disambiguates deliveries.
    pub fn dedup_discriminant(&self) -> Option<String> {
        match self {
            Self::EventChange { snapshot, .. } => snapshot.updated.map(|t| t.to_rfc3339()),
            _ => None,
        }
    }
}

/// The outcome of classifying one change record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Already handled within the dedup window.
    Duplicate,
    /// Metadata noise; suppressed.
    Trivial,
    /// A real state mutation; apply as an upsert.
    SignificantUpsert,
    /// A real deletion; mark the entity deleted.
    SignificantDelete,
    /// Carries nothing applicable; logged and skipped.
    Insignificant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_kind_storage_key() {
        assert_eq!(ResourceKind::Drive.storage_key(), "drive");
        assert_eq!(
            ResourceKind::calendar("team@example.com").storage_key(),
            "calendar:team@example.com"
        );
    }

    #[test]
    fn file_snapshot_folder_detection() {
        let mut snapshot = FileSnapshot::new("f1");
        assert!(!snapshot.is_folder());

        snapshot.mime_type = Some(FOLDER_MIME_TYPE.to_string());
        assert!(snapshot.is_folder());
    }

    #[test]
    fn event_snapshot_cancelled() {
        let mut snapshot = EventSnapshot::new("e1");
        assert!(!snapshot.is_cancelled());

        snapshot.status = Some("confirmed".to_string());
        assert!(!snapshot.is_cancelled());

        snapshot.status = Some("cancelled".to_string());
        assert!(snapshot.is_cancelled());
    }

    #[test]
    fn change_record_accessors() {
        let removal = ChangeRecord::FileRemoval {
            change_id: "c1".to_string(),
            file_id: "f1".to_string(),
        };
        assert_eq!(removal.change_id(), "c1");
        assert_eq!(removal.entity_id(), "f1");
        assert!(removal.dedup_discriminant().is_none());
    }

    #[test]
    fn event_dedup_discriminant_uses_updated() {
        let updated = Utc::now();
        let mut snapshot = EventSnapshot::new("e1");
        snapshot.updated = Some(updated);

        let change = ChangeRecord::EventChange {
            change_id: "c1".to_string(),
            event_id: "e1".to_string(),
            snapshot,
        };
        assert_eq!(change.dedup_discriminant(), Some(updated.to_rfc3339()));
    }

    #[test]
    fn change_record_serde_round_trip() {
        let change = ChangeRecord::FileChange {
            change_id: "c42".to_string(),
            file_id: "f42".to_string(),
            snapshot: Some(FileSnapshot::new("f42")),
        };

        let json = serde_json::to_string(&change).unwrap();
        let back: ChangeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(change, back);
    }
}
