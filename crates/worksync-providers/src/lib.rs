//! ChangeSource trait and the Google Workspace implementation.
//!
//! This crate provides the boundary between the reconciliation core and the
//! external change-notification system:
//!
//! - [`ChangeSource`] - the capability trait the core consumes
//! - [`ChangeBatch`] / [`ChannelLease`] - what a source hands back
//! - [`GoogleChangeSource`] - Drive + Calendar implementation
//! - [`SourceError`] - error taxonomy with retryability classification
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────┐
//! │ Drive API v3 │   │ Calendar API v3│
//! └──────┬───────┘   └───────┬────────┘
//!        │                   │
//!        ▼                   ▼
//! ┌──────────────────────────────────┐
//! │        GoogleChangeSource        │
//! └────────────────┬─────────────────┘
//!                  │  ChangeSource
//!                  ▼
//!          ┌───────────────┐
//!          │  ChangeBatch  │  (ChangeRecord[], new cursor)
//!          └───────────────┘
//! ```

pub mod error;
pub mod google;
pub mod source;

pub use error::{SourceError, SourceErrorCode, SourceResult};
pub use google::{GoogleChangeSource, TokenProvider};
pub use source::{
    BoxFuture, ChangeBatch, ChangeSource, ChannelLease, FailingSource, WatchRequest,
};
