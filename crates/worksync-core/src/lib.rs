//! Core types: change records, classification predicates, tracing

pub mod change;
pub mod classify;
pub mod tracing;

pub use change::{
    ChangeRecord, Decision, EventSnapshot, FileSnapshot, ResourceKind, FOLDER_MIME_TYPE,
};
pub use classify::{
    event_is_significant, file_change_is_significant, file_change_is_trivial, TrivialityPolicy,
};
pub use tracing::{init_tracing, LogFormat, TracingConfig, TracingError};
