//! Daemon: webhook endpoints, change reconciliation, channel renewal.
//!
//! This crate wires the reconciliation core together:
//! - HTTP webhook surface that acks notifications before processing them
//! - Suppression caches with background eviction
//! - Change classification and store application
//! - Cursor persistence per principal and resource stream
//! - Channel renewal on a schedule kept under the source's expiry
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use worksync_server::{
//!     AppState, ServerConfig, new_shared_state, reconcile_queue, router, MemoryStore,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default();
//!     let (jobs, _rx) = reconcile_queue(config.queue_capacity);
//!     let app = AppState {
//!         jobs,
//!         store: Arc::new(MemoryStore::new()),
//!         state: new_shared_state(),
//!         renewer: None,
//!     };
//!     let _router = router(app);
//! }
//! ```

mod cache;
mod classifier;
mod config;
mod error;
mod http;
mod reconciler;
mod renewal;
mod scheduler;
mod signals;
mod state;
mod store;
mod worker;

pub use cache::{SeenCache, SeenKey, SharedSeenCache, shared_seen_cache, spawn_eviction};
pub use classifier::ChangeClassifier;
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use http::{
    AppState, HEADER_CHANNEL_ID, HEADER_MESSAGE_NUMBER, HEADER_RESOURCE_ID, HEADER_RESOURCE_STATE,
    router,
};
pub use reconciler::{ChangeReconciler, ReconcileReport};
pub use renewal::{RenewalFailure, RenewalOutcome, RenewalReport, SubscriptionRenewer};
pub use scheduler::{
    RenewCommand, RenewScheduler, RenewSchedulerConfig, RenewSchedulerHandle, RenewSchedulerState,
    SharedRenewState,
};
pub use signals::{ShutdownSignal, SignalHandler};
pub use state::{LastRenewal, ServerState, SharedState, new_shared_state};
pub use store::{
    ChannelRecord, EntityKind, MemoryStore, Principal, StoreError, StoreResult, SyncStore,
};
pub use worker::{ReconcileJob, reconcile_queue, spawn_reconcile_worker};
