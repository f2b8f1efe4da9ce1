//! Daemon error type.

use std::time::Duration;

use thiserror::Error;

use worksync_providers::SourceError;

use crate::store::StoreError;

/// Errors surfaced by the daemon's reconciliation and renewal paths.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The change source rejected or failed a call.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The persistence layer failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A change source call exceeded its deadline.
    #[error("source call timed out after {0:?}")]
    SourceTimeout(Duration),

    /// Startup or request-time configuration is invalid. Surfaced
    /// synchronously to the caller; never retried.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Socket or filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ServerError::config("callback URL is not set");
        assert_eq!(
            err.to_string(),
            "configuration error: callback URL is not set"
        );
    }

    #[test]
    fn timeout_error_display() {
        let err = ServerError::SourceTimeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30s"));
    }
}
