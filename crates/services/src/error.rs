//! Shared error types for the services crate.

use thiserror::Error;

use storage::repository::StorageError;

/// Errors emitted by notification gateways.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NotifyError {
    #[error("notification gateway is not configured")]
    Unconfigured,

    #[error("transport rejected the delivery: {0}")]
    Rejected(String),

    #[error("transport request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Errors emitted by `ProgressionEngine`.
///
/// Expected state mismatches (stale answers, lost races) are not errors:
/// they come back as `EngineOutcome::Ignored`. Only infrastructure failures
/// land here.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("lesson {lesson} is missing from the catalog")]
    MissingLesson { lesson: u32 },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `SweepScheduler`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SweepError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}
