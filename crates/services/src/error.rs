//! Shared error types for the services crate.

use thiserror::Error;

use classroom_core::model::{SubmissionError, SubmissionStatus};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by the autosave coordinator and its sessions.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AutosaveError {
    /// The submission is submitted or completed; answers can no longer change.
    #[error("submission is read-only ({status})")]
    ReadOnly { status: SubmissionStatus },
    #[error("task not found")]
    TaskNotFound,
    #[error("only students can edit answers")]
    Forbidden,
    #[error("autosave session is closed")]
    Closed,
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AutosaveError {
    /// Failures that the next debounce window retries on its own. Anything
    /// else waits for the next edit or an explicit save.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, AutosaveError::Storage(StorageError::Connection(_)))
    }
}

/// Errors emitted by `HelpService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HelpError {
    #[error("task not found")]
    NotFound,
    #[error("viewer may not act on this submission")]
    Forbidden,
    #[error("preview sessions cannot use the help channel")]
    Preview,
    #[error("help cannot be requested on finished work ({status})")]
    Finished { status: SubmissionStatus },
    #[error(transparent)]
    Message(#[from] SubmissionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by the teacher help queue.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HelpQueueError {
    #[error("only teachers can view help requests")]
    Forbidden,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `SubmissionService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SubmissionServiceError {
    #[error("task not found")]
    TaskNotFound,
    #[error("viewer may not act on this submission")]
    Forbidden,
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
