//! Client-side synchronization core.
//!
//! One `DashboardController` per open dashboard view:
//! - initial fetch, then wholesale replacement of the local copy on every
//!   change-feed event
//! - translation of user actions into field-level store updates
//! - a once-per-second countdown derivation, local to each client
//!
//! There is no coordinator and no merge: the store's last-write-wins
//! semantics are surfaced as-is.

pub mod controller;
pub mod protocol;
pub mod timer;

pub use controller::{DashboardController, ViewEvent, ViewState};

use thiserror::Error;

use crate::project::{ProjectId, TaskId};
use crate::storage::StoreError;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced to the invoking UI action; none are retried
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Project not found: {0}")]
    NotFound(ProjectId),

    #[error("No project loaded for this view")]
    NoDocument,

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Timer duration must be at least one hour")]
    InvalidDuration,

    #[error("Write failed: {0}")]
    Write(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_display() {
        let err = SyncError::TaskNotFound("task-123".to_string());
        assert_eq!(err.to_string(), "Task not found: task-123");

        let err = SyncError::NoDocument;
        assert_eq!(err.to_string(), "No project loaded for this view");
    }
}
