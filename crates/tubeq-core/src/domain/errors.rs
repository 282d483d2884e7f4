//! Errors returned by queue operations.

use thiserror::Error;

use super::{MessageState, TubeName};
use crate::ports::StorageError;

/// Error of a queue operation.
///
/// A reserve that times out is not an error: it returns `Ok(None)`.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Unknown message id, or a lease that already ended
    /// (finished, released, buried or reclaimed by the scheduler).
    #[error("not found: {0}")]
    NotFound(String),

    /// The message exists but is in a state the operation cannot start from.
    #[error("cannot {operation} {id}: message is {state}")]
    InvalidState {
        id: String,
        state: MessageState,
        operation: &'static str,
    },

    /// The backend cannot serve this request (e.g. peek past its window).
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("tube {0} is closed")]
    Closed(TubeName),
}

impl QueueError {
    pub(crate) fn not_found(what: impl std::fmt::Display) -> Self {
        QueueError::NotFound(what.to_string())
    }

    pub(crate) fn invalid_state(
        id: impl std::fmt::Display,
        state: MessageState,
        operation: &'static str,
    ) -> Self {
        QueueError::InvalidState {
            id: id.to_string(),
            state,
            operation,
        }
    }

    /// NotFound and InvalidState are expected under at-least-once delivery
    /// (a duplicate finish, a lease reclaimed under a slow worker). Callers
    /// usually log them and move on.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            QueueError::NotFound(_) | QueueError::InvalidState { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_message_names_operation_and_state() {
        let err = QueueError::invalid_state("msg-1", MessageState::Ready, "finish");
        assert_eq!(err.to_string(), "cannot finish msg-1: message is ready");
        assert!(err.is_benign());
    }

    #[test]
    fn storage_errors_are_not_benign() {
        let err = QueueError::from(StorageError::Unavailable("down".into()));
        assert!(!err.is_benign());
        assert!(err.to_string().contains("down"));
    }
}
