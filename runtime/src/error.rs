//! Error types for the action queue.

use helsinki_profile_core::CoreError;
use thiserror::Error;

/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors raised by [`ActionQueue`](crate::ActionQueue) operations.
///
/// Executor failures are not queue errors: they are recorded on the failed
/// action and read back through `get_failed`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Two templates share a type.
    #[error("Duplicate action type '{0}'")]
    DuplicateActionType(String),

    /// The stored queue has a different number of actions than the templates.
    #[error("Stored queue has {found} actions, expected {expected}")]
    RestoreLengthMismatch {
        /// Template count
        expected: usize,
        /// Stored count
        found: usize,
    },

    /// The stored queue has a different action at `index`.
    #[error("Stored queue has '{found}' at index {index}, expected '{expected}'")]
    RestoreOrderMismatch {
        /// Position of the mismatch
        index: usize,
        /// Template type
        expected: String,
        /// Stored type
        found: String,
    },

    /// `start` was asked to begin at a different action than the queue's
    /// current one.
    #[error("Expected to start from '{expected}' but the queue is at '{found}'")]
    UnexpectedAction {
        /// Caller's expectation
        expected: String,
        /// Queue's current action, empty if the queue is finished
        found: String,
    },

    /// No action with this type exists.
    #[error("Unknown action type '{0}'")]
    UnknownAction(String),

    /// More than one action would be active.
    #[error("More than one action active: {0:?}")]
    InvariantViolation(Vec<String>),

    /// The queue was cleaned up and can no longer be used.
    #[error("Action queue has been cleaned up")]
    Invalidated,

    /// Waiting for a queue event timed out.
    #[error("Timeout waiting for queue event")]
    Timeout,

    /// The queue's event channel closed.
    #[error("Queue event channel closed")]
    ChannelClosed,

    /// Reading or writing the stored queue failed.
    #[error("Queue storage failed: {0}")]
    Storage(#[from] CoreError),
}
