//! Actions: the unit of orchestration.
//!
//! An action is split in two halves:
//!
//! - [`ActionProps`]: the static template (type, executor, options). Never
//!   serialized; re-attached on every page load.
//! - [`ActionStatus`]: the mutable status, persisted through
//!   [`ActionRecord`](crate::record::ActionRecord).

use crate::queue::QueueReader;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Future returned by an executor.
pub type ExecutorFuture = Pin<Box<dyn Future<Output = Result<Value, ActionError>> + Send>>;

/// The function implementing one step.
///
/// Receives a snapshot of its own action and read access to the whole queue.
pub type Executor = Arc<dyn Fn(ActionSnapshot, QueueReader) -> ExecutorFuture + Send + Sync>;

/// Failure of an executor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// The step handed control to an external redirect and will be resumed
    /// on the next page load. The action stays active and nothing is recorded.
    #[error("Action is waiting for an external redirect")]
    Suspended,

    /// The action belongs to a queue that has been cleaned up.
    #[error("Action has been invalidated")]
    Invalidated,

    /// A previous action this step depends on has no result.
    #[error("Result of action '{0}' is not available")]
    MissingResult(String),

    /// The step failed; the message is stored as the action's `errorMessage`.
    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    /// Wrap any displayable failure.
    pub fn failed(reason: impl fmt::Display) -> Self {
        Self::Failed(reason.to_string())
    }
}

/// Scheduling and persistence flags of an action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOptions {
    /// Leave the result out of session storage.
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_storage: bool,

    /// Mark the action complete before its executor runs.
    #[serde(default, skip_serializing_if = "is_false")]
    pub synchronous_completion: bool,

    /// Allow starting the action while it is marked active.
    #[serde(default, skip_serializing_if = "is_false")]
    pub idle_when_active: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(value: &bool) -> bool {
    !*value
}

impl ActionOptions {
    /// Keep the result out of session storage.
    #[must_use]
    pub const fn no_storage(mut self) -> Self {
        self.no_storage = true;
        self
    }

    /// Complete the action as soon as it starts.
    #[must_use]
    pub const fn synchronous_completion(mut self) -> Self {
        self.synchronous_completion = true;
        self
    }

    /// Treat the action as startable while active.
    #[must_use]
    pub const fn idle_when_active(mut self) -> Self {
        self.idle_when_active = true;
        self
    }
}

/// How a completed action ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Executor resolved. `result` is `None` when the result was not
    /// persisted (`noStorage`) and the queue was restored, or while a
    /// synchronously completed executor is still running.
    Succeeded {
        /// The executor's value
        result: Option<Value>,
    },

    /// Executor rejected.
    Failed {
        /// Stored as `errorMessage`
        message: String,
    },
}

/// Tagged status of one action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionStatus {
    /// Not started, or reset.
    Idle,
    /// Started and not yet settled.
    Active,
    /// Settled.
    Complete(Outcome),
    /// The owning queue was cleaned up. Terminal.
    Invalidated,
}

impl ActionStatus {
    /// Whether the action has settled, successfully or not.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    /// Whether the action is in flight.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether the action settled with an error.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Complete(Outcome::Failed { .. }))
    }
}

/// Static action template.
#[derive(Clone)]
pub struct ActionProps {
    /// Identifier, unique within a queue.
    pub action_type: String,

    /// Step implementation.
    pub executor: Executor,

    /// Flags.
    pub options: ActionOptions,
}

impl ActionProps {
    /// Create a template from an async closure.
    pub fn new<F, Fut>(action_type: impl Into<String>, executor: F) -> Self
    where
        F: Fn(ActionSnapshot, QueueReader) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActionError>> + Send + 'static,
    {
        Self {
            action_type: action_type.into(),
            executor: Arc::new(move |action, queue| -> ExecutorFuture {
                Box::pin(executor(action, queue))
            }),
            options: ActionOptions::default(),
        }
    }

    /// Set the flags.
    #[must_use]
    pub const fn with_options(mut self, options: ActionOptions) -> Self {
        self.options = options;
        self
    }
}

impl fmt::Debug for ActionProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionProps")
            .field("action_type", &self.action_type)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Executor used in place of the real one once a queue is cleaned up.
pub(crate) fn invalidated_executor() -> Executor {
    Arc::new(|_, _| -> ExecutorFuture { Box::pin(async { Err(ActionError::Invalidated) }) })
}

/// Read-only copy of one action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSnapshot {
    /// Identifier (empty once invalidated).
    pub action_type: String,
    /// Status at the time of the snapshot.
    pub status: ActionStatus,
    /// Flags.
    pub options: ActionOptions,
    /// Last status change, milliseconds since the Unix epoch.
    pub updated_at: i64,
}

impl ActionSnapshot {
    /// Whether the action has settled.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    /// Whether the action is in flight.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// The result, if the action succeeded and the result is known.
    #[must_use]
    pub const fn result(&self) -> Option<&Value> {
        match &self.status {
            ActionStatus::Complete(Outcome::Succeeded { result }) => result.as_ref(),
            _ => None,
        }
    }

    /// The error message, if the action failed.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match &self.status {
            ActionStatus::Complete(Outcome::Failed { message }) => Some(message),
            _ => None,
        }
    }
}
