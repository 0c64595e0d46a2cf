//! # Helsinki Profile Runtime
//!
//! The action queue: a persisted, strictly ordered sequence of asynchronous
//! steps that survives full-page redirects.
//!
//! ## Core Components
//!
//! - **[`ActionProps`]**: static step template (type, executor, options)
//! - **[`ActionQueue`]**: executes steps in order, persists status after every
//!   transition and restores it on the next page load
//! - **[`QueueEvent`]**: broadcast of every transition, for observers
//!
//! ## Example
//!
//! ```ignore
//! use helsinki_profile_runtime::{ActionProps, ActionQueue, QueueEnvironment};
//!
//! let queue = ActionQueue::new(
//!     vec![
//!         ActionProps::new("getScopes", |_, _| async { Ok(json!(["profile"])) }),
//!         ActionProps::new("useScopes", |_, queue| async move {
//!             let scopes: Vec<String> = queue.result_as("getScopes")?;
//!             Ok(json!(scopes.len()))
//!         }),
//!     ],
//!     QueueEnvironment::new(ctx.session_storage_handle(), Arc::new(SystemClock)),
//! )?;
//!
//! queue.start(None)?;
//! ```

/// Action templates, status and executor errors
pub mod action;

/// Error types for queue operations
pub mod error;

/// Queue metrics
pub mod metrics;

/// The queue runtime
pub mod queue;

/// Stored status records
pub mod record;

pub use action::{
    ActionError, ActionOptions, ActionProps, ActionSnapshot, ActionStatus, Executor,
    ExecutorFuture, Outcome,
};
pub use error::{QueueError, Result};
pub use queue::{
    ActionQueue, DEFAULT_STORAGE_KEY, QueueConfig, QueueEnvironment, QueueEvent, QueueReader,
    wait_for_event,
};
pub use record::ActionRecord;
