//! The action queue.
//!
//! An ordered, unique-by-type sequence of actions executed strictly in order.
//! Each settled action is persisted to session storage so the queue survives
//! a full-page redirect; on the next load the queue is rebuilt from the same
//! templates and the stored status is merged back.
//!
//! # State machine per action
//!
//! ```text
//!          execute                 Ok(value)
//!   Idle ──────────► Active ─────────────────► Complete(Succeeded) ──► next action
//!    ▲                 │  │
//!    │                 │  └── Err(Suspended): stays Active, queue waits
//!    │                 │
//!    │                 └── Err(..) ─► Complete(Failed)   (queue halts)
//!    │
//!    └──────────── reset ──────────── any
//!
//!   any ── clean_up ──► Invalidated (terminal)
//! ```
//!
//! Executors run on the Tokio runtime, so `start` and `execute` must be called
//! from within one.

use crate::action::{
    ActionError, ActionOptions, ActionProps, ActionSnapshot, ActionStatus, Executor, Outcome,
    invalidated_executor,
};
use crate::error::{QueueError, Result};
use crate::metrics as queue_metrics;
use crate::record::{ActionRecord, ensure_unique_types, merge_records};
use helsinki_profile_core::storage::{read_json, write_json};
use helsinki_profile_core::{Clock, Storage};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

/// Default session storage key of a queue.
pub const DEFAULT_STORAGE_KEY: &str = "actionQueue";

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Session storage key the queue is persisted under.
    pub storage_key: String,

    /// Buffer of the event channel.
    ///
    /// Default: 32
    pub event_capacity: usize,
}

impl QueueConfig {
    /// Configuration persisting under `storage_key`.
    #[must_use]
    pub fn new(storage_key: impl Into<String>) -> Self {
        Self {
            storage_key: storage_key.into(),
            event_capacity: 32,
        }
    }

    /// Set the event channel buffer.
    #[must_use]
    pub const fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new(DEFAULT_STORAGE_KEY)
    }
}

/// Injected dependencies of a queue.
#[derive(Clone)]
pub struct QueueEnvironment {
    /// Session-scoped storage.
    pub storage: Arc<dyn Storage>,

    /// Source of `updatedAt` stamps.
    pub clock: Arc<dyn Clock>,
}

impl QueueEnvironment {
    /// Bundle storage and clock.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }
}

/// Observable queue transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// An action began executing.
    Started {
        /// Action type
        action_type: String,
    },
    /// An action's executor resolved.
    Completed {
        /// Action type
        action_type: String,
    },
    /// An action's executor rejected; the queue halted.
    Failed {
        /// Action type
        action_type: String,
        /// Stored error message
        message: String,
    },
    /// An action is waiting for an external redirect.
    Suspended {
        /// Action type
        action_type: String,
    },
    /// Every action reached `Complete(Succeeded)`.
    Finished,
    /// The queue was reset.
    Reset,
    /// The queue was cleaned up.
    CleanedUp,
}

struct Entry {
    action_type: String,
    executor: Executor,
    options: ActionOptions,
    status: ActionStatus,
    updated_at: i64,
}

impl Entry {
    fn snapshot(&self) -> ActionSnapshot {
        ActionSnapshot {
            action_type: self.action_type.clone(),
            status: self.status.clone(),
            options: self.options,
            updated_at: self.updated_at,
        }
    }

    fn poison(&mut self, now: i64) {
        self.action_type.clear();
        self.executor = invalidated_executor();
        self.status = ActionStatus::Invalidated;
        self.updated_at = now;
    }
}

struct QueueState {
    entries: Vec<Entry>,
    valid: bool,
    /// Bumped by `reset` and `clean_up`; completions from older generations
    /// are dropped.
    generation: u64,
    next_run: u64,
    /// Latest execution of each action still awaiting its executor.
    in_flight: HashMap<String, u64>,
}

impl QueueState {
    fn position(&self, action_type: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.action_type == action_type)
    }

    fn next_index(&self) -> Option<usize> {
        self.entries.iter().position(|e| !e.status.is_complete())
    }

    fn active_index(&self) -> Option<usize> {
        self.entries.iter().position(|e| e.status.is_active())
    }

    fn failed_index(&self) -> Option<usize> {
        self.entries.iter().position(|e| e.status.is_failed())
    }

    fn first_idle_index(&self) -> Option<usize> {
        self.entries.iter().position(|e| match e.status {
            ActionStatus::Idle => true,
            ActionStatus::Active => e.options.idle_when_active,
            ActionStatus::Complete(_) | ActionStatus::Invalidated => false,
        })
    }

    fn active_types(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.status.is_active())
            .map(|e| e.action_type.clone())
            .collect()
    }

    fn is_finished(&self) -> bool {
        self.entries
            .iter()
            .all(|e| matches!(e.status, ActionStatus::Complete(Outcome::Succeeded { .. })))
    }
}

struct QueueShared {
    state: Mutex<QueueState>,
    env: QueueEnvironment,
    config: QueueConfig,
    events: broadcast::Sender<QueueEvent>,
}

impl QueueShared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: QueueEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn persist(&self, state: &QueueState) -> Result<()> {
        let records: Vec<ActionRecord> = state
            .entries
            .iter()
            .map(|e| ActionRecord::from_status(&e.action_type, &e.status, e.options, e.updated_at))
            .collect();
        write_json(self.env.storage.as_ref(), &self.config.storage_key, &records)?;
        Ok(())
    }

    /// Persist, logging instead of failing. Used on completion paths where
    /// there is no caller to report to.
    fn persist_or_log(&self, state: &QueueState) {
        if let Err(e) = self.persist(state) {
            tracing::error!(key = %self.config.storage_key, error = %e, "failed to persist action queue");
        }
    }
}

/// Read accessor handed to executors.
///
/// Lets a step read the results of earlier steps without being able to
/// mutate the queue.
#[derive(Clone)]
pub struct QueueReader {
    shared: Arc<QueueShared>,
}

impl QueueReader {
    /// Snapshot of a named action.
    #[must_use]
    pub fn get(&self, action_type: &str) -> Option<ActionSnapshot> {
        let state = self.shared.lock();
        state
            .position(action_type)
            .map(|index| state.entries[index].snapshot())
    }

    /// Result of a named action, only if it completed successfully.
    #[must_use]
    pub fn get_result(&self, action_type: &str) -> Option<Value> {
        self.get(action_type)
            .and_then(|action| action.result().cloned())
    }

    /// Result of a named action decoded as `T`.
    ///
    /// # Errors
    ///
    /// - [`ActionError::MissingResult`] if the action has no result
    /// - [`ActionError::Failed`] if the result does not decode as `T`
    pub fn result_as<T: DeserializeOwned>(&self, action_type: &str) -> std::result::Result<T, ActionError> {
        let value = self
            .get_result(action_type)
            .ok_or_else(|| ActionError::MissingResult(action_type.to_string()))?;
        serde_json::from_value(value).map_err(|e| {
            ActionError::Failed(format!("Result of '{action_type}' has unexpected shape: {e}"))
        })
    }

    /// Snapshots of all actions in order.
    #[must_use]
    pub fn actions(&self) -> Vec<ActionSnapshot> {
        self.shared.lock().entries.iter().map(Entry::snapshot).collect()
    }
}

/// Ordered, persisted step queue.
///
/// Cloning yields another handle to the same queue.
///
/// # Example
///
/// ```ignore
/// let queue = ActionQueue::new(
///     vec![
///         ActionProps::new("fetch", |_, _| async { Ok(json!(["scope"])) }),
///         ActionProps::new("use", |_, queue| async move {
///             let scopes = queue.get_result("fetch");
///             Ok(json!({ "used": scopes }))
///         }),
///     ],
///     env,
/// )?;
///
/// let mut events = queue.subscribe();
/// queue.start(None)?;
/// wait_for_event(&mut events, |e| *e == QueueEvent::Finished, Duration::from_secs(1)).await?;
/// ```
#[derive(Clone)]
pub struct ActionQueue {
    shared: Arc<QueueShared>,
}

impl ActionQueue {
    /// Build a queue persisted under [`DEFAULT_STORAGE_KEY`].
    ///
    /// # Errors
    ///
    /// See [`ActionQueue::with_config`].
    pub fn new(templates: Vec<ActionProps>, env: QueueEnvironment) -> Result<Self> {
        Self::with_config(templates, env, QueueConfig::default())
    }

    /// Build a queue, restoring stored status if present.
    ///
    /// # Errors
    ///
    /// - [`QueueError::DuplicateActionType`] if two templates share a type
    /// - [`QueueError::RestoreLengthMismatch`] / [`QueueError::RestoreOrderMismatch`]
    ///   if the stored queue does not match the templates
    /// - [`QueueError::InvariantViolation`] if the stored queue has more than
    ///   one active action
    /// - [`QueueError::Storage`] if the stored queue cannot be decoded
    pub fn with_config(
        templates: Vec<ActionProps>,
        env: QueueEnvironment,
        config: QueueConfig,
    ) -> Result<Self> {
        ensure_unique_types(templates.iter().map(|t| t.action_type.as_str()))?;

        let stored: Option<Vec<ActionRecord>> =
            read_json(env.storage.as_ref(), &config.storage_key)?;
        let restored = stored.is_some();
        let now = env.clock.now_millis();
        let statuses = match stored {
            Some(records) => merge_records(&templates, &records)?,
            None => vec![(ActionStatus::Idle, now); templates.len()],
        };

        let entries = templates
            .into_iter()
            .zip(statuses)
            .map(|(template, (status, updated_at))| Entry {
                action_type: template.action_type,
                executor: template.executor,
                options: template.options,
                status,
                updated_at,
            })
            .collect();

        let state = QueueState {
            entries,
            valid: true,
            generation: 0,
            next_run: 0,
            in_flight: HashMap::new(),
        };

        let active = state.active_types();
        if active.len() > 1 {
            tracing::error!(?active, "restored queue has more than one active action");
            return Err(QueueError::InvariantViolation(active));
        }

        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let queue = Self {
            shared: Arc::new(QueueShared {
                state: Mutex::new(state),
                env,
                config,
                events,
            }),
        };

        if restored {
            tracing::debug!(key = %queue.shared.config.storage_key, "action queue restored");
        } else {
            queue.shared.persist(&queue.shared.lock())?;
        }

        Ok(queue)
    }

    /// Read accessor over this queue.
    #[must_use]
    pub fn reader(&self) -> QueueReader {
        QueueReader {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Receive every transition from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.events.subscribe()
    }

    /// Session storage key of this queue.
    #[must_use]
    pub fn storage_key(&self) -> &str {
        &self.shared.config.storage_key
    }

    /// Whether the queue has not been cleaned up.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.shared.lock().valid
    }

    /// Snapshots of all actions in order.
    #[must_use]
    pub fn actions(&self) -> Vec<ActionSnapshot> {
        self.reader().actions()
    }

    /// Snapshot of a named action.
    #[must_use]
    pub fn get(&self, action_type: &str) -> Option<ActionSnapshot> {
        self.reader().get(action_type)
    }

    /// First action that is not complete.
    #[must_use]
    pub fn get_next(&self) -> Option<ActionSnapshot> {
        let state = self.shared.lock();
        state.next_index().map(|i| state.entries[i].snapshot())
    }

    /// The active action, if any.
    #[must_use]
    pub fn get_active(&self) -> Option<ActionSnapshot> {
        let state = self.shared.lock();
        state.active_index().map(|i| state.entries[i].snapshot())
    }

    /// First action that could be started: idle, or active but flagged
    /// `idleWhenActive`.
    #[must_use]
    pub fn get_first_idle(&self) -> Option<ActionSnapshot> {
        let state = self.shared.lock();
        state.first_idle_index().map(|i| state.entries[i].snapshot())
    }

    /// First failed action, if any.
    #[must_use]
    pub fn get_failed(&self) -> Option<ActionSnapshot> {
        let state = self.shared.lock();
        state.failed_index().map(|i| state.entries[i].snapshot())
    }

    /// Result of a named action, only if it completed successfully.
    #[must_use]
    pub fn get_result(&self, action_type: &str) -> Option<Value> {
        self.reader().get_result(action_type)
    }

    /// Whether every action completed successfully.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.shared.lock().is_finished()
    }

    /// Start or resume the queue.
    ///
    /// Picks, in order of precedence:
    /// 1. the failed action (retry; its error is cleared),
    /// 2. the active action (resume after a reload, or an `idleWhenActive`
    ///    step), unless it is already running in this page,
    /// 3. the next incomplete action.
    ///
    /// If `start_from` is given the picked action must have that type.
    /// Returns `Ok(None)` when every action is complete.
    ///
    /// # Errors
    ///
    /// - [`QueueError::UnexpectedAction`] if `start_from` does not match
    /// - [`QueueError::Invalidated`] after `clean_up`
    /// - [`QueueError::Storage`] if persisting fails
    #[tracing::instrument(skip(self), fields(key = %self.shared.config.storage_key))]
    pub fn start(&self, start_from: Option<&str>) -> Result<Option<ActionSnapshot>> {
        let index = {
            let mut state = self.shared.lock();
            if !state.valid {
                return Err(QueueError::Invalidated);
            }

            let picked = state
                .failed_index()
                .or_else(|| state.active_index())
                .or_else(|| state.next_index());

            let Some(index) = picked else {
                if let Some(expected) = start_from {
                    return Err(QueueError::UnexpectedAction {
                        expected: expected.to_string(),
                        found: String::new(),
                    });
                }
                return Ok(None);
            };

            let entry = &state.entries[index];
            if let Some(expected) = start_from {
                if entry.action_type != expected {
                    return Err(QueueError::UnexpectedAction {
                        expected: expected.to_string(),
                        found: entry.action_type.clone(),
                    });
                }
            }

            let running = state.in_flight.contains_key(&entry.action_type);
            if entry.status.is_active() && running && !entry.options.idle_when_active {
                tracing::debug!(action_type = %entry.action_type, "action already running");
                return Ok(Some(entry.snapshot()));
            }

            if entry.status.is_failed() {
                tracing::info!(action_type = %entry.action_type, "retrying failed action");
                let now = self.shared.env.clock.now_millis();
                let entry = &mut state.entries[index];
                entry.status = ActionStatus::Idle;
                entry.updated_at = now;
            }
            index
        };

        self.execute_index(index).map(Some)
    }

    /// Execute a named action now, regardless of its position.
    ///
    /// # Errors
    ///
    /// - [`QueueError::UnknownAction`] if no action has this type
    /// - [`QueueError::InvariantViolation`] if another action is active
    /// - [`QueueError::Invalidated`] after `clean_up`
    /// - [`QueueError::Storage`] if persisting fails
    pub fn execute(&self, action_type: &str) -> Result<ActionSnapshot> {
        let index = {
            let state = self.shared.lock();
            if !state.valid {
                return Err(QueueError::Invalidated);
            }
            state
                .position(action_type)
                .ok_or_else(|| QueueError::UnknownAction(action_type.to_string()))?
        };
        self.execute_index(index)
    }

    fn execute_index(&self, index: usize) -> Result<ActionSnapshot> {
        let (snapshot, executor, run, generation) = {
            let mut state = self.shared.lock();
            if !state.valid {
                return Err(QueueError::Invalidated);
            }

            let action_type = state.entries[index].action_type.clone();
            let others_active: Vec<String> = state
                .active_types()
                .into_iter()
                .filter(|t| *t != action_type)
                .collect();
            if !others_active.is_empty() {
                let mut all = others_active;
                all.push(action_type);
                tracing::error!(active = ?all, "refusing to start a second active action");
                return Err(QueueError::InvariantViolation(all));
            }

            let now = self.shared.env.clock.now_millis();
            let entry = &mut state.entries[index];
            entry.status = if entry.options.synchronous_completion {
                ActionStatus::Complete(Outcome::Succeeded { result: None })
            } else {
                ActionStatus::Active
            };
            entry.updated_at = now;
            let snapshot = entry.snapshot();
            let executor = Arc::clone(&entry.executor);

            let run = state.next_run;
            state.next_run += 1;
            state.in_flight.insert(action_type.clone(), run);
            let generation = state.generation;

            self.shared.persist(&state)?;
            (snapshot, executor, run, generation)
        };

        tracing::debug!(action_type = %snapshot.action_type, run, "action started");
        queue_metrics::record_started(&snapshot.action_type);
        self.shared.emit(QueueEvent::Started {
            action_type: snapshot.action_type.clone(),
        });

        let future = executor(snapshot.clone(), self.reader());
        let queue = self.clone();
        let action_type = snapshot.action_type.clone();
        tokio::spawn(async move {
            let outcome = future.await;
            queue.settle(&action_type, run, generation, outcome);
        });

        Ok(snapshot)
    }

    fn settle(
        &self,
        action_type: &str,
        run: u64,
        generation: u64,
        outcome: std::result::Result<Value, ActionError>,
    ) {
        let advance = {
            let mut state = self.shared.lock();
            let current = state.valid
                && state.generation == generation
                && state.in_flight.get(action_type) == Some(&run);
            if !current {
                tracing::debug!(action_type, run, "ignoring stale action completion");
                return;
            }
            state.in_flight.remove(action_type);

            let Some(index) = state.position(action_type) else {
                return;
            };
            let now = self.shared.env.clock.now_millis();
            let entry = &mut state.entries[index];
            entry.updated_at = now;

            match outcome {
                Ok(result) => {
                    entry.status = ActionStatus::Complete(Outcome::Succeeded {
                        result: Some(result),
                    });
                    self.shared.persist_or_log(&state);
                    tracing::debug!(action_type, "action completed");
                    queue_metrics::record_completed(action_type);
                    self.shared.emit(QueueEvent::Completed {
                        action_type: action_type.to_string(),
                    });
                    true
                }
                Err(ActionError::Suspended) => {
                    entry.status = ActionStatus::Active;
                    self.shared.persist_or_log(&state);
                    tracing::info!(action_type, "action suspended until redirect returns");
                    self.shared.emit(QueueEvent::Suspended {
                        action_type: action_type.to_string(),
                    });
                    false
                }
                Err(error) => {
                    let message = error.to_string();
                    entry.status = ActionStatus::Complete(Outcome::Failed {
                        message: message.clone(),
                    });
                    self.shared.persist_or_log(&state);
                    tracing::warn!(action_type, %message, "action failed, queue halted");
                    queue_metrics::record_failed(action_type);
                    self.shared.emit(QueueEvent::Failed {
                        action_type: action_type.to_string(),
                        message,
                    });
                    false
                }
            }
        };

        if !advance {
            return;
        }

        let next = {
            let state = self.shared.lock();
            if state.is_finished() {
                None
            } else {
                state.next_index()
            }
        };

        match next {
            Some(index) => {
                if let Err(e) = self.execute_index(index) {
                    tracing::error!(error = %e, "failed to advance action queue");
                }
            }
            None => {
                if self.is_complete() {
                    tracing::debug!("action queue finished");
                    self.shared.emit(QueueEvent::Finished);
                }
            }
        }
    }

    /// Return every action to idle so the queue can be replayed.
    ///
    /// Executions still in flight finish unobserved.
    ///
    /// # Errors
    ///
    /// - [`QueueError::Invalidated`] after `clean_up`
    /// - [`QueueError::Storage`] if persisting fails
    pub fn reset(&self) -> Result<()> {
        {
            let mut state = self.shared.lock();
            if !state.valid {
                return Err(QueueError::Invalidated);
            }
            let now = self.shared.env.clock.now_millis();
            for entry in &mut state.entries {
                entry.status = ActionStatus::Idle;
                entry.updated_at = now;
            }
            state.generation += 1;
            state.in_flight.clear();
            self.shared.persist(&state)?;
        }
        tracing::debug!(key = %self.shared.config.storage_key, "action queue reset");
        self.shared.emit(QueueEvent::Reset);
        Ok(())
    }

    /// Invalidate every action and forget the stored queue.
    ///
    /// Afterwards every operation fails with [`QueueError::Invalidated`] and
    /// in-flight completions are ignored. Calling it again is a no-op.
    pub fn clean_up(&self) {
        {
            let mut state = self.shared.lock();
            if !state.valid {
                return;
            }
            state.valid = false;
            state.generation += 1;
            state.in_flight.clear();
            let now = self.shared.env.clock.now_millis();
            for entry in &mut state.entries {
                entry.poison(now);
            }
        }
        self.shared.env.storage.remove_item(&self.shared.config.storage_key);
        tracing::debug!(key = %self.shared.config.storage_key, "action queue cleaned up");
        self.shared.emit(QueueEvent::CleanedUp);
    }
}

impl std::fmt::Debug for ActionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionQueue")
            .field("storage_key", &self.shared.config.storage_key)
            .field("actions", &self.actions())
            .finish()
    }
}

/// Wait for the first event matching `predicate`.
///
/// Subscribe before triggering the work, then pass the receiver here.
///
/// # Errors
///
/// - [`QueueError::Timeout`] if no matching event arrives in time
/// - [`QueueError::ChannelClosed`] if the queue was dropped
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<QueueEvent>,
    predicate: F,
    timeout: Duration,
) -> Result<QueueEvent>
where
    F: Fn(&QueueEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Ok(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "queue event observer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(QueueError::ChannelClosed),
            }
        }
    })
    .await
    .map_err(|_| QueueError::Timeout)?
}
