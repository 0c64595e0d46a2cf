//! GDPR download and delete flows.

use crate::backend::{DeleteOutcome, ServiceConnection};
use crate::error::Result;
use crate::executors::{DELETE_PROFILE, GdprServices, LEGACY_BROKER_CODE, templates};
use crate::resumer::ActionResumer;
use helsinki_profile_core::{BrowserContext, Clock};
use helsinki_profile_runtime::{
    ActionQueue, ActionSnapshot, QueueConfig, QueueEnvironment, QueueEvent, wait_for_event,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Prefix of the session-storage key of a flow's queue.
pub const FLOW_STORAGE_PREFIX: &str = "gdprActionQueue:";

/// Which GDPR operation a flow performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GdprFlowKind {
    /// Data portability: download everything and save it as a file.
    Download,
    /// Erasure: delete the profile and connected service data.
    Delete,
}

impl GdprFlowKind {
    /// Short name used in storage keys and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Delete => "delete",
        }
    }

    /// Session-storage key of the flow's queue.
    #[must_use]
    pub fn storage_key(self) -> String {
        format!("{FLOW_STORAGE_PREFIX}{}", self.as_str())
    }

    /// Deferred action carried across the legacy broker redirect.
    #[must_use]
    pub const fn deferred_action(self) -> &'static str {
        match self {
            Self::Download => "gdprDownload",
            Self::Delete => "gdprDelete",
        }
    }

    /// The scope a service requires for this operation.
    #[must_use]
    pub fn scope_of(self, service: &ServiceConnection) -> &str {
        match self {
            Self::Download => &service.gdpr_query_scope,
            Self::Delete => &service.gdpr_delete_scope,
        }
    }
}

impl fmt::Display for GdprFlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a flow stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Every step completed.
    Finished,
    /// A step failed; the flow can be retried.
    Failed {
        /// Failed step
        action_type: String,
        /// Its error message
        message: String,
    },
    /// A step handed control to a full-page redirect; the flow continues
    /// on the page the redirect returns to.
    Suspended {
        /// Waiting step
        action_type: String,
    },
    /// The flow was cleaned up while running.
    CleanedUp,
}

fn settles(event: &QueueEvent) -> bool {
    matches!(
        event,
        QueueEvent::Finished
            | QueueEvent::Failed { .. }
            | QueueEvent::Suspended { .. }
            | QueueEvent::CleanedUp
    )
}

impl FlowOutcome {
    fn from_event(event: QueueEvent) -> Self {
        match event {
            QueueEvent::Failed {
                action_type,
                message,
            } => Self::Failed {
                action_type,
                message,
            },
            QueueEvent::Suspended { action_type } => Self::Suspended { action_type },
            QueueEvent::CleanedUp => Self::CleanedUp,
            _ => Self::Finished,
        }
    }
}

/// One GDPR operation, persisted in the tab's session storage so it
/// survives the legacy broker redirect.
#[derive(Debug, Clone)]
pub struct GdprFlow {
    kind: GdprFlowKind,
    queue: ActionQueue,
    services: GdprServices,
}

impl GdprFlow {
    /// Build the flow, restoring its progress from session storage.
    ///
    /// A stored queue that does not match the flow's steps is an error, not
    /// a fresh start: it usually means the steps changed mid-flow. The
    /// embedding app decides whether to [`discard_stored`](Self::discard_stored)
    /// and build again.
    ///
    /// # Errors
    ///
    /// Returns [`GdprError::Queue`](crate::GdprError::Queue) if the stored
    /// queue does not match or cannot be decoded, or if the queue cannot be
    /// persisted.
    pub fn new(kind: GdprFlowKind, services: GdprServices, clock: Arc<dyn Clock>) -> Result<Self> {
        let queue = ActionQueue::with_config(
            templates(kind, &services),
            QueueEnvironment::new(services.ctx.session_storage_handle(), clock),
            QueueConfig::new(kind.storage_key()),
        )?;

        Ok(Self {
            kind,
            queue,
            services,
        })
    }

    /// Drop the stored progress of `kind` in `ctx`'s session storage, so the
    /// next [`new`](Self::new) starts from the first step.
    pub fn discard_stored(kind: GdprFlowKind, ctx: &BrowserContext) {
        tracing::warn!(flow = %kind, "discarding stored flow");
        ctx.session_storage().remove_item(&kind.storage_key());
    }

    /// Which operation this flow performs.
    #[must_use]
    pub const fn kind(&self) -> GdprFlowKind {
        self.kind
    }

    /// The underlying queue.
    #[must_use]
    pub const fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    /// Observe step transitions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.queue.subscribe()
    }

    /// Start, or continue from the first incomplete step.
    ///
    /// # Errors
    ///
    /// Returns [`GdprError::Queue`](crate::GdprError::Queue) if the queue rejects the start.
    #[tracing::instrument(skip(self), fields(flow = %self.kind))]
    pub fn start(&self) -> Result<Option<ActionSnapshot>> {
        Ok(self.queue.start(None)?)
    }

    /// Run the failed step again.
    ///
    /// A failed `legacyBrokerCode` means the code it waited for is gone, so
    /// the whole flow starts over and redirects again.
    ///
    /// # Errors
    ///
    /// Returns [`GdprError::Queue`](crate::GdprError::Queue) if the queue rejects the restart.
    pub fn retry(&self) -> Result<Option<ActionSnapshot>> {
        match self.queue.get_failed() {
            Some(failed) if failed.action_type == LEGACY_BROKER_CODE => {
                tracing::info!(flow = %self.kind, "restarting flow for a new legacy code");
                self.queue.reset()?;
                self.start()
            }
            Some(failed) => Ok(self.queue.start(Some(&failed.action_type))?),
            None => self.start(),
        }
    }

    /// Return every step to idle.
    ///
    /// # Errors
    ///
    /// Returns [`GdprError::Queue`](crate::GdprError::Queue) if the reset cannot be persisted.
    pub fn reset(&self) -> Result<()> {
        Ok(self.queue.reset()?)
    }

    /// Discard the flow and its stored progress.
    pub fn clean_up(&self) {
        self.queue.clean_up();
    }

    /// Continue the flow if this page is the return from the legacy broker.
    ///
    /// Returns the resumed step, or `None` if the page is not a return for
    /// this flow.
    ///
    /// # Errors
    ///
    /// Returns [`GdprError::Queue`](crate::GdprError::Queue) if the flow is not waiting for the code.
    pub fn resume_after_redirect(&self) -> Result<Option<ActionSnapshot>> {
        ActionResumer::new(self.services.ctx.clone(), self.kind.deferred_action())
            .resume(&self.queue, LEGACY_BROKER_CODE)
    }

    /// Start and wait until the flow finishes, fails or suspends.
    ///
    /// # Errors
    ///
    /// - [`GdprError::Queue`](crate::GdprError::Queue) if the start is rejected
    /// - [`GdprError::Queue`](crate::GdprError::Queue) with
    ///   [`QueueError::Timeout`](helsinki_profile_runtime::QueueError::Timeout)
    ///   if the flow does not settle within `timeout`
    pub async fn run(&self, timeout: Duration) -> Result<FlowOutcome> {
        let mut events = self.subscribe();
        if self.start()?.is_none() {
            return Ok(FlowOutcome::Finished);
        }
        Self::settle(&mut events, timeout).await
    }

    /// [`resume_after_redirect`](Self::resume_after_redirect) and wait
    /// until the flow settles. Returns `None` if there was nothing to resume.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub async fn resume_and_run(&self, timeout: Duration) -> Result<Option<FlowOutcome>> {
        let mut events = self.subscribe();
        if self.resume_after_redirect()?.is_none() {
            return Ok(None);
        }
        Self::settle(&mut events, timeout).await.map(Some)
    }

    async fn settle(
        events: &mut broadcast::Receiver<QueueEvent>,
        timeout: Duration,
    ) -> Result<FlowOutcome> {
        let event = wait_for_event(events, settles, timeout).await?;
        let outcome = FlowOutcome::from_event(event);
        tracing::debug!(?outcome, "flow settled");
        Ok(outcome)
    }

    /// The failed step, if any.
    #[must_use]
    pub fn failed_action(&self) -> Option<ActionSnapshot> {
        self.queue.get_failed()
    }

    /// Whether every step has completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.queue.is_complete()
    }

    /// Result of the delete step, once it has completed.
    #[must_use]
    pub fn delete_outcome(&self) -> Option<DeleteOutcome> {
        self.queue
            .get_result(DELETE_PROFILE)
            .and_then(|value| serde_json::from_value(value).ok())
    }
}
