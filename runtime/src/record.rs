//! Serialisable status records and the restore merge.
//!
//! The stored queue is a JSON array of [`ActionRecord`]s:
//!
//! ```json
//! [{"type":"getServiceConnections","complete":true,"active":false,
//!   "result":{...},"updatedAt":1735689600000,"options":{}}]
//! ```
//!
//! Restoring never trusts stored behaviour: records only carry status, and
//! [`merge_records`] pairs them with the static templates index by index.

use crate::action::{ActionOptions, ActionProps, ActionStatus, Outcome};
use crate::error::{QueueError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stored status of one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    /// Action type.
    #[serde(rename = "type")]
    pub action_type: String,

    /// Settled flag.
    pub complete: bool,

    /// In-flight flag.
    pub active: bool,

    /// Result of a successful action (omitted for `noStorage` actions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Last status change, milliseconds since the Unix epoch.
    pub updated_at: i64,

    /// Flags, stored for inspection only; the template's flags win on restore.
    #[serde(default)]
    pub options: ActionOptions,
}

impl ActionRecord {
    /// Encode a status. `Invalidated` actions are never stored, so they map
    /// to an idle record.
    #[must_use]
    pub fn from_status(
        action_type: &str,
        status: &ActionStatus,
        options: ActionOptions,
        updated_at: i64,
    ) -> Self {
        let (complete, active, result, error_message) = match status {
            ActionStatus::Idle | ActionStatus::Invalidated => (false, false, None, None),
            ActionStatus::Active => (false, true, None, None),
            ActionStatus::Complete(Outcome::Succeeded { result }) => (
                true,
                false,
                if options.no_storage { None } else { result.clone() },
                None,
            ),
            ActionStatus::Complete(Outcome::Failed { message }) => {
                (true, false, None, Some(message.clone()))
            }
        };

        Self {
            action_type: action_type.to_string(),
            complete,
            active,
            result,
            error_message,
            updated_at,
            options,
        }
    }

    /// Decode the status. A record that is both complete and active is
    /// treated as complete.
    #[must_use]
    pub fn status(&self) -> ActionStatus {
        if self.complete {
            match &self.error_message {
                Some(message) => ActionStatus::Complete(Outcome::Failed {
                    message: message.clone(),
                }),
                None => ActionStatus::Complete(Outcome::Succeeded {
                    result: self.result.clone(),
                }),
            }
        } else if self.active {
            ActionStatus::Active
        } else {
            ActionStatus::Idle
        }
    }
}

/// Fail on the first repeated action type.
///
/// # Errors
///
/// Returns [`QueueError::DuplicateActionType`].
pub fn ensure_unique_types<'a>(types: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for action_type in types {
        if !seen.insert(action_type) {
            return Err(QueueError::DuplicateActionType(action_type.to_string()));
        }
    }
    Ok(())
}

/// Pair stored records with templates.
///
/// Returns the status and `updatedAt` for each template, in template order.
///
/// # Errors
///
/// - [`QueueError::RestoreLengthMismatch`] if the counts differ
/// - [`QueueError::RestoreOrderMismatch`] at the first index whose type differs
pub fn merge_records(
    templates: &[ActionProps],
    records: &[ActionRecord],
) -> Result<Vec<(ActionStatus, i64)>> {
    if templates.len() != records.len() {
        return Err(QueueError::RestoreLengthMismatch {
            expected: templates.len(),
            found: records.len(),
        });
    }

    templates
        .iter()
        .zip(records)
        .enumerate()
        .map(|(index, (template, record))| {
            if template.action_type == record.action_type {
                Ok((record.status(), record.updated_at))
            } else {
                Err(QueueError::RestoreOrderMismatch {
                    index,
                    expected: template.action_type.clone(),
                    found: record.action_type.clone(),
                })
            }
        })
        .collect()
}
