//! Error types for the GDPR flows.

use helsinki_profile_auth::AuthError;
use helsinki_profile_runtime::{ActionError, QueueError};
use thiserror::Error;

/// Result type alias for GDPR operations.
pub type Result<T> = std::result::Result<T, GdprError>;

/// Errors raised by the profile backend, the executors and the flows.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GdprError {
    /// Required environment variable is missing.
    #[error("Environment variable {0} is not set")]
    EnvVarNotSet(String),

    /// The HTTP request could not be sent.
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// The backend answered with a non-success status.
    #[error("Backend error (status {status}): {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// The backend answered with GraphQL errors.
    #[error("GraphQL errors: {}", .0.join("; "))]
    Graphql(Vec<String>),

    /// The response did not have the expected shape.
    #[error("Response parsing failed: {0}")]
    ResponseParseFailed(String),

    /// An authorization code that the selected services need is missing.
    #[error("Missing {0} authorization code")]
    MissingAuthorizationCode(&'static str),

    /// The downloaded profile could not be written out.
    #[error("Saving {file_name} failed: {reason}")]
    SaveFailed {
        /// Target file name
        file_name: String,
        /// Underlying failure
        reason: String,
    },

    /// Authorization-code retrieval failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The action queue rejected an operation.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<GdprError> for ActionError {
    fn from(err: GdprError) -> Self {
        Self::failed(err)
    }
}
