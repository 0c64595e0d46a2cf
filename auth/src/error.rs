//! Error types for authorization-code retrieval.

use helsinki_profile_core::CoreError;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for authorization operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Why a hidden-frame loader rejected.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LoaderError {
    /// No accepted message arrived in time.
    #[error("No accepted message from frame '{name}' within {after:?}")]
    Timeout {
        /// Frame name
        name: String,
        /// Configured timeout
        after: Duration,
    },

    /// The frame's creator removed it.
    #[error("Frame '{name}' was removed")]
    FrameRemoved {
        /// Frame name
        name: String,
    },

    /// A `cleanUpIFrameLoader` broadcast targeted this frame.
    ///
    /// Carries the broadcast payload unchanged.
    #[error("Loader cancelled: {payload}")]
    Cancelled {
        /// Raw cancellation payload
        payload: Value,
    },

    /// The loader was cleaned up through its handle while waiting.
    #[error("Loader for frame '{name}' was cleaned up")]
    CleanedUp {
        /// Frame name
        name: String,
    },

    /// The frame could not be created.
    #[error("Frame creation failed: {0}")]
    FrameCreation(#[source] CoreError),

    /// The window's message channel closed.
    #[error("Window message channel closed")]
    ChannelClosed,
}

/// Failures of the authorization-code manager and fetcher.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    /// The returned `state` has no pending redirect entry.
    #[error("Unknown OAuth state parameter")]
    UnknownState {
        /// The unmatched state
        state: String,
    },

    /// The pending redirect entry outlived its time-to-live.
    #[error("OAuth state parameter has expired")]
    StateExpired {
        /// The expired state
        state: String,
    },

    /// `consume_code` found nothing to consume.
    #[error("No authorization code pending")]
    NoPendingCode,

    /// A required query parameter is absent.
    #[error("Missing query parameter '{0}'")]
    MissingParameter(&'static str),

    /// A URL could not be parsed or built.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// Offending URL
        url: String,
        /// Parser reason
        reason: String,
    },

    /// The frame handshake replied with an unusable payload.
    #[error("Unexpected handshake payload: {0}")]
    UnexpectedPayload(Value),

    /// Hidden-frame handshake failed.
    #[error(transparent)]
    Loader(#[from] LoaderError),

    /// Local storage failed.
    #[error(transparent)]
    Storage(#[from] CoreError),
}
