//! Error types for browser seam operations.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Failures raised by the browser seams.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The storage backend refused the write (quota, private mode, ...).
    #[error("Storage write failed for key '{key}': {reason}")]
    StorageWrite {
        /// Key being written
        key: String,
        /// Backend reason
        reason: String,
    },

    /// A stored value could not be encoded or decoded.
    #[error("Serialization failed for key '{key}': {reason}")]
    Serialization {
        /// Key being read or written
        key: String,
        /// Codec reason
        reason: String,
    },

    /// A hidden frame could not be created.
    #[error("Frame '{name}' could not be created: {reason}")]
    FrameCreation {
        /// Frame name attribute
        name: String,
        /// Host reason
        reason: String,
    },
}
