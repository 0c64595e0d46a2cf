//! Hidden iframe hosting.

use crate::error::Result;
use std::fmt;

/// Identity of a browsing context's window object.
///
/// Message sources are compared by this id, the way the DOM compares
/// `event.source` with `iframe.contentWindow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window#{}", self.0)
    }
}

/// Inline style applied to every hidden frame: invisible, zero-size and
/// off-screen.
pub const HIDDEN_FRAME_STYLE: &str =
    "visibility:hidden;position:absolute;top:-1000px;left:-1000px;width:0;height:0;border:0";

/// `tabIndex` of hidden frames, keeping them out of keyboard focus order.
pub const HIDDEN_FRAME_TAB_INDEX: i32 = -1;

/// A hidden iframe attached to the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiddenFrame {
    /// The frame's `name` attribute.
    pub name: String,

    /// URL the frame was navigated to when created.
    pub url: String,

    /// The frame's `contentWindow`.
    pub content_window: WindowId,

    /// Inline style (always [`HIDDEN_FRAME_STYLE`]).
    pub style: &'static str,

    /// `tabIndex` (always [`HIDDEN_FRAME_TAB_INDEX`]).
    pub tab_index: i32,
}

/// Document-side operations on hidden frames, looked up by `name`.
pub trait FrameHost: Send + Sync {
    /// Find an attached frame by name.
    fn find_frame(&self, name: &str) -> Option<HiddenFrame>;

    /// Create a hidden frame, append it to the document and navigate it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FrameCreation`](crate::CoreError::FrameCreation)
    /// if the document refuses the element.
    fn create_hidden_frame(&self, name: &str, url: &str) -> Result<HiddenFrame>;

    /// Remove a frame. Returns `false` if no frame had that name.
    fn remove_frame(&self, name: &str) -> bool;
}
