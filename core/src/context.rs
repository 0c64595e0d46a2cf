//! One browsing context: a window with its document, storages and location.

use crate::frame::{FrameHost, WindowId};
use crate::location::Location;
use crate::message::{MessageEvent, MessageHub, clean_up_payload, removed_payload};
use crate::storage::Storage;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Everything the authorization and queue components need from the browser.
///
/// Cloning is cheap; clones share the same window.
#[derive(Clone)]
pub struct BrowserContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    window_id: WindowId,
    session_storage: Arc<dyn Storage>,
    local_storage: Arc<dyn Storage>,
    location: Arc<dyn Location>,
    frames: Arc<dyn FrameHost>,
    messages: MessageHub,
}

/// Builder for [`BrowserContext`].
pub struct BrowserContextBuilder {
    origin: String,
    window_id: WindowId,
    session_storage: Arc<dyn Storage>,
    local_storage: Arc<dyn Storage>,
    location: Arc<dyn Location>,
    frames: Arc<dyn FrameHost>,
    hub: Option<MessageHub>,
}

impl BrowserContextBuilder {
    /// Use the given window id instead of `WindowId(0)`.
    #[must_use]
    pub const fn with_window_id(mut self, window_id: WindowId) -> Self {
        self.window_id = window_id;
        self
    }

    /// Share an existing hub instead of creating one for `origin`.
    #[must_use]
    pub fn with_hub(mut self, hub: MessageHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Finish the context.
    #[must_use]
    pub fn build(self) -> BrowserContext {
        let messages = self.hub.unwrap_or_else(|| MessageHub::new(self.origin));
        BrowserContext {
            inner: Arc::new(ContextInner {
                window_id: self.window_id,
                session_storage: self.session_storage,
                local_storage: self.local_storage,
                location: self.location,
                frames: self.frames,
                messages,
            }),
        }
    }
}

impl BrowserContext {
    /// Start building a context for a document served from `origin`.
    #[must_use]
    pub fn builder(
        origin: impl Into<String>,
        session_storage: Arc<dyn Storage>,
        local_storage: Arc<dyn Storage>,
        location: Arc<dyn Location>,
        frames: Arc<dyn FrameHost>,
    ) -> BrowserContextBuilder {
        BrowserContextBuilder {
            origin: origin.into(),
            window_id: WindowId(0),
            session_storage,
            local_storage,
            location,
            frames,
            hub: None,
        }
    }

    /// The document origin.
    #[must_use]
    pub fn origin(&self) -> &str {
        self.inner.messages.origin()
    }

    /// This window's id.
    #[must_use]
    pub fn window_id(&self) -> WindowId {
        self.inner.window_id
    }

    /// Session-scoped storage (per tab).
    #[must_use]
    pub fn session_storage(&self) -> &dyn Storage {
        self.inner.session_storage.as_ref()
    }

    /// Persistent local storage (per origin).
    #[must_use]
    pub fn local_storage(&self) -> &dyn Storage {
        self.inner.local_storage.as_ref()
    }

    /// Owned handle to the session storage, for components that outlive a
    /// borrow of the context.
    #[must_use]
    pub fn session_storage_handle(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.inner.session_storage)
    }

    /// The page location.
    #[must_use]
    pub fn location(&self) -> &dyn Location {
        self.inner.location.as_ref()
    }

    /// The document's hidden frames.
    #[must_use]
    pub fn frames(&self) -> &dyn FrameHost {
        self.inner.frames.as_ref()
    }

    /// The window's message hub.
    #[must_use]
    pub fn messages(&self) -> &MessageHub {
        &self.inner.messages
    }

    /// `window.postMessage(data, origin)` on this window.
    pub fn post_to_self(&self, data: Value) -> usize {
        self.inner.messages.post_message(MessageEvent {
            origin: self.origin().to_string(),
            source: Some(self.window_id()),
            data,
        })
    }

    /// Announce that the named frame was removed.
    pub fn broadcast_frame_removed(&self, name: &str) -> usize {
        self.post_to_self(removed_payload(name))
    }

    /// Ask every loader watching the named frame to stop.
    pub fn broadcast_clean_up(&self, name: &str) -> usize {
        self.post_to_self(clean_up_payload(name))
    }
}

impl fmt::Debug for BrowserContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserContext")
            .field("origin", &self.origin())
            .field("window_id", &self.window_id())
            .field("href", &self.location().href())
            .finish_non_exhaustive()
    }
}
