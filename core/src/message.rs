//! Window `message` events and the internal control channel.
//!
//! Identity-provider replies and the application's own loader control signals
//! arrive over the same `postMessage` transport. The [`MessageHub`] is the
//! single consumer of raw events and classifies each one exactly once into a
//! [`ChannelMessage`], so loaders match on a typed variant instead of probing
//! payload shapes.
//!
//! # Wire shapes
//!
//! | Variant    | Payload posted on the window                        |
//! |------------|-----------------------------------------------------|
//! | `Removed`  | `{"iframeRemoved": true, "iframeName": "<name>"}`   |
//! | `Cleanup`  | `{"cleanUpIFrameLoader": true, "iframeName": "<name>"}` |
//! | `External` | anything else                                       |
//!
//! Control shapes are only honoured when posted from the document's own
//! origin; the same payload from a foreign origin stays `External`.

use crate::frame::WindowId;
use serde_json::{Value, json};
use tokio::sync::broadcast;

/// Payload key marking a frame-removed broadcast.
pub const IFRAME_REMOVED_KEY: &str = "iframeRemoved";

/// Payload key marking a loader-cancellation broadcast.
pub const CLEAN_UP_KEY: &str = "cleanUpIFrameLoader";

/// Payload key carrying the frame name of a control broadcast.
pub const IFRAME_NAME_KEY: &str = "iframeName";

/// Default buffer of the hub's broadcast channel.
pub const DEFAULT_HUB_CAPACITY: usize = 64;

/// A raw `message` event as delivered to the window.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    /// `event.origin` of the sender.
    pub origin: String,

    /// `event.source`, the sending window (if known).
    pub source: Option<WindowId>,

    /// `event.data`.
    pub data: Value,
}

/// A classified window message.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// The frame with this name has been removed by its creator.
    Removed {
        /// Frame name
        name: String,
    },

    /// Every loader watching this frame name must reject and clean up.
    Cleanup {
        /// Frame name
        name: String,
        /// The raw payload, handed to rejected loaders unchanged
        payload: Value,
    },

    /// Any other message; subject to origin and source checks by consumers.
    External(MessageEvent),
}

impl ChannelMessage {
    /// Classify a raw event received by a document whose origin is `own_origin`.
    #[must_use]
    pub fn classify(event: MessageEvent, own_origin: &str) -> Self {
        if event.origin != own_origin {
            return Self::External(event);
        }

        let name = event
            .data
            .get(IFRAME_NAME_KEY)
            .and_then(Value::as_str)
            .map(str::to_string);

        match name {
            Some(name) if flag_set(&event.data, IFRAME_REMOVED_KEY) => Self::Removed { name },
            Some(name) if flag_set(&event.data, CLEAN_UP_KEY) => Self::Cleanup {
                name,
                payload: event.data,
            },
            _ => Self::External(event),
        }
    }

    /// Frame name this message targets, for control variants.
    #[must_use]
    pub fn frame_name(&self) -> Option<&str> {
        match self {
            Self::Removed { name } | Self::Cleanup { name, .. } => Some(name),
            Self::External(_) => None,
        }
    }
}

fn flag_set(data: &Value, key: &str) -> bool {
    data.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Payload announcing that the named frame was removed.
#[must_use]
pub fn removed_payload(name: &str) -> Value {
    json!({ IFRAME_REMOVED_KEY: true, IFRAME_NAME_KEY: name })
}

/// Payload asking every loader of the named frame to stop.
#[must_use]
pub fn clean_up_payload(name: &str) -> Value {
    json!({ CLEAN_UP_KEY: true, IFRAME_NAME_KEY: name })
}

/// The window's message dispatcher.
///
/// Subscribers see every message posted after they subscribed, in post order.
#[derive(Debug, Clone)]
pub struct MessageHub {
    origin: String,
    sender: broadcast::Sender<ChannelMessage>,
}

impl MessageHub {
    /// Create a hub for a document served from `origin`.
    #[must_use]
    pub fn new(origin: impl Into<String>) -> Self {
        Self::with_capacity(origin, DEFAULT_HUB_CAPACITY)
    }

    /// Create a hub with a custom broadcast buffer.
    #[must_use]
    pub fn with_capacity(origin: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            origin: origin.into(),
            sender,
        }
    }

    /// Origin of the owning document.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Deliver a raw `message` event.
    ///
    /// Returns the number of subscribers that received it.
    pub fn post_message(&self, event: MessageEvent) -> usize {
        let message = ChannelMessage::classify(event, &self.origin);
        tracing::trace!(?message, "window message");
        // No subscribers is not an error: nobody is listening yet.
        self.sender.send(message).unwrap_or(0)
    }

    /// Receive every message posted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelMessage> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
