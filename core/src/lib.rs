//! # Helsinki Profile Core
//!
//! Environment traits, browser seams and the typed window message hub shared
//! by the authorization and action-queue crates.
//!
//! ## Core Concepts
//!
//! - **Clock**: Injected time source for status timestamps
//! - **Storage**: Session-scoped and persistent key/value stores
//! - **Location**: The page URL, full navigations and history replacement
//! - **FrameHost**: Hidden iframe creation, lookup and removal
//! - **MessageHub**: Window `message` events, classified into typed
//!   [`ChannelMessage`](message::ChannelMessage) variants
//! - **BrowserContext**: One browsing context bundling all of the above
//!
//! ## Architecture
//!
//! Every browser capability is a trait injected through [`BrowserContext`].
//! Production embeds bind the traits to the DOM; tests bind them to the
//! headless browser from `helsinki-profile-testing`.
//!
//! ```text
//! raw post_message ──► MessageHub::post_message ──► classify
//!                                                    │
//!                   ┌────────────────────────────────┼──────────────────┐
//!                   ▼                                ▼                  ▼
//!          ChannelMessage::Removed       ChannelMessage::Cleanup   ChannelMessage::External
//! ```

pub mod context;
pub mod environment;
pub mod error;
pub mod frame;
pub mod location;
pub mod message;
pub mod storage;

pub use chrono::{DateTime, Utc};
pub use context::BrowserContext;
pub use environment::{Clock, SystemClock};
pub use error::{CoreError, Result};
pub use frame::{FrameHost, HiddenFrame, WindowId};
pub use location::Location;
pub use message::{ChannelMessage, MessageEvent, MessageHub};
pub use storage::Storage;
