//! # Helsinki Profile GDPR
//!
//! Download and delete flows for the Helsinki profile, run as persisted
//! [`ActionQueue`](helsinki_profile_runtime::ActionQueue)s.
//!
//! ## Features
//!
//! - **Backend boundary**: [`ProfileBackend`] with a GraphQL implementation
//!   over `reqwest`
//! - **Two brokers**: codes from a redirect-only broker survive the
//!   round trip through session and local storage; codes from the modern
//!   provider are fetched in a hidden frame
//! - **Resume after redirect**: [`ActionResumer`] and [`handle_page_load`]
//!   continue the waiting step on the page the redirect returns to
//!
//! ## Example
//!
//! ```rust,ignore
//! use helsinki_profile_gdpr::*;
//!
//! // On every page load at redirect_uri:
//! handle_page_load(&ctx, &services.legacy_broker)?;
//!
//! // On the profile page:
//! let flow = GdprFlow::new(GdprFlowKind::Delete, services, Arc::new(SystemClock))?;
//! let outcome = match flow.resume_and_run(WAIT).await? {
//!     Some(outcome) => outcome,
//!     None => flow.run(WAIT).await?,
//! };
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Public modules
pub mod backend;
pub mod error;
pub mod executors;
pub mod file_saver;
pub mod flow;
pub mod graphql;
pub mod resumer;

// Mocks (enabled by the default test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

// Re-export main types for convenience
pub use backend::{
    AuthorizationCodes, BackendFuture, DeleteOutcome, IdentityBroker, ProfileBackend,
    ServiceConnection,
};
pub use error::{GdprError, Result};
pub use executors::{GdprServices, RequiredScopes, templates};
pub use file_saver::{DOWNLOAD_FILE_NAME, DirectoryFileSaver, FileSaver};
pub use flow::{FlowOutcome, GdprFlow, GdprFlowKind};
pub use graphql::{BackendConfig, GraphqlProfileBackend};
pub use resumer::{ActionResumer, handle_page_load};
