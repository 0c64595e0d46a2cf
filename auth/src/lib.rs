//! # Helsinki Profile Authorization
//!
//! Silent retrieval of OIDC authorization codes for the Helsinki profile.
//!
//! ## Features
//!
//! - **Hidden-frame handshakes**: [`frame_loader`] loads a provider URL in an
//!   invisible frame and waits for its `postMessage` reply, with origin and
//!   source checks, a timeout and cancellation by frame name
//! - **Redirect flows**: [`AuthorizationCodeManager`] builds authorize URLs
//!   and carries a deferred action across a full-page redirect
//! - **Background fetching**: [`AuthorizationCodeFetcher`] fetches one code
//!   per call and is safe to unmount mid-flight
//!
//! ## Architecture
//!
//! ```text
//! fetch(scopes) ─► build_authorize_url(state) ─► FrameLoader::open
//!                                                     │
//!        provider redirects the frame to redirect_uri │
//!                                                     ▼
//!        relay_code_to_parent ── {code, state} ──► wait_for(matching state)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use helsinki_profile_auth::*;
//!
//! let manager = Arc::new(AuthorizationCodeManager::new(OidcConfig::from_env()?, ctx.clone()));
//! let fetcher = AuthorizationCodeFetcher::new(ctx, manager, |code| {
//!     tracing::info!(received = code.is_some(), "authorization code");
//! });
//! fetcher.fetch(&["gdpr.read"]);
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Public modules
pub mod code_fetcher;
pub mod code_manager;
pub mod config;
pub mod error;
pub mod frame_loader;

// Re-export main types for convenience
pub use code_fetcher::{
    AUTHORIZATION_CODE_FRAME_NAME, AuthorizationCodeFetcher, PendingCode, fetch_authorization_code,
    relay_code_to_parent,
};
pub use code_manager::{
    AuthorizationCodeManager, DEFERRED_ACTION_PARAM, PendingRedirect, RedirectReturn,
    generate_state, is_redirect_return,
};
pub use config::{ConfigError, FrameLoaderConfig, OidcConfig};
pub use error::{AuthError, LoaderError, Result};
pub use frame_loader::{FrameLoader, LoaderHandle, cancel, load};
