//! Silent authorization-code retrieval through a hidden frame.
//!
//! The frame is navigated to the provider's authorize URL. When the provider
//! redirects the frame back to the application, the page inside the frame
//! calls [`relay_code_to_parent`], which posts `{code, state}` to the parent
//! window where the waiting loader accepts it.

use crate::code_manager::{AuthorizationCodeManager, generate_state};
use crate::config::FrameLoaderConfig;
use crate::error::{AuthError, Result};
use crate::frame_loader::{FrameLoader, cancel};
use helsinki_profile_core::{BrowserContext, MessageEvent, MessageHub};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

/// Name of the hidden frame used for authorization-code handshakes.
pub const AUTHORIZATION_CODE_FRAME_NAME: &str = "authorizationCodeFrame";

/// Whether `data` is a `{code, state}` reply for `state`.
#[must_use]
pub fn is_code_reply(data: &Value, state: &str) -> bool {
    data.get("code").is_some_and(Value::is_string)
        && data.get("state").and_then(Value::as_str) == Some(state)
}

/// A handshake that has been started but not awaited.
#[derive(Debug)]
pub struct PendingCode {
    loader: FrameLoader,
    state: String,
}

impl PendingCode {
    /// Open the code frame for `scopes` under a fresh state.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidUrl`] if the authorize URL cannot be built
    /// - [`AuthError::Loader`] if the frame cannot be created
    pub fn open<S: AsRef<str>>(
        ctx: &BrowserContext,
        manager: &AuthorizationCodeManager,
        scopes: &[S],
        config: FrameLoaderConfig,
    ) -> Result<Self> {
        let state = generate_state();
        let url = manager.build_authorize_url(scopes, &state)?;
        let loader = FrameLoader::open(ctx, &url, AUTHORIZATION_CODE_FRAME_NAME, config)?;
        Ok(Self { loader, state })
    }

    /// Correlation state of this handshake.
    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Wait for the matching reply and return its code.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Loader`] on timeout, cancellation or frame removal
    /// - [`AuthError::UnexpectedPayload`] if the accepted reply has no code
    pub async fn code(self) -> Result<String> {
        let Self { loader, state } = self;
        let data = loader.wait_for(|data| is_code_reply(data, &state)).await?;
        data.get("code")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(AuthError::UnexpectedPayload(data))
    }
}

/// Fetch one authorization code through the hidden frame.
///
/// # Errors
///
/// See [`PendingCode::open`] and [`PendingCode::code`].
#[tracing::instrument(skip(ctx, manager, scopes), fields(client_id = %manager.config().client_id))]
pub async fn fetch_authorization_code<S: AsRef<str>>(
    ctx: &BrowserContext,
    manager: &AuthorizationCodeManager,
    scopes: &[S],
    config: FrameLoaderConfig,
) -> Result<String> {
    PendingCode::open(ctx, manager, scopes, config)?.code().await
}

/// Run on the page the provider redirected the hidden frame to: post
/// `{code, state}` from the frame's window to its parent.
///
/// # Errors
///
/// - [`AuthError::InvalidUrl`] if the frame's URL cannot be parsed
/// - [`AuthError::MissingParameter`] if `code` or `state` is absent
pub fn relay_code_to_parent(frame: &BrowserContext, parent: &MessageHub) -> Result<()> {
    let href = frame.location().href();
    let url = Url::parse(&href).map_err(|e| AuthError::InvalidUrl {
        url: href.clone(),
        reason: e.to_string(),
    })?;
    let param = |name: &'static str| {
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
            .ok_or(AuthError::MissingParameter(name))
    };
    let code = param("code")?;
    let state = param("state")?;

    parent.post_message(MessageEvent {
        origin: frame.origin().to_string(),
        source: Some(frame.window_id()),
        data: json!({ "code": code, "state": state }),
    });
    tracing::debug!(window = %frame.window_id(), "relayed authorization code to parent");
    Ok(())
}

type CodeCallback = Box<dyn Fn(Option<String>) + Send + Sync>;

struct FetcherInner {
    mounted: AtomicBool,
    fetching: watch::Sender<bool>,
    code: Mutex<Option<String>>,
    callback: CodeCallback,
}

impl FetcherInner {
    fn settle(&self, code: Option<String>) {
        if !self.mounted.load(Ordering::SeqCst) {
            tracing::debug!("authorization code settled after unmount, ignoring");
            return;
        }
        *self.code.lock().unwrap_or_else(PoisonError::into_inner) = code.clone();
        self.fetching.send_replace(false);
        (self.callback)(code);
    }
}

/// Component that fetches authorization codes in the background.
///
/// Exposes `is_fetching` and the last `code`, and calls the callback once per
/// [`fetch`](Self::fetch). Unmounting (or dropping) stops all reactions and
/// cancels any handshake still listening on the code frame.
///
/// Must be used from within a Tokio runtime.
pub struct AuthorizationCodeFetcher {
    ctx: BrowserContext,
    manager: Arc<AuthorizationCodeManager>,
    config: FrameLoaderConfig,
    inner: Arc<FetcherInner>,
}

impl AuthorizationCodeFetcher {
    /// Mount a fetcher calling `callback` with each result (`None` on any
    /// failure).
    pub fn new<F>(ctx: BrowserContext, manager: Arc<AuthorizationCodeManager>, callback: F) -> Self
    where
        F: Fn(Option<String>) + Send + Sync + 'static,
    {
        let (fetching, _) = watch::channel(false);
        Self {
            ctx,
            manager,
            config: FrameLoaderConfig::default(),
            inner: Arc::new(FetcherInner {
                mounted: AtomicBool::new(true),
                fetching,
                code: Mutex::new(None),
                callback: Box::new(callback),
            }),
        }
    }

    /// Use a custom loader configuration.
    #[must_use]
    pub const fn with_loader_config(mut self, config: FrameLoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Start fetching a code for `additional_scopes`.
    ///
    /// The frame is opened before this returns. Earlier fetches are not
    /// cancelled; each settles and calls back on its own. Returns the
    /// background task, or `None` if the fetcher is unmounted or the frame
    /// could not be opened (the callback then receives `None` at once).
    pub fn fetch<S: AsRef<str>>(&self, additional_scopes: &[S]) -> Option<JoinHandle<()>> {
        if !self.is_mounted() {
            tracing::debug!("fetch called after unmount");
            return None;
        }

        self.inner.fetching.send_replace(true);
        let pending = match PendingCode::open(&self.ctx, &self.manager, additional_scopes, self.config) {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(error = %e, "could not start authorization code handshake");
                self.inner.settle(None);
                return None;
            }
        };

        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(async move {
            let code = match pending.code().await {
                Ok(code) => Some(code),
                Err(e) => {
                    tracing::warn!(error = %e, "authorization code handshake failed");
                    None
                }
            };
            inner.settle(code);
        }))
    }

    /// Whether a fetch is in progress.
    #[must_use]
    pub fn is_fetching(&self) -> bool {
        *self.inner.fetching.borrow()
    }

    /// Observe `is_fetching` transitions.
    #[must_use]
    pub fn watch_fetching(&self) -> watch::Receiver<bool> {
        self.inner.fetching.subscribe()
    }

    /// The code from the last settled fetch.
    #[must_use]
    pub fn code(&self) -> Option<String> {
        self.inner
            .code
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the fetcher is still mounted.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.load(Ordering::SeqCst)
    }

    /// Stop reacting to results and cancel handshakes on the code frame.
    ///
    /// Calling it again does nothing.
    pub fn unmount(&self) {
        if self.inner.mounted.swap(false, Ordering::SeqCst) {
            cancel(&self.ctx, AUTHORIZATION_CODE_FRAME_NAME);
        }
    }
}

impl Drop for AuthorizationCodeFetcher {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl std::fmt::Debug for AuthorizationCodeFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCodeFetcher")
            .field("mounted", &self.is_mounted())
            .field("fetching", &self.is_fetching())
            .finish_non_exhaustive()
    }
}
