//! Hidden-frame URL loader.
//!
//! Loads a URL in a hidden frame and waits for the page inside it to answer
//! through `postMessage`. Several loaders may share one frame by name: the
//! first creates it and owns its removal, later ones only listen.
//!
//! # Lifecycle
//!
//! ```text
//! open ──► waiting ──┬── validator accepts ──► Ok(data)
//!                    ├── timeout ──────────────► Err(Timeout)
//!                    ├── Removed{name} ────────► Err(FrameRemoved)
//!                    ├── Cleanup{name} ────────► Err(Cancelled{payload})
//!                    └── handle.clean_up() ────► Err(CleanedUp)
//!
//! every exit ──► clean_up: creator removes the frame and broadcasts Removed
//! ```
//!
//! Only messages from the document's own origin whose source is the frame's
//! content window reach the validator.

use crate::config::FrameLoaderConfig;
use crate::error::LoaderError;
use helsinki_profile_core::{BrowserContext, ChannelMessage, HiddenFrame};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, broadcast};

/// Clean-up side of a loader, callable from anywhere.
///
/// Cloning yields another handle to the same loader.
#[derive(Clone)]
pub struct LoaderHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    ctx: BrowserContext,
    name: String,
    created: bool,
    cleaned: AtomicBool,
    wake: Notify,
}

impl LoaderHandle {
    /// Stop the loader.
    ///
    /// The first call removes the frame (if this loader created it),
    /// broadcasts `iframeRemoved` and wakes a pending wait. Later calls do
    /// nothing. Returns whether this call did the work.
    pub fn clean_up(&self) -> bool {
        if self.inner.cleaned.swap(true, Ordering::SeqCst) {
            return false;
        }

        let name = &self.inner.name;
        if self.inner.created && self.inner.ctx.frames().remove_frame(name) {
            self.inner.ctx.broadcast_frame_removed(name);
            tracing::debug!(frame = %name, "hidden frame removed");
        }
        // Stores a permit if nobody waits yet.
        self.inner.wake.notify_one();
        true
    }

    /// Whether the loader has been cleaned up.
    #[must_use]
    pub fn is_cleaned_up(&self) -> bool {
        self.inner.cleaned.load(Ordering::SeqCst)
    }

    /// Frame name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl std::fmt::Debug for LoaderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderHandle")
            .field("name", &self.inner.name)
            .field("created", &self.inner.created)
            .field("cleaned", &self.is_cleaned_up())
            .finish()
    }
}

/// One pending hidden-frame handshake.
///
/// Dropping the loader cleans it up.
pub struct FrameLoader {
    frame: HiddenFrame,
    config: FrameLoaderConfig,
    messages: broadcast::Receiver<ChannelMessage>,
    handle: LoaderHandle,
}

impl FrameLoader {
    /// Attach to the frame called `name`, creating and navigating it to `url`
    /// if it does not exist yet.
    ///
    /// Subscribes to window messages before returning, so a reply posted
    /// right after this call is not lost.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::FrameCreation`] if the document refuses the frame.
    pub fn open(
        ctx: &BrowserContext,
        url: &str,
        name: &str,
        config: FrameLoaderConfig,
    ) -> Result<Self, LoaderError> {
        let messages = ctx.messages().subscribe();

        let (frame, created) = match ctx.frames().find_frame(name) {
            Some(frame) => {
                tracing::debug!(frame = %name, "attaching to existing hidden frame");
                (frame, false)
            }
            None => {
                let frame = ctx
                    .frames()
                    .create_hidden_frame(name, url)
                    .map_err(LoaderError::FrameCreation)?;
                tracing::debug!(frame = %name, window = %frame.content_window, "hidden frame created");
                (frame, true)
            }
        };

        Ok(Self {
            frame,
            config,
            messages,
            handle: LoaderHandle {
                inner: Arc::new(HandleInner {
                    ctx: ctx.clone(),
                    name: name.to_string(),
                    created,
                    cleaned: AtomicBool::new(false),
                    wake: Notify::new(),
                }),
            },
        })
    }

    /// Handle for cleaning this loader up from elsewhere.
    #[must_use]
    pub fn handle(&self) -> LoaderHandle {
        self.handle.clone()
    }

    /// Whether this loader created the frame (and so owns its removal).
    #[must_use]
    pub fn created_frame(&self) -> bool {
        self.handle.inner.created
    }

    /// The frame being watched.
    #[must_use]
    pub const fn frame(&self) -> &HiddenFrame {
        &self.frame
    }

    /// Wait until `validator` accepts a message from the frame.
    ///
    /// A rejected message leaves the loader listening. The loader is cleaned
    /// up on every exit.
    ///
    /// # Errors
    ///
    /// See the variants of [`LoaderError`].
    pub async fn wait_for<F>(mut self, mut validator: F) -> Result<Value, LoaderError>
    where
        F: FnMut(&Value) -> bool,
    {
        let timeout = self.config.timeout;
        let outcome = tokio::time::timeout(timeout, self.next_accepted(&mut validator))
            .await
            .unwrap_or_else(|_| {
                tracing::warn!(frame = %self.handle.name(), ?timeout, "hidden frame handshake timed out");
                Err(LoaderError::Timeout {
                    name: self.handle.name().to_string(),
                    after: timeout,
                })
            });

        self.handle.clean_up();
        outcome
    }

    async fn next_accepted<F>(&mut self, validator: &mut F) -> Result<Value, LoaderError>
    where
        F: FnMut(&Value) -> bool,
    {
        let handle = &self.handle;
        let name = handle.name();
        let origin = handle.inner.ctx.origin();
        let source = self.frame.content_window;
        let messages = &mut self.messages;

        loop {
            if handle.is_cleaned_up() {
                return Err(LoaderError::CleanedUp {
                    name: name.to_string(),
                });
            }

            let message = tokio::select! {
                () = handle.inner.wake.notified() => continue,
                message = messages.recv() => message,
            };

            match message {
                Ok(ChannelMessage::External(event)) => {
                    if event.origin != origin || event.source != Some(source) {
                        tracing::trace!(frame = %name, origin = %event.origin, "ignoring message from another window");
                        continue;
                    }
                    if validator(&event.data) {
                        tracing::debug!(frame = %name, "hidden frame handshake accepted");
                        return Ok(event.data);
                    }
                    tracing::debug!(frame = %name, "validator rejected message, still listening");
                }
                Ok(ChannelMessage::Removed { name: removed }) if removed == name => {
                    return Err(LoaderError::FrameRemoved { name: removed });
                }
                Ok(ChannelMessage::Cleanup { name: target, payload }) if target == name => {
                    tracing::debug!(frame = %name, "loader cancelled by broadcast");
                    return Err(LoaderError::Cancelled { payload });
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(frame = %name, skipped, "loader lagged behind window messages");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(LoaderError::ChannelClosed),
            }
        }
    }
}

impl Drop for FrameLoader {
    fn drop(&mut self) {
        self.handle.clean_up();
    }
}

impl std::fmt::Debug for FrameLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLoader")
            .field("frame", &self.frame)
            .field("config", &self.config)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Load `url` in the hidden frame `name` and wait for a message accepted by
/// `validator`, with the default 10 second timeout.
///
/// # Errors
///
/// See the variants of [`LoaderError`].
pub async fn load<F>(
    ctx: &BrowserContext,
    url: &str,
    name: &str,
    validator: F,
) -> Result<Value, LoaderError>
where
    F: FnMut(&Value) -> bool,
{
    FrameLoader::open(ctx, url, name, FrameLoaderConfig::default())?
        .wait_for(validator)
        .await
}

/// Make every loader watching the frame `name` reject and clean up.
///
/// Returns the number of window listeners that received the broadcast.
pub fn cancel(ctx: &BrowserContext, name: &str) -> usize {
    tracing::debug!(frame = %name, "cancelling hidden frame loaders");
    ctx.broadcast_clean_up(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use helsinki_profile_core::WindowId;
    use helsinki_profile_testing::HeadlessBrowser;
    use serde_json::json;
    use std::time::Duration;

    const ORIGIN: &str = "https://profiili.hel.fi";

    fn browser() -> HeadlessBrowser {
        HeadlessBrowser::new(ORIGIN, format!("{ORIGIN}/"))
    }

    fn open(browser: &HeadlessBrowser, name: &str) -> FrameLoader {
        FrameLoader::open(
            browser.context(),
            "https://idp.example/auth",
            name,
            FrameLoaderConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_open_creates_hidden_frame() {
        let browser = browser();
        let loader = open(&browser, "frame");

        assert!(loader.created_frame());
        let frame = loader.frame();
        assert_eq!(frame.url, "https://idp.example/auth");
        assert_eq!(frame.tab_index, -1);
        assert_eq!(browser.document().created(), vec!["frame".to_string()]);
    }

    #[test]
    fn test_second_loader_attaches_without_navigating() {
        let browser = browser();
        let first = open(&browser, "frame");
        let second = FrameLoader::open(
            browser.context(),
            "https://idp.example/other",
            "frame",
            FrameLoaderConfig::default(),
        )
        .unwrap();

        assert!(!second.created_frame());
        assert_eq!(second.frame().url, "https://idp.example/auth");
        assert_eq!(second.frame().content_window, first.frame().content_window);
        assert_eq!(browser.document().created().len(), 1);
    }

    #[test]
    fn test_open_reports_refused_frame() {
        let browser = browser();
        browser.document().refuse_frames(true);
        let result = FrameLoader::open(
            browser.context(),
            "https://idp",
            "frame",
            FrameLoaderConfig::default(),
        );
        assert!(matches!(result, Err(LoaderError::FrameCreation(_))));
    }

    #[tokio::test]
    async fn test_clean_up_is_idempotent() {
        let browser = browser();
        let mut observer = browser.context().messages().subscribe();
        let loader = open(&browser, "frame");
        let handle = loader.handle();

        assert!(handle.clean_up());
        assert!(!handle.clean_up());
        drop(loader);

        assert!(browser.document().frames().is_empty());
        assert_eq!(browser.document().removed(), vec!["frame".to_string()]);
        assert_eq!(
            observer.recv().await.unwrap(),
            ChannelMessage::Removed {
                name: "frame".to_string()
            }
        );
        assert!(observer.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_non_creator_never_removes_frame() {
        let browser = browser();
        let _creator = open(&browser, "frame");
        let attached = FrameLoader::open(
            browser.context(),
            "https://idp",
            "frame",
            FrameLoaderConfig::default(),
        )
        .unwrap();

        attached.handle().clean_up();
        assert_eq!(browser.document().frames().len(), 1);
    }

    #[tokio::test]
    async fn test_clean_up_through_handle_rejects_wait() {
        let browser = browser();
        let loader = open(&browser, "frame");
        let handle = loader.handle();

        let waiting = tokio::spawn(loader.wait_for(|_| true));
        tokio::task::yield_now().await;
        handle.clean_up();

        assert_eq!(
            waiting.await.unwrap(),
            Err(LoaderError::CleanedUp {
                name: "frame".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_validator_rejection_keeps_listening() {
        let browser = browser();
        let loader = open(&browser, "frame");
        let mut seen = Vec::new();

        browser.post_from_frame("frame", json!({"step": 1}));
        browser.post_from_frame("frame", json!({"step": 2}));

        let data = loader
            .wait_for(|data| {
                seen.push(data.clone());
                data["step"] == 2
            })
            .await
            .unwrap();

        assert_eq!(data, json!({"step": 2}));
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn test_foreign_messages_never_reach_validator() {
        let browser = browser();
        let loader = open(&browser, "frame");
        let frame_window = loader.frame().content_window;
        let mut calls = 0;

        browser.post("https://evil.example", Some(frame_window), json!({"code": "x"}));
        browser.post(ORIGIN, Some(WindowId(999)), json!({"code": "x"}));
        browser.post(ORIGIN, None, json!({"code": "x"}));
        browser.post_from_frame("frame", json!({"code": "real"}));

        let data = loader
            .wait_for(|_| {
                calls += 1;
                true
            })
            .await
            .unwrap();

        assert_eq!(data, json!({"code": "real"}));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_frame() {
        let browser = browser();
        let loader = FrameLoader::open(
            browser.context(),
            "https://idp",
            "frame",
            FrameLoaderConfig::default().with_timeout(Duration::from_secs(3)),
        )
        .unwrap();

        let result = loader.wait_for(|_| true).await;
        assert_eq!(
            result,
            Err(LoaderError::Timeout {
                name: "frame".to_string(),
                after: Duration::from_secs(3),
            })
        );
        assert!(browser.document().frames().is_empty());
    }
}
