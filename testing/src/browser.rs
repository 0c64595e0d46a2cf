//! Headless in-memory browser.
//!
//! Implements [`Storage`], [`Location`] and [`FrameHost`] without a DOM and
//! wires them into a [`BrowserContext`]. A [`HeadlessBrowser`] models one tab:
//! [`HeadlessBrowser::reload`] starts a fresh page in the same tab, keeping
//! both storages and dropping the document, frames and message listeners.

use helsinki_profile_core::error::{CoreError, Result};
use helsinki_profile_core::frame::{HIDDEN_FRAME_STYLE, HIDDEN_FRAME_TAB_INDEX};
use helsinki_profile_core::{
    BrowserContext, FrameHost, HiddenFrame, Location, MessageEvent, Storage, WindowId,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory [`Storage`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
    refuse_writes: AtomicBool,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `set_item` fail, as a full quota would.
    pub fn refuse_writes(&self, refuse: bool) {
        self.refuse_writes.store(refuse, Ordering::SeqCst);
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }

    /// Decode a stored value as JSON, for assertions.
    #[must_use]
    pub fn json(&self, key: &str) -> Option<Value> {
        lock(&self.items)
            .get(key)
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        lock(&self.items).get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        if self.refuse_writes.load(Ordering::SeqCst) {
            return Err(CoreError::StorageWrite {
                key: key.to_string(),
                reason: "quota exceeded".to_string(),
            });
        }
        lock(&self.items).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) {
        lock(&self.items).remove(key);
    }

    fn keys(&self) -> Vec<String> {
        lock(&self.items).keys().cloned().collect()
    }
}

/// In-memory [`Location`] recording every navigation.
#[derive(Debug)]
pub struct MemoryLocation {
    href: Mutex<String>,
    assigned: Mutex<Vec<String>>,
    replaced: Mutex<Vec<String>>,
}

impl MemoryLocation {
    /// Start at `href`.
    #[must_use]
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: Mutex::new(href.into()),
            assigned: Mutex::new(Vec::new()),
            replaced: Mutex::new(Vec::new()),
        }
    }

    /// Every URL passed to [`Location::assign`], oldest first.
    #[must_use]
    pub fn navigations(&self) -> Vec<String> {
        lock(&self.assigned).clone()
    }

    /// Most recent top-level navigation.
    #[must_use]
    pub fn last_navigation(&self) -> Option<String> {
        lock(&self.assigned).last().cloned()
    }

    /// Every URL passed to [`Location::replace`], oldest first.
    #[must_use]
    pub fn replacements(&self) -> Vec<String> {
        lock(&self.replaced).clone()
    }
}

impl Location for MemoryLocation {
    fn href(&self) -> String {
        lock(&self.href).clone()
    }

    fn assign(&self, url: &str) {
        lock(&self.assigned).push(url.to_string());
        *lock(&self.href) = url.to_string();
    }

    fn replace(&self, url: &str) {
        lock(&self.replaced).push(url.to_string());
        *lock(&self.href) = url.to_string();
    }
}

/// In-memory document holding hidden frames.
#[derive(Debug)]
pub struct MemoryDocument {
    frames: Mutex<Vec<HiddenFrame>>,
    created: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    next_window: AtomicU64,
    refuse_frames: AtomicBool,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            next_window: AtomicU64::new(100),
            refuse_frames: AtomicBool::new(false),
        }
    }
}

impl MemoryDocument {
    /// Create an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make frame creation fail.
    pub fn refuse_frames(&self, refuse: bool) {
        self.refuse_frames.store(refuse, Ordering::SeqCst);
    }

    /// Frames currently attached.
    #[must_use]
    pub fn frames(&self) -> Vec<HiddenFrame> {
        lock(&self.frames).clone()
    }

    /// Names of frames ever created, in order.
    #[must_use]
    pub fn created(&self) -> Vec<String> {
        lock(&self.created).clone()
    }

    /// Names of frames ever removed, in order.
    #[must_use]
    pub fn removed(&self) -> Vec<String> {
        lock(&self.removed).clone()
    }
}

impl FrameHost for MemoryDocument {
    fn find_frame(&self, name: &str) -> Option<HiddenFrame> {
        lock(&self.frames).iter().find(|f| f.name == name).cloned()
    }

    fn create_hidden_frame(&self, name: &str, url: &str) -> Result<HiddenFrame> {
        if self.refuse_frames.load(Ordering::SeqCst) {
            return Err(CoreError::FrameCreation {
                name: name.to_string(),
                reason: "document refused the element".to_string(),
            });
        }
        let frame = HiddenFrame {
            name: name.to_string(),
            url: url.to_string(),
            content_window: WindowId(self.next_window.fetch_add(1, Ordering::SeqCst)),
            style: HIDDEN_FRAME_STYLE,
            tab_index: HIDDEN_FRAME_TAB_INDEX,
        };
        lock(&self.frames).push(frame.clone());
        lock(&self.created).push(name.to_string());
        Ok(frame)
    }

    fn remove_frame(&self, name: &str) -> bool {
        let mut frames = lock(&self.frames);
        let before = frames.len();
        frames.retain(|f| f.name != name);
        let removed = frames.len() != before;
        if removed {
            lock(&self.removed).push(name.to_string());
        }
        removed
    }
}

/// One browser tab.
#[derive(Debug, Clone)]
pub struct HeadlessBrowser {
    origin: String,
    session: Arc<MemoryStorage>,
    local: Arc<MemoryStorage>,
    location: Arc<MemoryLocation>,
    document: Arc<MemoryDocument>,
    context: BrowserContext,
}

impl HeadlessBrowser {
    /// Open a tab on `href`, served from `origin`.
    #[must_use]
    pub fn new(origin: impl Into<String>, href: impl Into<String>) -> Self {
        Self::assemble(
            origin.into(),
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryStorage::new()),
            href.into(),
            WindowId(1),
        )
    }

    fn assemble(
        origin: String,
        session: Arc<MemoryStorage>,
        local: Arc<MemoryStorage>,
        href: String,
        window_id: WindowId,
    ) -> Self {
        let location = Arc::new(MemoryLocation::new(href));
        let document = Arc::new(MemoryDocument::new());
        let context = BrowserContext::builder(
            origin.clone(),
            Arc::clone(&session) as Arc<dyn Storage>,
            Arc::clone(&local) as Arc<dyn Storage>,
            Arc::clone(&location) as Arc<dyn Location>,
            Arc::clone(&document) as Arc<dyn FrameHost>,
        )
        .with_window_id(window_id)
        .build();

        Self {
            origin,
            session,
            local,
            location,
            document,
            context,
        }
    }

    /// Load a new page at the current URL in the same tab.
    #[must_use]
    pub fn reload(&self) -> Self {
        self.load(self.location.href())
    }

    /// Load a new page at `href` in the same tab.
    #[must_use]
    pub fn load(&self, href: impl Into<String>) -> Self {
        Self::assemble(
            self.origin.clone(),
            Arc::clone(&self.session),
            Arc::clone(&self.local),
            href.into(),
            WindowId(1),
        )
    }

    /// The page loaded inside the named hidden frame, as it would run after
    /// the identity provider redirected the frame to `href`.
    ///
    /// The frame page shares local storage with the tab and runs in the
    /// frame's content window. Returns `None` if no such frame exists.
    #[must_use]
    pub fn frame_page(&self, name: &str, href: impl Into<String>) -> Option<Self> {
        let frame = self.document.find_frame(name)?;
        Some(Self::assemble(
            self.origin.clone(),
            Arc::new(MemoryStorage::new()),
            Arc::clone(&self.local),
            href.into(),
            frame.content_window,
        ))
    }

    /// Open a second tab of the same browser: shared local storage, fresh
    /// session storage.
    #[must_use]
    pub fn new_tab(&self, href: impl Into<String>) -> Self {
        Self::assemble(
            self.origin.clone(),
            Arc::new(MemoryStorage::new()),
            Arc::clone(&self.local),
            href.into(),
            WindowId(1),
        )
    }

    /// The page's browsing context.
    #[must_use]
    pub fn context(&self) -> &BrowserContext {
        &self.context
    }

    /// Session storage of the tab.
    #[must_use]
    pub fn session_storage(&self) -> &MemoryStorage {
        &self.session
    }

    /// Local storage of the browser.
    #[must_use]
    pub fn local_storage(&self) -> &MemoryStorage {
        &self.local
    }

    /// The page location.
    #[must_use]
    pub fn location(&self) -> &MemoryLocation {
        &self.location
    }

    /// The page document.
    #[must_use]
    pub fn document(&self) -> &MemoryDocument {
        &self.document
    }

    /// Post `data` from the named frame's content window, as the page loaded
    /// inside the frame would. Returns `None` if no such frame exists.
    pub fn post_from_frame(&self, name: &str, data: Value) -> Option<usize> {
        let frame = self.document.find_frame(name)?;
        Some(self.post(self.origin.clone(), Some(frame.content_window), data))
    }

    /// Post an arbitrary `message` event to the page.
    pub fn post(&self, origin: impl Into<String>, source: Option<WindowId>, data: Value) -> usize {
        self.context.messages().post_message(MessageEvent {
            origin: origin.into(),
            source,
            data,
        })
    }
}
