//! Page location and navigation.

/// The current page URL and the two ways of changing it.
pub trait Location: Send + Sync {
    /// Full current URL.
    fn href(&self) -> String;

    /// Top-level navigation to `url`.
    ///
    /// In a real browser this unloads the page; nothing after it is
    /// guaranteed to run.
    fn assign(&self, url: &str);

    /// Replace the current history entry without reloading.
    fn replace(&self, url: &str);
}
