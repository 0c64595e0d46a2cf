//! Continuing a flow after a full-page redirect.
//!
//! The legacy broker returns to `redirect_uri`, where [`handle_page_load`]
//! stores the code and sends the browser back to the page the flow started
//! on, marked with `a=<deferred action>`. On that page an
//! [`ActionResumer`] sees the marker, strips it from the address bar and
//! restarts the waiting step.

use crate::error::Result;
use helsinki_profile_auth::{
    AuthorizationCodeManager, DEFERRED_ACTION_PARAM, RedirectReturn, is_redirect_return,
};
use helsinki_profile_core::BrowserContext;
use helsinki_profile_runtime::{ActionQueue, ActionSnapshot};
use url::Url;

/// Detects that the page was loaded to continue a deferred action.
#[derive(Debug, Clone)]
pub struct ActionResumer {
    ctx: BrowserContext,
    deferred_action: String,
}

impl ActionResumer {
    /// Watch for `a=<deferred_action>` on the current page.
    pub fn new(ctx: BrowserContext, deferred_action: impl Into<String>) -> Self {
        Self {
            ctx,
            deferred_action: deferred_action.into(),
        }
    }

    /// The deferred action this resumer continues.
    #[must_use]
    pub fn deferred_action(&self) -> &str {
        &self.deferred_action
    }

    fn current_url(&self) -> Option<Url> {
        Url::parse(&self.ctx.location().href()).ok()
    }

    fn has_marker(&self, url: &Url) -> bool {
        url.query_pairs()
            .any(|(key, value)| key == DEFERRED_ACTION_PARAM && value == self.deferred_action)
    }

    /// Whether the current URL carries this resumer's marker.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.current_url().is_some_and(|url| self.has_marker(&url))
    }

    /// Remove the marker from the address bar without reloading, so a
    /// manual reload does not resume twice. Returns whether a marker was
    /// removed.
    pub fn consume_marker(&self) -> bool {
        let Some(mut url) = self.current_url() else {
            return false;
        };
        if !self.has_marker(&url) {
            return false;
        }

        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != DEFERRED_ACTION_PARAM)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }

        self.ctx.location().replace(url.as_str());
        true
    }

    /// If the marker is present, consume it and start `queue` from
    /// `start_from`. Returns the started step, or `None` without a marker.
    ///
    /// # Errors
    ///
    /// Returns [`GdprError::Queue`](crate::GdprError::Queue) if the queue is
    /// not at `start_from`.
    #[tracing::instrument(skip(self, queue), fields(deferred_action = %self.deferred_action))]
    pub fn resume(&self, queue: &ActionQueue, start_from: &str) -> Result<Option<ActionSnapshot>> {
        if !self.consume_marker() {
            return Ok(None);
        }
        tracing::info!("resuming deferred action");
        Ok(queue.start(Some(start_from))?)
    }
}

fn without_query(url: &str) -> Option<Url> {
    let mut url = Url::parse(url).ok()?;
    url.set_query(None);
    url.set_fragment(None);
    Some(url)
}

/// Page-load entry point for the manager's `redirect_uri`.
///
/// When the page is a return from the manager's provider, completes the
/// redirect (which navigates back to the deferred action) and sweeps expired
/// redirect entries. Returns `None` on any other page.
///
/// # Errors
///
/// Returns [`GdprError::Auth`](crate::GdprError::Auth) if the return does not
/// match a pending redirect.
pub fn handle_page_load(
    ctx: &BrowserContext,
    manager: &AuthorizationCodeManager,
) -> Result<Option<RedirectReturn>> {
    let href = ctx.location().href();
    let at_redirect_uri = match (without_query(&href), without_query(&manager.config().redirect_uri)) {
        (Some(current), Some(expected)) => current == expected,
        _ => false,
    };
    if !at_redirect_uri || !is_redirect_return(&href) {
        return Ok(None);
    }

    let purged = manager.purge_expired();
    if purged > 0 {
        tracing::debug!(purged, "removed expired redirect entries");
    }
    Ok(Some(manager.handle_redirect_return()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use helsinki_profile_testing::HeadlessBrowser;

    fn page(href: &str) -> HeadlessBrowser {
        HeadlessBrowser::new("https://profiili.hel.fi", href)
    }

    #[test]
    fn test_marker_must_name_this_action() {
        let browser = page("https://profiili.hel.fi/?a=gdprDelete");
        assert!(ActionResumer::new(browser.context().clone(), "gdprDelete").is_pending());
        assert!(!ActionResumer::new(browser.context().clone(), "gdprDownload").is_pending());
    }

    #[test]
    fn test_consume_marker_keeps_other_parameters() {
        let browser = page("https://profiili.hel.fi/profile?lang=fi&a=gdprDelete#top");
        let resumer = ActionResumer::new(browser.context().clone(), "gdprDelete");

        assert!(resumer.consume_marker());
        assert_eq!(
            browser.location().replacements(),
            vec!["https://profiili.hel.fi/profile?lang=fi#top".to_string()]
        );
        assert!(browser.location().navigations().is_empty());
    }

    #[test]
    fn test_consume_marker_drops_empty_query() {
        let browser = page("https://profiili.hel.fi/?a=gdprDelete");
        let resumer = ActionResumer::new(browser.context().clone(), "gdprDelete");

        assert!(resumer.consume_marker());
        assert!(!resumer.is_pending());
        assert!(!resumer.consume_marker());
        assert_eq!(
            browser.location().replacements(),
            vec!["https://profiili.hel.fi/".to_string()]
        );
    }
}
