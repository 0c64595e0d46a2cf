//! OIDC authorization-code manager.
//!
//! Builds authorize URLs and carries the redirect flow across a full-page
//! navigation. State lives in local storage under [`STORAGE_PREFIX`]:
//!
//! | Key                                        | Value |
//! |--------------------------------------------|-------|
//! | `authorizationCodeManager.state.<state>`   | `{"redirectUrl", "deferredAction", "createdAt"}` |
//! | `authorizationCodeManager.authorization_code` | `{"code", "deferredAction", "createdAt"}`, the last returned code, consumed once |
//!
//! A held code belongs to the deferred action whose redirect returned it. It
//! is never handed to another action, expires with the redirect entries and
//! is dropped when a new redirect begins.

use crate::config::OidcConfig;
use crate::error::{AuthError, Result};
use helsinki_profile_core::storage::{read_json, take_item, write_json};
use helsinki_profile_core::{BrowserContext, Clock, SystemClock};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

/// Prefix of every local storage key owned by the manager.
pub const STORAGE_PREFIX: &str = "authorizationCodeManager.";

/// Query parameter naming the deferred action to resume after a redirect.
pub const DEFERRED_ACTION_PARAM: &str = "a";

const STATE_KEY_PREFIX: &str = "authorizationCodeManager.state.";
const CODE_KEY: &str = "authorizationCodeManager.authorization_code";
const STATE_LENGTH: usize = 32;

/// A redirect waiting for the identity provider to send the browser back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRedirect {
    /// Page to return to.
    pub redirect_url: String,

    /// Action to resume on return.
    pub deferred_action: String,

    /// When the redirect began, milliseconds since the Unix epoch.
    pub created_at: i64,
}

/// A returned code waiting for its deferred action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeldCode {
    code: String,
    deferred_action: String,
    created_at: i64,
}

/// Result of handling a redirect return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectReturn {
    /// Action to resume.
    pub deferred_action: String,

    /// Where the browser was sent, with the deferred-action marker.
    pub resume_url: String,
}

/// Fresh random correlation value: 32 alphanumeric characters.
#[must_use]
pub fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LENGTH)
        .map(char::from)
        .collect()
}

/// Whether `url` is an OIDC redirect return (carries both `code` and `state`).
#[must_use]
pub fn is_redirect_return(url: &str) -> bool {
    Url::parse(url).is_ok_and(|url| {
        url.query_pairs().any(|(k, _)| k == "code") && url.query_pairs().any(|(k, _)| k == "state")
    })
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| AuthError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Builds authorize URLs and tracks redirect flows for one provider.
pub struct AuthorizationCodeManager {
    config: OidcConfig,
    ctx: BrowserContext,
    clock: Arc<dyn Clock>,
}

impl AuthorizationCodeManager {
    /// Manager for the provider in `config`, storing state in `ctx`'s
    /// local storage.
    #[must_use]
    pub fn new(config: OidcConfig, ctx: BrowserContext) -> Self {
        Self::with_clock(config, ctx, Arc::new(SystemClock))
    }

    /// Like [`AuthorizationCodeManager::new`] with an explicit clock.
    #[must_use]
    pub fn with_clock(config: OidcConfig, ctx: BrowserContext, clock: Arc<dyn Clock>) -> Self {
        Self { config, ctx, clock }
    }

    /// Provider configuration.
    #[must_use]
    pub const fn config(&self) -> &OidcConfig {
        &self.config
    }

    /// Authorize URL requesting a code for `openid` plus `scopes`.
    ///
    /// Scopes keep their order; duplicates and an explicit `openid` are
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidUrl`] if the query cannot be encoded.
    pub fn build_authorize_url<S: AsRef<str>>(&self, scopes: &[S], state: &str) -> Result<String> {
        let mut requested: Vec<&str> = vec!["openid"];
        for scope in scopes {
            let scope = scope.as_ref().trim();
            if !scope.is_empty() && !requested.contains(&scope) {
                requested.push(scope);
            }
        }
        let scope = requested.join(" ");

        let params = [
            ("response_type", "code"),
            ("client_id", self.config.client_id.as_str()),
            ("scope", scope.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("state", state),
        ];
        let endpoint = self.config.authorization_endpoint();
        let query = serde_urlencoded::to_string(params).map_err(|e| AuthError::InvalidUrl {
            url: endpoint.clone(),
            reason: e.to_string(),
        })?;

        Ok(format!("{endpoint}?{query}"))
    }

    /// Remember the current page under a fresh state and navigate the whole
    /// page to the authorize URL.
    ///
    /// Any held code and any earlier redirect for the same deferred action
    /// are dropped first, so only the return of this redirect can resume it.
    ///
    /// Returns the state. After this call the page is unloading; callers
    /// should not start further work.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Storage`] if the pending entry cannot be written
    /// - [`AuthError::InvalidUrl`] if the URL cannot be built
    #[tracing::instrument(skip(self, scopes), fields(client_id = %self.config.client_id))]
    pub fn begin_redirect_flow<S: AsRef<str>>(
        &self,
        deferred_action: &str,
        scopes: &[S],
    ) -> Result<String> {
        let state = generate_state();
        let url = self.build_authorize_url(scopes, &state)?;

        let storage = self.ctx.local_storage();
        storage.remove_item(CODE_KEY);
        for (key, _) in self
            .pending_entries()
            .into_iter()
            .filter(|(_, entry)| entry.deferred_action == deferred_action)
        {
            tracing::debug!(%deferred_action, "superseding earlier redirect");
            storage.remove_item(&key);
        }

        let entry = PendingRedirect {
            redirect_url: self.ctx.location().href(),
            deferred_action: deferred_action.to_string(),
            created_at: self.clock.now_millis(),
        };
        write_json(storage, &state_key(&state), &entry)?;

        tracing::info!("redirecting to identity provider");
        self.ctx.location().assign(&url);
        Ok(state)
    }

    /// Complete a redirect flow on the page the provider returned to.
    ///
    /// Consumes the pending entry matching `state`, holds `code` for its
    /// deferred action (see [`consume_code`](Self::consume_code)) and
    /// navigates back to the
    /// original page with `a=<deferred action>` appended.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingParameter`] if `code` or `state` is absent
    /// - [`AuthError::UnknownState`] if no entry matches
    /// - [`AuthError::StateExpired`] if the entry outlived its time-to-live
    /// - [`AuthError::Storage`] if storage fails
    #[tracing::instrument(skip(self), fields(client_id = %self.config.client_id))]
    pub fn handle_redirect_return(&self) -> Result<RedirectReturn> {
        let current = parse_url(&self.ctx.location().href())?;
        let code = query_param(&current, "code").ok_or(AuthError::MissingParameter("code"))?;
        let state = query_param(&current, "state").ok_or(AuthError::MissingParameter("state"))?;

        let key = state_key(&state);
        let entry: Option<PendingRedirect> = read_json(self.ctx.local_storage(), &key)?;
        self.ctx.local_storage().remove_item(&key);

        let Some(entry) = entry else {
            tracing::warn!("redirect returned with unknown state");
            return Err(AuthError::UnknownState { state });
        };
        if self.is_expired(&entry) {
            tracing::warn!(deferred_action = %entry.deferred_action, "redirect returned after state expired");
            return Err(AuthError::StateExpired { state });
        }

        let held = HeldCode {
            code,
            deferred_action: entry.deferred_action.clone(),
            created_at: self.clock.now_millis(),
        };
        write_json(self.ctx.local_storage(), CODE_KEY, &held)?;

        let mut resume = parse_url(&entry.redirect_url)?;
        let kept: Vec<(String, String)> = resume
            .query_pairs()
            .filter(|(key, _)| key != DEFERRED_ACTION_PARAM)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        resume
            .query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(DEFERRED_ACTION_PARAM, &entry.deferred_action);

        let resume_url = resume.to_string();
        tracing::info!(deferred_action = %entry.deferred_action, "returning to deferred action");
        self.ctx.location().assign(&resume_url);

        Ok(RedirectReturn {
            deferred_action: entry.deferred_action,
            resume_url,
        })
    }

    /// Take the code returned for `deferred_action`. A code can be consumed
    /// only once.
    ///
    /// A code held for another deferred action is left in place; an expired
    /// or unreadable one is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NoPendingCode`] if no unexpired code is held for
    /// `deferred_action`.
    pub fn consume_code(&self, deferred_action: &str) -> Result<String> {
        let held = self.held_code().ok_or(AuthError::NoPendingCode)?;
        if held.deferred_action != deferred_action {
            tracing::debug!(
                %deferred_action,
                held_for = %held.deferred_action,
                "held code belongs to another action"
            );
            return Err(AuthError::NoPendingCode);
        }
        take_item(self.ctx.local_storage(), CODE_KEY);
        Ok(held.code)
    }

    /// Whether an unexpired code is waiting for `deferred_action`.
    #[must_use]
    pub fn has_pending_code(&self, deferred_action: &str) -> bool {
        self.held_code()
            .is_some_and(|held| held.deferred_action == deferred_action)
    }

    fn held_code(&self) -> Option<HeldCode> {
        let storage = self.ctx.local_storage();
        match read_json::<HeldCode>(storage, CODE_KEY) {
            Ok(Some(held)) if self.is_stale(held.created_at) => {
                tracing::debug!(deferred_action = %held.deferred_action, "dropping expired code");
                storage.remove_item(CODE_KEY);
                None
            }
            Ok(held) => held,
            Err(_) => {
                tracing::warn!("dropping unreadable held code");
                storage.remove_item(CODE_KEY);
                None
            }
        }
    }

    /// Whether an unexpired redirect for `deferred_action` has begun and not
    /// yet returned.
    #[must_use]
    pub fn has_pending_redirect(&self, deferred_action: &str) -> bool {
        self.pending_entries()
            .into_iter()
            .any(|(_, entry)| entry.deferred_action == deferred_action && !self.is_expired(&entry))
    }

    /// Delete expired and unreadable redirect entries and held code. Returns
    /// how many were removed.
    pub fn purge_expired(&self) -> usize {
        let storage = self.ctx.local_storage();
        let mut purged = 0;
        if storage.get_item(CODE_KEY).is_some() && self.held_code().is_none() {
            purged += 1;
        }
        for key in storage.keys() {
            if !key.starts_with(STATE_KEY_PREFIX) {
                continue;
            }
            let stale = match read_json::<PendingRedirect>(storage, &key) {
                Ok(Some(entry)) => self.is_expired(&entry),
                Ok(None) => false,
                Err(_) => true,
            };
            if stale {
                storage.remove_item(&key);
                purged += 1;
            }
        }
        if purged > 0 {
            tracing::debug!(purged, "purged stale redirect entries");
        }
        purged
    }

    fn pending_entries(&self) -> Vec<(String, PendingRedirect)> {
        let storage = self.ctx.local_storage();
        storage
            .keys()
            .into_iter()
            .filter(|key| key.starts_with(STATE_KEY_PREFIX))
            .filter_map(|key| {
                let entry = read_json::<PendingRedirect>(storage, &key).ok().flatten()?;
                Some((key, entry))
            })
            .collect()
    }

    fn is_expired(&self, entry: &PendingRedirect) -> bool {
        self.is_stale(entry.created_at)
    }

    fn is_stale(&self, created_at: i64) -> bool {
        self.clock.now_millis() - created_at > self.config.pending_state_ttl.num_milliseconds()
    }
}

fn state_key(state: &str) -> String {
    format!("{STATE_KEY_PREFIX}{state}")
}

impl std::fmt::Debug for AuthorizationCodeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCodeManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
