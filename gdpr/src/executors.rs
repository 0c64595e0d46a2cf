//! Steps of the GDPR download and delete flows.
//!
//! ```text
//! getServiceConnections ─► getScopes ─► legacyBrokerRedirect ─► legacyBrokerCode
//!                                        (full-page redirect)     (resumed on return)
//!                                                                        │
//!              deleteProfile ◄─┬─ modernProviderCode ◄───────────────────┘
//!   downloadProfile ─► saveFile ◄┘   (hidden frame)
//! ```
//!
//! Steps that need no code for the user's services resolve with an empty
//! result, so both flows always run the same sequence.

use crate::backend::{AuthorizationCodes, IdentityBroker, ProfileBackend, ServiceConnection};
use crate::error::GdprError;
use crate::file_saver::{DOWNLOAD_FILE_NAME, FileSaver};
use crate::flow::GdprFlowKind;
use helsinki_profile_auth::{AuthorizationCodeManager, FrameLoaderConfig, fetch_authorization_code};
use helsinki_profile_core::BrowserContext;
use helsinki_profile_runtime::{ActionError, ActionOptions, ActionProps, QueueReader};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

/// Fetches the user's service connections.
pub const GET_SERVICE_CONNECTIONS: &str = "getServiceConnections";
/// Splits the needed scopes by broker.
pub const GET_SCOPES: &str = "getScopes";
/// Redirects to the legacy broker when its scopes are needed.
pub const LEGACY_BROKER_REDIRECT: &str = "legacyBrokerRedirect";
/// Picks up the code the legacy broker returned.
pub const LEGACY_BROKER_CODE: &str = "legacyBrokerCode";
/// Fetches a code from the modern provider in a hidden frame.
pub const MODERN_PROVIDER_CODE: &str = "modernProviderCode";
/// Downloads the profile.
pub const DOWNLOAD_PROFILE: &str = "downloadProfile";
/// Saves the downloaded profile.
pub const SAVE_FILE: &str = "saveFile";
/// Deletes the profile.
pub const DELETE_PROFILE: &str = "deleteProfile";

/// Scopes the flow must be authorized for, by broker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredScopes {
    /// Scopes granted by the legacy broker
    pub legacy: Vec<String>,
    /// Scopes granted by the modern provider
    pub modern: Vec<String>,
}

impl RequiredScopes {
    /// Collect the query or delete scope of every service, without
    /// duplicates and skipping services that declare none.
    #[must_use]
    pub fn for_flow(kind: GdprFlowKind, connections: &[ServiceConnection]) -> Self {
        let mut scopes = Self::default();
        for service in connections {
            let scope = kind.scope_of(service);
            if scope.is_empty() {
                continue;
            }
            let target = match service.broker {
                IdentityBroker::Legacy => &mut scopes.legacy,
                IdentityBroker::Modern => &mut scopes.modern,
            };
            if !target.iter().any(|s| s == scope) {
                target.push(scope.to_string());
            }
        }
        scopes
    }
}

/// Result of the two code steps. Kept as an object so an absent code
/// survives the round trip through session storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ObtainedCode {
    code: Option<String>,
}

/// Collaborators shared by the GDPR executors.
#[derive(Clone)]
pub struct GdprServices {
    /// The page the flow runs in
    pub ctx: BrowserContext,
    /// Profile backend
    pub backend: Arc<dyn ProfileBackend>,
    /// Code manager of the redirect-only broker
    pub legacy_broker: Arc<AuthorizationCodeManager>,
    /// Code manager of the hidden-frame provider
    pub modern_provider: Arc<AuthorizationCodeManager>,
    /// Where downloads go
    pub file_saver: Arc<dyn FileSaver>,
    /// Hidden-frame settings for the modern provider
    pub loader_config: FrameLoaderConfig,
}

impl std::fmt::Debug for GdprServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GdprServices")
            .field("origin", &self.ctx.origin())
            .field("loader_config", &self.loader_config)
            .finish_non_exhaustive()
    }
}

/// Action templates of a flow, in execution order.
#[must_use]
pub fn templates(kind: GdprFlowKind, services: &GdprServices) -> Vec<ActionProps> {
    let mut actions = vec![
        get_service_connections(services),
        get_scopes(kind),
        legacy_broker_redirect(kind, services),
        legacy_broker_code(kind, services),
        modern_provider_code(services),
    ];
    match kind {
        GdprFlowKind::Download => {
            actions.push(download_profile(services));
            actions.push(save_file(services));
        }
        GdprFlowKind::Delete => actions.push(delete_profile(services)),
    }
    actions
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ActionError> {
    serde_json::to_value(value).map_err(ActionError::failed)
}

/// Codes collected by the earlier steps, checked against the scopes that
/// needed them.
fn collected_codes(queue: &QueueReader) -> Result<AuthorizationCodes, ActionError> {
    let scopes: RequiredScopes = queue.result_as(GET_SCOPES)?;
    let legacy = queue.result_as::<ObtainedCode>(LEGACY_BROKER_CODE)?.code;
    let modern = queue.result_as::<ObtainedCode>(MODERN_PROVIDER_CODE)?.code;

    if !scopes.legacy.is_empty() && legacy.is_none() {
        return Err(GdprError::MissingAuthorizationCode("legacy").into());
    }
    if !scopes.modern.is_empty() && modern.is_none() {
        return Err(GdprError::MissingAuthorizationCode("modern").into());
    }
    Ok(AuthorizationCodes { legacy, modern })
}

fn get_service_connections(services: &GdprServices) -> ActionProps {
    let backend = Arc::clone(&services.backend);
    ActionProps::new(GET_SERVICE_CONNECTIONS, move |_, _| {
        let backend = Arc::clone(&backend);
        async move {
            let connections = backend.service_connections().await?;
            tracing::debug!(count = connections.len(), "fetched service connections");
            to_value(&connections)
        }
    })
}

fn get_scopes(kind: GdprFlowKind) -> ActionProps {
    ActionProps::new(GET_SCOPES, move |_, queue| async move {
        let connections: Vec<ServiceConnection> = queue.result_as(GET_SERVICE_CONNECTIONS)?;
        to_value(&RequiredScopes::for_flow(kind, &connections))
    })
}

fn legacy_broker_redirect(kind: GdprFlowKind, services: &GdprServices) -> ActionProps {
    let manager = Arc::clone(&services.legacy_broker);
    ActionProps::new(LEGACY_BROKER_REDIRECT, move |_, queue| {
        let manager = Arc::clone(&manager);
        async move {
            let scopes: RequiredScopes = queue.result_as(GET_SCOPES)?;
            if scopes.legacy.is_empty() {
                return Ok(json!({ "redirected": false }));
            }
            manager
                .begin_redirect_flow(kind.deferred_action(), &scopes.legacy)
                .map_err(GdprError::from)?;
            Ok(json!({ "redirected": true }))
        }
    })
    .with_options(ActionOptions::default().synchronous_completion())
}

fn legacy_broker_code(kind: GdprFlowKind, services: &GdprServices) -> ActionProps {
    let manager = Arc::clone(&services.legacy_broker);
    ActionProps::new(LEGACY_BROKER_CODE, move |_, queue| {
        let manager = Arc::clone(&manager);
        async move {
            let scopes: RequiredScopes = queue.result_as(GET_SCOPES)?;
            if scopes.legacy.is_empty() {
                return to_value(&ObtainedCode::default());
            }
            // The redirect entry is removed only when the broker returns, so
            // while it exists this is the page that began the redirect.
            if manager.has_pending_redirect(kind.deferred_action()) {
                tracing::debug!(flow = kind.as_str(), "waiting for legacy broker to return");
                return Err(ActionError::Suspended);
            }
            let code = manager
                .consume_code(kind.deferred_action())
                .map_err(GdprError::from)?;
            to_value(&ObtainedCode { code: Some(code) })
        }
    })
    .with_options(ActionOptions::default().idle_when_active())
}

fn modern_provider_code(services: &GdprServices) -> ActionProps {
    let ctx = services.ctx.clone();
    let manager = Arc::clone(&services.modern_provider);
    let config = services.loader_config;
    ActionProps::new(MODERN_PROVIDER_CODE, move |_, queue| {
        let ctx = ctx.clone();
        let manager = Arc::clone(&manager);
        async move {
            let scopes: RequiredScopes = queue.result_as(GET_SCOPES)?;
            if scopes.modern.is_empty() {
                return to_value(&ObtainedCode::default());
            }
            let code = fetch_authorization_code(&ctx, &manager, &scopes.modern, config)
                .await
                .map_err(GdprError::from)?;
            to_value(&ObtainedCode { code: Some(code) })
        }
    })
}

fn download_profile(services: &GdprServices) -> ActionProps {
    let backend = Arc::clone(&services.backend);
    ActionProps::new(DOWNLOAD_PROFILE, move |_, queue| {
        let backend = Arc::clone(&backend);
        async move {
            let codes = collected_codes(&queue)?;
            Ok(backend.download_profile(codes).await?)
        }
    })
    .with_options(ActionOptions::default().no_storage())
}

fn save_file(services: &GdprServices) -> ActionProps {
    let saver = Arc::clone(&services.file_saver);
    ActionProps::new(SAVE_FILE, move |_, queue| {
        let saver = Arc::clone(&saver);
        async move {
            let profile = queue
                .get_result(DOWNLOAD_PROFILE)
                .ok_or_else(|| ActionError::MissingResult(DOWNLOAD_PROFILE.to_string()))?;
            let contents = serde_json::to_vec_pretty(&profile).map_err(ActionError::failed)?;
            saver.save(DOWNLOAD_FILE_NAME, &contents)?;
            Ok(json!({ "fileName": DOWNLOAD_FILE_NAME, "bytes": contents.len() }))
        }
    })
    .with_options(ActionOptions::default().no_storage())
}

fn delete_profile(services: &GdprServices) -> ActionProps {
    let backend = Arc::clone(&services.backend);
    ActionProps::new(DELETE_PROFILE, move |_, queue| {
        let backend = Arc::clone(&backend);
        async move {
            let codes = collected_codes(&queue)?;
            let outcome = backend.delete_profile(codes).await?;
            if !outcome.failed_services.is_empty() {
                tracing::warn!(failed = ?outcome.failed_services, "some services kept their data");
            }
            to_value(&outcome)
        }
    })
}
