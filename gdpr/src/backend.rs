//! The profile backend as seen by the GDPR flows.
//!
//! The backend is an opaque service: the flows only need the user's service
//! connections (to learn which scopes to request) and the two GDPR
//! operations, each authorized with the codes collected earlier in the queue.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

/// Which identity broker issues the authorization code for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentityBroker {
    /// Broker that only supports a full-page redirect.
    Legacy,
    /// Provider that answers silently inside a hidden frame.
    Modern,
}

/// A third-party service holding data about the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConnection {
    /// Machine name
    pub name: String,
    /// Display title
    pub title: String,
    /// Scope needed to read the service's GDPR data
    #[serde(default)]
    pub gdpr_query_scope: String,
    /// Scope needed to delete the service's GDPR data
    #[serde(default)]
    pub gdpr_delete_scope: String,
    /// Broker issuing codes for the scopes above
    pub broker: IdentityBroker,
}

/// Authorization codes handed to a GDPR operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationCodes {
    /// Code from the legacy broker, if any service needed it
    pub legacy: Option<String>,
    /// Code from the modern provider, if any service needed it
    pub modern: Option<String>,
}

/// Result of a delete request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    /// Whether the profile was deleted
    pub deleted: bool,
    /// Services that refused or failed to delete their data
    #[serde(default)]
    pub failed_services: Vec<String>,
}

impl DeleteOutcome {
    /// Every service deleted its data.
    #[must_use]
    pub const fn success() -> Self {
        Self {
            deleted: true,
            failed_services: Vec::new(),
        }
    }
}

/// Boxed future returned by [`ProfileBackend`] methods.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Profile backend used by the GDPR executors.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so executors can hold the backend as
/// `Arc<dyn ProfileBackend>` and swap implementations at runtime.
pub trait ProfileBackend: Send + Sync {
    /// Service connections of the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns transport, HTTP or GraphQL errors from the backend.
    fn service_connections(&self) -> BackendFuture<'_, Vec<ServiceConnection>>;

    /// Download everything stored about the user.
    ///
    /// # Errors
    ///
    /// Returns transport, HTTP or GraphQL errors from the backend.
    fn download_profile(&self, codes: AuthorizationCodes) -> BackendFuture<'_, Value>;

    /// Delete the user's profile and connected service data.
    ///
    /// # Errors
    ///
    /// Returns transport, HTTP or GraphQL errors from the backend. Services
    /// refusing deletion are reported in [`DeleteOutcome`], not as errors.
    fn delete_profile(&self, codes: AuthorizationCodes) -> BackendFuture<'_, DeleteOutcome>;
}
