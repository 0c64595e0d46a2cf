//! In-memory doubles for the profile backend and file saving.

use crate::backend::{
    AuthorizationCodes, BackendFuture, DeleteOutcome, IdentityBroker, ProfileBackend,
    ServiceConnection,
};
use crate::error::{GdprError, Result};
use crate::file_saver::FileSaver;
use serde_json::{Value, json};
use std::sync::{Mutex, PoisonError};

/// A call received by [`MockProfileBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    /// `service_connections`
    ServiceConnections,
    /// `download_profile` with the codes it received
    Download(AuthorizationCodes),
    /// `delete_profile` with the codes it received
    Delete(AuthorizationCodes),
}

/// Mock profile backend.
///
/// Returns predefined data and records every call.
#[derive(Debug)]
pub struct MockProfileBackend {
    /// Whether to simulate success or failure.
    pub should_succeed: bool,
    connections: Vec<ServiceConnection>,
    profile: Value,
    failed_services: Vec<String>,
    calls: Mutex<Vec<BackendCall>>,
}

impl MockProfileBackend {
    /// Create a mock that succeeds and has no service connections.
    #[must_use]
    pub fn new() -> Self {
        Self {
            should_succeed: true,
            connections: Vec::new(),
            profile: json!({"key": "DATA", "children": []}),
            failed_services: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that fails every request.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            should_succeed: false,
            ..Self::new()
        }
    }

    /// Add a connected service.
    #[must_use]
    pub fn with_service(mut self, name: &str, broker: IdentityBroker) -> Self {
        self.connections.push(ServiceConnection {
            name: name.to_string(),
            title: name.to_string(),
            gdpr_query_scope: format!("{name}.gdprquery"),
            gdpr_delete_scope: format!("{name}.gdprdelete"),
            broker,
        });
        self
    }

    /// Profile returned by downloads.
    #[must_use]
    pub fn with_profile(mut self, profile: Value) -> Self {
        self.profile = profile;
        self
    }

    /// Make deletion fail for the named service.
    #[must_use]
    pub fn with_failed_deletion(mut self, service: &str) -> Self {
        self.failed_services.push(service.to_string());
        self
    }

    /// Calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: BackendCall) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        if self.should_succeed {
            Ok(())
        } else {
            Err(GdprError::Http {
                status: 500,
                message: "mock backend failure".to_string(),
            })
        }
    }
}

impl Default for MockProfileBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileBackend for MockProfileBackend {
    fn service_connections(&self) -> BackendFuture<'_, Vec<ServiceConnection>> {
        Box::pin(async move {
            self.record(BackendCall::ServiceConnections)?;
            Ok(self.connections.clone())
        })
    }

    fn download_profile(&self, codes: AuthorizationCodes) -> BackendFuture<'_, Value> {
        Box::pin(async move {
            self.record(BackendCall::Download(codes))?;
            Ok(self.profile.clone())
        })
    }

    fn delete_profile(&self, codes: AuthorizationCodes) -> BackendFuture<'_, DeleteOutcome> {
        Box::pin(async move {
            self.record(BackendCall::Delete(codes))?;
            Ok(DeleteOutcome {
                deleted: self.failed_services.is_empty(),
                failed_services: self.failed_services.clone(),
            })
        })
    }
}

/// File saver that keeps saved files in memory.
#[derive(Debug, Default)]
pub struct MemoryFileSaver {
    files: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryFileSaver {
    /// Create an empty saver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Saved files in save order.
    #[must_use]
    pub fn files(&self) -> Vec<(String, Vec<u8>)> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl FileSaver for MemoryFileSaver {
    fn save(&self, file_name: &str, contents: &[u8]) -> Result<()> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((file_name.to_string(), contents.to_vec()));
        Ok(())
    }
}
