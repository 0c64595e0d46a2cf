//! Origin-scoped key/value storage.
//!
//! A [`BrowserContext`](crate::BrowserContext) carries two stores: the
//! session-scoped one (per tab, survives reloads) and the persistent local one
//! (per origin, survives tab closure). Both share this trait.

use crate::error::{CoreError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// String key/value store with the semantics of the Web Storage API.
pub trait Storage: Send + Sync {
    /// Read a value.
    fn get_item(&self, key: &str) -> Option<String>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StorageWrite`] if the backend refuses the write.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value. Deleting a missing key is a no-op.
    fn remove_item(&self, key: &str);

    /// All keys currently present, in unspecified order.
    fn keys(&self) -> Vec<String>;
}

/// Read and decode a JSON value.
///
/// Returns `Ok(None)` when the key is absent.
///
/// # Errors
///
/// Returns [`CoreError::Serialization`] if the stored text is not valid JSON
/// for `T`.
pub fn read_json<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> Result<Option<T>> {
    storage
        .get_item(key)
        .map(|raw| {
            serde_json::from_str(&raw).map_err(|e| CoreError::Serialization {
                key: key.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

/// Encode a value as JSON and write it.
///
/// # Errors
///
/// Returns [`CoreError::Serialization`] if encoding fails, or the backend's
/// [`CoreError::StorageWrite`].
pub fn write_json<T: Serialize + ?Sized>(storage: &dyn Storage, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value).map_err(|e| CoreError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    storage.set_item(key, &raw)
}

/// Read a value and delete it in one step.
pub fn take_item(storage: &dyn Storage, key: &str) -> Option<String> {
    let value = storage.get_item(key)?;
    storage.remove_item(key);
    Some(value)
}
