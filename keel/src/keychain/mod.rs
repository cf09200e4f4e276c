//! Access to the platform secure store (Keychain on iOS, Keystore-backed
//! storage on Android) where tunnel settings are persisted.
//!
//! The native app implements the low-level [`SecureStore`] trait; keel layers
//! the typed [`store::SettingsStore`] on top of it.

use thiserror::Error;

pub mod store;

pub use store::{LegacyReadResult, SettingsError, SettingsStore};

/// A raw entry stored in the platform secure store.
///
/// Entries are addressed by a `(service, attribute)` pair. The payload is an
/// opaque byte blob; keel stores JSON-encoded settings records in it.
#[derive(Debug, Clone, uniffi::Record)]
pub struct SecureStoreEntry {
    /// The attribute (account identifier) the entry is stored under.
    pub attribute: String,
    /// The opaque payload bytes.
    pub payload: Vec<u8>,
}

/// Errors surfaced by the platform secure store.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Error, uniffi::Error)]
pub enum SecureStoreError {
    /// No entry exists for the given service and attribute.
    #[error("no entry for the given service and attribute")]
    NotFound,
    /// The entry could not be written.
    #[error("the entry could not be written: {reason}")]
    WriteFailed {
        /// Platform-specific description of the failure.
        reason: String,
    },
    /// An unexpected error occurred in the foreign callback.
    #[error("unexpected error in foreign callback: {reason}")]
    UnexpectedUniFFICallbackError {
        /// Description of the callback failure.
        reason: String,
    },
}

impl From<uniffi::UnexpectedUniFFICallbackError> for SecureStoreError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::UnexpectedUniFFICallbackError { reason: e.reason }
    }
}

/// Platform secure storage keyed by a `(service, attribute)` pair.
///
/// Implementations must be atomic per call: a failed `update` or `insert`
/// leaves the previous entry intact.
#[uniffi::export(with_foreign)]
pub trait SecureStore: Send + Sync {
    /// Read the payload stored under `(service, attribute)`.
    ///
    /// # Errors
    /// - `SecureStoreError::NotFound` if no such entry exists
    fn get(&self, service: String, attribute: String) -> Result<Vec<u8>, SecureStoreError>;

    /// Overwrite the payload of an existing entry.
    ///
    /// # Errors
    /// - `SecureStoreError::NotFound` if no such entry exists
    /// - `SecureStoreError::WriteFailed` if the platform rejects the write
    fn update(
        &self,
        service: String,
        attribute: String,
        payload: Vec<u8>,
    ) -> Result<(), SecureStoreError>;

    /// Create a new entry. Fails if an entry already exists.
    ///
    /// # Errors
    /// - `SecureStoreError::WriteFailed` if the entry exists or the platform
    ///   rejects the write
    fn insert(
        &self,
        service: String,
        attribute: String,
        payload: Vec<u8>,
    ) -> Result<(), SecureStoreError>;

    /// Delete the entry stored under `(service, attribute)`.
    ///
    /// # Errors
    /// - `SecureStoreError::NotFound` if no such entry exists
    fn delete(&self, service: String, attribute: String) -> Result<(), SecureStoreError>;

    /// List all entries stored under `service`, payloads included.
    ///
    /// # Errors
    /// - `SecureStoreError::NotFound` if the service has no entries
    fn list(&self, service: String) -> Result<Vec<SecureStoreEntry>, SecureStoreError>;
}

/// In-memory implementation of `SecureStore` for testing purposes.
#[cfg(test)]
pub struct InMemorySecureStore {
    entries: std::sync::Mutex<std::collections::HashMap<(String, String), Vec<u8>>>,
}

#[cfg(test)]
impl InMemorySecureStore {
    /// Creates a new empty in-memory secure store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Returns the number of entries stored under `service`.
    pub fn entry_count(&self, service: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .keys()
            .filter(|(s, _)| s == service)
            .count()
    }
}

#[cfg(test)]
impl SecureStore for InMemorySecureStore {
    fn get(&self, service: String, attribute: String) -> Result<Vec<u8>, SecureStoreError> {
        self.entries
            .lock()
            .unwrap()
            .get(&(service, attribute))
            .cloned()
            .ok_or(SecureStoreError::NotFound)
    }

    fn update(
        &self,
        service: String,
        attribute: String,
        payload: Vec<u8>,
    ) -> Result<(), SecureStoreError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(&(service, attribute)) {
            Some(existing) => {
                *existing = payload;
                Ok(())
            }
            None => Err(SecureStoreError::NotFound),
        }
    }

    fn insert(
        &self,
        service: String,
        attribute: String,
        payload: Vec<u8>,
    ) -> Result<(), SecureStoreError> {
        let mut entries = self.entries.lock().unwrap();
        let key = (service, attribute);
        if entries.contains_key(&key) {
            return Err(SecureStoreError::WriteFailed {
                reason: "entry already exists".to_owned(),
            });
        }
        entries.insert(key, payload);
        Ok(())
    }

    fn delete(&self, service: String, attribute: String) -> Result<(), SecureStoreError> {
        match self.entries.lock().unwrap().remove(&(service, attribute)) {
            Some(_) => Ok(()),
            None => Err(SecureStoreError::NotFound),
        }
    }

    fn list(&self, service: String) -> Result<Vec<SecureStoreEntry>, SecureStoreError> {
        let entries = self.entries.lock().unwrap();
        let mut found: Vec<SecureStoreEntry> = entries
            .iter()
            .filter(|((s, _), _)| *s == service)
            .map(|((_, attribute), payload)| SecureStoreEntry {
                attribute: attribute.clone(),
                payload: payload.clone(),
            })
            .collect();
        if found.is_empty() {
            return Err(SecureStoreError::NotFound);
        }
        found.sort_by(|a, b| a.attribute.cmp(&b.attribute));
        Ok(found)
    }
}
