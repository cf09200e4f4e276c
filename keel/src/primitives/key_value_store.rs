use thiserror::Error;

/// Errors that can occur when interacting with the device key-value store.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Error, uniffi::Error)]
pub enum KeyValueStoreError {
    /// The requested key was not found in the store.
    #[error("key not found")]
    KeyNotFound,
    /// Failed to parse the value retrieved from the store.
    #[error("failed to parse value")]
    ParsingFailure,
    /// Failed to update the value in the store.
    #[error("failed to update value")]
    UpdateFailure,
    /// An unexpected error occurred in the foreign callback.
    #[error("unexpected error in foreign callback: {0}")]
    UnexpectedUniFFICallbackError(String),
}

impl From<uniffi::UnexpectedUniFFICallbackError> for KeyValueStoreError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::UnexpectedUniFFICallbackError(e.reason)
    }
}

/// Plain key-value storage persisted on the device, implemented by the native
/// app (`SharedPreferences` on Android, `UserDefaults` on iOS).
///
/// This is explicitly **not a secure store** and keel treats it as low-trust:
/// values may be tampered with, corrupted or removed at any time. The only
/// consumer inside keel is the settings migrator, which reads the legacy
/// account-number pointer that predates the secure settings record.
///
/// Only string values are supported; structured data is serialized as JSON.
#[uniffi::export(with_foreign)]
pub trait DeviceKeyValueStore: Send + Sync {
    /// Get a value from the key-value store.
    ///
    /// # Errors
    /// - `KeyValueStoreError::KeyNotFound` if the key is not found
    /// - `KeyValueStoreError::ParsingFailure` if the stored value cannot be read back
    fn get(&self, key: String) -> Result<String, KeyValueStoreError>;

    /// Set a value in the key-value store.
    ///
    /// # Errors
    /// - `KeyValueStoreError::UpdateFailure` if the value cannot be written
    fn set(&self, key: String, value: String) -> Result<(), KeyValueStoreError>;

    /// Delete a value from the key-value store.
    ///
    /// # Errors
    /// - `KeyValueStoreError::KeyNotFound` if the key is not found
    /// - `KeyValueStoreError::UpdateFailure` if the value cannot be removed
    fn delete(&self, key: String) -> Result<(), KeyValueStoreError>;
}

/// In-memory implementation of `DeviceKeyValueStore` for testing purposes.
#[cfg(test)]
pub struct InMemoryDeviceKeyValueStore {
    store: std::sync::Mutex<std::collections::HashMap<String, String>>,
}

#[cfg(test)]
impl InMemoryDeviceKeyValueStore {
    /// Creates a new empty in-memory key-value store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[cfg(test)]
impl DeviceKeyValueStore for InMemoryDeviceKeyValueStore {
    fn get(&self, key: String) -> Result<String, KeyValueStoreError> {
        let value = self.store.lock().unwrap().get(&key).cloned();
        value.ok_or(KeyValueStoreError::KeyNotFound)
    }

    fn set(&self, key: String, value: String) -> Result<(), KeyValueStoreError> {
        self.store.lock().unwrap().insert(key, value);
        Ok(())
    }

    fn delete(&self, key: String) -> Result<(), KeyValueStoreError> {
        match self.store.lock().unwrap().remove(&key) {
            Some(_) => Ok(()),
            None => Err(KeyValueStoreError::KeyNotFound),
        }
    }
}
