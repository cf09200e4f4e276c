//! Contract for the OS-level tunnel configuration.
//!
//! The operating system owns the actual tunnel provider configuration; keel
//! only needs to enumerate the installed configurations at startup and
//! remove them when the account is cleared.

use thiserror::Error;

/// Lifecycle status of the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum TunnelStatus {
    /// No tunnel is running.
    Disconnected,
    /// A tunnel is being established.
    Connecting,
    /// The tunnel is up.
    Connected,
    /// The tunnel is being torn down.
    Disconnecting,
}

/// Errors reported by the OS tunnel configuration store.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Error, uniffi::Error)]
pub enum TunnelStoreError {
    /// The OS rejected the operation.
    #[error("tunnel configuration operation failed: {reason}")]
    OperationFailed {
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

impl From<uniffi::UnexpectedUniFFICallbackError> for TunnelStoreError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::UnexpectedUniFFICallbackError { reason: e.reason }
    }
}

/// Access to the OS-managed tunnel provider configurations, implemented by
/// the native app.
#[uniffi::export(with_foreign)]
pub trait TunnelConfigurationStore: Send + Sync {
    /// Lists the identifiers of all installed tunnel configurations.
    ///
    /// # Errors
    /// - `TunnelStoreError::OperationFailed` if the OS cannot enumerate them
    fn load_all_from_preferences(&self) -> Result<Vec<String>, TunnelStoreError>;

    /// Removes the tunnel configuration with the given identifier.
    ///
    /// # Errors
    /// - `TunnelStoreError::OperationFailed` if the OS rejects the removal
    fn remove_from_preferences(&self, identifier: String) -> Result<(), TunnelStoreError>;
}
