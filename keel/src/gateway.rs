//! Contract for the remote account and device API.
//!
//! The native app owns the HTTP client, the endpoint set and the retry
//! machinery; keel only consumes the result contract and passes a
//! [`RetryStrategy`] describing how persistent each call should be.

use std::time::SystemTime;
use thiserror::Error;

/// How persistently a gateway call retries before giving up.
///
/// Retrying is the gateway implementation's job; keel only picks the
/// strategy per call site.
#[derive(Debug, Clone, uniffi::Record)]
pub struct RetryStrategy {
    /// Bound on the total number of attempts.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Ceiling for the backoff delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl RetryStrategy {
    /// Strategy for the one-shot startup migration gate. More attempts and
    /// shorter backoff than user-facing calls, but still bounded so startup
    /// cannot hang indefinitely.
    #[must_use]
    pub const fn aggressive() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 500,
            max_delay_ms: 5_000,
        }
    }

    /// Strategy for user-triggered and background calls.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2_000,
            max_delay_ms: 30_000,
        }
    }
}

/// Authoritative account data as reported by the remote service.
#[derive(Debug, Clone, uniffi::Record)]
pub struct AccountData {
    /// Server-side account identifier.
    pub id: String,
    /// When the account's paid time runs out.
    pub expiry: SystemTime,
}

/// A device registered with the remote service.
#[derive(Debug, Clone, uniffi::Record)]
pub struct DeviceRecord {
    /// Server-assigned device identifier.
    pub id: String,
    /// Server-assigned device name.
    pub name: String,
    /// When the device was registered.
    pub created: SystemTime,
    /// IPv4 tunnel address assigned to the device.
    pub ipv4_address: String,
    /// IPv6 tunnel address assigned to the device.
    pub ipv6_address: String,
}

/// Tunnel addresses assigned for a newly rotated key.
#[derive(Debug, Clone, uniffi::Record)]
pub struct AssignedAddresses {
    /// The IPv4 tunnel address.
    pub ipv4: String,
    /// The IPv6 tunnel address.
    pub ipv6: String,
}

/// Errors reported by the remote gateway.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Error, uniffi::Error)]
pub enum GatewayError {
    /// The account number is not known to the remote service.
    #[error("invalid account")]
    InvalidAccount,
    /// The device is not (or no longer) registered.
    #[error("device not found")]
    DeviceNotFound,
    /// Every attempt permitted by the retry strategy failed.
    #[error("request failed after all attempts: {reason}")]
    RequestFailed {
        /// Description of the final failure.
        reason: String,
    },
    /// The call was cancelled before it completed.
    #[error("request was cancelled")]
    Cancelled,
    /// An unexpected error occurred in the foreign callback.
    #[error("unexpected error in foreign callback: {reason}")]
    UnexpectedUniFFICallbackError {
        /// Description of the callback failure.
        reason: String,
    },
}

impl From<uniffi::UnexpectedUniFFICallbackError> for GatewayError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::UnexpectedUniFFICallbackError { reason: e.reason }
    }
}

/// Remote account and device operations, implemented by the native app.
///
/// Implementations must be safe to drop mid-call: keel drops the returned
/// future when an operation is cancelled, and the implementation is expected
/// to abort the underlying request.
#[uniffi::export(with_foreign)]
#[async_trait::async_trait]
pub trait AccountsGateway: Send + Sync {
    /// Fetches authoritative account data for the given account number.
    ///
    /// # Errors
    /// - `GatewayError::InvalidAccount` if the account does not exist
    /// - `GatewayError::RequestFailed` if all attempts fail
    async fn get_account_data(
        &self,
        account_number: String,
        retry_strategy: RetryStrategy,
    ) -> Result<AccountData, GatewayError>;

    /// Registers a new device for the account with the given public key.
    ///
    /// # Errors
    /// - `GatewayError::InvalidAccount` if the account does not exist
    /// - `GatewayError::RequestFailed` if all attempts fail
    async fn create_device(
        &self,
        account_number: String,
        public_key: String,
        retry_strategy: RetryStrategy,
    ) -> Result<DeviceRecord, GatewayError>;

    /// Replaces the device's key and returns the addresses assigned for the
    /// new key.
    ///
    /// # Errors
    /// - `GatewayError::DeviceNotFound` if the device is no longer registered
    /// - `GatewayError::RequestFailed` if all attempts fail
    async fn rotate_device_key(
        &self,
        account_number: String,
        device_id: String,
        public_key: String,
        retry_strategy: RetryStrategy,
    ) -> Result<AssignedAddresses, GatewayError>;

    /// Unregisters the device. Returns `true` when the device was already
    /// gone, which callers treat the same as a successful deletion.
    ///
    /// # Errors
    /// - `GatewayError::RequestFailed` if all attempts fail
    async fn delete_device(
        &self,
        account_number: String,
        device_id: String,
        retry_strategy: RetryStrategy,
    ) -> Result<bool, GatewayError>;
}
