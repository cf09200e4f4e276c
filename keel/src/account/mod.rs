//! Account lifecycle operations and the session they mutate.
//!
//! All mutation of [`SessionState`] happens on the account manager's single
//! worker task (see [`manager`]), so the operations here take the session by
//! exclusive reference and never lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::gateway::{AccountsGateway, GatewayError, RetryStrategy};
use crate::keel_error;
use crate::keychain::{SettingsError, SettingsStore};
use crate::keygen::KeyGenerator;
use crate::settings::{InterfaceData, StoredAccountData, StoredDeviceData, TunnelSettings};
use crate::tunnel::{TunnelConfigurationStore, TunnelStatus};

pub mod cancel;
pub mod manager;

use cancel::CancelToken;

/// In-memory session record, owned exclusively by the manager's worker
/// task for the lifetime of the application run.
///
/// `settings` mirrors the current record in the secure store: every
/// successful store write updates it before the operation completes, and a
/// failed write leaves it untouched.
#[derive(Debug)]
pub struct SessionState {
    /// Cache of the current settings record, `None` when logged out.
    pub settings: Option<TunnelSettings>,
    /// Identifier of the installed OS tunnel configuration, if any.
    pub tunnel: Option<String>,
    /// Current tunnel lifecycle status.
    pub status: TunnelStatus,
}

impl SessionState {
    /// A fresh logged-out session.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            settings: None,
            tunnel: None,
            status: TunnelStatus::Disconnected,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors produced by account lifecycle operations.
#[keel_error]
pub enum AccountError {
    /// Tearing down the previous account's device failed.
    #[error("failed to delete the previous device: {0}")]
    DeleteDeviceFailed(GatewayError),
    /// Registering a device for the new account failed.
    #[error("failed to create a device: {0}")]
    CreateDeviceFailed(GatewayError),
    /// Fetching account data for the new account failed.
    #[error("failed to fetch account data: {0}")]
    FetchAccountFailed(GatewayError),
    /// The platform failed to generate a key pair.
    #[error("key generation failed: {reason}")]
    KeyGeneration {
        /// Platform-specific description of the failure.
        reason: String,
    },
    /// The settings store failed.
    #[error("settings store failure: {0}")]
    Store(#[from] SettingsError),
    /// The operation was cancelled.
    #[error("the operation was cancelled")]
    Cancelled,
    /// The operation was interrupted before reporting a result.
    #[error("the operation was interrupted before completion")]
    Interrupted,
}

/// Implements login, logout and session loading against the store and the
/// remote gateway.
pub struct AccountService {
    store: SettingsStore,
    gateway: Arc<dyn AccountsGateway>,
    key_generator: Arc<dyn KeyGenerator>,
    tunnel_store: Arc<dyn TunnelConfigurationStore>,
}

impl AccountService {
    /// Creates a service over the given collaborators.
    #[must_use]
    pub fn new(
        store: SettingsStore,
        gateway: Arc<dyn AccountsGateway>,
        key_generator: Arc<dyn KeyGenerator>,
        tunnel_store: Arc<dyn TunnelConfigurationStore>,
    ) -> Self {
        Self {
            store,
            gateway,
            key_generator,
            tunnel_store,
        }
    }

    /// Populates the session from the persisted current record, if any.
    ///
    /// A record that fails to decode is corrupt and is deleted rather than
    /// retried; the session then starts logged out. The installed OS tunnel
    /// configuration is looked up best effort.
    ///
    /// # Errors
    /// - `AccountError::Store` if the store itself fails
    pub fn load_session(&self, session: &mut SessionState) -> Result<(), AccountError> {
        match self.store.read_current() {
            Ok(settings) => session.settings = Some(settings),
            Err(SettingsError::NotFound) => session.settings = None,
            Err(SettingsError::DecodeFailure { reason }) => {
                crate::warn!("account.corrupt_record_deleted error=\"{reason}\"");
                if let Err(err) = self.store.delete_current() {
                    crate::warn!("account.corrupt_record_delete_failed error=\"{err}\"");
                }
                session.settings = None;
            }
            Err(err) => return Err(AccountError::Store(err)),
        }

        match self.tunnel_store.load_all_from_preferences() {
            Ok(identifiers) => session.tunnel = identifiers.into_iter().next(),
            Err(err) => {
                crate::warn!("account.tunnel_lookup_failed error=\"{err}\"");
            }
        }

        crate::info!(
            "account.session_loaded logged_in={} has_tunnel={}",
            session.settings.is_some(),
            session.tunnel.is_some()
        );
        Ok(())
    }

    /// Switches to `account_number`, or logs out when it is `None`.
    ///
    /// Any existing account is torn down first: its device is deleted on the
    /// gateway, the current record is removed and every installed OS tunnel
    /// configuration is cleaned up best effort. The session is reset to
    /// logged out and disconnected even when that cleanup fails. A new
    /// account then gets a fresh key pair, a registered device and a new
    /// current record with default relay and DNS settings.
    ///
    /// # Errors
    /// - `AccountError::DeleteDeviceFailed` if the old device cannot be removed
    /// - `AccountError::FetchAccountFailed` if the new account lookup fails
    /// - `AccountError::KeyGeneration` if no key pair can be generated
    /// - `AccountError::CreateDeviceFailed` if device registration fails
    /// - `AccountError::Store` if the new record cannot be persisted
    /// - `AccountError::Cancelled` if cancellation was requested
    pub async fn set_account(
        &self,
        session: &mut SessionState,
        account_number: Option<String>,
        cancel: &mut CancelToken,
    ) -> Result<(), AccountError> {
        if cancel.is_cancelled() {
            return Err(AccountError::Cancelled);
        }

        if session.settings.is_some() {
            self.tear_down(session, cancel).await?;
        }

        let Some(number) = account_number else {
            crate::info!("account.cleared");
            return Ok(());
        };

        if cancel.is_cancelled() {
            return Err(AccountError::Cancelled);
        }
        self.set_up(session, number, cancel).await
    }

    /// Removes the old device, record and installed OS tunnel configurations.
    async fn tear_down(
        &self,
        session: &mut SessionState,
        cancel: &mut CancelToken,
    ) -> Result<(), AccountError> {
        let registered = session.settings.as_ref().and_then(|settings| {
            settings
                .device
                .clone()
                .map(|device| (settings.account.number.clone(), device))
        });
        if let Some((number, device)) = registered {
            let delete =
                self.gateway
                    .delete_device(number, device.identifier, RetryStrategy::standard());
            let was_already_deleted = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(AccountError::Cancelled),
                result = delete => result.map_err(|err| match err {
                    GatewayError::Cancelled => AccountError::Cancelled,
                    other => AccountError::DeleteDeviceFailed(other),
                })?,
            };
            crate::info!(
                "account.device_deleted was_already_deleted={was_already_deleted}"
            );
        }

        match self.store.delete_current() {
            Ok(()) | Err(SettingsError::NotFound) => {}
            Err(err) => return Err(AccountError::Store(err)),
        }

        // Remove every installed configuration, not just the one the session
        // tracks. Earlier runs may have left stale entries behind.
        match self.tunnel_store.load_all_from_preferences() {
            Ok(identifiers) => {
                for identifier in identifiers {
                    if let Err(err) = self.tunnel_store.remove_from_preferences(identifier) {
                        crate::warn!("account.tunnel_removal_failed error=\"{err}\"");
                    }
                }
            }
            Err(err) => {
                crate::warn!("account.tunnel_lookup_failed error=\"{err}\"");
                if let Some(identifier) = session.tunnel.clone() {
                    if let Err(err) = self.tunnel_store.remove_from_preferences(identifier) {
                        crate::warn!("account.tunnel_removal_failed error=\"{err}\"");
                    }
                }
            }
        }

        // Reset regardless of how the OS-side cleanup fared.
        session.settings = None;
        session.tunnel = None;
        session.status = TunnelStatus::Disconnected;
        Ok(())
    }

    /// Registers a device for `number` and persists a fresh record.
    async fn set_up(
        &self,
        session: &mut SessionState,
        number: String,
        cancel: &mut CancelToken,
    ) -> Result<(), AccountError> {
        let fetch = self
            .gateway
            .get_account_data(number.clone(), RetryStrategy::standard());
        let account_data = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AccountError::Cancelled),
            result = fetch => result.map_err(|err| match err {
                GatewayError::Cancelled => AccountError::Cancelled,
                other => AccountError::FetchAccountFailed(other),
            })?,
        };

        let key = self
            .key_generator
            .generate_key_pair()
            .map_err(|err| AccountError::KeyGeneration {
                reason: err.to_string(),
            })?;

        let create = self.gateway.create_device(
            number.clone(),
            key.public_key.clone(),
            RetryStrategy::standard(),
        );
        let device = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AccountError::Cancelled),
            result = create => result.map_err(|err| match err {
                GatewayError::Cancelled => AccountError::Cancelled,
                other => AccountError::CreateDeviceFailed(other),
            })?,
        };

        let created: DateTime<Utc> = device.created.into();
        let mut settings = TunnelSettings::new(
            StoredAccountData {
                number,
                expiry: account_data.expiry.into(),
            },
            InterfaceData {
                creation_date: created,
                key,
                next_key: None,
                addresses: vec![device.ipv4_address, device.ipv6_address],
            },
        );
        settings.device = Some(StoredDeviceData {
            creation_date: created,
            identifier: device.id,
            name: device.name,
        });

        self.store.write_current(&settings)?;
        session.settings = Some(settings);
        crate::info!("account.device_created");
        Ok(())
    }
}
