//! Rotation of the tunnel's WireGuard key against the remote service.
//!
//! A successor key is persisted into the current record before the remote
//! service ever sees it, so a crash between generation and confirmation
//! resumes with the same key instead of churning through fresh ones. The
//! staged key is only promoted to the active key, in a single write, once
//! the service has confirmed it and assigned addresses for it.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::account::cancel::CancelToken;
use crate::account::SessionState;
use crate::gateway::{AccountsGateway, GatewayError, RetryStrategy};
use crate::keel_error;
use crate::keychain::{SettingsError, SettingsStore};
use crate::keygen::KeyGenerator;
use crate::settings::KeyPair;

/// Outcome of a rotation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationResult {
    /// A new key is active and persisted.
    Finished,
    /// The active key is younger than the requested interval; nothing was
    /// contacted or mutated.
    Throttled {
        /// When the active key became current.
        since: DateTime<Utc>,
    },
}

/// Errors produced by [`KeyRotation::rotate`].
#[keel_error]
pub enum RotationError {
    /// The session holds no settings record.
    #[error("no account is set")]
    NoAccount,
    /// The session's record has no registered device to rotate for.
    #[error("no device is registered")]
    NoDevice,
    /// The platform failed to generate a successor key.
    #[error("key generation failed: {reason}")]
    KeyGeneration {
        /// Platform-specific description of the failure.
        reason: String,
    },
    /// The settings store failed.
    #[error("settings store failure: {0}")]
    Store(#[from] SettingsError),
    /// The remote service rejected or failed the rotation. The staged
    /// successor key is kept for the next attempt.
    #[error("failed to rotate the key: {0}")]
    RotateKeyFailed(GatewayError),
    /// The rotation was cancelled. The staged successor key, if any, is
    /// kept for resumption.
    #[error("rotation was cancelled")]
    Cancelled,
    /// The rotation was interrupted before reporting a result.
    #[error("rotation was interrupted before completion")]
    Interrupted,
}

/// Rotates the tunnel key, throttled by key age.
pub struct KeyRotation {
    store: SettingsStore,
    gateway: Arc<dyn AccountsGateway>,
    key_generator: Arc<dyn KeyGenerator>,
}

impl KeyRotation {
    /// Creates a rotation controller over the given collaborators.
    #[must_use]
    pub fn new(
        store: SettingsStore,
        gateway: Arc<dyn AccountsGateway>,
        key_generator: Arc<dyn KeyGenerator>,
    ) -> Self {
        Self {
            store,
            gateway,
            key_generator,
        }
    }

    /// Rotates the key if it is older than `interval`.
    ///
    /// `interval` of `None` bypasses the throttle check; background callers
    /// pass their rotation period. On success the new key, its creation
    /// date and the addresses assigned by the service are persisted in a
    /// single write and mirrored into `session`.
    ///
    /// # Errors
    /// - `RotationError::NoAccount` if the session holds no settings
    /// - `RotationError::NoDevice` if no device is registered
    /// - `RotationError::KeyGeneration` if no successor can be generated
    /// - `RotationError::Store` if staging or committing the write fails
    /// - `RotationError::RotateKeyFailed` if the service rejects the key
    /// - `RotationError::Cancelled` if cancellation was requested
    pub async fn rotate(
        &self,
        session: &mut SessionState,
        interval: Option<Duration>,
        cancel: &mut CancelToken,
    ) -> Result<RotationResult, RotationError> {
        if cancel.is_cancelled() {
            return Err(RotationError::Cancelled);
        }

        let Some(settings) = session.settings.clone() else {
            return Err(RotationError::NoAccount);
        };
        let Some(device) = settings.device.clone() else {
            return Err(RotationError::NoDevice);
        };

        let key_created = settings.interface.creation_date;
        if let Some(interval) = interval {
            if Utc::now() < key_created + interval {
                crate::debug!("rotation.throttled key_age_basis={key_created}");
                return Ok(RotationResult::Throttled { since: key_created });
            }
        }

        let account_number = settings.account.number.clone();
        let staged = self.stage_key(session, settings)?;

        let submit = self.gateway.rotate_device_key(
            account_number,
            device.identifier,
            staged.public_key.clone(),
            RetryStrategy::standard(),
        );
        let addresses = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RotationError::Cancelled),
            result = submit => result.map_err(|err| match err {
                GatewayError::Cancelled => RotationError::Cancelled,
                other => RotationError::RotateKeyFailed(other),
            })?,
        };

        // Promote the staged key. One write covers the key, its creation
        // date and the new addresses, so no partial rotation is observable.
        let mut updated = session
            .settings
            .clone()
            .ok_or(RotationError::NoAccount)?;
        updated.interface.creation_date = Utc::now();
        updated.interface.key = staged;
        updated.interface.next_key = None;
        updated.interface.addresses = vec![addresses.ipv4, addresses.ipv6];
        self.store.write_current(&updated)?;
        session.settings = Some(updated);

        crate::info!("rotation.completed");
        Ok(RotationResult::Finished)
    }

    /// Rotates unconditionally, for the user-triggered "regenerate key"
    /// action.
    ///
    /// # Errors
    /// Same as [`Self::rotate`].
    ///
    /// # Panics
    /// Panics if the throttled result is observed, which cannot happen with
    /// the throttle check bypassed.
    pub async fn rotate_now(
        &self,
        session: &mut SessionState,
        cancel: &mut CancelToken,
    ) -> Result<(), RotationError> {
        match self.rotate(session, None, cancel).await? {
            RotationResult::Finished => Ok(()),
            RotationResult::Throttled { .. } => {
                unreachable!("throttling is bypassed when no interval is given")
            }
        }
    }

    /// Returns the key to submit, staging a fresh one durably when no
    /// successor is pending from an earlier attempt.
    fn stage_key(
        &self,
        session: &mut SessionState,
        settings: crate::settings::TunnelSettings,
    ) -> Result<KeyPair, RotationError> {
        if let Some(staged) = settings.interface.next_key {
            crate::debug!("rotation.reusing_staged_key");
            return Ok(staged);
        }

        let generated =
            self.key_generator
                .generate_key_pair()
                .map_err(|err| RotationError::KeyGeneration {
                    reason: err.to_string(),
                })?;

        let mut staged_settings = settings;
        staged_settings.interface.next_key = Some(generated.clone());
        self.store.write_current(&staged_settings)?;
        session.settings = Some(staged_settings);
        crate::debug!("rotation.staged_new_key");
        Ok(generated)
    }
}
