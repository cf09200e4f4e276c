//! The account manager worker and its handles.
//!
//! Every state-mutating operation runs on one worker task with an ordered
//! mailbox, so operations never interleave their mutations of the session
//! or the store. Callers get a completion channel and a cancellation handle
//! per submitted operation; the async convenience wrappers cancel the
//! operation when the caller's future is dropped, which is how foreign
//! task cancellation propagates into an in-flight gateway call.

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{mpsc, oneshot};

use crate::account::cancel::{cancel_pair, CancelHandle, CancelToken};
use crate::account::{AccountError, AccountService, SessionState};
use crate::gateway::AccountsGateway;
use crate::keychain::{SecureStore, SettingsStore};
use crate::keygen::KeyGenerator;
use crate::migration::{MigrationError, SettingsMigrator};
use crate::primitives::DeviceKeyValueStore;
use crate::rotation::{KeyRotation, RotationError, RotationResult};
use crate::settings::SettingsSnapshot;
use crate::tunnel::{TunnelConfigurationStore, TunnelStatus};

/// FFI-facing outcome of a rotation attempt.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum RotationOutcome {
    /// A new key is active and persisted.
    Finished,
    /// The active key was younger than the interval; nothing was mutated.
    Throttled {
        /// When the active key became current.
        since: SystemTime,
    },
}

impl From<RotationResult> for RotationOutcome {
    fn from(result: RotationResult) -> Self {
        match result {
            RotationResult::Finished => Self::Finished,
            RotationResult::Throttled { since } => Self::Throttled {
                since: since.into(),
            },
        }
    }
}

/// One queued operation. Each carries a single-shot completion channel and,
/// where the operation can touch the network, a cancellation token.
enum Command {
    Migrate {
        cancel: CancelToken,
        done: oneshot::Sender<Result<Option<SettingsSnapshot>, MigrationError>>,
    },
    LoadSession {
        cancel: CancelToken,
        done: oneshot::Sender<Result<Option<SettingsSnapshot>, AccountError>>,
    },
    SetAccount {
        account_number: Option<String>,
        cancel: CancelToken,
        done: oneshot::Sender<Result<(), AccountError>>,
    },
    RotateKey {
        interval: Option<chrono::Duration>,
        cancel: CancelToken,
        done: oneshot::Sender<Result<RotationOutcome, RotationError>>,
    },
    RotateKeyNow {
        cancel: CancelToken,
        done: oneshot::Sender<Result<(), RotationError>>,
    },
    GetSnapshot {
        done: oneshot::Sender<Option<SettingsSnapshot>>,
    },
    GetStatus {
        done: oneshot::Sender<TunnelStatus>,
    },
    SetStatus {
        status: TunnelStatus,
        done: oneshot::Sender<()>,
    },
    SetTunnel {
        identifier: Option<String>,
        done: oneshot::Sender<()>,
    },
}

/// Owns the session and executes commands strictly in submission order.
struct Worker {
    session: SessionState,
    migrator: SettingsMigrator,
    rotation: KeyRotation,
    service: AccountService,
    mailbox: mpsc::UnboundedReceiver<Command>,
}

impl Worker {
    async fn run(mut self) {
        while let Some(command) = self.mailbox.recv().await {
            self.handle(command).await;
        }
        crate::debug!("account.worker_stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Migrate { mut cancel, done } => {
                let result = match self.migrator.perform(&mut cancel).await {
                    Ok(Some(settings)) => {
                        let snapshot = SettingsSnapshot::from(&settings);
                        self.session.settings = Some(settings);
                        Ok(Some(snapshot))
                    }
                    Ok(None) => Ok(None),
                    Err(err) => Err(err),
                };
                let _ = done.send(result);
            }
            Command::LoadSession { cancel, done } => {
                let result = if cancel.is_cancelled() {
                    Err(AccountError::Cancelled)
                } else {
                    self.service.load_session(&mut self.session).map(|()| {
                        self.session.settings.as_ref().map(SettingsSnapshot::from)
                    })
                };
                let _ = done.send(result);
            }
            Command::SetAccount {
                account_number,
                mut cancel,
                done,
            } => {
                let result = self
                    .service
                    .set_account(&mut self.session, account_number, &mut cancel)
                    .await;
                let _ = done.send(result);
            }
            Command::RotateKey {
                interval,
                mut cancel,
                done,
            } => {
                let result = self
                    .rotation
                    .rotate(&mut self.session, interval, &mut cancel)
                    .await
                    .map(RotationOutcome::from);
                let _ = done.send(result);
            }
            Command::RotateKeyNow { mut cancel, done } => {
                let result = self.rotation.rotate_now(&mut self.session, &mut cancel).await;
                let _ = done.send(result);
            }
            Command::GetSnapshot { done } => {
                let _ = done.send(self.session.settings.as_ref().map(SettingsSnapshot::from));
            }
            Command::GetStatus { done } => {
                let _ = done.send(self.session.status);
            }
            Command::SetStatus { status, done } => {
                self.session.status = status;
                let _ = done.send(());
            }
            Command::SetTunnel { identifier, done } => {
                self.session.tunnel = identifier;
                let _ = done.send(());
            }
        }
    }
}

/// Cancels the paired operation unless disarmed before drop.
struct CancelOnDrop {
    handle: CancelHandle,
    armed: bool,
}

impl CancelOnDrop {
    const fn new(handle: CancelHandle) -> Self {
        Self {
            handle,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.handle.cancel();
        }
    }
}

/// Clonable submission handle to the worker task.
#[derive(Clone)]
pub struct AccountManagerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl AccountManagerHandle {
    /// Spawns the worker task over the given collaborators and returns a
    /// handle to it. Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        secure_store: Arc<dyn SecureStore>,
        device_store: Arc<dyn DeviceKeyValueStore>,
        gateway: Arc<dyn AccountsGateway>,
        key_generator: Arc<dyn KeyGenerator>,
        tunnel_store: Arc<dyn TunnelConfigurationStore>,
    ) -> Self {
        let (tx, mailbox) = mpsc::unbounded_channel();
        let worker = Worker {
            session: SessionState::new(),
            migrator: SettingsMigrator::new(
                SettingsStore::new(Arc::clone(&secure_store)),
                device_store,
                Arc::clone(&gateway),
            ),
            rotation: KeyRotation::new(
                SettingsStore::new(Arc::clone(&secure_store)),
                Arc::clone(&gateway),
                Arc::clone(&key_generator),
            ),
            service: AccountService::new(
                SettingsStore::new(secure_store),
                gateway,
                key_generator,
                tunnel_store,
            ),
            mailbox,
        };
        tokio::spawn(worker.run());
        Self { tx }
    }

    fn submit<T>(
        &self,
        build: impl FnOnce(CancelToken, oneshot::Sender<T>) -> Command,
    ) -> (CancelHandle, oneshot::Receiver<T>) {
        let (handle, token) = cancel_pair();
        let (done, result) = oneshot::channel();
        let _ = self.tx.send(build(token, done));
        (handle, result)
    }

    /// Queues a migration run.
    #[must_use]
    pub fn submit_migration(
        &self,
    ) -> (
        CancelHandle,
        oneshot::Receiver<Result<Option<SettingsSnapshot>, MigrationError>>,
    ) {
        self.submit(|cancel, done| Command::Migrate { cancel, done })
    }

    /// Queues a session load from the persisted record.
    #[must_use]
    pub fn submit_load_session(
        &self,
    ) -> (
        CancelHandle,
        oneshot::Receiver<Result<Option<SettingsSnapshot>, AccountError>>,
    ) {
        self.submit(|cancel, done| Command::LoadSession { cancel, done })
    }

    /// Queues an account switch, or a logout when `account_number` is `None`.
    #[must_use]
    pub fn submit_set_account(
        &self,
        account_number: Option<String>,
    ) -> (CancelHandle, oneshot::Receiver<Result<(), AccountError>>) {
        self.submit(|cancel, done| Command::SetAccount {
            account_number,
            cancel,
            done,
        })
    }

    /// Queues a throttled key rotation.
    #[must_use]
    pub fn submit_rotation(
        &self,
        interval: Option<chrono::Duration>,
    ) -> (
        CancelHandle,
        oneshot::Receiver<Result<RotationOutcome, RotationError>>,
    ) {
        self.submit(|cancel, done| Command::RotateKey {
            interval,
            cancel,
            done,
        })
    }

    /// Queues an unconditional key rotation.
    #[must_use]
    pub fn submit_forced_rotation(
        &self,
    ) -> (CancelHandle, oneshot::Receiver<Result<(), RotationError>>) {
        self.submit(|cancel, done| Command::RotateKeyNow { cancel, done })
    }

    /// Runs a migration, cancelling it if this future is dropped.
    ///
    /// # Errors
    /// See [`MigrationError`].
    pub async fn migrate(&self) -> Result<Option<SettingsSnapshot>, MigrationError> {
        let (handle, result) = self.submit_migration();
        let mut guard = CancelOnDrop::new(handle);
        let outcome = result.await.unwrap_or(Err(MigrationError::Interrupted));
        guard.disarm();
        outcome
    }

    /// Loads the session, cancelling the operation if this future is dropped.
    ///
    /// # Errors
    /// See [`AccountError`].
    pub async fn load_session(&self) -> Result<Option<SettingsSnapshot>, AccountError> {
        let (handle, result) = self.submit_load_session();
        let mut guard = CancelOnDrop::new(handle);
        let outcome = result.await.unwrap_or(Err(AccountError::Interrupted));
        guard.disarm();
        outcome
    }

    /// Switches accounts, cancelling the operation if this future is dropped.
    ///
    /// # Errors
    /// See [`AccountError`].
    pub async fn set_account(&self, account_number: Option<String>) -> Result<(), AccountError> {
        let (handle, result) = self.submit_set_account(account_number);
        let mut guard = CancelOnDrop::new(handle);
        let outcome = result.await.unwrap_or(Err(AccountError::Interrupted));
        guard.disarm();
        outcome
    }

    /// Rotates the key if older than `interval`, cancelling the operation if
    /// this future is dropped.
    ///
    /// # Errors
    /// See [`RotationError`].
    pub async fn rotate_key(
        &self,
        interval: Option<chrono::Duration>,
    ) -> Result<RotationOutcome, RotationError> {
        let (handle, result) = self.submit_rotation(interval);
        let mut guard = CancelOnDrop::new(handle);
        let outcome = result.await.unwrap_or(Err(RotationError::Interrupted));
        guard.disarm();
        outcome
    }

    /// Rotates the key unconditionally, cancelling the operation if this
    /// future is dropped.
    ///
    /// # Errors
    /// See [`RotationError`].
    pub async fn rotate_key_now(&self) -> Result<(), RotationError> {
        let (handle, result) = self.submit_forced_rotation();
        let mut guard = CancelOnDrop::new(handle);
        let outcome = result.await.unwrap_or(Err(RotationError::Interrupted));
        guard.disarm();
        outcome
    }

    /// Snapshot of the session's settings, `None` when logged out.
    pub async fn settings_snapshot(&self) -> Option<SettingsSnapshot> {
        let (done, result) = oneshot::channel();
        let _ = self.tx.send(Command::GetSnapshot { done });
        result.await.unwrap_or_default()
    }

    /// The session's tunnel status. Reports disconnected if the worker is
    /// gone, which only happens at shutdown.
    pub async fn tunnel_status(&self) -> TunnelStatus {
        let (done, result) = oneshot::channel();
        let _ = self.tx.send(Command::GetStatus { done });
        result.await.unwrap_or(TunnelStatus::Disconnected)
    }

    /// Records the tunnel status reported by the running tunnel.
    pub async fn set_tunnel_status(&self, status: TunnelStatus) {
        let (done, result) = oneshot::channel();
        let _ = self.tx.send(Command::SetStatus { status, done });
        let _ = result.await;
    }

    /// Records the OS tunnel configuration identifier, or clears it.
    pub async fn set_tunnel(&self, identifier: Option<String>) {
        let (done, result) = oneshot::channel();
        let _ = self.tx.send(Command::SetTunnel { identifier, done });
        let _ = result.await;
    }
}

/// FFI entry point owning the worker task for the application run.
#[derive(uniffi::Object)]
pub struct AccountManager {
    handle: AccountManagerHandle,
}

#[crate::keel_export]
impl AccountManager {
    /// Spawns the manager over the app's collaborator implementations.
    #[uniffi::constructor]
    pub async fn new(
        secure_store: Arc<dyn SecureStore>,
        device_store: Arc<dyn DeviceKeyValueStore>,
        gateway: Arc<dyn AccountsGateway>,
        key_generator: Arc<dyn KeyGenerator>,
        tunnel_store: Arc<dyn TunnelConfigurationStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            handle: AccountManagerHandle::spawn(
                secure_store,
                device_store,
                gateway,
                key_generator,
                tunnel_store,
            ),
        })
    }

    /// Migrates any legacy settings record. Call once at startup, before
    /// loading the session.
    ///
    /// # Errors
    /// See [`MigrationError`].
    pub async fn migrate_settings(&self) -> Result<Option<SettingsSnapshot>, MigrationError> {
        self.handle.migrate().await
    }

    /// Populates the session from the persisted record.
    ///
    /// # Errors
    /// See [`AccountError`].
    pub async fn load_session(&self) -> Result<Option<SettingsSnapshot>, AccountError> {
        self.handle.load_session().await
    }

    /// Logs in to `account_number`, tearing down any previous account first.
    ///
    /// # Errors
    /// See [`AccountError`].
    pub async fn set_account(&self, account_number: String) -> Result<(), AccountError> {
        self.handle.set_account(Some(account_number)).await
    }

    /// Logs out, deleting the device, the persisted record and the OS
    /// tunnel configuration.
    ///
    /// # Errors
    /// See [`AccountError`].
    pub async fn clear_account(&self) -> Result<(), AccountError> {
        self.handle.set_account(None).await
    }

    /// Rotates the key if it is older than `interval`.
    ///
    /// # Errors
    /// See [`RotationError`].
    pub async fn rotate_key_if_older_than(
        &self,
        interval: std::time::Duration,
    ) -> Result<RotationOutcome, RotationError> {
        let interval = chrono::Duration::from_std(interval).map_err(|_| {
            RotationError::Generic {
                message: "rotation interval out of range".to_owned(),
            }
        })?;
        self.handle.rotate_key(Some(interval)).await
    }

    /// Rotates the key unconditionally.
    ///
    /// # Errors
    /// See [`RotationError`].
    pub async fn regenerate_key(&self) -> Result<(), RotationError> {
        self.handle.rotate_key_now().await
    }

    /// Snapshot of the session's settings, `None` when logged out.
    pub async fn settings(&self) -> Option<SettingsSnapshot> {
        self.handle.settings_snapshot().await
    }

    /// The session's tunnel status.
    pub async fn tunnel_status(&self) -> TunnelStatus {
        self.handle.tunnel_status().await
    }

    /// Records the tunnel status reported by the running tunnel.
    pub async fn set_tunnel_status(&self, status: TunnelStatus) {
        self.handle.set_tunnel_status(status).await;
    }

    /// Records the identifier of the OS tunnel configuration the app
    /// installed, or clears it when the configuration was removed.
    pub async fn set_tunnel(&self, identifier: Option<String>) {
        self.handle.set_tunnel(identifier).await;
    }
}
