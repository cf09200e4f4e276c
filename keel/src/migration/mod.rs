//! One-shot startup migration of legacy settings records.
//!
//! Earlier releases stored per-account settings in the secure store keyed by
//! the account number, with the active account number mirrored in the
//! device's plain key-value storage. The migrator converts at most one of
//! those records into the current schema and removes the rest. It runs
//! before any other operation touches the store, and any failure leaves all
//! on-disk state untouched so the next startup can retry.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::account::cancel::CancelToken;
use crate::gateway::{AccountsGateway, GatewayError, RetryStrategy};
use crate::keel_error;
use crate::keychain::{SettingsError, SettingsStore};
use crate::primitives::{DeviceKeyValueStore, KeyValueStoreError};
use crate::settings::{LegacyRecord, TunnelSettings};

/// Key under which earlier releases mirrored the active account number in
/// the device key-value store.
const LEGACY_ACCOUNT_KEY: &str = "legacyAccountNumber";

/// Serializes migration runs across all `SettingsMigrator` instances. Held
/// for the duration of `perform`; a second concurrent call fails fast
/// instead of queueing.
static MIGRATION_LOCK: Mutex<()> = Mutex::const_new(());

/// Errors produced by [`SettingsMigrator::perform`].
#[keel_error]
pub enum MigrationError {
    /// A migration run is already in progress.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// What was invalid about the call.
        message: String,
    },
    /// The settings store failed.
    #[error("settings store failure: {0}")]
    Store(#[from] SettingsError),
    /// The preference mirror holding the legacy account pointer failed.
    #[error("preference mirror failure: {0}")]
    Mirror(KeyValueStoreError),
    /// Fetching authoritative account data failed.
    #[error("failed to fetch account data: {0}")]
    FetchAccount(GatewayError),
    /// The run was cancelled; no on-disk state was touched.
    #[error("migration was cancelled")]
    Cancelled,
    /// The run was interrupted before reporting a result.
    #[error("migration was interrupted before completion")]
    Interrupted,
}

/// Converts legacy settings records into the current schema.
pub struct SettingsMigrator {
    store: SettingsStore,
    mirror: Arc<dyn DeviceKeyValueStore>,
    gateway: Arc<dyn AccountsGateway>,
}

impl SettingsMigrator {
    /// Creates a migrator over the given store and collaborators.
    #[must_use]
    pub fn new(
        store: SettingsStore,
        mirror: Arc<dyn DeviceKeyValueStore>,
        gateway: Arc<dyn AccountsGateway>,
    ) -> Self {
        Self {
            store,
            mirror,
            gateway,
        }
    }

    /// Runs the migration.
    ///
    /// Returns the migrated record, or `None` when there was nothing to
    /// migrate. In both success cases every legacy entry and the account
    /// mirror are removed. On failure or cancellation all on-disk state is
    /// left untouched.
    ///
    /// # Errors
    /// - `MigrationError::InvalidOperation` if a run is already in progress
    /// - `MigrationError::Store` if reading or writing the store fails
    /// - `MigrationError::Mirror` if the account mirror cannot be read
    /// - `MigrationError::FetchAccount` if the account lookup fails
    /// - `MigrationError::Cancelled` if cancellation was requested
    pub async fn perform(
        &self,
        cancel: &mut CancelToken,
    ) -> Result<Option<TunnelSettings>, MigrationError> {
        let Ok(_guard) = MIGRATION_LOCK.try_lock() else {
            return Err(MigrationError::InvalidOperation {
                message: "migration is already in progress".to_owned(),
            });
        };

        if cancel.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }

        crate::info!("migration.started");

        let legacy = self.store.read_legacy()?;
        if legacy.entry_count == 0 {
            // Nothing ever written by a legacy release. A stale mirror value
            // without a matching record is meaningless, drop it.
            self.clear_mirror();
            crate::info!("migration.completed outcome=nothing_to_do");
            return Ok(None);
        }

        let Some(record) = self.find_active_record(&legacy.records)? else {
            // Legacy entries that belong to no locally known account are
            // garbage from an abandoned login.
            self.store.delete_legacy();
            self.clear_mirror();
            crate::info!(
                "migration.completed outcome=no_matching_account discarded={}",
                legacy.entry_count
            );
            return Ok(None);
        };

        let account_number = record.account_number.clone();
        let fetch = self
            .gateway
            .get_account_data(account_number.clone(), RetryStrategy::aggressive());
        let account_data = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(MigrationError::Cancelled),
            result = fetch => result.map_err(|err| match err {
                GatewayError::Cancelled => MigrationError::Cancelled,
                other => MigrationError::FetchAccount(other),
            })?,
        };

        let settings = TunnelSettings::from_legacy(
            account_number,
            account_data.expiry.into(),
            record.settings.clone(),
        );
        self.store.write_current(&settings)?;

        // The migrated record is durable now. Cleanup is best effort; a
        // leftover legacy entry is skipped as garbage on the next run.
        self.store.delete_legacy();
        self.clear_mirror();

        crate::info!("migration.completed outcome=migrated");
        Ok(Some(settings))
    }

    /// Looks up the account number the last legacy release considered
    /// active and finds its record among the decoded legacy entries.
    ///
    /// An absent mirror key means "no active account". Any other mirror
    /// failure aborts the run: legacy entries may still belong to a locally
    /// known account, so they must survive for a retry on next startup.
    fn find_active_record<'records>(
        &self,
        records: &'records [LegacyRecord],
    ) -> Result<Option<&'records LegacyRecord>, MigrationError> {
        let active = match self.mirror.get(LEGACY_ACCOUNT_KEY.to_owned()) {
            Ok(number) => number,
            Err(KeyValueStoreError::KeyNotFound) => return Ok(None),
            Err(err) => {
                crate::warn!("migration.mirror_read_failed error=\"{err}\"");
                return Err(MigrationError::Mirror(err));
            }
        };
        Ok(records
            .iter()
            .find(|record| record.account_number == active))
    }

    fn clear_mirror(&self) {
        match self.mirror.delete(LEGACY_ACCOUNT_KEY.to_owned()) {
            Ok(()) | Err(KeyValueStoreError::KeyNotFound) => {}
            Err(err) => {
                crate::warn!("migration.mirror_clear_failed error=\"{err}\"");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keychain::{InMemorySecureStore, SecureStore};
    use crate::primitives::key_value_store::InMemoryDeviceKeyValueStore;
    use crate::settings::{KeyPair, LegacyInterfaceData, LegacySettings, RelayConstraints};
    use crate::test_utils::{GatewayBehavior, MockGateway};
    use chrono::{TimeZone, Utc};
    use serial_test::serial;
    use std::sync::atomic::Ordering;

    struct Fixture {
        secure: Arc<InMemorySecureStore>,
        mirror: Arc<InMemoryDeviceKeyValueStore>,
        gateway: Arc<MockGateway>,
    }

    impl Fixture {
        fn new(behavior: GatewayBehavior) -> Self {
            Self {
                secure: Arc::new(InMemorySecureStore::new()),
                mirror: Arc::new(InMemoryDeviceKeyValueStore::new()),
                gateway: Arc::new(MockGateway::new(behavior)),
            }
        }

        fn migrator(&self) -> SettingsMigrator {
            SettingsMigrator::new(
                SettingsStore::new(Arc::clone(&self.secure) as Arc<dyn SecureStore>),
                Arc::clone(&self.mirror) as Arc<dyn DeviceKeyValueStore>,
                Arc::clone(&self.gateway) as Arc<dyn AccountsGateway>,
            )
        }

        fn seed_legacy(&self, account_number: &str) {
            let payload = serde_json::to_vec(&LegacySettings {
                interface: LegacyInterfaceData {
                    creation_date: Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
                    key: KeyPair {
                        private_key: format!("priv-{account_number}"),
                        public_key: format!("pub-{account_number}"),
                    },
                    addresses: vec!["10.0.0.3/32".to_owned()],
                },
                relay_constraints: RelayConstraints::default(),
            })
            .unwrap();
            self.secure
                .insert(
                    SettingsStore::service_name().to_owned(),
                    account_number.to_owned(),
                    payload,
                )
                .unwrap();
        }

        fn seed_marker(&self) {
            self.secure
                .insert(
                    SettingsStore::service_name().to_owned(),
                    String::new(),
                    b"already-migrated marker".to_vec(),
                )
                .unwrap();
        }

        fn set_mirror(&self, account_number: &str) {
            self.mirror
                .set(LEGACY_ACCOUNT_KEY.to_owned(), account_number.to_owned())
                .unwrap();
        }

        fn mirror_is_empty(&self) -> bool {
            matches!(
                self.mirror.get(LEGACY_ACCOUNT_KEY.to_owned()),
                Err(KeyValueStoreError::KeyNotFound)
            )
        }
    }

    #[tokio::test]
    #[serial]
    async fn empty_store_is_a_clean_no_op_that_clears_the_mirror() {
        let fixture = Fixture::new(GatewayBehavior::Succeed);
        fixture.set_mirror("1234");

        let (_handle, mut token) = crate::account::cancel::cancel_pair();
        let migrated = fixture.migrator().perform(&mut token).await.unwrap();

        assert!(migrated.is_none());
        assert!(fixture.mirror_is_empty());
        assert_eq!(fixture.gateway.get_account_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    #[serial]
    async fn migrates_the_mirrored_account_and_removes_every_legacy_entry() {
        let fixture = Fixture::new(GatewayBehavior::Succeed);
        fixture.seed_legacy("1111");
        fixture.seed_legacy("2222");
        fixture.seed_marker();
        fixture.set_mirror("2222");

        let (_handle, mut token) = crate::account::cancel::cancel_pair();
        let migrated = fixture
            .migrator()
            .perform(&mut token)
            .await
            .unwrap()
            .expect("a record should have been migrated");

        assert_eq!(migrated.account.number, "2222");
        assert_eq!(migrated.account.expiry, MockGateway::account_expiry());
        assert_eq!(migrated.interface.key.public_key, "pub-2222");
        assert!(migrated.device.is_none());

        // Only the current entry remains; both legacy entries and the old
        // marker payload are gone.
        assert_eq!(
            fixture.secure.entry_count(SettingsStore::service_name()),
            1
        );
        let store = SettingsStore::new(Arc::clone(&fixture.secure) as Arc<dyn SecureStore>);
        assert_eq!(store.read_current().unwrap(), migrated);
        assert!(fixture.mirror_is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn unmatched_legacy_entries_are_deleted_without_migrating() {
        let fixture = Fixture::new(GatewayBehavior::Succeed);
        fixture.seed_legacy("1111");
        fixture.seed_legacy("2222");
        fixture.set_mirror("3333");

        let (_handle, mut token) = crate::account::cancel::cancel_pair();
        let migrated = fixture.migrator().perform(&mut token).await.unwrap();

        assert!(migrated.is_none());
        assert_eq!(
            fixture.secure.entry_count(SettingsStore::service_name()),
            0
        );
        assert!(fixture.mirror_is_empty());
        assert_eq!(fixture.gateway.get_account_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    #[serial]
    async fn absent_mirror_treats_all_legacy_entries_as_garbage() {
        let fixture = Fixture::new(GatewayBehavior::Succeed);
        fixture.seed_legacy("1111");

        let (_handle, mut token) = crate::account::cancel::cancel_pair();
        let migrated = fixture.migrator().perform(&mut token).await.unwrap();

        assert!(migrated.is_none());
        assert_eq!(
            fixture.secure.entry_count(SettingsStore::service_name()),
            0
        );
    }

    #[tokio::test]
    #[serial]
    async fn second_run_after_success_is_idempotent() {
        let fixture = Fixture::new(GatewayBehavior::Succeed);
        fixture.seed_legacy("1111");
        fixture.set_mirror("1111");

        let (_handle, mut token) = crate::account::cancel::cancel_pair();
        let migrator = fixture.migrator();
        migrator.perform(&mut token).await.unwrap().unwrap();

        let (_handle, mut token) = crate::account::cancel::cancel_pair();
        let second = migrator.perform(&mut token).await.unwrap();

        assert!(second.is_none());
        assert_eq!(fixture.gateway.get_account_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            fixture.secure.entry_count(SettingsStore::service_name()),
            1
        );
    }

    /// Mirror whose reads fail with a transient foreign-callback error.
    struct UnreliableMirror;

    impl DeviceKeyValueStore for UnreliableMirror {
        fn get(&self, _key: String) -> Result<String, KeyValueStoreError> {
            Err(KeyValueStoreError::UnexpectedUniFFICallbackError(
                "store unavailable".to_owned(),
            ))
        }

        fn set(&self, _key: String, _value: String) -> Result<(), KeyValueStoreError> {
            Ok(())
        }

        fn delete(&self, _key: String) -> Result<(), KeyValueStoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    #[serial]
    async fn mirror_read_failure_aborts_and_preserves_legacy_data() {
        let fixture = Fixture::new(GatewayBehavior::Succeed);
        fixture.seed_legacy("1111");

        let migrator = SettingsMigrator::new(
            SettingsStore::new(Arc::clone(&fixture.secure) as Arc<dyn SecureStore>),
            Arc::new(UnreliableMirror),
            Arc::clone(&fixture.gateway) as Arc<dyn AccountsGateway>,
        );

        let (_handle, mut token) = crate::account::cancel::cancel_pair();
        let err = migrator.perform(&mut token).await.unwrap_err();

        // A broken mirror is indistinguishable from a present-but-unreadable
        // account pointer, so the run must abort with the legacy entries
        // intact for a retry on the next startup.
        assert!(matches!(err, MigrationError::Mirror(_)));
        assert_eq!(
            fixture.secure.entry_count(SettingsStore::service_name()),
            1
        );
        assert_eq!(fixture.gateway.get_account_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    #[serial]
    async fn gateway_failure_leaves_legacy_data_and_mirror_untouched() {
        let fixture = Fixture::new(GatewayBehavior::Fail);
        fixture.seed_legacy("1111");
        fixture.set_mirror("1111");

        let (_handle, mut token) = crate::account::cancel::cancel_pair();
        let err = fixture.migrator().perform(&mut token).await.unwrap_err();

        assert!(matches!(err, MigrationError::FetchAccount(_)));
        assert_eq!(
            fixture.secure.entry_count(SettingsStore::service_name()),
            1
        );
        assert!(!fixture.mirror_is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn cancellation_during_the_account_fetch_touches_nothing() {
        let fixture = Fixture::new(GatewayBehavior::Hang);
        fixture.seed_legacy("1111");
        fixture.set_mirror("1111");

        let (handle, mut token) = crate::account::cancel::cancel_pair();
        handle.cancel();
        let err = fixture.migrator().perform(&mut token).await.unwrap_err();

        assert!(matches!(err, MigrationError::Cancelled));
        assert_eq!(
            fixture.secure.entry_count(SettingsStore::service_name()),
            1
        );
        assert!(!fixture.mirror_is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn overlapping_runs_fail_fast() {
        let fixture = Fixture::new(GatewayBehavior::Hang);
        fixture.seed_legacy("1111");
        fixture.set_mirror("1111");

        let hung = Arc::new(fixture.migrator());
        let background = Arc::clone(&hung);
        let first = tokio::spawn(async move {
            let (_handle, mut token) = crate::account::cancel::cancel_pair();
            background.perform(&mut token).await
        });
        // Let the spawned run acquire the migration lock and park on the
        // hanging gateway call.
        tokio::task::yield_now().await;

        let (_handle, mut token) = crate::account::cancel::cancel_pair();
        let err = hung.perform(&mut token).await.unwrap_err();
        assert!(matches!(err, MigrationError::InvalidOperation { .. }));

        first.abort();
        let _ = first.await;
    }
}
