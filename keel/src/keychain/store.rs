//! Typed access to the settings records in the secure store.

use std::sync::Arc;

use crate::keel_error;
use crate::keychain::{SecureStore, SecureStoreError};
use crate::primitives::{current_environment, KeelEnvironment};
use crate::settings::{LegacyRecord, LegacySettings, TunnelSettings};

/// The attribute the current record is stored under. Legacy records use the
/// owning account number, which is never empty, so the two key-spaces cannot
/// collide.
const CURRENT_ATTRIBUTE: &str = "";

/// Errors produced by [`SettingsStore`] operations.
#[keel_error]
pub enum SettingsError {
    /// No record exists.
    #[error("no settings record found")]
    NotFound,
    /// The stored payload does not parse against the expected schema.
    #[error("failed to decode stored settings: {reason}")]
    DecodeFailure {
        /// Why decoding failed.
        reason: String,
    },
    /// The record could not be written.
    #[error("failed to persist settings: {reason}")]
    PersistFailure {
        /// Why the write failed.
        reason: String,
    },
    /// The underlying secure store failed.
    #[error("secure store failure: {0}")]
    Store(#[from] SecureStoreError),
}

/// Outcome of enumerating legacy entries.
///
/// `entry_count` counts every legacy-keyed entry found in the store,
/// including ones whose payload did not decode, so callers can distinguish
/// "store is empty" from "store holds only corrupt legacy data".
#[derive(Debug)]
pub struct LegacyReadResult {
    /// The legacy entries that decoded successfully.
    pub records: Vec<LegacyRecord>,
    /// Number of legacy-keyed entries present, decodable or not.
    pub entry_count: usize,
}

/// Typed wrapper around the platform [`SecureStore`], owning the service
/// name and the JSON encoding of both settings schemas.
///
/// The current record lives under a fixed empty attribute; legacy records
/// live under the account number they belong to.
pub struct SettingsStore {
    store: Arc<dyn SecureStore>,
}

impl SettingsStore {
    /// Wraps the given platform secure store.
    #[must_use]
    pub fn new(store: Arc<dyn SecureStore>) -> Self {
        Self { store }
    }

    /// The secure store service name for the active environment.
    #[must_use]
    pub fn service_name() -> &'static str {
        match current_environment() {
            KeelEnvironment::Production => "keel-tunnel-settings",
            KeelEnvironment::Staging => "keel-tunnel-settings-staging",
        }
    }

    /// Reads the current record.
    ///
    /// # Errors
    /// - `SettingsError::NotFound` if no current record exists
    /// - `SettingsError::DecodeFailure` if the payload does not parse as the
    ///   current schema
    pub fn read_current(&self) -> Result<TunnelSettings, SettingsError> {
        let payload = match self
            .store
            .get(Self::service_name().to_owned(), CURRENT_ATTRIBUTE.to_owned())
        {
            Ok(payload) => payload,
            Err(SecureStoreError::NotFound) => return Err(SettingsError::NotFound),
            Err(err) => return Err(SettingsError::Store(err)),
        };

        serde_json::from_slice(&payload).map_err(|err| SettingsError::DecodeFailure {
            reason: err.to_string(),
        })
    }

    /// Writes the current record, replacing any previous one.
    ///
    /// Attempts an in-place update first and falls back to an insert when no
    /// entry exists yet, so the store never holds two current entries.
    ///
    /// # Errors
    /// - `SettingsError::PersistFailure` if the record cannot be encoded or
    ///   the store rejects both the update and the insert
    pub fn write_current(&self, settings: &TunnelSettings) -> Result<(), SettingsError> {
        let payload = serde_json::to_vec(settings).map_err(|err| SettingsError::PersistFailure {
            reason: err.to_string(),
        })?;

        let service = Self::service_name().to_owned();
        match self
            .store
            .update(service.clone(), CURRENT_ATTRIBUTE.to_owned(), payload.clone())
        {
            Ok(()) => Ok(()),
            Err(SecureStoreError::NotFound) => self
                .store
                .insert(service, CURRENT_ATTRIBUTE.to_owned(), payload)
                .map_err(|err| SettingsError::PersistFailure {
                    reason: err.to_string(),
                }),
            Err(err) => Err(SettingsError::PersistFailure {
                reason: err.to_string(),
            }),
        }
    }

    /// Deletes the current record.
    ///
    /// # Errors
    /// - `SettingsError::NotFound` if no current record exists; callers that
    ///   treat absence as success ignore this variant
    pub fn delete_current(&self) -> Result<(), SettingsError> {
        match self
            .store
            .delete(Self::service_name().to_owned(), CURRENT_ATTRIBUTE.to_owned())
        {
            Ok(()) => Ok(()),
            Err(SecureStoreError::NotFound) => Err(SettingsError::NotFound),
            Err(err) => Err(SettingsError::Store(err)),
        }
    }

    /// Enumerates legacy entries.
    ///
    /// The current record's empty attribute is skipped. Entries whose
    /// payload does not decode as the legacy schema are skipped with a log
    /// line rather than failing the enumeration, so partial corruption does
    /// not block migrating the rest.
    ///
    /// # Errors
    /// - `SettingsError::Store` if the store cannot be listed at all
    pub fn read_legacy(&self) -> Result<LegacyReadResult, SettingsError> {
        let entries = match self.store.list(Self::service_name().to_owned()) {
            Ok(entries) => entries,
            Err(SecureStoreError::NotFound) => {
                return Ok(LegacyReadResult {
                    records: Vec::new(),
                    entry_count: 0,
                })
            }
            Err(err) => return Err(SettingsError::Store(err)),
        };

        let mut records = Vec::new();
        let mut entry_count = 0;
        for entry in entries {
            if entry.attribute == CURRENT_ATTRIBUTE {
                continue;
            }
            entry_count += 1;
            match serde_json::from_slice::<LegacySettings>(&entry.payload) {
                Ok(settings) => records.push(LegacyRecord {
                    account_number: entry.attribute,
                    settings,
                }),
                Err(err) => {
                    crate::warn!(
                        "settings.legacy_entry_skipped attribute_len={} error=\"{err}\"",
                        entry.attribute.len()
                    );
                }
            }
        }

        Ok(LegacyReadResult {
            records,
            entry_count,
        })
    }

    /// Deletes every legacy entry, best effort.
    ///
    /// The current record's empty attribute is never touched. A failure to
    /// remove one entry is logged and does not abort removal of the others.
    pub fn delete_legacy(&self) {
        let service = Self::service_name().to_owned();
        let entries = match self.store.list(service.clone()) {
            Ok(entries) => entries,
            Err(SecureStoreError::NotFound) => return,
            Err(err) => {
                crate::warn!("settings.legacy_cleanup_list_failed error=\"{err}\"");
                return;
            }
        };

        for entry in entries {
            if entry.attribute == CURRENT_ATTRIBUTE {
                continue;
            }
            if let Err(err) = self.store.delete(service.clone(), entry.attribute) {
                crate::warn!("settings.legacy_cleanup_entry_failed error=\"{err}\"");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keychain::InMemorySecureStore;
    use crate::settings::{InterfaceData, KeyPair, StoredAccountData};
    use chrono::{TimeZone, Utc};

    fn sample_settings(number: &str) -> TunnelSettings {
        TunnelSettings::new(
            StoredAccountData {
                number: number.to_owned(),
                expiry: Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap(),
            },
            InterfaceData {
                creation_date: Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap(),
                key: KeyPair {
                    private_key: "priv".to_owned(),
                    public_key: "pub".to_owned(),
                },
                next_key: None,
                addresses: vec!["10.0.0.2/32".to_owned()],
            },
        )
    }

    fn legacy_payload() -> Vec<u8> {
        serde_json::to_vec(&crate::settings::LegacySettings {
            interface: crate::settings::LegacyInterfaceData {
                creation_date: Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
                key: KeyPair {
                    private_key: "old-priv".to_owned(),
                    public_key: "old-pub".to_owned(),
                },
                addresses: vec!["10.0.0.9/32".to_owned()],
            },
            relay_constraints: crate::settings::RelayConstraints::default(),
        })
        .unwrap()
    }

    #[test]
    fn read_current_of_empty_store_is_not_found() {
        let store = SettingsStore::new(Arc::new(InMemorySecureStore::new()));
        assert!(matches!(store.read_current(), Err(SettingsError::NotFound)));
    }

    #[test]
    fn write_current_inserts_then_updates_in_place() {
        let secure = Arc::new(InMemorySecureStore::new());
        let store = SettingsStore::new(Arc::clone(&secure) as Arc<dyn SecureStore>);

        store.write_current(&sample_settings("1111")).unwrap();
        store.write_current(&sample_settings("2222")).unwrap();

        assert_eq!(secure.entry_count(SettingsStore::service_name()), 1);
        assert_eq!(store.read_current().unwrap().account.number, "2222");
    }

    #[test]
    fn read_current_rejects_legacy_shaped_payload() {
        let secure = Arc::new(InMemorySecureStore::new());
        secure
            .insert(
                SettingsStore::service_name().to_owned(),
                CURRENT_ATTRIBUTE.to_owned(),
                legacy_payload(),
            )
            .unwrap();

        let store = SettingsStore::new(secure);
        assert!(matches!(
            store.read_current(),
            Err(SettingsError::DecodeFailure { .. })
        ));
    }

    #[test]
    fn read_legacy_skips_current_entry_and_corrupt_payloads() {
        let secure = Arc::new(InMemorySecureStore::new());
        let service = SettingsStore::service_name().to_owned();
        secure
            .insert(service.clone(), String::new(), b"current marker".to_vec())
            .unwrap();
        secure
            .insert(service.clone(), "1111".to_owned(), legacy_payload())
            .unwrap();
        secure
            .insert(service, "2222".to_owned(), b"not json".to_vec())
            .unwrap();

        let store = SettingsStore::new(secure);
        let result = store.read_legacy().unwrap();

        assert_eq!(result.entry_count, 2);
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].account_number, "1111");
    }

    #[test]
    fn read_legacy_of_empty_store_is_empty_not_an_error() {
        let store = SettingsStore::new(Arc::new(InMemorySecureStore::new()));
        let result = store.read_legacy().unwrap();
        assert_eq!(result.entry_count, 0);
        assert!(result.records.is_empty());
    }

    #[test]
    fn delete_legacy_leaves_the_current_entry_alone() {
        let secure = Arc::new(InMemorySecureStore::new());
        let service = SettingsStore::service_name().to_owned();
        secure
            .insert(service.clone(), String::new(), b"current".to_vec())
            .unwrap();
        secure
            .insert(service.clone(), "1111".to_owned(), legacy_payload())
            .unwrap();
        secure
            .insert(service, "2222".to_owned(), legacy_payload())
            .unwrap();

        let store = SettingsStore::new(Arc::clone(&secure) as Arc<dyn SecureStore>);
        store.delete_legacy();

        assert_eq!(secure.entry_count(SettingsStore::service_name()), 1);
        assert!(secure
            .get(SettingsStore::service_name().to_owned(), String::new())
            .is_ok());
    }
}
