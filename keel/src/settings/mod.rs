//! Serialized tunnel settings schemas.
//!
//! Two schemas coexist in the secure store: the current [`TunnelSettings`]
//! shape stored under the fixed empty attribute, and the pre-migration
//! [`LegacySettings`] shape stored under the owning account number. There is
//! no explicit version field; a payload that fails to decode as
//! `TunnelSettings` is by definition not a current record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Account credentials held by the current record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAccountData {
    /// The account number, immutable for the lifetime of the record.
    pub number: String,
    /// When the account's paid time runs out.
    pub expiry: DateTime<Utc>,
}

/// Identity of the device registered with the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDeviceData {
    /// When the device was registered.
    pub creation_date: DateTime<Utc>,
    /// Server-assigned device identifier.
    pub identifier: String,
    /// Human-readable device name.
    pub name: String,
}

/// A WireGuard key pair. Both halves are opaque base64 strings; key
/// generation happens in the native app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    /// The private key, base64 encoded.
    pub private_key: String,
    /// The public key, base64 encoded.
    pub public_key: String,
}

/// Tunnel interface configuration, including the key material rotation
/// operates on.
///
/// Invariant: `next_key` is cleared in the same write that promotes it to
/// `key`. The two are never both freshly rotated in a persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceData {
    /// When `key` became the active key. Age basis for rotation throttling.
    pub creation_date: DateTime<Utc>,
    /// The active key pair.
    pub key: KeyPair,
    /// A generated successor staged durably before the remote service has
    /// confirmed it. Retained across failed or cancelled rotations.
    pub next_key: Option<KeyPair>,
    /// Tunnel addresses assigned by the remote service for `key`.
    pub addresses: Vec<String>,
}

/// Relay selection constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConstraints {
    /// Location constraint, `None` meaning any location.
    pub location: Option<String>,
    /// Relay port constraint, `None` meaning any port.
    pub port: Option<u16>,
}

/// DNS configuration for the tunnel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsSettings {
    /// Whether custom DNS servers are in use.
    pub custom: bool,
    /// Custom DNS server addresses. Ignored unless `custom` is set.
    pub addresses: Vec<String>,
}

/// The current-schema settings record. Exactly one exists in the secure
/// store at any time, under the fixed empty attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelSettings {
    /// The account the settings belong to.
    pub account: StoredAccountData,
    /// The registered device, absent until device registration succeeds.
    pub device: Option<StoredDeviceData>,
    /// Interface and key material.
    pub interface: InterfaceData,
    /// Relay selection constraints.
    #[serde(default)]
    pub relay_constraints: RelayConstraints,
    /// DNS configuration.
    #[serde(default)]
    pub dns_settings: DnsSettings,
}

/// Interface data as stored by the pre-migration schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyInterfaceData {
    /// When the key was created.
    pub creation_date: DateTime<Utc>,
    /// The active key pair.
    pub key: KeyPair,
    /// Assigned tunnel addresses.
    pub addresses: Vec<String>,
}

/// The pre-migration settings payload, stored under the account number it
/// belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacySettings {
    /// Interface and key material in the old shape.
    pub interface: LegacyInterfaceData,
    /// Relay selection constraints.
    #[serde(default)]
    pub relay_constraints: RelayConstraints,
}

/// A decoded legacy entry paired with the account number it was stored
/// under.
#[derive(Debug, Clone)]
pub struct LegacyRecord {
    /// The account number the entry was keyed by.
    pub account_number: String,
    /// The decoded legacy payload.
    pub settings: LegacySettings,
}

impl TunnelSettings {
    /// Builds a fresh record for a newly set account, with default relay and
    /// DNS settings and no registered device.
    #[must_use]
    pub fn new(account: StoredAccountData, interface: InterfaceData) -> Self {
        Self {
            account,
            device: None,
            interface,
            relay_constraints: RelayConstraints::default(),
            dns_settings: DnsSettings::default(),
        }
    }

    /// Builds a current-schema record from a migrated legacy payload and a
    /// freshly fetched account expiry. The migrated record carries no
    /// device; one is registered on the next account operation.
    #[must_use]
    pub fn from_legacy(account_number: String, expiry: DateTime<Utc>, legacy: LegacySettings) -> Self {
        Self {
            account: StoredAccountData {
                number: account_number,
                expiry,
            },
            device: None,
            interface: InterfaceData {
                creation_date: legacy.interface.creation_date,
                key: legacy.interface.key,
                next_key: None,
                addresses: legacy.interface.addresses,
            },
            relay_constraints: legacy.relay_constraints,
            dns_settings: DnsSettings::default(),
        }
    }
}

/// Snapshot of the registered device, exposed over FFI.
#[derive(Debug, Clone, uniffi::Record)]
pub struct DeviceSnapshot {
    /// When the device was registered.
    pub created: SystemTime,
    /// Server-assigned device identifier.
    pub identifier: String,
    /// Human-readable device name.
    pub name: String,
}

/// Read-only snapshot of the session's settings, exposed over FFI.
#[derive(Debug, Clone, uniffi::Record)]
pub struct SettingsSnapshot {
    /// The account number.
    pub account_number: String,
    /// When the account's paid time runs out.
    pub account_expiry: SystemTime,
    /// The registered device, if any.
    pub device: Option<DeviceSnapshot>,
    /// When the active key became current.
    pub key_created: SystemTime,
    /// The public half of the active key, base64 encoded.
    pub public_key: String,
    /// Tunnel addresses assigned for the active key.
    pub addresses: Vec<String>,
}

impl From<&TunnelSettings> for SettingsSnapshot {
    fn from(settings: &TunnelSettings) -> Self {
        Self {
            account_number: settings.account.number.clone(),
            account_expiry: settings.account.expiry.into(),
            device: settings.device.as_ref().map(|device| DeviceSnapshot {
                created: device.creation_date.into(),
                identifier: device.identifier.clone(),
                name: device.name.clone(),
            }),
            key_created: settings.interface.creation_date.into(),
            public_key: settings.interface.key.public_key.clone(),
            addresses: settings.interface.addresses.clone(),
        }
    }
}
