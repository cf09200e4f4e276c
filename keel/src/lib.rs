#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    dead_code
)]

//! `keel` is the foundational library which powers the Keel VPN client apps.
//! It owns the versioned, crash-safe migration of the on-device tunnel
//! settings record and the rotation of the tunnel's private key against the
//! backend, exposing a small async surface to the native apps over UniFFI.

/// Account lifecycle operations and the serialized session worker.
pub mod account;

/// Contract for the remote account/device backend the native app implements.
pub mod gateway;

/// Typed access to the OS-protected secure store which persists tunnel settings.
pub mod keychain;

/// Contract for platform-side key pair generation.
pub mod keygen;

/// Introduces logging functionality that can be integrated with foreign language bindings.
pub mod logger;

/// Schema migration of legacy settings records into the current format.
pub mod migration;

/// Introduces low level primitives shared across the library.
pub mod primitives;

/// Key rotation against the remote backend with throttling and durable staging.
pub mod rotation;

/// The persisted settings schema, its legacy predecessor and FFI snapshots.
pub mod settings;

/// Contract for the OS tunnel-provider configuration list.
pub mod tunnel;

#[cfg(test)]
mod test_utils;

pub use keel_macros::{keel_error, keel_export};

uniffi::setup_scaffolding!("keel");
