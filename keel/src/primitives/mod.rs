/// Global library configuration (environment selection).
pub mod config;

/// Non-secure device key-value store implemented by the native app.
pub mod key_value_store;

pub use config::{current_environment, init_keel_config, KeelEnvironment};
pub use key_value_store::{DeviceKeyValueStore, KeyValueStoreError};
