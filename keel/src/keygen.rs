//! Contract for WireGuard key generation.
//!
//! Key material is generated by the native app so private keys can be
//! produced with the platform's preferred cryptographic provider; keel only
//! handles the resulting pair as opaque base64 strings.

use thiserror::Error;

use crate::settings::KeyPair;

/// Errors reported by the key generator.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Error, uniffi::Error)]
pub enum KeyGeneratorError {
    /// The platform failed to produce a key pair.
    #[error("key generation failed: {reason}")]
    GenerationFailed {
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

impl From<uniffi::UnexpectedUniFFICallbackError> for KeyGeneratorError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::UnexpectedUniFFICallbackError { reason: e.reason }
    }
}

/// Generates WireGuard key pairs, implemented by the native app.
#[uniffi::export(with_foreign)]
pub trait KeyGenerator: Send + Sync {
    /// Generates a fresh key pair.
    ///
    /// # Errors
    /// - `KeyGeneratorError::GenerationFailed` if the platform cannot
    ///   produce a key
    fn generate_key_pair(&self) -> Result<KeyPair, KeyGeneratorError>;
}
