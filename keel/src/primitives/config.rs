use std::sync::OnceLock;

use crate::keel_export;

/// Global configuration for keel.
static CONFIG_INSTANCE: OnceLock<KeelConfig> = OnceLock::new();

/// The backend/device environment keel operates against.
///
/// The environment is part of the secure-store service namespace, so staging
/// and production builds installed on the same device never read each other's
/// settings records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum KeelEnvironment {
    /// Staging environment.
    Staging,
    /// Production environment.
    Production,
}

impl KeelEnvironment {
    /// Returns the string representation of the environment.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl std::fmt::Display for KeelEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Global configuration for keel.
#[derive(Debug, Clone, uniffi::Object)]
pub struct KeelConfig {
    environment: KeelEnvironment,
}

#[keel_export]
impl KeelConfig {
    /// Creates a new config with the specified environment.
    #[uniffi::constructor]
    #[must_use]
    pub fn new(environment: KeelEnvironment) -> Self {
        Self { environment }
    }

    /// Gets the configured environment.
    #[must_use]
    pub fn environment(&self) -> KeelEnvironment {
        self.environment
    }
}

/// Initializes the global keel configuration.
///
/// Should be called once at application startup, before any other keel
/// operation. Subsequent calls are ignored with a warning.
#[uniffi::export]
pub fn init_keel_config(environment: KeelEnvironment) {
    let config = KeelConfig::new(environment);

    match CONFIG_INSTANCE.set(config) {
        Ok(()) => {
            crate::info!("keel config initialized with environment: {environment}");
        }
        Err(_) => {
            crate::warn!("keel config already initialized, ignoring");
        }
    }
}

/// Gets the current environment, defaulting to `Production` when the config
/// was never initialized.
#[must_use]
pub fn current_environment() -> KeelEnvironment {
    CONFIG_INSTANCE.get().map_or_else(
        || {
            crate::warn!("keel config not initialized, defaulting to Production");
            KeelEnvironment::Production
        },
        KeelConfig::environment,
    )
}
