//! Shared mock collaborators for unit tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};

use crate::gateway::{
    AccountData, AccountsGateway, AssignedAddresses, DeviceRecord, GatewayError, RetryStrategy,
};
use crate::keygen::{KeyGenerator, KeyGeneratorError};
use crate::settings::KeyPair;
use crate::tunnel::{TunnelConfigurationStore, TunnelStoreError};

/// How the mock gateway answers its next calls.
#[derive(Debug, Clone, Copy)]
pub enum GatewayBehavior {
    /// Every call succeeds with canned data.
    Succeed,
    /// Every call fails with `GatewayError::RequestFailed`.
    Fail,
    /// Every call suspends forever. Useful for exercising cancellation and
    /// in-flight overlap.
    Hang,
}

/// Programmable in-process stand-in for the remote gateway.
pub struct MockGateway {
    behavior: Mutex<GatewayBehavior>,
    /// Overrides `behavior` for `create_device` when set.
    pub create_device_behavior: Mutex<Option<GatewayBehavior>>,
    pub get_account_calls: AtomicU32,
    pub create_device_calls: AtomicU32,
    pub rotate_key_calls: AtomicU32,
    pub delete_device_calls: AtomicU32,
    /// Returned by `delete_device` on success.
    pub delete_was_already_deleted: AtomicBool,
    /// The public key most recently submitted to `rotate_device_key` or
    /// `create_device`.
    pub last_submitted_key: Mutex<Option<String>>,
}

impl MockGateway {
    pub fn new(behavior: GatewayBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            create_device_behavior: Mutex::new(None),
            get_account_calls: AtomicU32::new(0),
            create_device_calls: AtomicU32::new(0),
            rotate_key_calls: AtomicU32::new(0),
            delete_device_calls: AtomicU32::new(0),
            delete_was_already_deleted: AtomicBool::new(false),
            last_submitted_key: Mutex::new(None),
        }
    }

    pub fn set_behavior(&self, behavior: GatewayBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    fn behavior(&self) -> GatewayBehavior {
        *self.behavior.lock().unwrap()
    }

    pub fn account_expiry() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2027, 3, 15, 0, 0, 0).unwrap()
    }

    pub fn assigned_addresses() -> (String, String) {
        ("10.64.0.2/32".to_owned(), "fc00:bbbb::2/128".to_owned())
    }

    async fn hang() {
        std::future::pending::<()>().await;
    }

    fn failure() -> GatewayError {
        GatewayError::RequestFailed {
            reason: "mock failure".to_owned(),
        }
    }
}

#[async_trait::async_trait]
impl AccountsGateway for MockGateway {
    async fn get_account_data(
        &self,
        account_number: String,
        _retry_strategy: RetryStrategy,
    ) -> Result<AccountData, GatewayError> {
        self.get_account_calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior() {
            GatewayBehavior::Succeed => Ok(AccountData {
                id: format!("acct-{account_number}"),
                expiry: Self::account_expiry().into(),
            }),
            GatewayBehavior::Fail => Err(Self::failure()),
            GatewayBehavior::Hang => {
                Self::hang().await;
                unreachable!()
            }
        }
    }

    async fn create_device(
        &self,
        _account_number: String,
        public_key: String,
        _retry_strategy: RetryStrategy,
    ) -> Result<DeviceRecord, GatewayError> {
        self.create_device_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_submitted_key.lock().unwrap() = Some(public_key);
        let behavior = self
            .create_device_behavior
            .lock()
            .unwrap()
            .unwrap_or_else(|| self.behavior());
        match behavior {
            GatewayBehavior::Succeed => {
                let (ipv4, ipv6) = Self::assigned_addresses();
                Ok(DeviceRecord {
                    id: "device-1".to_owned(),
                    name: "brave newt".to_owned(),
                    created: std::time::SystemTime::now(),
                    ipv4_address: ipv4,
                    ipv6_address: ipv6,
                })
            }
            GatewayBehavior::Fail => Err(Self::failure()),
            GatewayBehavior::Hang => {
                Self::hang().await;
                unreachable!()
            }
        }
    }

    async fn rotate_device_key(
        &self,
        _account_number: String,
        _device_id: String,
        public_key: String,
        _retry_strategy: RetryStrategy,
    ) -> Result<AssignedAddresses, GatewayError> {
        self.rotate_key_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_submitted_key.lock().unwrap() = Some(public_key);
        match self.behavior() {
            GatewayBehavior::Succeed => {
                let (ipv4, ipv6) = Self::assigned_addresses();
                Ok(AssignedAddresses { ipv4, ipv6 })
            }
            GatewayBehavior::Fail => Err(Self::failure()),
            GatewayBehavior::Hang => {
                Self::hang().await;
                unreachable!()
            }
        }
    }

    async fn delete_device(
        &self,
        _account_number: String,
        _device_id: String,
        _retry_strategy: RetryStrategy,
    ) -> Result<bool, GatewayError> {
        self.delete_device_calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior() {
            GatewayBehavior::Succeed => {
                Ok(self.delete_was_already_deleted.load(Ordering::SeqCst))
            }
            GatewayBehavior::Fail => Err(Self::failure()),
            GatewayBehavior::Hang => {
                Self::hang().await;
                unreachable!()
            }
        }
    }
}

/// Deterministic key generator producing `priv-N`/`pub-N` pairs.
pub struct MockKeyGenerator {
    counter: AtomicU32,
    pub fail: AtomicBool,
}

impl MockKeyGenerator {
    pub fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn generated_count(&self) -> u32 {
        self.counter.load(Ordering::SeqCst)
    }
}

impl KeyGenerator for MockKeyGenerator {
    fn generate_key_pair(&self) -> Result<KeyPair, KeyGeneratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(KeyGeneratorError::GenerationFailed {
                reason: "mock failure".to_owned(),
            });
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(KeyPair {
            private_key: format!("priv-{n}"),
            public_key: format!("pub-{n}"),
        })
    }
}

/// In-memory stand-in for the OS tunnel configuration store.
pub struct MockTunnelStore {
    pub identifiers: Mutex<Vec<String>>,
    pub fail_removal: AtomicBool,
}

impl MockTunnelStore {
    pub fn new(identifiers: Vec<String>) -> Self {
        Self {
            identifiers: Mutex::new(identifiers),
            fail_removal: AtomicBool::new(false),
        }
    }
}

impl TunnelConfigurationStore for MockTunnelStore {
    fn load_all_from_preferences(&self) -> Result<Vec<String>, TunnelStoreError> {
        Ok(self.identifiers.lock().unwrap().clone())
    }

    fn remove_from_preferences(&self, identifier: String) -> Result<(), TunnelStoreError> {
        if self.fail_removal.load(Ordering::SeqCst) {
            return Err(TunnelStoreError::OperationFailed {
                reason: "mock failure".to_owned(),
            });
        }
        self.identifiers.lock().unwrap().retain(|id| *id != identifier);
        Ok(())
    }
}
