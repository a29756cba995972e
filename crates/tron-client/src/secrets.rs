//! Password lookup seam.
//!
//! The client never stores credentials itself. Hosts provide a
//! [`SecretStore`]; the console binary backs it with the OS keyring.

use std::collections::HashMap;
use std::sync::RwLock;

/// Read-only access to stored hub passwords.
pub trait SecretStore: Send + Sync {
    /// Password for `account` under `service`, if one is stored.
    fn password(&self, service: &str, account: &str) -> Option<String>;
}

/// In-memory secret store.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: RwLock<HashMap<(String, String), String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_password(self, service: &str, account: &str, password: &str) -> Self {
        self.set(service, account, password);
        self
    }

    pub fn set(&self, service: &str, account: &str, password: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert((service.to_string(), account.to_string()), password.to_string());
    }
}

impl SecretStore for MemorySecretStore {
    fn password(&self, service: &str, account: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&(service.to_string(), account.to_string()))
            .cloned()
    }
}
