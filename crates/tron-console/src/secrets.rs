//! OS keyring password lookup.

use tron_client::{MemorySecretStore, SecretStore};

/// Reads hub passwords from the OS keychain / Secret Service.
#[derive(Debug, Default)]
pub struct KeyringSecretStore;

impl SecretStore for KeyringSecretStore {
    fn password(&self, service: &str, account: &str) -> Option<String> {
        let entry = match ::keyring::Entry::new(service, account) {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(%error, service, account, "keyring unavailable");
                return None;
            }
        };
        match entry.get_password() {
            Ok(password) => Some(password),
            Err(::keyring::Error::NoEntry) => None,
            Err(error) => {
                tracing::warn!(%error, service, account, "keyring lookup failed");
                None
            }
        }
    }
}

/// A store holding one password taken from an environment variable.
pub fn from_env(var: &str, service: &str, account: &str) -> Option<MemorySecretStore> {
    let password = std::env::var(var).ok().filter(|p| !p.is_empty())?;
    Some(MemorySecretStore::new().with_password(service, account, &password))
}
