//! Client configuration and host identity.

use serde::{Deserialize, Serialize};

/// Settings read from the host application's config store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Observatory name, used to scope stored passwords.
    pub observatory: String,
    /// `actor.key` names whose full history is kept.
    pub history_keys: Vec<String>,
    /// Maximum entries kept per history key.
    pub history_depth: usize,
    /// Maximum keys per `keys getFor` request.
    pub refresh_chunk_size: usize,
    /// Secret store service name holding hub passwords.
    pub secret_service: String,
    /// Client type sent at login.
    pub client_type: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            observatory: "APO".to_string(),
            history_keys: Vec::new(),
            history_depth: 1000,
            refresh_chunk_size: 50,
            secret_service: "tron-console".to_string(),
            client_type: "tron-console".to_string(),
        }
    }
}

impl ClientConfig {
    /// Secret store account for `user` at the configured observatory.
    pub fn password_account(&self, user: &str) -> String {
        format!("{user}@{}", self.observatory.to_lowercase())
    }
}

/// Version and platform reported to the hub at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub version: String,
    /// `<os>-<release>-<arch>`
    pub platform: String,
}

impl ClientIdentity {
    pub fn new(version: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            platform: platform.into(),
        }
    }

    /// Identity of the running host with the given application version.
    pub fn detect(version: impl Into<String>) -> Self {
        let info = os_info::get();
        let platform = format!(
            "{}-{}-{}",
            std::env::consts::OS,
            info.version(),
            std::env::consts::ARCH
        );
        Self::new(version, platform.replace(' ', "_"))
    }
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self::detect(env!("CARGO_PKG_VERSION"))
    }
}
