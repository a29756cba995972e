//! Client error types.

/// Why an authorisation attempt failed.
///
/// Every variant except [`AuthError::NotConnected`] leaves the connection
/// disconnected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("not connected to the hub")]
    NotConnected,
    #[error("no password stored for {account}")]
    NoPassword { account: String },
    #[error("hub rejected login: {reason}")]
    Rejected { reason: String },
    #[error("hub did not send a nonce")]
    MissingNonce,
    #[error("connection to the hub was lost during login")]
    ConnectionLost,
}

impl AuthError {
    /// Human-readable reason, as shown to the operator.
    pub fn reason(&self) -> String {
        match self {
            AuthError::Rejected { reason } => reason.clone(),
            other => other.to_string(),
        }
    }
}
