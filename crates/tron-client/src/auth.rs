//! Login handshake pieces.
//!
//! 1. `auth knockKnock` - the hub answers with a `nonce` keyword.
//! 2. `auth login password=<sha1(nonce + password)> ...`
//!
//! Either step failing carries the hub's explanation in a `why` keyword.

use crate::command::Command;
use crate::config::ClientIdentity;
use sha1::{Digest, Sha1};

pub(crate) const KNOCK_COMMAND: &str = "auth knockKnock";

const DEFAULT_FAILURE: &str = "authentication failed";

/// Lower-case hex SHA-1 of `nonce` followed by `password`.
pub fn password_hash(nonce: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Text of the `auth login` command.
pub fn login_command(
    hash: &str,
    user: &str,
    program: &str,
    client_type: &str,
    identity: &ClientIdentity,
) -> String {
    format!(
        "auth login password={hash} username=\"{user}\" program=\"{}\" type={client_type} version={} platform=\"{}\"",
        program.to_uppercase(),
        identity.version,
        identity.platform,
    )
}

/// The nonce from the earliest reply that carries one.
pub(crate) fn nonce(knock: &Command) -> Option<String> {
    knock.keyword("nonce").and_then(|kw| kw.first_text())
}

/// The hub's `why` text for a failed step, or a generic message.
pub(crate) fn failure_reason(command: &Command) -> String {
    command
        .keyword("why")
        .and_then(|kw| kw.first_text())
        .filter(|why| !why.is_empty())
        .or_else(|| command.abandoned_reason())
        .unwrap_or_else(|| DEFAULT_FAILURE.to_string())
}
