//! Client for the tron hub.
//!
//! [`Connection`] owns the socket and exposes the operations a console
//! needs: connect, log in, send commands and follow keywords.

mod auth;
mod codec;
mod command;
mod config;
mod connection;
mod error;
mod keywords;
mod registry;
mod secrets;

pub use auth::{login_command, password_hash};
pub use codec::LineCodec;
pub use command::{Command, CommandStatus};
pub use config::{ClientConfig, ClientIdentity};
pub use connection::{CONNECT_TIMEOUT, Connection, Connector, HubStream, TcpConnector};
pub use error::AuthError;
pub use keywords::{
    ActorKeyword, KeywordListener, KeywordStore, ListenerId, Pattern, SubscribeOutcome,
};
pub use registry::CommandRegistry;
pub use secrets::{MemorySecretStore, SecretStore};
