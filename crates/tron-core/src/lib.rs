//! Core types for the tron hub protocol.
//!
//! This crate has no I/O. It turns reply lines into typed [`Reply`] values
//! and defines the status flags shared by the client and its hosts.

mod commander;
mod parser;
mod reply;
mod status;
mod value;

pub use commander::Commander;
pub use parser::{LineParser, ParseError, parse_keywords, parse_line};
pub use reply::{Keyword, Reply, ReplyCode};
pub use status::ConnectionStatus;
pub use value::{Value, parse_values, split_values};
