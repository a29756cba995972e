//! Typed keyword values.
//!
//! A keyword's payload is a comma-separated list of tokens. Each token is
//! classified independently:
//!
//! - `t` / `f` (any case) - boolean
//! - anything that reads fully as a decimal number - number
//! - `"quoted"` or an unquoted run without quotes - string
//! - anything else - the raw token as a string
//!
//! Classification never fails. A token that looks almost numeric (`1.2.3`)
//! simply stays a string.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single typed value from a keyword's value list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    String(String),
}

impl Value {
    /// Classify one token. Surrounding whitespace is ignored.
    pub fn parse(token: &str) -> Self {
        let token = token.trim();

        if token.eq_ignore_ascii_case("f") {
            return Value::Bool(false);
        }
        if token.eq_ignore_ascii_case("t") {
            return Value::Bool(true);
        }

        if let Some(n) = parse_number(token) {
            return Value::Number(n);
        }

        if let Some(inner) = strip_double_quotes(token) {
            return Value::String(inner.to_string());
        }

        Value::String(token.to_string())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(true) => f.write_str("T"),
            Value::Bool(false) => f.write_str("F"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
        }
    }
}

/// Parse a list of comma-separated tokens into values.
pub fn parse_values(raw: &str) -> Vec<Value> {
    split_values(raw).iter().map(|t| Value::parse(t)).collect()
}

/// Split a comma-separated value list into trimmed tokens.
///
/// Commas inside a matching pair of `"` or `'` quotes do not separate.
pub fn split_values(raw: &str) -> Vec<String> {
    split_quoted(raw, ',')
        .into_iter()
        .map(|t| t.trim().to_string())
        .collect()
}

/// Split `raw` on `sep`, ignoring separators inside `"…"` or `'…'`.
///
/// Quote characters are kept in the output. An unterminated quote runs to
/// the end of the input.
pub(crate) fn split_quoted(raw: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in raw.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == sep => {
                parts.push(&raw[start..i]);
                start = i + c.len_utf8();
            }
            None => {}
        }
    }
    parts.push(&raw[start..]);
    parts
}

fn parse_number(token: &str) -> Option<f64> {
    // f64::from_str also accepts "inf", "NaN" and friends, which are
    // plain strings on the wire.
    let numeric_chars = token
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'));
    if !numeric_chars || !token.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    token.parse::<f64>().ok()
}

fn strip_double_quotes(token: &str) -> Option<&str> {
    if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') {
        Some(&token[1..token.len() - 1])
    } else {
        None
    }
}
