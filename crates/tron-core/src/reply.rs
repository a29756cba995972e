//! Reply envelopes.
//!
//! Every line the hub sends is a reply: either to a command we issued
//! (matched by command id) or an unsolicited broadcast (id `0`) or a reply to
//! some other client's command. All of them carry keywords.

use crate::value::{Value, parse_values};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Status tag carried by every reply line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyCode {
    Info,
    Warning,
    Error,
    Debug,
    Failed,
    Done,
    Running,
    /// Synthetic; never sent by the hub.
    Started,
    Unknown,
}

impl ReplyCode {
    /// Map a wire code character.
    pub fn from_char(c: char) -> Self {
        match c {
            'i' | 'I' => ReplyCode::Info,
            'w' | 'W' => ReplyCode::Warning,
            'e' | 'E' => ReplyCode::Error,
            'd' | 'D' => ReplyCode::Debug,
            'f' | 'F' => ReplyCode::Failed,
            ':' => ReplyCode::Done,
            '>' => ReplyCode::Running,
            's' | 'S' => ReplyCode::Started,
            _ => ReplyCode::Unknown,
        }
    }

    /// The wire character for this code.
    pub fn as_char(self) -> char {
        match self {
            ReplyCode::Info => 'i',
            ReplyCode::Warning => 'w',
            ReplyCode::Error => 'e',
            ReplyCode::Debug => 'd',
            ReplyCode::Failed => 'f',
            ReplyCode::Done => ':',
            ReplyCode::Running => '>',
            ReplyCode::Started => 's',
            ReplyCode::Unknown => '?',
        }
    }

    /// Whether this code finishes the command it replies to.
    pub fn is_terminal(self) -> bool {
        matches!(self, ReplyCode::Done | ReplyCode::Failed | ReplyCode::Error)
    }

    /// Whether this code finishes the command unsuccessfully.
    pub fn is_failure(self) -> bool {
        matches!(self, ReplyCode::Failed | ReplyCode::Error)
    }
}

/// A named keyword and its values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    /// Lower-cased keyword name.
    pub name: String,
    pub values: Vec<Value>,
    /// The value list as it appeared on the wire, after `=`.
    pub raw: String,
}

impl Keyword {
    /// Build a keyword from its name and the raw text after `=`.
    pub fn new(name: &str, raw: &str) -> Self {
        let raw = raw.trim();
        Self {
            name: name.trim().to_lowercase(),
            values: if raw.is_empty() {
                Vec::new()
            } else {
                parse_values(raw)
            },
            raw: raw.to_string(),
        }
    }

    pub fn first(&self) -> Option<&Value> {
        self.values.first()
    }

    /// The first value's wire text with surrounding double quotes removed.
    ///
    /// Unlike [`Value`]'s `Display`, this preserves the exact spelling of
    /// numeric tokens (`0123` stays `0123`).
    pub fn first_text(&self) -> Option<String> {
        if self.raw.is_empty() {
            return None;
        }
        let token = crate::value::split_values(&self.raw).into_iter().next()?;
        let token = token
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .map(str::to_string)
            .unwrap_or(token);
        Some(token)
    }
}

/// One parsed line from the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Local arrival order, assigned by the parser.
    pub sequence_id: u64,
    pub timestamp: SystemTime,
    pub raw_line: String,
    pub commander: String,
    pub sender: String,
    /// `0` for unsolicited broadcasts.
    pub command_id: u64,
    pub code: ReplyCode,
    pub keywords: Vec<Keyword>,
}

impl Reply {
    /// The actor that produced this reply: the last `_`-separated segment of
    /// the sender.
    pub fn actor(&self) -> &str {
        self.sender.rsplit('_').next().unwrap_or(&self.sender)
    }

    /// Look up a keyword by name (case-insensitive).
    pub fn keyword(&self, name: &str) -> Option<&Keyword> {
        self.keywords
            .iter()
            .find(|k| k.name.eq_ignore_ascii_case(name))
    }

    pub fn is_broadcast(&self) -> bool {
        self.command_id == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_table() {
        for (c, code) in [
            ('i', ReplyCode::Info),
            ('I', ReplyCode::Info),
            ('w', ReplyCode::Warning),
            ('W', ReplyCode::Warning),
            ('e', ReplyCode::Error),
            ('E', ReplyCode::Error),
            ('d', ReplyCode::Debug),
            ('f', ReplyCode::Failed),
            ('F', ReplyCode::Failed),
            (':', ReplyCode::Done),
            ('>', ReplyCode::Running),
            ('s', ReplyCode::Started),
            ('x', ReplyCode::Unknown),
        ] {
            assert_eq!(ReplyCode::from_char(c), code, "code {c:?}");
        }
    }

    #[test]
    fn terminal_codes() {
        assert!(ReplyCode::Done.is_terminal());
        assert!(ReplyCode::Failed.is_terminal());
        assert!(ReplyCode::Error.is_terminal());
        assert!(!ReplyCode::Running.is_terminal());
        assert!(!ReplyCode::Warning.is_terminal());
        assert!(!ReplyCode::Done.is_failure());
    }

    #[test]
    fn keyword_keeps_raw_text() {
        let kw = Keyword::new("Nonce", "0123");
        assert_eq!(kw.name, "nonce");
        assert_eq!(kw.values, vec![Value::Number(123.0)]);
        assert_eq!(kw.first_text().as_deref(), Some("0123"));

        let quoted = Keyword::new("why", "\"bad password\"");
        assert_eq!(quoted.first_text().as_deref(), Some("bad password"));
    }

    #[test]
    fn bare_keyword_has_no_values() {
        let kw = Keyword::new("Exposing", "");
        assert!(kw.values.is_empty());
        assert!(kw.first_text().is_none());
    }

    #[test]
    fn keyword_serializes_plain_values() {
        let kw = Keyword::new("axisCmdState", "Tracking, 1.5, T");
        let json = serde_json::to_value(&kw).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "axiscmdstate",
                "values": ["Tracking", 1.5, true],
                "raw": "Tracking, 1.5, T",
            })
        );
    }
}
