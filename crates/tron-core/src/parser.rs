//! Line parser for hub replies.
//!
//! Grammar:
//!
//! ```text
//! line     := commander WS command_id WS sender WS code (WS keywords)?
//! commander:= non-space token, dotted (e.g. `APO.craig`)
//! command_id := unsigned integer, 0 for broadcasts
//! sender   := non-space token, `<node>_<actor>` or just `<actor>`
//! code     := one character, see ReplyCode::from_char
//! keywords := keyword (';' keyword)*
//! keyword  := name | name '=' values
//! values   := value (',' value)*
//! ```
//!
//! Separators (`;` and `,`) inside `"…"` or `'…'` do not split.

use crate::reply::{Keyword, Reply, ReplyCode};
use crate::value::split_quoted;
use regex::Regex;
use std::sync::OnceLock;
use std::time::SystemTime;

fn line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(\S+)\s+(\d+)\s+(\S+)\s+(\S)(?:\s+(.*?))?\s*$").expect("valid reply regex")
    })
}

/// Error parsing a reply line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("line does not match reply grammar: {0:?}")]
    Malformed(String),
    #[error("command id out of range: {0}")]
    CommandId(String),
}

/// Parse a single line with an explicit sequence id and timestamp.
pub fn parse_line(
    line: &str,
    sequence_id: u64,
    timestamp: SystemTime,
) -> Result<Reply, ParseError> {
    let caps = line_regex()
        .captures(line)
        .ok_or_else(|| ParseError::Malformed(line.to_string()))?;

    let command_id = caps[2]
        .parse::<u64>()
        .map_err(|_| ParseError::CommandId(caps[2].to_string()))?;

    let code = caps[4]
        .chars()
        .next()
        .map(ReplyCode::from_char)
        .unwrap_or(ReplyCode::Unknown);

    let keywords = caps
        .get(5)
        .map(|m| parse_keywords(m.as_str()))
        .unwrap_or_default();

    Ok(Reply {
        sequence_id,
        timestamp,
        raw_line: line.to_string(),
        commander: caps[1].to_string(),
        sender: caps[3].to_string(),
        command_id,
        code,
        keywords,
    })
}

/// Parse the `;`-separated keyword section of a line.
pub fn parse_keywords(raw: &str) -> Vec<Keyword> {
    split_quoted(raw, ';')
        .into_iter()
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            let (name, values) = part.split_once('=').unwrap_or((part, ""));
            if name.trim().is_empty() {
                return None;
            }
            Some(Keyword::new(name, values))
        })
        .collect()
}

/// Stateful parser that numbers replies in arrival order.
#[derive(Debug, Default)]
pub struct LineParser {
    next_sequence: u64,
}

impl LineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one line. Sequence ids are only consumed by lines that parse.
    pub fn parse(&mut self, line: &str) -> Result<Reply, ParseError> {
        let reply = parse_line(line, self.next_sequence + 1, SystemTime::now())?;
        self.next_sequence += 1;
        Ok(reply)
    }

    /// Number of lines successfully parsed so far.
    pub fn parsed(&self) -> u64 {
        self.next_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn parse(line: &str) -> Result<Reply, ParseError> {
        parse_line(line, 1, SystemTime::UNIX_EPOCH)
    }

    #[test]
    fn axis_state_example() {
        let reply = parse("hub.me 7 tcc : AxisCmdState=Tracking, Tracking, Tracking").unwrap();
        assert_eq!(reply.commander, "hub.me");
        assert_eq!(reply.command_id, 7);
        assert_eq!(reply.sender, "tcc");
        assert_eq!(reply.actor(), "tcc");
        assert_eq!(reply.code, ReplyCode::Done);
        assert_eq!(reply.keywords.len(), 1);
        let kw = &reply.keywords[0];
        assert_eq!(kw.name, "axiscmdstate");
        assert_eq!(kw.values, vec![Value::String("Tracking".into()); 3]);
    }

    /// Wire line, command id, sender, actor, code, keyword names.
    const CORPUS: &[(&str, u64, &str, &str, ReplyCode, &[&str])] = &[
        (".hub 0 hub i version=\"2.1\"", 0, "hub", "hub", ReplyCode::Info, &["version"]),
        ("APO.craig 12 apo_tcc > ", 12, "apo_tcc", "tcc", ReplyCode::Running, &[]),
        ("APO.craig 12 apo_tcc :", 12, "apo_tcc", "tcc", ReplyCode::Done, &[]),
        (
            "hub.hub 0 keys_boss i exposureState=IDLE,0.0,0.0; shutterStatus=0x1",
            0,
            "keys_boss",
            "boss",
            ReplyCode::Info,
            &["exposurestate", "shutterstatus"],
        ),
        (
            "APO.craig 3 auth f why=\"bad password; go away\"",
            3,
            "auth",
            "auth",
            ReplyCode::Failed,
            &["why"],
        ),
        (
            "a.b 4 x_y_guider W Exposing; ;fwhm=1.2",
            4,
            "x_y_guider",
            "guider",
            ReplyCode::Warning,
            &["exposing", "fwhm"],
        ),
        ("a.b 5 mcp E text=\"oops\"", 5, "mcp", "mcp", ReplyCode::Error, &["text"]),
        ("a.b 6 mcp d", 6, "mcp", "mcp", ReplyCode::Debug, &[]),
        ("a.b 6 mcp ! ", 6, "mcp", "mcp", ReplyCode::Unknown, &[]),
        ("  a.b   8   tcc   i   k=1  ", 8, "tcc", "tcc", ReplyCode::Info, &["k"]),
    ];

    #[test]
    fn wire_corpus() {
        for (line, id, sender, actor, code, names) in CORPUS {
            let reply = parse(line).unwrap_or_else(|e| panic!("{line:?}: {e}"));
            assert_eq!(reply.command_id, *id, "{line:?}");
            assert_eq!(reply.sender, *sender, "{line:?}");
            assert_eq!(reply.actor(), *actor, "{line:?}");
            assert_eq!(reply.code, *code, "{line:?}");
            let got: Vec<&str> = reply.keywords.iter().map(|k| k.name.as_str()).collect();
            assert_eq!(got, *names, "{line:?}");
        }
    }

    #[test]
    fn rejects_malformed() {
        for line in [
            "",
            "not a valid line",
            "hub.me seven tcc : x=1",
            "hub.me 7 tcc",
            "hub.me -1 tcc : x=1",
            "hub.me 7 tcc :: x=1",
        ] {
            assert!(parse(line).is_err(), "{line:?} should not parse");
        }
    }

    #[test]
    fn oversized_command_id() {
        let err = parse("a.b 99999999999999999999999 tcc :").unwrap_err();
        assert!(matches!(err, ParseError::CommandId(_)));
    }

    #[test]
    fn semicolon_inside_quotes() {
        let reply = parse("APO.craig 3 auth f why=\"bad password; go away\"").unwrap();
        let why = reply.keyword("WHY").unwrap();
        assert_eq!(why.values, vec![Value::String("bad password; go away".into())]);
    }

    #[test]
    fn sequence_ids_skip_failures() {
        let mut parser = LineParser::new();
        assert!(parser.parse("garbage").is_err());
        let first = parser.parse("a.b 1 tcc i x=1").unwrap();
        let second = parser.parse("a.b 1 tcc : x=2").unwrap();
        assert_eq!(first.sequence_id, 1);
        assert_eq!(second.sequence_id, 2);
        assert_eq!(parser.parsed(), 2);
    }
}
