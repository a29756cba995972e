//! Latest-value keyword store with pattern subscriptions.
//!
//! Keywords are stored under `actor.key` (lower-case). Listeners subscribe
//! with patterns of three shapes:
//!
//! - `*` - every keyword
//! - `actor.*` - every keyword of one actor
//! - `actor.key` - one keyword
//!
//! A `*` inside the key part (`tcc.axis*`) is accepted and matched as a glob.
//!
//! Listeners are channel senders. When a listener's receiver has been
//! dropped, the next delivery fails and the listener is removed.

use crate::config::ClientConfig;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tron_core::{Keyword, Reply};

/// A keyword together with the actor that owns it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActorKeyword {
    pub actor: String,
    pub keyword: Keyword,
}

impl ActorKeyword {
    /// The store key, `actor.key`.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.actor, self.keyword.name)
    }
}

impl fmt::Display for ActorKeyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}={}", self.actor, self.keyword.name, self.keyword.raw)
    }
}

/// Process-unique listener handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Sending half of a keyword subscription.
#[derive(Debug, Clone)]
pub struct KeywordListener {
    id: ListenerId,
    tx: mpsc::UnboundedSender<ActorKeyword>,
}

impl KeywordListener {
    /// Create a listener and the receiver its updates arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ActorKeyword>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ListenerId::next(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Returns false if the receiving side is gone.
    fn deliver(&self, update: ActorKeyword) -> bool {
        self.tx.send(update).is_ok()
    }
}

/// A validated subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    All,
    Actor(String),
    Key { actor: String, key: String },
}

fn pattern_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(\*|[a-z]+\.[a-z*]+)$").expect("valid pattern regex"))
}

impl Pattern {
    /// Validate and normalise (lower-case) a pattern.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if !pattern_regex().is_match(raw) {
            return None;
        }
        let raw = raw.to_lowercase();
        if raw == "*" {
            return Some(Pattern::All);
        }
        let (actor, key) = raw.split_once('.')?;
        if key == "*" {
            Some(Pattern::Actor(actor.to_string()))
        } else {
            Some(Pattern::Key {
                actor: actor.to_string(),
                key: key.to_string(),
            })
        }
    }

    pub fn matches(&self, actor: &str, key: &str) -> bool {
        match self {
            Pattern::All => true,
            Pattern::Actor(a) => a == actor,
            Pattern::Key { actor: a, key: k } => a == actor && glob_match(k, key),
        }
    }

    /// The `(actor, key)` pair if this pattern names exactly one keyword.
    pub fn concrete(&self) -> Option<(&str, &str)> {
        match self {
            Pattern::Key { actor, key } if !key.contains('*') => Some((actor, key)),
            _ => None,
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::All => f.write_str("*"),
            Pattern::Actor(actor) => write!(f, "{actor}.*"),
            Pattern::Key { actor, key } => write!(f, "{actor}.{key}"),
        }
    }
}

/// `*` matches any run of characters, everything else matches literally.
fn glob_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };
    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(i) => rest = &rest[i + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

/// Result of a subscribe call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOutcome {
    /// Normalised patterns that were registered.
    pub accepted: Vec<String>,
    /// Patterns that failed validation, as given.
    pub rejected: Vec<String>,
    /// `keys getFor=...` command texts to send to the hub.
    pub refresh_commands: Vec<String>,
}

#[derive(Debug)]
struct Subscription {
    pattern: Pattern,
    listeners: HashSet<ListenerId>,
}

/// Latest keyword values plus listener registry.
#[derive(Debug)]
pub struct KeywordStore {
    latest: HashMap<String, ActorKeyword>,
    history: HashMap<String, VecDeque<ActorKeyword>>,
    history_keys: HashSet<String>,
    history_depth: usize,
    refresh_chunk_size: usize,
    subscriptions: BTreeMap<String, Subscription>,
    listeners: HashMap<ListenerId, KeywordListener>,
}

impl Default for KeywordStore {
    fn default() -> Self {
        Self::new(&ClientConfig::default())
    }
}

impl KeywordStore {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            latest: HashMap::new(),
            history: HashMap::new(),
            history_keys: config.history_keys.iter().map(|k| k.to_lowercase()).collect(),
            history_depth: config.history_depth.max(1),
            refresh_chunk_size: config.refresh_chunk_size.max(1),
            subscriptions: BTreeMap::new(),
            listeners: HashMap::new(),
        }
    }

    /// Store every keyword of a reply under the reply's actor.
    ///
    /// Returns the number of deliveries made.
    pub fn ingest(&mut self, reply: &Reply) -> usize {
        let actor = reply.actor();
        reply
            .keywords
            .iter()
            .map(|kw| self.update(actor, kw.clone()))
            .sum()
    }

    /// Replace the stored value of `actor.key` and notify listeners.
    pub fn update(&mut self, actor: &str, keyword: Keyword) -> usize {
        let entry = ActorKeyword {
            actor: actor.to_lowercase(),
            keyword,
        };
        let name = entry.full_name();

        if self.history_keys.contains(&name) {
            let history = self.history.entry(name.clone()).or_default();
            history.push_back(entry.clone());
            while history.len() > self.history_depth {
                history.pop_front();
            }
        }

        self.latest.insert(name, entry.clone());
        self.notify(&entry)
    }

    /// Deliver `entry` to every listener whose pattern matches it.
    ///
    /// A listener subscribed under several matching patterns receives the
    /// update once.
    fn notify(&mut self, entry: &ActorKeyword) -> usize {
        let targets: BTreeSet<ListenerId> = self
            .subscriptions
            .values()
            .filter(|s| s.pattern.matches(&entry.actor, &entry.keyword.name))
            .flat_map(|s| s.listeners.iter().copied())
            .collect();

        let mut delivered = 0;
        for id in targets {
            let ok = self
                .listeners
                .get(&id)
                .is_some_and(|l| l.deliver(entry.clone()));
            if ok {
                delivered += 1;
            } else {
                tracing::debug!(%id, keyword = %entry.full_name(), "listener gone, unsubscribing");
                self.remove_listener(id);
            }
        }
        delivered
    }

    /// Register `listener` under each valid pattern.
    ///
    /// With `deliver_current`, keywords already stored that match the
    /// accepted patterns are sent to the listener right away. With `refresh`,
    /// nothing is sent locally; instead the outcome carries the `keys`
    /// commands that make the hub re-broadcast the concrete keywords.
    pub fn subscribe<S: AsRef<str>>(
        &mut self,
        patterns: &[S],
        listener: &KeywordListener,
        deliver_current: bool,
        refresh: bool,
    ) -> SubscribeOutcome {
        let mut outcome = SubscribeOutcome::default();
        let mut accepted = Vec::new();

        for raw in patterns {
            let raw = raw.as_ref();
            let Some(pattern) = Pattern::parse(raw) else {
                tracing::warn!(pattern = raw, "rejecting invalid keyword pattern");
                outcome.rejected.push(raw.to_string());
                continue;
            };
            let key = pattern.to_string();
            self.subscriptions
                .entry(key.clone())
                .or_insert_with(|| Subscription {
                    pattern: pattern.clone(),
                    listeners: HashSet::new(),
                })
                .listeners
                .insert(listener.id());
            outcome.accepted.push(key);
            accepted.push(pattern);
        }

        if accepted.is_empty() {
            return outcome;
        }
        self.listeners.insert(listener.id(), listener.clone());

        if refresh {
            outcome.refresh_commands = self.build_refresh(accepted.iter());
        } else if deliver_current {
            let mut current: Vec<&ActorKeyword> = self
                .latest
                .values()
                .filter(|e| accepted.iter().any(|p| p.matches(&e.actor, &e.keyword.name)))
                .collect();
            current.sort_by_key(|e| e.full_name());
            let current: Vec<ActorKeyword> = current.into_iter().cloned().collect();
            for entry in current {
                if !listener.deliver(entry) {
                    self.remove_listener(listener.id());
                    break;
                }
            }
        }

        outcome
    }

    /// Remove `id` from one pattern, or from every pattern when `pattern` is
    /// `None`. Returns true if anything was removed.
    pub fn unsubscribe(&mut self, id: ListenerId, pattern: Option<&str>) -> bool {
        let Some(pattern) = pattern else {
            return self.remove_listener(id);
        };
        let Some(pattern) = Pattern::parse(pattern) else {
            return false;
        };
        let key = pattern.to_string();
        let Some(sub) = self.subscriptions.get_mut(&key) else {
            return false;
        };
        let removed = sub.listeners.remove(&id);
        if sub.listeners.is_empty() {
            self.subscriptions.remove(&key);
        }
        if !self.subscriptions.values().any(|s| s.listeners.contains(&id)) {
            self.listeners.remove(&id);
        }
        removed
    }

    fn remove_listener(&mut self, id: ListenerId) -> bool {
        let mut removed = self.listeners.remove(&id).is_some();
        self.subscriptions.retain(|_, sub| {
            removed |= sub.listeners.remove(&id);
            !sub.listeners.is_empty()
        });
        removed
    }

    /// `keys getFor` commands covering every concrete registered pattern.
    pub fn refresh_commands(&self) -> Vec<String> {
        self.build_refresh(self.subscriptions.values().map(|s| &s.pattern))
    }

    fn build_refresh<'a>(&self, patterns: impl Iterator<Item = &'a Pattern>) -> Vec<String> {
        let mut by_actor: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (actor, key) in patterns.filter_map(Pattern::concrete) {
            by_actor.entry(actor).or_default().insert(key);
        }

        let mut commands = Vec::new();
        for (actor, keys) in by_actor {
            let keys: Vec<&str> = keys.into_iter().collect();
            for chunk in keys.chunks(self.refresh_chunk_size) {
                commands.push(format!("keys getFor={actor} {}", chunk.join(" ")));
            }
        }
        commands
    }

    /// Latest value of `actor.key`.
    pub fn get(&self, name: &str) -> Option<&ActorKeyword> {
        self.latest.get(&name.to_lowercase())
    }

    /// Recorded history of `actor.key`, oldest first. Empty unless the key
    /// is configured for history.
    pub fn history(&self, name: &str) -> Vec<ActorKeyword> {
        self.history
            .get(&name.to_lowercase())
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Registered patterns, sorted.
    pub fn patterns(&self) -> Vec<String> {
        self.subscriptions.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;
    use tokio::sync::mpsc::error::TryRecvError;

    fn kw(name: &str, raw: &str) -> Keyword {
        Keyword::new(name, raw)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ActorKeyword>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(update) = rx.try_recv() {
            out.push(update.full_name());
        }
        out
    }

    #[test]
    fn pattern_validation() {
        assert_eq!(Pattern::parse("*"), Some(Pattern::All));
        assert_eq!(Pattern::parse("TCC.*"), Some(Pattern::Actor("tcc".into())));
        assert_eq!(
            Pattern::parse("tcc.axisCmdState"),
            Some(Pattern::Key {
                actor: "tcc".into(),
                key: "axiscmdstate".into()
            })
        );
        for bad in ["", "tcc", "tcc.", ".key", "tcc.key.x", "**", "tcc key", "t-c.key"] {
            assert_eq!(Pattern::parse(bad), None, "{bad:?}");
        }
    }

    #[test]
    fn glob_keys() {
        let p = Pattern::parse("tcc.axis*").unwrap();
        assert!(p.matches("tcc", "axiscmdstate"));
        assert!(p.matches("tcc", "axis"));
        assert!(!p.matches("tcc", "secfocus"));
        assert!(p.concrete().is_none());
        assert!(glob_match("a*c*e", "abcde"));
        assert!(!glob_match("a*c*e", "abcd"));
        assert!(glob_match("*x", "x"));
    }

    #[test]
    fn wildcard_fan_out() {
        let mut store = KeywordStore::default();
        let (tcc, mut tcc_rx) = KeywordListener::channel();
        let (all, mut all_rx) = KeywordListener::channel();
        store.subscribe(&["tcc.*"], &tcc, false, false);
        store.subscribe(&["*"], &all, false, false);

        store.update("tcc", kw("axisCmdState", "Tracking"));
        store.update("boss", kw("exposureState", "IDLE"));

        assert_eq!(drain(&mut tcc_rx), vec!["tcc.axiscmdstate"]);
        assert_eq!(drain(&mut all_rx), vec!["tcc.axiscmdstate", "boss.exposurestate"]);
    }

    #[test]
    fn overlapping_patterns_deliver_once() {
        let mut store = KeywordStore::default();
        let (l, mut rx) = KeywordListener::channel();
        store.subscribe(&["*", "tcc.*", "tcc.axisCmdState"], &l, false, false);
        assert_eq!(store.update("tcc", kw("axisCmdState", "Halted")), 1);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn replaces_in_place() {
        let mut store = KeywordStore::default();
        store.update("TCC", kw("AxisCmdState", "Tracking"));
        store.update("tcc", kw("axiscmdstate", "Halted"));
        assert_eq!(store.len(), 1);
        let latest = store.get("tcc.AxisCmdState").unwrap();
        assert_eq!(latest.keyword.raw, "Halted");
        assert_eq!(latest.full_name(), "tcc.axiscmdstate");
    }

    #[test]
    fn ingest_uses_reply_actor() {
        let mut store = KeywordStore::default();
        let reply = tron_core::parse_line(
            "hub.hub 0 keys_boss i exposureState=IDLE; shutterStatus=0x1",
            1,
            SystemTime::now(),
        )
        .unwrap();
        store.ingest(&reply);
        assert!(store.get("boss.exposurestate").is_some());
        assert!(store.get("boss.shutterstatus").is_some());
        assert!(store.get("keys_boss.exposurestate").is_none());
    }

    #[test]
    fn invalid_patterns_do_not_fail_the_call() {
        let mut store = KeywordStore::default();
        let (l, _rx) = KeywordListener::channel();
        let patterns = ["tcc.*", "bad pattern", "boss.exposureState"];
        let outcome = store.subscribe(&patterns, &l, false, false);
        assert_eq!(outcome.accepted, vec!["tcc.*", "boss.exposurestate"]);
        assert_eq!(outcome.rejected, vec!["bad pattern"]);
        assert_eq!(store.patterns(), vec!["boss.exposurestate", "tcc.*"]);
    }

    #[test]
    fn deliver_current_matches_existing_only() {
        let mut store = KeywordStore::default();
        store.update("tcc", kw("axisCmdState", "Tracking"));
        store.update("tcc", kw("secFocus", "100"));
        store.update("boss", kw("exposureState", "IDLE"));

        let (l, mut rx) = KeywordListener::channel();
        store.subscribe(&["tcc.*"], &l, true, false);
        assert_eq!(drain(&mut rx), vec!["tcc.axiscmdstate", "tcc.secfocus"]);

        // Future keys of the same actor still arrive through notify.
        store.update("tcc", kw("utc_tai", "-37"));
        assert_eq!(drain(&mut rx), vec!["tcc.utc_tai"]);
    }

    #[test]
    fn refresh_is_chunked_per_actor() {
        let config = ClientConfig {
            refresh_chunk_size: 2,
            ..ClientConfig::default()
        };
        let mut store = KeywordStore::new(&config);
        store.update("tcc", kw("axisCmdState", "Tracking"));

        let (l, mut rx) = KeywordListener::channel();
        let outcome = store.subscribe(
            &["tcc.a", "tcc.b", "tcc.c", "boss.x", "guider.*", "*", "tcc.axisCmdState"],
            &l,
            true,
            true,
        );
        assert_eq!(
            outcome.refresh_commands,
            vec![
                "keys getFor=boss x",
                "keys getFor=tcc a axiscmdstate",
                "keys getFor=tcc b c",
            ]
        );
        // Refresh replaces local delivery.
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(store.refresh_commands(), outcome.refresh_commands);
    }

    #[test]
    fn dropped_receiver_unsubscribes() {
        let mut store = KeywordStore::default();
        let (gone, gone_rx) = KeywordListener::channel();
        let (kept, mut kept_rx) = KeywordListener::channel();
        store.subscribe(&["tcc.*"], &gone, false, false);
        store.subscribe(&["tcc.*"], &kept, false, false);
        drop(gone_rx);

        assert_eq!(store.update("tcc", kw("axisCmdState", "Tracking")), 1);
        assert_eq!(store.listener_count(), 1);
        assert_eq!(drain(&mut kept_rx), vec!["tcc.axiscmdstate"]);
    }

    #[test]
    fn unsubscribe_one_or_all() {
        let mut store = KeywordStore::default();
        let (l, mut rx) = KeywordListener::channel();
        store.subscribe(&["tcc.*", "boss.*"], &l, false, false);

        assert!(store.unsubscribe(l.id(), Some("TCC.*")));
        store.update("tcc", kw("axisCmdState", "Tracking"));
        store.update("boss", kw("exposureState", "IDLE"));
        assert_eq!(drain(&mut rx), vec!["boss.exposurestate"]);

        assert!(store.unsubscribe(l.id(), None));
        assert!(!store.unsubscribe(l.id(), None));
        store.update("boss", kw("exposureState", "READING"));
        assert!(drain(&mut rx).is_empty());
        assert!(store.patterns().is_empty());
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn history_only_for_configured_keys() {
        let config = ClientConfig {
            history_keys: vec!["tcc.axisCmdState".into()],
            history_depth: 2,
            ..ClientConfig::default()
        };
        let mut store = KeywordStore::new(&config);
        for state in ["Slewing", "Tracking", "Halted"] {
            store.update("tcc", kw("axisCmdState", state));
            store.update("boss", kw("exposureState", state));
        }
        let history: Vec<String> = store
            .history("tcc.axiscmdstate")
            .into_iter()
            .map(|e| e.keyword.raw)
            .collect();
        assert_eq!(history, vec!["Tracking", "Halted"]);
        assert!(store.history("boss.exposurestate").is_empty());
    }
}
