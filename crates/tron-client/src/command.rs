//! Outstanding commands.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tron_core::{Keyword, Reply, ReplyCode};

/// Lifecycle of a command. Moves forward only:
/// `Ready -> Running -> {Done | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CommandStatus {
    Ready,
    Running,
    Failed,
    Done,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CommandStatus::Done | CommandStatus::Failed)
    }

    fn from_code(code: ReplyCode) -> Self {
        if code.is_failure() {
            CommandStatus::Failed
        } else if code == ReplyCode::Done {
            CommandStatus::Done
        } else {
            CommandStatus::Running
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandStatus::Ready => "ready",
            CommandStatus::Running => "running",
            CommandStatus::Failed => "failed",
            CommandStatus::Done => "done",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
struct CommandState {
    status: CommandStatus,
    replies: Vec<Reply>,
    /// Set when the client fails the command itself (no terminal reply).
    abandoned: Option<String>,
}

#[derive(Debug)]
struct CommandInner {
    id: u64,
    text: String,
    actor: String,
    verb: String,
    state: watch::Sender<CommandState>,
}

/// A command sent to the hub.
///
/// Cheap to clone; all clones observe the same replies and status.
/// [`Command::completed`] may be awaited any number of times from any
/// number of tasks and always yields the same terminal status.
#[derive(Debug, Clone)]
pub struct Command {
    inner: Arc<CommandInner>,
}

impl Command {
    pub(crate) fn new(id: u64, text: impl Into<String>) -> Self {
        let text = text.into().trim().to_string();
        let mut words = text.split_whitespace();
        let actor = words.next().unwrap_or_default().to_string();
        let verb = words.next().unwrap_or_default().to_string();
        let (state, _) = watch::channel(CommandState {
            status: CommandStatus::Ready,
            replies: Vec::new(),
            abandoned: None,
        });
        Self {
            inner: Arc::new(CommandInner {
                id,
                text,
                actor,
                verb,
                state,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Command text without the id prefix.
    pub fn text(&self) -> &str {
        &self.inner.text
    }

    /// Target actor (first word of the text).
    pub fn actor(&self) -> &str {
        &self.inner.actor
    }

    /// Verb (second word of the text).
    pub fn verb(&self) -> &str {
        &self.inner.verb
    }

    /// The line written to the socket, without terminator.
    pub fn wire_line(&self) -> String {
        format!("{} {}", self.inner.id, self.inner.text)
    }

    pub fn status(&self) -> CommandStatus {
        self.inner.state.borrow().status
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Replies received so far, in arrival order.
    pub fn replies(&self) -> Vec<Reply> {
        self.inner.state.borrow().replies.clone()
    }

    /// First keyword with this name across all replies.
    pub fn keyword(&self, name: &str) -> Option<Keyword> {
        self.inner
            .state
            .borrow()
            .replies
            .iter()
            .find_map(|r| r.keyword(name).cloned())
    }

    /// Why the client failed this command locally, if it did.
    pub fn abandoned_reason(&self) -> Option<String> {
        self.inner.state.borrow().abandoned.clone()
    }

    /// Wait until the command reaches a terminal status.
    pub async fn completed(&self) -> CommandStatus {
        let mut rx = self.inner.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        match rx.wait_for(|s| s.status.is_terminal()).await {
            Ok(state) => state.status,
            Err(_) => self.status(),
        }
    }

    /// Record a reply. Returns true if this reply finished the command.
    ///
    /// Replies arriving after a terminal status are ignored.
    pub(crate) fn apply(&self, reply: Reply) -> bool {
        let mut finished = false;
        self.inner.state.send_if_modified(|state| {
            if state.status.is_terminal() {
                return false;
            }
            state.status = CommandStatus::from_code(reply.code);
            state.replies.push(reply);
            finished = state.status.is_terminal();
            true
        });
        finished
    }

    /// Fail the command without a reply from the hub.
    pub(crate) fn abandon(&self, reason: &str) -> bool {
        self.inner.state.send_if_modified(|state| {
            if state.status.is_terminal() {
                return false;
            }
            state.status = CommandStatus::Failed;
            state.abandoned = Some(reason.to_string());
            true
        })
    }
}
