//! Outstanding command bookkeeping.

use crate::command::Command;
use std::collections::HashMap;
use tron_core::Reply;

/// Allocates command ids and routes replies to outstanding commands.
///
/// Ids start at 1 and never repeat for the life of the registry; id 0 is
/// what the hub uses for broadcasts.
#[derive(Debug)]
pub struct CommandRegistry {
    last_id: u64,
    outstanding: HashMap<u64, Command>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            last_id: 0,
            outstanding: HashMap::new(),
        }
    }

    /// Create and register a command with the next id.
    pub fn allocate(&mut self, text: &str) -> Command {
        let command = self.allocate_detached(text);
        self.outstanding.insert(command.id(), command.clone());
        command
    }

    /// Consume the next id without registering the command.
    ///
    /// Used for commands that fail before they reach the socket.
    pub fn allocate_detached(&mut self, text: &str) -> Command {
        self.last_id += 1;
        Command::new(self.last_id, text)
    }

    /// Attach a reply to its command, if it is one of ours.
    ///
    /// Returns the command the reply was routed to. A command that reaches a
    /// terminal status is removed. Unknown ids are broadcasts or replies to
    /// other clients and are not an error.
    pub fn route(&mut self, reply: &Reply) -> Option<Command> {
        let command = self.outstanding.get(&reply.command_id)?.clone();
        if command.apply(reply.clone()) {
            self.outstanding.remove(&reply.command_id);
        }
        Some(command)
    }

    /// Fail every outstanding command and forget them.
    ///
    /// Returns how many commands were failed.
    pub fn abandon_all(&mut self, reason: &str) -> usize {
        self.outstanding
            .drain()
            .filter(|(_, command)| command.abandon(reason))
            .count()
    }

    /// Forget a command without touching its status.
    pub fn remove(&mut self, id: u64) -> Option<Command> {
        self.outstanding.remove(&id)
    }

    pub fn get(&self, id: u64) -> Option<&Command> {
        self.outstanding.get(&id)
    }

    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandStatus;
    use std::time::SystemTime;

    fn reply(line: &str) -> Reply {
        tron_core::parse_line(line, 1, SystemTime::now()).unwrap()
    }

    #[test]
    fn ids_are_monotonic_and_unique() {
        let mut registry = CommandRegistry::new();
        let ids: Vec<u64> = (0..50)
            .map(|i| {
                if i % 7 == 0 {
                    registry.allocate_detached("tcc status").id()
                } else {
                    registry.allocate("tcc status").id()
                }
            })
            .collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ids[0], 1);
    }

    #[test]
    fn removes_command_on_terminal_reply() {
        let mut registry = CommandRegistry::new();
        let cmd = registry.allocate("tcc status");
        let id = cmd.id();

        let routed = registry
            .route(&reply(&format!("APO.me {id} tcc i axisCmdState=Tracking")))
            .unwrap();
        assert_eq!(routed.id(), id);
        assert_eq!(cmd.status(), CommandStatus::Running);
        assert_eq!(registry.len(), 1);

        registry.route(&reply(&format!("APO.me {id} tcc :"))).unwrap();
        assert_eq!(cmd.status(), CommandStatus::Done);
        assert!(registry.is_empty());
        assert_eq!(cmd.replies().len(), 2);

        // A duplicate terminal reply no longer matches anything.
        assert!(registry.route(&reply(&format!("APO.me {id} tcc f"))).is_none());
        assert_eq!(cmd.status(), CommandStatus::Done);
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let mut registry = CommandRegistry::new();
        let cmd = registry.allocate("boss status");
        assert!(registry.route(&reply("hub.hub 0 boss i exposureState=IDLE")).is_none());
        assert!(registry.route(&reply("other.user 42 boss :")).is_none());
        assert_eq!(cmd.status(), CommandStatus::Ready);
        assert!(cmd.replies().is_empty());
    }

    #[test]
    fn interleaved_commands_route_by_id() {
        let mut registry = CommandRegistry::new();
        let a = registry.allocate("tcc status");
        let b = registry.allocate("boss status");

        registry.route(&reply(&format!("APO.me {} boss > ", b.id())));
        registry.route(&reply(&format!("APO.me {} tcc f why=\"axes halted\"", a.id())));
        registry.route(&reply(&format!("APO.me {} boss :", b.id())));

        assert_eq!(a.status(), CommandStatus::Failed);
        assert_eq!(b.status(), CommandStatus::Done);
        assert_eq!(a.replies().len(), 1);
        assert_eq!(b.replies().len(), 2);
    }

    #[test]
    fn abandon_fails_everything_outstanding() {
        let mut registry = CommandRegistry::new();
        let a = registry.allocate("tcc track");
        let b = registry.allocate("boss expose");
        assert_eq!(registry.abandon_all("disconnected"), 2);
        assert!(registry.is_empty());
        assert_eq!(a.status(), CommandStatus::Failed);
        assert_eq!(b.abandoned_reason().as_deref(), Some("disconnected"));

        let c = registry.allocate("tcc status");
        assert!(c.id() > b.id());
    }
}
