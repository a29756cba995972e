//! Commander identity.
//!
//! After login the hub knows this client as `PROGRAM.user` and prefixes the
//! replies to its commands with that name.

use std::fmt;

/// A commander in the form `PROGRAM.user`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Commander {
    program: String,
    user: String,
}

impl Commander {
    /// The program is upper-cased as the hub does.
    pub fn new(program: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            program: program.into().to_uppercase(),
            user: user.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

impl fmt::Display for Commander {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.program, self.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_is_uppercased() {
        let c = Commander::new("apo", "craig");
        assert_eq!(c.program(), "APO");
        assert_eq!(c.user(), "craig");
        assert_eq!(c.to_string(), "APO.craig");
    }
}
