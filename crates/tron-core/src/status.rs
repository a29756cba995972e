//! Connection status bitmask.
//!
//! Several conditions hold at once ("connected but not yet authorised",
//! "authentication failed because no password was stored"), so the status
//! is a set of flags rather than a single state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// A set of connection condition flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionStatus(u16);

impl ConnectionStatus {
    pub const NONE: Self = Self(0);
    pub const DISCONNECTED: Self = Self(1 << 0);
    pub const CONNECTING: Self = Self(1 << 1);
    pub const CONNECTED: Self = Self(1 << 2);
    pub const AUTHORISING: Self = Self(1 << 3);
    pub const AUTHORISED: Self = Self(1 << 4);
    pub const READY: Self = Self(1 << 5);
    pub const FAILED: Self = Self(1 << 6);
    pub const TIMED_OUT: Self = Self(1 << 7);
    pub const NO_PASSWORD: Self = Self(1 << 8);
    pub const AUTHENTICATION_FAILED: Self = Self(1 << 9);

    const NAMES: [(Self, &'static str); 10] = [
        (Self::DISCONNECTED, "Disconnected"),
        (Self::CONNECTING, "Connecting"),
        (Self::CONNECTED, "Connected"),
        (Self::AUTHORISING, "Authorising"),
        (Self::AUTHORISED, "Authorised"),
        (Self::READY, "Ready"),
        (Self::FAILED, "Failed"),
        (Self::TIMED_OUT, "TimedOut"),
        (Self::NO_PASSWORD, "NoPassword"),
        (Self::AUTHENTICATION_FAILED, "AuthenticationFailed"),
    ];

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every flag in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any flag in `other` is set.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// `self | other`, usable in constants.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Builder-style `remove`.
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Names of the set flags, in bit order.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES
            .into_iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, name)| name)
    }
}

impl BitOr for ConnectionStatus {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ConnectionStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ConnectionStatus {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("None");
        }
        let names: Vec<&str> = self.names().collect();
        f.write_str(&names.join("|"))
    }
}

impl fmt::Debug for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionStatus({self})")
    }
}
