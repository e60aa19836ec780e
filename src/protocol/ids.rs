//! Session and room identifiers
//!
//! `SessionId` is assigned by the transport listener, one per connection.
//! Ids are fixed-width hex so their lexicographic order is total and agrees
//! on both ends of any pair, which is what the offer tie-break relies on.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier for one connection to the relay.
///
/// Doubles as the wire `userId` and as the key for the peer link a remote
/// client holds for this participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session id from the listener's connection counter.
    ///
    /// Fixed-width hex keeps lexicographic order identical to assignment
    /// order.
    pub fn from_index(index: u64) -> Self {
        Self(format!("{index:016x}"))
    }

    /// Whether this side initiates negotiation toward `other`.
    ///
    /// For any pair exactly one side initiates: the one with the
    /// lexicographically larger id. The other side only ever answers
    /// inbound offers, so two sides can never race competing offers.
    pub fn initiates_to(&self, other: &SessionId) -> bool {
        self > other
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier for a room.
///
/// Externally chosen on join, or allocated on an explicit create request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Allocate a fresh, collision-resistant room id (8 lowercase hex chars).
    pub fn allocate() -> Self {
        Self(format!("{:08x}", rand::random::<u32>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
