//! Participant and lookup result types
//!
//! This module defines the per-participant state stored in the registry and
//! the value types its read operations return.

use std::time::Instant;

use crate::protocol::{MemberInfo, RoomId, SessionId};

/// One participant in a room.
#[derive(Debug, Clone)]
pub struct Participant {
    /// Transport-assigned session id, unique per connection
    pub id: SessionId,

    /// Display name shown to other participants
    pub display_name: String,

    /// The room this participant is in
    pub room_id: RoomId,

    /// Whether the participant's microphone is on
    pub is_audio_on: bool,

    /// Whether the participant's camera is on
    pub is_video_on: bool,

    /// When the participant joined
    pub joined_at: Instant,
}

impl Participant {
    /// Create a participant with the default flags (audio on, video on).
    pub fn new(id: SessionId, display_name: String, room_id: RoomId) -> Self {
        Self {
            id,
            display_name,
            room_id,
            is_audio_on: true,
            is_video_on: true,
            joined_at: Instant::now(),
        }
    }

    /// Snapshot view of this participant for membership replies.
    pub fn info(&self) -> MemberInfo {
        MemberInfo {
            id: self.id.clone(),
            name: self.display_name.clone(),
            is_audio_on: self.is_audio_on,
            is_video_on: self.is_video_on,
        }
    }
}

/// Result of removing a participant, for notifying the remaining room.
#[derive(Debug, Clone)]
pub struct Departure {
    /// The room the participant left
    pub room_id: RoomId,

    /// The departing participant's display name
    pub display_name: String,

    /// Member ids still in the room (empty if the room was deleted)
    pub remaining: Vec<SessionId>,
}

impl Departure {
    /// Number of participants still in the room.
    pub fn remaining_count(&self) -> usize {
        self.remaining.len()
    }
}

/// Read-only room lookup result.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    /// Whether the room currently exists
    pub exists: bool,

    /// Current members (empty if the room does not exist)
    pub members: Vec<MemberInfo>,
}

impl RoomInfo {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}
