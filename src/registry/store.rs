//! Room registry implementation
//!
//! The central registry that tracks which participants are in which room.
//! All operations are total: references to unknown sessions or rooms are
//! silent no-ops, never errors, so one bad client message can never take
//! down the shared process.

use std::collections::HashMap;

use crate::protocol::{MemberInfo, RoomId, SessionId};

use super::participant::{Departure, Participant, RoomInfo};

/// One room's membership.
#[derive(Debug, Default)]
struct Room {
    members: HashMap<SessionId, Participant>,
}

/// Central registry of rooms and participants.
///
/// Owned exclusively by the relay dispatcher; see the module docs for the
/// single-owner mutation model. A room exists here if and only if it has at
/// least one participant.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    /// Map of room id to membership
    rooms: HashMap<RoomId, Room>,

    /// Reverse index: which room each session is in
    sessions: HashMap<SessionId, RoomId>,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh room id.
    ///
    /// No membership is recorded: a room materializes on first join, keeping
    /// the exists-iff-nonempty invariant. The id is collision-resistant, not
    /// reserved.
    pub fn create_room(&self, display_name: &str) -> RoomId {
        let room_id = RoomId::allocate();

        tracing::info!(
            room = %room_id,
            creator = display_name,
            "Room id allocated"
        );

        room_id
    }

    /// Add a participant to a room, creating the room if absent.
    ///
    /// Returns the departure from the previous room (if the session was
    /// already in one; the caller must notify that room) and the snapshot of
    /// all *other* current members, the seed for the joiner's connection
    /// mesh. Flags default to audio on, video on.
    pub fn join(
        &mut self,
        room_id: &RoomId,
        session_id: &SessionId,
        display_name: &str,
    ) -> (Option<Departure>, Vec<MemberInfo>) {
        // A rejoin under the same session id replaces the old membership.
        let departed = if self.sessions.contains_key(session_id) {
            self.leave(session_id)
        } else {
            None
        };

        let room = self.rooms.entry(room_id.clone()).or_default();

        let others: Vec<MemberInfo> = room.members.values().map(Participant::info).collect();

        room.members.insert(
            session_id.clone(),
            Participant::new(session_id.clone(), display_name.to_string(), room_id.clone()),
        );
        self.sessions.insert(session_id.clone(), room_id.clone());

        tracing::info!(
            room = %room_id,
            session_id = %session_id,
            name = display_name,
            members = room.members.len(),
            "Participant joined"
        );

        (departed, others)
    }

    /// Remove a participant from its room.
    ///
    /// Deletes the room if it becomes empty. Returns `None` if the session
    /// is unknown (duplicate or stale leave events are no-ops).
    pub fn leave(&mut self, session_id: &SessionId) -> Option<Departure> {
        let room_id = self.sessions.remove(session_id)?;

        let room = self.rooms.get_mut(&room_id)?;
        let participant = room.members.remove(session_id)?;
        let remaining: Vec<SessionId> = room.members.keys().cloned().collect();

        if remaining.is_empty() {
            self.rooms.remove(&room_id);
            tracing::info!(room = %room_id, "Room deleted (empty)");
        } else {
            tracing::info!(
                room = %room_id,
                session_id = %session_id,
                name = %participant.display_name,
                remaining = remaining.len(),
                "Participant left"
            );
        }

        Some(Departure {
            room_id,
            display_name: participant.display_name,
            remaining,
        })
    }

    /// Update a participant's audio flag.
    ///
    /// Returns the ids of the other room members for broadcast, or `None`
    /// if the session is unknown (idempotent under late/duplicate events).
    pub fn set_audio_flag(&mut self, session_id: &SessionId, on: bool) -> Option<Vec<SessionId>> {
        self.update_participant(session_id, |p| p.is_audio_on = on)
    }

    /// Update a participant's video flag. Same contract as
    /// [`set_audio_flag`](Self::set_audio_flag).
    pub fn set_video_flag(&mut self, session_id: &SessionId, on: bool) -> Option<Vec<SessionId>> {
        self.update_participant(session_id, |p| p.is_video_on = on)
    }

    fn update_participant(
        &mut self,
        session_id: &SessionId,
        update: impl FnOnce(&mut Participant),
    ) -> Option<Vec<SessionId>> {
        let room_id = self.sessions.get(session_id)?;
        let room = self.rooms.get_mut(room_id)?;
        let participant = room.members.get_mut(session_id)?;

        update(participant);

        tracing::debug!(
            room = %room_id,
            session_id = %session_id,
            audio = participant.is_audio_on,
            video = participant.is_video_on,
            "Participant flags updated"
        );

        Some(
            room.members
                .keys()
                .filter(|id| *id != session_id)
                .cloned()
                .collect(),
        )
    }

    /// Read-only room lookup, used for pre-join validation.
    pub fn room_info(&self, room_id: &RoomId) -> RoomInfo {
        match self.rooms.get(room_id) {
            Some(room) => RoomInfo {
                exists: true,
                members: room.members.values().map(Participant::info).collect(),
            },
            None => RoomInfo {
                exists: false,
                members: Vec::new(),
            },
        }
    }

    /// All member ids of a room, including the caller's (for whole-room
    /// broadcast such as chat).
    pub fn room_members(&self, room_id: &RoomId) -> Vec<SessionId> {
        self.rooms
            .get(room_id)
            .map(|room| room.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// The room a session is currently in.
    pub fn room_of(&self, session_id: &SessionId) -> Option<&RoomId> {
        self.sessions.get(session_id)
    }

    /// Look up a participant.
    pub fn participant(&self, session_id: &SessionId) -> Option<&Participant> {
        let room_id = self.sessions.get(session_id)?;
        self.rooms.get(room_id)?.members.get(session_id)
    }

    /// Number of rooms currently alive.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(n: u64) -> SessionId {
        SessionId::from_index(n)
    }

    #[test]
    fn test_join_creates_room_and_returns_others() {
        let mut registry = RoomRegistry::new();
        let room = RoomId::from("r1");

        let (_, others) = registry.join(&room, &sid(1), "Ada");
        assert!(others.is_empty());
        assert_eq!(registry.room_count(), 1);

        let (_, others) = registry.join(&room, &sid(2), "Bea");
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].id, sid(1));
        assert_eq!(others[0].name, "Ada");
        assert!(others[0].is_audio_on);
        assert!(others[0].is_video_on);
    }

    #[test]
    fn test_snapshot_excludes_joiner_regardless_of_order() {
        let mut registry = RoomRegistry::new();
        let room = RoomId::from("r1");

        for n in 0..5 {
            registry.join(&room, &sid(n), &format!("user-{n}"));
        }

        let (_, others) = registry.join(&room, &sid(99), "late");
        let mut ids: Vec<SessionId> = others.into_iter().map(|m| m.id).collect();
        ids.sort();
        assert_eq!(ids, (0..5).map(sid).collect::<Vec<_>>());
    }

    #[test]
    fn test_member_count_after_joins_and_leaves() {
        let mut registry = RoomRegistry::new();
        let room = RoomId::from("r1");

        for n in 0..4 {
            registry.join(&room, &sid(n), "u");
        }
        for n in 0..3 {
            registry.leave(&sid(n));
        }

        // 4 joins, 3 leaves: one member remains and the room survives
        assert_eq!(registry.room_info(&room).member_count(), 1);
        assert!(registry.room_info(&room).exists);

        registry.leave(&sid(3));
        assert!(!registry.room_info(&room).exists);
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_leave_reports_departure() {
        let mut registry = RoomRegistry::new();
        let room = RoomId::from("r1");

        registry.join(&room, &sid(1), "Ada");
        registry.join(&room, &sid(2), "Bea");

        let departure = registry.leave(&sid(1)).unwrap();
        assert_eq!(departure.display_name, "Ada");
        assert_eq!(departure.room_id, room);
        assert_eq!(departure.remaining, vec![sid(2)]);
        assert_eq!(departure.remaining_count(), 1);
    }

    #[test]
    fn test_leave_unknown_session_is_noop() {
        let mut registry = RoomRegistry::new();
        assert!(registry.leave(&sid(42)).is_none());

        // Duplicate leave after a real one is also a no-op
        let room = RoomId::from("r1");
        registry.join(&room, &sid(1), "Ada");
        assert!(registry.leave(&sid(1)).is_some());
        assert!(registry.leave(&sid(1)).is_none());
    }

    #[test]
    fn test_toggle_flags() {
        let mut registry = RoomRegistry::new();
        let room = RoomId::from("r1");

        registry.join(&room, &sid(1), "Ada");
        registry.join(&room, &sid(2), "Bea");

        let others = registry.set_audio_flag(&sid(1), false).unwrap();
        assert_eq!(others, vec![sid(2)]);
        assert!(!registry.participant(&sid(1)).unwrap().is_audio_on);

        registry.set_audio_flag(&sid(1), true).unwrap();
        assert!(registry.participant(&sid(1)).unwrap().is_audio_on);

        registry.set_video_flag(&sid(2), false).unwrap();
        assert!(!registry.participant(&sid(2)).unwrap().is_video_on);

        // Unknown session: silent no-op
        assert!(registry.set_audio_flag(&sid(9), false).is_none());
    }

    #[test]
    fn test_rejoin_moves_session() {
        let mut registry = RoomRegistry::new();
        let r1 = RoomId::from("r1");
        let r2 = RoomId::from("r2");

        registry.join(&r1, &sid(1), "Ada");
        registry.join(&r2, &sid(1), "Ada");

        assert!(!registry.room_info(&r1).exists);
        assert_eq!(registry.room_of(&sid(1)), Some(&r2));
        assert_eq!(registry.room_info(&r2).member_count(), 1);
    }

    #[test]
    fn test_rejoin_reports_departure_from_old_room() {
        let mut registry = RoomRegistry::new();
        let r1 = RoomId::from("r1");
        let r2 = RoomId::from("r2");

        registry.join(&r1, &sid(1), "Ada");
        registry.join(&r1, &sid(2), "Bea");

        // Moving rooms surfaces the implicit leave so r1 can be told
        let (departed, others) = registry.join(&r2, &sid(2), "Bea");
        let departure = departed.unwrap();
        assert_eq!(departure.room_id, r1);
        assert_eq!(departure.display_name, "Bea");
        assert_eq!(departure.remaining, vec![sid(1)]);
        assert!(others.is_empty());

        // A first join reports no departure
        let (departed, _) = registry.join(&r2, &sid(3), "Cy");
        assert!(departed.is_none());
    }

    #[test]
    fn test_create_room_allocates_without_membership() {
        let registry = RoomRegistry::new();
        let room_id = registry.create_room("Host");

        // Rooms only exist once someone joins
        assert!(!registry.room_info(&room_id).exists);
    }

    #[test]
    fn test_room_members_includes_everyone() {
        let mut registry = RoomRegistry::new();
        let room = RoomId::from("r1");

        registry.join(&room, &sid(1), "Ada");
        registry.join(&room, &sid(2), "Bea");

        let mut members = registry.room_members(&room);
        members.sort();
        assert_eq!(members, vec![sid(1), sid(2)]);

        assert!(registry.room_members(&RoomId::from("missing")).is_empty());
    }
}
