//! Relay dispatcher
//!
//! The single event-processing path for the signaling server. One task owns
//! the dispatcher; every inbound event (connect, message, disconnect) is
//! handled to completion before the next, so registry mutations never
//! interleave and need no locking.
//!
//! The dispatcher never replies with errors. Malformed room or session
//! references degrade to silent no-ops: availability of the shared process
//! is favored over strict protocol conformance.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;

use crate::protocol::{ClientMessage, RoomId, ServerMessage, SessionId};
use crate::registry::RoomRegistry;

/// Inbound events from connection tasks.
#[derive(Debug)]
pub enum RelayEvent {
    /// A transport connection opened; `outbox` delivers replies to it.
    Connected {
        session_id: SessionId,
        outbox: mpsc::UnboundedSender<ServerMessage>,
    },

    /// A parsed client message.
    Message {
        session_id: SessionId,
        message: ClientMessage,
    },

    /// The transport connection closed. The only reliable signal for
    /// crashed or closed clients; treated identically to an explicit leave.
    Disconnected { session_id: SessionId },
}

/// The signaling relay dispatcher.
///
/// Owns the room registry and the per-session outboxes. Forwards
/// negotiation messages between exactly two named participants and
/// broadcasts membership changes to a room; negotiation payloads pass
/// through unread.
pub struct Relay {
    registry: RoomRegistry,
    outboxes: HashMap<SessionId, mpsc::UnboundedSender<ServerMessage>>,
}

impl Relay {
    /// Create a relay with an empty registry.
    pub fn new() -> Self {
        Self {
            registry: RoomRegistry::new(),
            outboxes: HashMap::new(),
        }
    }

    /// Drain the event channel until all senders are gone.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<RelayEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        tracing::debug!("Relay dispatcher stopped");
    }

    /// Handle one event to completion.
    pub fn handle(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Connected { session_id, outbox } => {
                tracing::debug!(session_id = %session_id, "Session connected");
                self.outboxes.insert(session_id, outbox);
            }
            RelayEvent::Message {
                session_id,
                message,
            } => self.on_message(session_id, message),
            RelayEvent::Disconnected { session_id } => self.on_disconnect(session_id),
        }
    }

    /// Access to the registry, for read-only inspection.
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    fn on_message(&mut self, from: SessionId, message: ClientMessage) {
        match message {
            ClientMessage::CreateRoom { display_name } => {
                let room_id = self.registry.create_room(&display_name);
                self.send_to(
                    &from,
                    ServerMessage::RoomCreated {
                        room_id,
                        display_name,
                    },
                );
            }

            ClientMessage::JoinRoom {
                room_id,
                display_name,
            } => self.on_join(from, room_id, display_name),

            ClientMessage::GetRoomInfo { room_id } => {
                let info = self.registry.room_info(&room_id);
                let reply = if info.exists {
                    ServerMessage::RoomInfo {
                        exists: true,
                        users_count: Some(info.member_count()),
                        users: Some(info.members),
                    }
                } else {
                    ServerMessage::RoomInfo {
                        exists: false,
                        users_count: None,
                        users: None,
                    }
                };
                self.send_to(&from, reply);
            }

            ClientMessage::Offer { payload, to } => {
                self.send_to(&to, ServerMessage::Offer { payload, from });
            }

            ClientMessage::Answer { payload, to } => {
                self.send_to(&to, ServerMessage::Answer { payload, from });
            }

            ClientMessage::IceCandidate { payload, to } => {
                self.send_to(&to, ServerMessage::IceCandidate { payload, from });
            }

            ClientMessage::UserToggleAudio {
                user_id,
                is_audio_on,
            } => {
                if let Some(others) = self.registry.set_audio_flag(&user_id, is_audio_on) {
                    self.broadcast(
                        &others,
                        &ServerMessage::UserAudioToggled {
                            user_id,
                            is_audio_on,
                        },
                    );
                }
            }

            ClientMessage::UserToggleVideo {
                user_id,
                is_video_on,
            } => {
                if let Some(others) = self.registry.set_video_flag(&user_id, is_video_on) {
                    self.broadcast(
                        &others,
                        &ServerMessage::UserVideoToggled {
                            user_id,
                            is_video_on,
                        },
                    );
                }
            }

            ClientMessage::SendMessage {
                room_id,
                message,
                display_name,
            } => self.on_chat(from, room_id, message, display_name),
        }
    }

    fn on_join(&mut self, from: SessionId, room_id: RoomId, display_name: String) {
        let (departed, others) = self.registry.join(&room_id, &from, &display_name);

        // A join while still in another room is an implicit leave; that
        // room's members get the usual departure notice.
        if let Some(departure) = departed {
            let users_count = departure.remaining_count();
            self.broadcast(
                &departure.remaining,
                &ServerMessage::UserLeft {
                    user_id: from.clone(),
                    display_name: departure.display_name,
                    users_count,
                },
            );
        }

        let users_count = others.len() + 1;

        let other_ids: Vec<SessionId> = others.iter().map(|m| m.id.clone()).collect();

        // Private snapshot reply first, then the join notice to the room.
        self.send_to(
            &from,
            ServerMessage::RoomJoined {
                room_id,
                user_id: from.clone(),
                users: others,
            },
        );

        self.broadcast(
            &other_ids,
            &ServerMessage::UserJoined {
                user_id: from,
                display_name,
                is_audio_on: true,
                is_video_on: true,
                users_count,
            },
        );
    }

    fn on_chat(&mut self, from: SessionId, room_id: RoomId, message: String, display_name: String) {
        let notice = ServerMessage::NewMessage {
            user_id: from.clone(),
            display_name,
            message,
            timestamp: unix_millis(),
        };

        for member in self.registry.room_members(&room_id) {
            if member != from {
                self.send_to(&member, notice.clone());
            }
        }

        // Echo to the sender so its UI shows the relay-stamped timestamp.
        self.send_to(&from, notice);
    }

    fn on_disconnect(&mut self, session_id: SessionId) {
        self.outboxes.remove(&session_id);

        if let Some(departure) = self.registry.leave(&session_id) {
            let notice = ServerMessage::UserLeft {
                user_id: session_id,
                display_name: departure.display_name.clone(),
                users_count: departure.remaining_count(),
            };
            self.broadcast(&departure.remaining, &notice);
        }
    }

    /// Deliver to one session. Routing misses are dropped silently: the
    /// sender is not informed (fire-and-forget).
    fn send_to(&self, session_id: &SessionId, message: ServerMessage) {
        match self.outboxes.get(session_id) {
            Some(outbox) => {
                let _ = outbox.send(message);
            }
            None => {
                tracing::debug!(session_id = %session_id, "Dropped message for absent recipient");
            }
        }
    }

    fn broadcast(&self, recipients: &[SessionId], message: &ServerMessage) {
        for id in recipients {
            self.send_to(id, message.clone());
        }
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestSession {
        id: SessionId,
        rx: mpsc::UnboundedReceiver<ServerMessage>,
    }

    impl TestSession {
        fn recv(&mut self) -> ServerMessage {
            self.rx.try_recv().expect("expected a message")
        }

        fn assert_silent(&mut self) {
            assert!(self.rx.try_recv().is_err(), "expected no message");
        }
    }

    fn connect(relay: &mut Relay, index: u64) -> TestSession {
        let id = SessionId::from_index(index);
        let (tx, rx) = mpsc::unbounded_channel();
        relay.handle(RelayEvent::Connected {
            session_id: id.clone(),
            outbox: tx,
        });
        TestSession { id, rx }
    }

    fn join(relay: &mut Relay, session: &TestSession, room: &str, name: &str) {
        relay.handle(RelayEvent::Message {
            session_id: session.id.clone(),
            message: ClientMessage::JoinRoom {
                room_id: RoomId::from(room),
                display_name: name.into(),
            },
        });
    }

    #[test]
    fn test_join_replies_and_notifies() {
        let mut relay = Relay::new();
        let mut a = connect(&mut relay, 1);
        let mut b = connect(&mut relay, 2);

        join(&mut relay, &a, "r1", "Ada");
        match a.recv() {
            ServerMessage::RoomJoined { user_id, users, .. } => {
                assert_eq!(user_id, a.id);
                assert!(users.is_empty());
            }
            other => panic!("unexpected: {other:?}"),
        }

        join(&mut relay, &b, "r1", "Bea");
        match b.recv() {
            ServerMessage::RoomJoined { user_id, users, .. } => {
                assert_eq!(user_id, b.id);
                assert_eq!(users.len(), 1);
                assert_eq!(users[0].id, a.id);
            }
            other => panic!("unexpected: {other:?}"),
        }

        // A hears about B, with the new room size and default flags
        match a.recv() {
            ServerMessage::UserJoined {
                user_id,
                display_name,
                is_audio_on,
                users_count,
                ..
            } => {
                assert_eq!(user_id, b.id);
                assert_eq!(display_name, "Bea");
                assert!(is_audio_on);
                assert_eq!(users_count, 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
        b.assert_silent();
    }

    #[test]
    fn test_room_move_notifies_old_room() {
        let mut relay = Relay::new();
        let mut a = connect(&mut relay, 1);
        let mut b = connect(&mut relay, 2);

        join(&mut relay, &a, "r1", "Ada");
        join(&mut relay, &b, "r1", "Bea");
        while a.rx.try_recv().is_ok() {}
        while b.rx.try_recv().is_ok() {}

        // B joins another room without an explicit leave
        join(&mut relay, &b, "r2", "Bea");

        match a.recv() {
            ServerMessage::UserLeft {
                user_id,
                display_name,
                users_count,
            } => {
                assert_eq!(user_id, b.id);
                assert_eq!(display_name, "Bea");
                assert_eq!(users_count, 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
        a.assert_silent();

        // B still gets its snapshot for the new room
        match b.recv() {
            ServerMessage::RoomJoined { room_id, users, .. } => {
                assert_eq!(room_id, RoomId::from("r2"));
                assert!(users.is_empty());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_offer_delivered_to_addressee_only() {
        let mut relay = Relay::new();
        let mut a = connect(&mut relay, 1);
        let mut b = connect(&mut relay, 2);
        let mut c = connect(&mut relay, 3);

        join(&mut relay, &a, "r1", "Ada");
        join(&mut relay, &b, "r1", "Bea");
        join(&mut relay, &c, "r1", "Cy");
        // Drain membership traffic
        while a.rx.try_recv().is_ok() {}
        while b.rx.try_recv().is_ok() {}
        while c.rx.try_recv().is_ok() {}

        let payload = serde_json::json!({"type": "offer", "sdp": "v=0\r\n"});
        relay.handle(RelayEvent::Message {
            session_id: a.id.clone(),
            message: ClientMessage::Offer {
                payload: payload.clone(),
                to: b.id.clone(),
            },
        });

        match b.recv() {
            ServerMessage::Offer { payload: p, from } => {
                assert_eq!(p, payload); // Forwarded unchanged
                assert_eq!(from, a.id);
            }
            other => panic!("unexpected: {other:?}"),
        }
        a.assert_silent();
        c.assert_silent();
    }

    #[test]
    fn test_routing_miss_is_silent() {
        let mut relay = Relay::new();
        let mut a = connect(&mut relay, 1);
        join(&mut relay, &a, "r1", "Ada");
        while a.rx.try_recv().is_ok() {}

        relay.handle(RelayEvent::Message {
            session_id: a.id.clone(),
            message: ClientMessage::IceCandidate {
                payload: serde_json::json!({"candidate": "..."}),
                to: SessionId::from_index(99),
            },
        });

        // No error reply, no crash
        a.assert_silent();
    }

    #[test]
    fn test_toggle_broadcast_excludes_sender() {
        let mut relay = Relay::new();
        let mut a = connect(&mut relay, 1);
        let mut b = connect(&mut relay, 2);
        join(&mut relay, &a, "r1", "Ada");
        join(&mut relay, &b, "r1", "Bea");
        while a.rx.try_recv().is_ok() {}
        while b.rx.try_recv().is_ok() {}

        relay.handle(RelayEvent::Message {
            session_id: a.id.clone(),
            message: ClientMessage::UserToggleAudio {
                user_id: a.id.clone(),
                is_audio_on: false,
            },
        });

        match b.recv() {
            ServerMessage::UserAudioToggled {
                user_id,
                is_audio_on,
            } => {
                assert_eq!(user_id, a.id);
                assert!(!is_audio_on);
            }
            other => panic!("unexpected: {other:?}"),
        }
        a.assert_silent();
        assert!(!relay.registry().participant(&a.id).unwrap().is_audio_on);
    }

    #[test]
    fn test_toggle_unknown_session_is_noop() {
        let mut relay = Relay::new();
        let mut a = connect(&mut relay, 1);
        join(&mut relay, &a, "r1", "Ada");
        while a.rx.try_recv().is_ok() {}

        relay.handle(RelayEvent::Message {
            session_id: a.id.clone(),
            message: ClientMessage::UserToggleVideo {
                user_id: SessionId::from_index(99),
                is_video_on: false,
            },
        });

        a.assert_silent();
    }

    #[test]
    fn test_chat_echoes_to_sender_with_timestamp() {
        let mut relay = Relay::new();
        let mut a = connect(&mut relay, 1);
        let mut b = connect(&mut relay, 2);
        join(&mut relay, &a, "r1", "Ada");
        join(&mut relay, &b, "r1", "Bea");
        while a.rx.try_recv().is_ok() {}
        while b.rx.try_recv().is_ok() {}

        relay.handle(RelayEvent::Message {
            session_id: a.id.clone(),
            message: ClientMessage::SendMessage {
                room_id: RoomId::from("r1"),
                message: "hello".into(),
                display_name: "Ada".into(),
            },
        });

        let to_b = b.recv();
        let to_a = a.recv();
        for msg in [&to_a, &to_b] {
            match msg {
                ServerMessage::NewMessage {
                    user_id,
                    message,
                    timestamp,
                    ..
                } => {
                    assert_eq!(*user_id, a.id);
                    assert_eq!(message, "hello");
                    assert!(*timestamp > 0);
                }
                other => panic!("unexpected: {other:?}"),
            }
        }
    }

    #[test]
    fn test_disconnect_is_implicit_leave() {
        let mut relay = Relay::new();
        let mut a = connect(&mut relay, 1);
        let mut b = connect(&mut relay, 2);
        join(&mut relay, &a, "r1", "Ada");
        join(&mut relay, &b, "r1", "Bea");
        while a.rx.try_recv().is_ok() {}
        while b.rx.try_recv().is_ok() {}

        relay.handle(RelayEvent::Disconnected {
            session_id: b.id.clone(),
        });

        match a.recv() {
            ServerMessage::UserLeft {
                user_id,
                display_name,
                users_count,
            } => {
                assert_eq!(user_id, b.id);
                assert_eq!(display_name, "Bea");
                assert_eq!(users_count, 1);
            }
            other => panic!("unexpected: {other:?}"),
        }

        // Room persists with one member; deleted once A goes too
        assert!(relay.registry().room_info(&RoomId::from("r1")).exists);
        relay.handle(RelayEvent::Disconnected {
            session_id: a.id.clone(),
        });
        assert!(!relay.registry().room_info(&RoomId::from("r1")).exists);
    }

    #[test]
    fn test_create_room_then_info() {
        let mut relay = Relay::new();
        let mut a = connect(&mut relay, 1);

        relay.handle(RelayEvent::Message {
            session_id: a.id.clone(),
            message: ClientMessage::CreateRoom {
                display_name: "Host".into(),
            },
        });

        let room_id = match a.recv() {
            ServerMessage::RoomCreated {
                room_id,
                display_name,
            } => {
                assert_eq!(display_name, "Host");
                room_id
            }
            other => panic!("unexpected: {other:?}"),
        };

        relay.handle(RelayEvent::Message {
            session_id: a.id.clone(),
            message: ClientMessage::GetRoomInfo {
                room_id: room_id.clone(),
            },
        });
        match a.recv() {
            ServerMessage::RoomInfo { exists, .. } => assert!(!exists),
            other => panic!("unexpected: {other:?}"),
        }

        // Joining materializes the room
        relay.handle(RelayEvent::Message {
            session_id: a.id.clone(),
            message: ClientMessage::JoinRoom {
                room_id: room_id.clone(),
                display_name: "Host".into(),
            },
        });
        a.recv(); // room-joined

        relay.handle(RelayEvent::Message {
            session_id: a.id.clone(),
            message: ClientMessage::GetRoomInfo { room_id },
        });
        match a.recv() {
            ServerMessage::RoomInfo {
                exists,
                users_count,
                users,
            } => {
                assert!(exists);
                assert_eq!(users_count, Some(1));
                assert_eq!(users.unwrap().len(), 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    /// Full lifecycle: A joins, B joins, offer routes, B leaves, A leaves.
    #[test]
    fn test_membership_scenario() {
        let mut relay = Relay::new();
        let mut a = connect(&mut relay, 1);
        let mut b = connect(&mut relay, 2);
        let r1 = RoomId::from("r1");

        join(&mut relay, &a, "r1", "A");
        assert!(matches!(
            a.recv(),
            ServerMessage::RoomJoined { users, .. } if users.is_empty()
        ));

        join(&mut relay, &b, "r1", "B");
        assert!(matches!(
            b.recv(),
            ServerMessage::RoomJoined { users, .. } if users.len() == 1
        ));
        assert!(matches!(
            a.recv(),
            ServerMessage::UserJoined { users_count: 2, .. }
        ));

        relay.handle(RelayEvent::Message {
            session_id: a.id.clone(),
            message: ClientMessage::Offer {
                payload: serde_json::json!({"sdp": "x"}),
                to: b.id.clone(),
            },
        });
        assert!(matches!(b.recv(), ServerMessage::Offer { from, .. } if from == a.id));
        a.assert_silent();

        relay.handle(RelayEvent::Disconnected {
            session_id: b.id.clone(),
        });
        assert!(matches!(
            a.recv(),
            ServerMessage::UserLeft { users_count: 1, .. }
        ));
        assert!(relay.registry().room_info(&r1).exists);

        relay.handle(RelayEvent::Disconnected {
            session_id: a.id.clone(),
        });
        assert!(!relay.registry().room_info(&r1).exists);
    }
}
