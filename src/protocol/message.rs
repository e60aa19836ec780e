//! Signaling message catalogue
//!
//! JSON messages exchanged over the WebSocket transport, tagged by a
//! kebab-case `type` field with camelCase payload fields. `ClientMessage`
//! flows client to server, `ServerMessage` server to client.
//!
//! Offer/answer/ICE payloads are `serde_json::Value`: the relay is an opaque
//! envelope and must forward them unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::{RoomId, SessionId};

/// Snapshot entry for one room member, as sent in `room-joined` and
/// `room-info` replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub id: SessionId,
    pub name: String,
    pub is_audio_on: bool,
    pub is_video_on: bool,
}

/// Messages sent by a client to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Allocate a fresh room. Replies with `room-created`.
    #[serde(rename_all = "camelCase")]
    CreateRoom { display_name: String },

    /// Join a room, creating it if absent. Replies with `room-joined` and
    /// broadcasts `user-joined` to the rest of the room.
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: RoomId,
        display_name: String,
    },

    /// Pre-join lookup. Replies with `room-info`.
    #[serde(rename_all = "camelCase")]
    GetRoomInfo { room_id: RoomId },

    /// Session description offer, forwarded verbatim to `to`.
    Offer { payload: Value, to: SessionId },

    /// Session description answer, forwarded verbatim to `to`.
    Answer { payload: Value, to: SessionId },

    /// ICE candidate, forwarded verbatim to `to`.
    IceCandidate { payload: Value, to: SessionId },

    /// Audio flag change; broadcast to the rest of the room.
    #[serde(rename_all = "camelCase")]
    UserToggleAudio {
        user_id: SessionId,
        is_audio_on: bool,
    },

    /// Video flag change; broadcast to the rest of the room.
    #[serde(rename_all = "camelCase")]
    UserToggleVideo {
        user_id: SessionId,
        is_video_on: bool,
    },

    /// Chat message; relayed to the whole room including the sender.
    #[serde(rename_all = "camelCase")]
    SendMessage {
        room_id: RoomId,
        message: String,
        display_name: String,
    },
}

/// Messages sent by the relay to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    RoomCreated {
        room_id: RoomId,
        display_name: String,
    },

    /// Private reply to the joiner: its assigned id and everyone already in
    /// the room. This snapshot seeds the client's connection mesh.
    #[serde(rename_all = "camelCase")]
    RoomJoined {
        room_id: RoomId,
        user_id: SessionId,
        users: Vec<MemberInfo>,
    },

    #[serde(rename_all = "camelCase")]
    RoomInfo {
        exists: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        users_count: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        users: Option<Vec<MemberInfo>>,
    },

    /// Membership notice: someone joined the room.
    #[serde(rename_all = "camelCase")]
    UserJoined {
        user_id: SessionId,
        display_name: String,
        is_audio_on: bool,
        is_video_on: bool,
        users_count: usize,
    },

    /// Membership notice: someone left (explicitly or by disconnect).
    #[serde(rename_all = "camelCase")]
    UserLeft {
        user_id: SessionId,
        display_name: String,
        users_count: usize,
    },

    Offer { payload: Value, from: SessionId },

    Answer { payload: Value, from: SessionId },

    IceCandidate { payload: Value, from: SessionId },

    #[serde(rename_all = "camelCase")]
    UserAudioToggled {
        user_id: SessionId,
        is_audio_on: bool,
    },

    #[serde(rename_all = "camelCase")]
    UserVideoToggled {
        user_id: SessionId,
        is_video_on: bool,
    },

    /// Chat message with the relay-stamped timestamp (unix milliseconds).
    #[serde(rename_all = "camelCase")]
    NewMessage {
        user_id: SessionId,
        display_name: String,
        message: String,
        timestamp: u64,
    },
}
