//! Wire protocol for the signaling relay
//!
//! Defines the identifier types shared by server and client, and the JSON
//! message catalogue exchanged over the WebSocket transport. Negotiation
//! payloads (SDP, ICE candidates) are opaque to this layer; the relay
//! forwards them without interpretation.

pub mod ids;
pub mod message;

pub use ids::{RoomId, SessionId};
pub use message::{ClientMessage, MemberInfo, ServerMessage};
