//! Session registry for room membership
//!
//! The registry owns the mapping of rooms to participants and participants
//! to their room. It is pure in-memory state: populated on join, pruned on
//! leave or disconnect, with a room deleted the moment it becomes empty.
//!
//! # Architecture
//!
//! ```text
//!                  RoomRegistry (owned by the relay dispatcher)
//!             ┌──────────────────────────────────────────┐
//!             │ rooms: HashMap<RoomId,                   │
//!             │   Room { members: HashMap<SessionId,     │
//!             │          Participant> }                  │
//!             │ >                                        │
//!             │ sessions: HashMap<SessionId, RoomId>     │
//!             └──────────────────────────────────────────┘
//! ```
//!
//! # Single-owner mutation
//!
//! The registry is not a shared lock-guarded structure. Exactly one task
//! (the relay dispatcher) owns it and processes each inbound event to
//! completion before the next, so every mutating operation is atomic with
//! respect to that event stream and no locking is needed.

pub mod participant;
pub mod store;

pub use participant::{Departure, Participant, RoomInfo};
pub use store::RoomRegistry;
