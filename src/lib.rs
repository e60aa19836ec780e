//! # roomlink
//!
//! A WebRTC room signaling relay and mesh-client library built on Tokio.
//!
//! The crate has two halves that share one wire protocol:
//!
//! - [`server`]: a WebSocket relay that tracks room membership and
//!   forwards negotiation payloads between participants without reading
//!   them. It holds no media; every audio/video byte flows peer to peer.
//! - [`client`]: a mesh client that joins a room, opens one peer
//!   connection per remote participant, and keeps local capture state
//!   (microphone, camera, screen) consistent across all of them.
//!
//! # Architecture
//!
//! ```text
//!   client A ──ws──┐                       ┌──ws── client B
//!                  │    +--------------+   │
//!                  ├───>│ SignalServer │<──┤   membership, offers,
//!                  │    │  (relay)     │   │   answers, candidates, chat
//!   client C ──ws──┘    +--------------+   │
//!       │                                  │
//!       └───────────── RTP (direct) ───────┘
//! ```
//!
//! # Quick start
//!
//! Run a relay:
//!
//! ```no_run
//! use roomlink::{ServerConfig, SignalServer};
//!
//! #[tokio::main]
//! async fn main() -> roomlink::Result<()> {
//!     let server = SignalServer::new(ServerConfig::default());
//!     server.run().await
//! }
//! ```
//!
//! Join a room (with a [`client::MediaSource`] implementation providing
//! capture devices):
//!
//! ```no_run
//! use std::sync::Arc;
//! use roomlink::{ClientConfig, RoomClient};
//! # async fn run(source: Arc<dyn roomlink::client::MediaSource>) -> roomlink::Result<()> {
//! let (client, mut events) = RoomClient::connect(ClientConfig::default(), source).await?;
//! client.join("a1b2c3d4".into(), "Ada")?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;

pub use client::{ClientConfig, RoomClient, RoomEvent};
pub use error::{Error, Result};
pub use protocol::{ClientMessage, MemberInfo, RoomId, ServerMessage, SessionId};
pub use server::{ServerConfig, SignalServer};
