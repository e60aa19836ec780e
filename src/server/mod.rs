//! Signaling relay server
//!
//! A WebSocket listener plus a single-threaded dispatcher that routes
//! negotiation messages and membership events between participants. The
//! server never inspects negotiation payloads and never touches media.

pub mod config;
pub mod listener;
pub mod relay;

pub use config::ServerConfig;
pub use listener::SignalServer;
pub use relay::{Relay, RelayEvent};
