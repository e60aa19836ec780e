//! Mesh client
//!
//! Client-side orchestration for a room: one peer connection per remote
//! participant, driven by signaling events, plus the local media lifecycle
//! (microphone, camera, screen) that keeps every connection's outgoing
//! tracks in step with local state.

pub mod capture;
pub mod config;
pub mod link;
pub mod media;
pub mod orchestrator;
pub mod signaling;

pub use capture::{CaptureError, LocalTrack, MediaSource, ScreenCapture};
pub use config::ClientConfig;
pub use link::{LinkPhase, PeerLink, RemoteMedia};
pub use media::LocalMedia;
pub use orchestrator::{RoomClient, RoomEvent};
pub use signaling::{ChannelEvent, SignalingChannel};
