//! Crate-wide error types
//!
//! Transport, serialization and negotiation failures surface here. Registry
//! operations are deliberately infallible: references to unknown sessions or
//! rooms degrade to no-ops instead of producing errors.

use crate::client::capture::CaptureError;

/// Error type for relay and client operations
#[derive(Debug)]
pub enum Error {
    /// Socket-level I/O failure
    Io(std::io::Error),
    /// WebSocket transport failure
    WebSocket(tokio_tungstenite::tungstenite::Error),
    /// Message (de)serialization failure
    Json(serde_json::Error),
    /// Peer connection negotiation failure
    Rtc(webrtc::Error),
    /// Media capture failure (recoverable; the feature is unavailable)
    Capture(CaptureError),
    /// An internal channel closed: the owning task has shut down
    ChannelClosed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::WebSocket(e) => write!(f, "WebSocket error: {}", e),
            Error::Json(e) => write!(f, "Serialization error: {}", e),
            Error::Rtc(e) => write!(f, "Negotiation error: {}", e),
            Error::Capture(e) => write!(f, "Capture error: {}", e),
            Error::ChannelClosed => write!(f, "Channel closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::WebSocket(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Rtc(e) => Some(e),
            Error::Capture(e) => Some(e),
            Error::ChannelClosed => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::Rtc(e)
    }
}

impl From<CaptureError> for Error {
    fn from(e: CaptureError) -> Self {
        Error::Capture(e)
    }
}

/// Result alias using the crate error type
pub type Result<T> = std::result::Result<T, Error>;
