//! Media capture seam
//!
//! Capture devices (microphone, camera, display) sit behind the
//! [`MediaSource`] trait: the orchestrator asks for tracks, implementations
//! own the platform capture pipeline and pump samples into the returned
//! track for as long as it is live and enabled.
//!
//! Permission denial and missing devices are recoverable: the feature is
//! reported unavailable, nothing else is affected.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Error type for capture operations
#[derive(Debug, Clone)]
pub enum CaptureError {
    /// The user declined the capture permission prompt
    PermissionDenied(String),
    /// No suitable capture device is present
    NoDevice(String),
    /// The capture pipeline failed
    Failed(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::PermissionDenied(what) => write!(f, "Permission denied: {}", what),
            CaptureError::NoDevice(what) => write!(f, "No capture device: {}", what),
            CaptureError::Failed(what) => write!(f, "Capture failed: {}", what),
        }
    }
}

impl std::error::Error for CaptureError {}

/// A locally captured outbound track.
///
/// Wraps the RTP-level track together with the flags the capture pump
/// honors: while `enabled` is off the pump keeps the device open but writes
/// no samples (the transceiver slot stays occupied, no renegotiation);
/// once `stopped` the pump must release the device and exit.
#[derive(Clone)]
pub struct LocalTrack {
    rtc: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl LocalTrack {
    /// Wrap an existing track, enabled by default.
    pub fn new(rtc: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            rtc,
            enabled: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create an Opus audio track with the given track id.
    pub fn audio(id: &str) -> Self {
        Self::new(Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            id.to_owned(),
            "roomlink".to_owned(),
        )))
    }

    /// Create a VP8 video track with the given track id.
    pub fn video(id: &str) -> Self {
        Self::new(Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            id.to_owned(),
            "roomlink".to_owned(),
        )))
    }

    /// The underlying sample track, for the capture pump.
    pub fn rtc(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.rtc)
    }

    /// View as the trait object peer connections accept.
    pub fn as_track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.rtc) as Arc<dyn TrackLocal + Send + Sync>
    }

    /// Track id, as negotiated with peers.
    pub fn id(&self) -> String {
        self.rtc.id().to_owned()
    }

    /// Flip the enabled flag in place. The track keeps its slot in every
    /// peer connection; only the sample flow changes.
    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Stop the track for good. The capture pump releases the device.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.rtc.id())
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// A display-capture track plus the signal that fires when capture ends
/// outside the application (the platform's own "stop sharing" affordance).
pub struct ScreenCapture {
    pub track: LocalTrack,
    pub ended: oneshot::Receiver<()>,
}

/// Capture device provider.
///
/// Each request may prompt the user for permission and therefore take
/// unbounded time; callers must not hold up unrelated work while waiting.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire a microphone track.
    async fn request_audio(&self) -> Result<LocalTrack, CaptureError>;

    /// Acquire a camera track. Each call opens the device anew; the track
    /// from a previous call must have been stopped.
    async fn request_camera(&self) -> Result<LocalTrack, CaptureError>;

    /// Acquire a display-capture track.
    async fn request_screen(&self) -> Result<ScreenCapture, CaptureError>;
}
