//! Local media lifecycle
//!
//! Owns the microphone, camera, and screen tracks and keeps the outgoing
//! side of every peer connection consistent with them. The rules mirror
//! what users expect from a meeting client:
//!
//! - Muting audio flips the enabled flag in place; the device stays open
//!   and the track keeps its negotiated slot.
//! - Turning the camera off releases the device; the video sender keeps
//!   its slot with no track, so turning it back on needs no renegotiation.
//! - Screen share borrows the video slot: it replaces the camera on every
//!   link, and stopping it restores the camera if video is still on.

use std::sync::Arc;

use tokio::sync::oneshot;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;

use crate::client::capture::{LocalTrack, MediaSource};
use crate::error::{Error, Result};

/// Local capture state shared by every link
pub struct LocalMedia {
    audio: Option<LocalTrack>,
    camera: Option<LocalTrack>,
    screen: Option<LocalTrack>,
    audio_enabled: bool,
    video_enabled: bool,
}

impl Default for LocalMedia {
    fn default() -> Self {
        Self {
            audio: None,
            camera: None,
            screen: None,
            audio_enabled: true,
            video_enabled: true,
        }
    }
}

impl LocalMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    pub fn video_enabled(&self) -> bool {
        self.video_enabled
    }

    pub fn screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    /// The track currently occupying the video slot, if any
    fn outbound_video(&self) -> Option<&LocalTrack> {
        self.screen
            .as_ref()
            .or(if self.video_enabled { self.camera.as_ref() } else { None })
    }

    /// Acquire the microphone if we do not hold it yet and attach it to
    /// every connection. Idempotent.
    pub async fn ensure_audio(
        &mut self,
        source: &dyn MediaSource,
        pcs: &[Arc<RTCPeerConnection>],
    ) -> Result<()> {
        if self.audio.is_some() {
            return Ok(());
        }

        let track = source.request_audio().await.map_err(Error::Capture)?;
        track.set_enabled(self.audio_enabled);
        for pc in pcs {
            pc.add_track(track.as_track_local()).await?;
        }
        tracing::info!(track = %track.id(), "Microphone acquired");
        self.audio = Some(track);
        Ok(())
    }

    /// Acquire the camera if video is on and nothing occupies the video
    /// slot yet. Idempotent.
    pub async fn ensure_video(
        &mut self,
        source: &dyn MediaSource,
        pcs: &[Arc<RTCPeerConnection>],
    ) -> Result<()> {
        if !self.video_enabled || self.screen.is_some() || self.camera.is_some() {
            return Ok(());
        }

        let track = source.request_camera().await.map_err(Error::Capture)?;
        tracing::info!(track = %track.id(), "Camera acquired");
        self.camera = Some(track.clone());
        replace_video_everywhere(pcs, Some(&track)).await?;
        Ok(())
    }

    /// Mute or unmute the microphone. Acquires the device on first unmute
    /// if it was never granted; a denied acquisition leaves the flag off so
    /// state never claims a microphone that does not exist.
    pub async fn set_audio_enabled(
        &mut self,
        on: bool,
        source: &dyn MediaSource,
        pcs: &[Arc<RTCPeerConnection>],
    ) -> Result<()> {
        match &self.audio {
            Some(track) => {
                track.set_enabled(on);
                self.audio_enabled = on;
                Ok(())
            }
            None if on => {
                self.audio_enabled = true;
                if let Err(e) = self.ensure_audio(source, pcs).await {
                    self.audio_enabled = false;
                    return Err(e);
                }
                Ok(())
            }
            None => {
                self.audio_enabled = false;
                Ok(())
            }
        }
    }

    /// Turn the camera on or off. As with audio, the flag only sticks if
    /// the device is actually acquired.
    pub async fn set_video_enabled(
        &mut self,
        on: bool,
        source: &dyn MediaSource,
        pcs: &[Arc<RTCPeerConnection>],
    ) -> Result<()> {
        self.video_enabled = on;

        // While screen sharing the video slot belongs to the screen; the
        // flag takes effect when sharing stops.
        if self.screen.is_some() {
            return Ok(());
        }

        if on {
            if let Err(e) = self.ensure_video(source, pcs).await {
                self.video_enabled = false;
                return Err(e);
            }
            Ok(())
        } else {
            if let Some(camera) = self.camera.take() {
                camera.stop();
            }
            replace_video_everywhere(pcs, None).await
        }
    }

    /// Start sharing the screen in place of the camera.
    ///
    /// Returns the receiver that fires when capture ends outside the
    /// application.
    pub async fn start_screen_share(
        &mut self,
        source: &dyn MediaSource,
        pcs: &[Arc<RTCPeerConnection>],
    ) -> Result<oneshot::Receiver<()>> {
        let capture = source.request_screen().await.map_err(Error::Capture)?;

        if let Some(camera) = self.camera.take() {
            camera.stop();
        }

        tracing::info!(track = %capture.track.id(), "Screen share started");
        self.screen = Some(capture.track.clone());
        replace_video_everywhere(pcs, Some(&capture.track)).await?;
        Ok(capture.ended)
    }

    /// Stop sharing the screen and restore the camera if video is on.
    ///
    /// If the camera cannot be re-acquired, video ends up off and the
    /// capture error is returned; the links themselves are unaffected.
    pub async fn stop_screen_share(
        &mut self,
        source: &dyn MediaSource,
        pcs: &[Arc<RTCPeerConnection>],
    ) -> Result<()> {
        let Some(screen) = self.screen.take() else {
            return Ok(());
        };
        screen.stop();
        tracing::info!("Screen share stopped");

        if self.video_enabled {
            match source.request_camera().await {
                Ok(camera) => {
                    self.camera = Some(camera.clone());
                    replace_video_everywhere(pcs, Some(&camera)).await?;
                    Ok(())
                }
                Err(e) => {
                    self.video_enabled = false;
                    replace_video_everywhere(pcs, None).await?;
                    Err(Error::Capture(e))
                }
            }
        } else {
            replace_video_everywhere(pcs, None).await
        }
    }

    /// Attach the current outgoing tracks to a freshly created connection.
    pub async fn attach_to(&self, pc: &Arc<RTCPeerConnection>) -> Result<()> {
        if let Some(audio) = &self.audio {
            pc.add_track(audio.as_track_local()).await?;
        }
        if let Some(video) = self.outbound_video() {
            pc.add_track(video.as_track_local()).await?;
        }
        Ok(())
    }

    /// Release every device. Used when the client leaves the room.
    pub fn release(&mut self) {
        for track in [self.audio.take(), self.camera.take(), self.screen.take()]
            .into_iter()
            .flatten()
        {
            track.stop();
        }
    }
}

/// Swap the track occupying the video slot on every connection.
///
/// A connection with no video sender yet gets one via `add_track`; one
/// whose sender was cleared earlier gets the track back with
/// `replace_track`, avoiding renegotiation.
async fn replace_video_everywhere(
    pcs: &[Arc<RTCPeerConnection>],
    track: Option<&LocalTrack>,
) -> Result<()> {
    for pc in pcs {
        match video_sender(pc).await {
            Some(sender) => {
                sender
                    .replace_track(
                        track.map(|t| t.as_track_local() as Arc<dyn TrackLocal + Send + Sync>),
                    )
                    .await?;
            }
            None => {
                if let Some(track) = track {
                    pc.add_track(track.as_track_local()).await?;
                }
            }
        }
    }
    Ok(())
}

async fn video_sender(pc: &Arc<RTCPeerConnection>) -> Option<Arc<RTCRtpSender>> {
    for transceiver in pc.get_transceivers().await {
        if transceiver.kind() == RTPCodecType::Video {
            return Some(transceiver.sender().await);
        }
    }
    None
}
