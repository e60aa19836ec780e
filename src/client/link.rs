//! Peer link
//!
//! One WebRTC peer connection to one remote participant. The link owns the
//! negotiation state machine and the candidate queue; the orchestrator
//! decides who offers and feeds signaling payloads in.
//!
//! Negotiation payloads stay opaque `serde_json::Value`s on the wire and
//! are only decoded at the edge, right before they hit the peer connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_remote::TrackRemote;

use crate::client::config::ClientConfig;
use crate::client::signaling::SignalingChannel;
use crate::error::Result;
use crate::protocol::{ClientMessage, SessionId};

/// Negotiation phase of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    /// Created, negotiation in flight
    Linking,
    /// Both descriptions applied; media flows as ICE completes
    Established,
    /// Torn down
    Closed,
}

/// The remote tracks arriving over one link.
///
/// Announced to the application once, when the first track arrives; later
/// tracks on the same link land in the shared vector.
#[derive(Clone)]
pub struct RemoteMedia {
    peer: SessionId,
    display_name: String,
    tracks: Arc<Mutex<Vec<Arc<TrackRemote>>>>,
}

impl RemoteMedia {
    fn new(peer: SessionId, display_name: String) -> Self {
        Self {
            peer,
            display_name,
            tracks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The participant these tracks belong to
    pub fn peer(&self) -> &SessionId {
        &self.peer
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Snapshot of the tracks received so far
    pub fn tracks(&self) -> Vec<Arc<TrackRemote>> {
        self.tracks.lock().map(|t| t.clone()).unwrap_or_default()
    }

    fn push(&self, track: Arc<TrackRemote>) {
        if let Ok(mut tracks) = self.tracks.lock() {
            tracks.push(track);
        }
    }
}

impl std::fmt::Debug for RemoteMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteMedia")
            .field("peer", &self.peer)
            .field("display_name", &self.display_name)
            .field("tracks", &self.tracks().len())
            .finish()
    }
}

/// A single peer-to-peer connection within the mesh
pub struct PeerLink {
    remote: SessionId,
    display_name: String,
    phase: LinkPhase,
    pc: Arc<RTCPeerConnection>,
    /// Candidates that arrived before the remote description; flushed the
    /// moment it lands
    pending_candidates: Vec<Value>,
    have_local_description: bool,
    have_remote_description: bool,
}

impl PeerLink {
    /// Build the peer connection and wire its callbacks.
    ///
    /// Locally gathered candidates are trickled to the remote through
    /// `signal`; the link's [`RemoteMedia`] is pushed into `media_tx` when
    /// the first remote track arrives.
    pub async fn new(
        remote: SessionId,
        display_name: String,
        config: &ClientConfig,
        signal: SignalingChannel,
        media_tx: mpsc::UnboundedSender<RemoteMedia>,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let api = APIBuilder::new().with_media_engine(media_engine).build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await?);

        let candidate_target = remote.clone();
        let candidate_signal = signal.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => match serde_json::to_value(&init) {
                        Ok(payload) => {
                            let _ = candidate_signal.send(ClientMessage::IceCandidate {
                                payload,
                                to: candidate_target.clone(),
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize ICE candidate");
                        }
                    },
                    Err(e) => {
                        tracing::debug!(error = %e, "Unusable local ICE candidate");
                    }
                }
            }
            Box::pin(async {})
        }));

        let media = RemoteMedia::new(remote.clone(), display_name.clone());
        let announced = Arc::new(AtomicBool::new(false));
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            tracing::debug!(
                peer = %media.peer(),
                kind = %track.kind(),
                "Remote track arrived"
            );
            media.push(track);
            if !announced.swap(true, Ordering::SeqCst) {
                let _ = media_tx.send(media.clone());
            }
            Box::pin(async {})
        }));

        Ok(Self {
            remote,
            display_name,
            phase: LinkPhase::Linking,
            pc,
            pending_candidates: Vec::new(),
            have_local_description: false,
            have_remote_description: false,
        })
    }

    /// The remote participant this link connects to
    pub fn remote(&self) -> &SessionId {
        &self.remote
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    /// The underlying peer connection, for track attachment
    pub fn pc(&self) -> Arc<RTCPeerConnection> {
        Arc::clone(&self.pc)
    }

    /// Create an offer and apply it locally
    pub async fn create_offer(&mut self) -> Result<Value> {
        let offer = self.pc.create_offer(None).await?;
        let payload = serde_json::to_value(&offer)?;
        self.pc.set_local_description(offer).await?;
        self.have_local_description = true;
        Ok(payload)
    }

    /// Create an answer and apply it locally. Valid only after the remote
    /// offer has been applied.
    pub async fn create_answer(&mut self) -> Result<Value> {
        let answer = self.pc.create_answer(None).await?;
        let payload = serde_json::to_value(&answer)?;
        self.pc.set_local_description(answer).await?;
        self.have_local_description = true;
        self.maybe_established();
        Ok(payload)
    }

    /// Apply the remote description (offer or answer) and flush any
    /// candidates that arrived early.
    pub async fn apply_remote_description(&mut self, payload: Value) -> Result<()> {
        let description: RTCSessionDescription = serde_json::from_value(payload)?;
        self.pc.set_remote_description(description).await?;
        self.have_remote_description = true;
        self.maybe_established();

        for payload in std::mem::take(&mut self.pending_candidates) {
            self.apply_candidate(payload).await;
        }

        Ok(())
    }

    /// Feed a remote ICE candidate. Queued if the remote description has
    /// not been applied yet.
    pub async fn add_ice_candidate(&mut self, payload: Value) {
        if self.have_remote_description {
            self.apply_candidate(payload).await;
        } else {
            self.pending_candidates.push(payload);
        }
    }

    /// Tear the link down
    pub async fn close(&mut self) {
        self.phase = LinkPhase::Closed;
        if let Err(e) = self.pc.close().await {
            tracing::debug!(peer = %self.remote, error = %e, "Error closing peer connection");
        }
    }

    fn maybe_established(&mut self) {
        if self.have_local_description && self.have_remote_description {
            self.phase = LinkPhase::Established;
            tracing::info!(peer = %self.remote, "Link established");
        }
    }

    /// A bad candidate only degrades connectivity options; it never fails
    /// the link.
    async fn apply_candidate(&self, payload: Value) {
        let init: RTCIceCandidateInit = match serde_json::from_value(payload) {
            Ok(init) => init,
            Err(e) => {
                tracing::debug!(peer = %self.remote, error = %e, "Ignoring malformed ICE candidate");
                return;
            }
        };
        if let Err(e) = self.pc.add_ice_candidate(init).await {
            tracing::debug!(peer = %self.remote, error = %e, "Failed to apply ICE candidate");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::capture::LocalTrack;

    async fn test_link(remote: &str) -> PeerLink {
        let (signal, _out) = SignalingChannel::sink();
        let (media_tx, _media_rx) = mpsc::unbounded_channel();
        PeerLink::new(
            SessionId::from(remote),
            "peer".to_string(),
            &ClientConfig::default().ice_servers(Vec::new()),
            signal,
            media_tx,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_starts_linking() {
        let link = test_link("0000000000000001").await;
        assert_eq!(link.phase(), LinkPhase::Linking);
    }

    #[tokio::test]
    async fn test_candidates_queue_before_remote_description() {
        let mut link = test_link("0000000000000001").await;

        link.add_ice_candidate(serde_json::json!({"candidate": "x"}))
            .await;
        link.add_ice_candidate(serde_json::json!({"candidate": "y"}))
            .await;

        assert_eq!(link.pending_candidates.len(), 2);
        assert_eq!(link.phase(), LinkPhase::Linking);
    }

    #[tokio::test]
    async fn test_offer_answer_establishes_both_links() {
        let mut offerer = test_link("0000000000000002").await;
        let mut answerer = test_link("0000000000000001").await;

        // An outgoing track so the offer carries a media section
        let mic = LocalTrack::audio("mic");
        offerer.pc().add_track(mic.as_track_local()).await.unwrap();

        // A queued (bogus) candidate must be flushed, not fail the link
        answerer
            .add_ice_candidate(serde_json::json!({"bogus": true}))
            .await;
        assert_eq!(answerer.pending_candidates.len(), 1);

        let offer = offerer.create_offer().await.unwrap();
        answerer.apply_remote_description(offer).await.unwrap();
        assert!(answerer.pending_candidates.is_empty());

        let answer = answerer.create_answer().await.unwrap();
        assert_eq!(answerer.phase(), LinkPhase::Established);

        offerer.apply_remote_description(answer).await.unwrap();
        assert_eq!(offerer.phase(), LinkPhase::Established);

        offerer.close().await;
        assert_eq!(offerer.phase(), LinkPhase::Closed);
        answerer.close().await;
    }
}
