//! Room orchestrator
//!
//! The client facade and the task behind it. [`RoomClient`] hands commands
//! to a single driver task that owns everything mutable: the signaling
//! channel, the per-peer links, and the local media state. Each signaling
//! event and each command is handled to completion before the next, so no
//! locking is needed anywhere in the mesh.
//!
//! Offer glare is prevented structurally: for every pair of participants,
//! exactly one side initiates, decided by comparing session ids. The relay
//! assigns ids in connection order, so the newer participant offers to
//! everyone it finds in the join snapshot, and existing participants wait.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use webrtc::peer_connection::RTCPeerConnection;

use crate::client::capture::{CaptureError, MediaSource};
use crate::client::config::ClientConfig;
use crate::client::link::{PeerLink, RemoteMedia};
use crate::client::media::LocalMedia;
use crate::client::signaling::{ChannelEvent, SignalingChannel};
use crate::error::{Error, Result};
use crate::protocol::{ClientMessage, MemberInfo, RoomId, ServerMessage, SessionId};

/// Events surfaced to the application
#[derive(Debug)]
pub enum RoomEvent {
    /// A room was allocated in response to [`RoomClient::create_room`]
    RoomCreated { room_id: RoomId },
    /// We are in the room. `peers` is everyone who was already there.
    Joined {
        room_id: RoomId,
        local_id: SessionId,
        peers: Vec<MemberInfo>,
    },
    /// Reply to [`RoomClient::room_info`]
    RoomInfo {
        exists: bool,
        members: Vec<MemberInfo>,
    },
    PeerJoined {
        peer: SessionId,
        display_name: String,
        is_audio_on: bool,
        is_video_on: bool,
    },
    PeerLeft {
        peer: SessionId,
        display_name: String,
    },
    /// Remote tracks started arriving from a peer
    MediaArrived(RemoteMedia),
    PeerAudioToggled { peer: SessionId, on: bool },
    PeerVideoToggled { peer: SessionId, on: bool },
    Chat {
        from: SessionId,
        display_name: String,
        message: String,
        timestamp: u64,
    },
    /// A capture device was denied or missing; the session continues
    /// without it
    CaptureUnavailable { error: CaptureError },
    /// Negotiation with one peer failed; that link is gone, the rest of
    /// the mesh is untouched
    LinkFailed { peer: SessionId },
    /// The platform ended screen capture (for example via its own stop
    /// affordance); the camera has been restored if video was on
    ScreenShareEnded,
    /// The signaling connection is gone for good
    Disconnected,
}

enum Command {
    CreateRoom { display_name: String },
    Join { room_id: RoomId, display_name: String },
    RoomInfo { room_id: RoomId },
    Leave,
    SetAudio(bool),
    SetVideo(bool),
    StartScreenShare,
    StopScreenShare,
    SendChat(String),
}

/// Handle to a running mesh client
///
/// All methods queue work for the driver task and return immediately;
/// outcomes arrive as [`RoomEvent`]s.
#[derive(Clone)]
pub struct RoomClient {
    commands: mpsc::UnboundedSender<Command>,
}

impl RoomClient {
    /// Connect to the signaling server and start the driver task.
    pub async fn connect(
        config: ClientConfig,
        source: Arc<dyn MediaSource>,
    ) -> Result<(Self, mpsc::Receiver<RoomEvent>)> {
        let (signal, channel_rx) = SignalingChannel::connect(&config).await?;
        let (commands, cmd_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::channel(64);
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let (remote_media_tx, remote_media_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            config,
            source,
            signal,
            events,
            notices,
            remote_media_tx,
            links: HashMap::new(),
            roster: HashMap::new(),
            media: LocalMedia::new(),
            local_id: None,
            room: None,
            display_name: None,
        };
        tokio::spawn(driver.run(cmd_rx, channel_rx, notice_rx, remote_media_rx));

        Ok((Self { commands }, event_rx))
    }

    /// Allocate a fresh room. Answered by [`RoomEvent::RoomCreated`];
    /// creating does not join.
    pub fn create_room(&self, display_name: impl Into<String>) -> Result<()> {
        self.send(Command::CreateRoom {
            display_name: display_name.into(),
        })
    }

    /// Join a room, creating it if absent. Answered by
    /// [`RoomEvent::Joined`].
    pub fn join(&self, room_id: RoomId, display_name: impl Into<String>) -> Result<()> {
        self.send(Command::Join {
            room_id,
            display_name: display_name.into(),
        })
    }

    /// Look a room up without joining. Answered by [`RoomEvent::RoomInfo`].
    pub fn room_info(&self, room_id: RoomId) -> Result<()> {
        self.send(Command::RoomInfo { room_id })
    }

    /// Leave the room and shut the client down. The relay removes us the
    /// moment the connection closes; there is no separate leave message.
    pub fn leave(&self) -> Result<()> {
        self.send(Command::Leave)
    }

    /// Mute or unmute the microphone
    pub fn set_audio_enabled(&self, on: bool) -> Result<()> {
        self.send(Command::SetAudio(on))
    }

    /// Turn the camera on or off
    pub fn set_video_enabled(&self, on: bool) -> Result<()> {
        self.send(Command::SetVideo(on))
    }

    /// Share the screen in place of the camera
    pub fn start_screen_share(&self) -> Result<()> {
        self.send(Command::StartScreenShare)
    }

    /// Stop sharing the screen
    pub fn stop_screen_share(&self) -> Result<()> {
        self.send(Command::StopScreenShare)
    }

    /// Send a chat message to the room
    pub fn send_chat(&self, message: impl Into<String>) -> Result<()> {
        self.send(Command::SendChat(message.into()))
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::ChannelClosed)
    }
}

/// Internal signals funneled into the driver's select loop
enum Notice {
    ScreenEnded,
}

struct LinkSlot {
    link: PeerLink,
    /// True if we sent the offer on this link
    initiated: bool,
}

/// The single-owner driver behind [`RoomClient`]
struct Driver {
    config: ClientConfig,
    source: Arc<dyn MediaSource>,
    signal: SignalingChannel,
    events: mpsc::Sender<RoomEvent>,
    notices: mpsc::UnboundedSender<Notice>,
    /// Every link trickles its remote media into this one channel
    remote_media_tx: mpsc::UnboundedSender<RemoteMedia>,
    links: HashMap<SessionId, LinkSlot>,
    /// Display names learned from membership messages, needed when an
    /// offer arrives before any link exists
    roster: HashMap<SessionId, String>,
    media: LocalMedia,
    local_id: Option<SessionId>,
    room: Option<RoomId>,
    display_name: Option<String>,
}

impl Driver {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut channel_rx: mpsc::Receiver<ChannelEvent>,
        mut notice_rx: mpsc::UnboundedReceiver<Notice>,
        mut remote_media_rx: mpsc::UnboundedReceiver<RemoteMedia>,
    ) {
        loop {
            tokio::select! {
                command = cmd_rx.recv() => {
                    match command {
                        Some(Command::Leave) | None => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }
                event = channel_rx.recv() => {
                    match event {
                        Some(ChannelEvent::Message(message)) => {
                            self.handle_server_message(message).await;
                        }
                        Some(ChannelEvent::Reconnected) => self.handle_reconnected().await,
                        Some(ChannelEvent::Closed) | None => {
                            let _ = self.events.send(RoomEvent::Disconnected).await;
                            break;
                        }
                    }
                }
                Some(media) = remote_media_rx.recv() => {
                    let _ = self.events.send(RoomEvent::MediaArrived(media)).await;
                }
                notice = notice_rx.recv() => {
                    match notice {
                        Some(Notice::ScreenEnded) => self.handle_screen_ended().await,
                        None => break,
                    }
                }
            }
        }

        self.teardown().await;
    }

    async fn teardown(&mut self) {
        for (_, mut slot) in self.links.drain() {
            slot.link.close().await;
        }
        self.media.release();
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::CreateRoom { display_name } => {
                if let Err(e) = self.signal.send(ClientMessage::CreateRoom { display_name }) {
                    tracing::warn!(error = %e, "Failed to send create-room");
                }
            }
            Command::Join {
                room_id,
                display_name,
            } => {
                self.display_name = Some(display_name.clone());
                if let Err(e) = self.signal.send(ClientMessage::JoinRoom {
                    room_id,
                    display_name,
                }) {
                    tracing::warn!(error = %e, "Failed to send join-room");
                }
            }
            Command::RoomInfo { room_id } => {
                if let Err(e) = self.signal.send(ClientMessage::GetRoomInfo { room_id }) {
                    tracing::warn!(error = %e, "Failed to send get-room-info");
                }
            }
            Command::Leave => unreachable!("handled in the select loop"),
            Command::SetAudio(on) => {
                let pcs = self.pcs();
                if let Err(e) = self
                    .media
                    .set_audio_enabled(on, self.source.as_ref(), &pcs)
                    .await
                {
                    self.report_media_error(e).await;
                    return;
                }
                self.announce_audio_flag().await;
            }
            Command::SetVideo(on) => {
                let pcs = self.pcs();
                if let Err(e) = self
                    .media
                    .set_video_enabled(on, self.source.as_ref(), &pcs)
                    .await
                {
                    self.report_media_error(e).await;
                    return;
                }
                self.announce_video_flag().await;
            }
            Command::StartScreenShare => {
                if self.media.screen_sharing() {
                    return;
                }
                let pcs = self.pcs();
                match self
                    .media
                    .start_screen_share(self.source.as_ref(), &pcs)
                    .await
                {
                    Ok(ended) => self.watch_screen_capture(ended),
                    Err(e) => self.report_media_error(e).await,
                }
            }
            Command::StopScreenShare => {
                let pcs = self.pcs();
                if let Err(e) = self
                    .media
                    .stop_screen_share(self.source.as_ref(), &pcs)
                    .await
                {
                    // Camera restore failed; video is now off
                    self.report_media_error(e).await;
                    self.announce_video_flag().await;
                }
            }
            Command::SendChat(message) => {
                let (Some(room_id), Some(display_name)) = (&self.room, &self.display_name) else {
                    tracing::debug!("Chat dropped: not in a room");
                    return;
                };
                if let Err(e) = self.signal.send(ClientMessage::SendMessage {
                    room_id: room_id.clone(),
                    message,
                    display_name: display_name.clone(),
                }) {
                    tracing::warn!(error = %e, "Failed to send chat message");
                }
            }
        }
    }

    async fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::RoomCreated { room_id, .. } => {
                let _ = self.events.send(RoomEvent::RoomCreated { room_id }).await;
            }
            ServerMessage::RoomJoined {
                room_id,
                user_id,
                users,
            } => self.handle_joined(room_id, user_id, users).await,
            ServerMessage::RoomInfo {
                exists,
                users,
                ..
            } => {
                let _ = self
                    .events
                    .send(RoomEvent::RoomInfo {
                        exists,
                        members: users.unwrap_or_default(),
                    })
                    .await;
            }
            ServerMessage::UserJoined {
                user_id,
                display_name,
                is_audio_on,
                is_video_on,
                ..
            } => {
                self.roster.insert(user_id.clone(), display_name.clone());
                let _ = self
                    .events
                    .send(RoomEvent::PeerJoined {
                        peer: user_id.clone(),
                        display_name: display_name.clone(),
                        is_audio_on,
                        is_video_on,
                    })
                    .await;

                // The side with the larger id offers; the other waits.
                if self.initiates_to(&user_id) {
                    if let Err(e) = self.open_link(user_id.clone(), display_name, true).await {
                        tracing::warn!(peer = %user_id, error = %e, "Failed to open link");
                        self.fail_link(&user_id).await;
                    }
                }
            }
            ServerMessage::UserLeft {
                user_id,
                display_name,
                ..
            } => {
                self.roster.remove(&user_id);
                if let Some(mut slot) = self.links.remove(&user_id) {
                    slot.link.close().await;
                }
                let _ = self
                    .events
                    .send(RoomEvent::PeerLeft {
                        peer: user_id,
                        display_name,
                    })
                    .await;
            }
            ServerMessage::Offer { payload, from } => self.handle_offer(from, payload).await,
            ServerMessage::Answer { payload, from } => self.handle_answer(from, payload).await,
            ServerMessage::IceCandidate { payload, from } => {
                match self.links.get_mut(&from) {
                    Some(slot) => slot.link.add_ice_candidate(payload).await,
                    None => {
                        tracing::debug!(peer = %from, "Candidate for unknown link dropped");
                    }
                }
            }
            ServerMessage::UserAudioToggled {
                user_id,
                is_audio_on,
            } => {
                let _ = self
                    .events
                    .send(RoomEvent::PeerAudioToggled {
                        peer: user_id,
                        on: is_audio_on,
                    })
                    .await;
            }
            ServerMessage::UserVideoToggled {
                user_id,
                is_video_on,
            } => {
                let _ = self
                    .events
                    .send(RoomEvent::PeerVideoToggled {
                        peer: user_id,
                        on: is_video_on,
                    })
                    .await;
            }
            ServerMessage::NewMessage {
                user_id,
                display_name,
                message,
                timestamp,
            } => {
                let _ = self
                    .events
                    .send(RoomEvent::Chat {
                        from: user_id,
                        display_name,
                        message,
                        timestamp,
                    })
                    .await;
            }
        }
    }

    async fn handle_joined(
        &mut self,
        room_id: RoomId,
        local_id: SessionId,
        users: Vec<MemberInfo>,
    ) {
        tracing::info!(room = %room_id, id = %local_id, peers = users.len(), "Joined room");
        self.local_id = Some(local_id.clone());
        self.room = Some(room_id.clone());
        for member in &users {
            self.roster.insert(member.id.clone(), member.name.clone());
        }

        let _ = self
            .events
            .send(RoomEvent::Joined {
                room_id,
                local_id,
                peers: users.clone(),
            })
            .await;

        // Acquire devices up front; a denial costs the feature, not the
        // session.
        if let Err(e) = self.media.ensure_audio(self.source.as_ref(), &[]).await {
            self.report_media_error(e).await;
        }
        if let Err(e) = self.media.ensure_video(self.source.as_ref(), &[]).await {
            self.report_media_error(e).await;
        }

        for member in users {
            if self.initiates_to(&member.id) {
                if let Err(e) = self.open_link(member.id.clone(), member.name, true).await {
                    tracing::warn!(peer = %member.id, error = %e, "Failed to open link");
                    self.fail_link(&member.id).await;
                }
            }
        }
    }

    async fn handle_offer(&mut self, from: SessionId, payload: Value) {
        if let Some(slot) = self.links.get(&from) {
            if slot.initiated {
                // Both sides offering means the tie-break was violated;
                // keep our offer and let the remote answer it.
                tracing::warn!(peer = %from, "Unexpected offer on an initiated link, ignoring");
                return;
            }
        } else {
            let display_name = self.peer_display_name(&from);
            if let Err(e) = self.open_link(from.clone(), display_name, false).await {
                tracing::warn!(peer = %from, error = %e, "Failed to open link for offer");
                self.fail_link(&from).await;
                return;
            }
        }

        let result = self.answer_offer(&from, payload).await;
        if let Err(e) = result {
            tracing::warn!(peer = %from, error = %e, "Negotiation failed");
            self.fail_link(&from).await;
        }
    }

    async fn answer_offer(&mut self, from: &SessionId, payload: Value) -> Result<()> {
        let Some(slot) = self.links.get_mut(from) else {
            return Ok(());
        };
        slot.link.apply_remote_description(payload).await?;
        let answer = slot.link.create_answer().await?;
        self.signal.send(ClientMessage::Answer {
            payload: answer,
            to: from.clone(),
        })?;
        Ok(())
    }

    async fn handle_answer(&mut self, from: SessionId, payload: Value) {
        let Some(slot) = self.links.get_mut(&from) else {
            tracing::debug!(peer = %from, "Answer for unknown link dropped");
            return;
        };
        if let Err(e) = slot.link.apply_remote_description(payload).await {
            tracing::warn!(peer = %from, error = %e, "Negotiation failed");
            self.fail_link(&from).await;
        }
    }

    async fn handle_reconnected(&mut self) {
        // The relay forgot us; every link's signaling context is gone.
        tracing::info!("Signaling reconnected, rebuilding session");
        let stale: Vec<(SessionId, LinkSlot)> = self.links.drain().collect();
        for (peer, mut slot) in stale {
            let display_name = slot.link.display_name().to_string();
            slot.link.close().await;
            let _ = self
                .events
                .send(RoomEvent::PeerLeft { peer, display_name })
                .await;
        }
        self.roster.clear();
        self.local_id = None;

        if let (Some(room_id), Some(display_name)) = (self.room.clone(), self.display_name.clone())
        {
            if let Err(e) = self.signal.send(ClientMessage::JoinRoom {
                room_id,
                display_name,
            }) {
                tracing::warn!(error = %e, "Failed to rejoin after reconnect");
            }
        }
    }

    async fn handle_screen_ended(&mut self) {
        if !self.media.screen_sharing() {
            return; // Stale notice from a share already stopped by command
        }
        let pcs = self.pcs();
        if let Err(e) = self
            .media
            .stop_screen_share(self.source.as_ref(), &pcs)
            .await
        {
            self.report_media_error(e).await;
            self.announce_video_flag().await;
        }
        let _ = self.events.send(RoomEvent::ScreenShareEnded).await;
    }

    /// Build a link to `peer`, attach local tracks, and offer if we are
    /// the initiating side.
    ///
    /// At most one link per peer: a repeated join notice or snapshot entry
    /// for an already-linked peer must not disturb the negotiation in
    /// flight, so it is ignored here.
    async fn open_link(
        &mut self,
        peer: SessionId,
        display_name: String,
        initiated: bool,
    ) -> Result<()> {
        if self.links.contains_key(&peer) {
            tracing::debug!(peer = %peer, "Link already open, ignoring duplicate notice");
            return Ok(());
        }

        let mut link = PeerLink::new(
            peer.clone(),
            display_name,
            &self.config,
            self.signal.clone(),
            self.remote_media_tx.clone(),
        )
        .await?;

        self.media.attach_to(&link.pc()).await?;

        if initiated {
            let offer = link.create_offer().await?;
            self.signal.send(ClientMessage::Offer {
                payload: offer,
                to: peer.clone(),
            })?;
        }

        tracing::debug!(peer = %peer, initiated, "Link opened");
        self.links.insert(peer, LinkSlot { link, initiated });
        Ok(())
    }

    /// Drop one failed link; the rest of the mesh is untouched.
    async fn fail_link(&mut self, peer: &SessionId) {
        if let Some(mut slot) = self.links.remove(peer) {
            slot.link.close().await;
        }
        let _ = self
            .events
            .send(RoomEvent::LinkFailed { peer: peer.clone() })
            .await;
    }

    fn initiates_to(&self, peer: &SessionId) -> bool {
        self.local_id
            .as_ref()
            .map(|local| local.initiates_to(peer))
            .unwrap_or(false)
    }

    fn peer_display_name(&self, peer: &SessionId) -> String {
        self.roster.get(peer).cloned().unwrap_or_default()
    }

    fn pcs(&self) -> Vec<Arc<RTCPeerConnection>> {
        self.links.values().map(|slot| slot.link.pc()).collect()
    }

    fn watch_screen_capture(&self, ended: oneshot::Receiver<()>) {
        let notices = self.notices.clone();
        tokio::spawn(async move {
            // Err means the capture side was dropped without signaling an
            // external stop; nothing to do then.
            if ended.await.is_ok() {
                let _ = notices.send(Notice::ScreenEnded);
            }
        });
    }

    async fn report_media_error(&self, error: Error) {
        match error {
            Error::Capture(error) => {
                tracing::warn!(error = %error, "Capture unavailable");
                let _ = self
                    .events
                    .send(RoomEvent::CaptureUnavailable { error })
                    .await;
            }
            other => {
                tracing::error!(error = %other, "Media operation failed");
            }
        }
    }

    async fn announce_audio_flag(&self) {
        let Some(user_id) = self.local_id.clone() else {
            return;
        };
        if let Err(e) = self.signal.send(ClientMessage::UserToggleAudio {
            user_id,
            is_audio_on: self.media.audio_enabled(),
        }) {
            tracing::warn!(error = %e, "Failed to announce audio flag");
        }
    }

    async fn announce_video_flag(&self) {
        let Some(user_id) = self.local_id.clone() else {
            return;
        };
        if let Err(e) = self.signal.send(ClientMessage::UserToggleVideo {
            user_id,
            is_video_on: self.media.video_enabled(),
        }) {
            tracing::warn!(error = %e, "Failed to announce video flag");
        }
    }
}
