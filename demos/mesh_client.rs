//! Headless mesh client
//!
//! Run with: cargo run --example mesh_client -- [SERVER_URL] ROOM_ID NAME
//!
//! Examples:
//!   cargo run --example mesh_client -- ws://localhost:3001 --create alice
//!   cargo run --example mesh_client -- ws://localhost:3001 a1b2c3d4 bob
//!
//! Joins a room and prints every event: membership changes, chat, media
//! flag toggles, and remote track arrivals. Capture devices are stubbed
//! with silent placeholder tracks so the mesh negotiates end to end
//! without any real hardware; swap in a real `MediaSource` implementation
//! to send actual audio and video.
//!
//! Type a line and press enter to send it to the room chat. Ctrl+C leaves.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncBufReadExt;
use tokio::sync::oneshot;

use roomlink::client::{CaptureError, LocalTrack, MediaSource, ScreenCapture};
use roomlink::{ClientConfig, RoomClient, RoomEvent};

/// Capture stub: hands out tracks that carry no samples.
///
/// Negotiation, track replacement, and flag propagation all behave exactly
/// as with live devices; peers simply receive silence.
struct PlaceholderSource;

#[async_trait]
impl MediaSource for PlaceholderSource {
    async fn request_audio(&self) -> Result<LocalTrack, CaptureError> {
        Ok(LocalTrack::audio("placeholder-mic"))
    }

    async fn request_camera(&self) -> Result<LocalTrack, CaptureError> {
        Ok(LocalTrack::video("placeholder-camera"))
    }

    async fn request_screen(&self) -> Result<ScreenCapture, CaptureError> {
        let (_tx, ended) = oneshot::channel();
        Ok(ScreenCapture {
            track: LocalTrack::video("placeholder-screen"),
            ended,
        })
    }
}

fn print_usage() {
    eprintln!("Usage: mesh_client [SERVER_URL] ROOM_ID NAME");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  SERVER_URL   Signaling server (default: ws://127.0.0.1:3001)");
    eprintln!("  ROOM_ID      Room to join, or --create to open a new one");
    eprintln!("  NAME         Display name shown to other participants");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  mesh_client ws://localhost:3001 --create alice");
    eprintln!("  mesh_client ws://localhost:3001 a1b2c3d4 bob");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") || args.len() < 2 {
        print_usage();
        if args.len() < 2 {
            std::process::exit(1);
        }
        return Ok(());
    }

    // With three args the first is the server URL
    let (server_url, room_arg, name) = if args.len() >= 3 {
        (args[0].clone(), args[1].clone(), args[2].clone())
    } else {
        (
            "ws://127.0.0.1:3001".to_string(),
            args[0].clone(),
            args[1].clone(),
        )
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("roomlink=info".parse()?),
        )
        .init();

    let config = ClientConfig::new(server_url);
    let (client, mut events) = RoomClient::connect(config, Arc::new(PlaceholderSource)).await?;

    if room_arg == "--create" {
        client.create_room(&name)?;
    } else {
        client.join(room_arg.as_str().into(), &name)?;
    }

    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Leaving...");
                let _ = client.leave();
                break;
            }
            line = stdin.next_line() => {
                if let Ok(Some(line)) = line {
                    if !line.trim().is_empty() {
                        client.send_chat(line)?;
                    }
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    RoomEvent::RoomCreated { room_id } => {
                        println!("Room created: {}", room_id);
                        println!("Others can join with: mesh_client <SERVER_URL> {} <NAME>", room_id);
                        client.join(room_id, &name)?;
                    }
                    RoomEvent::Joined { room_id, local_id, peers } => {
                        println!("Joined {} as {} ({} already here)", room_id, local_id, peers.len());
                        for peer in peers {
                            println!("  - {} ({})", peer.name, peer.id);
                        }
                    }
                    RoomEvent::PeerJoined { peer, display_name, .. } => {
                        println!("{} joined ({})", display_name, peer);
                    }
                    RoomEvent::PeerLeft { display_name, .. } => {
                        println!("{} left", display_name);
                    }
                    RoomEvent::MediaArrived(media) => {
                        println!("Media arriving from {} ({})", media.display_name(), media.peer());
                    }
                    RoomEvent::PeerAudioToggled { peer, on } => {
                        println!("{} {} their microphone", peer, if on { "unmuted" } else { "muted" });
                    }
                    RoomEvent::PeerVideoToggled { peer, on } => {
                        println!("{} turned their camera {}", peer, if on { "on" } else { "off" });
                    }
                    RoomEvent::Chat { display_name, message, .. } => {
                        println!("<{}> {}", display_name, message);
                    }
                    RoomEvent::CaptureUnavailable { error } => {
                        println!("Capture unavailable: {}", error);
                    }
                    RoomEvent::LinkFailed { peer } => {
                        println!("Link to {} failed", peer);
                    }
                    RoomEvent::ScreenShareEnded => {
                        println!("Screen share ended");
                    }
                    RoomEvent::RoomInfo { exists, members } => {
                        println!("Room info: exists={} members={}", exists, members.len());
                    }
                    RoomEvent::Disconnected => {
                        println!("Disconnected from signaling server.");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
