//! Signaling channel
//!
//! WebSocket connection to the relay server with automatic reconnection.
//! Outbound sends are fire-and-forget: the io task serializes and writes
//! them in order, and a send that races a dropped connection is simply
//! lost, the same as it would be in flight.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::client::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{ClientMessage, ServerMessage};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Events surfaced by the signaling channel
#[derive(Debug)]
pub enum ChannelEvent {
    /// A message from the relay server
    Message(ServerMessage),
    /// The connection dropped and was re-established. Any room membership
    /// is gone; the caller must join again.
    Reconnected,
    /// The connection is gone for good (reconnection attempts exhausted
    /// or the channel was dropped)
    Closed,
}

/// Handle to the signaling connection
///
/// Cloneable; dropping the last clone closes the connection.
#[derive(Clone)]
pub struct SignalingChannel {
    tx: mpsc::UnboundedSender<ClientMessage>,
}

impl SignalingChannel {
    /// Connect to the signaling server.
    ///
    /// Returns the channel handle and the stream of inbound events. The io
    /// task runs until the event receiver is dropped, every handle is
    /// dropped, or reconnection gives up.
    pub async fn connect(config: &ClientConfig) -> Result<(Self, mpsc::Receiver<ChannelEvent>)> {
        let (ws, _) = connect_async(&config.server_url).await?;
        tracing::info!(url = %config.server_url, "Connected to signaling server");

        let (tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(64);

        tokio::spawn(io_task(ws, config.clone(), out_rx, event_tx));

        Ok((Self { tx }, event_rx))
    }

    /// Queue a message for the relay server
    pub fn send(&self, message: ClientMessage) -> Result<()> {
        self.tx.send(message).map_err(|_| Error::ChannelClosed)
    }

    /// A channel with no server behind it; outbound messages land in the
    /// returned receiver.
    #[cfg(test)]
    pub(crate) fn sink() -> (Self, mpsc::UnboundedReceiver<ClientMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

async fn io_task(
    mut ws: WsStream,
    config: ClientConfig,
    mut out_rx: mpsc::UnboundedReceiver<ClientMessage>,
    events: mpsc::Sender<ChannelEvent>,
) {
    loop {
        match pump(&mut ws, &mut out_rx, &events).await {
            PumpExit::HandlesDropped => {
                let _ = ws.close(None).await;
                return;
            }
            PumpExit::ConnectionLost => {
                match reconnect(&config).await {
                    Some(fresh) => {
                        ws = fresh;
                        if events.send(ChannelEvent::Reconnected).await.is_err() {
                            return;
                        }
                    }
                    None => {
                        tracing::warn!("Signaling reconnection gave up");
                        let _ = events.send(ChannelEvent::Closed).await;
                        return;
                    }
                }
            }
        }
    }
}

enum PumpExit {
    /// Every sender handle and/or the event receiver is gone
    HandlesDropped,
    /// The WebSocket connection dropped
    ConnectionLost,
}

/// Drive one connection until it drops or the caller goes away.
async fn pump(
    ws: &mut WsStream,
    out_rx: &mut mpsc::UnboundedReceiver<ClientMessage>,
    events: &mpsc::Sender<ChannelEvent>,
) -> PumpExit {
    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                let Some(message) = outbound else {
                    return PumpExit::HandlesDropped;
                };
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize client message");
                        continue;
                    }
                };
                if ws.send(Message::Text(json)).await.is_err() {
                    return PumpExit::ConnectionLost;
                }
            }
            inbound = ws.next() => {
                let frame = match inbound {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Signaling read error");
                        return PumpExit::ConnectionLost;
                    }
                    None => return PumpExit::ConnectionLost,
                };

                match frame {
                    Message::Text(text) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(message) => {
                                if events.send(ChannelEvent::Message(message)).await.is_err() {
                                    return PumpExit::HandlesDropped;
                                }
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "Ignoring malformed server message");
                            }
                        }
                    }
                    Message::Close(_) => return PumpExit::ConnectionLost,
                    _ => {}
                }
            }
        }
    }
}

/// Retry the connection with a fixed delay between attempts.
async fn reconnect(config: &ClientConfig) -> Option<WsStream> {
    for attempt in 1..=config.reconnect_attempts {
        tracing::info!(
            attempt,
            max = config.reconnect_attempts,
            "Reconnecting to signaling server"
        );
        tokio::time::sleep(config.reconnect_delay).await;

        match connect_async(&config.server_url).await {
            Ok((ws, _)) => {
                tracing::info!(url = %config.server_url, "Reconnected to signaling server");
                return Some(ws);
            }
            Err(e) => {
                tracing::debug!(attempt, error = %e, "Reconnection attempt failed");
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ServerConfig, SignalServer};

    async fn local_server() -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let server = SignalServer::new(ServerConfig::default().bind(addr));
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        addr
    }

    #[tokio::test]
    async fn test_connect_and_create_room() {
        let addr = local_server().await;
        let config = ClientConfig::new(format!("ws://{}", addr));

        let (channel, mut events) = SignalingChannel::connect(&config).await.unwrap();
        channel
            .send(ClientMessage::CreateRoom {
                display_name: "alice".to_string(),
            })
            .unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();

        match event {
            ChannelEvent::Message(ServerMessage::RoomCreated {
                room_id,
                display_name,
            }) => {
                assert!(!room_id.as_str().is_empty());
                assert_eq!(display_name, "alice");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_after_exhausted_reconnects() {
        // A server that accepts exactly one connection, completes the
        // WebSocket handshake, and hangs up. Reconnection attempts then
        // fail because the listener is gone.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            drop(ws);
            drop(listener);
        });

        let config = ClientConfig::new(format!("ws://{}", addr))
            .reconnect_attempts(1)
            .reconnect_delay(std::time::Duration::from_millis(10));

        let (_channel, mut events) = SignalingChannel::connect(&config).await.unwrap();

        loop {
            let event = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
                .await
                .unwrap();
            match event {
                Some(ChannelEvent::Closed) | None => break,
                Some(_) => continue,
            }
        }
    }
}
