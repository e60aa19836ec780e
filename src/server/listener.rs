//! Signaling server listener
//!
//! Handles the TCP accept loop, upgrades connections to WebSocket, and
//! bridges each connection to the relay dispatcher: one read task feeding
//! parsed messages in, one write task draining the session outbox.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio_tungstenite::tungstenite::Message;

use crate::error::Result;
use crate::protocol::{ClientMessage, SessionId};
use crate::server::config::ServerConfig;
use crate::server::relay::{Relay, RelayEvent};

/// Signaling relay server
pub struct SignalServer {
    config: ServerConfig,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl SignalServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Signaling server listening");

        let (events, event_rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(Relay::new().run(event_rx));

        let result = self.accept_loop(&listener, &events).await;

        dispatcher.abort();
        result
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Signaling server listening");

        let (events, event_rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(Relay::new().run(event_rx));

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener, &events) => result,
        };

        dispatcher.abort();
        result
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    async fn accept_loop(
        &self,
        listener: &TcpListener,
        events: &mpsc::UnboundedSender<RelayEvent>,
    ) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr, events.clone());
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(
        &self,
        socket: TcpStream,
        peer_addr: SocketAddr,
        events: mpsc::UnboundedSender<RelayEvent>,
    ) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let session_id =
            SessionId::from_index(self.next_session_id.fetch_add(1, Ordering::Relaxed));

        tracing::debug!(
            session_id = %session_id,
            peer = %peer_addr,
            "New connection"
        );

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::warn!(error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let handshake_timeout = self.config.handshake_timeout;

        tokio::spawn(async move {
            // Permit is held for the connection's lifetime
            let _permit = permit;

            if let Err(e) =
                run_connection(session_id.clone(), socket, events, handshake_timeout).await
            {
                tracing::debug!(
                    session_id = %session_id,
                    error = %e,
                    "Connection error"
                );
            }

            tracing::debug!(session_id = %session_id, "Connection closed");
        });
    }
}

/// Bridge one WebSocket connection to the dispatcher.
///
/// Registers the session, pumps inbound frames as `RelayEvent::Message`, and
/// always emits `RelayEvent::Disconnected` on the way out so the registry
/// observes every transport-level close.
async fn run_connection(
    session_id: SessionId,
    socket: TcpStream,
    events: mpsc::UnboundedSender<RelayEvent>,
    handshake_timeout: std::time::Duration,
) -> Result<()> {
    let ws = tokio::time::timeout(handshake_timeout, tokio_tungstenite::accept_async(socket))
        .await
        .map_err(|_| {
            crate::error::Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "WebSocket handshake timed out",
            ))
        })??;

    let (mut write, mut read) = ws.split();
    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<crate::protocol::ServerMessage>();

    if events
        .send(RelayEvent::Connected {
            session_id: session_id.clone(),
            outbox,
        })
        .is_err()
    {
        return Ok(()); // Dispatcher gone, server shutting down
    }

    // Writer: drains the outbox until the dispatcher drops our sender
    // (which it does on disconnect).
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbox_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize server message");
                    continue;
                }
            };
            if write.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    // Reader: parse frames and feed the dispatcher. A malformed message is
    // logged and skipped, never fatal to the connection.
    while let Some(frame) = read.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "Read error");
                break;
            }
        };

        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => {
                    if events
                        .send(RelayEvent::Message {
                            session_id: session_id.clone(),
                            message,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        session_id = %session_id,
                        error = %e,
                        "Ignoring malformed client message"
                    );
                }
            },
            Message::Close(_) => break,
            // Ping/pong handled by tungstenite; binary frames are not part
            // of the protocol.
            _ => {}
        }
    }

    let _ = events.send(RelayEvent::Disconnected { session_id });
    writer.abort();

    Ok(())
}
