//! Client configuration

use std::time::Duration;

/// Configuration for a room client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Signaling server URL
    pub server_url: String,
    /// STUN/TURN server URLs handed to every peer connection
    pub ice_servers: Vec<String>,
    /// How many times to retry the signaling connection after it drops
    /// before giving up (0 = no reconnection)
    pub reconnect_attempts: u32,
    /// Delay between reconnection attempts
    pub reconnect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:3001".to_string(),
            ice_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
                "stun:stun2.l.google.com:19302".to_string(),
                "stun:stun3.l.google.com:19302".to_string(),
                "stun:stun4.l.google.com:19302".to_string(),
            ],
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1000),
        }
    }
}

impl ClientConfig {
    /// Create a configuration pointing at the given signaling server
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Default::default()
        }
    }

    /// Replace the ICE server list
    pub fn ice_servers(mut self, servers: Vec<String>) -> Self {
        self.ice_servers = servers;
        self
    }

    /// Set the reconnection attempt limit
    pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = attempts;
        self
    }

    /// Set the delay between reconnection attempts
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.server_url, "ws://127.0.0.1:3001");
        assert_eq!(config.ice_servers.len(), 5);
        assert_eq!(config.reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay, Duration::from_millis(1000));
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::new("ws://meet.example.com:9000")
            .ice_servers(vec!["stun:stun.example.com:3478".to_string()])
            .reconnect_attempts(2)
            .reconnect_delay(Duration::from_millis(250));

        assert_eq!(config.server_url, "ws://meet.example.com:9000");
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.reconnect_attempts, 2);
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
    }
}
