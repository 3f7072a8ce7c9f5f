//! WebRTC configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Peer transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebRtcConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN server configuration
    pub turn_servers: Vec<TurnServer>,
    /// Gather `.local` mDNS host candidates instead of raw LAN addresses
    pub mdns_gather: bool,
    /// Upper bound on waiting for ICE gathering before answering
    pub gathering_timeout_ms: u64,
    /// Offer 127.0.0.1 candidates, for a browser or emulator on this host
    pub loopback_candidates: bool,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            // Headset and server share a LAN; host candidates are enough
            stun_servers: vec![],
            turn_servers: vec![],
            mdns_gather: false,
            gathering_timeout_ms: 2000,
            loopback_candidates: false,
        }
    }
}

impl WebRtcConfig {
    pub fn gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.gathering_timeout_ms)
    }

    pub fn mdns_mode(&self) -> MulticastDnsMode {
        if self.mdns_gather {
            MulticastDnsMode::QueryAndGather
        } else {
            MulticastDnsMode::QueryOnly
        }
    }

    /// ICE servers for `RTCConfiguration`. TURN entries without credentials are skipped.
    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        let mut ice_servers = vec![];

        for stun_url in &self.stun_servers {
            ice_servers.push(RTCIceServer {
                urls: vec![stun_url.clone()],
                ..Default::default()
            });
        }

        for turn in &self.turn_servers {
            if turn.username.is_empty() || turn.credential.is_empty() {
                tracing::warn!(
                    "Skipping TURN server {:?} - credentials required but missing",
                    turn.urls
                );
                continue;
            }
            ice_servers.push(RTCIceServer {
                urls: turn.urls.clone(),
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            });
        }

        ice_servers
    }
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnServer {
    /// TURN server URLs, e.g. `turn:turn.example.com:3478?transport=udp`
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl TurnServer {
    pub fn new(url: String, username: String, credential: String) -> Self {
        Self {
            urls: vec![url],
            username,
            credential,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ice_servers() {
        let config = WebRtcConfig {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: vec![
                TurnServer::new("turn:a:3478".into(), "u".into(), "p".into()),
                TurnServer::new("turn:b:3478".into(), String::new(), String::new()),
            ],
            ..Default::default()
        };
        let servers = config.ice_servers();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
        assert_eq!(servers[1].username, "u");
    }

    #[test]
    fn test_default_mdns_query_only() {
        let config = WebRtcConfig::default();
        assert_eq!(config.mdns_mode(), MulticastDnsMode::QueryOnly);
        assert!(config.ice_servers().is_empty());
    }
}
