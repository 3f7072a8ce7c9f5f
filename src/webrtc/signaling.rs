//! WebRTC signaling types and messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parsed client-to-server signaling message
#[derive(Debug, Clone, PartialEq)]
pub enum ClientSignal {
    /// SDP offer from the headset
    Offer(SdpOffer),
    /// Trickled remote ICE candidate
    Candidate(IceCandidate),
    /// Valid JSON with an unhandled `type` (or none)
    Other(Option<String>),
}

impl ClientSignal {
    /// Parse one signaling text frame
    pub fn parse(text: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| format!("invalid JSON: {}", e))?;
        let Value::Object(ref map) = value else {
            return Err("signaling message is not a JSON object".to_string());
        };

        let kind = map.get("type").and_then(Value::as_str).map(str::to_string);
        match kind.as_deref() {
            Some("offer") => serde_json::from_value(value)
                .map(ClientSignal::Offer)
                .map_err(|e| format!("invalid offer: {}", e)),
            Some("candidate") => serde_json::from_value(value)
                .map(ClientSignal::Candidate)
                .map_err(|e| format!("invalid candidate: {}", e)),
            _ => Ok(ClientSignal::Other(kind)),
        }
    }
}

/// Server-to-client signaling message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerSignal {
    Answer(SdpAnswer),
    Error(SignalingError),
}

impl ServerSignal {
    pub fn to_json(&self) -> String {
        // Only string and integer fields: serialization cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// SDP Offer from client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SdpOffer {
    pub sdp: String,
}

impl SdpOffer {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into() }
    }
}

/// SDP Answer from server, carrying gathered host candidates inline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SdpAnswer {
    pub sdp: String,
}

impl SdpAnswer {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into() }
    }
}

/// ICE candidate
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IceCandidate {
    /// Candidate string; empty marks end-of-candidates
    #[serde(default)]
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }

    /// End-of-candidates marker, nothing to add
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

/// Signaling error
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalingError {
    pub code: u32,
    pub message: String,
}

impl SignalingError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_offer(detail: impl std::fmt::Display) -> Self {
        Self::new(400, format!("Invalid SDP offer: {}", detail))
    }

    pub fn unavailable() -> Self {
        Self::new(503, "Server is shutting down")
    }
}

/// Peer connection state as seen by the session manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    /// Transient; the session stays alive
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States that end a session
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}
