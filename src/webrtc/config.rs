//! Peer transport configuration

use serde::{Deserialize, Serialize};

/// ICE servers and candidate policy applied when building a peer session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IceSettings {
    /// STUN server URLs (e.g., ["stun:stun.l.google.com:19302"])
    pub stun_servers: Vec<String>,
    /// Restrict gathering to relay candidates only
    ///
    /// Forces traffic through TURN; requires at least one TURN server.
    pub relay_only: bool,
    /// TURN server configuration
    pub turn_servers: Vec<TurnServer>,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServer {
    /// TURN server URLs (e.g., ["turn:turn.example.com:3478?transport=udp", "turn:turn.example.com:3478?transport=tcp"])
    /// Multiple URLs allow fallback between UDP and TCP transports
    pub urls: Vec<String>,
    /// Username for TURN authentication
    pub username: String,
    /// Credential for TURN authentication
    pub credential: String,
}

impl TurnServer {
    /// Create a TurnServer with a single URL
    pub fn new(url: String, username: String, credential: String) -> Self {
        Self {
            urls: vec![url],
            username,
            credential,
        }
    }
}

/// Per-session negotiation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Inbound-only video receive slots requested by the caller
    pub recv_video_slots: u32,
    /// Label of the control data channel
    pub control_label: String,
    /// Preserve ordering on the control channel
    pub control_ordered: bool,
    /// Retransmission attempts for control messages
    pub control_max_retransmits: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            // Three slots accommodate a multi-camera source without
            // renegotiating when cameras come and go
            recv_video_slots: 3,
            control_label: "control".to_string(),
            // Ordered but unreliable: a stale retransmitted actuator
            // command is worse than a dropped one
            control_ordered: true,
            control_max_retransmits: 0,
        }
    }
}

impl SessionConfig {
    /// Delivery options for the control channel
    pub fn control_options(&self) -> ControlOptions {
        ControlOptions {
            ordered: self.control_ordered,
            max_retransmits: self.control_max_retransmits,
        }
    }
}

/// Delivery guarantees requested for a data channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlOptions {
    pub ordered: bool,
    pub max_retransmits: u16,
}

impl Default for ControlOptions {
    fn default() -> Self {
        SessionConfig::default().control_options()
    }
}
