use serde::{Deserialize, Serialize};

use crate::signaling::{DeviceType, EndpointIdentity, PacingPolicy};

// Re-export transport settings owned by the webrtc module
pub use crate::webrtc::config::{IceSettings, SessionConfig, TurnServer};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Endpoint identity and role
    pub endpoint: EndpointConfig,
    /// Signaling relay settings
    pub signaling: SignalingConfig,
    /// ICE servers and candidate policy
    pub ice: IceSettings,
    /// Per-session negotiation settings
    pub session: SessionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            signaling: SignalingConfig::default(),
            ice: IceSettings::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Which side of the teleoperation link this endpoint is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointRole {
    /// Controller: initiates calls, sends commands
    Teaching,
    /// Controlled device: executes received commands, serves video
    Execution,
}

impl Default for EndpointRole {
    fn default() -> Self {
        Self::Execution
    }
}

impl EndpointRole {
    /// Convert to the wire-level device type
    pub fn device_type(&self) -> DeviceType {
        match self {
            EndpointRole::Teaching => DeviceType::TeachingArm,
            EndpointRole::Execution => DeviceType::ExecutionArm,
        }
    }
}

/// Endpoint identity configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    /// Endpoint role
    pub role: EndpointRole,
    /// Endpoint id announced to the relay (random when unset)
    pub id: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            // Execution arms run as unattended daemons
            role: EndpointRole::Execution,
            id: None,
        }
    }
}

impl EndpointConfig {
    /// Identity announced in the registration frame
    pub fn identity(&self) -> EndpointIdentity {
        match &self.id {
            Some(id) if !id.is_empty() => {
                EndpointIdentity::new(id.clone(), self.role.device_type())
            }
            _ => EndpointIdentity::generate(self.role.device_type()),
        }
    }
}

/// Signaling relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SignalingConfig {
    /// Relay WebSocket URL (e.g., "ws://relay.example.com:8765")
    pub relay_url: String,
    /// Minimum gap between outbound relay frames in milliseconds
    pub send_interval_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:8765".to_string(),
            // Relays drop clients that burst; 50ms keeps a full
            // candidate exchange under their rate limits
            send_interval_ms: 50,
        }
    }
}

impl SignalingConfig {
    /// Pacing policy for the outbound queue
    pub fn pacing(&self) -> PacingPolicy {
        PacingPolicy::from_millis(self.send_interval_ms)
    }
}
