//! Session event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

use crate::diagnostics::PathClass;
use crate::negotiation::{NegotiationPhase, SessionRole};
use crate::signaling::LinkState;
use crate::webrtc::ConnectionState;

/// Session event enumeration
///
/// All events are tagged with their event name for serialization.
/// The `serde(tag = "event", content = "data")` attribute creates a
/// JSON structure like:
/// ```json
/// {
///   "event": "negotiation.state_changed",
///   "data": { "serial": 3, "phase": "offering" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SessionEvent {
    // ========================================================================
    // Signaling link events
    // ========================================================================
    /// Signaling link state changed (connect, register ack, close)
    #[serde(rename = "signaling.state_changed")]
    SignalingStateChanged {
        /// Current link state
        state: LinkState,
    },

    /// An outbound frame was dropped instead of sent
    ///
    /// Emitted whenever the queue discards a frame (link closed, queue
    /// gone). No retry is attempted for dropped frames.
    #[serde(rename = "signaling.message_dropped")]
    SignalingMessageDropped {
        /// Wire tag of the dropped frame
        message_type: String,
        /// Why it was dropped
        reason: String,
    },

    // ========================================================================
    // Negotiation events
    // ========================================================================
    /// A new negotiation session was created
    #[serde(rename = "negotiation.session_started")]
    NegotiationStarted {
        /// Monotonic serial of the session
        serial: u64,
        /// Remote endpoint id
        peer: String,
        /// Local role in the exchange
        role: SessionRole,
    },

    /// Negotiation session moved to a new phase
    #[serde(rename = "negotiation.state_changed")]
    NegotiationStateChanged {
        /// Serial of the session the phase belongs to
        serial: u64,
        /// New phase
        phase: NegotiationPhase,
    },

    /// Negotiation session was torn down or replaced
    #[serde(rename = "negotiation.session_closed")]
    NegotiationClosed {
        /// Serial of the closed session
        serial: u64,
        /// Close reason
        reason: String,
    },

    // ========================================================================
    // Peer transport events
    // ========================================================================
    /// Underlying peer connection state changed
    #[serde(rename = "peer.connection_state")]
    PeerConnectionState {
        /// Serial of the owning session
        serial: u64,
        /// Transport-level connection state
        state: ConnectionState,
    },

    /// A remote media track started arriving
    #[serde(rename = "media.track_added")]
    MediaTrackAdded {
        /// Serial of the owning session
        serial: u64,
        /// Track identifier from the remote peer
        track_id: String,
        /// Media kind ("video", "audio")
        kind: String,
    },

    // ========================================================================
    // Control channel events
    // ========================================================================
    /// Control data channel became usable
    #[serde(rename = "control.opened")]
    ControlOpened {
        /// Channel label
        label: String,
    },

    /// Control data channel closed
    #[serde(rename = "control.closed")]
    ControlClosed {
        /// Channel label
        label: String,
    },

    // ========================================================================
    // Diagnostics events
    // ========================================================================
    /// Active path was classified from connection statistics
    #[serde(rename = "diagnostics.path_classified")]
    PathClassified {
        /// Classification of the currently active path
        class: PathClass,
        /// All path classes observed so far on this connection
        observed: Vec<PathClass>,
    },

    // ========================================================================
    // System events
    // ========================================================================
    /// System error or warning
    #[serde(rename = "system.error")]
    SystemError {
        /// Module that generated the error: "signaling", "negotiation", "diagnostics"
        module: String,
        /// Severity: "warning", "error"
        severity: String,
        /// Error message
        message: String,
    },
}

impl SessionEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SignalingStateChanged { .. } => "signaling.state_changed",
            Self::SignalingMessageDropped { .. } => "signaling.message_dropped",
            Self::NegotiationStarted { .. } => "negotiation.session_started",
            Self::NegotiationStateChanged { .. } => "negotiation.state_changed",
            Self::NegotiationClosed { .. } => "negotiation.session_closed",
            Self::PeerConnectionState { .. } => "peer.connection_state",
            Self::MediaTrackAdded { .. } => "media.track_added",
            Self::ControlOpened { .. } => "control.opened",
            Self::ControlClosed { .. } => "control.closed",
            Self::PathClassified { .. } => "diagnostics.path_classified",
            Self::SystemError { .. } => "system.error",
        }
    }

    /// Check if event name matches a topic pattern
    ///
    /// Supports wildcards:
    /// - `*` matches all events
    /// - `negotiation.*` matches all negotiation events
    /// - `negotiation.state_changed` matches exact event
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if topic.ends_with(".*") {
            let prefix = topic.trim_end_matches(".*");
            event_name.starts_with(prefix)
        } else {
            event_name == topic
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name() {
        let event = SessionEvent::NegotiationStateChanged {
            serial: 1,
            phase: NegotiationPhase::Offering,
        };
        assert_eq!(event.event_name(), "negotiation.state_changed");

        let event = SessionEvent::ControlOpened {
            label: "control".to_string(),
        };
        assert_eq!(event.event_name(), "control.opened");
    }

    #[test]
    fn test_matches_topic() {
        let event = SessionEvent::NegotiationStarted {
            serial: 1,
            peer: "arm-1".to_string(),
            role: SessionRole::Caller,
        };

        assert!(event.matches_topic("*"));
        assert!(event.matches_topic("negotiation.*"));
        assert!(event.matches_topic("negotiation.session_started"));
        assert!(!event.matches_topic("signaling.*"));
        assert!(!event.matches_topic("negotiation.session_closed"));
    }

    #[test]
    fn test_serialization() {
        let event = SessionEvent::PathClassified {
            class: PathClass::Relay,
            observed: vec![PathClass::Host, PathClass::Relay],
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("diagnostics.path_classified"));
        assert!(json.contains("relay"));

        let deserialized: SessionEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(deserialized, SessionEvent::PathClassified { .. }));
    }
}
