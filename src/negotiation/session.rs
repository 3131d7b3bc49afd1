//! Negotiation session bookkeeping
//!
//! A [`NegotiationSession`] is a value: every transition produces an
//! updated copy that replaces the stored one under the controller's
//! lock. The serial ties the session to its engine events, so events
//! from a replaced session can be recognized and discarded.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::webrtc::PeerSession;

/// Local role in the offer/answer exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionRole {
    /// Initiated the call and sent the offer
    Caller,
    /// Received the offer and replied with an answer
    Callee,
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRole::Caller => write!(f, "caller"),
            SessionRole::Callee => write!(f, "callee"),
        }
    }
}

/// Offer/answer progress mirrored from the underlying session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle phase of one negotiation attempt
///
/// Caller path: `offering` -> `answered` -> `connected`.
/// Callee path: `offered` -> `answering` -> `connected`.
/// `failed` and `closed` are reachable from any non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationPhase {
    /// Caller: local offer committed, awaiting the answer
    Offering,
    /// Caller: remote answer applied, awaiting transport connectivity
    Answered,
    /// Callee: remote offer received
    Offered,
    /// Callee: producing and committing the answer
    Answering,
    /// Session established
    Connected,
    Failed,
    Closed,
}

impl NegotiationPhase {
    /// Terminal phases accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationPhase::Failed | NegotiationPhase::Closed)
    }
}

impl fmt::Display for NegotiationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NegotiationPhase::Offering => "offering",
            NegotiationPhase::Answered => "answered",
            NegotiationPhase::Offered => "offered",
            NegotiationPhase::Answering => "answering",
            NegotiationPhase::Connected => "connected",
            NegotiationPhase::Failed => "failed",
            NegotiationPhase::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// One live negotiation attempt
#[derive(Clone)]
pub struct NegotiationSession {
    serial: u64,
    peer_id: String,
    role: SessionRole,
    phase: NegotiationPhase,
    signaling_state: SignalingState,
    remote_description_set: bool,
    handle: Arc<dyn PeerSession>,
}

impl NegotiationSession {
    /// Session for an outgoing call, before the offer is committed
    pub fn caller(serial: u64, peer_id: impl Into<String>, handle: Arc<dyn PeerSession>) -> Self {
        Self {
            serial,
            peer_id: peer_id.into(),
            role: SessionRole::Caller,
            phase: NegotiationPhase::Offering,
            signaling_state: SignalingState::Stable,
            remote_description_set: false,
            handle,
        }
    }

    /// Session for an incoming offer, before the offer is applied
    pub fn callee(serial: u64, peer_id: impl Into<String>, handle: Arc<dyn PeerSession>) -> Self {
        Self {
            serial,
            peer_id: peer_id.into(),
            role: SessionRole::Callee,
            phase: NegotiationPhase::Offered,
            signaling_state: SignalingState::Stable,
            remote_description_set: false,
            handle,
        }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.signaling_state
    }

    /// Whether the remote description has been applied yet
    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn handle(&self) -> Arc<dyn PeerSession> {
        self.handle.clone()
    }

    /// Whether an inbound answer is valid right now
    pub fn awaiting_answer(&self) -> bool {
        self.signaling_state == SignalingState::HaveLocalOffer
    }

    pub fn with_phase(mut self, phase: NegotiationPhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_signaling_state(mut self, state: SignalingState) -> Self {
        self.signaling_state = state;
        self
    }

    pub fn with_remote_description(mut self) -> Self {
        self.remote_description_set = true;
        self
    }

    /// Snapshot handed to collaborators that act on the current session
    pub fn context(&self) -> SessionContext {
        SessionContext {
            serial: self.serial,
            peer_id: self.peer_id.clone(),
            remote_description_set: self.remote_description_set,
            handle: self.handle.clone(),
        }
    }
}

impl fmt::Debug for NegotiationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiationSession")
            .field("serial", &self.serial)
            .field("peer_id", &self.peer_id)
            .field("role", &self.role)
            .field("phase", &self.phase)
            .field("signaling_state", &self.signaling_state)
            .finish()
    }
}

/// Detachable view of the current session for candidate handling
#[derive(Clone)]
pub struct SessionContext {
    pub serial: u64,
    pub peer_id: String,
    pub remote_description_set: bool,
    pub handle: Arc<dyn PeerSession>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::engine::mock::MockSession;
    use crate::webrtc::EngineEventSink;
    use tokio::sync::mpsc;

    fn handle() -> Arc<dyn PeerSession> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(MockSession::new(EngineEventSink::new(1, tx)))
    }

    #[test]
    fn test_phase_terminality() {
        assert!(NegotiationPhase::Failed.is_terminal());
        assert!(NegotiationPhase::Closed.is_terminal());
        assert!(!NegotiationPhase::Connected.is_terminal());
        assert!(!NegotiationPhase::Offering.is_terminal());
    }

    #[test]
    fn test_transitions_produce_new_values() {
        let session = NegotiationSession::caller(1, "master", handle());
        let advanced = session
            .clone()
            .with_signaling_state(SignalingState::HaveLocalOffer);

        assert_eq!(session.signaling_state(), SignalingState::Stable);
        assert_eq!(advanced.signaling_state(), SignalingState::HaveLocalOffer);
        assert!(advanced.awaiting_answer());
        assert!(!session.awaiting_answer());
    }

    #[test]
    fn test_role_defaults() {
        let caller = NegotiationSession::caller(1, "a", handle());
        assert_eq!(caller.role(), SessionRole::Caller);
        assert_eq!(caller.phase(), NegotiationPhase::Offering);

        let callee = NegotiationSession::callee(2, "b", handle());
        assert_eq!(callee.role(), SessionRole::Callee);
        assert_eq!(callee.phase(), NegotiationPhase::Offered);
        assert!(!callee.remote_description_set());
        assert!(callee.clone().with_remote_description().remote_description_set());
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&SignalingState::HaveLocalOffer).unwrap(),
            "\"have-local-offer\""
        );
        assert_eq!(
            serde_json::to_string(&NegotiationPhase::Offering).unwrap(),
            "\"offering\""
        );
        assert_eq!(
            serde_json::to_string(&SessionRole::Callee).unwrap(),
            "\"callee\""
        );
    }
}
