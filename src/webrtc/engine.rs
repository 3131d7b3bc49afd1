//! Transport engine capability boundary
//!
//! The negotiation core never touches the peer-to-peer stack directly.
//! It drives a [`PeerSession`] obtained from a [`SessionEngine`] and
//! consumes [`EngineEvent`]s tagged with the owning session's serial, so
//! events from a torn-down session can be recognized and ignored. The
//! production implementation lives in [`super::peer`]; tests substitute
//! the recording fakes from [`mock`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::signaling::{IceCandidate, SdpPayload};

use super::config::ControlOptions;

/// Transport-level connection state of a peer session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Whether media and data can flow in this state
    pub fn is_established(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether the session is permanently done
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// Candidate type as reported in connection statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateKind {
    #[serde(rename = "host")]
    Host,
    #[serde(rename = "srflx")]
    ServerReflexive,
    #[serde(rename = "prflx")]
    PeerReflexive,
    #[serde(rename = "relay")]
    Relay,
    #[serde(rename = "unknown")]
    Unknown,
}

/// One candidate pair sampled from the engine's statistics report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidatePairRow {
    /// Connectivity checks on this pair succeeded
    pub succeeded: bool,
    /// Pair was nominated to carry traffic
    pub nominated: bool,
    /// Local candidate type
    pub local: CandidateKind,
    /// Remote candidate type
    pub remote: CandidateKind,
}

/// Events emitted by a peer session toward the negotiation core
pub enum EngineEvent {
    /// A local ICE candidate is ready to be relayed to the peer
    LocalCandidate(IceCandidate),
    /// Local candidate gathering finished
    GatheringComplete,
    /// Transport connection state changed
    ConnectionState(ConnectionState),
    /// A remote media track started arriving
    RemoteTrack { track_id: String, kind: String },
    /// The peer opened a data channel toward us
    RemoteControlLink(Arc<dyn ControlLink>),
    /// A control channel (self-created or adopted) became open
    ControlOpen { label: String },
    /// A control channel closed
    ControlClosed { label: String },
    /// Inbound message on the control channel
    ControlMessage(Bytes),
}

impl fmt::Debug for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            EngineEvent::GatheringComplete => write!(f, "GatheringComplete"),
            EngineEvent::ConnectionState(s) => f.debug_tuple("ConnectionState").field(s).finish(),
            EngineEvent::RemoteTrack { track_id, kind } => f
                .debug_struct("RemoteTrack")
                .field("track_id", track_id)
                .field("kind", kind)
                .finish(),
            EngineEvent::RemoteControlLink(link) => f
                .debug_tuple("RemoteControlLink")
                .field(&link.label())
                .finish(),
            EngineEvent::ControlOpen { label } => {
                f.debug_struct("ControlOpen").field("label", label).finish()
            }
            EngineEvent::ControlClosed { label } => f
                .debug_struct("ControlClosed")
                .field("label", label)
                .finish(),
            EngineEvent::ControlMessage(data) => f
                .debug_struct("ControlMessage")
                .field("len", &data.len())
                .finish(),
        }
    }
}

/// Serial-tagged sender handed to each session at creation
///
/// Every event carries the serial of the session that produced it, so
/// the consumer can discard events from sessions it has already replaced.
#[derive(Clone)]
pub struct EngineEventSink {
    serial: u64,
    tx: mpsc::UnboundedSender<(u64, EngineEvent)>,
}

impl EngineEventSink {
    pub fn new(serial: u64, tx: mpsc::UnboundedSender<(u64, EngineEvent)>) -> Self {
        Self { serial, tx }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Emits an event. A closed receiver means the consumer is shutting
    /// down; the event is dropped silently.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send((self.serial, event));
    }
}

/// What a new session is for
///
/// The caller consumes remote media only; the callee additionally
/// attaches whatever outbound tracks the engine has been configured
/// with before negotiation starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionIntent {
    /// Attach locally configured outbound media to the session
    pub attach_local_media: bool,
}

impl SessionIntent {
    /// Intent for the offering side: receive-only
    pub fn caller() -> Self {
        Self {
            attach_local_media: false,
        }
    }

    /// Intent for the answering side: local media goes out
    pub fn callee() -> Self {
        Self {
            attach_local_media: true,
        }
    }
}

/// Factory for peer sessions
#[async_trait]
pub trait SessionEngine: Send + Sync {
    /// Creates a fresh peer session wired to emit events through `sink`
    async fn create_session(
        &self,
        sink: EngineEventSink,
        intent: SessionIntent,
    ) -> Result<Arc<dyn PeerSession>>;
}

/// One peer-to-peer session under negotiation
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Adds `count` receive-only video transceivers
    async fn add_recv_video_slots(&self, count: u32) -> Result<()>;

    /// Creates the control data channel with the given delivery options
    async fn open_control_channel(
        &self,
        label: &str,
        options: ControlOptions,
    ) -> Result<Arc<dyn ControlLink>>;

    async fn create_offer(&self) -> Result<SdpPayload>;

    async fn create_answer(&self) -> Result<SdpPayload>;

    async fn set_local_description(&self, description: SdpPayload) -> Result<()>;

    async fn set_remote_description(&self, description: SdpPayload) -> Result<()>;

    /// Applies a remote ICE candidate
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Samples candidate pair statistics for path diagnostics
    async fn candidate_pairs(&self) -> Result<Vec<CandidatePairRow>>;

    /// Tears the session down; further calls return errors
    async fn close(&self) -> Result<()>;
}

/// Handle to an open (or opening) control data channel
#[async_trait]
pub trait ControlLink: Send + Sync {
    fn label(&self) -> String;

    /// Whether the underlying channel is open for sending
    fn is_open(&self) -> bool;

    /// Sends a message. Callers must check [`is_open`](Self::is_open)
    /// first; sending on a non-open channel returns an error.
    async fn send(&self, data: Bytes) -> Result<()>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_tags_events_with_serial() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EngineEventSink::new(7, tx);

        sink.emit(EngineEvent::GatheringComplete);

        let (serial, event) = rx.recv().await.unwrap();
        assert_eq!(serial, 7);
        assert!(matches!(event, EngineEvent::GatheringComplete));
    }

    #[tokio::test]
    async fn test_sink_survives_dropped_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EngineEventSink::new(1, tx);
        drop(rx);

        // Must not panic or error outward
        sink.emit(EngineEvent::ConnectionState(ConnectionState::Closed));
    }

    #[test]
    fn test_connection_state_predicates() {
        assert!(ConnectionState::Connected.is_established());
        assert!(!ConnectionState::Connecting.is_established());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Disconnected.is_terminal());
    }
}
