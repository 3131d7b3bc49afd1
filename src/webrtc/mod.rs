//! WebRTC peer transport
//!
//! This module wraps the `webrtc` crate behind engine capability traits
//! so negotiation logic stays testable without sockets:
//! - [`SessionEngine`] builds peer sessions; [`PeerSession`] exposes the
//!   SDP, candidate and channel operations negotiation needs
//! - [`RtcEngine`] is the production implementation over webrtc-rs
//! - Engine callbacks surface as serial-tagged [`EngineEvent`]s
//!
//! Architecture:
//! ```text
//! NegotiationController
//!        |  (trait calls)
//!        v
//! SessionEngine / PeerSession
//!        |
//!        v
//! RTCPeerConnection (webrtc-rs)
//!        |
//!        +--> EngineEvent stream (candidates, state, tracks, control)
//! ```

pub mod config;
pub mod engine;
pub mod peer;
pub mod track;

pub use config::{ControlOptions, IceSettings, SessionConfig, TurnServer};
pub use engine::{
    CandidateKind, CandidatePairRow, ConnectionState, ControlLink, EngineEvent, EngineEventSink,
    PeerSession, SessionEngine, SessionIntent,
};
pub use peer::RtcEngine;
pub use track::{OutboundTrackConfig, OutboundVideoTrack, VideoCodec};
