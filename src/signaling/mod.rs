//! Signaling relay client
//!
//! This module provides the endpoint side of the signaling relay:
//! - Wire protocol types (typed envelopes tagged by message type)
//! - The relay connection with register-on-connect and typed dispatch
//! - The ordered outbound queue with a single paced drain task
//!
//! Architecture:
//! ```text
//! submit(envelope)                   relay frames
//!        |                                |
//!        v                                v
//! OutboundQueue (FIFO)              reader task
//!        |                                |
//!        v                                +--> link state (watch)
//! drain task (paced, single-flight)       +--> inbound dispatch (mpsc)
//!        |
//!        v
//! WebSocket to relay
//! ```

pub mod channel;
pub mod message;
pub mod pacing;

pub use channel::{LinkState, Outbox, SignalingChannel};
pub use message::{
    AckPayload, ConnectionKind, DeviceType, EndpointIdentity, ErrorPayload, IceCandidate,
    RegisterPayload, SdpKind, SdpPayload, SignalBody, SignalEnvelope,
};
pub use pacing::{PacingPolicy, SendPacer};
