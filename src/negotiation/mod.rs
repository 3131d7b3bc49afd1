//! Peer negotiation
//!
//! The offer/answer state machine and its collaborators. One
//! negotiation session is live at a time; it is replaced, never
//! mutated in place, and every engine event carries the serial of the
//! session that produced it so events from a replaced session cannot
//! touch its successor.

pub mod candidates;
pub mod control;
pub mod controller;
pub mod session;

pub use candidates::CandidateRelay;
pub use control::{ControlChannel, ControlHandler};
pub use controller::NegotiationController;
pub use session::{
    NegotiationPhase, NegotiationSession, SessionContext, SessionRole, SignalingState,
};
