//! Teleolink - WebRTC teleoperation link
//!
//! This crate provides the session core for real-time teleoperation
//! between a teaching arm (controller) and an execution arm (controlled
//! device): signaling over a relay, offer/answer negotiation, candidate
//! exchange and connection path diagnostics.

pub mod agent;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod negotiation;
pub mod signaling;
pub mod utils;
pub mod webrtc;

pub use agent::EndpointAgent;
pub use error::{AppError, Result};
