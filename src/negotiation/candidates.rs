//! Trickle ICE candidate relay
//!
//! Mirrors connectivity candidates between the local session and the
//! remote endpoint. Candidates ahead of the remote description are
//! handed to the engine anyway; the engine buffers them until the
//! description lands. Faults here are logged, never fatal.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::signaling::{IceCandidate, SignalEnvelope, SignalingChannel};
use crate::utils::LogThrottler;
use crate::warn_throttled;

use super::session::SessionContext;

pub struct CandidateRelay {
    channel: Arc<SignalingChannel>,
    throttler: LogThrottler,
}

impl CandidateRelay {
    pub fn new(channel: Arc<SignalingChannel>) -> Self {
        Self {
            channel,
            throttler: LogThrottler::default(),
        }
    }

    /// Forwards a locally discovered candidate to the remote endpoint
    pub fn forward_local(&self, peer_id: &str, candidate: IceCandidate) {
        debug!(
            "Forwarding local candidate to {}: {}",
            peer_id, candidate.candidate
        );
        let local_id = self.channel.identity().id.clone();
        self.channel
            .submit(SignalEnvelope::candidate(local_id, peer_id, candidate));
    }

    /// Applies a candidate received from the remote endpoint.
    ///
    /// Without a live session the candidate is unrecoverable and is
    /// discarded with a warning.
    pub async fn apply_remote(
        &self,
        session: Option<SessionContext>,
        from: &str,
        candidate: IceCandidate,
    ) {
        let Some(session) = session else {
            warn_throttled!(
                self.throttler,
                "candidate_no_session",
                "Discarding candidate from {}: no active negotiation session",
                from
            );
            return;
        };
        if session.peer_id != from {
            warn!(
                "Discarding candidate from {}: current session is with {}",
                from, session.peer_id
            );
            return;
        }
        if !session.remote_description_set {
            info!(
                "Candidate from {} arrived before the remote description; applying early",
                from
            );
        }
        if let Err(e) = session.handle.add_remote_candidate(candidate).await {
            warn_throttled!(
                self.throttler,
                "candidate_apply_failed",
                "Candidate from {} could not be applied: {}",
                from,
                e
            );
        }
    }
}
