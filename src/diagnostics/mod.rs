//! Connection path diagnostics
//!
//! Classifies an established session from its candidate-pair
//! statistics: direct on the local network, NAT-traversed, or relayed
//! through a TURN server. Observability only; sampling faults are
//! swallowed and nothing here feeds back into negotiation.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::events::{EventBus, SessionEvent};
use crate::webrtc::{CandidateKind, CandidatePairRow, PeerSession};

/// How traffic reaches the peer. Ordering is precedence: when several
/// pairs succeeded, the highest class wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathClass {
    /// Both sides on the local network, no traversal involved
    Host,
    /// At least one side behind a NAT, reached via a reflexive address
    Reflexive,
    /// Traffic forwarded through a TURN relay
    Relay,
}

impl fmt::Display for PathClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Host => "host",
            Self::Reflexive => "reflexive",
            Self::Relay => "relay",
        };
        write!(f, "{}", s)
    }
}

#[derive(Default)]
struct DiagState {
    serial: Option<u64>,
    observed: BTreeSet<PathClass>,
}

/// Accumulates path classifications over the life of one session
pub struct ConnectionDiagnostics {
    bus: Arc<EventBus>,
    state: Mutex<DiagState>,
}

impl ConnectionDiagnostics {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            state: Mutex::new(DiagState::default()),
        }
    }

    /// Queries the session's candidate pairs and publishes the current
    /// classification. A sample for a new session serial clears the
    /// accumulated set first.
    pub async fn sample(&self, serial: u64, handle: &Arc<dyn PeerSession>) {
        let rows = match handle.candidate_pairs().await {
            Ok(rows) => rows,
            Err(e) => {
                debug!("Path statistics unavailable for session {}: {}", serial, e);
                return;
            }
        };
        let Some(class) = classify(&rows) else {
            debug!("No succeeded candidate pair yet for session {}", serial);
            return;
        };

        let observed = {
            let mut state = self.state.lock();
            if state.serial != Some(serial) {
                state.serial = Some(serial);
                state.observed.clear();
            }
            state.observed.insert(class);
            state.observed.iter().copied().collect::<Vec<_>>()
        };

        info!(
            "Session {} path classified as {} (observed so far: {:?})",
            serial, class, observed
        );
        self.bus
            .publish(SessionEvent::PathClassified { class, observed });
    }

    /// Path classes observed so far on the current session
    pub fn observed(&self) -> Vec<PathClass> {
        self.state.lock().observed.iter().copied().collect()
    }
}

/// Highest path class among the succeeded pairs, if any
fn classify(rows: &[CandidatePairRow]) -> Option<PathClass> {
    rows.iter()
        .filter(|row| row.succeeded)
        .filter_map(|row| match (class_of(row.local), class_of(row.remote)) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        })
        .max()
}

fn class_of(kind: CandidateKind) -> Option<PathClass> {
    match kind {
        CandidateKind::Host => Some(PathClass::Host),
        CandidateKind::ServerReflexive | CandidateKind::PeerReflexive => {
            Some(PathClass::Reflexive)
        }
        CandidateKind::Relay => Some(PathClass::Relay),
        CandidateKind::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::engine::mock::MockSession;
    use crate::webrtc::EngineEventSink;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    fn pair(local: CandidateKind, remote: CandidateKind, succeeded: bool) -> CandidatePairRow {
        CandidatePairRow {
            succeeded,
            nominated: succeeded,
            local,
            remote,
        }
    }

    fn session(serial: u64) -> Arc<MockSession> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(MockSession::new(EngineEventSink::new(serial, tx)))
    }

    #[test]
    fn test_relay_takes_precedence() {
        let rows = vec![
            pair(CandidateKind::Host, CandidateKind::Host, true),
            pair(CandidateKind::ServerReflexive, CandidateKind::Relay, true),
        ];
        assert_eq!(classify(&rows), Some(PathClass::Relay));
    }

    #[test]
    fn test_either_side_reflexive_classifies_reflexive() {
        let rows = vec![pair(CandidateKind::Host, CandidateKind::PeerReflexive, true)];
        assert_eq!(classify(&rows), Some(PathClass::Reflexive));
    }

    #[test]
    fn test_unsucceeded_pairs_are_ignored() {
        let rows = vec![
            pair(CandidateKind::Relay, CandidateKind::Relay, false),
            pair(CandidateKind::Host, CandidateKind::Host, true),
        ];
        assert_eq!(classify(&rows), Some(PathClass::Host));
        assert_eq!(classify(&[]), None);
    }

    #[tokio::test]
    async fn test_sample_publishes_and_accumulates() {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();
        let diagnostics = ConnectionDiagnostics::new(bus);
        let mock = session(1);

        mock.set_pairs(vec![pair(CandidateKind::Host, CandidateKind::Host, true)]);
        diagnostics.sample(1, &(mock.clone() as Arc<dyn PeerSession>)).await;
        match rx.try_recv().unwrap() {
            SessionEvent::PathClassified { class, observed } => {
                assert_eq!(class, PathClass::Host);
                assert_eq!(observed, vec![PathClass::Host]);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // Relay shows up later on the same session; both stay observed
        mock.set_pairs(vec![pair(CandidateKind::Relay, CandidateKind::Host, true)]);
        diagnostics.sample(1, &(mock.clone() as Arc<dyn PeerSession>)).await;
        match rx.try_recv().unwrap() {
            SessionEvent::PathClassified { class, observed } => {
                assert_eq!(class, PathClass::Relay);
                assert_eq!(observed, vec![PathClass::Host, PathClass::Relay]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_new_session_serial_resets_observed() {
        let bus = Arc::new(EventBus::new());
        let diagnostics = ConnectionDiagnostics::new(bus);

        let first = session(1);
        first.set_pairs(vec![pair(CandidateKind::Host, CandidateKind::Host, true)]);
        diagnostics.sample(1, &(first as Arc<dyn PeerSession>)).await;
        assert_eq!(diagnostics.observed(), vec![PathClass::Host]);

        let second = session(2);
        second.set_pairs(vec![pair(CandidateKind::Relay, CandidateKind::Relay, true)]);
        diagnostics.sample(2, &(second as Arc<dyn PeerSession>)).await;
        assert_eq!(diagnostics.observed(), vec![PathClass::Relay]);
    }

    #[tokio::test]
    async fn test_stats_failure_is_swallowed() {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();
        let diagnostics = ConnectionDiagnostics::new(bus);
        let mock = session(1);
        mock.fail_candidate_pairs.store(true, Ordering::SeqCst);

        diagnostics.sample(1, &(mock as Arc<dyn PeerSession>)).await;
        assert!(rx.try_recv().is_err());
        assert!(diagnostics.observed().is_empty());
    }
}
