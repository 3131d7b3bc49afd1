//! Outbound send pacing
//!
//! The relay tolerates bursts poorly, so consecutive sends on one
//! signaling connection are separated by a minimum gap. The pacer is a
//! plain state machine: the drain loop asks how long to wait before the
//! next send and records each completed send.

use std::time::{Duration, Instant};

/// Minimum-gap policy applied between consecutive outbound frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPolicy {
    min_gap: Duration,
}

impl PacingPolicy {
    /// Default gap between sends
    pub const DEFAULT_MIN_GAP: Duration = Duration::from_millis(50);

    pub fn new(min_gap: Duration) -> Self {
        Self { min_gap }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    pub fn min_gap(&self) -> Duration {
        self.min_gap
    }
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MIN_GAP)
    }
}

/// Tracks the last send instant and computes the wait before the next one
#[derive(Debug)]
pub struct SendPacer {
    policy: PacingPolicy,
    last_send: Option<Instant>,
}

impl SendPacer {
    pub fn new(policy: PacingPolicy) -> Self {
        Self {
            policy,
            last_send: None,
        }
    }

    /// Delay required before the next send may go out.
    /// The first send after construction or [`reset`](Self::reset) is immediate.
    pub fn required_delay(&self, now: Instant) -> Duration {
        match self.last_send {
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                self.policy.min_gap().saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        }
    }

    /// Records a completed send at `now`
    pub fn record_send(&mut self, now: Instant) {
        self.last_send = Some(now);
    }

    /// Forgets send history, so the next frame goes out immediately
    pub fn reset(&mut self) {
        self.last_send = None;
    }
}
