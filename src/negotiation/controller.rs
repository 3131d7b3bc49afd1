//! Offer/answer negotiation control
//!
//! Drives the single active negotiation session: the caller path
//! (`start_call`) and the callee path (inbound offer), with the state
//! guards that keep duplicate or late messages from corrupting an
//! established exchange. Protocol faults never propagate: bad messages
//! are discarded with a warning and the session keeps its state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::events::{EventBus, SessionEvent};
use crate::signaling::{SdpPayload, SignalEnvelope, SignalingChannel};
use crate::webrtc::{
    ConnectionState, ControlLink, EngineEvent, EngineEventSink, PeerSession, SessionConfig,
    SessionEngine, SessionIntent,
};

use super::control::ControlChannel;
use super::session::{
    NegotiationPhase, NegotiationSession, SessionContext, SessionRole, SignalingState,
};

/// Orchestrates the offer/answer exchange for the single active session
pub struct NegotiationController {
    engine: Arc<dyn SessionEngine>,
    channel: Arc<SignalingChannel>,
    config: SessionConfig,
    bus: Arc<EventBus>,
    control: Arc<ControlChannel>,
    engine_tx: mpsc::UnboundedSender<(u64, EngineEvent)>,
    session: RwLock<Option<NegotiationSession>>,
    next_serial: AtomicU64,
}

impl NegotiationController {
    /// Creates the controller and the receiver of serial-tagged engine
    /// events that the owning loop must consume.
    pub fn new(
        engine: Arc<dyn SessionEngine>,
        channel: Arc<SignalingChannel>,
        config: SessionConfig,
        bus: Arc<EventBus>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<(u64, EngineEvent)>) {
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let controller = Arc::new(Self {
            engine,
            channel,
            config,
            bus,
            control: Arc::new(ControlChannel::new()),
            engine_tx,
            session: RwLock::new(None),
            next_serial: AtomicU64::new(1),
        });
        (controller, engine_rx)
    }

    /// Handle to the control data channel of the current session
    pub fn control(&self) -> Arc<ControlChannel> {
        self.control.clone()
    }

    /// Starts an outgoing call to `peer_id`.
    ///
    /// Guarded: fails while another negotiation is live. Requests the
    /// configured receive-only video slots, opens the control channel,
    /// commits a local offer and submits exactly one `offer` message.
    pub async fn start_call(&self, peer_id: &str) -> Result<()> {
        {
            let guard = self.session.read();
            if let Some(session) = guard.as_ref() {
                if !session.phase().is_terminal() {
                    return Err(AppError::InvalidState(format!(
                        "negotiation with {} already in progress (phase {})",
                        session.peer_id(),
                        session.phase()
                    )));
                }
            }
        }
        self.teardown_current("replaced").await;

        let serial = self.next_serial.fetch_add(1, Ordering::SeqCst);
        let sink = EngineEventSink::new(serial, self.engine_tx.clone());
        let handle = self
            .engine
            .create_session(sink, SessionIntent::caller())
            .await?;

        let offer = match self.prepare_offer(&handle).await {
            Ok(offer) => offer,
            Err(e) => {
                let _ = handle.close().await;
                self.control.detach();
                return Err(e);
            }
        };

        let session = NegotiationSession::caller(serial, peer_id, handle)
            .with_signaling_state(SignalingState::HaveLocalOffer);
        *self.session.write() = Some(session);

        self.bus.publish(SessionEvent::NegotiationStarted {
            serial,
            peer: peer_id.to_string(),
            role: SessionRole::Caller,
        });
        self.publish_phase(serial, NegotiationPhase::Offering);

        info!("Calling {}: offer submitted (session {})", peer_id, serial);
        let local_id = self.channel.identity().id.clone();
        self.channel
            .submit(SignalEnvelope::offer(local_id, peer_id, offer));
        Ok(())
    }

    /// Receive-slot, control-channel and offer setup for the caller path
    async fn prepare_offer(&self, handle: &Arc<dyn PeerSession>) -> Result<SdpPayload> {
        handle
            .add_recv_video_slots(self.config.recv_video_slots)
            .await?;
        let link = handle
            .open_control_channel(&self.config.control_label, self.config.control_options())
            .await?;
        self.control.attach(link);
        let offer = handle.create_offer().await?;
        handle.set_local_description(offer.clone()).await?;
        Ok(offer)
    }

    /// Callee path: applies an inbound offer and replies with an answer.
    ///
    /// An offer arriving while another negotiation is live is rejected,
    /// not applied, so an in-progress session cannot be silently
    /// replaced. The session reaches `connected` once the local answer
    /// commit succeeds.
    pub async fn handle_offer(&self, from: &str, offer: SdpPayload) {
        {
            let guard = self.session.read();
            if let Some(session) = guard.as_ref() {
                if !session.phase().is_terminal() {
                    warn!(
                        "Rejecting offer from {}: negotiation with {} in progress (phase {})",
                        from,
                        session.peer_id(),
                        session.phase()
                    );
                    return;
                }
            }
        }
        self.teardown_current("replaced").await;

        let serial = self.next_serial.fetch_add(1, Ordering::SeqCst);
        let sink = EngineEventSink::new(serial, self.engine_tx.clone());
        let handle = match self
            .engine
            .create_session(sink, SessionIntent::callee())
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Cannot accept offer from {}: {}", from, e);
                self.publish_fault(format!("session create failed: {}", e));
                return;
            }
        };

        let session = NegotiationSession::callee(serial, from, handle.clone());
        *self.session.write() = Some(session.clone());
        self.bus.publish(SessionEvent::NegotiationStarted {
            serial,
            peer: from.to_string(),
            role: SessionRole::Callee,
        });
        self.publish_phase(serial, NegotiationPhase::Offered);

        if let Err(e) = handle.set_remote_description(offer).await {
            warn!("Offer from {} could not be applied: {}", from, e);
            self.publish_fault(format!("offer apply failed: {}", e));
            return;
        }
        let session = session
            .with_signaling_state(SignalingState::HaveRemoteOffer)
            .with_remote_description()
            .with_phase(NegotiationPhase::Answering);
        self.store_if_current(session.clone());
        self.publish_phase(serial, NegotiationPhase::Answering);

        let answer = match handle.create_answer().await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Answer for {} could not be created: {}", from, e);
                self.publish_fault(format!("answer create failed: {}", e));
                return;
            }
        };
        if let Err(e) = handle.set_local_description(answer.clone()).await {
            warn!("Answer for {} could not be committed: {}", from, e);
            self.publish_fault(format!("answer commit failed: {}", e));
            return;
        }

        let session = session
            .with_signaling_state(SignalingState::Stable)
            .with_phase(NegotiationPhase::Connected);
        self.store_if_current(session);
        self.publish_phase(serial, NegotiationPhase::Connected);

        info!("Answered offer from {} (session {})", from, serial);
        let local_id = self.channel.identity().id.clone();
        self.channel
            .submit(SignalEnvelope::answer(local_id, from, answer));
    }

    /// Applies an inbound answer.
    ///
    /// Valid only while the local offer is pending; in any other state
    /// the message is discarded with a warning and nothing changes, so
    /// duplicate or late answers are idempotent.
    pub async fn handle_answer(&self, from: &str, answer: SdpPayload) {
        let current = self.session.read().clone();
        let Some(session) = current else {
            warn!(
                "Discarding answer from {}: no active negotiation session",
                from
            );
            return;
        };
        if session.peer_id() != from {
            warn!(
                "Discarding answer from {}: current session is with {}",
                from,
                session.peer_id()
            );
            return;
        }
        if !session.awaiting_answer() {
            warn!(
                "Discarding answer from {}: signaling state is {} (expected have-local-offer)",
                from,
                session.signaling_state()
            );
            return;
        }

        match session.handle().set_remote_description(answer).await {
            Ok(()) => {
                let serial = session.serial();
                let updated = session
                    .with_signaling_state(SignalingState::Stable)
                    .with_remote_description()
                    .with_phase(NegotiationPhase::Answered);
                self.store_if_current(updated);
                self.publish_phase(serial, NegotiationPhase::Answered);
                info!(
                    "Answer from {} applied; awaiting transport connectivity",
                    from
                );
            }
            Err(e) => {
                // Session keeps its state so later messages can still apply
                warn!("Answer from {} could not be applied: {}", from, e);
                self.publish_fault(format!("answer apply failed: {}", e));
            }
        }
    }

    /// Reflects a transport state change into the session phase
    pub fn on_connection_state(&self, serial: u64, state: ConnectionState) {
        self.bus
            .publish(SessionEvent::PeerConnectionState { serial, state });

        let mut guard = self.session.write();
        let Some(session) = guard.clone() else {
            return;
        };
        if session.serial() != serial {
            debug!(
                "Ignoring connection state {} from stale session {}",
                state, serial
            );
            return;
        }
        if session.phase().is_terminal() {
            return;
        }

        let next = match state {
            ConnectionState::Connected => Some(NegotiationPhase::Connected),
            ConnectionState::Failed => Some(NegotiationPhase::Failed),
            ConnectionState::Closed => Some(NegotiationPhase::Closed),
            _ => None,
        };
        if let Some(phase) = next {
            if session.phase() != phase {
                info!("Session {} transport {}: phase {}", serial, state, phase);
                *guard = Some(session.with_phase(phase));
                drop(guard);
                self.publish_phase(serial, phase);
            }
        }
    }

    /// Adopts a control channel the peer opened toward us
    pub fn adopt_remote_link(&self, serial: u64, link: Arc<dyn ControlLink>) {
        let guard = self.session.read();
        match guard.as_ref() {
            Some(session) if session.serial() == serial => {
                info!("Adopting control channel '{}' from peer", link.label());
                self.control.attach(link);
            }
            _ => debug!("Ignoring control channel from stale session {}", serial),
        }
    }

    /// Tears down the current session, if any
    pub async fn end_session(&self, reason: &str) {
        self.teardown_current(reason).await;
    }

    /// Serial of the current session
    pub fn current_serial(&self) -> Option<u64> {
        self.session.read().as_ref().map(|s| s.serial())
    }

    /// Phase of the current session
    pub fn phase(&self) -> Option<NegotiationPhase> {
        self.session.read().as_ref().map(|s| s.phase())
    }

    /// Signaling state of the current session
    pub fn signaling_state(&self) -> Option<SignalingState> {
        self.session.read().as_ref().map(|s| s.signaling_state())
    }

    /// Remote endpoint of the current session
    pub fn peer_id(&self) -> Option<String> {
        self.session.read().as_ref().map(|s| s.peer_id().to_string())
    }

    /// Snapshot of the current session for candidate handling
    pub fn session_context(&self) -> Option<SessionContext> {
        self.session.read().as_ref().map(|s| s.context())
    }

    async fn teardown_current(&self, reason: &str) {
        let taken = self.session.write().take();
        if let Some(session) = taken {
            debug!("Tearing down session {} ({})", session.serial(), reason);
            self.control.detach();
            if let Err(e) = session.handle().close().await {
                debug!("Session {} close: {}", session.serial(), e);
            }
            self.bus.publish(SessionEvent::NegotiationClosed {
                serial: session.serial(),
                reason: reason.to_string(),
            });
        }
    }

    fn store_if_current(&self, updated: NegotiationSession) {
        let mut guard = self.session.write();
        match guard.as_ref() {
            Some(current) if current.serial() == updated.serial() => *guard = Some(updated),
            _ => debug!(
                "Discarding update for replaced session {}",
                updated.serial()
            ),
        }
    }

    fn publish_phase(&self, serial: u64, phase: NegotiationPhase) {
        self.bus
            .publish(SessionEvent::NegotiationStateChanged { serial, phase });
    }

    fn publish_fault(&self, message: String) {
        self.bus.publish(SessionEvent::SystemError {
            module: "negotiation".to_string(),
            severity: "warning".to_string(),
            message,
        });
    }
}
