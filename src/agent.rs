//! Endpoint agent
//!
//! Top-level facade owning the signaling channel, the negotiation
//! controller, the candidate relay and the path diagnostics, plus the
//! loop that routes inbound relay frames and serial-tagged engine
//! events between them. Embedders observe progress on the event bus
//! and talk to the peer through the control channel handle.
//!
//! ```text
//! relay frames ----> dispatch_signal ----> NegotiationController
//!                                    \---> CandidateRelay
//! engine events ---> dispatch_engine_event
//!                      |--> NegotiationController (state, adopted links)
//!                      |--> CandidateRelay (local candidates out)
//!                      |--> ConnectionDiagnostics (path sampling)
//!                      +--> ControlChannel (inbound messages)
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::diagnostics::{ConnectionDiagnostics, PathClass};
use crate::error::Result;
use crate::events::{EventBus, SessionEvent};
use crate::negotiation::{
    CandidateRelay, ControlChannel, NegotiationController, NegotiationPhase,
};
use crate::signaling::{
    EndpointIdentity, LinkState, SignalBody, SignalEnvelope, SignalingChannel,
};
use crate::webrtc::{EngineEvent, SessionConfig, SessionEngine};

/// One teleoperation endpoint: relay link, negotiation, diagnostics
pub struct EndpointAgent {
    channel: Arc<SignalingChannel>,
    controller: Arc<NegotiationController>,
    diagnostics: Arc<ConnectionDiagnostics>,
    bus: Arc<EventBus>,
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EndpointAgent {
    /// Connects to the signaling relay and starts the routing loop.
    pub async fn connect(
        engine: Arc<dyn SessionEngine>,
        config: &AppConfig,
        bus: Arc<EventBus>,
    ) -> Result<Arc<Self>> {
        let (channel, inbound) = SignalingChannel::connect(
            &config.signaling.relay_url,
            config.endpoint.identity(),
            config.signaling.pacing(),
            bus.clone(),
        )
        .await?;
        Ok(Self::with_channel(
            engine,
            channel,
            inbound,
            config.session.clone(),
            bus,
        ))
    }

    /// Builds the agent over an already-connected channel and starts the
    /// routing loop.
    pub fn with_channel(
        engine: Arc<dyn SessionEngine>,
        channel: Arc<SignalingChannel>,
        inbound: mpsc::UnboundedReceiver<SignalEnvelope>,
        config: SessionConfig,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        let (controller, engine_rx) =
            NegotiationController::new(engine, channel.clone(), config, bus.clone());
        let relay = Arc::new(CandidateRelay::new(channel.clone()));
        let diagnostics = Arc::new(ConnectionDiagnostics::new(bus.clone()));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(run_loop(
            controller.clone(),
            relay,
            diagnostics.clone(),
            bus.clone(),
            inbound,
            engine_rx,
            shutdown_rx,
        ));

        Arc::new(Self {
            channel,
            controller,
            diagnostics,
            bus,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }

    /// Starts an outgoing call to `peer_id`.
    ///
    /// Fails while another negotiation is live.
    pub async fn start_call(&self, peer_id: &str) -> Result<()> {
        self.controller.start_call(peer_id).await
    }

    /// Ends the active session, if any.
    pub async fn end_session(&self, reason: &str) {
        self.controller.end_session(reason).await;
    }

    /// Handle to the control data channel of the current session
    pub fn control(&self) -> Arc<ControlChannel> {
        self.controller.control()
    }

    /// Identity registered with the relay
    pub fn identity(&self) -> &EndpointIdentity {
        self.channel.identity()
    }

    /// Current signaling link state
    pub fn link_state(&self) -> LinkState {
        self.channel.state()
    }

    /// Watch handle for link state transitions
    pub fn watch_link(&self) -> tokio::sync::watch::Receiver<LinkState> {
        self.channel.watch_state()
    }

    /// Phase of the active negotiation session, if any
    pub fn phase(&self) -> Option<NegotiationPhase> {
        self.controller.phase()
    }

    /// Path classes observed on the current connection
    pub fn observed_paths(&self) -> Vec<PathClass> {
        self.diagnostics.observed()
    }

    /// Subscribes to session events
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    /// Ends the active session, closes the relay link and stops the
    /// routing loop.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        self.controller.end_session("shutdown").await;
        self.channel.close().await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

/// Routes inbound relay frames and engine events until shutdown
async fn run_loop(
    controller: Arc<NegotiationController>,
    relay: Arc<CandidateRelay>,
    diagnostics: Arc<ConnectionDiagnostics>,
    bus: Arc<EventBus>,
    mut inbound: mpsc::UnboundedReceiver<SignalEnvelope>,
    mut engine_rx: mpsc::UnboundedReceiver<(u64, EngineEvent)>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let control = controller.control();

    loop {
        tokio::select! {
            maybe = inbound.recv() => {
                match maybe {
                    Some(envelope) => dispatch_signal(&controller, &relay, envelope).await,
                    None => {
                        info!("Signaling inbound stream ended; agent loop stopping");
                        break;
                    }
                }
            }
            maybe = engine_rx.recv() => {
                match maybe {
                    Some((serial, event)) => {
                        dispatch_engine_event(
                            &controller,
                            &relay,
                            &diagnostics,
                            &bus,
                            &control,
                            serial,
                            event,
                        )
                        .await;
                    }
                    None => break,
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Agent loop shutting down");
                break;
            }
        }
    }
}

async fn dispatch_signal(
    controller: &NegotiationController,
    relay: &CandidateRelay,
    envelope: SignalEnvelope,
) {
    match envelope.body {
        SignalBody::Offer(sdp) => controller.handle_offer(&envelope.from, sdp).await,
        SignalBody::Answer(sdp) => controller.handle_answer(&envelope.from, sdp).await,
        SignalBody::IceCandidate(candidate) => {
            relay
                .apply_remote(controller.session_context(), &envelope.from, candidate)
                .await;
        }
        other => debug!(
            "Ignoring {} message from {}",
            other.message_type(),
            envelope.from
        ),
    }
}

/// Events from replaced sessions are recognized by serial and dropped;
/// only the current session may touch the relay, the control handler or
/// the diagnostics.
async fn dispatch_engine_event(
    controller: &NegotiationController,
    relay: &CandidateRelay,
    diagnostics: &ConnectionDiagnostics,
    bus: &EventBus,
    control: &ControlChannel,
    serial: u64,
    event: EngineEvent,
) {
    match event {
        EngineEvent::LocalCandidate(candidate) => match controller.session_context() {
            Some(session) if session.serial == serial => {
                relay.forward_local(&session.peer_id, candidate);
            }
            _ => debug!("Discarding candidate from replaced session {}", serial),
        },
        EngineEvent::GatheringComplete => {
            if let Some(session) = controller.session_context() {
                if session.serial == serial {
                    diagnostics.sample(serial, &session.handle).await;
                }
            }
        }
        EngineEvent::ConnectionState(state) => {
            controller.on_connection_state(serial, state);
            if state.is_established() {
                if let Some(session) = controller.session_context() {
                    if session.serial == serial {
                        diagnostics.sample(serial, &session.handle).await;
                    }
                }
            }
        }
        EngineEvent::RemoteControlLink(link) => {
            controller.adopt_remote_link(serial, link);
        }
        EngineEvent::ControlOpen { label } => {
            if controller.current_serial() == Some(serial) {
                bus.publish(SessionEvent::ControlOpened { label });
            }
        }
        EngineEvent::ControlClosed { label } => {
            if controller.current_serial() == Some(serial) {
                bus.publish(SessionEvent::ControlClosed { label });
            }
        }
        EngineEvent::ControlMessage(data) => {
            if controller.current_serial() == Some(serial) {
                control.deliver(data);
            } else {
                debug!("Discarding control message from replaced session {}", serial);
            }
        }
        EngineEvent::RemoteTrack { track_id, kind } => {
            bus.publish(SessionEvent::MediaTrackAdded {
                serial,
                track_id,
                kind,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::channel::test_support::{wait_for_frames, RecordingOutbox};
    use crate::signaling::{DeviceType, IceCandidate, PacingPolicy, SdpPayload};
    use crate::webrtc::engine::mock::MockEngine;
    use crate::webrtc::{CandidateKind, CandidatePairRow, ConnectionState};
    use bytes::Bytes;
    use std::time::Duration;

    struct Fixture {
        engine: Arc<MockEngine>,
        outbox: Arc<RecordingOutbox>,
        inject: mpsc::UnboundedSender<SignalEnvelope>,
        agent: Arc<EndpointAgent>,
    }

    fn fixture() -> Fixture {
        let engine = Arc::new(MockEngine::new());
        let outbox = RecordingOutbox::new(true);
        let bus = Arc::new(EventBus::new());
        let identity = EndpointIdentity::new("arm-1", DeviceType::ExecutionArm);
        let (channel, _channel_inbound) = SignalingChannel::with_outbox(
            outbox.clone(),
            identity,
            PacingPolicy::from_millis(1),
            bus.clone(),
        );
        // Hold the injection side of the inbound stream; the agent only
        // sees the receiver
        let (inject, inbound) = mpsc::unbounded_channel();
        let agent = EndpointAgent::with_channel(
            engine.clone(),
            channel,
            inbound,
            SessionConfig::default(),
            bus,
        );
        Fixture {
            engine,
            outbox,
            inject,
            agent,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !condition() {
            if tokio::time::Instant::now() > deadline {
                panic!("condition not reached within 2s");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn candidate() -> IceCandidate {
        IceCandidate::new("candidate:1 1 udp 2122260223 192.0.2.1 54321 typ host")
            .with_mid("0", 0)
    }

    #[tokio::test]
    async fn test_inbound_offer_is_answered() {
        let f = fixture();

        f.inject
            .send(SignalEnvelope::offer(
                "master",
                "arm-1",
                SdpPayload::offer("v=0\r\nremote-offer"),
            ))
            .unwrap();

        wait_for_frames(&f.outbox, 2).await;
        let answers = f.outbox.frames_of_type("answer");
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0]["to"], "master");
        assert_eq!(f.agent.phase(), Some(NegotiationPhase::Connected));
    }

    #[tokio::test]
    async fn test_inbound_candidate_reaches_session() {
        let f = fixture();

        f.inject
            .send(SignalEnvelope::offer(
                "master",
                "arm-1",
                SdpPayload::offer("v=0\r\nremote-offer"),
            ))
            .unwrap();
        wait_for_frames(&f.outbox, 2).await;

        f.inject
            .send(SignalEnvelope::candidate("master", "arm-1", candidate()))
            .unwrap();

        let engine = f.engine.clone();
        wait_until(move || engine.session(0).candidates.lock().len() == 1).await;
    }

    #[tokio::test]
    async fn test_candidate_without_session_is_discarded() {
        let f = fixture();

        f.inject
            .send(SignalEnvelope::candidate("master", "arm-1", candidate()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // No session was created and the loop is still alive
        assert_eq!(f.engine.session_count(), 0);
        assert_eq!(f.agent.phase(), None);
    }

    #[tokio::test]
    async fn test_local_candidate_forwarded_to_peer() {
        let f = fixture();

        f.agent.start_call("master").await.unwrap();
        wait_for_frames(&f.outbox, 2).await;

        f.engine
            .session(0)
            .sink
            .emit(EngineEvent::LocalCandidate(candidate()));

        wait_for_frames(&f.outbox, 3).await;
        let frames = f.outbox.frames_of_type("ice-candidate");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["to"], "master");
        assert_eq!(frames[0]["from"], "arm-1");
    }

    #[tokio::test]
    async fn test_candidate_from_replaced_session_is_dropped() {
        let f = fixture();

        f.agent.start_call("master").await.unwrap();
        let first = f.engine.session(0);
        f.agent.end_session("test").await;

        first.sink.emit(EngineEvent::LocalCandidate(candidate()));
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(f.outbox.frames_of_type("ice-candidate").is_empty());
    }

    #[tokio::test]
    async fn test_control_message_reaches_handler() {
        let f = fixture();
        let received = Arc::new(Mutex::new(Vec::new()));

        let sink = received.clone();
        f.agent
            .control()
            .set_handler(move |data| sink.lock().push(data));

        f.agent.start_call("master").await.unwrap();
        f.engine
            .session(0)
            .sink
            .emit(EngineEvent::ControlMessage(Bytes::from_static(b"grip")));

        let probe = received.clone();
        wait_until(move || probe.lock().len() == 1).await;
        assert_eq!(&received.lock()[0][..], b"grip");
    }

    #[tokio::test]
    async fn test_connected_state_classifies_path() {
        let f = fixture();

        f.agent.start_call("master").await.unwrap();
        f.engine.session(0).set_pairs(vec![CandidatePairRow {
            succeeded: true,
            nominated: true,
            local: CandidateKind::Relay,
            remote: CandidateKind::Host,
        }]);
        f.engine
            .session(0)
            .sink
            .emit(EngineEvent::ConnectionState(ConnectionState::Connected));

        let agent = f.agent.clone();
        wait_until(move || agent.phase() == Some(NegotiationPhase::Connected)).await;
        let agent = f.agent.clone();
        wait_until(move || agent.observed_paths() == vec![PathClass::Relay]).await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_session_and_link() {
        let f = fixture();

        f.agent.start_call("master").await.unwrap();
        f.agent.shutdown().await;

        assert!(f.engine.session(0).is_closed());
        assert_eq!(f.agent.phase(), None);
        assert_eq!(f.agent.link_state(), LinkState::Closed);
    }
}
