//! Signaling channel to the relay
//!
//! Owns the WebSocket connection, registers this endpoint's identity as
//! the first outbound frame, and drains an ordered outbound queue through
//! a single task. The drain task is the only writer, so at most one
//! transmission is in flight and frames leave in submission order with a
//! minimum gap between sends. A frame that reaches the drain task while
//! the link is not open is dropped, never requeued; each drop is logged
//! and published on the event bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::{EventBus, SessionEvent};
use crate::utils::LogThrottler;
use crate::warn_throttled;

use super::message::{EndpointIdentity, SignalBody, SignalEnvelope};
use super::pacing::{PacingPolicy, SendPacer};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// WebSocket keepalive ping interval
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Signaling link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Transport not established yet
    Connecting,
    /// Transport open, registration not yet acknowledged
    Open,
    /// Relay acknowledged our registration
    Registered,
    /// Link closed normally
    Closed,
    /// Link broke with a transport error
    Failed,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkState::Connecting => "connecting",
            LinkState::Open => "open",
            LinkState::Registered => "registered",
            LinkState::Closed => "closed",
            LinkState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Write side of the signaling transport
///
/// The drain task is the only caller, which keeps transmissions
/// single-flight. The WebSocket implementation is [`WsOutbox`]; tests
/// substitute a recorder.
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Whether the transport currently accepts frames
    fn is_open(&self) -> bool;

    /// Writes one text frame to the transport
    async fn deliver(&self, text: String) -> Result<()>;

    /// Sends a transport-level keepalive
    async fn ping(&self) -> Result<()>;

    /// Closes the transport
    async fn close(&self);
}

/// Client side of the signaling relay connection
pub struct SignalingChannel {
    identity: EndpointIdentity,
    outbox: Arc<dyn Outbox>,
    queue_tx: mpsc::UnboundedSender<SignalEnvelope>,
    inbound_tx: mpsc::UnboundedSender<SignalEnvelope>,
    state_tx: Arc<watch::Sender<LinkState>>,
    state_rx: watch::Receiver<LinkState>,
    shutdown_tx: broadcast::Sender<()>,
    bus: Arc<EventBus>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl SignalingChannel {
    /// Connects to the relay and registers this endpoint.
    ///
    /// The registration frame is enqueued before this call returns, so it
    /// is always the first frame on the wire. Returns the channel and the
    /// receiver of inbound frames addressed to this endpoint.
    pub async fn connect(
        url: &str,
        identity: EndpointIdentity,
        policy: PacingPolicy,
        bus: Arc<EventBus>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SignalEnvelope>)> {
        info!("Connecting to signaling relay at {}", url);
        let (stream, _) = connect_async(url).await?;
        let (ws_sink, ws_source) = stream.split();

        let outbox = Arc::new(WsOutbox::new(ws_sink));
        let (channel, inbound_rx) = Self::with_outbox(outbox.clone(), identity, policy, bus);

        let reader = tokio::spawn(reader_loop(
            ws_source,
            channel.identity.id.clone(),
            outbox,
            channel.inbound_tx.clone(),
            channel.state_tx.clone(),
            channel.bus.clone(),
            channel.shutdown_tx.subscribe(),
        ));
        channel.tasks.lock().push(reader);

        Ok((channel, inbound_rx))
    }

    /// Builds a channel over an injected transport.
    ///
    /// The drain task starts immediately and the registration frame is
    /// the first entry in the queue, exactly as in [`connect`](Self::connect).
    pub fn with_outbox(
        outbox: Arc<dyn Outbox>,
        identity: EndpointIdentity,
        policy: PacingPolicy,
        bus: Arc<EventBus>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SignalEnvelope>) {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let initial = if outbox.is_open() {
            LinkState::Open
        } else {
            LinkState::Connecting
        };
        let (state_tx, state_rx) = watch::channel(initial);
        let (shutdown_tx, _) = broadcast::channel(1);

        let channel = Arc::new(Self {
            identity,
            outbox: outbox.clone(),
            queue_tx,
            inbound_tx,
            state_tx: Arc::new(state_tx),
            state_rx,
            shutdown_tx: shutdown_tx.clone(),
            bus: bus.clone(),
            tasks: parking_lot::Mutex::new(Vec::new()),
        });

        let drain = tokio::spawn(drain_loop(
            queue_rx,
            outbox,
            SendPacer::new(policy),
            bus,
            shutdown_tx.subscribe(),
        ));
        channel.tasks.lock().push(drain);

        channel.submit(SignalEnvelope::register(&channel.identity));
        (channel, inbound_rx)
    }

    /// Enqueues a frame for ordered, paced transmission.
    ///
    /// Fire-and-forget: a frame that cannot be sent is dropped, with the
    /// drop logged and published as an event. Nothing is retried.
    pub fn submit(&self, envelope: SignalEnvelope) {
        let message_type = envelope.message_type();
        if self.queue_tx.send(envelope).is_err() {
            warn!(
                "Dropping {} message: outbound queue is gone",
                message_type
            );
            self.bus.publish(SessionEvent::SignalingMessageDropped {
                message_type: message_type.to_string(),
                reason: "queue closed".to_string(),
            });
        }
    }

    /// This endpoint's identity as registered with the relay
    pub fn identity(&self) -> &EndpointIdentity {
        &self.identity
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        *self.state_rx.borrow()
    }

    /// Watch handle for link state transitions
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }

    /// Closes the link. Frames still queued are dropped by the drain
    /// task as it shuts down.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(());
        self.outbox.close().await;
        set_state(&self.state_tx, &self.bus, LinkState::Closed);
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

/// Marks a state transition and publishes it when it actually changed
fn set_state(state_tx: &watch::Sender<LinkState>, bus: &EventBus, new: LinkState) {
    let changed = state_tx.send_if_modified(|current| {
        if *current == new {
            false
        } else {
            *current = new;
            true
        }
    });
    if changed {
        info!("Signaling link state: {}", new);
        bus.publish(SessionEvent::SignalingStateChanged { state: new });
    }
}

/// Single-flight outbound drain: dequeue, pace, transmit
async fn drain_loop(
    mut queue_rx: mpsc::UnboundedReceiver<SignalEnvelope>,
    outbox: Arc<dyn Outbox>,
    mut pacer: SendPacer,
    bus: Arc<EventBus>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let throttler = LogThrottler::default();
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);

    loop {
        tokio::select! {
            maybe = queue_rx.recv() => {
                match maybe {
                    Some(frame) => {
                        transmit_or_drop(&*outbox, &mut pacer, &bus, &throttler, frame).await;
                    }
                    None => break,
                }
            }
            _ = keepalive.tick() => {
                if outbox.is_open() {
                    let _ = outbox.ping().await;
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("Signaling drain loop shutting down");
                // Frames accepted before shutdown still get a drop record
                queue_rx.close();
                while let Ok(frame) = queue_rx.try_recv() {
                    let message_type = frame.message_type();
                    warn!("Dropping {} message: signaling link closed", message_type);
                    bus.publish(SessionEvent::SignalingMessageDropped {
                        message_type: message_type.to_string(),
                        reason: "link closed".to_string(),
                    });
                }
                break;
            }
        }
    }
}

async fn transmit_or_drop(
    outbox: &dyn Outbox,
    pacer: &mut SendPacer,
    bus: &EventBus,
    throttler: &LogThrottler,
    frame: SignalEnvelope,
) {
    let message_type = frame.message_type();

    // Dropped frames are not transmissions and consume no pacing budget
    if !outbox.is_open() {
        warn_throttled!(
            throttler,
            "link_closed_drop",
            "Dropping {} message: signaling link not open",
            message_type
        );
        bus.publish(SessionEvent::SignalingMessageDropped {
            message_type: message_type.to_string(),
            reason: "link not open".to_string(),
        });
        return;
    }

    let delay = pacer.required_delay(Instant::now());
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let text = match serde_json::to_string(&frame) {
        Ok(text) => text,
        Err(e) => {
            warn!("Dropping {} message: serialization failed: {}", message_type, e);
            bus.publish(SessionEvent::SignalingMessageDropped {
                message_type: message_type.to_string(),
                reason: format!("serialization failed: {}", e),
            });
            return;
        }
    };

    match outbox.deliver(text).await {
        Ok(()) => {
            pacer.record_send(Instant::now());
            debug!("Sent {} message to relay", message_type);
        }
        Err(e) => {
            warn_throttled!(
                throttler,
                "send_failed_drop",
                "Dropping {} message: send failed: {}",
                message_type,
                e
            );
            bus.publish(SessionEvent::SignalingMessageDropped {
                message_type: message_type.to_string(),
                reason: format!("send failed: {}", e),
            });
        }
    }
}

/// Reads relay frames, updates link state, forwards addressed signals
async fn reader_loop(
    mut source: WsSource,
    local_id: String,
    outbox: Arc<WsOutbox>,
    inbound_tx: mpsc::UnboundedSender<SignalEnvelope>,
    state_tx: Arc<watch::Sender<LinkState>>,
    bus: Arc<EventBus>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            maybe = source.next() => {
                match maybe {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, &local_id, &inbound_tx, &state_tx, &bus);
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if let Ok(text) = String::from_utf8(data) {
                            handle_frame(&text, &local_id, &inbound_tx, &state_tx, &bus);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Signaling relay closed the connection");
                        outbox.mark_closed();
                        set_state(&state_tx, &bus, LinkState::Closed);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Signaling transport error: {}", e);
                        outbox.mark_closed();
                        set_state(&state_tx, &bus, LinkState::Failed);
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("Signaling reader loop shutting down");
                break;
            }
        }
    }
}

fn handle_frame(
    text: &str,
    local_id: &str,
    inbound_tx: &mpsc::UnboundedSender<SignalEnvelope>,
    state_tx: &watch::Sender<LinkState>,
    bus: &EventBus,
) {
    let envelope: SignalEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Discarding unparseable signaling frame: {}", e);
            return;
        }
    };

    if !envelope.is_addressed_to(local_id) {
        debug!(
            "Discarding {} message addressed to {:?}",
            envelope.message_type(),
            envelope.to
        );
        return;
    }

    match &envelope.body {
        SignalBody::Success(ack) => {
            debug!(
                "Relay acknowledged registration: {}",
                ack.message.as_deref().unwrap_or("ok")
            );
            set_state(state_tx, bus, LinkState::Registered);
        }
        SignalBody::Error(err) => {
            let message = err.message.clone().unwrap_or_else(|| "unknown".to_string());
            warn!("Relay reported error: {}", message);
            bus.publish(SessionEvent::SystemError {
                module: "signaling".to_string(),
                severity: "error".to_string(),
                message,
            });
        }
        _ => {
            if inbound_tx.send(envelope).is_err() {
                debug!("Inbound consumer gone; discarding signaling frame");
            }
        }
    }
}

/// WebSocket transport write half
pub(crate) struct WsOutbox {
    sink: AsyncMutex<WsSink>,
    open: AtomicBool,
}

impl WsOutbox {
    fn new(sink: WsSink) -> Self {
        Self {
            sink: AsyncMutex::new(sink),
            open: AtomicBool::new(true),
        }
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Outbox for WsOutbox {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn deliver(&self, text: String) -> Result<()> {
        let mut sink = self.sink.lock().await;
        match sink.send(Message::Text(text)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.mark_closed();
                Err(e.into())
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        match sink.send(Message::Ping(Vec::new())).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.mark_closed();
                Err(e.into())
            }
        }
    }

    async fn close(&self) {
        self.mark_closed();
        let mut sink = self.sink.lock().await;
        let _ = sink.close().await;
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Recording transport shared by queue, controller and relay tests

    use super::*;
    use crate::error::AppError;
    use crate::signaling::message::DeviceType;
    use std::sync::atomic::AtomicU32;
    use tokio::time::timeout;

    pub(crate) struct RecordingOutbox {
        pub open: AtomicBool,
        pub delivered: parking_lot::Mutex<Vec<(Instant, String)>>,
        pub pings: AtomicU32,
    }

    impl RecordingOutbox {
        pub fn new(open: bool) -> Arc<Self> {
            Arc::new(Self {
                open: AtomicBool::new(open),
                delivered: parking_lot::Mutex::new(Vec::new()),
                pings: AtomicU32::new(0),
            })
        }

        pub fn set_open(&self, open: bool) {
            self.open.store(open, Ordering::SeqCst);
        }

        pub fn frames(&self) -> Vec<(Instant, serde_json::Value)> {
            self.delivered
                .lock()
                .iter()
                .map(|(at, text)| (*at, serde_json::from_str(text).unwrap()))
                .collect()
        }

        /// Frames of a given wire type, oldest first
        pub fn frames_of_type(&self, message_type: &str) -> Vec<serde_json::Value> {
            self.frames()
                .into_iter()
                .map(|(_, frame)| frame)
                .filter(|frame| frame["type"] == message_type)
                .collect()
        }
    }

    #[async_trait]
    impl Outbox for RecordingOutbox {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn deliver(&self, text: String) -> Result<()> {
            if !self.is_open() {
                return Err(AppError::Signaling("closed".to_string()));
            }
            self.delivered.lock().push((Instant::now(), text));
            Ok(())
        }

        async fn ping(&self) -> Result<()> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) {
            self.set_open(false);
        }
    }

    pub(crate) fn identity() -> EndpointIdentity {
        EndpointIdentity::new("arm-1", DeviceType::ExecutionArm)
    }

    pub(crate) async fn wait_for_frames(outbox: &RecordingOutbox, count: usize) {
        timeout(Duration::from_secs(2), async {
            while outbox.delivered.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("expected frames never delivered");
    }
}
