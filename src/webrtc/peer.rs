//! webrtc-rs session engine
//!
//! Production implementation of the engine capability traits on top of
//! the `webrtc` crate. Each session owns one `RTCPeerConnection`;
//! engine callbacks never touch negotiation state directly, they emit
//! serial-tagged events through the session's [`EngineEventSink`].
//!
//! Remote candidates that arrive before the remote description is
//! committed are buffered here and drained on commit, since the
//! underlying stack rejects early candidates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::candidate::{CandidatePairState, CandidateType};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::stats::StatsReportType;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{AppError, Result};
use crate::signaling::{IceCandidate, SdpKind, SdpPayload};

use super::config::{ControlOptions, IceSettings};
use super::engine::{
    CandidateKind, CandidatePairRow, ConnectionState, ControlLink, EngineEvent, EngineEventSink,
    PeerSession, SessionEngine, SessionIntent,
};
use super::track::OutboundVideoTrack;

/// Engine backed by the `webrtc` crate
pub struct RtcEngine {
    ice: IceSettings,
    /// Camera feeds attached to callee sessions
    media: Mutex<Vec<Arc<OutboundVideoTrack>>>,
}

impl RtcEngine {
    pub fn new(ice: IceSettings) -> Self {
        Self {
            ice,
            media: Mutex::new(Vec::new()),
        }
    }

    /// Registers an outbound video track. Attached to every session
    /// created with `attach_local_media`.
    pub fn publish_track(&self, track: Arc<OutboundVideoTrack>) {
        info!("Publishing outbound video track '{}'", track.track_id());
        self.media.lock().push(track);
    }

    fn ice_servers(&self) -> Vec<RTCIceServer> {
        let mut ice_servers = vec![];

        for stun_url in &self.ice.stun_servers {
            ice_servers.push(RTCIceServer {
                urls: vec![stun_url.clone()],
                ..Default::default()
            });
        }

        for turn in &self.ice.turn_servers {
            ice_servers.push(RTCIceServer {
                urls: turn.urls.clone(),
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            });
        }

        ice_servers
    }
}

#[async_trait]
impl SessionEngine for RtcEngine {
    async fn create_session(
        &self,
        sink: EngineEventSink,
        intent: SessionIntent,
    ) -> Result<Arc<dyn PeerSession>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::Negotiation(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| AppError::Negotiation(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_setting_engine(SettingEngine::default())
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_transport_policy = if self.ice.relay_only {
            info!("ICE restricted to relay candidates (session {})", sink.serial());
            RTCIceTransportPolicy::Relay
        } else {
            RTCIceTransportPolicy::All
        };

        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers(),
            ice_transport_policy,
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::Negotiation(format!("Failed to create peer connection: {}", e))
        })?;
        let pc = Arc::new(pc);

        let session = Arc::new(RtcPeerSession {
            serial: sink.serial(),
            pc: pc.clone(),
            sink,
            pending_candidates: Mutex::new(Vec::new()),
            remote_description_set: AtomicBool::new(false),
        });
        session.install_handlers();

        if intent.attach_local_media {
            let tracks: Vec<_> = self.media.lock().clone();
            for track in &tracks {
                if let Err(e) = pc.add_track(track.rtp_track()).await {
                    let _ = pc.close().await;
                    return Err(AppError::Negotiation(format!(
                        "Failed to attach track '{}': {}",
                        track.track_id(),
                        e
                    )));
                }
            }
            if !tracks.is_empty() {
                info!(
                    "Attached {} outbound video track(s) (session {})",
                    tracks.len(),
                    session.serial
                );
            }
        }

        Ok(session)
    }
}

/// One peer connection under negotiation
pub struct RtcPeerSession {
    serial: u64,
    pc: Arc<RTCPeerConnection>,
    sink: EngineEventSink,
    /// Candidates held back until the remote description lands
    pending_candidates: Mutex<Vec<IceCandidate>>,
    remote_description_set: AtomicBool,
}

impl RtcPeerSession {
    fn install_handlers(&self) {
        let sink = self.sink.clone();
        let serial = self.serial;
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let sink = sink.clone();
                Box::pin(async move {
                    let state = match s {
                        RTCPeerConnectionState::New => ConnectionState::New,
                        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => ConnectionState::Failed,
                        RTCPeerConnectionState::Closed => ConnectionState::Closed,
                        _ => return,
                    };
                    info!("Session {} transport state: {}", serial, state);
                    sink.emit(EngineEvent::ConnectionState(state));
                })
            }));

        let serial = self.serial;
        self.pc
            .on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
                Box::pin(async move {
                    debug!("Session {} ICE connection state: {}", serial, s);
                })
            }));

        let sink = self.sink.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let sink = sink.clone();
                Box::pin(async move {
                    match candidate {
                        Some(c) => match c.to_json() {
                            Ok(init) => {
                                debug!("Local candidate: {}", init.candidate);
                                sink.emit(EngineEvent::LocalCandidate(IceCandidate {
                                    candidate: init.candidate,
                                    sdp_mid: init.sdp_mid,
                                    sdp_mline_index: init.sdp_mline_index,
                                }));
                            }
                            Err(e) => warn!("Local candidate could not be serialized: {}", e),
                        },
                        None => {
                            debug!("Local candidate gathering complete");
                            sink.emit(EngineEvent::GatheringComplete);
                        }
                    }
                })
            }));

        let sink = self.sink.clone();
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                let sink = sink.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Video => "video",
                        RTPCodecType::Audio => "audio",
                        _ => "unknown",
                    };
                    info!("Remote {} track arrived: {}", kind, track.id());
                    sink.emit(EngineEvent::RemoteTrack {
                        track_id: track.id(),
                        kind: kind.to_string(),
                    });
                })
            },
        ));

        let sink = self.sink.clone();
        self.pc
            .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let sink = sink.clone();
                Box::pin(async move {
                    info!("Peer opened data channel '{}'", dc.label());
                    wire_control_channel(&dc, &sink);
                    sink.emit(EngineEvent::RemoteControlLink(Arc::new(RtcControlLink {
                        dc,
                    })));
                })
            }));
    }

    async fn apply_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to add ICE candidate: {}", e)))?;
        Ok(())
    }

    async fn drain_pending_candidates(&self) {
        let pending: Vec<IceCandidate> = std::mem::take(&mut *self.pending_candidates.lock());
        if pending.is_empty() {
            return;
        }
        info!(
            "Applying {} buffered candidate(s) (session {})",
            pending.len(),
            self.serial
        );
        for candidate in pending {
            if let Err(e) = self.apply_candidate(candidate).await {
                warn!("Buffered candidate could not be applied: {}", e);
            }
        }
    }
}

#[async_trait]
impl PeerSession for RtcPeerSession {
    async fn add_recv_video_slots(&self, count: u32) -> Result<()> {
        for _ in 0..count {
            self.pc
                .add_transceiver_from_kind(
                    RTPCodecType::Video,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(|e| {
                    AppError::Negotiation(format!("Failed to add video transceiver: {}", e))
                })?;
        }
        debug!(
            "Added {} receive-only video slot(s) (session {})",
            count, self.serial
        );
        Ok(())
    }

    async fn open_control_channel(
        &self,
        label: &str,
        options: ControlOptions,
    ) -> Result<Arc<dyn ControlLink>> {
        let init = RTCDataChannelInit {
            ordered: Some(options.ordered),
            max_retransmits: Some(options.max_retransmits),
            ..Default::default()
        };
        let dc = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to create data channel: {}", e)))?;

        wire_control_channel(&dc, &self.sink);
        info!(
            "Control channel '{}' created (ordered: {}, max retransmits: {})",
            label, options.ordered, options.max_retransmits
        );
        Ok(Arc::new(RtcControlLink { dc }))
    }

    async fn create_offer(&self) -> Result<SdpPayload> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to create offer: {}", e)))?;
        Ok(SdpPayload::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SdpPayload> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to create answer: {}", e)))?;
        Ok(SdpPayload::answer(answer.sdp))
    }

    async fn set_local_description(&self, description: SdpPayload) -> Result<()> {
        let sdp = to_rtc_description(description)?;
        self.pc.set_local_description(sdp).await.map_err(|e| {
            AppError::Negotiation(format!("Failed to set local description: {}", e))
        })?;
        Ok(())
    }

    async fn set_remote_description(&self, description: SdpPayload) -> Result<()> {
        let sdp = to_rtc_description(description)?;
        self.pc.set_remote_description(sdp).await.map_err(|e| {
            AppError::Negotiation(format!("Failed to set remote description: {}", e))
        })?;
        self.remote_description_set.store(true, Ordering::SeqCst);
        self.drain_pending_candidates().await;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if candidate.candidate.is_empty() {
            debug!("Ignoring end-of-candidates marker (session {})", self.serial);
            return Ok(());
        }
        if !self.remote_description_set.load(Ordering::SeqCst) {
            let mut pending = self.pending_candidates.lock();
            pending.push(candidate);
            debug!(
                "Buffered early candidate ({} pending, session {})",
                pending.len(),
                self.serial
            );
            return Ok(());
        }
        self.apply_candidate(candidate).await
    }

    async fn candidate_pairs(&self) -> Result<Vec<CandidatePairRow>> {
        let report = self.pc.get_stats().await;

        let mut local_kinds: HashMap<String, CandidateKind> = HashMap::new();
        let mut remote_kinds: HashMap<String, CandidateKind> = HashMap::new();
        let mut pairs = Vec::new();

        for entry in report.reports.values() {
            match entry {
                StatsReportType::LocalCandidate(c) => {
                    local_kinds.insert(c.id.clone(), kind_of(c.candidate_type));
                }
                StatsReportType::RemoteCandidate(c) => {
                    remote_kinds.insert(c.id.clone(), kind_of(c.candidate_type));
                }
                StatsReportType::CandidatePair(pair) => {
                    pairs.push((
                        pair.local_candidate_id.clone(),
                        pair.remote_candidate_id.clone(),
                        pair.state == CandidatePairState::Succeeded,
                        pair.nominated,
                    ));
                }
                _ => {}
            }
        }

        Ok(pairs
            .into_iter()
            .map(|(local_id, remote_id, succeeded, nominated)| CandidatePairRow {
                succeeded,
                nominated,
                local: local_kinds
                    .get(&local_id)
                    .copied()
                    .unwrap_or(CandidateKind::Unknown),
                remote: remote_kinds
                    .get(&remote_id)
                    .copied()
                    .unwrap_or(CandidateKind::Unknown),
            })
            .collect())
    }

    async fn close(&self) -> Result<()> {
        debug!("Closing peer connection (session {})", self.serial);
        self.pc
            .close()
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to close peer connection: {}", e)))?;
        Ok(())
    }
}

/// Control channel handle over an `RTCDataChannel`
pub struct RtcControlLink {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl ControlLink for RtcControlLink {
    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send(&self, data: Bytes) -> Result<()> {
        self.dc
            .send(&data)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to send control message: {}", e)))?;
        Ok(())
    }
}

/// Routes channel lifecycle and inbound messages into the event sink.
/// Used for both self-created and peer-opened channels.
fn wire_control_channel(dc: &Arc<RTCDataChannel>, sink: &EngineEventSink) {
    let label = dc.label().to_string();

    let sink_open = sink.clone();
    let label_open = label.clone();
    dc.on_open(Box::new(move || {
        let sink = sink_open.clone();
        let label = label_open.clone();
        Box::pin(async move {
            info!("Control channel '{}' open", label);
            sink.emit(EngineEvent::ControlOpen { label });
        })
    }));

    let sink_close = sink.clone();
    let label_close = label;
    dc.on_close(Box::new(move || {
        let sink = sink_close.clone();
        let label = label_close.clone();
        Box::pin(async move {
            info!("Control channel '{}' closed", label);
            sink.emit(EngineEvent::ControlClosed { label });
        })
    }));

    let sink_msg = sink.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let sink = sink_msg.clone();
        Box::pin(async move {
            sink.emit(EngineEvent::ControlMessage(msg.data));
        })
    }));
}

fn to_rtc_description(payload: SdpPayload) -> Result<RTCSessionDescription> {
    let description = match payload.kind {
        SdpKind::Offer => RTCSessionDescription::offer(payload.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(payload.sdp),
    };
    description.map_err(|e| AppError::Negotiation(format!("Invalid session description: {}", e)))
}

fn kind_of(candidate_type: CandidateType) -> CandidateKind {
    match candidate_type {
        CandidateType::Host => CandidateKind::Host,
        CandidateType::ServerReflexive => CandidateKind::ServerReflexive,
        CandidateType::PeerReflexive => CandidateKind::PeerReflexive,
        CandidateType::Relay => CandidateKind::Relay,
        _ => CandidateKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn sink(serial: u64) -> EngineEventSink {
        let (tx, _rx) = mpsc::unbounded_channel();
        EngineEventSink::new(serial, tx)
    }

    #[test]
    fn test_candidate_kind_mapping() {
        assert_eq!(kind_of(CandidateType::Host), CandidateKind::Host);
        assert_eq!(
            kind_of(CandidateType::ServerReflexive),
            CandidateKind::ServerReflexive
        );
        assert_eq!(
            kind_of(CandidateType::PeerReflexive),
            CandidateKind::PeerReflexive
        );
        assert_eq!(kind_of(CandidateType::Relay), CandidateKind::Relay);
    }

    #[tokio::test]
    async fn test_offer_advertises_recv_video_slots() {
        let engine = RtcEngine::new(IceSettings::default());
        let session = engine
            .create_session(sink(1), SessionIntent::caller())
            .await
            .unwrap();

        session.add_recv_video_slots(3).await.unwrap();
        let offer = session.create_offer().await.unwrap();

        assert_eq!(offer.kind, SdpKind::Offer);
        let video_sections = offer.sdp.matches("m=video").count();
        assert_eq!(video_sections, 3);
        assert!(offer.sdp.contains("a=recvonly"));

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_control_channel_reports_label_and_closed_state() {
        let engine = RtcEngine::new(IceSettings::default());
        let session = engine
            .create_session(sink(2), SessionIntent::caller())
            .await
            .unwrap();

        let link = session
            .open_control_channel("control", ControlOptions::default())
            .await
            .unwrap();
        assert_eq!(link.label(), "control");
        // Not negotiated yet, so the channel cannot be open
        assert!(!link.is_open());

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_fresh_session_stats_walk_finds_no_succeeded_pair() {
        let engine = RtcEngine::new(IceSettings::default());
        let session = engine
            .create_session(sink(4), SessionIntent::caller())
            .await
            .unwrap();

        let pairs = session.candidate_pairs().await.unwrap();
        assert!(pairs.iter().all(|pair| !pair.succeeded));

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_early_candidate_is_buffered_not_rejected() {
        let engine = RtcEngine::new(IceSettings::default());
        let session = engine
            .create_session(sink(3), SessionIntent::caller())
            .await
            .unwrap();

        let candidate =
            IceCandidate::new("candidate:1 1 udp 2122260223 192.0.2.1 54321 typ host")
                .with_mid("0", 0);
        session.add_remote_candidate(candidate).await.unwrap();

        session.close().await.unwrap();
    }
}
