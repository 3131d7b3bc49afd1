//! Outbound video tracks
//!
//! The execution arm publishes its camera feeds as RTP tracks. Frame
//! capture and encoding live outside this crate; an external pipeline
//! pushes ready RTP packets through [`OutboundVideoTrack::write_packet`].

use std::sync::Arc;

use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;

use crate::error::{AppError, Result};

/// Video codec carried on an outbound track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    VP8,
    VP9,
}

impl VideoCodec {
    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/H264",
            VideoCodec::VP8 => "video/VP8",
            VideoCodec::VP9 => "video/VP9",
        }
    }

    pub fn sdp_fmtp(&self) -> &'static str {
        match self {
            VideoCodec::H264 => {
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
            }
            VideoCodec::VP8 => "",
            VideoCodec::VP9 => "profile-id=0",
        }
    }
}

/// Outbound track configuration
#[derive(Debug, Clone)]
pub struct OutboundTrackConfig {
    /// Track ID
    pub track_id: String,
    /// Stream ID
    pub stream_id: String,
    /// Video codec
    pub codec: VideoCodec,
    /// Clock rate
    pub clock_rate: u32,
}

impl Default for OutboundTrackConfig {
    fn default() -> Self {
        Self {
            track_id: "camera0".to_string(),
            stream_id: "teleolink-stream".to_string(),
            codec: VideoCodec::H264,
            clock_rate: 90000,
        }
    }
}

impl OutboundTrackConfig {
    /// Capability advertised for this track during negotiation
    pub fn codec_capability(&self) -> RTCRtpCodecCapability {
        RTCRtpCodecCapability {
            mime_type: self.codec.mime_type().to_string(),
            clock_rate: self.clock_rate,
            channels: 0,
            sdp_fmtp_line: self.codec.sdp_fmtp().to_string(),
            rtcp_feedback: vec![],
        }
    }
}

/// Camera feed published toward the teaching arm
pub struct OutboundVideoTrack {
    config: OutboundTrackConfig,
    track: Arc<TrackLocalStaticRTP>,
}

impl OutboundVideoTrack {
    pub fn new(config: OutboundTrackConfig) -> Self {
        let track = Arc::new(TrackLocalStaticRTP::new(
            config.codec_capability(),
            config.track_id.clone(),
            config.stream_id.clone(),
        ));

        Self { config, track }
    }

    pub fn track_id(&self) -> &str {
        &self.config.track_id
    }

    pub fn codec(&self) -> VideoCodec {
        self.config.codec
    }

    /// Underlying RTP track handed to the peer connection
    pub fn rtp_track(&self) -> Arc<TrackLocalStaticRTP> {
        self.track.clone()
    }

    /// Writes one RTP packet. Packets written while no session is bound
    /// are discarded by the track.
    pub async fn write_packet(&self, packet: &rtp::packet::Packet) -> Result<()> {
        self.track
            .write_rtp(packet)
            .await
            .map_err(|e| AppError::Media(format!("Failed to write RTP packet: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_properties() {
        assert_eq!(VideoCodec::H264.mime_type(), "video/H264");
        assert_eq!(VideoCodec::VP8.mime_type(), "video/VP8");
        assert_eq!(VideoCodec::VP9.mime_type(), "video/VP9");
        assert!(VideoCodec::H264.sdp_fmtp().contains("packetization-mode=1"));
    }

    #[test]
    fn test_default_config_capability() {
        let config = OutboundTrackConfig::default();
        let capability = config.codec_capability();
        assert_eq!(capability.mime_type, "video/H264");
        assert_eq!(capability.clock_rate, 90000);
        assert_eq!(config.track_id, "camera0");
    }

    #[test]
    fn test_track_exposes_identity() {
        let track = OutboundVideoTrack::new(OutboundTrackConfig {
            track_id: "camera2".to_string(),
            ..Default::default()
        });
        assert_eq!(track.track_id(), "camera2");
        assert_eq!(track.codec(), VideoCodec::H264);
    }
}
