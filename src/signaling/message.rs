//! Signaling wire protocol types
//!
//! Every frame exchanged with the relay is a [`SignalEnvelope`]: a typed
//! body (tagged by `type`, payload under `data`) plus addressing and
//! timestamp fields. Unknown message types fail deserialization, so they
//! are rejected at the parse boundary rather than inside handlers.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Endpoint role on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceType {
    /// Controlled device: executes received commands, serves video
    ExecutionArm,
    /// Controller: initiates calls, sends commands
    TeachingArm,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::ExecutionArm => write!(f, "execution-arm"),
            DeviceType::TeachingArm => write!(f, "teaching-arm"),
        }
    }
}

/// Identity of this endpoint, fixed for the lifetime of a signaling connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointIdentity {
    pub id: String,
    pub device_type: DeviceType,
}

impl EndpointIdentity {
    pub fn new(id: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            id: id.into(),
            device_type,
        }
    }

    /// Identity with a random id, for endpoints that do not configure one
    pub fn generate(device_type: DeviceType) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), device_type)
    }
}

/// Connection kind discriminator carried by every envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionKind {
    Video,
}

impl Default for ConnectionKind {
    fn default() -> Self {
        Self::Video
    }
}

/// Session description payload for `offer` / `answer` messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdpPayload {
    /// Description kind, mirrored inside the payload as the peer API expects
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// SDP content
    pub sdp: String,
}

impl SdpPayload {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Description kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// ICE candidate as relayed between peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate string
    pub candidate: String,
    /// SDP mid (media ID)
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    /// SDP mline index
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }

    pub fn with_mid(mut self, mid: impl Into<String>, index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_mline_index = Some(index);
        self
    }
}

/// Registration payload announcing this endpoint's role to the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPayload {
    #[serde(rename = "deviceType")]
    pub device_type: DeviceType,
}

/// Relay acknowledgement payload (`success`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AckPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Relay error payload (`error`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Typed message body: the `type` tag selects the `data` payload shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SignalBody {
    #[serde(rename = "device-register")]
    DeviceRegister(RegisterPayload),
    #[serde(rename = "offer")]
    Offer(SdpPayload),
    #[serde(rename = "answer")]
    Answer(SdpPayload),
    #[serde(rename = "ice-candidate")]
    IceCandidate(IceCandidate),
    #[serde(rename = "success")]
    Success(AckPayload),
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl SignalBody {
    /// Wire tag of this body, for logs and drop accounting
    pub fn message_type(&self) -> &'static str {
        match self {
            SignalBody::DeviceRegister(_) => "device-register",
            SignalBody::Offer(_) => "offer",
            SignalBody::Answer(_) => "answer",
            SignalBody::IceCandidate(_) => "ice-candidate",
            SignalBody::Success(_) => "success",
            SignalBody::Error(_) => "error",
        }
    }
}

/// One signaling frame as exchanged with the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEnvelope {
    #[serde(flatten)]
    pub body: SignalBody,
    /// Sender endpoint id
    pub from: String,
    /// Target endpoint id; absent means relay-addressed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(rename = "connectionType", default)]
    pub connection_type: ConnectionKind,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl SignalEnvelope {
    fn new(body: SignalBody, from: impl Into<String>, to: Option<String>) -> Self {
        Self {
            body,
            from: from.into(),
            to,
            connection_type: ConnectionKind::Video,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Registration frame submitted right after the transport opens
    pub fn register(identity: &EndpointIdentity) -> Self {
        Self::new(
            SignalBody::DeviceRegister(RegisterPayload {
                device_type: identity.device_type,
            }),
            identity.id.clone(),
            None,
        )
    }

    pub fn offer(from: impl Into<String>, to: impl Into<String>, sdp: SdpPayload) -> Self {
        Self::new(SignalBody::Offer(sdp), from, Some(to.into()))
    }

    pub fn answer(from: impl Into<String>, to: impl Into<String>, sdp: SdpPayload) -> Self {
        Self::new(SignalBody::Answer(sdp), from, Some(to.into()))
    }

    pub fn candidate(
        from: impl Into<String>,
        to: impl Into<String>,
        candidate: IceCandidate,
    ) -> Self {
        Self::new(SignalBody::IceCandidate(candidate), from, Some(to.into()))
    }

    /// Wire tag of the body
    pub fn message_type(&self) -> &'static str {
        self.body.message_type()
    }

    /// Whether this envelope is for the given endpoint.
    /// Envelopes without a target are relay-addressed and accepted.
    pub fn is_addressed_to(&self, id: &str) -> bool {
        match &self.to {
            Some(to) => to == id,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_envelope_shape() {
        let identity = EndpointIdentity::new("arm-1", DeviceType::ExecutionArm);
        let env = SignalEnvelope::register(&identity);
        let json: serde_json::Value = serde_json::to_value(&env).unwrap();

        assert_eq!(json["type"], "device-register");
        assert_eq!(json["from"], "arm-1");
        assert_eq!(json["connectionType"], "VIDEO");
        assert_eq!(json["data"]["deviceType"], "EXECUTION_ARM");
        assert!(json["timestamp"].as_i64().unwrap() > 0);
        assert!(json.get("to").is_none());
    }

    #[test]
    fn test_offer_envelope_nests_description() {
        let env = SignalEnvelope::offer("master", "slave", SdpPayload::offer("v=0\r\n"));
        let json: serde_json::Value = serde_json::to_value(&env).unwrap();

        assert_eq!(json["type"], "offer");
        assert_eq!(json["to"], "slave");
        assert_eq!(json["data"]["type"], "offer");
        assert_eq!(json["data"]["sdp"], "v=0\r\n");
    }

    #[test]
    fn test_candidate_uses_wire_field_names() {
        let cand = IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host").with_mid("0", 0);
        let env = SignalEnvelope::candidate("a", "b", cand);
        let json: serde_json::Value = serde_json::to_value(&env).unwrap();

        assert_eq!(json["type"], "ice-candidate");
        assert_eq!(json["data"]["sdpMid"], "0");
        assert_eq!(json["data"]["sdpMLineIndex"], 0);
        assert!(json["data"]
            .get("candidate")
            .unwrap()
            .as_str()
            .unwrap()
            .contains("typ host"));
    }

    #[test]
    fn test_inbound_answer_parses() {
        let raw = r#"{
            "type": "answer",
            "from": "slave",
            "to": "master",
            "connectionType": "VIDEO",
            "data": {"type": "answer", "sdp": "v=0\r\nanswer"},
            "timestamp": 1700000000000
        }"#;
        let env: SignalEnvelope = serde_json::from_str(raw).unwrap();
        match env.body {
            SignalBody::Answer(ref sdp) => {
                assert_eq!(sdp.kind, SdpKind::Answer);
                assert!(sdp.sdp.starts_with("v=0"));
            }
            ref other => panic!("unexpected body: {:?}", other),
        }
        assert!(env.is_addressed_to("master"));
        assert!(!env.is_addressed_to("someone-else"));
    }

    #[test]
    fn test_unknown_type_rejected_at_parse() {
        let raw = r#"{
            "type": "totally-new-thing",
            "from": "x",
            "connectionType": "VIDEO",
            "data": {},
            "timestamp": 1
        }"#;
        assert!(serde_json::from_str::<SignalEnvelope>(raw).is_err());
    }

    #[test]
    fn test_relay_addressed_without_target() {
        let raw = r#"{
            "type": "success",
            "from": "relay",
            "connectionType": "VIDEO",
            "data": {"message": "registered"},
            "timestamp": 1
        }"#;
        let env: SignalEnvelope = serde_json::from_str(raw).unwrap();
        assert!(env.is_addressed_to("anyone"));
        assert_eq!(env.message_type(), "success");
    }

    #[test]
    fn test_device_type_wire_values() {
        assert_eq!(
            serde_json::to_string(&DeviceType::TeachingArm).unwrap(),
            "\"TEACHING_ARM\""
        );
        assert_eq!(
            serde_json::from_str::<DeviceType>("\"EXECUTION_ARM\"").unwrap(),
            DeviceType::ExecutionArm
        );
    }
}
