//! Signaling wire protocol
//!
//! Every WebSocket text frame carries one JSON envelope:
//!
//! ```text
//! {"type":"sdp", "data":{"type":"offer"|"answer", "sdp":"<SDP text>"}}
//! {"type":"ice", "data":{"sdpMLineIndex":<uint>, "candidate":"<candidate>"}}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::SignalingError;

/// SDP role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        }
    }
}

/// Session description payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Cheap structural check: an SDP body starts with its `v=` line
    pub fn validate(&self) -> Result<(), SignalingError> {
        let first = self.sdp.trim_start().lines().next().unwrap_or_default();
        if first.starts_with("v=") {
            Ok(())
        } else {
            Err(SignalingError::InvalidSdp(
                "missing version line".to_string(),
            ))
        }
    }
}

/// ICE candidate payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: u32,
    pub candidate: String,
}

/// A signaling envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum SignalMessage {
    Sdp(SessionDescription),
    Ice(IceCandidate),
}

impl SignalMessage {
    /// Parse a text frame. Any missing field, unknown `type` or badly
    /// typed value is a protocol violation.
    pub fn decode(text: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(text).map_err(|e| SignalingError::Malformed(e.to_string()))
    }

    /// Serialize to a text frame
    pub fn encode(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self).map_err(|e| SignalingError::Malformed(e.to_string()))
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Sdp(_) => "sdp",
            SignalMessage::Ice(_) => "ice",
        }
    }
}

impl From<SessionDescription> for SignalMessage {
    fn from(desc: SessionDescription) -> Self {
        SignalMessage::Sdp(desc)
    }
}

impl From<IceCandidate> for SignalMessage {
    fn from(candidate: IceCandidate) -> Self {
        SignalMessage::Ice(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_encode_offer_envelope() {
        let text = SignalMessage::from(SessionDescription::offer("v=0\r\n"))
            .encode()
            .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(
            value,
            json!({"type": "sdp", "data": {"type": "offer", "sdp": "v=0\r\n"}})
        );
    }

    #[test]
    fn test_encode_ice_envelope() {
        let text = SignalMessage::from(IceCandidate {
            sdp_mline_index: 1,
            candidate: "candidate:1 1 UDP 2130706431 10.0.0.2 5000 typ host".to_string(),
        })
        .encode()
        .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["type"], "ice");
        assert_eq!(value["data"]["sdpMLineIndex"], 1);
        assert!(value["data"]["candidate"]
            .as_str()
            .unwrap()
            .starts_with("candidate:"));
    }

    #[test]
    fn test_decode_answer() {
        let msg = SignalMessage::decode(
            r#"{"type":"sdp","data":{"type":"answer","sdp":"v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\n"}}"#,
        )
        .unwrap();

        match msg {
            SignalMessage::Sdp(desc) => {
                assert_eq!(desc.sdp_type, SdpType::Answer);
                assert!(desc.validate().is_ok());
            }
            other => panic!("expected sdp, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_ice() {
        let msg = SignalMessage::decode(
            r#"{"type":"ice","data":{"sdpMLineIndex":0,"candidate":"candidate:2 1 udp 1 192.168.1.4 9 typ host"}}"#,
        )
        .unwrap();

        assert_eq!(
            msg,
            SignalMessage::Ice(IceCandidate {
                sdp_mline_index: 0,
                candidate: "candidate:2 1 udp 1 192.168.1.4 9 typ host".to_string(),
            })
        );
    }

    #[test]
    fn test_missing_sdp_field_is_rejected() {
        let result = SignalMessage::decode(r#"{"type":"sdp","data":{"type":"answer"}}"#);
        assert!(matches!(result, Err(SignalingError::Malformed(_))));
    }

    #[test]
    fn test_missing_data_is_rejected() {
        assert!(SignalMessage::decode(r#"{"type":"ice"}"#).is_err());
        assert!(SignalMessage::decode(r#"{"data":{}}"#).is_err());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(SignalMessage::decode(r#"{"type":"bye","data":{}}"#).is_err());
        assert!(SignalMessage::decode(r#"{"type":"sdp","data":{"type":"pranswer","sdp":"v=0"}}"#).is_err());
    }

    #[test]
    fn test_negative_mline_index_is_rejected() {
        let result =
            SignalMessage::decode(r#"{"type":"ice","data":{"sdpMLineIndex":-1,"candidate":"c"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_not_json_is_rejected() {
        assert!(SignalMessage::decode("hello").is_err());
        assert!(SignalMessage::decode("[1,2,3]").is_err());
    }

    #[test]
    fn test_sdp_validation() {
        assert!(SessionDescription::answer("garbage").validate().is_err());
        assert!(SessionDescription::answer("").validate().is_err());
        assert!(SessionDescription::answer("v=0\r\ns=-\r\n").validate().is_ok());
    }
}
