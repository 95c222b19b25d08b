//! Signal messages exchanged between peers during negotiation.
//!
//! Messages travel as JSON objects carrying a `type` tag. They are decoded and
//! validated once, at the boundary, into [`SignalMessage`]; everything past
//! that point works with the closed enum.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PeerError, PeerResult};

pub const SIGNAL_OFFER: &str = "offer";
pub const SIGNAL_ANSWER: &str = "answer";
pub const SIGNAL_PRANSWER: &str = "pranswer";
pub const SIGNAL_ROLLBACK: &str = "rollback";
pub const SIGNAL_CANDIDATE: &str = "candidate";
pub const SIGNAL_TRANSCEIVER_REQUEST: &str = "transceiverRequest";
pub const SIGNAL_RENEGOTIATE: &str = "renegotiate";

const KNOWN_TYPES: [&str; 7] = [
    SIGNAL_OFFER,
    SIGNAL_ANSWER,
    SIGNAL_PRANSWER,
    SIGNAL_ROLLBACK,
    SIGNAL_CANDIDATE,
    SIGNAL_TRANSCEIVER_REQUEST,
    SIGNAL_RENEGOTIATE,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl SdpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpKind::Offer => SIGNAL_OFFER,
            SdpKind::Answer => SIGNAL_ANSWER,
            SdpKind::Pranswer => SIGNAL_PRANSWER,
            SdpKind::Rollback => SIGNAL_ROLLBACK,
        }
    }
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn new(kind: SdpKind, sdp: impl Into<String>) -> Self {
        Self {
            kind,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate descriptor as carried by `candidate` signals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransceiverDirection {
    #[default]
    Sendrecv,
    Sendonly,
    Recvonly,
    Inactive,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEncoding {
    #[serde(default)]
    pub rid: String,
    #[serde(default)]
    pub ssrc: u32,
    #[serde(default)]
    pub payload_type: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransceiverInit {
    pub direction: TransceiverDirection,
    #[serde(default)]
    pub send_encodings: Vec<SendEncoding>,
}

/// Asks the initiator to add a transceiver on behalf of the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransceiverRequest {
    pub kind: MediaKind,
    #[serde(default)]
    pub init: Vec<TransceiverInit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "WireSignal", from = "WireSignal")]
pub enum SignalMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    Pranswer { sdp: String },
    Rollback { sdp: String },
    Candidate(IceCandidate),
    TransceiverRequest(TransceiverRequest),
    Renegotiate,
}

impl SignalMessage {
    /// Decodes a JSON value, separating an unusable tag from a bad payload.
    pub fn from_value(value: &Value) -> PeerResult<Self> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(PeerError::InvalidSignalMessageType)?;
        if !KNOWN_TYPES.contains(&tag) {
            return Err(PeerError::InvalidSignalMessageType);
        }
        serde_json::from_value::<WireSignal>(value.clone())
            .map(SignalMessage::from)
            .map_err(|err| PeerError::InvalidSignalMessage(err.to_string()))
    }

    pub fn from_json(text: &str) -> PeerResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|err| PeerError::InvalidSignalMessage(err.to_string()))?;
        Self::from_value(&value)
    }

    pub fn to_value(&self) -> PeerResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_json(&self) -> PeerResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Offer { .. } => SIGNAL_OFFER,
            SignalMessage::Answer { .. } => SIGNAL_ANSWER,
            SignalMessage::Pranswer { .. } => SIGNAL_PRANSWER,
            SignalMessage::Rollback { .. } => SIGNAL_ROLLBACK,
            SignalMessage::Candidate(_) => SIGNAL_CANDIDATE,
            SignalMessage::TransceiverRequest(_) => SIGNAL_TRANSCEIVER_REQUEST,
            SignalMessage::Renegotiate => SIGNAL_RENEGOTIATE,
        }
    }

    /// The session description carried by offer/answer/pranswer/rollback.
    pub fn description(&self) -> Option<SessionDescription> {
        match self {
            SignalMessage::Offer { sdp } => Some(SessionDescription::new(SdpKind::Offer, sdp.clone())),
            SignalMessage::Answer { sdp } => {
                Some(SessionDescription::new(SdpKind::Answer, sdp.clone()))
            }
            SignalMessage::Pranswer { sdp } => {
                Some(SessionDescription::new(SdpKind::Pranswer, sdp.clone()))
            }
            SignalMessage::Rollback { sdp } => {
                Some(SessionDescription::new(SdpKind::Rollback, sdp.clone()))
            }
            _ => None,
        }
    }
}

impl From<SessionDescription> for SignalMessage {
    fn from(description: SessionDescription) -> Self {
        let SessionDescription { kind, sdp } = description;
        match kind {
            SdpKind::Offer => SignalMessage::Offer { sdp },
            SdpKind::Answer => SignalMessage::Answer { sdp },
            SdpKind::Pranswer => SignalMessage::Pranswer { sdp },
            SdpKind::Rollback => SignalMessage::Rollback { sdp },
        }
    }
}

fn renegotiate_flag() -> bool {
    true
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
enum WireSignal {
    #[serde(rename = "offer")]
    Offer { sdp: String },
    #[serde(rename = "answer")]
    Answer { sdp: String },
    #[serde(rename = "pranswer")]
    Pranswer { sdp: String },
    #[serde(rename = "rollback")]
    Rollback {
        #[serde(default)]
        sdp: String,
    },
    #[serde(rename = "candidate")]
    Candidate { candidate: IceCandidate },
    #[serde(rename = "transceiverRequest")]
    TransceiverRequest {
        #[serde(rename = "transceiverRequest")]
        transceiver_request: TransceiverRequest,
    },
    #[serde(rename = "renegotiate")]
    Renegotiate {
        #[serde(default = "renegotiate_flag")]
        renegotiate: bool,
    },
}

impl From<WireSignal> for SignalMessage {
    fn from(wire: WireSignal) -> Self {
        match wire {
            WireSignal::Offer { sdp } => SignalMessage::Offer { sdp },
            WireSignal::Answer { sdp } => SignalMessage::Answer { sdp },
            WireSignal::Pranswer { sdp } => SignalMessage::Pranswer { sdp },
            WireSignal::Rollback { sdp } => SignalMessage::Rollback { sdp },
            WireSignal::Candidate { candidate } => SignalMessage::Candidate(candidate),
            WireSignal::TransceiverRequest {
                transceiver_request,
            } => SignalMessage::TransceiverRequest(transceiver_request),
            WireSignal::Renegotiate { .. } => SignalMessage::Renegotiate,
        }
    }
}

impl From<SignalMessage> for WireSignal {
    fn from(message: SignalMessage) -> Self {
        match message {
            SignalMessage::Offer { sdp } => WireSignal::Offer { sdp },
            SignalMessage::Answer { sdp } => WireSignal::Answer { sdp },
            SignalMessage::Pranswer { sdp } => WireSignal::Pranswer { sdp },
            SignalMessage::Rollback { sdp } => WireSignal::Rollback { sdp },
            SignalMessage::Candidate(candidate) => WireSignal::Candidate { candidate },
            SignalMessage::TransceiverRequest(transceiver_request) => {
                WireSignal::TransceiverRequest {
                    transceiver_request,
                }
            }
            SignalMessage::Renegotiate => WireSignal::Renegotiate { renegotiate: true },
        }
    }
}
