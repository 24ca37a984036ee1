// ================
// crates/common/src/lib.rs
// ================
//! Wire protocol shared between browser peers and the signaling relay.
//!
//! Every frame on the socket is an [`Envelope`] of the form `{"type": ..., "data": {...}}`.
//! Inbound envelopes are parsed into a typed [`ClientMessage`]; outbound messages are built
//! as a typed [`ServerMessage`] and flattened back into an envelope when serialized.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Identifier of an externally owned meeting
pub type MeetingId = String;
/// Caller-supplied logical identity of a participant
pub type UserId = String;
/// Transport identity of one open socket
pub type ConnectionId = Uuid;

/// Message type names used on the wire
pub mod msg_type {
    pub const JOIN: &str = "JOIN";
    pub const CONNECTION_REQUEST: &str = "CONNECTION_REQUEST";
    pub const ICE_CANDIDATE: &str = "ICE_CANDIDATE";
    pub const OFFER_SDP: &str = "OFFER_SDP";
    pub const ANSWER_SDP: &str = "ANSWER_SDP";
    pub const STREAM_CHANGED: &str = "STREAM_CHANGED";
    pub const USER_LEFT: &str = "USER_LEFT";
    pub const END_MEETING: &str = "END_MEETING";

    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const JOINED_MEETING: &str = "JOINED_MEETING";
    pub const USER_JOINED: &str = "USER_JOINED";
    pub const MEETING_ENDED: &str = "MEETING_ENDED";
    pub const ERROR: &str = "ERROR";

    /// Types only the server may emit; clients cannot smuggle them through the generic relay.
    pub const RESERVED: &[&str] = &[NOT_FOUND, JOINED_MEETING, USER_JOINED, MEETING_ENDED, ERROR];
}

/// Raw `{type, data}` frame
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

/// Errors raised while turning an envelope into a typed message
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid payload for {kind}: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("payload for {0} must be an object carrying a string userId")]
    MissingUserId(String),

    #[error("message type {0} is reserved for the server")]
    ReservedType(String),
}

/// `JOIN` payload
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub user_id: UserId,
    pub name: String,
}

/// `CONNECTION_REQUEST` payload
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    pub user_id: UserId,
    pub other_user_id: UserId,
    pub name: String,
}

/// `ICE_CANDIDATE` payload
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateRequest {
    pub user_id: UserId,
    pub other_user_id: UserId,
    pub candidate: Value,
}

/// `OFFER_SDP` and `ANSWER_SDP` payload
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SdpRequest {
    pub user_id: UserId,
    pub other_user_id: UserId,
    pub sdp: Value,
}

/// `STREAM_CHANGED` payload (mute/camera toggles)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamChangedRequest {
    pub user_id: UserId,
    pub stream: Value,
}

/// Payload carrying only the acting user (`USER_LEFT`, `END_MEETING`)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub user_id: UserId,
}

/// Any signaling type without a dedicated handler
#[derive(Debug, Clone, PartialEq)]
pub struct CustomEvent {
    pub kind: String,
    pub user_id: UserId,
    /// Remaining payload fields, `userId` excluded
    pub data: Map<String, Value>,
}

/// Messages sent from a peer to the relay
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "Envelope")]
pub enum ClientMessage {
    Join(JoinRequest),
    ConnectionRequest(ConnectionRequest),
    IceCandidate(IceCandidateRequest),
    OfferSdp(SdpRequest),
    AnswerSdp(SdpRequest),
    StreamChanged(StreamChangedRequest),
    UserLeft(UserRef),
    EndMeeting(UserRef),
    Event(CustomEvent),
}

impl ClientMessage {
    /// Wire name of this message
    pub fn kind(&self) -> &str {
        match self {
            ClientMessage::Join(_) => msg_type::JOIN,
            ClientMessage::ConnectionRequest(_) => msg_type::CONNECTION_REQUEST,
            ClientMessage::IceCandidate(_) => msg_type::ICE_CANDIDATE,
            ClientMessage::OfferSdp(_) => msg_type::OFFER_SDP,
            ClientMessage::AnswerSdp(_) => msg_type::ANSWER_SDP,
            ClientMessage::StreamChanged(_) => msg_type::STREAM_CHANGED,
            ClientMessage::UserLeft(_) => msg_type::USER_LEFT,
            ClientMessage::EndMeeting(_) => msg_type::END_MEETING,
            ClientMessage::Event(event) => &event.kind,
        }
    }

    /// The user the sender claims to act as
    pub fn user_id(&self) -> &str {
        match self {
            ClientMessage::Join(m) => &m.user_id,
            ClientMessage::ConnectionRequest(m) => &m.user_id,
            ClientMessage::IceCandidate(m) => &m.user_id,
            ClientMessage::OfferSdp(m) | ClientMessage::AnswerSdp(m) => &m.user_id,
            ClientMessage::StreamChanged(m) => &m.user_id,
            ClientMessage::UserLeft(m) | ClientMessage::EndMeeting(m) => &m.user_id,
            ClientMessage::Event(m) => &m.user_id,
        }
    }
}

fn payload<T: for<'de> Deserialize<'de>>(kind: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|source| ProtocolError::InvalidPayload {
        kind: kind.to_string(),
        source,
    })
}

impl TryFrom<Envelope> for ClientMessage {
    type Error = ProtocolError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let Envelope { kind, data } = envelope;
        let msg = match kind.as_str() {
            msg_type::JOIN => ClientMessage::Join(payload(&kind, data)?),
            msg_type::CONNECTION_REQUEST => ClientMessage::ConnectionRequest(payload(&kind, data)?),
            msg_type::ICE_CANDIDATE => ClientMessage::IceCandidate(payload(&kind, data)?),
            msg_type::OFFER_SDP => ClientMessage::OfferSdp(payload(&kind, data)?),
            msg_type::ANSWER_SDP => ClientMessage::AnswerSdp(payload(&kind, data)?),
            msg_type::STREAM_CHANGED => ClientMessage::StreamChanged(payload(&kind, data)?),
            msg_type::USER_LEFT => ClientMessage::UserLeft(payload(&kind, data)?),
            msg_type::END_MEETING => ClientMessage::EndMeeting(payload(&kind, data)?),
            other if msg_type::RESERVED.contains(&other) => {
                return Err(ProtocolError::ReservedType(kind));
            },
            _ => {
                let Value::Object(mut fields) = data else {
                    return Err(ProtocolError::MissingUserId(kind));
                };
                let user_id = match fields.remove("userId") {
                    Some(Value::String(user_id)) => user_id,
                    _ => return Err(ProtocolError::MissingUserId(kind)),
                };
                ClientMessage::Event(CustomEvent {
                    kind,
                    user_id,
                    data: fields,
                })
            },
        };
        Ok(msg)
    }
}

/// Messages sent from the relay to a peer
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(into = "Envelope")]
pub enum ServerMessage {
    /// The requested meeting does not exist
    NotFound,
    /// Acknowledges a join to the joining connection
    JoinedMeeting { user_id: UserId },
    UserJoined { user_id: UserId, name: String },
    ConnectionRequest { user_id: UserId, name: String },
    IceCandidate { user_id: UserId, candidate: Value },
    OfferSdp { user_id: UserId, sdp: Value },
    AnswerSdp { user_id: UserId, sdp: Value },
    StreamChanged { user_id: UserId, stream: Value },
    UserLeft { user_id: UserId },
    MeetingEnded { user_id: UserId },
    /// Relay of a [`CustomEvent`] with `userId` folded back into `data`
    Event {
        kind: String,
        user_id: UserId,
        data: Map<String, Value>,
    },
    /// Reported only to the connection whose frame failed
    Error { code: String, message: String },
}

impl From<ServerMessage> for Envelope {
    fn from(msg: ServerMessage) -> Self {
        use serde_json::json;

        match msg {
            ServerMessage::NotFound => Envelope::new(msg_type::NOT_FOUND, Value::Null),
            ServerMessage::JoinedMeeting { user_id } => {
                Envelope::new(msg_type::JOINED_MEETING, json!({ "userId": user_id }))
            },
            ServerMessage::UserJoined { user_id, name } => Envelope::new(
                msg_type::USER_JOINED,
                json!({ "userId": user_id, "name": name }),
            ),
            ServerMessage::ConnectionRequest { user_id, name } => Envelope::new(
                msg_type::CONNECTION_REQUEST,
                json!({ "userId": user_id, "name": name }),
            ),
            ServerMessage::IceCandidate { user_id, candidate } => Envelope::new(
                msg_type::ICE_CANDIDATE,
                json!({ "userId": user_id, "candidate": candidate }),
            ),
            ServerMessage::OfferSdp { user_id, sdp } => {
                Envelope::new(msg_type::OFFER_SDP, json!({ "userId": user_id, "sdp": sdp }))
            },
            ServerMessage::AnswerSdp { user_id, sdp } => {
                Envelope::new(msg_type::ANSWER_SDP, json!({ "userId": user_id, "sdp": sdp }))
            },
            ServerMessage::StreamChanged { user_id, stream } => Envelope::new(
                msg_type::STREAM_CHANGED,
                json!({ "userId": user_id, "stream": stream }),
            ),
            ServerMessage::UserLeft { user_id } => {
                Envelope::new(msg_type::USER_LEFT, json!({ "userId": user_id }))
            },
            ServerMessage::MeetingEnded { user_id } => {
                Envelope::new(msg_type::MEETING_ENDED, json!({ "userId": user_id }))
            },
            ServerMessage::Event {
                kind,
                user_id,
                mut data,
            } => {
                data.insert("userId".to_string(), Value::String(user_id));
                Envelope::new(kind, Value::Object(data))
            },
            ServerMessage::Error { code, message } => Envelope::new(
                msg_type::ERROR,
                json!({ "code": code, "message": message }),
            ),
        }
    }
}

/// Meeting entity as exposed by the meeting API
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MeetingInfo {
    pub meeting_id: MeetingId,
    pub host_id: UserId,
    pub host_name: String,
    pub created_at: String,
}
