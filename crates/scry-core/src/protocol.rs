use serde::{Deserialize, Serialize};

use crate::ids::EndpointId;

/// The fixed message vocabulary spoken between contexts.
///
/// Every message is a one-way notification; request/response flows are
/// correlated by type pairing (`replay.request` → `replay.response`), not by
/// a correlation id, so at most one outstanding request per logical channel
/// is assumed.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "inspector.init")]
    InspectorInit,
    #[serde(rename = "panel.create")]
    PanelCreate,
    #[serde(rename = "store.action")]
    ActionFired,
    #[serde(rename = "state.request")]
    StateRequest,
    #[serde(rename = "state.update")]
    StateUpdate,
    #[serde(rename = "broadcast.new")]
    BroadcastNew,
    #[serde(rename = "broadcast.ack")]
    BroadcastAck,
    #[serde(rename = "replay.request")]
    ReplayRequest,
    #[serde(rename = "replay.response")]
    ReplayResponse,
}

impl MessageType {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::InspectorInit => "inspector.init",
            Self::PanelCreate => "panel.create",
            Self::ActionFired => "store.action",
            Self::StateRequest => "state.request",
            Self::StateUpdate => "state.update",
            Self::BroadcastNew => "broadcast.new",
            Self::BroadcastAck => "broadcast.ack",
            Self::ReplayRequest => "replay.request",
            Self::ReplayResponse => "replay.response",
        }
    }

    pub fn from_wire(tag: &str) -> Option<Self> {
        match tag {
            "inspector.init" => Some(Self::InspectorInit),
            "panel.create" => Some(Self::PanelCreate),
            "store.action" => Some(Self::ActionFired),
            "state.request" => Some(Self::StateRequest),
            "state.update" => Some(Self::StateUpdate),
            "broadcast.new" => Some(Self::BroadcastNew),
            "broadcast.ack" => Some(Self::BroadcastAck),
            "replay.request" => Some(Self::ReplayRequest),
            "replay.response" => Some(Self::ReplayResponse),
            _ => None,
        }
    }

    /// The message type that answers this one, for the paired flows.
    pub fn response_type(&self) -> Option<MessageType> {
        match self {
            Self::InspectorInit => Some(Self::PanelCreate),
            Self::StateRequest => Some(Self::StateUpdate),
            Self::BroadcastNew => Some(Self::BroadcastAck),
            Self::ReplayRequest => Some(Self::ReplayResponse),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// A routed message unit: destination, type tag, optional payload.
///
/// Envelopes are transient: constructed per send and discarded after
/// routing. The payload, when present, is pre-serialized JSON.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub to: EndpointId,
    pub message: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl Envelope {
    pub fn new(to: EndpointId, message: MessageType) -> Self {
        Self {
            to,
            message,
            payload: None,
        }
    }

    pub fn with_payload(to: EndpointId, message: MessageType, payload: impl Into<String>) -> Self {
        Self {
            to,
            message,
            payload: Some(payload.into()),
        }
    }

    pub fn to_wire(&self) -> Result<String, crate::errors::RelayError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Lenient decode for frames arriving from an untrusted channel.
    /// Anything that does not carry a destination and a known message tag
    /// is `None`, never an error.
    pub fn from_wire(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

/// The view of an inbound message handed to subscribed handlers.
///
/// Unlike `Envelope`, no destination is required here: dispatch within a
/// context only needs the type tag and the payload.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub message: MessageType,
    pub payload: Option<String>,
}

impl InboundMessage {
    /// Extract an inbound view from raw data. Missing or unknown `message`
    /// tags yield `None`; the caller is expected to drop such data quietly.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let tag = value.get("message")?.as_str()?;
        let message = MessageType::from_wire(tag)?;
        let payload = value
            .get("payload")
            .and_then(|p| p.as_str())
            .map(str::to_owned);
        Some(Self { message, payload })
    }

    /// Decode the pre-serialized JSON payload, if any.
    pub fn payload_json<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        self.payload
            .as_deref()
            .and_then(|p| serde_json::from_str(p).ok())
    }
}

impl From<&Envelope> for InboundMessage {
    fn from(envelope: &Envelope) -> Self {
        Self {
            message: envelope.message,
            payload: envelope.payload.clone(),
        }
    }
}
