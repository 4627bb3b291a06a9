use crate::client::{GroupId, SubjectId};
use crate::error::{CodecErrorKind, Error, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt;

/// Version stamped on every frame this hub writes.
pub const WIRE_VERSION: u8 = 1;

fn wire_version() -> u8 {
    WIRE_VERSION
}

/// The wire `type` tag of a frame.
///
/// Unrecognized values are kept in `Unknown` so routing stays exhaustive while
/// newer peers can still talk to an older hub.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    Ping,
    Pong,
    Invalidate,
    Subscribe,
    Ack,
    Unknown(String),
}

impl MessageType {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "ping" => MessageType::Ping,
            "pong" => MessageType::Pong,
            "invalidate" => MessageType::Invalidate,
            "subscribe" => MessageType::Subscribe,
            "ack" => MessageType::Ack,
            other => MessageType::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::Invalidate => "invalidate",
            MessageType::Subscribe => "subscribe",
            MessageType::Ack => "ack",
            MessageType::Unknown(other) => other,
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            MessageType::Ping => Kind::HeartbeatPing,
            MessageType::Pong => Kind::HeartbeatPong,
            _ => Kind::Application,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    HeartbeatPing,
    HeartbeatPong,
    Application,
}

/// An immutable, typed unit placed on a mailbox and sent over the wire.
///
/// Cloning is cheap: the payload buffer is shared, never copied or mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    message_type: MessageType,
    payload: Bytes,
}

#[derive(Serialize)]
struct OutboundFrame<'a> {
    v: u8,
    #[serde(rename = "type")]
    message_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a RawValue>,
}

#[derive(Deserialize)]
struct InboundFrame<'a> {
    #[serde(default = "wire_version")]
    v: u8,
    #[serde(rename = "type")]
    message_type: String,
    #[serde(borrow, default)]
    payload: Option<&'a RawValue>,
}

impl Envelope {
    pub fn ping() -> Self {
        Self {
            message_type: MessageType::Ping,
            payload: Bytes::new(),
        }
    }

    pub fn pong() -> Self {
        Self {
            message_type: MessageType::Pong,
            payload: Bytes::new(),
        }
    }

    /// Builds an application envelope. A non-empty payload must be a JSON document
    /// other than `null`; pass an empty payload to send none.
    ///
    /// `message_type` is normalized through its wire name, so `Unknown("ack")`
    /// becomes `Ack` and `Unknown("pong")` is rejected like `Pong`.
    pub fn application(message_type: MessageType, payload: impl Into<Bytes>) -> Result<Self> {
        let message_type = MessageType::from_wire(message_type.as_str());
        if message_type.kind() != Kind::Application {
            return Err(Error::codec(CodecErrorKind::UnexpectedPayload));
        }
        let payload = payload.into();
        let payload = if payload.is_empty() {
            payload
        } else {
            let raw: &RawValue = serde_json::from_slice(&payload)?;
            let raw = raw.get().trim();
            // `"payload":null` reads back as an absent payload.
            if raw == "null" {
                return Err(Error::codec(CodecErrorKind::NullPayload));
            }
            Bytes::copy_from_slice(raw.as_bytes())
        };
        Ok(Self {
            message_type,
            payload,
        })
    }

    pub fn invalidation(instruction: &InvalidationInstruction) -> Result<Self> {
        let payload = serde_json::to_vec(instruction)?;
        Ok(Self {
            message_type: MessageType::Invalidate,
            payload: Bytes::from(payload),
        })
    }

    pub fn kind(&self) -> Kind {
        self.message_type.kind()
    }

    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Deserializes the payload into a concrete application type.
    pub fn payload_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Encodes the envelope as a text frame: `{"v":1,"type":"...","payload":...}`.
    pub fn encode(&self) -> Result<String> {
        let payload: Option<&RawValue> = if self.payload.is_empty() {
            None
        } else {
            Some(serde_json::from_slice(&self.payload)?)
        };
        let frame = OutboundFrame {
            v: WIRE_VERSION,
            message_type: self.message_type.as_str(),
            payload,
        };
        Ok(serde_json::to_string(&frame)?)
    }

    /// Decodes a text frame, rejecting anything larger than `max_frame_size` bytes.
    ///
    /// Payloads attached to heartbeat frames are ignored.
    pub fn decode(frame: &str, max_frame_size: usize) -> Result<Self> {
        if frame.len() > max_frame_size {
            return Err(Error::codec(CodecErrorKind::FrameTooLarge {
                size: frame.len(),
                limit: max_frame_size,
            }));
        }

        let inbound: InboundFrame = serde_json::from_str(frame)?;
        if inbound.v != WIRE_VERSION {
            return Err(Error::codec(CodecErrorKind::UnsupportedVersion(inbound.v)));
        }

        let message_type = MessageType::from_wire(&inbound.message_type);
        let payload = match (message_type.kind(), inbound.payload) {
            (Kind::Application, Some(raw)) => Bytes::copy_from_slice(raw.get().trim().as_bytes()),
            _ => Bytes::new(),
        };

        Ok(Self {
            message_type,
            payload,
        })
    }
}

/// Payload of an `invalidate` envelope telling a consumer which cache partitions are stale.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationInstruction {
    /// Cache partitions to invalidate, in order. May contain duplicates.
    #[serde(rename = "queryKeys", default)]
    pub target_keys: Vec<String>,
    /// Semantic event class, used when `target_keys` is empty.
    #[serde(rename = "event", default, skip_serializing_if = "Option::is_none")]
    pub event_tag: Option<String>,
    /// Unix seconds. Informational only.
    #[serde(rename = "timestamp", default)]
    pub occurred_at: i64,
}

impl InvalidationInstruction {
    pub fn new(target_keys: Vec<String>, event_tag: Option<String>) -> Self {
        Self {
            target_keys,
            event_tag,
            occurred_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn for_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(keys.into_iter().map(Into::into).collect(), None)
    }

    pub fn for_event(event_tag: impl Into<String>) -> Self {
        Self::new(Vec::new(), Some(event_tag.into()))
    }
}

/// An envelope together with the audience it should reach.
#[derive(Debug, Clone)]
pub struct Message {
    pub envelope: Envelope,
    pub scope: MessageScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageScope {
    /// Send to all connections for a specific user
    User { subject_id: SubjectId },
    /// Send to all connections of every member of an organization
    Group { group_id: GroupId },
    /// Send to all connected users
    Broadcast,
}
