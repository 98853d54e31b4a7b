//! JSON codec for hub protocol frames.
//!
//! Wire format (one frame):
//! ```text
//! {"type":1,"target":"JoinGroup","invocationId":"0","arguments":[{...}]}<0x1E>
//! ```
//! A single transport delivery may carry several frames back to back.  Each
//! segment between separators is decoded on its own, so one malformed segment
//! never hides the frames around it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::protocol::messages::{
    CancelInvocationMessage, CloseMessage, CompletionMessage, Envelope, HandshakeRequest,
    HandshakeResponse, InvocationMessage, MessageType, StreamItemMessage, RECORD_SEPARATOR,
};

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The segment is not valid JSON, or a field has the wrong JSON type.
    #[error("invalid JSON frame: {0}")]
    Json(String),

    /// The `type` field holds a value outside 1..=7.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u64),

    /// A field the message type requires is absent.
    #[error("{message_type:?} message is missing required field `{field}`")]
    MissingField {
        message_type: MessageType,
        field: &'static str,
    },

    /// Invocation arguments do not match the payload a handler expects.
    #[error("arguments for `{target}` do not match the handler: {reason}")]
    InvalidArguments { target: String, reason: String },

    /// A partial frame outgrew the buffer limit without a separator.
    #[error("frame exceeds {limit} bytes without a record separator")]
    FrameTooLarge { limit: usize },

    /// The envelope could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encoding(String),
}

// ── Wire representation ───────────────────────────────────────────────────────

/// Flat JSON shape shared by every message type.  Only the fields relevant to
/// a given `type` are populated.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    message_type: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    item: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl WireEnvelope {
    fn typed(message_type: MessageType) -> Self {
        Self {
            message_type: Some(message_type as u64),
            ..Self::default()
        }
    }
}

impl From<&Envelope> for WireEnvelope {
    fn from(envelope: &Envelope) -> Self {
        match envelope {
            Envelope::HandshakeAck(ack) => WireEnvelope {
                error: ack.error.clone(),
                ..WireEnvelope::default()
            },
            Envelope::Invocation(msg) => invocation_to_wire(MessageType::Invocation, msg),
            Envelope::StreamInvocation(msg) => {
                invocation_to_wire(MessageType::StreamInvocation, msg)
            }
            Envelope::StreamItem(msg) => WireEnvelope {
                invocation_id: msg.invocation_id.clone(),
                item: msg.item.clone(),
                ..WireEnvelope::typed(MessageType::StreamItem)
            },
            Envelope::Completion(msg) => WireEnvelope {
                invocation_id: Some(msg.invocation_id.clone()),
                error: msg.error.clone(),
                result: msg.result.clone(),
                ..WireEnvelope::typed(MessageType::Completion)
            },
            Envelope::CancelInvocation(msg) => WireEnvelope {
                invocation_id: msg.invocation_id.clone(),
                ..WireEnvelope::typed(MessageType::CancelInvocation)
            },
            Envelope::Ping => WireEnvelope::typed(MessageType::Ping),
            Envelope::Close(msg) => WireEnvelope {
                error: msg.error.clone(),
                ..WireEnvelope::typed(MessageType::Close)
            },
        }
    }
}

fn invocation_to_wire(message_type: MessageType, msg: &InvocationMessage) -> WireEnvelope {
    // `arguments` is always written, even when empty; servers reject
    // invocations without it.
    WireEnvelope {
        target: Some(msg.target.clone()),
        invocation_id: msg.invocation_id.clone(),
        arguments: Some(msg.arguments.clone()),
        ..WireEnvelope::typed(message_type)
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes an [`Envelope`] as one frame: JSON followed by the record separator.
///
/// # Errors
///
/// Returns [`ProtocolError::Encoding`] if serialization fails.
///
/// # Examples
///
/// ```rust
/// use hub_core::protocol::{decode_frame, encode};
/// use hub_core::protocol::messages::Envelope;
///
/// let frame = encode(&Envelope::Ping).unwrap();
/// assert_eq!(frame, "{\"type\":6}\u{1e}");
/// let decoded = decode_frame(&frame);
/// assert_eq!(decoded, vec![Ok(Envelope::Ping)]);
/// ```
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    let wire = WireEnvelope::from(envelope);
    let mut frame =
        serde_json::to_string(&wire).map_err(|e| ProtocolError::Encoding(e.to_string()))?;
    frame.push(RECORD_SEPARATOR);
    Ok(frame)
}

/// Encodes the handshake request frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Encoding`] if serialization fails.
pub fn encode_handshake(request: &HandshakeRequest) -> Result<String, ProtocolError> {
    let mut frame =
        serde_json::to_string(request).map_err(|e| ProtocolError::Encoding(e.to_string()))?;
    frame.push(RECORD_SEPARATOR);
    Ok(frame)
}

/// Splits a delivery into its non-empty segments, without the separators.
pub fn split_frames(text: &str) -> impl Iterator<Item = &str> {
    text.split(RECORD_SEPARATOR)
        .filter(|segment| !segment.trim().is_empty())
}

/// Decodes every segment of a transport delivery.
///
/// The result has one entry per non-empty segment, in wire order.  Failed
/// segments appear as `Err` entries; callers drop them and keep going.
///
/// The delivery is assumed to hold only complete frames.  Use
/// [`crate::protocol::FrameBuffer`] when frames may be split across
/// deliveries.
pub fn decode_frame(text: &str) -> Vec<Result<Envelope, ProtocolError>> {
    split_frames(text).map(decode_segment).collect()
}

/// Decodes a single segment (no separator) into an [`Envelope`].
///
/// # Errors
///
/// - [`ProtocolError::Json`] when the segment is not a JSON object of the
///   expected shape.
/// - [`ProtocolError::UnknownMessageType`] for a `type` outside 1..=7.
/// - [`ProtocolError::MissingField`] when `target` or `invocationId` is
///   absent on a message type that requires it.
pub fn decode_segment(segment: &str) -> Result<Envelope, ProtocolError> {
    let value: Value =
        serde_json::from_str(segment).map_err(|e| ProtocolError::Json(e.to_string()))?;
    // The derived deserializer would also accept a JSON array positionally,
    // so `[]` would read as a handshake ack.  Only objects are frames.
    if !value.is_object() {
        return Err(ProtocolError::Json(format!(
            "expected a JSON object, found {}",
            json_kind(&value)
        )));
    }
    let wire: WireEnvelope =
        serde_json::from_value(value).map_err(|e| ProtocolError::Json(e.to_string()))?;

    let Some(code) = wire.message_type else {
        return Ok(Envelope::HandshakeAck(HandshakeResponse { error: wire.error }));
    };
    let message_type =
        MessageType::try_from(code).map_err(|()| ProtocolError::UnknownMessageType(code))?;

    let envelope = match message_type {
        MessageType::Invocation => Envelope::Invocation(wire_to_invocation(message_type, wire)?),
        MessageType::StreamInvocation => {
            Envelope::StreamInvocation(wire_to_invocation(message_type, wire)?)
        }
        MessageType::StreamItem => Envelope::StreamItem(StreamItemMessage {
            invocation_id: wire.invocation_id,
            item: wire.item,
        }),
        MessageType::Completion => Envelope::Completion(CompletionMessage {
            invocation_id: wire.invocation_id.ok_or(ProtocolError::MissingField {
                message_type,
                field: "invocationId",
            })?,
            error: wire.error,
            result: wire.result,
        }),
        MessageType::CancelInvocation => Envelope::CancelInvocation(CancelInvocationMessage {
            invocation_id: wire.invocation_id,
        }),
        MessageType::Ping => Envelope::Ping,
        MessageType::Close => Envelope::Close(CloseMessage { error: wire.error }),
    };
    Ok(envelope)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn wire_to_invocation(
    message_type: MessageType,
    wire: WireEnvelope,
) -> Result<InvocationMessage, ProtocolError> {
    let target = wire.target.ok_or(ProtocolError::MissingField {
        message_type,
        field: "target",
    })?;
    Ok(InvocationMessage {
        target,
        invocation_id: wire.invocation_id,
        arguments: wire.arguments.unwrap_or_default(),
    })
}
