//! Hub protocol envelope types.
//!
//! Every frame on the wire is one JSON object terminated by the ASCII record
//! separator (0x1E).  All frames except the handshake acknowledgement carry a
//! numeric `type` discriminant; the acknowledgement is recognised precisely by
//! the *absence* of that field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Terminates every frame, in both directions.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Protocol name sent in the handshake request.
pub const PROTOCOL_NAME: &str = "json";

/// Protocol version sent in the handshake request.
pub const PROTOCOL_VERSION: u32 = 1;

// ── Message type codes ────────────────────────────────────────────────────────

/// Numeric `type` discriminants defined by the hub protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Invocation = 1,
    StreamItem = 2,
    Completion = 3,
    StreamInvocation = 4,
    CancelInvocation = 5,
    Ping = 6,
    Close = 7,
}

impl TryFrom<u64> for MessageType {
    type Error = ();

    fn try_from(value: u64) -> Result<Self, ()> {
        match value {
            1 => Ok(MessageType::Invocation),
            2 => Ok(MessageType::StreamItem),
            3 => Ok(MessageType::Completion),
            4 => Ok(MessageType::StreamInvocation),
            5 => Ok(MessageType::CancelInvocation),
            6 => Ok(MessageType::Ping),
            7 => Ok(MessageType::Close),
            _ => Err(()),
        }
    }
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// First frame the client sends after the transport opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

impl Default for HandshakeRequest {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION,
        }
    }
}

/// Server reply to the handshake request.
///
/// An empty object (`{}`) means the server accepted the protocol.  A populated
/// `error` means it refused and is about to close the connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ── Per-message payload structs ───────────────────────────────────────────────

/// A named method call, in either direction.
///
/// `invocation_id` is present only when the caller expects a
/// [`CompletionMessage`] in reply.  Event notifications pushed by the server
/// never carry one.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationMessage {
    pub target: String,
    pub invocation_id: Option<String>,
    pub arguments: Vec<Value>,
}

impl InvocationMessage {
    /// Builds an invocation that expects a completion carrying `invocation_id`.
    pub fn new(
        target: impl Into<String>,
        invocation_id: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Self {
        Self {
            target: target.into(),
            invocation_id: Some(invocation_id.into()),
            arguments,
        }
    }

    /// Builds a fire-and-forget invocation; the server sends no completion.
    pub fn non_blocking(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            target: target.into(),
            invocation_id: None,
            arguments,
        }
    }
}

/// One item of a streaming result.  Streams are not consumed by this client,
/// but the frame is still decoded so it can be logged and skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamItemMessage {
    pub invocation_id: Option<String>,
    pub item: Option<Value>,
}

/// Reply to an invocation that carried an `invocation_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionMessage {
    pub invocation_id: String,
    /// Set when the hub method failed on the server.
    pub error: Option<String>,
    pub result: Option<Value>,
}

impl CompletionMessage {
    pub fn success(invocation_id: impl Into<String>, result: Option<Value>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            error: None,
            result,
        }
    }

    pub fn failure(invocation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            error: Some(error.into()),
            result: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CancelInvocationMessage {
    pub invocation_id: Option<String>,
}

/// Sent by the server right before it drops the connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloseMessage {
    pub error: Option<String>,
}

// ── Top-level envelope ────────────────────────────────────────────────────────

/// A fully decoded protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Frame with no `type` field: the server's handshake reply.
    HandshakeAck(HandshakeResponse),
    Invocation(InvocationMessage),
    StreamItem(StreamItemMessage),
    Completion(CompletionMessage),
    StreamInvocation(InvocationMessage),
    CancelInvocation(CancelInvocationMessage),
    /// Keepalive.  Has no payload; the reply is another `Ping`.
    Ping,
    Close(CloseMessage),
}

impl Envelope {
    /// Returns the wire discriminant, or `None` for the handshake ack.
    pub fn message_type(&self) -> Option<MessageType> {
        match self {
            Envelope::HandshakeAck(_) => None,
            Envelope::Invocation(_) => Some(MessageType::Invocation),
            Envelope::StreamItem(_) => Some(MessageType::StreamItem),
            Envelope::Completion(_) => Some(MessageType::Completion),
            Envelope::StreamInvocation(_) => Some(MessageType::StreamInvocation),
            Envelope::CancelInvocation(_) => Some(MessageType::CancelInvocation),
            Envelope::Ping => Some(MessageType::Ping),
            Envelope::Close(_) => Some(MessageType::Close),
        }
    }
}
