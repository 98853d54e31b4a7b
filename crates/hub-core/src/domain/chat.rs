//! Chat payloads carried as invocation arguments, and the exact target names
//! of the chat hub.
//!
//! The server sends every payload as a JSON object of string fields.  Fields
//! may be missing or `null`; both decode to an empty string so handlers never
//! have to deal with `Option<String>`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

// ── Payloads ──────────────────────────────────────────────────────────────────

/// A chat message, sent to the caller, a single user, or a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub sender: String,
    /// Serialized as `reciever`, the spelling the chat hub expects.
    #[serde(
        rename = "reciever",
        alias = "receiver",
        default,
        deserialize_with = "null_as_empty"
    )]
    pub receiver: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub group: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub header: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub body: String,
}

impl ChatMessage {
    pub fn new(id: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            ..Self::default()
        }
    }

    pub fn to_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn to_user(mut self, receiver: impl Into<String>) -> Self {
        self.receiver = receiver.into();
        self
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatGroup {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub participant: String,
}

impl ChatGroup {
    pub fn new(name: impl Into<String>, participant: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            participant: participant.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
}

// ── Event table ───────────────────────────────────────────────────────────────

/// Which payload shape an event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Message,
    Group,
    User,
}

/// Server-to-client events pushed by the chat hub.
///
/// Target names are matched exactly; there is no prefix or substring logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatEvent {
    ReceiveMessage,
    ReceiveMessageFromSelf,
    ReceiveMessageFromUser,
    ReceiveMessageFromGroup,
    UserJoinedGroup,
    UserLeftGroup,
    UserConnected,
    UserDisconnected,
}

impl ChatEvent {
    pub const ALL: [ChatEvent; 8] = [
        ChatEvent::ReceiveMessage,
        ChatEvent::ReceiveMessageFromSelf,
        ChatEvent::ReceiveMessageFromUser,
        ChatEvent::ReceiveMessageFromGroup,
        ChatEvent::UserJoinedGroup,
        ChatEvent::UserLeftGroup,
        ChatEvent::UserConnected,
        ChatEvent::UserDisconnected,
    ];

    /// The invocation `target` the server uses for this event.
    pub fn target(self) -> &'static str {
        match self {
            ChatEvent::ReceiveMessage => "ReceiveMessage",
            ChatEvent::ReceiveMessageFromSelf => "ReceiveMessageFromSelf",
            ChatEvent::ReceiveMessageFromUser => "ReceiveMessageFromUser",
            ChatEvent::ReceiveMessageFromGroup => "ReceiveMessageFromGroup",
            ChatEvent::UserJoinedGroup => "UserJoinedGroup",
            ChatEvent::UserLeftGroup => "UserLeftGroup",
            ChatEvent::UserConnected => "UserConnected",
            ChatEvent::UserDisconnected => "UserDisconnected",
        }
    }

    pub fn payload_kind(self) -> PayloadKind {
        match self {
            ChatEvent::ReceiveMessage
            | ChatEvent::ReceiveMessageFromSelf
            | ChatEvent::ReceiveMessageFromUser
            | ChatEvent::ReceiveMessageFromGroup => PayloadKind::Message,
            ChatEvent::UserJoinedGroup | ChatEvent::UserLeftGroup => PayloadKind::Group,
            ChatEvent::UserConnected | ChatEvent::UserDisconnected => PayloadKind::User,
        }
    }

    /// Exact-match lookup of a target name.
    pub fn from_target(target: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.target() == target)
    }
}

/// A decoded chat payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatPayload {
    Message(ChatMessage),
    Group(ChatGroup),
    User(ChatUser),
}

impl ChatPayload {
    /// Decodes `argument` using the shape registered for `kind`.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the argument is not an object of
    /// string fields.
    pub fn decode(kind: PayloadKind, argument: &Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            PayloadKind::Message => ChatPayload::Message(ChatMessage::deserialize(argument)?),
            PayloadKind::Group => ChatPayload::Group(ChatGroup::deserialize(argument)?),
            PayloadKind::User => ChatPayload::User(ChatUser::deserialize(argument)?),
        })
    }
}

// ── Method table ──────────────────────────────────────────────────────────────

/// Client-to-server hub methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatMethod {
    SendMessageToCaller,
    SendMessageToUser,
    SendMessageToGroup,
    JoinGroup,
    LeaveGroup,
}

impl ChatMethod {
    pub fn target(self) -> &'static str {
        match self {
            ChatMethod::SendMessageToCaller => "SendMessageToCaller",
            ChatMethod::SendMessageToUser => "SendMessageToUser",
            ChatMethod::SendMessageToGroup => "SendMessageToGroup",
            ChatMethod::JoinGroup => "JoinGroup",
            ChatMethod::LeaveGroup => "LeaveGroup",
        }
    }
}
