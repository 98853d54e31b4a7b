//! Typed chat operations on top of a generic [`HubConnection`].
//!
//! The connection knows nothing about chat: it routes targets to handlers and
//! sends JSON arguments.  `ChatHub` fixes the target names (from
//! [`ChatEvent`] and [`ChatMethod`]) and the payload types, so callers work
//! with [`ChatMessage`], [`ChatGroup`], and [`ChatUser`] directly.

use std::sync::Arc;

use hub_core::{
    ChatEvent, ChatGroup, ChatMessage, ChatMethod, ChatPayload, ChatUser, ProtocolError,
};
use serde::Serialize;
use serde_json::Value;

use crate::application::error::HubError;
use crate::application::hub_connection::HubConnection;

/// Chat-specific facade over a shared hub connection.
#[derive(Debug, Clone)]
pub struct ChatHub {
    connection: Arc<HubConnection>,
}

impl ChatHub {
    pub fn new(connection: Arc<HubConnection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<HubConnection> {
        &self.connection
    }

    // ── Events ────────────────────────────────────────────────────────────────

    /// Registers `handler` for one event, decoding with that event's payload
    /// shape.
    pub fn on_event<F>(&self, event: ChatEvent, handler: F)
    where
        F: Fn(ChatEvent, ChatPayload) + Send + Sync + 'static,
    {
        let kind = event.payload_kind();
        self.connection.on_raw(event.target(), move |arguments: &[Value]| {
            let argument = arguments.first().unwrap_or(&Value::Null);
            let payload = ChatPayload::decode(kind, argument).map_err(|e| e.to_string())?;
            handler(event, payload);
            Ok(())
        });
    }

    /// Registers one handler for every chat event.
    pub fn on_any_event<F>(&self, handler: F)
    where
        F: Fn(ChatEvent, ChatPayload) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        for event in ChatEvent::ALL {
            let handler = Arc::clone(&handler);
            self.on_event(event, move |event, payload| handler(event, payload));
        }
    }

    /// Registers `handler` for every message-carrying event
    /// (`ReceiveMessage` and the `ReceiveMessageFrom*` family).
    pub fn on_receive_message<F>(&self, handler: F)
    where
        F: Fn(ChatMessage) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        for event in [
            ChatEvent::ReceiveMessage,
            ChatEvent::ReceiveMessageFromSelf,
            ChatEvent::ReceiveMessageFromUser,
            ChatEvent::ReceiveMessageFromGroup,
        ] {
            let handler = Arc::clone(&handler);
            self.connection
                .on(event.target(), move |message: ChatMessage| handler(message));
        }
    }

    pub fn on_user_joined_group<F>(&self, handler: F)
    where
        F: Fn(ChatGroup) + Send + Sync + 'static,
    {
        self.connection
            .on(ChatEvent::UserJoinedGroup.target(), handler);
    }

    pub fn on_user_left_group<F>(&self, handler: F)
    where
        F: Fn(ChatGroup) + Send + Sync + 'static,
    {
        self.connection.on(ChatEvent::UserLeftGroup.target(), handler);
    }

    pub fn on_user_connected<F>(&self, handler: F)
    where
        F: Fn(ChatUser) + Send + Sync + 'static,
    {
        self.connection.on(ChatEvent::UserConnected.target(), handler);
    }

    pub fn on_user_disconnected<F>(&self, handler: F)
    where
        F: Fn(ChatUser) + Send + Sync + 'static,
    {
        self.connection
            .on(ChatEvent::UserDisconnected.target(), handler);
    }

    // ── Methods ───────────────────────────────────────────────────────────────

    pub async fn send_message_to_caller(&self, message: &ChatMessage) -> Result<(), HubError> {
        self.call(ChatMethod::SendMessageToCaller, message).await
    }

    pub async fn send_message_to_user(&self, message: &ChatMessage) -> Result<(), HubError> {
        self.call(ChatMethod::SendMessageToUser, message).await
    }

    pub async fn send_message_to_group(&self, message: &ChatMessage) -> Result<(), HubError> {
        self.call(ChatMethod::SendMessageToGroup, message).await
    }

    pub async fn join_group(&self, group: &ChatGroup) -> Result<(), HubError> {
        self.call(ChatMethod::JoinGroup, group).await
    }

    pub async fn leave_group(&self, group: &ChatGroup) -> Result<(), HubError> {
        self.call(ChatMethod::LeaveGroup, group).await
    }

    /// Invokes `method` with `payload` as its single argument.  The
    /// completion's result, if any, is discarded.
    async fn call<P: Serialize>(&self, method: ChatMethod, payload: &P) -> Result<(), HubError> {
        let argument = serde_json::to_value(payload)
            .map_err(|e| HubError::Encode(ProtocolError::Encoding(e.to_string())))?;
        self.connection
            .invoke(method.target(), vec![argument])
            .await
            .map(|_| ())
    }
}
