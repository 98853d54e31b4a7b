//! Error taxonomy for hub connections.

use hub_core::ProtocolError;
use thiserror::Error;

use crate::application::hub_connection::ConnectionState;
use crate::application::transport::TransportError;

/// Every way an operation on a hub connection can fail.
///
/// `Clone` so one failure can resolve many pending invocations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HubError {
    /// Opening, reading, or writing the transport failed.  Fatal to the
    /// connection.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A frame segment could not be decoded.  The segment is dropped and the
    /// connection keeps running.
    #[error("protocol error: {0}")]
    Decode(#[from] ProtocolError),

    /// An outgoing frame or argument could not be serialized.  Nothing was
    /// sent.
    #[error("failed to encode message: {0}")]
    Encode(ProtocolError),

    /// An invocation was attempted outside the `Connected` state.  Nothing
    /// was sent.
    #[error("not connected (state: {state})")]
    NotConnected { state: ConnectionState },

    /// The server answered the invocation with an error string.
    #[error("hub method failed: {0}")]
    Remote(String),

    /// The connection was stopped while the invocation was pending.
    #[error("invocation cancelled: connection stopped")]
    Cancelled,

    /// The invocation frame could not be written.  The server never saw it.
    #[error("failed to send invocation: {0}")]
    Send(TransportError),

    /// The server sent a `Close` frame.
    #[error("server closed the connection: {}", .error.as_deref().unwrap_or("no reason given"))]
    ServerClosed { error: Option<String> },

    /// The server rejected the handshake.
    #[error("handshake rejected: {0}")]
    Handshake(String),

    #[error("invalid hub url: {0}")]
    InvalidUrl(String),
}
