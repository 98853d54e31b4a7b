//! Port for the full-duplex message channel underneath a hub connection.
//!
//! The hub connection never touches sockets.  It asks a [`Transport`] to open
//! a channel and gets back two halves:
//!
//! - a [`TransportSink`] for outbound text frames, and
//! - an `mpsc` receiver of [`TransportEvent`]s, drained by exactly one task.
//!
//! Implementations live in `infrastructure::transport`.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

/// Failures reported by a transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The channel could not be opened.
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    /// An outbound frame could not be written.
    #[error("send failed: {0}")]
    Send(String),

    /// Reading from the channel failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// The channel is closed (either side).
    #[error("transport closed (code {code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },
}

/// Inbound notifications, delivered strictly in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text delivery.  May hold several frames, or part of one.
    Message(String),
    Error(TransportError),
    Closed { code: Option<u16>, reason: String },
}

/// Outbound half of an open transport.
#[async_trait]
pub trait TransportSink: Send {
    /// Writes one text message.  Returns once the transport accepted it.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Starts a graceful close.  Calling it twice is not an error.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Both halves of an open transport.
pub struct TransportChannels {
    pub sink: Box<dyn TransportSink>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Factory for transport channels.
///
/// # Contract
///
/// - `open` resolves only after the channel is usable for sending.
/// - After open, every inbound delivery is pushed to `events` as
///   [`TransportEvent::Message`].  A terminal `Error` or `Closed` event is the
///   last one sent; dropping the sender also signals closure.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &Url) -> Result<TransportChannels, TransportError>;
}
