//! In-process transport for tests and demos.
//!
//! # Why an in-memory transport?
//!
//! The protocol logic in `HubConnection` does not care where text comes from.
//! Driving it over a real socket in unit tests needs a server, free ports,
//! and timing slack.  [`MemoryTransport`] hands the connection one end of a
//! pair of channels and gives the test the other end, a [`MemoryPeer`] that
//! plays the server:
//!
//! ```ignore
//! let (transport, mut peer) = MemoryTransport::pair();
//! let connection = HubConnection::new(url, Arc::new(transport), None);
//! connection.start().await?;
//!
//! peer.expect_handshake().await;
//! peer.acknowledge_handshake().await;
//! peer.push_envelope(&Envelope::Ping).await;
//! assert_eq!(peer.next_envelope().await, Some(Envelope::Ping));
//! ```
//!
//! # Failure injection
//!
//! - [`MemoryTransport::refusing`] makes `open` fail.
//! - [`MemoryPeer::fail_sends`] makes every outbound send fail.
//! - [`MemoryPeer::fail`] and [`MemoryPeer::close`] end the inbound stream.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use hub_core::protocol::{decode_frame, encode, Envelope};
use tokio::sync::{mpsc, Notify};
use url::Url;

use crate::application::transport::{
    Transport, TransportChannels, TransportError, TransportEvent, TransportSink,
};

const EVENT_QUEUE_CAPACITY: usize = 64;

/// Flags shared between the transport, its sink, and the peer.
#[derive(Default)]
struct Shared {
    opens: Arc<AtomicUsize>,
    fail_sends: AtomicBool,
    sink_closed: AtomicBool,
    sink_closed_notify: Notify,
}

/// The client side of an in-memory channel pair.
pub struct MemoryTransport {
    shared: Arc<Shared>,
    events: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    outbound: mpsc::UnboundedSender<String>,
    refuse: Option<String>,
}

/// The server side: feeds inbound deliveries and observes outbound frames.
pub struct MemoryPeer {
    shared: Arc<Shared>,
    events: mpsc::Sender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl MemoryTransport {
    /// Creates a connected transport/peer pair.
    pub fn pair() -> (MemoryTransport, MemoryPeer) {
        let shared = Arc::new(Shared::default());
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let transport = MemoryTransport {
            shared: Arc::clone(&shared),
            events: Mutex::new(Some(event_rx)),
            outbound: out_tx,
            refuse: None,
        };
        let peer = MemoryPeer {
            shared,
            events: event_tx,
            outbound: out_rx,
        };
        (transport, peer)
    }

    /// Makes every `open` fail with `reason`.
    pub fn refusing(mut self, reason: impl Into<String>) -> Self {
        self.refuse = Some(reason.into());
        self
    }

    /// Counter of `open` calls, readable after the transport is moved.
    pub fn open_count_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.shared.opens)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, url: &Url) -> Result<TransportChannels, TransportError> {
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.refuse {
            return Err(TransportError::Connect {
                url: url.to_string(),
                reason: reason.clone(),
            });
        }
        let events = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| TransportError::Connect {
                url: url.to_string(),
                reason: "memory transport already opened".to_string(),
            })?;
        Ok(TransportChannels {
            sink: Box::new(MemorySink {
                shared: Arc::clone(&self.shared),
                outbound: self.outbound.clone(),
            }),
            events,
        })
    }
}

struct MemorySink {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl TransportSink for MemorySink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("injected send failure".to_string()));
        }
        if self.shared.sink_closed.load(Ordering::SeqCst) {
            return Err(TransportError::Send("sink is closed".to_string()));
        }
        self.outbound
            .send(text)
            .map_err(|_| TransportError::Send("peer dropped".to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.shared.sink_closed.store(true, Ordering::SeqCst);
        self.shared.sink_closed_notify.notify_waiters();
        Ok(())
    }
}

impl MemoryPeer {
    /// Delivers one raw text message to the client.
    pub async fn push_text(&self, text: impl Into<String>) {
        // The client may already be gone; tests assert on its state instead.
        let _ = self.events.send(TransportEvent::Message(text.into())).await;
    }

    /// Delivers one encoded envelope.
    pub async fn push_envelope(&self, envelope: &Envelope) {
        if let Ok(frame) = encode(envelope) {
            self.push_text(frame).await;
        }
    }

    /// Sends the empty handshake acknowledgement (`{}`).
    pub async fn acknowledge_handshake(&self) {
        self.push_text("{}\u{1e}").await;
    }

    /// Ends the inbound stream with a transport error.
    pub async fn fail(&self, error: TransportError) {
        let _ = self.events.send(TransportEvent::Error(error)).await;
    }

    /// Ends the inbound stream with a close notification.
    pub async fn close(&self, code: Option<u16>, reason: impl Into<String>) {
        let _ = self
            .events
            .send(TransportEvent::Closed {
                code,
                reason: reason.into(),
            })
            .await;
    }

    /// Makes every subsequent client send fail (or succeed again).
    pub fn fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Waits for the next text the client sent.  `None` once the client side
    /// is dropped.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Returns the next sent text if one is already queued.
    pub fn try_next_sent(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }

    /// Waits for the next sent frame and decodes it.
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        let text = self.next_sent().await?;
        decode_frame(&text).into_iter().next()?.ok()
    }

    /// Waits for the handshake request and returns it verbatim.
    pub async fn expect_handshake(&mut self) -> String {
        self.next_sent().await.unwrap_or_default()
    }

    pub fn sink_closed(&self) -> bool {
        self.shared.sink_closed.load(Ordering::SeqCst)
    }

    /// Resolves once the client has closed its sink.
    pub async fn wait_sink_closed(&self) {
        loop {
            let notified = self.shared.sink_closed_notify.notified();
            if self.sink_closed() {
                return;
            }
            notified.await;
        }
    }

    /// Number of times the client opened the transport.
    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("ws://memory.test/hub").expect("valid url")
    }

    #[tokio::test]
    async fn test_open_hands_out_channels_once() {
        // Arrange
        let (transport, peer) = MemoryTransport::pair();

        // Act
        let first = transport.open(&url()).await;
        let second = transport.open(&url()).await;

        // Assert
        assert!(first.is_ok());
        assert!(matches!(second, Err(TransportError::Connect { .. })));
        assert_eq!(peer.open_count(), 2);
    }

    #[tokio::test]
    async fn test_refusing_transport_never_opens() {
        let (transport, _peer) = MemoryTransport::pair();
        let transport = transport.refusing("nope");
        let result = transport.open(&url()).await;
        assert!(matches!(
            result,
            Err(TransportError::Connect { reason, .. }) if reason == "nope"
        ));
    }

    #[tokio::test]
    async fn test_sent_text_reaches_peer() {
        let (transport, mut peer) = MemoryTransport::pair();
        let mut channels = transport.open(&url()).await.expect("open");

        channels.sink.send("{\"type\":6}\u{1e}".into()).await.expect("send");

        assert_eq!(peer.next_envelope().await, Some(Envelope::Ping));
    }

    #[tokio::test]
    async fn test_pushed_text_reaches_client() {
        let (transport, peer) = MemoryTransport::pair();
        let mut channels = transport.open(&url()).await.expect("open");

        peer.push_text("hello").await;

        assert_eq!(
            channels.events.recv().await,
            Some(TransportEvent::Message("hello".into()))
        );
    }

    #[tokio::test]
    async fn test_injected_send_failure() {
        let (transport, peer) = MemoryTransport::pair();
        let mut channels = transport.open(&url()).await.expect("open");
        peer.fail_sends(true);

        let result = channels.sink.send("x".into()).await;

        assert!(matches!(result, Err(TransportError::Send(_))));
    }

    #[tokio::test]
    async fn test_close_marks_sink_closed() {
        let (transport, peer) = MemoryTransport::pair();
        let mut channels = transport.open(&url()).await.expect("open");

        channels.sink.close().await.expect("close");

        assert!(peer.sink_closed());
        peer.wait_sink_closed().await;
        assert!(channels.sink.send("late".into()).await.is_err());
    }
}
