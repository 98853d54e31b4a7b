//! WebSocket transport built on `tokio-tungstenite`.
//!
//! `open` performs the HTTP upgrade, splits the socket, and spawns one reader
//! task that turns incoming WebSocket messages into [`TransportEvent`]s.
//! Text messages are forwarded as-is; the hub connection does its own framing
//! on top.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::application::transport::{
    Transport, TransportChannels, TransportError, TransportEvent, TransportSink,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound events buffered between the reader task and the driver task.
const EVENT_QUEUE_CAPACITY: usize = 128;

/// Opens hub connections over WebSocket (`ws://` or `wss://`).
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &Url) -> Result<TransportChannels, TransportError> {
        let connect_error = |reason: String| TransportError::Connect {
            url: url.to_string(),
            reason,
        };

        let (stream, response) = timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| connect_error(format!("timed out after {:?}", self.connect_timeout)))?
            .map_err(|e| connect_error(e.to_string()))?;
        info!(%url, status = %response.status(), "WebSocket connected");

        let (sink, stream) = stream.split();
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        tokio::spawn(read_loop(stream, tx));

        Ok(TransportChannels {
            sink: Box::new(WebSocketSink { sink }),
            events: rx,
        })
    }
}

struct WebSocketSink {
    sink: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl TransportSink for WebSocketSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.sink
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Send(e.to_string())),
        }
    }
}

/// Forwards socket traffic to `tx` until the socket closes or the receiver
/// is dropped.  The last event sent is always `Closed` or `Error`.
async fn read_loop(mut stream: SplitStream<WsStream>, tx: mpsc::Sender<TransportEvent>) {
    loop {
        let event = match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => TransportEvent::Message(text),
            Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => TransportEvent::Message(text),
                Err(e) => {
                    warn!("dropping non-UTF-8 binary message: {e}");
                    continue;
                }
            },
            Some(Ok(WsMessage::Close(frame))) => {
                let (code, reason) = match frame {
                    Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                    None => (None, String::new()),
                };
                debug!(?code, %reason, "WebSocket close frame received");
                let _ = tx.send(TransportEvent::Closed { code, reason }).await;
                return;
            }
            // Control frames are answered by tungstenite itself.
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => continue,
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                let _ = tx
                    .send(TransportEvent::Closed {
                        code: None,
                        reason: "connection closed".to_string(),
                    })
                    .await;
                return;
            }
            Some(Err(e)) => {
                warn!("WebSocket read error: {e}");
                let _ = tx
                    .send(TransportEvent::Error(TransportError::Receive(e.to_string())))
                    .await;
                return;
            }
        };

        if tx.send(event).await.is_err() {
            debug!("event receiver dropped; stopping WebSocket reader");
            return;
        }
    }
}
