//! The hub connection: lifecycle state machine, handshake, receive loop, and
//! routing of decoded frames.
//!
//! # How the pieces fit together (for beginners)
//!
//! ```text
//!   application ──invoke()──► InvocationRegistry ──frame──► TransportSink ──► server
//!                                    ▲
//!   server ──► TransportEvent queue ─┤ driver task (one per connection)
//!                                    ├─ Completion ─► registry.resolve()
//!                                    ├─ Invocation ─► EventDispatchTable
//!                                    └─ Ping ───────► Ping reply
//! ```
//!
//! A single *driver task* drains the transport's event queue.  Frames are
//! decoded and handled strictly one at a time, in arrival order, and every
//! completion callback and event handler runs on that task.  Outbound frames
//! from any task go through one async mutex around the sink, so two frames are
//! never interleaved.
//!
//! # State machine
//!
//! ```text
//! Created ─start()─► Connecting ─opened─► Handshaking ─ack─► Connected
//!    │                   │                     │                 │
//!    └───────────────────┴──── stop() / transport error / Close ─┴──► Closed
//! ```
//!
//! `Closed` is terminal.  When the connection closes, every pending
//! invocation is failed exactly once: with [`HubError::Cancelled`] after
//! [`HubConnection::stop`], otherwise with the error that closed it.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hub_core::protocol::{
    encode, encode_handshake, CompletionMessage, Envelope, FrameBuffer, HandshakeRequest,
    InvocationMessage, ProtocolError,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use url::Url;

use crate::application::error::HubError;
use crate::application::event_dispatch::{DispatchOutcome, EventDispatchTable};
use crate::application::invocation_registry::{
    CompletionCallback, InvocationOutcome, InvocationRegistry,
};
use crate::application::transport::{
    Transport, TransportChannels, TransportError, TransportEvent, TransportSink,
};

// ── State ─────────────────────────────────────────────────────────────────────

/// Lifecycle of a hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Created,
    Connecting,
    Handshaking,
    Connected,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Created => "created",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Notifications about the connection's lifecycle.
///
/// Every method has an empty default so implementors pick what they need.
/// Methods are called from the driver task and must not block.
#[cfg_attr(test, mockall::automock)]
pub trait ConnectionDelegate: Send + Sync {
    /// The server accepted the handshake.
    fn on_connected(&self) {}

    /// The connection reached `Closed`.  `error` is `None` after a local
    /// [`HubConnection::stop`].
    fn on_closed(&self, _error: Option<HubError>) {}

    /// A frame segment or event payload was dropped because it could not be
    /// decoded.  The connection keeps running.
    fn on_decode_error(&self, _error: &HubError) {}
}

struct Lifecycle {
    state: ConnectionState,
    /// Why the connection closed; `None` for a local stop.
    close_error: Option<HubError>,
}

// ── Shared core ───────────────────────────────────────────────────────────────

struct Inner {
    url: Url,
    transport: Arc<dyn Transport>,
    delegate: Option<Arc<dyn ConnectionDelegate>>,
    lifecycle: Mutex<Lifecycle>,
    /// Mirrors `lifecycle.state` for async waiters and the driver task.
    state_tx: watch::Sender<ConnectionState>,
    registry: InvocationRegistry,
    events: EventDispatchTable,
    sink: tokio::sync::Mutex<Option<Box<dyn TransportSink>>>,
}

impl Inner {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ConnectionState {
        self.lifecycle().state
    }

    fn close_error(&self) -> Option<HubError> {
        self.lifecycle().close_error.clone()
    }

    /// Moves `from → to`.  Returns `false` (and changes nothing) if the
    /// current state is not `from`.
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state != from {
            return false;
        }
        lifecycle.state = to;
        self.state_tx.send_replace(to);
        debug!(%from, %to, "connection state changed");
        true
    }

    /// Moves to `Closed` from any other state.  The first caller records
    /// the reason; later callers get `false`.
    fn mark_closed(&self, error: Option<HubError>) -> bool {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state == ConnectionState::Closed {
            return false;
        }
        let from = lifecycle.state;
        lifecycle.state = ConnectionState::Closed;
        lifecycle.close_error = error;
        self.state_tx.send_replace(ConnectionState::Closed);
        debug!(%from, to = %ConnectionState::Closed, "connection state changed");
        true
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        let mut guard = self.sink.lock().await;
        match guard.as_mut() {
            Some(sink) => sink.send(text).await,
            None => Err(TransportError::Closed {
                code: None,
                reason: "transport is not open".to_string(),
            }),
        }
    }

    async fn close_sink(&self) {
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close().await {
                debug!("error while closing transport: {e}");
            }
        }
    }

    /// Releases everything tied to an open connection.  Runs once, after the
    /// state reached `Closed`.
    async fn release(&self) {
        self.close_sink().await;
        let error = self.close_error();
        if !self.registry.is_empty() {
            debug!(ids = ?self.registry.pending_ids(), "failing pending invocations");
        }
        let failed = self
            .registry
            .fail_all(|| error.clone().unwrap_or(HubError::Cancelled));
        match &error {
            Some(e) => info!(url = %self.url, failed_invocations = failed, "hub connection closed: {e}"),
            None => info!(url = %self.url, failed_invocations = failed, "hub connection stopped"),
        }
        if let Some(delegate) = &self.delegate {
            delegate.on_closed(error);
        }
    }

    fn report_decode_error(&self, error: HubError) {
        warn!("dropping undecodable frame: {error}");
        if let Some(delegate) = &self.delegate {
            delegate.on_decode_error(&error);
        }
    }
}

// ── Public handle ─────────────────────────────────────────────────────────────

/// A persistent connection to one hub.
///
/// Build one with [`crate::HubConnectionBuilder`].  Register handlers with
/// [`on`](Self::on) at any time, call [`start`](Self::start), then
/// [`invoke`](Self::invoke) hub methods once connected.
///
/// Dropping the handle stops the connection.
pub struct HubConnection {
    inner: Arc<Inner>,
}

impl HubConnection {
    pub fn new(
        url: Url,
        transport: Arc<dyn Transport>,
        delegate: Option<Arc<dyn ConnectionDelegate>>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Created);
        Self {
            inner: Arc::new(Inner {
                url,
                transport,
                delegate,
                lifecycle: Mutex::new(Lifecycle {
                    state: ConnectionState::Created,
                    close_error: None,
                }),
                state_tx,
                registry: InvocationRegistry::new(),
                events: EventDispatchTable::new(),
                sink: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Number of invocations still waiting for a completion.
    pub fn pending_invocations(&self) -> usize {
        self.inner.registry.len()
    }

    /// Opens the transport and sends the handshake request.
    ///
    /// Returns once the handshake frame is written; the connection becomes
    /// `Connected` when the server acknowledges it.  Await
    /// [`wait_connected`](Self::wait_connected) for that.
    ///
    /// Only the first call does anything.  Later calls return `Ok(())`.
    ///
    /// # Errors
    ///
    /// - [`HubError::Transport`] if the transport cannot be opened or the
    ///   handshake cannot be written.  The connection is then `Closed`.
    /// - [`HubError::Cancelled`] if [`stop`](Self::stop) ran while the
    ///   transport was opening.
    pub async fn start(&self) -> Result<(), HubError> {
        let inner = &self.inner;
        if !inner.transition(ConnectionState::Created, ConnectionState::Connecting) {
            debug!(state = %inner.state(), "start ignored: connection already started");
            return Ok(());
        }
        info!(url = %inner.url, "connecting to hub");

        let TransportChannels { sink, events } = match inner.transport.open(&inner.url).await {
            Ok(channels) => channels,
            Err(e) => {
                warn!(url = %inner.url, "failed to open transport: {e}");
                let error = HubError::Transport(e);
                inner.mark_closed(Some(error.clone()));
                inner.release().await;
                return Err(error);
            }
        };

        *inner.sink.lock().await = Some(sink);
        if !inner.transition(ConnectionState::Connecting, ConnectionState::Handshaking) {
            debug!("connection stopped while the transport was opening");
            inner.release().await;
            return Err(HubError::Cancelled);
        }

        let handshake = match encode_handshake(&HandshakeRequest::default()) {
            Ok(frame) => frame,
            Err(e) => {
                let error = HubError::Encode(e);
                inner.mark_closed(Some(error.clone()));
                inner.release().await;
                return Err(error);
            }
        };
        if let Err(e) = inner.send_text(handshake).await {
            warn!("failed to send handshake: {e}");
            let error = HubError::Transport(e);
            // No driver exists yet, so this path always releases.
            inner.mark_closed(Some(error.clone()));
            inner.release().await;
            return Err(error);
        }
        debug!("handshake request sent");

        let state_rx = inner.state_tx.subscribe();
        tokio::spawn(run_driver(Arc::clone(inner), events, state_rx));
        Ok(())
    }

    /// Waits until the handshake completes.
    ///
    /// # Errors
    ///
    /// Returns the reason the connection closed if it closes first.  A local
    /// [`stop`](Self::stop) yields [`HubError::Cancelled`].
    pub async fn wait_connected(&self) -> Result<(), HubError> {
        let mut state_rx = self.inner.state_tx.subscribe();
        loop {
            let state = *state_rx.borrow_and_update();
            match state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Closed => {
                    return Err(self.inner.close_error().unwrap_or(HubError::Cancelled))
                }
                _ => {}
            }
            if state_rx.changed().await.is_err() {
                return Err(HubError::NotConnected { state });
            }
        }
    }

    /// Closes the connection and cancels every pending invocation.
    ///
    /// Safe to call from any task, at any time, any number of times.  Does
    /// not wait: the driver task closes the transport and fails pending
    /// invocations with [`HubError::Cancelled`] shortly after.
    pub fn stop(&self) {
        let previous = self.inner.state();
        if !self.inner.mark_closed(None) {
            return;
        }
        info!(url = %self.inner.url, state = %previous, "stopping hub connection");
        // A never-started connection has nothing to release.  A connection
        // that is still opening is released by `start`; later states by the
        // driver task.
        if previous == ConnectionState::Created {
            self.inner.registry.fail_all(|| HubError::Cancelled);
        }
    }

    /// Calls a hub method and waits for its completion.
    ///
    /// Returns the completion's `result`, if any.  There is no timeout; wrap
    /// the future in `tokio::time::timeout` if one is needed.  Dropping the
    /// future before it resolves forgets the invocation: a late completion
    /// for it is ignored.
    ///
    /// # Errors
    ///
    /// - [`HubError::NotConnected`] immediately if the connection is not
    ///   `Connected`.  Nothing is sent.
    /// - [`HubError::Encode`] if the invocation could not be serialized.
    /// - [`HubError::Send`] if the frame could not be written.
    /// - [`HubError::Remote`] if the hub method reported an error.
    /// - [`HubError::Cancelled`], [`HubError::ServerClosed`], or
    ///   [`HubError::Transport`] if the connection closed first.
    pub async fn invoke(
        &self,
        target: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Result<Option<Value>, HubError> {
        let target = target.into();
        let (tx, rx) = oneshot::channel();
        let (id, frame) = self.begin_invocation(
            &target,
            arguments,
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        )?;
        // Removes the entry if this future is dropped before the outcome
        // arrives.  After resolution the entry is already gone.
        let _abandon = AbandonGuard {
            registry: &self.inner.registry,
            id: &id,
        };
        if let Some(frame) = frame {
            self.send_invocation(&target, &id, frame).await;
        }
        rx.await.unwrap_or(Err(HubError::Cancelled))
    }

    /// Callback form of [`invoke`](Self::invoke).
    ///
    /// On success returns the invocation id; `callback` is later called
    /// exactly once.  If this returns an error, `callback` is never called.
    pub async fn invoke_with_callback<F>(
        &self,
        target: impl Into<String>,
        arguments: Vec<Value>,
        callback: F,
    ) -> Result<String, HubError>
    where
        F: FnOnce(InvocationOutcome) + Send + 'static,
    {
        let target = target.into();
        let (id, frame) = self.begin_invocation(&target, arguments, Box::new(callback))?;
        if let Some(frame) = frame {
            self.send_invocation(&target, &id, frame).await;
        }
        Ok(id)
    }

    /// Registers the callback and encodes the frame.
    ///
    /// Returns the id and the frame to send, or no frame if encoding failed;
    /// the callback has then already been resolved with [`HubError::Encode`].
    fn begin_invocation(
        &self,
        target: &str,
        arguments: Vec<Value>,
        callback: CompletionCallback,
    ) -> Result<(String, Option<String>), HubError> {
        let id = {
            // Registering under the lifecycle lock guarantees the entry is
            // either visible to the final `fail_all` or never created.
            let lifecycle = self.inner.lifecycle();
            if lifecycle.state != ConnectionState::Connected {
                return Err(HubError::NotConnected {
                    state: lifecycle.state,
                });
            }
            self.inner.registry.register(callback)
        };

        let envelope = Envelope::Invocation(InvocationMessage::new(target, id.as_str(), arguments));
        match encode(&envelope) {
            Ok(frame) => Ok((id, Some(frame))),
            Err(e) => {
                warn!(target_name = %target, invocation_id = %id, "failed to encode invocation: {e}");
                self.inner.registry.resolve(&id, Err(HubError::Encode(e)));
                Ok((id, None))
            }
        }
    }

    async fn send_invocation(&self, target: &str, id: &str, frame: String) {
        debug!(target_name = %target, invocation_id = %id, "sending invocation");
        if let Err(e) = self.inner.send_text(frame).await {
            warn!(target_name = %target, invocation_id = %id, "failed to send invocation: {e}");
            self.inner.registry.resolve(id, Err(HubError::Send(e)));
        }
    }

    /// Calls a hub method without asking for a completion.
    ///
    /// # Errors
    ///
    /// [`HubError::NotConnected`] outside `Connected`; [`HubError::Send`] if
    /// the frame could not be written.
    pub async fn send(
        &self,
        target: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Result<(), HubError> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(HubError::NotConnected { state });
        }
        let frame = encode(&Envelope::Invocation(InvocationMessage::non_blocking(
            target, arguments,
        )))
        .map_err(HubError::Encode)?;
        self.inner.send_text(frame).await.map_err(HubError::Send)
    }

    /// Registers the handler for server invocations of `name`.
    ///
    /// The first argument is decoded as `T`.  Replaces any earlier handler
    /// for the same name.  Allowed in every state.
    pub fn on<T, F>(&self, name: impl Into<String>, handler: F)
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.inner.events.register(name, handler);
    }

    /// Registers a handler that receives the raw argument list.
    pub fn on_raw<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&[Value]) -> Result<(), String> + Send + Sync + 'static,
    {
        self.inner.events.register_raw(name, handler);
    }

    /// Removes the handler for `name`.  Returns whether one existed.
    pub fn off(&self, name: &str) -> bool {
        self.inner.events.remove(name)
    }
}

/// Forgets a pending invocation whose caller stopped waiting.
struct AbandonGuard<'a> {
    registry: &'a InvocationRegistry,
    id: &'a str,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.registry.discard(self.id) {
            debug!(invocation_id = %self.id, "caller stopped waiting; invocation forgotten");
        }
    }
}

impl Drop for HubConnection {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for HubConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubConnection")
            .field("url", &self.inner.url.as_str())
            .field("state", &self.state())
            .field("pending_invocations", &self.pending_invocations())
            .finish()
    }
}

// ── Driver task ───────────────────────────────────────────────────────────────

/// Drains transport events until the connection closes, then releases it.
async fn run_driver(
    inner: Arc<Inner>,
    mut events: mpsc::Receiver<TransportEvent>,
    mut state_rx: watch::Receiver<ConnectionState>,
) {
    let mut buffer = FrameBuffer::new();
    loop {
        if *state_rx.borrow_and_update() == ConnectionState::Closed {
            break;
        }
        tokio::select! {
            biased;
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            event = events.recv() => {
                if handle_transport_event(&inner, &mut buffer, event).await.is_break() {
                    break;
                }
            }
        }
    }
    inner.release().await;
}

async fn handle_transport_event(
    inner: &Inner,
    buffer: &mut FrameBuffer,
    event: Option<TransportEvent>,
) -> ControlFlow<()> {
    match event {
        Some(TransportEvent::Message(text)) => {
            for decoded in buffer.push(&text) {
                match decoded {
                    Ok(envelope) => {
                        if handle_envelope(inner, envelope).await.is_break() {
                            return ControlFlow::Break(());
                        }
                    }
                    Err(e) => inner.report_decode_error(HubError::Decode(e)),
                }
            }
            ControlFlow::Continue(())
        }
        Some(TransportEvent::Error(e)) => {
            warn!("transport error: {e}");
            inner.mark_closed(Some(HubError::Transport(e)));
            ControlFlow::Break(())
        }
        Some(TransportEvent::Closed { code, reason }) => {
            debug!(?code, %reason, "transport closed");
            inner.mark_closed(Some(HubError::Transport(TransportError::Closed {
                code,
                reason,
            })));
            ControlFlow::Break(())
        }
        None => {
            inner.mark_closed(Some(HubError::Transport(TransportError::Closed {
                code: None,
                reason: "transport event stream ended".to_string(),
            })));
            ControlFlow::Break(())
        }
    }
}

async fn handle_envelope(inner: &Inner, envelope: Envelope) -> ControlFlow<()> {
    let state = inner.state();
    match (state, envelope) {
        (ConnectionState::Closed, _) => return ControlFlow::Break(()),

        (ConnectionState::Handshaking, Envelope::HandshakeAck(ack)) => match ack.error {
            None => {
                if inner.transition(ConnectionState::Handshaking, ConnectionState::Connected) {
                    info!(url = %inner.url, "hub connection established");
                    if let Some(delegate) = &inner.delegate {
                        delegate.on_connected();
                    }
                }
            }
            Some(reason) => {
                warn!("server rejected handshake: {reason}");
                inner.mark_closed(Some(HubError::Handshake(reason)));
                return ControlFlow::Break(());
            }
        },

        (_, Envelope::Ping) => {
            debug!("ping received; replying");
            if let Err(e) = send_envelope(inner, &Envelope::Ping).await {
                warn!("failed to answer ping: {e}");
                inner.mark_closed(Some(HubError::Transport(e)));
                return ControlFlow::Break(());
            }
        }

        (_, Envelope::Close(close)) => {
            info!(error = ?close.error, "server closed the connection");
            inner.mark_closed(Some(HubError::ServerClosed { error: close.error }));
            return ControlFlow::Break(());
        }

        (ConnectionState::Connected, Envelope::Completion(completion)) => {
            resolve_completion(inner, completion);
        }

        (ConnectionState::Connected, Envelope::Invocation(invocation)) => {
            if invocation.invocation_id.is_some() {
                debug!(target_name = %invocation.target, "server expects a result; none will be sent");
            }
            match inner.events.dispatch(&invocation.target, &invocation.arguments) {
                DispatchOutcome::Handled | DispatchOutcome::NoHandler => {}
                DispatchOutcome::DecodeFailed(reason) => {
                    inner.report_decode_error(HubError::Decode(ProtocolError::InvalidArguments {
                        target: invocation.target,
                        reason,
                    }));
                }
            }
        }

        (
            _,
            Envelope::StreamItem(_) | Envelope::StreamInvocation(_) | Envelope::CancelInvocation(_),
        ) => {
            debug!("streaming frame ignored");
        }

        (state, other) => {
            debug!(%state, message_type = ?other.message_type(), "frame not valid in this state; dropped");
        }
    }
    ControlFlow::Continue(())
}

fn resolve_completion(inner: &Inner, completion: CompletionMessage) {
    let outcome = match completion.error {
        Some(error) => Err(HubError::Remote(error)),
        None => Ok(completion.result),
    };
    inner.registry.resolve(&completion.invocation_id, outcome);
}

async fn send_envelope(inner: &Inner, envelope: &Envelope) -> Result<(), TransportError> {
    let frame = encode(envelope).map_err(|e| TransportError::Send(e.to_string()))?;
    inner.send_text(frame).await
}
