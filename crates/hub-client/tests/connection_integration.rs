//! Integration tests for the hub connection over the in-memory transport.
//!
//! # Purpose
//!
//! These tests drive a `HubConnection` through its public API exactly as an
//! application would, with a `MemoryPeer` playing the server.  They verify:
//!
//! - Correlation: completions that arrive out of order reach the right callers.
//! - Robustness: one unreadable frame in a batch does not stop the others.
//! - Teardown: `stop()` fails every pending call exactly once.
//! - Keepalive: each server ping gets exactly one ping back.
//! - Events: a `ReceiveMessage` push reaches the chat handler.
//! - Server close: pending calls fail, later calls are refused.
//!
//! # A session on the wire
//!
//! ```text
//! Client                                  Peer
//! ──────                                  ────
//! {"protocol":"json","version":1}<RS> ──►
//!                                     ◄── {}<RS>
//! {"type":1,"target":"Add",
//!  "invocationId":"0",...}<RS>        ──►
//!                                     ◄── {"type":3,"invocationId":"0","result":3}<RS>
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hub_client::infrastructure::transport::{MemoryPeer, MemoryTransport};
use hub_client::{ChatHub, ConnectionState, HubConnection, HubError};
use hub_core::protocol::{CompletionMessage, Envelope, InvocationMessage};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;
use url::Url;

const WAIT: Duration = Duration::from_secs(2);

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Starts a connection against a fresh memory peer and completes the
/// handshake.
async fn connected() -> (Arc<HubConnection>, MemoryPeer) {
    let (transport, mut peer) = MemoryTransport::pair();
    let url = Url::parse("ws://memory.test/chathub").expect("valid url");
    let connection = Arc::new(HubConnection::new(url, Arc::new(transport), None));

    connection.start().await.expect("start");
    let handshake = peer.expect_handshake().await;
    assert_eq!(handshake, "{\"protocol\":\"json\",\"version\":1}\u{1e}");
    peer.acknowledge_handshake().await;
    timeout(WAIT, connection.wait_connected())
        .await
        .expect("timed out waiting for handshake")
        .expect("handshake");

    (connection, peer)
}

/// Waits for an outbound invocation and returns its id and target.
async fn next_invocation(peer: &mut MemoryPeer) -> (String, String) {
    match timeout(WAIT, peer.next_envelope()).await.expect("timed out") {
        Some(Envelope::Invocation(InvocationMessage {
            target,
            invocation_id: Some(id),
            ..
        })) => (id, target),
        other => panic!("expected a blocking invocation, got {other:?}"),
    }
}

/// Spawns `connection.invoke(target, [])` and returns the join handle.
fn spawn_invoke(
    connection: &Arc<HubConnection>,
    target: &str,
) -> tokio::task::JoinHandle<Result<Option<Value>, HubError>> {
    let connection = Arc::clone(connection);
    let target = target.to_string();
    tokio::spawn(async move { connection.invoke(target, vec![]).await })
}

// ── Correlation ───────────────────────────────────────────────────────────────

/// Completions answered in reverse order still reach their own callers.
#[tokio::test]
async fn test_out_of_order_completions_reach_their_callers() {
    // Arrange
    let (connection, mut peer) = connected().await;
    let first = spawn_invoke(&connection, "First");
    let (first_id, first_target) = next_invocation(&mut peer).await;
    let second = spawn_invoke(&connection, "Second");
    let (second_id, second_target) = next_invocation(&mut peer).await;
    assert_eq!(first_target, "First");
    assert_eq!(second_target, "Second");
    assert_ne!(first_id, second_id);

    // Act: answer the second call first.
    peer.push_envelope(&Envelope::Completion(CompletionMessage::success(
        second_id.as_str(),
        Some(json!("two")),
    )))
    .await;
    peer.push_envelope(&Envelope::Completion(CompletionMessage::success(
        first_id.as_str(),
        Some(json!("one")),
    )))
    .await;

    // Assert
    let first = timeout(WAIT, first).await.expect("timed out").expect("join");
    let second = timeout(WAIT, second).await.expect("timed out").expect("join");
    assert_eq!(first, Ok(Some(json!("one"))));
    assert_eq!(second, Ok(Some(json!("two"))));
    assert_eq!(connection.pending_invocations(), 0);
}

/// Two completions for one id: the first wins, the second is ignored.
#[tokio::test]
async fn test_duplicate_completion_resolves_once() {
    let (connection, mut peer) = connected().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let id = connection
        .invoke_with_callback("Once", vec![], move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .expect("sent");
    next_invocation(&mut peer).await;

    let frame = format!("{{\"type\":3,\"invocationId\":\"{id}\"}}\u{1e}");
    peer.push_text(frame.repeat(2)).await;
    // A ping round trip proves the driver has processed both completions.
    peer.push_envelope(&Envelope::Ping).await;
    assert_eq!(
        timeout(WAIT, peer.next_envelope()).await.expect("timed out"),
        Some(Envelope::Ping)
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ── Robustness ────────────────────────────────────────────────────────────────

/// One delivery with five frames, the third malformed: the other four are
/// handled and the connection stays up.
#[tokio::test]
async fn test_bad_frame_in_batch_does_not_stop_the_others() {
    // Arrange
    let (connection, peer) = connected().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    connection.on("Tick", move |n: u32| {
        let _ = tx.send(n);
    });
    let good = |n: u32| format!("{{\"type\":1,\"target\":\"Tick\",\"arguments\":[{n}]}}\u{1e}");
    let batch = [good(1), good(2), "{not json\u{1e}".to_string(), good(4), good(5)].concat();

    // Act
    peer.push_text(batch).await;

    // Assert
    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(timeout(WAIT, rx.recv()).await.expect("timed out").expect("tick"));
    }
    assert_eq!(seen, vec![1, 2, 4, 5]);
    assert_eq!(connection.state(), ConnectionState::Connected);
}

/// A frame split across two deliveries is decoded once, after the second.
#[tokio::test]
async fn test_frame_split_across_deliveries() {
    let (connection, peer) = connected().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    connection.on("Echo", move |text: String| {
        let _ = tx.send(text);
    });

    peer.push_text("{\"type\":1,\"target\":\"Ec").await;
    peer.push_text("ho\",\"arguments\":[\"joined\"]}\u{1e}").await;

    let text = timeout(WAIT, rx.recv()).await.expect("timed out");
    assert_eq!(text.as_deref(), Some("joined"));
    assert!(rx.try_recv().is_err());
}

// ── Teardown ──────────────────────────────────────────────────────────────────

/// `stop()` with three calls outstanding: each fails with `Cancelled`, once.
#[tokio::test]
async fn test_stop_cancels_every_pending_call() {
    // Arrange
    let (connection, mut peer) = connected().await;
    let mut calls = Vec::new();
    for target in ["A", "B", "C"] {
        calls.push(spawn_invoke(&connection, target));
        next_invocation(&mut peer).await;
    }
    assert_eq!(connection.pending_invocations(), 3);

    // Act
    connection.stop();

    // Assert
    for call in calls {
        let result = timeout(WAIT, call).await.expect("timed out").expect("join");
        assert_eq!(result, Err(HubError::Cancelled));
    }
    timeout(WAIT, peer.wait_sink_closed()).await.expect("sink never closed");
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert_eq!(connection.pending_invocations(), 0);
}

// ── Keepalive ─────────────────────────────────────────────────────────────────

/// Three pings in, exactly three pings out.
#[tokio::test]
async fn test_each_ping_gets_exactly_one_reply() {
    let (_connection, mut peer) = connected().await;

    peer.push_text("{\"type\":6}\u{1e}{\"type\":6}\u{1e}").await;
    peer.push_envelope(&Envelope::Ping).await;

    for _ in 0..3 {
        let reply = timeout(WAIT, peer.next_sent()).await.expect("timed out");
        assert_eq!(reply.as_deref(), Some("{\"type\":6}\u{1e}"));
    }
    // A completion for an unknown id is a cheap fence: nothing is sent back.
    peer.push_text("{\"type\":3,\"invocationId\":\"99\"}\u{1e}").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(peer.try_next_sent(), None);
}

// ── Events ────────────────────────────────────────────────────────────────────

/// A `ReceiveMessage` push with body "hi" reaches the chat handler.
#[tokio::test]
async fn test_receive_message_reaches_chat_handler() {
    // Arrange
    let (connection, peer) = connected().await;
    let hub = ChatHub::new(Arc::clone(&connection));
    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.on_receive_message(move |message| {
        let _ = tx.send(message);
    });

    // Act
    peer.push_text(
        "{\"type\":1,\"target\":\"ReceiveMessage\",\"arguments\":[{\"sender\":\"bob\",\"body\":\"hi\",\"header\":null}]}\u{1e}",
    )
    .await;

    // Assert
    let message = timeout(WAIT, rx.recv()).await.expect("timed out").expect("message");
    assert_eq!(message.body, "hi");
    assert_eq!(message.sender, "bob");
    assert_eq!(message.header, "");
}

/// Invocations for targets with no handler are dropped without side effects.
#[tokio::test]
async fn test_unhandled_target_is_ignored() {
    let (connection, mut peer) = connected().await;

    peer.push_envelope(&Envelope::Invocation(InvocationMessage::non_blocking(
        "NobodyListens",
        vec![json!(1)],
    )))
    .await;
    peer.push_envelope(&Envelope::Ping).await;

    assert_eq!(
        timeout(WAIT, peer.next_envelope()).await.expect("timed out"),
        Some(Envelope::Ping)
    );
    assert_eq!(connection.state(), ConnectionState::Connected);
}

// ── Server close ──────────────────────────────────────────────────────────────

/// A server `Close` fails the pending call and refuses later ones.
#[tokio::test]
async fn test_server_close_fails_pending_and_refuses_new_calls() {
    // Arrange
    let (connection, mut peer) = connected().await;
    let pending = spawn_invoke(&connection, "Slow");
    next_invocation(&mut peer).await;

    // Act
    peer.push_text("{\"type\":7,\"error\":\"shutting down\"}\u{1e}").await;

    // Assert
    let result = timeout(WAIT, pending).await.expect("timed out").expect("join");
    assert_eq!(
        result,
        Err(HubError::ServerClosed {
            error: Some("shutting down".to_string())
        })
    );
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert_eq!(
        connection.invoke("Later", vec![]).await,
        Err(HubError::NotConnected {
            state: ConnectionState::Closed
        })
    );
}

/// Text after the handshake ack in the same delivery is processed too.
#[tokio::test]
async fn test_frames_after_ack_in_same_delivery_are_processed() {
    let (transport, mut peer) = MemoryTransport::pair();
    let url = Url::parse("ws://memory.test/chathub").expect("valid url");
    let connection = HubConnection::new(url, Arc::new(transport), None);
    connection.start().await.expect("start");
    peer.expect_handshake().await;

    peer.push_text("{}\u{1e}{\"type\":6}\u{1e}").await;

    assert_eq!(
        timeout(WAIT, peer.next_envelope()).await.expect("timed out"),
        Some(Envelope::Ping)
    );
    assert_eq!(connection.state(), ConnectionState::Connected);
}
