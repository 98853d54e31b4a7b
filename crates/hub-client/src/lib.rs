//! hub-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the `hub-chat` binary share the same module tree.
//!
//! # What does hub-client do? (for beginners)
//!
//! A *hub* is a server endpoint that both sides can call into.  The client
//! calls methods on the server (`JoinGroup`, `SendMessageToGroup`, ...) and
//! the server calls methods on the client (`ReceiveMessage`, ...).  Every call
//! is a JSON object terminated by the `0x1E` record separator, carried over a
//! WebSocket.
//!
//! A session goes like this:
//!
//! 1. Open the WebSocket and send `{"protocol":"json","version":1}`.
//! 2. Wait for the server's empty `{}` acknowledgement.
//! 3. Send invocations; each carries an id that the server echoes back in a
//!    completion message with the result or an error.
//! 4. Handle server invocations by target name, and answer each ping with a
//!    ping.
//! 5. On close, every call still waiting for a completion fails.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hub_client::{ChatHub, HubConnectionBuilder};
//! use hub_core::ChatGroup;
//!
//! # async fn run() -> Result<(), hub_client::HubError> {
//! let connection = Arc::new(
//!     HubConnectionBuilder::new()
//!         .with_url("ws://localhost:5000/chathub")
//!         .build()?,
//! );
//! connection.start().await?;
//! connection.wait_connected().await?;
//!
//! let hub = ChatHub::new(Arc::clone(&connection));
//! hub.on_receive_message(|message| println!("{}: {}", message.sender, message.body));
//! hub.join_group(&ChatGroup::new("global", "alice")).await?;
//! # Ok(())
//! # }
//! ```

/// Application layer: the connection state machine and its collaborators.
pub mod application;

/// Connection construction and URL normalization.
pub mod builder;

/// Infrastructure layer: transports and configuration.
pub mod infrastructure;

pub use application::chat_hub::ChatHub;
pub use application::error::HubError;
pub use application::hub_connection::{ConnectionDelegate, ConnectionState, HubConnection};
pub use application::transport::{Transport, TransportError, TransportEvent, TransportSink};
pub use builder::{normalize_hub_url, HubConnectionBuilder};
