//! Application layer: the hub connection and the pieces it is built from.
//!
//! # How the pieces fit (for beginners)
//!
//! - **`transport`** – the trait a byte-carrying channel implements.  The
//!   connection only ever sees text in and text out.
//! - **`invocation_registry`** – remembers which invocation ids are still
//!   waiting for a completion, and resolves each exactly once.
//! - **`event_dispatch`** – maps server-invoked target names to handlers.
//! - **`hub_connection`** – the state machine that owns a transport, performs
//!   the handshake, answers pings, and routes every inbound frame.
//! - **`chat_hub`** – typed chat operations on top of a connection.
//! - **`error`** – the error type surfaced to callers.

pub mod chat_hub;
pub mod error;
pub mod event_dispatch;
pub mod hub_connection;
pub mod invocation_registry;
pub mod transport;
