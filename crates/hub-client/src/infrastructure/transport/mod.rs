//! [`Transport`](crate::application::transport::Transport) implementations.
//!
//! - **`websocket`** – the production transport over `tokio-tungstenite`.
//! - **`memory`** – an in-process channel pair for tests and demos.

pub mod memory;
pub mod websocket;

pub use memory::{MemoryPeer, MemoryTransport};
pub use websocket::WebSocketTransport;
