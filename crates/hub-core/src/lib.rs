//! # hub-core
//!
//! Shared library for the hub client containing the wire protocol codec,
//! frame reassembly, and the chat payload types.
//!
//! It has no dependencies on sockets, async runtimes, or terminals, so every
//! piece can be tested with plain strings.
//!
//! # Protocol overview (for beginners)
//!
//! A hub is a remote object whose methods can be called by name over one
//! long-lived connection, in both directions.  Each call travels as a small
//! JSON object (an *envelope*) and every envelope is terminated by the ASCII
//! record separator `0x1E`:
//!
//! ```text
//! client → {"protocol":"json","version":1}<RS>            handshake request
//! server → {}<RS>                                         handshake ack
//! client → {"type":1,"target":"JoinGroup","invocationId":"0","arguments":[..]}<RS>
//! server → {"type":3,"invocationId":"0"}<RS>              completion
//! server → {"type":1,"target":"ReceiveMessage","arguments":[{"body":"hi"}]}<RS>
//! server → {"type":6}<RS>                                 keepalive ping
//! ```
//!
//! - **`protocol`** – envelope types, the JSON codec, the [`FrameBuffer`] that
//!   reassembles frames split across deliveries, and the id counter.
//! - **`domain`** – chat messages, groups, users, and the exact hub target
//!   names that carry them.

pub mod domain;
pub mod protocol;

pub use domain::chat::{
    ChatEvent, ChatGroup, ChatMessage, ChatMethod, ChatPayload, ChatUser, PayloadKind,
};
pub use protocol::codec::{decode_frame, decode_segment, encode, encode_handshake, ProtocolError};
pub use protocol::framing::FrameBuffer;
pub use protocol::messages::Envelope;
