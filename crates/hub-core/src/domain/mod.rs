//! Application-level payloads for the chat hub.
//!
//! The protocol layer treats invocation arguments as opaque JSON values.  This
//! module gives them shape: the message, group, and user records the chat hub
//! exchanges, plus the tables mapping each hub target name to its payload.

pub mod chat;
