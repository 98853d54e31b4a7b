//! Hub wire protocol: envelope types, JSON codec, and frame reassembly.

pub mod codec;
pub mod framing;
pub mod messages;
pub mod sequence;

pub use codec::{decode_frame, decode_segment, encode, encode_handshake, split_frames, ProtocolError};
pub use framing::FrameBuffer;
pub use messages::*;
pub use sequence::SequenceCounter;
