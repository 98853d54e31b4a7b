//! Reassembly of frames that arrive split across transport deliveries.
//!
//! A WebSocket server is free to flush half a frame in one message and the
//! rest in the next.  [`FrameBuffer`] keeps the unterminated tail of each
//! delivery and prepends it to the next one, so only complete
//! separator-terminated segments ever reach the decoder.

use tracing::{trace, warn};

use crate::protocol::codec::{decode_frame, ProtocolError};
use crate::protocol::messages::{Envelope, RECORD_SEPARATOR};

/// Default cap on a buffered partial frame: 1 MiB.
pub const DEFAULT_MAX_PENDING: usize = 1024 * 1024;

/// Accumulates partial frames between deliveries.
///
/// A partial frame longer than the limit is discarded and reported as
/// [`ProtocolError::FrameTooLarge`]; decoding resumes after the next
/// separator.
///
/// # Examples
///
/// ```rust
/// use hub_core::protocol::FrameBuffer;
/// use hub_core::protocol::messages::Envelope;
///
/// let mut buffer = FrameBuffer::new();
/// assert!(buffer.push("{\"type\"").is_empty());
/// assert_eq!(buffer.push(":6}\u{1e}"), vec![Ok(Envelope::Ping)]);
/// ```
#[derive(Debug)]
pub struct FrameBuffer {
    tail: String,
    max_pending: usize,
    /// Set after an oversized partial frame was dropped; text up to the next
    /// separator belongs to that frame and is skipped.
    discarding: bool,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_PENDING)
    }

    /// Creates a buffer that holds at most `max_pending` bytes of a partial
    /// frame.
    pub fn with_limit(max_pending: usize) -> Self {
        Self {
            tail: String::new(),
            max_pending,
            discarding: false,
        }
    }

    /// Appends `delivery` and decodes every frame it completes.
    ///
    /// Text after the last separator is retained for the next call.
    pub fn push(&mut self, delivery: &str) -> Vec<Result<Envelope, ProtocolError>> {
        let delivery = if self.discarding {
            match delivery.find(RECORD_SEPARATOR) {
                Some(end) => {
                    self.discarding = false;
                    &delivery[end + RECORD_SEPARATOR.len_utf8()..]
                }
                None => return Vec::new(),
            }
        } else {
            delivery
        };
        self.tail.push_str(delivery);

        let mut decoded = match self.tail.rfind(RECORD_SEPARATOR) {
            Some(last_separator) => {
                let complete: String = self
                    .tail
                    .drain(..last_separator + RECORD_SEPARATOR.len_utf8())
                    .collect();
                decode_frame(&complete)
            }
            None => Vec::new(),
        };

        if self.tail.len() > self.max_pending {
            warn!(
                buffered = self.tail.len(),
                limit = self.max_pending,
                "partial frame over the limit; discarding it"
            );
            self.tail.clear();
            self.discarding = true;
            decoded.push(Err(ProtocolError::FrameTooLarge {
                limit: self.max_pending,
            }));
        } else if !self.tail.is_empty() {
            trace!(buffered = self.tail.len(), "partial frame buffered");
        }
        decoded
    }

    /// Number of buffered bytes still waiting for a separator.
    pub fn pending_len(&self) -> usize {
        self.tail.len()
    }

    /// Discards any buffered partial frame.
    pub fn clear(&mut self) {
        self.tail.clear();
        self.discarding = false;
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::CompletionMessage;

    #[test]
    fn test_complete_delivery_leaves_nothing_buffered() {
        // Arrange
        let mut buffer = FrameBuffer::new();

        // Act
        let decoded = buffer.push("{\"type\":6}\u{1e}{}\u{1e}");

        // Assert
        assert_eq!(decoded.len(), 2);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn test_frame_split_across_two_deliveries_is_decoded_once() {
        // Arrange
        let mut buffer = FrameBuffer::new();

        // Act
        let first = buffer.push("{\"type\":3,\"invoca");
        let second = buffer.push("tionId\":\"9\",\"result\":true}\u{1e}");

        // Assert
        assert!(first.is_empty(), "nothing is decoded before the separator");
        assert_eq!(
            second,
            vec![Ok(Envelope::Completion(CompletionMessage::success(
                "9",
                Some(serde_json::Value::Bool(true))
            )))]
        );
    }

    #[test]
    fn test_trailing_partial_is_kept_after_complete_frames() {
        // Arrange
        let mut buffer = FrameBuffer::new();

        // Act
        let decoded = buffer.push("{\"type\":6}\u{1e}{\"ty");

        // Assert
        assert_eq!(decoded, vec![Ok(Envelope::Ping)]);
        assert_eq!(buffer.pending_len(), "{\"ty".len());

        let rest = buffer.push("pe\":6}\u{1e}");
        assert_eq!(rest, vec![Ok(Envelope::Ping)]);
    }

    #[test]
    fn test_separator_arriving_alone_completes_buffered_frame() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.push("{\"type\":6}").is_empty());
        assert_eq!(buffer.push("\u{1e}"), vec![Ok(Envelope::Ping)]);
    }

    #[test]
    fn test_clear_drops_partial_frame() {
        let mut buffer = FrameBuffer::new();
        buffer.push("{\"type\"");
        buffer.clear();
        assert_eq!(buffer.pending_len(), 0);
        // The stale prefix must not corrupt the next frame.
        assert_eq!(buffer.push("{\"type\":6}\u{1e}"), vec![Ok(Envelope::Ping)]);
    }

    #[test]
    fn test_oversized_partial_frame_is_dropped_and_reported() {
        // Arrange
        let mut buffer = FrameBuffer::with_limit(16);

        // Act: a peer that never sends the separator.
        let first = buffer.push("{\"type\":1,\"target\":\"");
        let second = buffer.push("aaaaaaaaaaaaaaaa");

        // Assert
        assert_eq!(first, vec![Err(ProtocolError::FrameTooLarge { limit: 16 })]);
        assert!(second.is_empty(), "rest of the dropped frame is skipped");
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn test_decoding_resumes_after_the_dropped_frame_ends() {
        let mut buffer = FrameBuffer::with_limit(16);
        buffer.push("{\"type\":1,\"target\":\"long-name");

        let decoded = buffer.push("\"}\u{1e}{\"type\":6}\u{1e}");

        assert_eq!(decoded, vec![Ok(Envelope::Ping)]);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn test_complete_frames_larger_than_the_limit_still_decode() {
        // The limit only bounds text waiting for a separator.
        let mut buffer = FrameBuffer::with_limit(4);
        assert_eq!(buffer.push("{\"type\":6}\u{1e}"), vec![Ok(Envelope::Ping)]);
    }
}
