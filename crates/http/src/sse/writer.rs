//! The writer handle given to user stream callbacks.

use crate::protocol::StreamError;
use crate::sse::{SseEvent, StreamConn, encode_comment, encode_retry};

/// Write side of an SSE session.
///
/// Created by the connection when it promotes to streaming and handed to the
/// registered callback; the session ends when the callback closes the writer
/// or the peer disconnects. Sends are synchronous against the bounded queue:
/// they never block the loop, and a full queue surfaces as
/// [`StreamError::BufferFull`] instead of waiting.
#[derive(Debug)]
pub struct SseWriter {
    conn: StreamConn,
}

impl SseWriter {
    pub(crate) fn new(conn: StreamConn) -> Self {
        Self { conn }
    }

    /// Enqueues one event frame.
    pub fn send_event(&self, event: SseEvent) -> Result<(), StreamError> {
        self.conn.enqueue(event.encode())
    }

    /// Enqueues a comment frame; useful as a keep-alive ping.
    pub fn send_comment(&self, text: &str) -> Result<(), StreamError> {
        self.conn.enqueue(encode_comment(text))
    }

    /// Enqueues a standalone reconnect-delay frame.
    pub fn send_retry(&self, ms: u32) -> Result<(), StreamError> {
        self.conn.enqueue(encode_retry(ms))
    }

    /// Waits until every queued frame reached the socket.
    pub async fn flush(&self) -> Result<(), StreamError> {
        self.conn.flush().await
    }

    /// Closes the stream. Queued frames are drained first, then the socket
    /// write half is shut down.
    pub async fn close(self) {
        self.conn.close().await;
    }

    /// Whether the stream is closed, by the user or by a write error.
    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }
}
