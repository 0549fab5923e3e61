//! Server-Sent Events engine.
//!
//! A handler opts into streaming by committing an SSE response head; after it
//! returns, the connection flushes the head, promotes its write half into a
//! [`StreamConn`] (bounded write queue, single drain task) and schedules the
//! registered [`StreamAction`] through the runtime bridge's zero-delay
//! primitive, handing it an [`SseWriter`]. From that point the normal
//! response path is out of the picture: the callback owns the stream until it
//! closes the writer or a write error tears the stream down.
//!
//! Wire format per message (`event`, `id` and `retry` lines only when set,
//! one `data:` line per source line):
//!
//! ```text
//! event: <name>\n
//! id: <id>\n
//! retry: <ms>\n
//! data: <line-1>\n
//! data: <line-2>\n
//! \n
//! ```

mod stream_conn;
mod writer;

pub use stream_conn::StreamConn;
pub use writer::SseWriter;

use crate::runtime::{self, LoopHandle};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::fmt;

/// One server-sent event under construction.
///
/// ```
/// use arbor_http::sse::SseEvent;
///
/// let frame = SseEvent::data("0").name("counter").id("0").encode();
/// assert_eq!(&frame[..], b"event: counter\nid: 0\ndata: 0\n\n");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    data: String,
    name: Option<String>,
    id: Option<String>,
    retry_ms: Option<u32>,
}

impl SseEvent {
    /// Starts an event carrying the given data payload.
    pub fn data(data: impl Into<String>) -> Self {
        Self { data: data.into(), ..Default::default() }
    }

    /// Sets the event name (`event:` line).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the event id (`id:` line), echoed back by clients in
    /// `Last-Event-ID` on reconnect.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the client reconnect delay (`retry:` line).
    pub fn retry_ms(mut self, ms: u32) -> Self {
        self.retry_ms = Some(ms);
        self
    }

    /// Serializes the event into its wire frame.
    ///
    /// Multi-line data emits one `data:` line per source line; the frame is
    /// terminated by a blank line.
    pub fn encode(&self) -> Bytes {
        let mut out = String::with_capacity(self.data.len() + 32);

        if let Some(name) = &self.name {
            out.push_str("event: ");
            out.push_str(name);
            out.push('\n');
        }

        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }

        if let Some(ms) = self.retry_ms {
            out.push_str("retry: ");
            out.push_str(&ms.to_string());
            out.push('\n');
        }

        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line.strip_suffix('\r').unwrap_or(line));
            out.push('\n');
        }

        out.push('\n');
        Bytes::from(out)
    }
}

/// Serializes a comment frame (`:`-prefixed lines, ignored by clients).
pub(crate) fn encode_comment(text: &str) -> Bytes {
    let mut out = String::with_capacity(text.len() + 8);
    for line in text.split('\n') {
        out.push_str(": ");
        out.push_str(line.strip_suffix('\r').unwrap_or(line));
        out.push('\n');
    }
    out.push('\n');
    Bytes::from(out)
}

/// Serializes a standalone retry frame.
pub(crate) fn encode_retry(ms: u32) -> Bytes {
    Bytes::from(format!("retry: {ms}\n\n"))
}

/// The user streaming logic registered on an event, pending until the
/// connection has flushed the response head.
pub enum StreamAction {
    /// Legacy synchronous callback
    Callback(Box<dyn FnOnce(SseWriter) + Send + 'static>),
    /// Async stream handler
    Task(Box<dyn FnOnce(SseWriter) -> BoxFuture<'static, ()> + Send + 'static>),
    /// Async stream handler that also drives loop timers
    TaskWithLoop(Box<dyn FnOnce(SseWriter, LoopHandle) -> BoxFuture<'static, ()> + Send + 'static>),
}

impl StreamAction {
    /// Schedules the action on the loop via the zero-delay primitive.
    ///
    /// The callback never runs inline with request processing; it starts on
    /// a fresh task tick with the writer already bound to a live stream.
    pub(crate) fn schedule(self, writer: SseWriter, handle: LoopHandle) {
        match self {
            StreamAction::Callback(callback) => {
                runtime::defer(async move { callback(writer) });
            }
            StreamAction::Task(task) => {
                runtime::defer(async move { task(writer).await });
            }
            StreamAction::TaskWithLoop(task) => {
                runtime::defer(async move { task(writer, handle).await });
            }
        }
    }
}

impl fmt::Debug for StreamAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamAction::Callback(_) => f.write_str("StreamAction::Callback"),
            StreamAction::Task(_) => f.write_str("StreamAction::Task"),
            StreamAction::TaskWithLoop(_) => f.write_str("StreamAction::TaskWithLoop"),
        }
    }
}
