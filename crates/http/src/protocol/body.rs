//! Response body model.
//!
//! The connection writes exactly one of three body shapes: nothing, a fully
//! buffered byte payload framed by Content-Length, or an event stream. An
//! event-stream body carries the user's pending stream action; the connection
//! flushes the head unframed and hands the write half over to the streaming
//! engine instead of serializing a payload.

use crate::sse::StreamAction;
use bytes::Bytes;
use std::fmt;

/// The body of an outgoing response.
pub enum ResponseBody {
    /// No body; serialized as `Content-Length: 0`
    Empty,
    /// A buffered body with known length
    Full(Bytes),
    /// A long-lived event stream; the connection is promoted after the head
    EventStream(StreamAction),
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self::Empty
    }

    pub fn full(bytes: impl Into<Bytes>) -> Self {
        Self::Full(bytes.into())
    }

    pub fn event_stream(action: StreamAction) -> Self {
        Self::EventStream(action)
    }

    /// Byte length of the buffered body, if this body is buffered.
    pub fn len(&self) -> Option<u64> {
        match self {
            ResponseBody::Empty => Some(0),
            ResponseBody::Full(bytes) => Some(bytes.len() as u64),
            ResponseBody::EventStream(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ResponseBody::Empty) || matches!(self, ResponseBody::Full(b) if b.is_empty())
    }

    pub fn is_event_stream(&self) -> bool {
        matches!(self, ResponseBody::EventStream(_))
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Empty => f.write_str("ResponseBody::Empty"),
            ResponseBody::Full(bytes) => f.debug_tuple("ResponseBody::Full").field(&bytes.len()).finish(),
            ResponseBody::EventStream(action) => f.debug_tuple("ResponseBody::EventStream").field(action).finish(),
        }
    }
}

impl From<Bytes> for ResponseBody {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() { Self::Empty } else { Self::Full(bytes) }
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        Self::from(Bytes::from(value))
    }
}

impl From<&'static str> for ResponseBody {
    fn from(value: &'static str) -> Self {
        Self::from(Bytes::from_static(value.as_bytes()))
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(value: Vec<u8>) -> Self {
        Self::from(Bytes::from(value))
    }
}

impl From<()> for ResponseBody {
    fn from((): ()) -> Self {
        Self::Empty
    }
}
