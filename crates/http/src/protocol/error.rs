//! Protocol error taxonomy.
//!
//! Three families, split by who observes them: [`ParseError`] covers the
//! ingress path and always ends in a 400-and-close, [`SendError`] covers
//! response serialization and flushing, and [`StreamError`] surfaces to user
//! stream callbacks through the SSE writer rather than through the
//! connection result. [`HttpError`] is the sum the connection loop reports
//! to whoever spawned it.

use std::fmt;
use std::io;
use thiserror::Error;

/// What connection processing ultimately failed on.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The peer sent something unusable
    #[error("inbound: {0}")]
    Parse(#[from] ParseError),

    /// The response could not be serialized or written
    #[error("outbound: {0}")]
    Send(#[from] SendError),
}

/// Failures while reading and decoding a request.
#[derive(Error, Debug)]
pub enum ParseError {
    /// Request head grew past the configured cap
    #[error("request head of {got} bytes does not fit the {cap}-byte cap")]
    HeaderTooLarge { got: usize, cap: usize },

    /// More header fields than the decoder tracks
    #[error("request carries more than {cap} header fields")]
    HeaderCountExceeded { cap: usize },

    /// Body larger than the configured cap, declared or streamed
    #[error("request body of {got} bytes does not fit the {cap}-byte cap")]
    BodyTooLarge { got: u64, cap: u64 },

    /// Header field that does not scan
    #[error("unparseable header field: {0}")]
    BadHeader(String),

    /// Neither HTTP/1.0 nor HTTP/1.1
    #[error("unsupported http version (minor digit {0:?})")]
    UnsupportedVersion(Option<u8>),

    /// Method token that does not scan
    #[error("unparseable method token")]
    BadMethod,

    /// Request target that does not scan
    #[error("unparseable request target")]
    BadTarget,

    /// Content-Length that cannot be used for framing
    #[error("unusable content-length: {0}")]
    BadContentLength(String),

    /// Body bytes that violate their declared framing
    #[error("unparseable body: {0}")]
    BadBody(String),

    /// The transport failed mid-request
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

impl ParseError {
    pub fn bad_header(detail: impl fmt::Display) -> Self {
        Self::BadHeader(detail.to_string())
    }

    pub fn bad_content_length(detail: impl fmt::Display) -> Self {
        Self::BadContentLength(detail.to_string())
    }

    pub fn bad_body(detail: impl fmt::Display) -> Self {
        Self::BadBody(detail.to_string())
    }
}

/// Failures while serializing or flushing a response.
#[derive(Error, Debug)]
pub enum SendError {
    /// Payload did not match the framing the head declared
    #[error("response framing violated: {0}")]
    Framing(String),

    /// The transport failed mid-response
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}

impl SendError {
    pub fn framing(detail: impl fmt::Display) -> Self {
        Self::Framing(detail.to_string())
    }
}

/// Errors surfaced to user stream callbacks through the SSE writer.
///
/// The engine never retries on behalf of the caller: a [`StreamError::BufferFull`]
/// caller decides whether to drop the event or try again later.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// The stream was closed, either by the user or by a write error
    #[error("stream connection closed")]
    Closed,

    /// Enqueueing would exceed the bounded write queue
    #[error("stream write queue full")]
    BufferFull,

    /// Stream operation on an event that never started streaming
    #[error("event is not in streaming mode")]
    NotStreaming,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_errors_name_both_sides_of_the_cap() {
        let error = ParseError::HeaderTooLarge { got: 9000, cap: 8192 };
        assert_eq!(error.to_string(), "request head of 9000 bytes does not fit the 8192-byte cap");

        let error = ParseError::BodyTooLarge { got: 2048, cap: 1024 };
        assert!(error.to_string().contains("2048"));
        assert!(error.to_string().contains("1024"));
    }

    #[test]
    fn io_errors_convert_into_both_directions() {
        let read: ParseError = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(read, ParseError::Io(_)));

        let write: SendError = io::Error::from(io::ErrorKind::BrokenPipe).into();
        assert!(matches!(write, SendError::Io(_)));
    }

    #[test]
    fn http_error_tags_the_direction() {
        let inbound: HttpError = ParseError::BadMethod.into();
        assert!(inbound.to_string().starts_with("inbound:"));

        let outbound: HttpError = SendError::framing("short body").into();
        assert_eq!(outbound.to_string(), "outbound: response framing violated: short body");
    }
}
