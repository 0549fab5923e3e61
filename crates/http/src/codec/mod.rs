//! Incremental HTTP/1.1 codec.
//!
//! Decoding and encoding are both two-phase state machines built on the
//! `tokio_util::codec` traits:
//!
//! - [`RequestDecoder`] parses the request head with [`header::HeaderDecoder`]
//!   and then streams the body through a [`body::PayloadDecoder`] selected
//!   from the framing headers.
//! - [`ResponseEncoder`] serializes the head with [`header::HeaderEncoder`]
//!   and then writes the buffered payload, validating it against the declared
//!   framing.
//!
//! `Ok(None)` from a decoder means more bytes are needed; any error is fatal
//! for the connection, which answers 400 and closes.

pub mod body;
pub mod header;

mod request_decoder;
mod response_encoder;

pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;

/// Configurable limits applied while decoding a request.
#[derive(Debug, Clone, Copy)]
pub struct CodecLimits {
    /// Maximum size of the request head in bytes
    pub max_header_bytes: usize,
    /// Maximum size of the request body in bytes
    pub max_body_bytes: u64,
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self { max_header_bytes: 8 * 1024, max_body_bytes: 1024 * 1024 }
    }
}
