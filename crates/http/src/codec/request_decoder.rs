//! Streaming request decoder.
//!
//! Coordinates the two decode phases: while `payload_decoder` is `None` the
//! head is being parsed; once a head completes, a [`PayloadDecoder`] takes
//! over until it reports EOF. A declared Content-Length beyond the body limit
//! is rejected before any body byte is read; chunked bodies are metered by
//! the connection as chunks arrive.

use crate::codec::body::PayloadDecoder;
use crate::codec::header::HeaderDecoder;
use crate::codec::CodecLimits;
use crate::ensure;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Decoder producing request heads and body chunks as separate items.
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
    limits: CodecLimits,
}

impl RequestDecoder {
    pub fn new(limits: CodecLimits) -> Self {
        Self { header_decoder: HeaderDecoder::new(limits.max_header_bytes), payload_decoder: None, limits }
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self::new(CodecLimits::default())
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    /// Returns the next head or body item, or `Ok(None)` when more bytes are
    /// needed.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof) => {
                    // this request's body is done, back to head parsing
                    self.payload_decoder.take();
                    Some(Message::Payload(item))
                }
                None => None,
            };

            return Ok(message);
        }

        let message = match self.header_decoder.decode(src)? {
            Some((header, payload_size)) => {
                if let PayloadSize::Length(declared) = payload_size {
                    ensure!(
                        declared <= self.limits.max_body_bytes,
                        ParseError::BodyTooLarge { got: declared, cap: self.limits.max_body_bytes }
                    );
                }
                self.payload_decoder = Some(payload_size.into());
                Some(Message::Header((header, payload_size)))
            }
            None => None,
        };

        Ok(message)
    }
}
