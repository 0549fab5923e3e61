//! Streaming response encoder.
//!
//! Mirrors the decoder's two phases: a head item selects the framing, then
//! payload items are validated against it. With Content-Length framing the
//! encoder tracks the bytes still owed and rejects over-length writes; an
//! unframed head (event stream) accepts no payload items at all since the
//! connection is handed to the streaming engine right after the head.

use crate::codec::header::HeaderEncoder;
use crate::protocol::{Message, PayloadItem, PayloadSize, ResponseHead, SendError};
use bytes::BytesMut;
use std::io;
use std::io::ErrorKind;
use tokio_util::codec::Encoder;
use tracing::error;

/// Encoder for HTTP responses.
#[derive(Debug, Default)]
pub struct ResponseEncoder {
    header_encoder: HeaderEncoder,
    body: Option<BodyFraming>,
}

#[derive(Debug, Clone, Copy)]
enum BodyFraming {
    /// Bytes still owed under Content-Length framing
    Remaining(u64),
    /// Head declared no body
    Empty,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Encoder<Message<(ResponseHead, PayloadSize)>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Message<(ResponseHead, PayloadSize)>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Header((head, payload_size)) => {
                if self.body.is_some() {
                    error!("expect payload item but receive response head");
                    return Err(io::Error::from(ErrorKind::InvalidInput).into());
                }

                self.body = match payload_size {
                    PayloadSize::Length(n) => Some(BodyFraming::Remaining(n)),
                    PayloadSize::Empty => Some(BodyFraming::Empty),
                    // the streaming engine owns the connection from here on
                    PayloadSize::Unframed => None,
                    PayloadSize::Chunked => {
                        error!("chunked response framing is not produced by this server");
                        return Err(SendError::framing("chunked response framing unsupported"));
                    }
                };

                self.header_encoder.encode((head, payload_size), dst)
            }

            Message::Payload(payload_item) => {
                let Some(framing) = self.body else {
                    error!("expect response head but receive payload item");
                    return Err(io::Error::from(ErrorKind::InvalidInput).into());
                };

                match (framing, payload_item) {
                    (BodyFraming::Remaining(remaining), PayloadItem::Chunk(bytes)) => {
                        let len = bytes.len() as u64;
                        if len > remaining {
                            return Err(SendError::framing("body exceeds declared content-length"));
                        }
                        dst.extend_from_slice(&bytes);
                        self.body = Some(BodyFraming::Remaining(remaining - len));
                        Ok(())
                    }
                    (BodyFraming::Remaining(remaining), PayloadItem::Eof) => {
                        if remaining != 0 {
                            return Err(SendError::framing("body shorter than declared content-length"));
                        }
                        self.body = None;
                        Ok(())
                    }
                    (BodyFraming::Empty, PayloadItem::Eof) => {
                        self.body = None;
                        Ok(())
                    }
                    (BodyFraming::Empty, PayloadItem::Chunk(_)) => {
                        Err(SendError::framing("payload bytes on a response declared empty"))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{Response, StatusCode};

    fn head(status: StatusCode) -> ResponseHead {
        Response::builder().status(status).body(()).unwrap().into()
    }

    #[test]
    fn head_and_body_serialize() {
        let mut encoder = ResponseEncoder::new();
        let mut buf = BytesMut::new();

        encoder.encode(Message::Header((head(StatusCode::OK), PayloadSize::Length(5))), &mut buf).unwrap();
        encoder.encode(Message::Payload(PayloadItem::Chunk(Bytes::from_static(b"Hello"))), &mut buf).unwrap();
        encoder.encode(Message::Payload(PayloadItem::Eof), &mut buf).unwrap();

        let text = String::from_utf8(buf.to_vec()).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn over_length_body_rejected() {
        let mut encoder = ResponseEncoder::new();
        let mut buf = BytesMut::new();

        encoder.encode(Message::Header((head(StatusCode::OK), PayloadSize::Length(3))), &mut buf).unwrap();
        let err = encoder.encode(Message::Payload(PayloadItem::Chunk(Bytes::from_static(b"Hello"))), &mut buf).unwrap_err();
        assert!(matches!(err, SendError::Framing(_)));
    }

    #[test]
    fn short_body_rejected_at_eof() {
        let mut encoder = ResponseEncoder::new();
        let mut buf = BytesMut::new();

        encoder.encode(Message::Header((head(StatusCode::OK), PayloadSize::Length(5))), &mut buf).unwrap();
        encoder.encode(Message::Payload(PayloadItem::Chunk(Bytes::from_static(b"He"))), &mut buf).unwrap();
        let err = encoder.encode(Message::Payload(PayloadItem::Eof), &mut buf).unwrap_err();
        assert!(matches!(err, SendError::Framing(_)));
    }

    #[test]
    fn payload_after_unframed_head_rejected() {
        let mut encoder = ResponseEncoder::new();
        let mut buf = BytesMut::new();

        encoder.encode(Message::Header((head(StatusCode::OK), PayloadSize::Unframed)), &mut buf).unwrap();
        let err = encoder.encode(Message::Payload(PayloadItem::Chunk(Bytes::from_static(b"x"))), &mut buf).unwrap_err();
        assert!(matches!(err, SendError::Io(_)));
    }

    #[test]
    fn second_response_reuses_encoder() {
        let mut encoder = ResponseEncoder::new();
        let mut buf = BytesMut::new();

        encoder.encode(Message::Header((head(StatusCode::OK), PayloadSize::Empty)), &mut buf).unwrap();
        encoder.encode(Message::Payload(PayloadItem::Eof), &mut buf).unwrap();

        // the encoder is back in head state for the next keep-alive response
        encoder.encode(Message::Header((head(StatusCode::NOT_FOUND), PayloadSize::Empty)), &mut buf).unwrap();
        encoder.encode(Message::Payload(PayloadItem::Eof), &mut buf).unwrap();

        let text = String::from_utf8(buf.to_vec()).unwrap();
        assert!(text.contains("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("HTTP/1.1 404 Not Found\r\n"));
    }
}
