//! Decoder for chunked transfer encoding on the ingress path
//! ([RFC 9112 §7.1](https://www.rfc-editor.org/rfc/rfc9112.html#name-chunked-transfer-coding)).
//!
//! Each chunk carries its size in hex, optional extensions, CRLF, the data,
//! and a trailing CRLF; a zero-size chunk ends the body, optionally followed
//! by trailer fields. Extensions and trailers are validated but ignored.

use crate::protocol::{ParseError, PayloadItem};
use ChunkedState::*;
use bytes::{Buf, Bytes, BytesMut};
use std::task::Poll;
use tokio_util::codec::Decoder;
use tracing::trace;

/// Incremental chunked-body decoder.
///
/// Byte-at-a-time for framing, bulk `split_to` for chunk data, so partial
/// chunks stream out without waiting for the chunk to complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    remaining: u64,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: Size, remaining: 0 }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Hex chunk size
    Size,
    /// Whitespace after the size
    SizeLws,
    /// Chunk extension, skipped
    Extension,
    /// LF ending the size line
    SizeLf,
    /// Chunk data
    Body,
    /// CR after chunk data
    BodyCr,
    /// LF after chunk data
    BodyLf,
    /// Trailer field, skipped
    Trailer,
    /// LF ending a trailer field
    TrailerLf,
    /// CR of the final empty line
    EndCr,
    /// LF of the final empty line
    EndLf,
    /// Terminal state
    End,
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.state == End {
                trace!("finished reading chunked body");
                return Ok(Some(PayloadItem::Eof));
            }

            if src.is_empty() {
                return Ok(None);
            }

            let mut chunk = None;

            self.state = match self.state.step(src, &mut self.remaining, &mut chunk) {
                Poll::Pending => return Ok(None),
                Poll::Ready(Ok(next)) => next,
                Poll::Ready(Err(e)) => return Err(e),
            };

            if let Some(bytes) = chunk {
                trace!(len = bytes.len(), "read chunked bytes");
                return Ok(Some(PayloadItem::Chunk(bytes)));
            }
        }
    }
}

macro_rules! try_next_byte {
    ($src:ident) => {{
        if $src.len() > 0 {
            $src.get_u8()
        } else {
            return Poll::Pending;
        }
    }};
}

impl ChunkedState {
    fn step(self, src: &mut BytesMut, remaining: &mut u64, chunk: &mut Option<Bytes>) -> Poll<Result<ChunkedState, ParseError>> {
        match self {
            Size => ChunkedState::read_size(src, remaining),
            SizeLws => ChunkedState::read_size_lws(src),
            Extension => ChunkedState::read_extension(src),
            SizeLf => ChunkedState::read_size_lf(src, *remaining),
            Body => ChunkedState::read_body(src, remaining, chunk),
            BodyCr => ChunkedState::expect(src, b'\r', BodyLf, "chunk data must end with CRLF"),
            BodyLf => ChunkedState::expect(src, b'\n', Size, "chunk data must end with CRLF"),
            Trailer => ChunkedState::read_trailer(src),
            TrailerLf => ChunkedState::expect(src, b'\n', EndCr, "trailer line must end with CRLF"),
            EndCr => ChunkedState::read_end_cr(src),
            EndLf => ChunkedState::expect(src, b'\n', End, "chunked body must end with CRLF"),
            End => unreachable!("decode() returns before stepping out of the End state"),
        }
    }

    /// Accumulates hex digits of the chunk size until a delimiter.
    fn read_size(src: &mut BytesMut, size: &mut u64) -> Poll<Result<ChunkedState, ParseError>> {
        macro_rules! or_overflow {
            ($e:expr) => {
                match $e {
                    Some(value) => value,
                    None => return Poll::Ready(Err(ParseError::bad_body("chunk size overflows u64"))),
                }
            };
        }

        let digit = match try_next_byte!(src) {
            b @ b'0'..=b'9' => b - b'0',
            b @ b'a'..=b'f' => b + 10 - b'a',
            b @ b'A'..=b'F' => b + 10 - b'A',
            b'\t' | b' ' => return Poll::Ready(Ok(SizeLws)),
            b';' => return Poll::Ready(Ok(Extension)),
            b'\r' => return Poll::Ready(Ok(SizeLf)),
            _ => return Poll::Ready(Err(ParseError::bad_body("invalid chunk size digit"))),
        };

        *size = or_overflow!(size.checked_mul(16));
        *size = or_overflow!(size.checked_add(u64::from(digit)));

        Poll::Ready(Ok(Size))
    }

    /// Whitespace may follow the size, but no further digits.
    fn read_size_lws(src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
        match try_next_byte!(src) {
            b'\t' | b' ' => Poll::Ready(Ok(SizeLws)),
            b';' => Poll::Ready(Ok(Extension)),
            b'\r' => Poll::Ready(Ok(SizeLf)),
            _ => Poll::Ready(Err(ParseError::bad_body("invalid whitespace after chunk size"))),
        }
    }

    /// Extensions end at CRLF. A bare LF inside an extension is rejected.
    fn read_extension(src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
        match try_next_byte!(src) {
            b'\r' => Poll::Ready(Ok(SizeLf)),
            b'\n' => Poll::Ready(Err(ParseError::bad_body("chunk extension contains bare LF"))),
            _ => Poll::Ready(Ok(Extension)),
        }
    }

    fn read_size_lf(src: &mut BytesMut, size: u64) -> Poll<Result<ChunkedState, ParseError>> {
        match try_next_byte!(src) {
            b'\n' if size == 0 => Poll::Ready(Ok(EndCr)),
            b'\n' => Poll::Ready(Ok(Body)),
            _ => Poll::Ready(Err(ParseError::bad_body("chunk size line must end with CRLF"))),
        }
    }

    /// Splits off as much chunk data as is buffered, up to the chunk size.
    fn read_body(src: &mut BytesMut, remaining: &mut u64, chunk: &mut Option<Bytes>) -> Poll<Result<ChunkedState, ParseError>> {
        if src.is_empty() {
            return Poll::Ready(Ok(Body));
        }

        if *remaining == 0 {
            return Poll::Ready(Ok(BodyCr));
        }

        let take = std::cmp::min(usize::try_from(*remaining).unwrap_or(usize::MAX), src.len());
        *remaining -= take as u64;
        *chunk = Some(src.split_to(take).freeze());

        if *remaining > 0 { Poll::Ready(Ok(Body)) } else { Poll::Ready(Ok(BodyCr)) }
    }

    /// Trailer fields are read and discarded.
    fn read_trailer(src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
        match try_next_byte!(src) {
            b'\r' => Poll::Ready(Ok(TrailerLf)),
            _ => Poll::Ready(Ok(Trailer)),
        }
    }

    /// Anything other than CR here starts a trailer field.
    fn read_end_cr(src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
        match try_next_byte!(src) {
            b'\r' => Poll::Ready(Ok(EndLf)),
            _ => Poll::Ready(Ok(Trailer)),
        }
    }

    fn expect(src: &mut BytesMut, byte: u8, next: ChunkedState, reason: &str) -> Poll<Result<ChunkedState, ParseError>> {
        match try_next_byte!(src) {
            b if b == byte => Poll::Ready(Ok(next)),
            _ => Poll::Ready(Err(ParseError::bad_body(reason))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk_then_eof() {
        let mut buffer = BytesMut::from(&b"10\r\n1234567890abcdef\r\n0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        let item = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&item.as_bytes().unwrap()[..], b"1234567890abcdef");

        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn multiple_chunks() {
        let mut buffer = BytesMut::from(&b"5\r\nhello\r\n7\r\n, world\r\n0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&chunk.as_bytes().unwrap()[..], b"hello");

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&chunk.as_bytes().unwrap()[..], b", world");

        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn extensions_are_skipped() {
        let mut buffer = BytesMut::from(&b"5;name=value\r\nhello\r\n0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&chunk.as_bytes().unwrap()[..], b"hello");
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn trailers_are_skipped() {
        let mut buffer = BytesMut::from(&b"5\r\nhello\r\n0\r\nExpires: never\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&chunk.as_bytes().unwrap()[..], b"hello");
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn partial_chunk_streams_incrementally() {
        let mut buffer = BytesMut::from(&b"5\r\nhel"[..]);
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&chunk.as_bytes().unwrap()[..], b"hel");

        buffer.extend_from_slice(b"lo\r\n0\r\n\r\n");
        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&chunk.as_bytes().unwrap()[..], b"lo");

        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn invalid_size_digit_rejected() {
        let mut buffer = BytesMut::from(&b"xyz\r\n"[..]);
        assert!(ChunkedDecoder::new().decode(&mut buffer).is_err());
    }

    #[test]
    fn missing_chunk_crlf_rejected() {
        let mut buffer = BytesMut::from(&b"5\r\nhelloBad"[..]);
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&chunk.as_bytes().unwrap()[..], b"hello");

        assert!(decoder.decode(&mut buffer).is_err());
    }

    #[test]
    fn zero_size_chunk_is_eof() {
        let mut buffer = BytesMut::from(&b"0\r\n\r\n"[..]);
        assert!(ChunkedDecoder::new().decode(&mut buffer).unwrap().unwrap().is_eof());
    }
}
