//! Request head decoder.
//!
//! Parses the request line and header fields with `httparse`, then converts
//! the result into a typed [`RequestHeader`] plus the [`PayloadSize`] derived
//! from the framing headers.
//!
//! Parsing is zero-copy where it matters: after `httparse` reports a complete
//! head, the head bytes are split off the read buffer and frozen, and each
//! header value becomes a refcounted slice of that region. Names normalize to
//! lowercase on the way into `http::HeaderMap`, which is also what makes
//! lookups case-insensitive.
//!
//! # Limits
//!
//! - at most [`MAX_HEADER_NUM`] header fields
//! - head size bounded by the configured `max_header_bytes`
//! - only HTTP/1.0 and HTTP/1.1

use bytes::BytesMut;
use http::{HeaderName, HeaderValue, Request};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, RequestHeader};

/// Maximum number of header fields allowed in a request.
pub const MAX_HEADER_NUM: usize = 64;

/// Decoder for the request head.
///
/// Produces the typed head and the payload framing in one step so the caller
/// can immediately switch to body decoding.
#[derive(Debug, Clone)]
pub struct HeaderDecoder {
    max_header_bytes: usize,
}

impl HeaderDecoder {
    pub fn new(max_header_bytes: usize) -> Self {
        Self { max_header_bytes }
    }
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self::new(8 * 1024)
    }
}

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // shortest parseable request: "GET / HTTP/1.1\r\n\r\n"
        if src.len() < 14 {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut parser = httparse::Request::new(&mut headers);

        let parsed = parser.parse(src).map_err(|e| match e {
            httparse::Error::TooManyHeaders => ParseError::HeaderCountExceeded { cap: MAX_HEADER_NUM },
            httparse::Error::Version => ParseError::UnsupportedVersion(None),
            httparse::Error::Token => ParseError::BadMethod,
            e => ParseError::bad_header(e),
        })?;

        match parsed {
            Status::Complete(head_size) => {
                trace!(head_size, "parsed request head");
                ensure!(
                    head_size <= self.max_header_bytes,
                    ParseError::HeaderTooLarge { got: head_size, cap: self.max_header_bytes }
                );

                let version = match parser.version {
                    Some(0) => http::Version::HTTP_10,
                    Some(1) => http::Version::HTTP_11,
                    v => return Err(ParseError::UnsupportedVersion(v)),
                };

                let header_count = parser.headers.len();
                let mut spans: [FieldSpan; MAX_HEADER_NUM] = [FieldSpan::EMPTY; MAX_HEADER_NUM];
                FieldSpan::record(src, parser.headers, &mut spans);

                let mut builder = Request::builder()
                    .method(parser.method.ok_or(ParseError::BadMethod)?)
                    .uri(parser.path.ok_or(ParseError::BadTarget)?)
                    .version(version);

                // builder is still well-formed here, headers_mut cannot fail
                let headers = builder.headers_mut().ok_or(ParseError::BadTarget)?;
                headers.reserve(header_count);

                let head_bytes = src.split_to(head_size).freeze();
                for span in &spans[..header_count] {
                    let name = HeaderName::from_bytes(&head_bytes[span.name.0..span.name.1])
                        .map_err(ParseError::bad_header)?;
                    let value = HeaderValue::from_maybe_shared(head_bytes.slice(span.value.0..span.value.1))
                        .map_err(ParseError::bad_header)?;
                    headers.append(name, value);
                }

                let header = RequestHeader::from(builder.body(()).map_err(|_| ParseError::BadTarget)?);
                let payload_size = parse_payload_size(&header)?;

                Ok(Some((header, payload_size)))
            }
            Status::Partial => {
                ensure!(
                    src.len() <= self.max_header_bytes,
                    ParseError::HeaderTooLarge { got: src.len(), cap: self.max_header_bytes }
                );
                Ok(None)
            }
        }
    }
}

/// Byte ranges of one header field inside the head region.
///
/// Recording positions instead of copying lets the header map share the
/// frozen head buffer.
#[derive(Clone, Copy)]
struct FieldSpan {
    name: (usize, usize),
    value: (usize, usize),
}

impl FieldSpan {
    const EMPTY: FieldSpan = FieldSpan { name: (0, 0), value: (0, 0) };

    fn record(bytes: &[u8], headers: &[httparse::Header<'_>], spans: &mut [FieldSpan]) {
        let base = bytes.as_ptr() as usize;
        for (header, span) in headers.iter().zip(spans.iter_mut()) {
            let name_start = header.name.as_ptr() as usize - base;
            span.name = (name_start, name_start + header.name.len());
            let value_start = header.value.as_ptr() as usize - base;
            span.value = (value_start, value_start + header.value.len());
        }
    }
}

/// Derives the body framing from the head, per RFC 9112 §6.
///
/// Content-Length and Transfer-Encoding together are rejected; a chunked
/// Transfer-Encoding must list `chunked` last.
fn parse_payload_size(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    if !header.may_have_body() {
        return Ok(PayloadSize::Empty);
    }

    let te_header = header.headers().get(http::header::TRANSFER_ENCODING);
    let cl_header = header.headers().get(http::header::CONTENT_LENGTH);

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::Empty),

        (te_value @ Some(_), None) => {
            if is_chunked(te_value) {
                Ok(PayloadSize::Chunked)
            } else {
                Ok(PayloadSize::Empty)
            }
        }

        (None, Some(cl_value)) => {
            let cl_str = cl_value.to_str().map_err(|_| ParseError::bad_content_length("value is not visible ascii"))?;
            let length =
                cl_str.trim().parse::<u64>().map_err(|_| ParseError::bad_content_length(format!("value {cl_str} is not u64")))?;
            Ok(PayloadSize::Length(length))
        }

        (Some(_), Some(_)) => Err(ParseError::bad_content_length("transfer-encoding and content-length both present")),
    }
}

fn is_chunked(header_value: Option<&HeaderValue>) -> bool {
    const CHUNKED: &[u8] = b"chunked";
    if let Some(value) = header_value
        && let Some(last) = value.as_bytes().rsplit(|b| *b == b',').next()
    {
        return last.trim_ascii() == CHUNKED;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, Method, Version};
    use indoc::indoc;

    #[test]
    fn check_is_chunked() {
        let mut headers = HeaderMap::new();
        assert!(!is_chunked(headers.get(http::header::TRANSFER_ENCODING)));

        headers.insert("Transfer-Encoding", "gzip, chunked".parse().unwrap());
        assert!(is_chunked(headers.get(http::header::TRANSFER_ENCODING)));

        headers.insert("Transfer-Encoding", "chunked, gzip".parse().unwrap());
        assert!(!is_chunked(headers.get(http::header::TRANSFER_ENCODING)));

        headers.insert("Transfer-Encoding", "gzip".parse().unwrap());
        assert!(!is_chunked(headers.get(http::header::TRANSFER_ENCODING)));
    }

    #[test]
    fn head_is_split_from_buffer() {
        let str = indoc! {r##"
        GET /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        123"##};

        let mut bytes = BytesMut::from(str);
        let result = HeaderDecoder::default().decode(&mut bytes).unwrap();
        assert!(result.is_some());

        // the body remains in the buffer
        assert_eq!(&bytes[..], &b"123"[..]);
    }

    #[test]
    fn parses_simple_get() {
        let str = indoc! {r##"
        GET /index.html?a=1&b=2 HTTP/1.1
        Host: 127.0.0.1:8080
        Accept: */*

        "##};

        let mut buf = BytesMut::from(str);
        let (header, payload_size) = HeaderDecoder::default().decode(&mut buf).unwrap().unwrap();

        assert!(payload_size.is_empty());
        assert_eq!(header.method(), &Method::GET);
        assert_eq!(header.version(), Version::HTTP_11);
        assert_eq!(header.uri().path(), "/index.html");
        assert_eq!(header.uri().query(), Some("a=1&b=2"));
        assert_eq!(header.headers().len(), 2);
        assert_eq!(header.headers().get(http::header::HOST).unwrap(), "127.0.0.1:8080");
        // lookups are case-insensitive
        assert_eq!(header.headers().get("accept").unwrap(), "*/*");
    }

    #[test]
    fn needs_more_on_partial_head() {
        let mut buf = BytesMut::from("GET /index.html HTTP/1.1\r\nHost: example");
        assert!(HeaderDecoder::default().decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn content_length_selects_length_payload() {
        let mut buf = BytesMut::from("POST /upload HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello");
        let (_, payload_size) = HeaderDecoder::default().decode(&mut buf).unwrap().unwrap();
        assert_eq!(payload_size, PayloadSize::Length(5));
    }

    #[test]
    fn both_framing_headers_rejected() {
        let mut buf = BytesMut::from("POST /upload HTTP/1.1\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\n");
        let err = HeaderDecoder::default().decode(&mut buf).unwrap_err();
        assert!(matches!(err, ParseError::BadContentLength(_)));
    }

    #[test]
    fn oversized_head_rejected_while_partial() {
        let mut buf = BytesMut::from("GET / HTTP/1.1\r\n");
        let filler = "X-Filler: y\r\n".repeat(40);
        buf.extend_from_slice(filler.as_bytes());

        let err = HeaderDecoder::new(256).decode(&mut buf).unwrap_err();
        assert!(matches!(err, ParseError::HeaderTooLarge { .. }));
    }

    #[test]
    fn unsupported_version_rejected() {
        let mut buf = BytesMut::from("GET / HTTP/2.0\r\nHost: x\r\n\r\n");
        let err = HeaderDecoder::default().decode(&mut buf).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedVersion(_) | ParseError::BadHeader(_)));
    }
}
