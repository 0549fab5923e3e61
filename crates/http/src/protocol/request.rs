//! Request head abstraction.
//!
//! Wraps `http::Request<()>` so the codec and the connection can pass the
//! parsed head around without committing to a body representation, and attach
//! the aggregated body later via [`RequestHeader::body`].

use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version};

/// The parsed head of an HTTP request.
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl RequestHeader {
    /// Consumes the header and returns the inner `Request<()>`.
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    /// Attaches a body, turning the head into a full `Request<T>`.
    pub fn body<T>(self, body: T) -> Request<T> {
        self.inner.map(|_| body)
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Whether a message body may follow this head.
    ///
    /// GET, HEAD, DELETE, OPTIONS and CONNECT requests are treated as
    /// body-less regardless of framing headers.
    pub fn may_have_body(&self) -> bool {
        !matches!(self.method(), &Method::GET | &Method::HEAD | &Method::DELETE | &Method::OPTIONS | &Method::CONNECT)
    }

    /// Whether this request negotiates keep-alive.
    ///
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close` is present;
    /// HTTP/1.0 requires an explicit `Connection: keep-alive`.
    pub fn keep_alive(&self) -> bool {
        let connection = self.headers().get(http::header::CONNECTION).and_then(|v| v.to_str().ok());

        match self.version() {
            Version::HTTP_11 => !connection.is_some_and(|v| v.eq_ignore_ascii_case("close")),
            Version::HTTP_10 => connection.is_some_and(|v| v.eq_ignore_ascii_case("keep-alive")),
            _ => false,
        }
    }
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}
