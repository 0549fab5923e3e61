//! Response head abstraction, the serializer-facing mirror of
//! [`RequestHeader`](super::RequestHeader).

use http::response::Parts;
use http::{HeaderMap, Response, StatusCode, Version};

/// The head of an HTTP response: status line plus header fields.
#[derive(Debug)]
pub struct ResponseHead {
    inner: Response<()>,
}

impl ResponseHead {
    /// Builds a head from response parts, discarding the body.
    pub fn from_parts(parts: Parts) -> Self {
        Self { inner: Response::from_parts(parts, ()) }
    }

    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }
}

impl<T> From<Response<T>> for ResponseHead {
    fn from(response: Response<T>) -> Self {
        let (parts, _body) = response.into_parts();
        Self::from_parts(parts)
    }
}
