//! The connection-facing request handler abstraction.
//!
//! [`HttpConnection`](crate::connection::HttpConnection) is generic over a
//! [`Handler`]; the web layer's server implements it by routing the request
//! through its middleware chain. Handlers receive the fully aggregated
//! request and answer with a [`ResponseBody`]-typed response; returning an
//! event-stream body diverts the connection to the streaming engine.
//!
//! # Examples
//!
//! ```no_run
//! use arbor_http::handler::make_handler;
//! use arbor_http::protocol::ResponseBody;
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use std::error::Error;
//!
//! async fn hello(_req: Request<Bytes>) -> Result<Response<ResponseBody>, Box<dyn Error + Send + Sync>> {
//!     Ok(Response::new(ResponseBody::from("Hello World!")))
//! }
//!
//! let handler = make_handler(hello);
//! ```

use crate::protocol::ResponseBody;
use bytes::Bytes;
use http::{Request, Response};
use std::error::Error;
use std::future::Future;

/// A handler for complete HTTP requests.
#[trait_variant::make(Handler: Send)]
pub trait LocalHandler: Sync {
    /// The error type returned by the handler
    type Error: Into<Box<dyn Error + Send + Sync>>;

    async fn call(&self, request: Request<Bytes>) -> Result<Response<ResponseBody>, Self::Error>;
}

/// Wrapper implementing [`Handler`] for async functions.
#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

impl<Err, F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Err: Into<Box<dyn Error + Send + Sync>>,
    Fut: Future<Output = Result<Response<ResponseBody>, Err>> + Send,
{
    type Error = Err;

    async fn call(&self, request: Request<Bytes>) -> Result<Response<ResponseBody>, Self::Error> {
        (self.f)(request).await
    }
}

/// Creates a [`Handler`] from an async function.
pub fn make_handler<F, Err, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Request<Bytes>) -> Fut,
    Err: Into<Box<dyn Error + Send + Sync>>,
    Fut: Future<Output = Result<Response<ResponseBody>, Err>>,
{
    HandlerFn { f }
}
