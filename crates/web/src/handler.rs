//! Handler abstractions for routed requests.
//!
//! [`RequestHandler`] is the object-safe trait routes and middleware chains
//! terminate in; handlers mutate the [`Event`] rather than returning a
//! response value. [`RouteHandler`] tags each registered route with its
//! dispatch shape: a unary handler, a stream handler, or a stream handler
//! that also wants loop timers — the streaming shapes are dispatched by
//! starting SSE on the event and installing the pending stream action.

use crate::event::Event;
use arbor_http::runtime::LoopHandle;
use arbor_http::sse::{SseWriter, StreamAction};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::error::Error;
use std::sync::Arc;

/// Error type handlers and middleware propagate.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// An async handler operating on the request context.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn invoke(&self, event: &mut Event) -> Result<(), HandlerError>;
}

/// Wrapper implementing [`RequestHandler`] for closures.
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F> RequestHandler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Event) -> BoxFuture<'a, Result<(), HandlerError>> + Send + Sync,
{
    async fn invoke(&self, event: &mut Event) -> Result<(), HandlerError> {
        (self.f)(event).await
    }
}

/// Creates a [`RequestHandler`] from a closure returning a boxed future.
///
/// ```
/// use arbor_web::handler_fn;
///
/// let handler = handler_fn(|event| {
///     Box::pin(async move { event.send_text("Hello, World!").map_err(Into::into) })
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Event) -> BoxFuture<'a, Result<(), HandlerError>> + Send + Sync,
{
    HandlerFn { f }
}

/// Stream logic shared by every request hitting a stream route.
pub type StreamFn = dyn Fn(SseWriter) -> BoxFuture<'static, ()> + Send + Sync;

/// Stream logic that also receives the loop handle.
pub type StreamWithLoopFn = dyn Fn(SseWriter, LoopHandle) -> BoxFuture<'static, ()> + Send + Sync;

/// A registered route's handler, tagged by dispatch shape.
pub enum RouteHandler {
    /// Ordinary request/response handler
    Unary(Box<dyn RequestHandler>),
    /// SSE handler; the adapter starts streaming and installs the action
    Stream(Arc<StreamFn>),
    /// SSE handler with loop timers
    StreamWithLoop(Arc<StreamWithLoopFn>),
}

#[async_trait]
impl RequestHandler for RouteHandler {
    async fn invoke(&self, event: &mut Event) -> Result<(), HandlerError> {
        match self {
            RouteHandler::Unary(handler) => handler.invoke(event).await,
            RouteHandler::Stream(stream) => {
                event.start_sse()?;
                let stream = Arc::clone(stream);
                event.install_stream_action(StreamAction::Task(Box::new(move |writer| stream(writer))))?;
                Ok(())
            }
            RouteHandler::StreamWithLoop(stream) => {
                event.start_sse()?;
                let stream = Arc::clone(stream);
                event.install_stream_action(StreamAction::TaskWithLoop(Box::new(move |writer, handle| {
                    stream(writer, handle)
                })))?;
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for RouteHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteHandler::Unary(_) => f.write_str("RouteHandler::Unary"),
            RouteHandler::Stream(_) => f.write_str("RouteHandler::Stream"),
            RouteHandler::StreamWithLoop(_) => f.write_str("RouteHandler::StreamWithLoop"),
        }
    }
}
