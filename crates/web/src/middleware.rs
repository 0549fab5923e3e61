//! Ordered middleware chain.
//!
//! Middleware wrap the routed handler: each one receives the event plus a
//! [`Next`] and decides whether to call through. Not calling `next` short-
//! circuits the chain and the response set so far is used. Errors propagate
//! to the server, which answers 500 unless the response head was already
//! committed to the streaming engine.

use crate::event::Event;
use crate::handler::{HandlerError, RequestHandler};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// One step in the chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, event: &mut Event, next: Next<'_>) -> Result<(), HandlerError>;
}

/// The remainder of the chain, ending in the routed handler.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn RequestHandler,
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Middleware>], endpoint: &'a dyn RequestHandler) -> Self {
        Self { chain, endpoint }
    }

    /// Runs the next middleware, or the endpoint once the chain is spent.
    pub async fn run(self, event: &mut Event) -> Result<(), HandlerError> {
        match self.chain.split_first() {
            Some((head, rest)) => head.handle(event, Next { chain: rest, endpoint: self.endpoint }).await,
            None => self.endpoint.invoke(event).await,
        }
    }
}

/// Wrapper implementing [`Middleware`] for closures.
pub struct MiddlewareFn<F> {
    f: F,
}

#[async_trait]
impl<F> Middleware for MiddlewareFn<F>
where
    F: for<'a> Fn(&'a mut Event, Next<'a>) -> BoxFuture<'a, Result<(), HandlerError>> + Send + Sync,
{
    async fn handle(&self, event: &mut Event, next: Next<'_>) -> Result<(), HandlerError> {
        // reborrow so the event and chain lifetimes unify on the shorter one
        (self.f)(&mut *event, next).await
    }
}

/// Creates a [`Middleware`] from a closure.
pub fn middleware_fn<F>(f: F) -> MiddlewareFn<F>
where
    F: for<'a> Fn(&'a mut Event, Next<'a>) -> BoxFuture<'a, Result<(), HandlerError>> + Send + Sync,
{
    MiddlewareFn { f }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, PathParams};
    use crate::handler::handler_fn;
    use bytes::Bytes;
    use http::{Method, Request, StatusCode};

    fn test_event() -> Event {
        let (parts, ()) = Request::builder().method(Method::GET).uri("/").body(()).unwrap().into_parts();
        let mut event = Event::with_params_capacity(0);
        event.populate(parts, Bytes::new(), PathParams::empty());
        event
    }

    #[tokio::test]
    async fn chain_runs_in_order_around_the_endpoint() {
        let endpoint = handler_fn(|event: &mut Event| {
            Box::pin(async move {
                event.set_header("x-trace", "endpoint")?;
                Ok(())
            })
        });

        let first = Arc::new(middleware_fn(|event: &mut Event, next: Next<'_>| {
            Box::pin(async move {
                event.set_header("x-first", "in")?;
                next.run(event).await?;
                event.set_header("x-first-after", "out")?;
                Ok(())
            })
        })) as Arc<dyn Middleware>;

        let second = Arc::new(middleware_fn(|event: &mut Event, next: Next<'_>| {
            Box::pin(async move {
                event.set_header("x-second", "in")?;
                next.run(event).await
            })
        })) as Arc<dyn Middleware>;

        let chain = vec![first, second];
        let mut event = test_event();
        Next::new(&chain, &endpoint).run(&mut event).await.unwrap();

        let response = event.take_response();
        assert_eq!(response.headers().get("x-first").unwrap(), "in");
        assert_eq!(response.headers().get("x-second").unwrap(), "in");
        assert_eq!(response.headers().get("x-trace").unwrap(), "endpoint");
        assert_eq!(response.headers().get("x-first-after").unwrap(), "out");
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        let endpoint = handler_fn(|_event: &mut Event| {
            Box::pin(async move { panic!("endpoint must not run") })
        });

        let gate = Arc::new(middleware_fn(|event: &mut Event, _next: Next<'_>| {
            Box::pin(async move {
                event.set_status(StatusCode::UNAUTHORIZED)?;
                event.send_text("denied")?;
                Ok(())
            })
        })) as Arc<dyn Middleware>;

        let chain = vec![gate];
        let mut event = test_event();
        Next::new(&chain, &endpoint).run(&mut event).await.unwrap();

        let response = event.take_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn errors_propagate_to_the_caller() {
        let endpoint = handler_fn(|_event: &mut Event| Box::pin(async move { Err("inner failure".into()) }));

        let passthrough = Arc::new(middleware_fn(|event: &mut Event, next: Next<'_>| {
            Box::pin(async move { next.run(event).await })
        })) as Arc<dyn Middleware>;

        let chain = vec![passthrough];
        let mut event = test_event();
        let error = Next::new(&chain, &endpoint).run(&mut event).await.unwrap_err();
        assert_eq!(error.to_string(), "inner failure");
    }
}
