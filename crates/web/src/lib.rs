//! The embeddable web framework layered on `arbor-http`.
//!
//! Brings together the trie router with its route cache, the pooled
//! per-request [`Event`] context, the middleware chain and the server
//! orchestrator. A minimal embedding:
//!
//! ```no_run
//! use arbor_web::router::Router;
//! use arbor_web::server::Server;
//! use arbor_web::handler_fn;
//!
//! #[tokio::main]
//! async fn main() {
//!     let router = Router::builder()
//!         .get("/", handler_fn(|event| Box::pin(async move {
//!             event.send_text("Hello, World!").map_err(Into::into)
//!         })))
//!         .build()
//!         .unwrap();
//!
//!     Server::builder().router(router).bind("127.0.0.1", 3000).build().unwrap().start().await.unwrap();
//! }
//! ```

pub mod config;
pub mod event;
pub mod handler;
pub mod middleware;
pub mod router;
pub mod server;

mod date;

pub use event::{Event, EventError, PathParams};
pub use handler::{HandlerError, RequestHandler, handler_fn};
pub use middleware::{Middleware, Next, middleware_fn};

pub use arbor_http::protocol::StreamError;
pub use arbor_http::runtime::LoopHandle;
pub use arbor_http::sse::{SseEvent, SseWriter};
