//! Per-socket connection handling.
//!
//! [`HttpConnection`] drives one TCP peer through the request/response
//! lifecycle; [`ConnectionRegistry`] tracks live connections so the server
//! can cap concurrency, sweep idle peers and drain on shutdown.

mod http_connection;
mod registry;

pub use http_connection::{ConnState, ConnectionConfig, HttpConnection};
pub use registry::{Activity, ConnectionGuard, ConnectionRegistry};
