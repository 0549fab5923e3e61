//! Server orchestrator.
//!
//! Owns the listener, the connection registry and the per-request dispatch:
//! accept (under the connection cap) → register → serve on a task. A sweep
//! task closes idle connections; graceful shutdown stops accepting, lets
//! in-flight responses finish and drains the registry.
//!
//! # Examples
//!
//! ```no_run
//! use arbor_web::router::Router;
//! use arbor_web::server::Server;
//! use arbor_web::handler_fn;
//!
//! #[tokio::main]
//! async fn main() {
//!     let router = Router::builder()
//!         .get("/", handler_fn(|event| Box::pin(async move { event.send_text("hi").map_err(Into::into) })))
//!         .build()
//!         .unwrap();
//!
//!     Server::builder().router(router).bind("127.0.0.1", 3000).build().unwrap().start().await.unwrap();
//! }
//! ```

use crate::config::ServerConfig;
use crate::date::DateService;
use crate::event::{Event, PathParams, Pool, PoolConfig};
use crate::handler::{HandlerError, RequestHandler, RouteHandler, handler_fn};
use crate::middleware::{Middleware, Next};
use crate::router::{RouteError, Router};

use arbor_http::connection::{ConnectionRegistry, HttpConnection};
use arbor_http::handler::Handler;
use arbor_http::protocol::ResponseBody;
use arbor_http::runtime;

use bytes::Bytes;
use http::header::{ALLOW, CONTENT_TYPE, DATE};
use http::{HeaderValue, Method, Request, Response, StatusCode};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// How often the idle sweep runs.
const SWEEP_PERIOD: Duration = Duration::from_secs(10);

/// How long graceful shutdown waits for connections to drain.
const DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Errors that can occur during server construction.
#[derive(Error, Debug)]
pub enum ServerBuildError {
    /// Router was not configured
    #[error("router must be set")]
    MissingRouter,
}

/// Errors surfaced by running the server.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

/// Installs a plain `INFO`-level subscriber; embedders with their own
/// tracing setup just skip this.
pub fn init_default_tracing() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Builder for configuring and constructing a [`Server`].
pub struct ServerBuilder {
    config: ServerConfig,
    router: Option<Router>,
    middlewares: Vec<Arc<dyn Middleware>>,
    default_handler: Option<Box<dyn RequestHandler>>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { config: ServerConfig::default(), router: None, middlewares: Vec::new(), default_handler: None }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the bind address from the config.
    pub fn bind(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.host = host.into();
        self.config.port = port;
        self
    }

    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    /// Appends a middleware; the chain runs in registration order.
    pub fn middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Handler for requests no route matches; defaults to a plain 404.
    pub fn default_handler<H: RequestHandler + 'static>(mut self, handler: H) -> Self {
        self.default_handler = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let router = self.router.ok_or(ServerBuildError::MissingRouter)?;
        let default_handler = self.default_handler.unwrap_or_else(|| Box::new(handler_fn(default_not_found)));

        let pool_config = PoolConfig {
            enabled: self.config.pools.event_pool_enabled,
            capacity: self.config.pools.event_pool_size,
            fallback: true,
        };
        let params_capacity = self.config.pools.params_pool_size;
        let event_pool = Pool::new(pool_config, move || Event::with_params_capacity(params_capacity));
        let date = DateService::new(self.config.date_header_max_age());

        Ok(Server {
            inner: Arc::new(ServerInner {
                router,
                middlewares: self.middlewares,
                default_handler,
                event_pool,
                date,
                registry: Arc::new(ConnectionRegistry::new()),
                shutdown: CancellationToken::new(),
                config: self.config,
            }),
        })
    }
}

fn default_not_found(event: &mut Event) -> futures::future::BoxFuture<'_, Result<(), HandlerError>> {
    Box::pin(async move {
        event.set_status(StatusCode::NOT_FOUND)?;
        event.send_text("404 Not Found")?;
        Ok(())
    })
}

/// The configured server, ready to bind.
pub struct Server {
    inner: Arc<ServerInner>,
}

/// Cancels accepts and starts a graceful drain when triggered.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { token: self.inner.shutdown.clone() }
    }

    /// Binds the listener; serving starts with [`BoundServer::run`].
    pub async fn bind(self) -> Result<BoundServer, ServerError> {
        let config = &self.inner.config;
        let listener = runtime::bind_listener(&config.host, config.port, config.backlog).await?;
        info!(addr = %listener.local_addr()?, "server listening");
        Ok(BoundServer { inner: self.inner, listener })
    }

    /// Binds and serves until shutdown.
    pub async fn start(self) -> Result<(), ServerError> {
        self.bind().await?.run().await
    }

    /// Builds a tokio runtime from the concurrency config and serves on it.
    ///
    /// `worker_threads = 0` selects a current-thread runtime, matching the
    /// single-loop deployment shape; anything else is a worker pool.
    pub fn run_blocking(self) -> Result<(), ServerError> {
        let concurrency = &self.inner.config.concurrency;

        let mut builder = if concurrency.worker_threads == 0 {
            tokio::runtime::Builder::new_current_thread()
        } else {
            let mut b = tokio::runtime::Builder::new_multi_thread();
            b.worker_threads(concurrency.worker_threads);
            b
        };
        if let Some(stack_size) = concurrency.thread_stack_size {
            builder.thread_stack_size(stack_size);
        }

        let rt = builder.enable_all().build()?;
        rt.block_on(self.start())
    }
}

/// A server with its listener bound.
pub struct BoundServer {
    inner: Arc<ServerInner>,
    listener: tokio::net::TcpListener,
}

impl BoundServer {
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { token: self.inner.shutdown.clone() }
    }

    /// Runs the accept loop until ctrl-c or a [`ShutdownHandle`] fires, then
    /// drains gracefully.
    pub async fn run(self) -> Result<(), ServerError> {
        let inner = self.inner;
        let shutdown = inner.shutdown.clone();

        let sweeper = spawn_sweep_task(Arc::clone(&inner.registry), inner.config.idle_timeout(), shutdown.clone());

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::signal::ctrl_c() => {
                    info!("ctrl-c received, shutting down");
                    shutdown.cancel();
                    break;
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, remote_addr) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            if inner.registry.active() >= inner.config.max_connections {
                warn!(%remote_addr, cap = inner.config.max_connections, "connection cap reached, closing socket");
                drop(stream);
                continue;
            }

            let guard = ConnectionRegistry::register(&inner.registry);
            guard.activity().touch();
            let inner = Arc::clone(&inner);

            tokio::spawn(async move {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "set_nodelay failed");
                }
                let (reader, writer) = stream.into_split();

                let connection = HttpConnection::new(reader, writer, inner.config.connection_config())
                    .with_registration(guard.activity(), guard.token());

                match connection.process(Arc::clone(&inner)).await {
                    Ok(()) => info!(%remote_addr, "connection finished"),
                    Err(e) => warn!(%remote_addr, cause = %e, "connection closed with error"),
                }
                drop(guard);
            });
        }

        info!("accept loop stopped, draining connections");
        inner.registry.cancel_all();

        let drain_deadline = tokio::time::Instant::now() + DRAIN_GRACE;
        while inner.registry.active() > 0 && tokio::time::Instant::now() < drain_deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        sweeper.abort();

        info!(remaining = inner.registry.active(), "server stopped");
        Ok(())
    }
}

fn spawn_sweep_task(
    registry: Arc<ConnectionRegistry>,
    idle_timeout: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let swept = registry.sweep_idle(idle_timeout);
                    if swept > 0 {
                        info!(swept, "idle sweep closed connections");
                    }
                }
            }
        }
    })
}

/// Everything a live connection needs to dispatch requests.
struct ServerInner {
    router: Router,
    middlewares: Vec<Arc<dyn Middleware>>,
    default_handler: Box<dyn RequestHandler>,
    event_pool: Pool<Event>,
    date: DateService,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
    config: ServerConfig,
}

enum Endpoint {
    Routed(Arc<RouteHandler>),
    Default,
}

impl Handler for ServerInner {
    type Error = HandlerError;

    async fn call(&self, request: Request<Bytes>) -> Result<Response<ResponseBody>, Self::Error> {
        let (parts, body) = request.into_parts();

        let (endpoint, params) = match self.router.match_route(&parts.method, parts.uri.path()) {
            Ok(resolution) => (Endpoint::Routed(resolution.handler), resolution.params),
            Err(RouteError::NotFound) => (Endpoint::Default, PathParams::empty()),
            Err(RouteError::MethodNotAllowed { allow }) => {
                debug!(method = %parts.method, path = parts.uri.path(), "method not allowed");
                return Ok(method_not_allowed_response(&allow));
            }
        };

        debug!(method = %parts.method, path = parts.uri.path(), "dispatching request");

        let mut event = self.event_pool.acquire()?;
        event.populate(parts, body, params);

        let endpoint_handler: &dyn RequestHandler = match &endpoint {
            Endpoint::Routed(handler) => handler.as_ref(),
            Endpoint::Default => self.default_handler.as_ref(),
        };

        let outcome = Next::new(&self.middlewares, endpoint_handler).run(&mut event).await;

        if let Err(e) = outcome {
            // the head never reaches the wire before dispatch finishes, so a
            // 500 is always still possible here, streaming included
            error!(error = %e, "handler chain failed, answering 500");
            self.event_pool.release(event);
            return Ok(plain_status_response(StatusCode::INTERNAL_SERVER_ERROR));
        }

        let mut response = event.take_response();
        self.event_pool.release(event);

        if !response.body().is_event_stream() && !response.headers().contains_key(DATE) {
            response.headers_mut().insert(DATE, self.date.header_value());
        }

        Ok(response)
    }
}

fn plain_status_response(status: StatusCode) -> Response<ResponseBody> {
    let text = format!("{} {}", status.as_str(), status.canonical_reason().unwrap_or("Unknown"));
    let mut response = Response::new(ResponseBody::from(text));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

fn method_not_allowed_response(allow: &[Method]) -> Response<ResponseBody> {
    let mut response = plain_status_response(StatusCode::METHOD_NOT_ALLOWED);

    let allow_list = allow.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
    if let Ok(value) = HeaderValue::from_str(&allow_list) {
        response.headers_mut().insert(ALLOW, value);
    }
    response
}
