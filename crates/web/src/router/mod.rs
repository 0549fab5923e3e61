//! Request routing.
//!
//! Routes are registered on a [`RouterBuilder`] and frozen into a [`Router`]
//! before serving; the route table is immutable while the server runs, which
//! is what lets lookups go lock-free through the trie. A bounded LRU cache
//! short-circuits repeated `(method, path)` resolutions and is invalidated
//! whenever the table is (re)built.
//!
//! # Examples
//!
//! ```
//! use arbor_web::router::Router;
//! use arbor_web::handler_fn;
//!
//! let router = Router::builder()
//!     .get("/hello/:name", handler_fn(|event| Box::pin(async move {
//!         let greeting = format!("Hello, {}!", event.param("name").unwrap_or("world"));
//!         event.send_text(greeting).map_err(Into::into)
//!     })))
//!     .build()
//!     .unwrap();
//! # let _ = router;
//! ```

mod cache;
mod trie;

pub use cache::CacheStats;
pub use trie::{RouteError, RouteMatch, RouterBuildError};

use crate::config::RouterConfig;
use crate::handler::{RequestHandler, RouteHandler, StreamFn, StreamWithLoopFn};
use arbor_http::runtime::LoopHandle;
use arbor_http::sse::SseWriter;
use cache::RouteCache;
use futures::future::BoxFuture;
use http::Method;
use std::sync::Arc;
use tracing::debug;
use trie::Trie;

/// Methods covered by [`RouterBuilder::any`].
const ANY_METHODS: [Method; 7] =
    [Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::HEAD, Method::OPTIONS];

/// The frozen route table plus its resolution cache.
pub struct Router {
    trie: Trie,
    cache: Option<RouteCache>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Resolves a request, consulting the cache first.
    pub fn match_route(&self, method: &Method, path: &str) -> Result<RouteMatch, RouteError> {
        if let Some(cache) = &self.cache
            && let Some(resolution) = cache.get(method, path)
        {
            return Ok(resolution);
        }

        let resolution = self.trie.match_path(method, path)?;

        if let Some(cache) = &self.cache {
            cache.insert(method.clone(), path, resolution.clone());
        }

        Ok(resolution)
    }

    /// Clears the route cache. Runs automatically when the table is built.
    pub fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(RouteCache::stats)
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").field("cache", &self.cache_stats()).finish()
    }
}

enum PendingHandler {
    One(Method, RouteHandler),
    Any(RouteHandler),
}

/// Collects routes and cache settings, then freezes them into a [`Router`].
pub struct RouterBuilder {
    routes: Vec<(String, PendingHandler)>,
    cache_enabled: bool,
    cache_capacity: usize,
}

macro_rules! method_route {
    ($name:ident, $method:expr) => {
        #[doc = concat!("Registers a handler for `", stringify!($name), "` requests on `pattern`.")]
        pub fn $name<H: RequestHandler + 'static>(self, pattern: impl Into<String>, handler: H) -> Self {
            self.route($method, pattern, handler)
        }
    };
}

impl RouterBuilder {
    fn new() -> Self {
        Self { routes: Vec::new(), cache_enabled: true, cache_capacity: 1024 }
    }

    /// Registers a handler for one method + pattern.
    pub fn route<H: RequestHandler + 'static>(mut self, method: Method, pattern: impl Into<String>, handler: H) -> Self {
        self.routes.push((pattern.into(), PendingHandler::One(method, RouteHandler::Unary(Box::new(handler)))));
        self
    }

    method_route!(get, Method::GET);
    method_route!(post, Method::POST);
    method_route!(put, Method::PUT);
    method_route!(patch, Method::PATCH);
    method_route!(delete, Method::DELETE);
    method_route!(head, Method::HEAD);
    method_route!(options, Method::OPTIONS);

    /// Registers a handler for every supported method.
    pub fn any<H: RequestHandler + 'static>(mut self, pattern: impl Into<String>, handler: H) -> Self {
        self.routes.push((pattern.into(), PendingHandler::Any(RouteHandler::Unary(Box::new(handler)))));
        self
    }

    /// Registers an SSE stream route; every request hitting it starts a
    /// stream and runs `stream` once the head is flushed.
    pub fn stream<F, Fut>(mut self, method: Method, pattern: impl Into<String>, stream: F) -> Self
    where
        F: Fn(SseWriter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let stream: Arc<StreamFn> = Arc::new(move |writer| Box::pin(stream(writer)) as BoxFuture<'static, ()>);
        self.routes.push((pattern.into(), PendingHandler::One(method, RouteHandler::Stream(stream))));
        self
    }

    /// Registers an SSE stream route whose handler also drives loop timers.
    pub fn stream_with_loop<F, Fut>(mut self, method: Method, pattern: impl Into<String>, stream: F) -> Self
    where
        F: Fn(SseWriter, LoopHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let stream: Arc<StreamWithLoopFn> =
            Arc::new(move |writer, handle| Box::pin(stream(writer, handle)) as BoxFuture<'static, ()>);
        self.routes.push((pattern.into(), PendingHandler::One(method, RouteHandler::StreamWithLoop(stream))));
        self
    }

    /// Applies the router section of the server configuration.
    pub fn with_config(mut self, config: &RouterConfig) -> Self {
        self.cache_enabled = config.cache_enabled;
        self.cache_capacity = config.cache_capacity;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }

    /// Freezes the table, validating every pattern.
    pub fn build(self) -> Result<Router, RouterBuildError> {
        let mut trie = Trie::default();
        let mut count = 0usize;

        for (pattern, pending) in self.routes {
            match pending {
                PendingHandler::One(method, handler) => {
                    trie.insert(method, &pattern, Arc::new(handler))?;
                    count += 1;
                }
                PendingHandler::Any(handler) => {
                    let handler = Arc::new(handler);
                    for method in ANY_METHODS {
                        trie.insert(method, &pattern, Arc::clone(&handler))?;
                        count += 1;
                    }
                }
            }
        }

        let router = Router {
            trie,
            cache: self.cache_enabled.then(|| RouteCache::new(self.cache_capacity)),
        };
        router.invalidate_cache();

        debug!(routes = count, cache_enabled = self.cache_enabled, "route table built");
        Ok(router)
    }
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;

    fn tagged(tag: &'static str) -> impl RequestHandler + 'static {
        handler_fn(move |event| Box::pin(async move { event.send_text(tag).map_err(Into::into) }))
    }

    fn router() -> Router {
        Router::builder()
            .get("/", tagged("root"))
            .get("/users/:id", tagged("user"))
            .post("/users", tagged("create"))
            .any("/health", tagged("health"))
            .build()
            .unwrap()
    }

    #[test]
    fn resolves_registered_routes() {
        let router = router();

        assert!(router.match_route(&Method::GET, "/").is_ok());
        let matched = router.match_route(&Method::GET, "/users/42").unwrap();
        assert_eq!(matched.params.get("id"), Some("42"));
    }

    #[test]
    fn not_found_and_method_not_allowed() {
        let router = router();

        assert_eq!(router.match_route(&Method::GET, "/nope"), Err(RouteError::NotFound));

        let error = router.match_route(&Method::DELETE, "/users").unwrap_err();
        let RouteError::MethodNotAllowed { allow } = error else { panic!("expected 405") };
        assert_eq!(allow, vec![Method::POST]);
    }

    #[test]
    fn any_covers_every_supported_method() {
        let router = router();
        for method in ANY_METHODS {
            assert!(router.match_route(&method, "/health").is_ok(), "{method} should match /health");
        }
    }

    #[test]
    fn cache_hits_equal_trie_resolution() {
        let router = router();

        let cold = router.match_route(&Method::GET, "/users/7").unwrap();
        let warm = router.match_route(&Method::GET, "/users/7").unwrap();

        assert_eq!(cold.params.get("id"), warm.params.get("id"));
        assert!(Arc::ptr_eq(&cold.handler, &warm.handler));

        let stats = router.cache_stats().unwrap();
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn errors_are_not_cached() {
        let router = router();

        let _ = router.match_route(&Method::GET, "/nope");
        let _ = router.match_route(&Method::GET, "/nope");

        let stats = router.cache_stats().unwrap();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn invalidate_cache_drops_entries() {
        let router = router();
        let _ = router.match_route(&Method::GET, "/");

        router.invalidate_cache();
        assert_eq!(router.cache_stats().unwrap().entries, 0);
    }

    #[test]
    fn disabled_cache_reports_no_stats() {
        let router = Router::builder().get("/", tagged("root")).without_cache().build().unwrap();
        let _ = router.match_route(&Method::GET, "/");
        assert!(router.cache_stats().is_none());
    }

    #[test]
    fn duplicate_registration_fails_at_build() {
        let result = Router::builder().get("/a", tagged("one")).get("/a", tagged("two")).build();
        assert!(matches!(result, Err(RouterBuildError::DuplicateRoute { .. })));
    }
}
