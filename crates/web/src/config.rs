//! Server configuration.
//!
//! Every knob is serde-deserializable with defaults, so embedders can load a
//! partial config file and only override what they care about.

use arbor_http::codec::CodecLimits;
use arbor_http::connection::ConnectionConfig;
use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration for a [`Server`](crate::server::Server).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host; hostnames are resolved at bind time
    pub host: String,
    pub port: u16,
    /// Listen backlog handed to the socket
    pub backlog: u32,
    /// Concurrent-connection cap; sockets over it are closed at accept
    pub max_connections: usize,
    /// Idle connections past this are closed by the sweep
    pub idle_timeout_seconds: u64,
    /// Bounds the reads of a single request once its head arrived
    pub read_timeout_seconds: Option<u64>,
    /// Bounds a response flush
    pub write_timeout_seconds: Option<u64>,
    pub max_request_bytes: u64,
    pub max_header_bytes: usize,
    /// Keep-alive requests served per connection; 0 means unlimited
    pub max_requests_per_connection: usize,
    /// How long a rendered `Date` header may be reused before it is
    /// re-rendered; half a second keeps it within the format's resolution
    pub date_header_max_age_ms: u64,
    pub pools: PoolsConfig,
    pub router: RouterConfig,
    pub streaming: StreamingConfig,
    pub concurrency: ConcurrencyConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolsConfig {
    pub event_pool_enabled: bool,
    pub event_pool_size: usize,
    /// Pre-sized parameter capacity carried by pooled events
    pub params_pool_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub cache_enabled: bool,
    pub cache_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub sse_max_queue_bytes: usize,
    /// When set, streams open with a `retry:` frame carrying this delay
    pub sse_default_retry_ms: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Worker threads for [`run_blocking`](crate::server::Server::run_blocking);
    /// 0 selects a current-thread runtime
    pub worker_threads: usize,
    pub thread_stack_size: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8080,
            backlog: 1024,
            max_connections: 1000,
            idle_timeout_seconds: 30,
            read_timeout_seconds: None,
            write_timeout_seconds: None,
            max_request_bytes: 1024 * 1024,
            max_header_bytes: 8 * 1024,
            max_requests_per_connection: 0,
            date_header_max_age_ms: 500,
            pools: PoolsConfig::default(),
            router: RouterConfig::default(),
            streaming: StreamingConfig::default(),
            concurrency: ConcurrencyConfig::default(),
        }
    }
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self { event_pool_enabled: true, event_pool_size: 256, params_pool_size: 8 }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { cache_enabled: true, cache_capacity: 1024 }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self { sse_max_queue_bytes: 64 * 1024, sse_default_retry_ms: None }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { worker_threads: 0, thread_stack_size: None }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn date_header_max_age(&self) -> Duration {
        Duration::from_millis(self.date_header_max_age_ms)
    }

    /// The transport-level slice of this config.
    pub(crate) fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            limits: CodecLimits { max_header_bytes: self.max_header_bytes, max_body_bytes: self.max_request_bytes },
            max_requests: self.max_requests_per_connection,
            read_timeout: self.read_timeout_seconds.map(Duration::from_secs),
            write_timeout: self.write_timeout_seconds.map(Duration::from_secs),
            sse_max_queue_bytes: self.streaming.sse_max_queue_bytes,
            sse_default_retry_ms: self.streaming.sse_default_retry_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::default();

        assert_eq!(config.port, 8080);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.idle_timeout(), Duration::from_secs(30));
        assert_eq!(config.date_header_max_age(), Duration::from_millis(500));
        assert_eq!(config.streaming.sse_max_queue_bytes, 64 * 1024);
        assert!(config.pools.event_pool_enabled);
        assert!(config.router.cache_enabled);
        assert_eq!(config.concurrency.worker_threads, 0);
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let config: ServerConfig = serde_json::from_str(
            r#"{
                "port": 9090,
                "max_connections": 10,
                "streaming": { "sse_max_queue_bytes": 64 },
                "router": { "cache_enabled": false }
            }"#,
        )
        .unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.streaming.sse_max_queue_bytes, 64);
        assert!(config.streaming.sse_default_retry_ms.is_none());
        assert!(!config.router.cache_enabled);
        // untouched sections keep their defaults
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.pools.event_pool_size, 256);
    }

    #[test]
    fn connection_config_carries_limits_through() {
        let mut config = ServerConfig::default();
        config.max_header_bytes = 2048;
        config.max_request_bytes = 4096;
        config.read_timeout_seconds = Some(5);

        let connection = config.connection_config();
        assert_eq!(connection.limits.max_header_bytes, 2048);
        assert_eq!(connection.limits.max_body_bytes, 4096);
        assert_eq!(connection.read_timeout, Some(Duration::from_secs(5)));
        assert_eq!(connection.sse_max_queue_bytes, 64 * 1024);
    }
}
