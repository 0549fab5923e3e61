//! The per-request context ("event").
//!
//! An [`Event`] carries the parsed request, the response under construction,
//! the routing parameters and the streaming hooks, and is what handlers and
//! middleware see. Events are acquired from the server's [`Pool`] and fully
//! [`Reclaim`]ed on release; response header strings live in the event's
//! [`HeaderArena`] and are retired in bulk with it.

mod arena;
mod pool;

pub use arena::HeaderArena;
pub use pool::{Pool, PoolConfig, PoolExhausted, Reclaim};

use arbor_http::protocol::ResponseBody;
use arbor_http::runtime::LoopHandle;
use arbor_http::sse::{SseWriter, StreamAction};
use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, LOCATION};
use http::request::Parts;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Response, StatusCode, Uri, Version};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Errors from event accessors and response builders.
#[derive(Debug, Error)]
pub enum EventError {
    /// Response head was committed (streaming started), headers are frozen
    #[error("response headers already sent")]
    HeadersSent,

    /// `start_sse` called twice, or after a response body was set
    #[error("event already committed a response")]
    AlreadyCommitted,

    /// Stream registration without `start_sse`
    #[error("event is not in streaming mode")]
    NotStreaming,

    /// A second stream callback registration
    #[error("stream handler already registered")]
    StreamHandlerSet,

    /// Invalid header name or value
    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    /// JSON body encode/decode failure
    #[error("json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// Urlencoded decode failure
    #[error("form error: {source}")]
    Form {
        #[from]
        source: serde_urlencoded::de::Error,
    },
}

impl EventError {
    fn invalid_header(detail: impl std::fmt::Display) -> Self {
        Self::InvalidHeader { reason: detail.to_string() }
    }
}

/// Routing parameters captured while matching the path.
///
/// Names are shared with the route table; values are the consumed path
/// segments, verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    items: Vec<(Arc<str>, String)>,
}

impl PathParams {
    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self { items: Vec::with_capacity(capacity) }
    }

    pub(crate) fn push(&mut self, name: Arc<str>, value: String) {
        self.items.push((name, value));
    }

    pub fn get(&self, name: impl AsRef<str>) -> Option<&str> {
        let name = name.as_ref();
        self.items.iter().find(|(n, _)| n.as_ref() == name).map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(n, v)| (n.as_ref(), v.as_str()))
    }

    pub(crate) fn pop_last(&mut self) {
        self.items.pop();
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }
}

#[derive(Debug, Default)]
enum BodyState {
    #[default]
    Unset,
    Full(Bytes),
}

/// The per-request object handlers operate on.
pub struct Event {
    method: Method,
    uri: Uri,
    version: Version,
    req_headers: HeaderMap,
    req_body: Bytes,
    params: PathParams,
    query_cache: Option<Vec<(String, String)>>,

    status: StatusCode,
    resp_headers: HeaderMap,
    body: BodyState,
    headers_sent: bool,

    sse_started: bool,
    stream_action: Option<StreamAction>,

    arena: HeaderArena,
}

impl Event {
    pub(crate) fn with_params_capacity(params_capacity: usize) -> Self {
        Self {
            method: Method::GET,
            uri: Uri::from_static("/"),
            version: Version::HTTP_11,
            req_headers: HeaderMap::new(),
            req_body: Bytes::new(),
            params: PathParams::with_capacity(params_capacity),
            query_cache: None,
            status: StatusCode::OK,
            resp_headers: HeaderMap::new(),
            body: BodyState::Unset,
            headers_sent: false,
            sse_started: false,
            stream_action: None,
            arena: HeaderArena::new(),
        }
    }

    /// Loads a parsed request into this (fresh or reclaimed) event.
    pub(crate) fn populate(&mut self, parts: Parts, body: Bytes, params: PathParams) {
        self.method = parts.method;
        self.uri = parts.uri;
        self.version = parts.version;
        self.req_headers = parts.headers;
        self.req_body = body;
        self.params = params;
    }

    // request accessors

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn raw_query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// First value of a query-string key; the parse is cached per event.
    pub fn query(&mut self, name: &str) -> Option<&str> {
        if self.query_cache.is_none() {
            let parsed: Vec<(String, String)> = self
                .raw_query()
                .and_then(|q| serde_urlencoded::from_str(q).ok())
                .unwrap_or_default();
            self.query_cache = Some(parsed);
        }

        self.query_cache
            .as_ref()
            .and_then(|pairs| pairs.iter().find(|(k, _)| k == name))
            .map(|(_, v)| v.as_str())
    }

    /// Routing parameter captured from the path.
    pub fn param(&self, name: impl AsRef<str>) -> Option<&str> {
        self.params.get(name)
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Request header value, by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.req_headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.req_headers
    }

    pub fn body(&self) -> &[u8] {
        &self.req_body
    }

    /// Decodes the request body as JSON.
    pub fn read_json<T: DeserializeOwned>(&self) -> Result<T, EventError> {
        Ok(serde_json::from_slice(&self.req_body)?)
    }

    /// Decodes the request body as a urlencoded form.
    pub fn read_form<T: DeserializeOwned>(&self) -> Result<T, EventError> {
        Ok(serde_urlencoded::from_bytes(&self.req_body)?)
    }

    // response builders

    pub fn set_status(&mut self, status: StatusCode) -> Result<(), EventError> {
        if self.headers_sent {
            return Err(EventError::HeadersSent);
        }
        self.status = status;
        Ok(())
    }

    /// Sets a response header; the value bytes live in the event's arena.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), EventError> {
        if self.headers_sent {
            return Err(EventError::HeadersSent);
        }

        let name = HeaderName::from_bytes(name.as_bytes()).map_err(EventError::invalid_header)?;
        let value = self.arena.alloc_value(value.as_bytes()).map_err(EventError::invalid_header)?;
        self.resp_headers.insert(name, value);
        Ok(())
    }

    pub fn send_text(&mut self, text: impl Into<String>) -> Result<(), EventError> {
        self.send_mime(mime::TEXT_PLAIN_UTF_8, Bytes::from(text.into()))
    }

    pub fn send_html(&mut self, html: impl Into<String>) -> Result<(), EventError> {
        self.send_mime(mime::TEXT_HTML_UTF_8, Bytes::from(html.into()))
    }

    pub fn send_json<T: Serialize>(&mut self, value: &T) -> Result<(), EventError> {
        let encoded = serde_json::to_vec(value)?;
        self.send_mime(mime::APPLICATION_JSON, Bytes::from(encoded))
    }

    pub fn send_bytes(&mut self, content_type: &str, bytes: impl Into<Bytes>) -> Result<(), EventError> {
        let value = self.arena.alloc_value(content_type.as_bytes()).map_err(EventError::invalid_header)?;
        self.send_with_content_type(value, bytes.into())
    }

    pub fn send_empty(&mut self) -> Result<(), EventError> {
        if self.headers_sent {
            return Err(EventError::HeadersSent);
        }
        self.body = BodyState::Full(Bytes::new());
        Ok(())
    }

    /// Answers a redirect to `url` with the given status.
    pub fn redirect(&mut self, url: &str, status: StatusCode) -> Result<(), EventError> {
        if self.headers_sent {
            return Err(EventError::HeadersSent);
        }
        let location = self.arena.alloc_value(url.as_bytes()).map_err(EventError::invalid_header)?;
        self.status = status;
        self.resp_headers.insert(LOCATION, location);
        self.body = BodyState::Full(Bytes::new());
        Ok(())
    }

    /// Content-type bytes go through the arena like any other header value.
    fn send_mime(&mut self, content_type: mime::Mime, bytes: Bytes) -> Result<(), EventError> {
        let value = self.arena.alloc_value(content_type.as_ref().as_bytes()).map_err(EventError::invalid_header)?;
        self.send_with_content_type(value, bytes)
    }

    fn send_with_content_type(&mut self, content_type: HeaderValue, bytes: Bytes) -> Result<(), EventError> {
        if self.headers_sent {
            return Err(EventError::HeadersSent);
        }
        self.resp_headers.insert(CONTENT_TYPE, content_type);
        self.body = BodyState::Full(bytes);
        Ok(())
    }

    // streaming

    /// Switches the response into SSE mode.
    ///
    /// Commits the fixed streaming head (200, `text/event-stream`,
    /// `no-cache`, keep-alive) and freezes the headers; the writer is created
    /// later by the connection, after this head is flushed. Registering the
    /// actual stream logic is a separate step.
    pub fn start_sse(&mut self) -> Result<(), EventError> {
        if self.sse_started || !matches!(self.body, BodyState::Unset) {
            return Err(EventError::AlreadyCommitted);
        }

        self.status = StatusCode::OK;
        self.resp_headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        self.resp_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        self.resp_headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        self.sse_started = true;
        self.headers_sent = true;
        Ok(())
    }

    pub fn sse_started(&self) -> bool {
        self.sse_started
    }

    /// Registers a plain callback to run once the stream is live.
    pub fn set_stream_callback<F>(&mut self, callback: F) -> Result<(), EventError>
    where
        F: FnOnce(SseWriter) + Send + 'static,
    {
        self.install_stream_action(StreamAction::Callback(Box::new(callback)))
    }

    /// Registers an async stream handler.
    pub fn set_stream_handler<F, Fut>(&mut self, handler: F) -> Result<(), EventError>
    where
        F: FnOnce(SseWriter) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.install_stream_action(StreamAction::Task(Box::new(move |writer| Box::pin(handler(writer)))))
    }

    /// Registers an async stream handler that also drives loop timers.
    pub fn set_stream_handler_with_loop<F, Fut>(&mut self, handler: F) -> Result<(), EventError>
    where
        F: FnOnce(SseWriter, LoopHandle) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.install_stream_action(StreamAction::TaskWithLoop(Box::new(move |writer, handle| {
            Box::pin(handler(writer, handle))
        })))
    }

    pub(crate) fn install_stream_action(&mut self, action: StreamAction) -> Result<(), EventError> {
        if !self.sse_started {
            return Err(EventError::NotStreaming);
        }
        if self.stream_action.is_some() {
            return Err(EventError::StreamHandlerSet);
        }
        self.stream_action = Some(action);
        Ok(())
    }

    /// Converts the accumulated response state into the wire response.
    pub(crate) fn take_response(&mut self) -> Response<ResponseBody> {
        let body = if self.sse_started {
            match self.stream_action.take() {
                Some(action) => ResponseBody::event_stream(action),
                None => {
                    warn!("sse started but no stream handler registered, closing stream immediately");
                    ResponseBody::event_stream(StreamAction::Task(Box::new(|writer| {
                        Box::pin(async move { writer.close().await })
                    })))
                }
            }
        } else {
            match std::mem::take(&mut self.body) {
                BodyState::Full(bytes) => ResponseBody::from(bytes),
                BodyState::Unset => ResponseBody::empty(),
            }
        };

        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.version_mut() = Version::HTTP_11;
        *response.headers_mut() = std::mem::take(&mut self.resp_headers);
        response
    }
}

impl Reclaim for Event {
    fn reclaim(&mut self) {
        self.method = Method::GET;
        self.uri = Uri::from_static("/");
        self.version = Version::HTTP_11;
        self.req_headers.clear();
        self.req_body = Bytes::new();
        self.params.clear();
        self.query_cache = None;
        self.status = StatusCode::OK;
        self.resp_headers.clear();
        self.body = BodyState::Unset;
        self.headers_sent = false;
        self.sse_started = false;
        self.stream_action = None;
        self.arena.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;
    use serde::Deserialize;

    fn event_for(method: Method, target: &str, body: &[u8]) -> Event {
        let request = Request::builder().method(method).uri(target).body(()).unwrap();
        let (parts, ()) = request.into_parts();

        let mut event = Event::with_params_capacity(4);
        event.populate(parts, Bytes::copy_from_slice(body), PathParams::empty());
        event
    }

    #[test]
    fn request_accessors() {
        let mut event = event_for(Method::GET, "/users/7?page=2&sort=name", b"");

        assert_eq!(event.method(), &Method::GET);
        assert_eq!(event.path(), "/users/7");
        assert_eq!(event.raw_query(), Some("page=2&sort=name"));
        assert_eq!(event.query("page"), Some("2"));
        assert_eq!(event.query("sort"), Some("name"));
        assert_eq!(event.query("missing"), None);
    }

    #[test]
    fn read_json_body() {
        #[derive(Deserialize)]
        struct Payload {
            id: u32,
        }

        let event = event_for(Method::POST, "/things", br#"{"id": 9}"#);
        let payload: Payload = event.read_json().unwrap();
        assert_eq!(payload.id, 9);

        let bad = event_for(Method::POST, "/things", b"not json");
        assert!(bad.read_json::<Payload>().is_err());
    }

    #[test]
    fn send_json_sets_body_and_content_type() {
        let mut event = event_for(Method::GET, "/", b"");
        event.send_json(&serde_json::json!({"id": "42"})).unwrap();

        let response = event.take_response();
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(response.body().len(), Some(10));
    }

    #[test]
    fn redirect_sets_location_and_status() {
        let mut event = event_for(Method::GET, "/old", b"");
        event.redirect("/new", StatusCode::MOVED_PERMANENTLY).unwrap();

        let response = event.take_response();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers().get(LOCATION).unwrap(), "/new");
    }

    #[test]
    fn custom_headers_live_in_the_arena() {
        let mut event = event_for(Method::GET, "/", b"");
        event.set_header("x-request-id", "abc-123").unwrap();
        assert!(event.arena.bytes_allocated() > 0);

        let response = event.take_response();
        assert_eq!(response.headers().get("x-request-id").unwrap(), "abc-123");
    }

    #[test]
    fn start_sse_commits_the_streaming_head() {
        let mut event = event_for(Method::GET, "/events", b"");
        event.start_sse().unwrap();

        assert!(event.sse_started());
        // headers are frozen once streaming starts
        assert!(matches!(event.set_header("x-late", "too late"), Err(EventError::HeadersSent)));
        assert!(matches!(event.send_text("nope"), Err(EventError::HeadersSent)));
        assert!(matches!(event.start_sse(), Err(EventError::AlreadyCommitted)));
    }

    #[test]
    fn stream_registration_requires_sse_mode() {
        let mut event = event_for(Method::GET, "/events", b"");
        assert!(matches!(event.set_stream_callback(|_| {}), Err(EventError::NotStreaming)));

        event.start_sse().unwrap();
        event.set_stream_callback(|_| {}).unwrap();
        assert!(matches!(event.set_stream_callback(|_| {}), Err(EventError::StreamHandlerSet)));
    }

    #[test]
    fn take_response_without_sends_is_empty_200() {
        let mut event = event_for(Method::GET, "/", b"");
        let response = event.take_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().len(), Some(0));
    }

    #[test]
    fn reclaim_restores_fresh_state() {
        let mut event = event_for(Method::POST, "/users/7?x=1", b"body");
        event.params = {
            let mut params = PathParams::empty();
            params.push(Arc::from("id"), "7".to_owned());
            params
        };
        event.set_status(StatusCode::CREATED).unwrap();
        event.set_header("x-a", "1").unwrap();
        event.send_text("hi").unwrap();
        let _ = event.query("x");

        event.reclaim();

        assert_eq!(event.method(), &Method::GET);
        assert_eq!(event.path(), "/");
        assert!(event.body().is_empty());
        assert!(event.params().is_empty());
        assert!(event.query_cache.is_none());
        assert_eq!(event.status, StatusCode::OK);
        assert!(event.resp_headers.is_empty());
        assert!(matches!(event.body, BodyState::Unset));
        assert!(!event.sse_started());
        assert!(event.stream_action.is_none());
        assert_eq!(event.arena.bytes_allocated(), 0);
    }
}
