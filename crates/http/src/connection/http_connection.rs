//! The per-connection state machine.
//!
//! One [`HttpConnection`] drives one TCP peer through
//! `Reading → Dispatching → Writing` cycles, diverting to `Streaming` when a
//! handler commits an event-stream response, and ending in `Closed`. The
//! invariants the rest of the system leans on:
//!
//! - at most one outstanding read and one outstanding write at any time
//!   (one framed read point; either the framed write half or, after
//!   promotion, the stream drain task)
//! - requests on one connection are answered strictly in order; the response
//!   write completes before the next request is read
//! - every parse error produces a 400 with a short text body, then close
//! - once promoted to streaming, the normal response path is never touched
//!   again

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use http::header::{CONNECTION, EXPECT};
use http::{HeaderValue, Response, StatusCode, Version};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::codec::{CodecLimits, RequestDecoder, ResponseEncoder};
use crate::handler::Handler;
use crate::protocol::{
    HttpError, Message, ParseError, PayloadItem, PayloadSize, RequestHeader, ResponseBody, ResponseHead, SendError,
};
use crate::runtime::LoopHandle;
use crate::sse::{SseWriter, StreamConn};

use super::registry::Activity;

/// Transport-level knobs for one connection, derived from the server config.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub limits: CodecLimits,
    /// Requests served before keep-alive is refused; 0 means unlimited
    pub max_requests: usize,
    /// Bounds the reads of a single request once its head arrived
    pub read_timeout: Option<Duration>,
    /// Bounds a response flush
    pub write_timeout: Option<Duration>,
    pub sse_max_queue_bytes: usize,
    pub sse_default_retry_ms: Option<u32>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            limits: CodecLimits::default(),
            max_requests: 0,
            read_timeout: None,
            write_timeout: None,
            sse_max_queue_bytes: 64 * 1024,
            sse_default_retry_ms: None,
        }
    }
}

/// Connection lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Reading,
    Dispatching,
    Writing,
    Streaming,
    Closing,
    Closed,
}

/// What happened to the connection after serving one request.
enum ServeOutcome {
    /// Keep-alive selected, read the next request
    KeepAlive,
    /// Connection is done; carries the final result
    Done(Result<(), HttpError>),
    /// Handler committed an event stream; promote with this response
    Promote(Response<ResponseBody>),
}

/// An HTTP connection over a split socket.
pub struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
    config: ConnectionConfig,
    state: ConnState,
    served: usize,
    activity: Arc<Activity>,
    shutdown: CancellationToken,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W, config: ConnectionConfig) -> Self {
        Self {
            framed_read: FramedRead::with_capacity(reader, RequestDecoder::new(config.limits), 8 * 1024),
            framed_write: FramedWrite::new(writer, ResponseEncoder::new()),
            config,
            state: ConnState::Reading,
            served: 0,
            activity: Arc::new(Activity::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Attaches the shared cells handed out by the connection registry.
    pub fn with_registration(mut self, activity: Arc<Activity>, shutdown: CancellationToken) -> Self {
        self.activity = activity;
        self.shutdown = shutdown;
        self
    }

    /// Serves requests until the peer goes away, an error tears the
    /// connection down, or the connection is promoted to streaming.
    pub async fn process<H>(mut self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler,
    {
        loop {
            self.enter(ConnState::Reading);

            let next = select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("connection cancelled between requests, closing");
                    return self.close().await;
                }
                next = self.framed_read.next() => next,
            };

            match next {
                Some(Ok(Message::Header((header, payload_size)))) => {
                    self.activity.touch();
                    match self.serve_one(&handler, header, payload_size).await? {
                        ServeOutcome::KeepAlive => {}
                        ServeOutcome::Done(result) => return result,
                        ServeOutcome::Promote(response) => return self.promote(response).await,
                    }
                }

                Some(Ok(Message::Payload(_))) => {
                    error!("received body bytes while expecting a request head");
                    self.send_error_response(StatusCode::BAD_REQUEST).await?;
                    let _ = self.close().await;
                    return Err(ParseError::bad_body("request head expected, got body bytes").into());
                }

                Some(Err(e)) => {
                    warn!(error = %e, "failed to parse request, answering 400");
                    self.send_error_response(StatusCode::BAD_REQUEST).await?;
                    let _ = self.close().await;
                    return Err(e.into());
                }

                None => {
                    info!("peer closed the connection");
                    return self.close().await;
                }
            }
        }
    }

    /// Handles one parsed request head through body read, dispatch and
    /// response write.
    async fn serve_one<H>(
        &mut self,
        handler: &Arc<H>,
        header: RequestHeader,
        payload_size: PayloadSize,
    ) -> Result<ServeOutcome, HttpError>
    where
        H: Handler,
    {
        self.handle_expect_continue(&header).await?;

        let body = match self.read_body(payload_size).await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "failed to read request body, answering 400");
                self.send_error_response(StatusCode::BAD_REQUEST).await?;
                let _ = self.close().await;
                return Ok(ServeOutcome::Done(Err(e.into())));
            }
        };

        self.enter(ConnState::Dispatching);
        let keep_alive_requested = header.keep_alive();
        let request = header.body(body);

        let response = match handler.call(request).await {
            Ok(response) => response,
            Err(e) => {
                error!("handler error, answering 500, cause: {}", e.into());
                plain_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        };

        if response.body().is_event_stream() {
            return Ok(ServeOutcome::Promote(response));
        }

        self.enter(ConnState::Writing);
        self.served += 1;
        let under_request_cap = self.config.max_requests == 0 || self.served < self.config.max_requests;
        let keep_alive = keep_alive_requested && under_request_cap && !self.shutdown.is_cancelled();

        self.write_response(response, keep_alive).await?;
        self.activity.touch();

        if keep_alive {
            Ok(ServeOutcome::KeepAlive)
        } else {
            debug!(served = self.served, "keep-alive not selected, closing");
            Ok(ServeOutcome::Done(self.close().await))
        }
    }

    /// Aggregates the request body into one buffer, honoring the body limit
    /// for chunked requests whose size is unknown up front.
    async fn read_body(&mut self, payload_size: PayloadSize) -> Result<Bytes, ParseError> {
        if payload_size.is_empty() {
            // drain the decoder's immediate EOF so it returns to head parsing
            return match self.read_payload_item().await? {
                PayloadItem::Eof => Ok(Bytes::new()),
                PayloadItem::Chunk(_) => Err(ParseError::bad_body("body bytes on a body-less request")),
            };
        }

        let max = self.config.limits.max_body_bytes;
        let mut buf = BytesMut::new();

        loop {
            match self.read_payload_item().await? {
                PayloadItem::Chunk(bytes) => {
                    if buf.len() as u64 + bytes.len() as u64 > max {
                        return Err(ParseError::BodyTooLarge { got: buf.len() as u64 + bytes.len() as u64, cap: max });
                    }
                    buf.extend_from_slice(&bytes);
                }
                PayloadItem::Eof => return Ok(buf.freeze()),
            }
        }
    }

    async fn read_payload_item(&mut self) -> Result<PayloadItem, ParseError> {
        let next = match self.config.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.framed_read.next())
                .await
                .map_err(|_| ParseError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "request read timed out")))?,
            None => self.framed_read.next().await,
        };

        match next {
            Some(Ok(Message::Payload(item))) => Ok(item),
            Some(Ok(Message::Header(_))) => Err(ParseError::bad_body("request head while reading body")),
            Some(Err(e)) => Err(e),
            None => Err(ParseError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof))),
        }
    }

    /// Answers `100 Continue` before the body is read when the peer asks.
    async fn handle_expect_continue(&mut self, header: &RequestHeader) -> Result<(), HttpError> {
        if let Some(value) = header.headers().get(EXPECT) {
            let slice = value.as_bytes();
            if slice.len() >= 4 && &slice[0..4] == b"100-" {
                let writer = self.framed_write.get_mut();
                writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.map_err(SendError::from)?;
                writer.flush().await.map_err(SendError::from)?;
                info!("received expect request header, sent continue response");
            }
        }
        Ok(())
    }

    /// Serializes and flushes a buffered response.
    async fn write_response(&mut self, response: Response<ResponseBody>, keep_alive: bool) -> Result<(), HttpError> {
        let (mut parts, body) = response.into_parts();
        parts.version = Version::HTTP_11;
        parts.headers.insert(
            CONNECTION,
            if keep_alive { HeaderValue::from_static("keep-alive") } else { HeaderValue::from_static("close") },
        );

        let payload_size = match body.len() {
            Some(0) | None => PayloadSize::Empty,
            Some(n) => PayloadSize::Length(n),
        };

        let head = Message::Header((ResponseHead::from_parts(parts), payload_size));
        self.framed_write.feed(head).await?;

        if let ResponseBody::Full(bytes) = body
            && !bytes.is_empty()
        {
            self.framed_write.feed(Message::Payload(PayloadItem::Chunk(bytes))).await?;
        }
        self.framed_write.feed(Message::Payload(PayloadItem::Eof)).await?;

        match self.config.write_timeout {
            Some(limit) => tokio::time::timeout(limit, self.framed_write.flush())
                .await
                .map_err(|_| SendError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "response write timed out")))??,
            None => self.framed_write.flush().await?,
        }

        trace!(?payload_size, keep_alive, "response written");
        Ok(())
    }

    /// Hands the connection over to the streaming engine.
    ///
    /// Flushes the unframed head, converts the write half into a
    /// [`StreamConn`], and schedules the pending stream action on a fresh
    /// loop tick with the writer bound to the live stream. The read half is
    /// dropped: a peer disconnect reaches the stream as a write error.
    async fn promote(mut self, response: Response<ResponseBody>) -> Result<(), HttpError> {
        self.enter(ConnState::Streaming);

        let (mut parts, body) = response.into_parts();
        let ResponseBody::EventStream(action) = body else {
            return Err(SendError::framing("promote called without an event-stream body").into());
        };
        parts.version = Version::HTTP_11;

        self.framed_write.send(Message::Header((ResponseHead::from_parts(parts), PayloadSize::Unframed))).await?;
        self.activity.touch();

        let write_half = self.framed_write.into_inner();
        let stream = StreamConn::spawn(write_half, self.config.sse_max_queue_bytes, Arc::clone(&self.activity));

        if let Some(ms) = self.config.sse_default_retry_ms
            && let Err(e) = stream.enqueue(crate::sse::encode_retry(ms))
        {
            debug!(error = %e, "could not enqueue default retry frame");
        }

        info!("connection promoted to event stream");
        action.schedule(SseWriter::new(stream), LoopHandle::new(self.shutdown));
        Ok(())
    }

    /// Answers an error status with a short text body, keep-alive off.
    async fn send_error_response(&mut self, status: StatusCode) -> Result<(), HttpError> {
        self.write_response(plain_response(status), false).await
    }

    async fn close(&mut self) -> Result<(), HttpError> {
        self.enter(ConnState::Closing);
        if let Err(e) = self.framed_write.get_mut().shutdown().await {
            debug!(error = %e, "connection shutdown reported error");
        }
        self.enter(ConnState::Closed);
        Ok(())
    }

    fn enter(&mut self, state: ConnState) {
        trace!(from = ?self.state, to = ?state, "connection state transition");
        self.state = state;
    }
}

/// Builds a minimal `status + reason text` response.
fn plain_response(status: StatusCode) -> Response<ResponseBody> {
    let text = format!("{} {}", status.as_str(), status.canonical_reason().unwrap_or("Unknown"));
    let mut response = Response::new(ResponseBody::from(text));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(http::header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}
