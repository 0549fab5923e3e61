//! The stream sub-object a connection is promoted into for SSE.
//!
//! Owns the socket write half through a single drain task, which is what
//! guarantees at most one in-flight physical write per connection: producers
//! only append to the bounded queue, the task pops and writes head-of-line.
//! Close is deferred until the queue drains; a write error closes the stream
//! immediately and drops whatever was queued.

use crate::connection::Activity;
use crate::protocol::StreamError;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

/// Handle to a promoted streaming connection.
///
/// Cheap to clone; all clones share the queue and the drain task.
#[derive(Debug, Clone)]
pub struct StreamConn {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    /// producer → drain task: bytes queued or close requested
    wakeup: Notify,
    /// drain task → waiters: a write completed, the queue drained, or the
    /// stream closed
    progress: Notify,
    max_queue_bytes: usize,
}

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<Bytes>,
    queued_bytes: usize,
    write_in_progress: bool,
    close_requested: bool,
    closed: bool,
}

impl StreamConn {
    /// Takes ownership of the write half and starts the drain task.
    pub fn spawn<W>(writer: W, max_queue_bytes: usize, activity: Arc<Activity>) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            wakeup: Notify::new(),
            progress: Notify::new(),
            max_queue_bytes,
        });

        tokio::spawn(drain(Arc::clone(&shared), writer, activity));

        Self { shared }
    }

    /// Appends an owned frame to the write queue.
    ///
    /// An enqueue onto an idle stream always succeeds and becomes the single
    /// in-flight write. Otherwise the frame counts against the queue cap and
    /// [`StreamError::BufferFull`] is returned when it would not fit; the
    /// caller decides whether to retry later or drop the frame.
    pub fn enqueue(&self, bytes: Bytes) -> Result<(), StreamError> {
        let mut state = self.shared.state.lock().expect("stream state poisoned");

        if state.closed || state.close_requested {
            return Err(StreamError::Closed);
        }

        if (state.write_in_progress || !state.queue.is_empty())
            && state.queued_bytes + bytes.len() > self.shared.max_queue_bytes
        {
            trace!(queued = state.queued_bytes, frame = bytes.len(), "stream write queue full");
            return Err(StreamError::BufferFull);
        }

        state.queued_bytes += bytes.len();
        state.queue.push_back(bytes);
        drop(state);

        self.shared.wakeup.notify_one();
        Ok(())
    }

    /// Requests close; the physical shutdown happens after the queue drains.
    pub fn request_close(&self) {
        let mut state = self.shared.state.lock().expect("stream state poisoned");
        if state.closed || state.close_requested {
            return;
        }
        state.close_requested = true;
        drop(state);

        self.shared.wakeup.notify_one();
    }

    /// Requests close and waits for the drain task to finish the shutdown.
    pub async fn close(&self) {
        self.request_close();

        loop {
            let progressed = self.shared.progress.notified();
            if self.shared.state.lock().expect("stream state poisoned").closed {
                return;
            }
            progressed.await;
        }
    }

    /// Waits until every queued frame reached the socket.
    pub async fn flush(&self) -> Result<(), StreamError> {
        loop {
            let progressed = self.shared.progress.notified();
            {
                let state = self.shared.state.lock().expect("stream state poisoned");
                if state.closed {
                    return Err(StreamError::Closed);
                }
                if state.queue.is_empty() && !state.write_in_progress {
                    return Ok(());
                }
            }
            progressed.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().expect("stream state poisoned").closed
    }

    /// Bytes currently waiting in the queue, not counting an in-flight write.
    pub fn queued_bytes(&self) -> usize {
        self.shared.state.lock().expect("stream state poisoned").queued_bytes
    }
}

enum Step {
    Write(Bytes),
    Shutdown,
    Wait,
}

/// The single consumer of the queue; holds the only write path to the socket.
async fn drain<W>(shared: Arc<Shared>, mut writer: W, activity: Arc<Activity>)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let wakeup = shared.wakeup.notified();

        let step = {
            let mut state = shared.state.lock().expect("stream state poisoned");
            if state.closed {
                break;
            }
            if let Some(bytes) = state.queue.pop_front() {
                state.queued_bytes -= bytes.len();
                state.write_in_progress = true;
                Step::Write(bytes)
            } else if state.close_requested {
                Step::Shutdown
            } else {
                Step::Wait
            }
        };

        match step {
            Step::Write(bytes) => {
                let result = match writer.write_all(&bytes).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };

                let mut state = shared.state.lock().expect("stream state poisoned");
                state.write_in_progress = false;
                match result {
                    Ok(()) => {
                        activity.touch();
                        drop(state);
                        shared.progress.notify_waiters();
                    }
                    Err(e) => {
                        warn!(error = %e, "stream write failed, closing stream");
                        state.closed = true;
                        state.queue.clear();
                        state.queued_bytes = 0;
                        drop(state);
                        shared.progress.notify_waiters();
                        return;
                    }
                }
            }
            Step::Shutdown => {
                if let Err(e) = writer.shutdown().await {
                    debug!(error = %e, "stream shutdown reported error");
                }
                let mut state = shared.state.lock().expect("stream state poisoned");
                state.closed = true;
                drop(state);
                shared.progress.notify_waiters();
                trace!("stream closed after queue drain");
                return;
            }
            Step::Wait => wakeup.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn activity() -> Arc<Activity> {
        Arc::new(Activity::new())
    }

    async fn wait_until_idle(conn: &StreamConn) {
        while conn.queued_bytes() > 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn frames_delivered_in_enqueue_order() {
        let (mut read, write) = tokio::io::duplex(1024);
        let conn = StreamConn::spawn(write, 64 * 1024, activity());

        conn.enqueue(Bytes::from_static(b"data: 0\n\n")).unwrap();
        conn.enqueue(Bytes::from_static(b"data: 1\n\n")).unwrap();
        conn.close().await;

        let mut out = Vec::new();
        read.read_to_end(&mut out).await.unwrap();
        assert_eq!(&out[..], b"data: 0\n\ndata: 1\n\n");
    }

    #[tokio::test]
    async fn oversized_frame_accepted_when_idle_only() {
        // tiny transport buffer so the first write stays in flight
        let (_read, write) = tokio::io::duplex(4);
        let conn = StreamConn::spawn(write, 64, activity());

        let frame = Bytes::from(vec![b'x'; 80]);
        conn.enqueue(frame.clone()).unwrap();

        // once the drain task picked the frame up, the queue is empty but the
        // write is still in flight; another oversized frame must be refused
        wait_until_idle(&conn).await;
        assert_eq!(conn.enqueue(frame), Err(StreamError::BufferFull));
    }

    #[tokio::test]
    async fn queue_cap_is_exact() {
        let (_read, write) = tokio::io::duplex(4);
        let conn = StreamConn::spawn(write, 64, activity());

        conn.enqueue(Bytes::from(vec![b'x'; 80])).unwrap();
        wait_until_idle(&conn).await;

        // exactly the cap fits behind the in-flight write
        conn.enqueue(Bytes::from(vec![b'y'; 64])).unwrap();
        // one more byte does not
        assert_eq!(conn.enqueue(Bytes::from_static(b"z")), Err(StreamError::BufferFull));
    }

    #[tokio::test]
    async fn close_waits_for_drain_then_fin() {
        let (mut read, write) = tokio::io::duplex(1024);
        let conn = StreamConn::spawn(write, 64 * 1024, activity());

        conn.enqueue(Bytes::from_static(b"data: x\n\n")).unwrap();
        conn.close().await;
        assert!(conn.is_closed());

        let mut out = Vec::new();
        read.read_to_end(&mut out).await.unwrap();
        assert_eq!(&out[..], b"data: x\n\n");
    }

    #[tokio::test]
    async fn enqueue_after_close_rejected() {
        let (_read, write) = tokio::io::duplex(1024);
        let conn = StreamConn::spawn(write, 64 * 1024, activity());

        conn.close().await;
        assert_eq!(conn.enqueue(Bytes::from_static(b"data: x\n\n")), Err(StreamError::Closed));
    }

    #[tokio::test]
    async fn write_error_closes_and_drops_queue() {
        let (read, write) = tokio::io::duplex(4);
        let conn = StreamConn::spawn(write, 64 * 1024, activity());

        // peer goes away
        drop(read);

        conn.enqueue(Bytes::from(vec![b'x'; 128])).unwrap();
        while !conn.is_closed() {
            tokio::task::yield_now().await;
        }

        assert_eq!(conn.queued_bytes(), 0);
        assert_eq!(conn.enqueue(Bytes::from_static(b"y")), Err(StreamError::Closed));
    }

    #[tokio::test]
    async fn flush_completes_once_queue_empties() {
        let (mut read, write) = tokio::io::duplex(16);
        let conn = StreamConn::spawn(write, 64 * 1024, activity());

        conn.enqueue(Bytes::from(vec![b'x'; 64])).unwrap();

        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; 64];
            read.read_exact(&mut buf).await.unwrap();
            read
        });

        conn.flush().await.unwrap();
        assert_eq!(conn.queued_bytes(), 0);
        drop(reader.await.unwrap());
    }
}
