//! Bridge between the framework and the async runtime.
//!
//! Everything the core needs from tokio funnels through here: listener setup
//! with an explicit backlog, the zero-delay scheduling primitive used to run
//! stream callbacks outside the request path, and the [`LoopHandle`] given to
//! stream callbacks for timer-based work that cooperates with shutdown.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Binds a listener with the configured backlog.
///
/// `host` may be a hostname; the first resolved address is used.
pub async fn bind_listener(host: &str, port: u16, backlog: u32) -> io::Result<TcpListener> {
    let addr: SocketAddr = tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, format!("no address resolved for {host}")))?;

    let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

/// Schedules a future to run on a fresh task at the next loop tick.
///
/// This is the zero-delay primitive the streaming engine uses to defer user
/// callbacks until after the current request's I/O has been flushed: the
/// yield guarantees the spawning task gets back to the scheduler first.
pub fn defer<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(async move {
        tokio::task::yield_now().await;
        future.await
    })
}

/// Timer and cancellation facilities handed to stream callbacks.
///
/// Callbacks run on the event loop and must not block; periodic work goes
/// through [`LoopHandle::delay`] or [`LoopHandle::interval`], and long-lived
/// callbacks should watch [`LoopHandle::cancelled`] so server shutdown and
/// idle eviction can reach them.
#[derive(Debug, Clone)]
pub struct LoopHandle {
    shutdown: CancellationToken,
}

impl LoopHandle {
    pub(crate) fn new(shutdown: CancellationToken) -> Self {
        Self { shutdown }
    }

    /// Sleeps without blocking the loop.
    pub async fn delay(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// A periodic ticker; missed ticks are skipped rather than bursted.
    pub fn interval(&self, period: Duration) -> Interval {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    }

    /// Resolves when the connection is being shut down.
    pub async fn cancelled(&self) {
        self.shutdown.cancelled().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn bind_listener_on_ephemeral_port() {
        let listener = bind_listener("127.0.0.1", 0, 16).await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn defer_runs_after_current_task_yields() {
        let flag = Arc::new(AtomicBool::new(false));
        let task_flag = Arc::clone(&flag);

        let handle = defer(async move {
            task_flag.store(true, Ordering::SeqCst);
        });

        // nothing ran inline
        assert!(!flag.load(Ordering::SeqCst));

        handle.await.unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn loop_handle_observes_cancellation() {
        let token = CancellationToken::new();
        let handle = LoopHandle::new(token.clone());

        assert!(!handle.is_cancelled());
        token.cancel();
        handle.cancelled().await;
        assert!(handle.is_cancelled());
    }
}
