//! Live-connection bookkeeping.
//!
//! Every accepted connection registers here and receives two shared cells:
//! an [`Activity`] timestamp it touches on reads and writes, and a
//! `CancellationToken` the server may cancel to close it between requests.
//! The server's sweep task walks the registry on a timer and cancels
//! connections whose activity is older than the idle timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Last-activity cell shared between a connection and the registry sweep.
///
/// Stores milliseconds since its own creation instant, so a plain atomic is
/// enough and touching never takes a lock.
#[derive(Debug)]
pub struct Activity {
    epoch: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    pub fn new() -> Self {
        Self { epoch: Instant::now(), last_ms: AtomicU64::new(0) }
    }

    /// Marks the connection active now.
    pub fn touch(&self) {
        self.last_ms.store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// Time since the last touch.
    pub fn idle_for(&self) -> Duration {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        Duration::from_millis(now_ms.saturating_sub(self.last_ms.load(Ordering::Relaxed)))
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

struct Entry {
    activity: Arc<Activity>,
    token: CancellationToken,
}

/// Registry of live connections, owned by the server.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<u64, Entry>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection; dropping the guard deregisters it.
    pub fn register(registry: &Arc<Self>) -> ConnectionGuard {
        let id = registry.next_id.fetch_add(1, Ordering::Relaxed);
        let activity = Arc::new(Activity::new());
        let token = CancellationToken::new();

        registry
            .entries
            .lock()
            .expect("connection registry poisoned")
            .insert(id, Entry { activity: Arc::clone(&activity), token: token.clone() });

        ConnectionGuard { id, activity, token, registry: Arc::clone(registry) }
    }

    /// Number of live connections.
    pub fn active(&self) -> usize {
        self.entries.lock().expect("connection registry poisoned").len()
    }

    /// Cancels connections idle longer than `timeout`; returns how many.
    pub fn sweep_idle(&self, timeout: Duration) -> usize {
        let entries = self.entries.lock().expect("connection registry poisoned");
        let mut cancelled = 0;
        for (id, entry) in entries.iter() {
            if !entry.token.is_cancelled() && entry.activity.idle_for() > timeout {
                debug!(connection_id = id, idle = ?entry.activity.idle_for(), "closing idle connection");
                entry.token.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Cancels every connection; used for server drain.
    pub fn cancel_all(&self) {
        let entries = self.entries.lock().expect("connection registry poisoned");
        for entry in entries.values() {
            entry.token.cancel();
        }
    }

    fn deregister(&self, id: u64) {
        self.entries.lock().expect("connection registry poisoned").remove(&id);
    }
}

/// Registration handle held by a connection task for its lifetime.
pub struct ConnectionGuard {
    id: u64,
    activity: Arc<Activity>,
    token: CancellationToken,
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn activity(&self) -> Arc<Activity> {
        Arc::clone(&self.activity)
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}
