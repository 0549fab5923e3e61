//! Bounded LRU cache over resolved routes.
//!
//! Maps `(method, path)` — compared by exact bytes — to the resolved handler
//! and parameter bindings. Only successful resolutions are cached, so a hit
//! is always equal to what the trie would answer; the router clears the
//! cache on any mutation. Hit/miss accounting is atomic and the LRU itself
//! sits behind a short-critical-section mutex, which is safe under the
//! per-connection-task concurrency model.

use crate::router::trie::RouteMatch;
use http::Method;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

const DEFAULT_CAPACITY: usize = 1024;

/// Cache counters for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub(crate) struct RouteCache {
    entries: Mutex<LruCache<(Method, String), RouteMatch>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RouteCache {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(DEFAULT_CAPACITY).expect("non-zero default"));
        Self { entries: Mutex::new(LruCache::new(capacity)), hits: AtomicU64::new(0), misses: AtomicU64::new(0) }
    }

    pub(crate) fn get(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let key = (method.clone(), path.to_owned());
        let mut entries = self.entries.lock().expect("route cache poisoned");

        match entries.get(&key) {
            Some(resolution) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(resolution.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub(crate) fn insert(&self, method: Method, path: &str, resolution: RouteMatch) {
        let mut entries = self.entries.lock().expect("route cache poisoned");
        entries.put((method, path.to_owned()), resolution);
    }

    /// Drops every entry; called on any route-table mutation.
    pub(crate) fn clear(&self) {
        self.entries.lock().expect("route cache poisoned").clear();
    }

    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.lock().expect("route cache poisoned").len(),
        }
    }
}
