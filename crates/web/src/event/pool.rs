//! Fixed-capacity object pool with a free bitset.
//!
//! [`Pool`] keeps reclaimed objects in a slot array; a bitset marks which
//! slots hold an object ready for reuse, so acquire is a word-scan and a
//! `take`. The pool allocates lazily up to its capacity; past that it either
//! falls back to direct allocation or refuses, per configuration. Objects
//! returned through [`Pool::release`] are [`Reclaim`]ed first, so an acquired
//! object is indistinguishable from a freshly built one.

use std::sync::Mutex;
use thiserror::Error;
use tracing::trace;

/// Resets an object's mutable state for reuse.
pub trait Reclaim {
    fn reclaim(&mut self);
}

/// Pool sizing and overflow policy.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Disabled pools allocate directly on every acquire
    pub enabled: bool,
    /// Maximum objects the pool itself will create and retain
    pub capacity: usize,
    /// Allocate past capacity instead of failing
    pub fallback: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { enabled: true, capacity: 256, fallback: true }
    }
}

/// Error when the pool is at capacity and fallback is disabled.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("object pool exhausted, capacity {capacity}")]
pub struct PoolExhausted {
    pub capacity: usize,
}

/// A fixed-capacity pool of reusable objects.
pub struct Pool<T> {
    inner: Mutex<PoolInner<T>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    config: PoolConfig,
}

struct PoolInner<T> {
    slots: Vec<Option<T>>,
    free: FreeBitset,
    created: usize,
}

impl<T: Reclaim> Pool<T> {
    pub fn new<F>(config: PoolConfig, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let capacity = if config.enabled { config.capacity } else { 0 };
        Self {
            inner: Mutex::new(PoolInner {
                slots: (0..capacity).map(|_| None).collect(),
                free: FreeBitset::with_capacity(capacity),
                created: 0,
            }),
            factory: Box::new(factory),
            config,
        }
    }

    /// Pops a pooled object, or allocates within the configured policy.
    pub fn acquire(&self) -> Result<T, PoolExhausted> {
        if !self.config.enabled {
            return Ok((self.factory)());
        }

        let mut inner = self.inner.lock().expect("pool poisoned");

        if let Some(index) = inner.free.first_set() {
            inner.free.clear(index);
            if let Some(object) = inner.slots[index].take() {
                return Ok(object);
            }
        }

        if inner.created < self.config.capacity {
            inner.created += 1;
            return Ok((self.factory)());
        }

        if self.config.fallback {
            trace!(capacity = self.config.capacity, "pool exhausted, direct allocation fallback");
            return Ok((self.factory)());
        }

        Err(PoolExhausted { capacity: self.config.capacity })
    }

    /// Reclaims the object and returns it to a free slot, dropping it when
    /// every slot is already occupied.
    pub fn release(&self, mut object: T) {
        if !self.config.enabled {
            return;
        }

        object.reclaim();

        let mut inner = self.inner.lock().expect("pool poisoned");
        if let Some(index) = inner.free.first_clear(self.config.capacity) {
            inner.slots[index] = Some(object);
            inner.free.set(index);
        }
    }

    /// Objects currently parked in the pool.
    pub fn available(&self) -> usize {
        self.inner.lock().expect("pool poisoned").free.count_set()
    }
}

/// Bitset over the slot array; a set bit marks a slot holding a reusable
/// object.
#[derive(Debug)]
struct FreeBitset {
    words: Vec<u64>,
    capacity: usize,
}

impl FreeBitset {
    fn with_capacity(capacity: usize) -> Self {
        Self { words: vec![0; capacity.div_ceil(64)], capacity }
    }

    fn first_set(&self) -> Option<usize> {
        for (word_index, word) in self.words.iter().enumerate() {
            if *word != 0 {
                return Some(word_index * 64 + word.trailing_zeros() as usize);
            }
        }
        None
    }

    fn first_clear(&self, limit: usize) -> Option<usize> {
        for (word_index, word) in self.words.iter().enumerate() {
            if *word != u64::MAX {
                let index = word_index * 64 + word.trailing_ones() as usize;
                if index < limit.min(self.capacity) {
                    return Some(index);
                }
            }
        }
        None
    }

    fn set(&mut self, index: usize) {
        self.words[index / 64] |= 1 << (index % 64);
    }

    fn clear(&mut self, index: usize) {
        self.words[index / 64] &= !(1 << (index % 64));
    }

    fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Counter {
        value: u32,
    }

    impl Reclaim for Counter {
        fn reclaim(&mut self) {
            self.value = 0;
        }
    }

    fn pool(capacity: usize, fallback: bool) -> Pool<Counter> {
        Pool::new(PoolConfig { enabled: true, capacity, fallback }, || Counter { value: 0 })
    }

    #[test]
    fn released_objects_come_back_reclaimed() {
        let pool = pool(2, false);

        let mut object = pool.acquire().unwrap();
        object.value = 42;
        pool.release(object);

        assert_eq!(pool.available(), 1);
        let object = pool.acquire().unwrap();
        // observable state equals a freshly built object's
        assert_eq!(object, Counter { value: 0 });
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn exhaustion_refuses_without_fallback() {
        let pool = pool(2, false);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(pool.acquire(), Err(PoolExhausted { capacity: 2 }));

        pool.release(a);
        assert!(pool.acquire().is_ok());
        drop(b);
    }

    #[test]
    fn exhaustion_allocates_with_fallback() {
        let pool = pool(1, true);

        let a = pool.acquire().unwrap();
        let overflow = pool.acquire().unwrap();

        // both can be released; only one slot exists, the other is dropped
        pool.release(a);
        pool.release(overflow);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn disabled_pool_always_allocates() {
        let pool = Pool::new(PoolConfig { enabled: false, capacity: 8, fallback: false }, || Counter { value: 7 });
        let object = pool.acquire().unwrap();
        assert_eq!(object.value, 7);
        pool.release(object);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn bitset_scans_across_words() {
        let mut bits = FreeBitset::with_capacity(130);
        assert_eq!(bits.first_set(), None);
        assert_eq!(bits.first_clear(130), Some(0));

        for i in 0..130 {
            bits.set(i);
        }
        assert_eq!(bits.first_clear(130), None);
        assert_eq!(bits.count_set(), 130);

        bits.clear(129);
        assert_eq!(bits.first_clear(130), Some(129));
        assert_eq!(bits.first_set(), Some(0));

        bits.clear(0);
        assert_eq!(bits.first_set(), Some(1));
    }
}
