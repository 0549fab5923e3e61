//! Bulk allocator for response header bytes.
//!
//! Header names and values built at request time are carved out of one
//! growing region and handed around as refcounted `Bytes` slices. Releasing
//! the event retires the whole region in a single [`HeaderArena::reset`];
//! there is deliberately no way to free an individual header, which is what
//! rules out the use-after-free class that per-entry freeing invites.

use bytes::{Bytes, BytesMut};
use http::HeaderValue;
use http::header::InvalidHeaderValue;

const DEFAULT_REGION_SIZE: usize = 4 * 1024;

/// Region-based allocator tied to one response's lifetime.
#[derive(Debug)]
pub struct HeaderArena {
    region: BytesMut,
    region_size: usize,
    bytes_allocated: usize,
}

impl HeaderArena {
    pub fn new() -> Self {
        Self::with_region_size(DEFAULT_REGION_SIZE)
    }

    pub fn with_region_size(region_size: usize) -> Self {
        Self { region: BytesMut::with_capacity(region_size), region_size, bytes_allocated: 0 }
    }

    /// Copies `bytes` into the region and returns a slice sharing it.
    pub fn alloc(&mut self, bytes: &[u8]) -> Bytes {
        if self.region.capacity() - self.region.len() < bytes.len() {
            // the old region stays alive behind the slices already handed out
            self.region = BytesMut::with_capacity(std::cmp::max(self.region_size, bytes.len()));
        }

        self.region.extend_from_slice(bytes);
        self.bytes_allocated += bytes.len();
        self.region.split().freeze()
    }

    /// Allocates a header value backed by the region.
    pub fn alloc_value(&mut self, bytes: &[u8]) -> Result<HeaderValue, InvalidHeaderValue> {
        HeaderValue::from_maybe_shared(self.alloc(bytes))
    }

    /// Retires the region in one operation.
    ///
    /// Slices handed out earlier stay valid through their refcounts; the
    /// arena itself starts over with a fresh region.
    pub fn reset(&mut self) {
        self.region = BytesMut::with_capacity(self.region_size);
        self.bytes_allocated = 0;
    }

    /// Total bytes served since the last reset.
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }
}

impl Default for HeaderArena {
    fn default() -> Self {
        Self::new()
    }
}
