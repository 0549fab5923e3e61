//! Cached `Date` header values.
//!
//! HTTP dates carry one-second resolution, so rendering one per response is
//! wasted work under load. Each server owns a [`DateService`] that renders
//! on demand and hands out the cached value until it goes stale; reads stay
//! lock-free through `arc-swap`, and when several tasks cross the staleness
//! boundary together the worst case is a few redundant renders racing to
//! store, all of them valid.
//!
//! The staleness window comes from `date_header_max_age_ms` in the server
//! configuration; there is no background task and nothing to shut down.

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::HeaderValue;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// On-demand refreshed `Date` header source.
pub(crate) struct DateService {
    cached: ArcSwap<RenderedDate>,
    max_age: Duration,
}

struct RenderedDate {
    value: HeaderValue,
    at: Instant,
}

impl RenderedDate {
    fn now() -> Self {
        let mut buf = faf_http_date::get_date_buff_no_key();
        faf_http_date::get_date_no_key(&mut buf);
        // the formatter emits a fixed-layout ascii date
        let value = HeaderValue::from_maybe_shared(Bytes::from_owner(buf)).expect("http date is valid ascii");
        Self { value, at: Instant::now() }
    }
}

impl DateService {
    pub(crate) fn new(max_age: Duration) -> Self {
        Self { cached: ArcSwap::from_pointee(RenderedDate::now()), max_age }
    }

    /// The current `Date` value, re-rendered only once the cache went stale.
    pub(crate) fn header_value(&self) -> HeaderValue {
        let cached = self.cached.load();
        if cached.at.elapsed() <= self.max_age {
            return cached.value.clone();
        }

        let fresh = Arc::new(RenderedDate::now());
        let value = fresh.value.clone();
        self.cached.store(fresh);
        value
    }
}
