//! Metrics collection for the resolution engine
//!
//! Thread-safe counters using atomic operations, with a point-in-time
//! snapshot for the administrative surface.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector for artifact resolution
#[derive(Debug, Default)]
pub struct RelayMetrics {
    // Request statistics
    total_requests: AtomicU64,

    // Hosted statistics
    hosted_hits: AtomicU64,
    hosted_misses: AtomicU64,

    // Proxy statistics
    proxy_cache_hits: AtomicU64,
    proxy_cache_misses: AtomicU64,
    upstream_fetches: AtomicU64,
    upstream_failures: AtomicU64,
    coalesced_waiters: AtomicU64,
    stale_served: AtomicU64,

    // Byte statistics
    bytes_served: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub hosted_hits: u64,
    pub hosted_misses: u64,
    pub proxy_cache_hits: u64,
    pub proxy_cache_misses: u64,
    pub upstream_fetches: u64,
    pub upstream_failures: u64,
    pub coalesced_waiters: u64,
    pub stale_served: u64,
    pub bytes_served: u64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hosted(&self, hit: bool) {
        if hit {
            self.hosted_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hosted_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_proxy_cache(&self, hit: bool) {
        if hit {
            self.proxy_cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.proxy_cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an upstream fetch attempt by the owning request of an
    /// in-flight entry
    pub fn record_upstream_fetch(&self, success: bool) {
        self.upstream_fetches.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.upstream_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a request that joined an existing in-flight fetch instead
    /// of going upstream itself
    pub fn record_coalesced_waiter(&self) {
        self.coalesced_waiters.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_served(&self) {
        self.stale_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_served(&self, bytes: u64) {
        self.bytes_served.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            hosted_hits: self.hosted_hits.load(Ordering::Relaxed),
            hosted_misses: self.hosted_misses.load(Ordering::Relaxed),
            proxy_cache_hits: self.proxy_cache_hits.load(Ordering::Relaxed),
            proxy_cache_misses: self.proxy_cache_misses.load(Ordering::Relaxed),
            upstream_fetches: self.upstream_fetches.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            coalesced_waiters: self.coalesced_waiters.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            bytes_served: self.bytes_served.load(Ordering::Relaxed),
        }
    }
}
