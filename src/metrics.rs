//! Metrics Collection
//!
//! Lock-free counters and gauges for monitoring the RAID layout engine and
//! the tape-aware garbage collectors. Exposition (Prometheus, JSON, ...)
//! is left to the embedding server.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter metric
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by n
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Reset to zero
    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

/// Gauge metric
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    /// Create a new gauge
    pub fn new() -> Self {
        Self::default()
    }

    /// Set to a specific value
    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Metrics of one open RAID layout file
#[derive(Debug, Default)]
pub struct LayoutMetrics {
    /// Number of parity groups computed and written
    pub parity_groups: Counter,
    /// Number of parity-group recoveries performed
    pub recoveries: Counter,
    /// Number of stripe headers repaired at open
    pub headers_repaired: Counter,
    /// Bytes read through the layout
    pub bytes_read: Counter,
    /// Bytes written through the layout
    pub bytes_written: Counter,
}

/// Metrics of one per-space tape-aware garbage collector
#[derive(Debug, Default)]
pub struct GcMetrics {
    /// Number of successful stagerrm calls
    pub nb_stagerrms: Counter,
    /// Total bytes freed by evictions
    pub bytes_freed: Counter,
    /// Current LRU queue size
    pub queue_size: Gauge,
}

// =============================================================================
// Tests
// =============================================================================
