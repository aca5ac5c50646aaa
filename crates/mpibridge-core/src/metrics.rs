//! Atomic counters for lifecycle observability.
//!
//! All counters use relaxed ordering; they are diagnostic only.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug)]
pub struct LifecycleMetrics {
    /// StartUp calls, including no-ops.
    pub startup_calls: AtomicU64,
    /// StartUp calls that found the lifecycle already started.
    pub startup_noops: AtomicU64,
    /// CleanUp calls, including no-ops and finalize-driven calls.
    pub cleanup_calls: AtomicU64,
    /// CleanUp calls that did nothing.
    pub cleanup_noops: AtomicU64,
    /// Times the runtime fired the finalize hook.
    pub finalize_callbacks: AtomicU64,
    /// Primitive calls that returned non-success.
    pub primitive_failures: AtomicU64,
    /// Captured handlers put back on their endpoint.
    pub handlers_restored: AtomicU64,
    /// Attribute keys freed.
    pub keys_released: AtomicU64,
}

impl LifecycleMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            startup_calls: AtomicU64::new(0),
            startup_noops: AtomicU64::new(0),
            cleanup_calls: AtomicU64::new(0),
            cleanup_noops: AtomicU64::new(0),
            finalize_callbacks: AtomicU64::new(0),
            primitive_failures: AtomicU64::new(0),
            handlers_restored: AtomicU64::new(0),
            keys_released: AtomicU64::new(0),
        }
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            startup_calls: Self::get(&self.startup_calls),
            startup_noops: Self::get(&self.startup_noops),
            cleanup_calls: Self::get(&self.cleanup_calls),
            cleanup_noops: Self::get(&self.cleanup_noops),
            finalize_callbacks: Self::get(&self.finalize_callbacks),
            primitive_failures: Self::get(&self.primitive_failures),
            handlers_restored: Self::get(&self.handlers_restored),
            keys_released: Self::get(&self.keys_released),
        }
    }
}

impl Default for LifecycleMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub startup_calls: u64,
    pub startup_noops: u64,
    pub cleanup_calls: u64,
    pub cleanup_noops: u64,
    pub finalize_callbacks: u64,
    pub primitive_failures: u64,
    pub handlers_restored: u64,
    pub keys_released: u64,
}
