//! Cache statistics.
//!
//! Counters live in-process (for the admin stats endpoint) and are mirrored to
//! the `metrics` facade, so a Prometheus recorder installed by the server picks
//! them up.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use serde::Serialize;

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_OPERATIONS_TOTAL: &str = "cache_operations_total";
    pub const CACHE_ERRORS_TOTAL: &str = "cache_errors_total";
}

/// Kinds of store operation that are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Set,
    Del,
    Exists,
    Flush,
    Invalidate,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Set => "set",
            Operation::Del => "del",
            Operation::Exists => "exists",
            Operation::Flush => "flush",
            Operation::Invalidate => "invalidate",
        }
    }
}

/// Running counters per operation type.
#[derive(Debug, Default)]
pub struct OperationStats {
    hits: AtomicU64,
    misses: AtomicU64,
    gets: AtomicU64,
    sets: AtomicU64,
    dels: AtomicU64,
    exists: AtomicU64,
    flushes: AtomicU64,
    invalidations: AtomicU64,
    errors: AtomicU64,
}

impl OperationStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, op: Operation) {
        let slot = match op {
            Operation::Get => &self.gets,
            Operation::Set => &self.sets,
            Operation::Del => &self.dels,
            Operation::Exists => &self.exists,
            Operation::Flush => &self.flushes,
            Operation::Invalidate => &self.invalidations,
        };
        slot.fetch_add(1, Ordering::Relaxed);
        counter!(names::CACHE_OPERATIONS_TOTAL, "op" => op.as_str()).increment(1);
    }

    pub fn record_hit(&self, tier: &'static str) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!(names::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!(names::CACHE_MISSES_TOTAL).increment(1);
    }

    pub fn record_error(&self, op: Operation, backend: &'static str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        counter!(
            names::CACHE_ERRORS_TOTAL,
            "op" => op.as_str(),
            "backend" => backend
        )
        .increment(1);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> OperationCounts {
        OperationCounts {
            get: self.gets.load(Ordering::Relaxed),
            set: self.sets.load(Ordering::Relaxed),
            del: self.dels.load(Ordering::Relaxed),
            exists: self.exists.load(Ordering::Relaxed),
            flush: self.flushes.load(Ordering::Relaxed),
            invalidate: self.invalidations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`OperationStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationCounts {
    pub get: u64,
    pub set: u64,
    pub del: u64,
    pub exists: u64,
    pub flush: u64,
    pub invalidate: u64,
    pub errors: u64,
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Backend currently serving single-key operations.
    pub provider: String,
    pub hits: u64,
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Live keys in the active backend, if it could be counted.
    pub key_count: Option<usize>,
    pub operations: OperationCounts,
}

/// Calculate hit rate as a percentage.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        (hits as f64 / total as f64) * 100.0
    }
}
