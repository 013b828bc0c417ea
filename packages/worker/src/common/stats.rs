//! In-process counters for the three service loops.
//!
//! Constructed once at startup and shared by `Arc` through the kernel —
//! every loop records into the same aggregator, nothing is global.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug)]
pub struct WorkerStats {
    started_at: DateTime<Utc>,
    items_processed: AtomicU64,
    items_failed: AtomicU64,
    scans_run: AtomicU64,
    new_items_found: AtomicU64,
    deliveries_sent: AtomicU64,
    deliveries_failed: AtomicU64,
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            items_processed: AtomicU64::new(0),
            items_failed: AtomicU64::new(0),
            scans_run: AtomicU64::new(0),
            new_items_found: AtomicU64::new(0),
            deliveries_sent: AtomicU64::new(0),
            deliveries_failed: AtomicU64::new(0),
        }
    }

    pub fn record_item_processed(&self) {
        self.items_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_item_failed(&self) {
        self.items_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan(&self, new_items: u64) {
        self.scans_run.fetch_add(1, Ordering::Relaxed);
        self.new_items_found.fetch_add(new_items, Ordering::Relaxed);
    }

    pub fn record_delivery_sent(&self) {
        self.deliveries_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failed(&self) {
        self.deliveries_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy for logging and ops reporting.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
            items_processed: self.items_processed.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            scans_run: self.scans_run.load(Ordering::Relaxed),
            new_items_found: self.new_items_found.load(Ordering::Relaxed),
            deliveries_sent: self.deliveries_sent.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub items_processed: u64,
    pub items_failed: u64,
    pub scans_run: u64,
    pub new_items_found: u64,
    pub deliveries_sent: u64,
    pub deliveries_failed: u64,
}
