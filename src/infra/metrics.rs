//! Lock-free metrics collection and periodic reporting
//!
//! Counters are plain atomics updated from every route stream task.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical counters
//! only; do not use them for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Counters shared by the consumer and every publisher invocation
pub struct Metrics {
    routes_received: AtomicU64,
    routes_completed: AtomicU64,
    routes_cancelled: AtomicU64,
    routes_aborted: AtomicU64,
    routes_active: AtomicU64,
    decode_errors: AtomicU64,
    export_errors: AtomicU64,
    positions_published: AtomicU64,
    publish_failures: AtomicU64,
    publish_retries: AtomicU64,
    /// Positions published at last report (for rate calculation)
    last_positions_published: AtomicU64,
    started_at: Instant,
    last_report: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            routes_received: AtomicU64::new(0),
            routes_completed: AtomicU64::new(0),
            routes_cancelled: AtomicU64::new(0),
            routes_aborted: AtomicU64::new(0),
            routes_active: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            export_errors: AtomicU64::new(0),
            positions_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            publish_retries: AtomicU64::new(0),
            last_positions_published: AtomicU64::new(0),
            started_at: now,
            last_report: parking_lot::Mutex::new(now),
        }
    }

    #[inline]
    pub fn record_route_received(&self) {
        self.routes_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stream_started(&self) {
        self.routes_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Stream left the publish loop normally or through the shutdown signal
    #[inline]
    pub fn record_stream_finished(&self, cancelled: bool) {
        self.routes_active.fetch_sub(1, Ordering::Relaxed);
        if cancelled {
            self.routes_cancelled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.routes_completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Stream stopped on a publish failure under the abort policy
    #[inline]
    pub fn record_stream_aborted(&self) {
        self.routes_active.fetch_sub(1, Ordering::Relaxed);
        self.routes_aborted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_export_error(&self) {
        self.export_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_position_published(&self) {
        self.positions_published.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_publish_retry(&self) {
        self.publish_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn positions_published(&self) -> u64 {
        self.positions_published.load(Ordering::Relaxed)
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }

    /// Snapshot all counters and compute the publish rate since the last report
    pub fn report(&self) -> MetricsSummary {
        let now = Instant::now();
        let elapsed = {
            let mut last = self.last_report.lock();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *last = now;
            elapsed
        };

        let published = self.positions_published.load(Ordering::Relaxed);
        let previous = self.last_positions_published.swap(published, Ordering::Relaxed);
        let positions_per_sec =
            if elapsed > 0.0 { published.saturating_sub(previous) as f64 / elapsed } else { 0.0 };

        MetricsSummary {
            uptime_secs: now.duration_since(self.started_at).as_secs(),
            routes_received: self.routes_received.load(Ordering::Relaxed),
            routes_completed: self.routes_completed.load(Ordering::Relaxed),
            routes_cancelled: self.routes_cancelled.load(Ordering::Relaxed),
            routes_aborted: self.routes_aborted.load(Ordering::Relaxed),
            routes_active: self.routes_active.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            export_errors: self.export_errors.load(Ordering::Relaxed),
            positions_published: published,
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            publish_retries: self.publish_retries.load(Ordering::Relaxed),
            positions_per_sec,
        }
    }
}

/// Point-in-time view of the counters
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub uptime_secs: u64,
    pub routes_received: u64,
    pub routes_completed: u64,
    pub routes_cancelled: u64,
    pub routes_aborted: u64,
    pub routes_active: u64,
    pub decode_errors: u64,
    pub export_errors: u64,
    pub positions_published: u64,
    pub publish_failures: u64,
    pub publish_retries: u64,
    pub positions_per_sec: f64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            uptime_secs = %self.uptime_secs,
            routes_received = %self.routes_received,
            routes_completed = %self.routes_completed,
            routes_cancelled = %self.routes_cancelled,
            routes_aborted = %self.routes_aborted,
            routes_active = %self.routes_active,
            decode_errors = %self.decode_errors,
            export_errors = %self.export_errors,
            positions_published = %self.positions_published,
            publish_failures = %self.publish_failures,
            publish_retries = %self.publish_retries,
            positions_per_sec = %format!("{:.1}", self.positions_per_sec),
            "metrics"
        );
    }
}
