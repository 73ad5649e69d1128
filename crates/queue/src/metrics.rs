// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! Queue-oriented metrics.
//!
//! Producers record arrivals and insert failures with relaxed atomics; the
//! consumer side assembles a [`QueueMetricsSnapshot`] on demand. Arrival rate
//! is tracked over a sliding window of fixed chunks, and the sojourn-time
//! estimate is derived from population and arrival rate rather than from
//! per-item timestamps.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A monotone counter sampled with relaxed ordering.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Adds one to the counter.
    pub fn increment(&self) {
        self.increment_by(1);
    }

    /// Adds `by` to the counter.
    pub fn increment_by(&self, by: u64) {
        let _ = self.0.fetch_add(by, Ordering::Relaxed);
    }

    /// Reads the current value.
    #[must_use]
    pub fn sample(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

const RATE_CHUNKS: usize = 10;

/// Sliding-window rate tracker.
///
/// The window is divided into [`RATE_CHUNKS`] chunks; a notification lands in
/// the current chunk and chunks older than the window are rotated out on the
/// next touch. Notifications are amortized by producer-side batching, so the
/// lock is uncontended in steady state.
#[derive(Debug)]
pub struct RateTracker {
    chunk_duration: Duration,
    inner: Mutex<RateInner>,
}

#[derive(Debug)]
struct RateInner {
    chunks: [u64; RATE_CHUNKS],
    head: usize,
    head_started: Instant,
}

impl RateTracker {
    /// Creates a tracker covering the given sliding window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        RateTracker {
            chunk_duration: window / RATE_CHUNKS as u32,
            inner: Mutex::new(RateInner {
                chunks: [0; RATE_CHUNKS],
                head: 0,
                head_started: Instant::now(),
            }),
        }
    }

    /// Records `count` arrivals at the current instant.
    pub fn notify(&self, count: u64) {
        let mut inner = self.inner.lock();
        self.rotate(&mut inner);
        let head = inner.head;
        inner.chunks[head] += count;
    }

    /// Returns the observed rate in items per second over the window.
    #[must_use]
    pub fn rate_per_sec(&self) -> f64 {
        let mut inner = self.inner.lock();
        self.rotate(&mut inner);
        let total: u64 = inner.chunks.iter().sum();
        let window_secs = self.chunk_duration.as_secs_f64() * RATE_CHUNKS as f64;
        total as f64 / window_secs
    }

    fn rotate(&self, inner: &mut RateInner) {
        let mut elapsed = inner.head_started.elapsed();
        let mut advanced = 0;
        while elapsed >= self.chunk_duration && advanced < RATE_CHUNKS {
            inner.head = (inner.head + 1) % RATE_CHUNKS;
            inner.chunks[inner.head] = 0;
            inner.head_started += self.chunk_duration;
            elapsed -= self.chunk_duration;
            advanced += 1;
        }
        if advanced == RATE_CHUNKS {
            // Idle longer than the whole window; restart from now.
            inner.chunks = [0; RATE_CHUNKS];
            inner.head_started = Instant::now();
        }
    }
}

/// Counters and rate tracking shared by all handles of one queue.
#[derive(Debug)]
pub struct QueueMetrics {
    /// Count of publish attempts rejected because the queue was full.
    pub insert_failures: Counter,
    /// Count of consume calls that found the queue empty.
    pub empty_polls: Counter,
    /// Arrival-rate tracker fed by producer flushes.
    pub arrival: RateTracker,
}

impl QueueMetrics {
    const RATE_WINDOW: Duration = Duration::from_secs(10);

    pub(crate) fn new() -> Self {
        QueueMetrics {
            insert_failures: Counter::default(),
            empty_polls: Counter::default(),
            arrival: RateTracker::new(Self::RATE_WINDOW),
        }
    }

    /// Assembles a snapshot for the given queue dimensions.
    #[must_use]
    pub fn snapshot(&self, name: &str, capacity: usize, population: usize) -> QueueMetricsSnapshot {
        let arrival_rate_secs = self.arrival.rate_per_sec();
        let sojourn_time_ms = population as f64 / arrival_rate_secs.max(f64::EPSILON) * 1_000.0;
        QueueMetricsSnapshot {
            name: name.to_owned(),
            capacity,
            population,
            pct_full: population as f64 / capacity as f64,
            arrival_rate_secs,
            sojourn_time_ms,
            insert_failures: self.insert_failures.sample(),
            empty_polls: self.empty_polls.sample(),
        }
    }
}

/// Point-in-time view of one queue, published on metrics ticks.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueueMetricsSnapshot {
    /// Queue name.
    pub name: String,
    /// Fixed capacity of the ring.
    pub capacity: usize,
    /// Estimated number of items currently queued.
    pub population: usize,
    /// `population / capacity`.
    pub pct_full: f64,
    /// Observed arrival rate in items per second.
    pub arrival_rate_secs: f64,
    /// Estimated queueing delay in milliseconds, derived from population and
    /// arrival rate.
    pub sojourn_time_ms: f64,
    /// Count of publish attempts rejected because the queue was full.
    pub insert_failures: u64,
    /// Count of consume calls that found the queue empty.
    pub empty_polls: u64,
}

#[cfg(test)]
mod tests {
    #![allow(missing_docs)]
    use super::*;

    #[test]
    fn counter_accumulates() {
        let counter = Counter::default();
        counter.increment();
        counter.increment_by(4);
        assert_eq!(counter.sample(), 5);
    }

    #[test]
    fn rate_reflects_notifications() {
        let tracker = RateTracker::new(Duration::from_secs(10));
        tracker.notify(100);
        // 100 items over a 10s window.
        let rate = tracker.rate_per_sec();
        assert!((rate - 10.0).abs() < 1.0, "rate was {rate}");
    }

    #[test]
    fn snapshot_derives_sojourn_time() {
        let metrics = QueueMetrics::new();
        metrics.arrival.notify(1_000);
        let snapshot = metrics.snapshot("q", 1_024, 512);
        assert_eq!(snapshot.capacity, 1_024);
        assert_eq!(snapshot.population, 512);
        assert!(snapshot.pct_full > 0.49 && snapshot.pct_full < 0.51);
        // 512 queued at ~100 items/sec is ~5.1s of sojourn.
        assert!(snapshot.sojourn_time_ms > 4_000.0);
    }
}
