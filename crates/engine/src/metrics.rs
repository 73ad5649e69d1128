// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! Executor-oriented metrics.
//!
//! All executor state is single-threaded, so the stats are plain counters
//! mutated in place; snapshots pair them with the receive queue's metrics
//! and are handed to the metrics consumer on every metrics tick.

use serde::Serialize;
use spate_queue::metrics::QueueMetricsSnapshot;
use std::time::Duration;

/// Count-based sampler: fires once every `period` calls.
///
/// Used to decide which anchored emits get a latency timestamp, so the hot
/// path does not read the clock for every tuple.
#[derive(Debug)]
pub struct Sampler {
    period: u32,
    count: u32,
}

impl Sampler {
    /// Creates a sampler firing every `period` calls. Zero disables it.
    #[must_use]
    pub fn new(period: u32) -> Self {
        Sampler { period, count: 0 }
    }

    /// Returns `true` on the sampled calls.
    pub fn should_sample(&mut self) -> bool {
        if self.period == 0 {
            return false;
        }
        self.count += 1;
        if self.count >= self.period {
            self.count = 0;
            true
        } else {
            false
        }
    }
}

/// Running stats owned by one executor.
#[derive(Debug, Default)]
pub struct ExecutorStats {
    /// Messages acked back to spouts.
    pub acked: u64,
    /// Messages failed back to spouts by explicit downstream failure.
    pub failed: u64,
    /// Messages failed back to spouts by timeout expiry.
    pub timeouts: u64,
    /// Iterations skipped because the topology was inactive.
    pub skipped_inactive: u64,
    /// Errors reported by spouts through the collector.
    pub reported_errors: u64,
    /// Most recent sampled ack latency, if any ack carried a timestamp.
    pub ack_latency_last: Option<Duration>,
    /// Number of latency samples observed.
    pub ack_latency_samples: u64,
}

impl ExecutorStats {
    /// Records one sampled ack latency.
    pub fn record_ack_latency(&mut self, latency: Duration) {
        self.ack_latency_last = Some(latency);
        self.ack_latency_samples += 1;
    }
}

/// Point-in-time view of one executor, published on metrics ticks.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecutorMetricsSnapshot {
    /// Executor name.
    pub name: String,
    /// Tuples emitted since start.
    pub emitted: u64,
    /// Current streak of iterations that emitted nothing.
    pub empty_emit_streak: u64,
    /// In-flight anchored messages awaiting ack, fail, or timeout.
    pub pending: usize,
    /// Messages acked back to spouts.
    pub acked: u64,
    /// Messages failed back to spouts by explicit downstream failure.
    pub failed: u64,
    /// Messages failed back to spouts by timeout expiry.
    pub timeouts: u64,
    /// Iterations skipped because the topology was inactive.
    pub skipped_inactive: u64,
    /// Errors reported by spouts through the collector.
    pub reported_errors: u64,
    /// Most recent sampled ack latency in milliseconds.
    pub ack_latency_ms: Option<f64>,
    /// Number of latency samples observed.
    pub ack_latency_samples: u64,
    /// Metrics of the executor's receive queue.
    pub receive_queue: QueueMetricsSnapshot,
}

/// Sink for executor metrics snapshots.
///
/// The reporting side (CSV writers, UIs) is an external collaborator; the
/// executor only hands it snapshots on metrics ticks and at shutdown.
pub trait MetricsConsumer: Send {
    /// Receives one snapshot.
    fn report(&mut self, snapshot: &ExecutorMetricsSnapshot);
}

impl<F> MetricsConsumer for F
where
    F: FnMut(&ExecutorMetricsSnapshot) + Send,
{
    fn report(&mut self, snapshot: &ExecutorMetricsSnapshot) {
        self(snapshot)
    }
}
