// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! Pluggable idle policies for producers and executor loops.
//!
//! A strategy is called with the current idle-iteration count and returns the
//! next count. Implementations decide whether to spin, yield, park, or sleep
//! for that iteration. Strategies are stateless between calls; all
//! progression state travels through the count.

use spate_config::WaitStrategyConfig;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// An idle-loop policy.
///
/// Two slots exist per executor: one for empty-emit iterations and one for
/// back-pressure on full queues. The same strategy instance may be shared by
/// any number of threads.
pub trait WaitStrategy: Send + Sync {
    /// Idles for one iteration and returns the next idle count.
    fn idle(&self, n: u64) -> u64;
}

/// Spin first, then yield, then park for doubling durations up to a cap.
#[derive(Debug, Clone)]
pub struct ProgressiveWait {
    spin_count: u64,
    yield_count: u64,
    max_park_micros: u64,
}

impl ProgressiveWait {
    /// Creates a progressive strategy with the given phase boundaries.
    #[must_use]
    pub fn new(spin_count: u64, yield_count: u64, max_park_micros: u64) -> Self {
        ProgressiveWait {
            spin_count,
            yield_count: yield_count.max(spin_count),
            max_park_micros: max_park_micros.max(1),
        }
    }
}

impl WaitStrategy for ProgressiveWait {
    fn idle(&self, n: u64) -> u64 {
        if n < self.spin_count {
            std::hint::spin_loop();
        } else if n < self.yield_count {
            thread::yield_now();
        } else {
            // Doubling park, clamped: the shift saturates well before the cap
            // can overflow a u64 of microseconds.
            let exp = (n - self.yield_count).min(20);
            let micros = (1u64 << exp).min(self.max_park_micros);
            thread::park_timeout(Duration::from_micros(micros));
        }
        n + 1
    }
}

/// Sleep a fixed duration per idle call.
#[derive(Debug, Clone)]
pub struct SleepWait {
    duration: Duration,
}

impl SleepWait {
    /// Creates a strategy sleeping `duration` on every idle call.
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        SleepWait { duration }
    }
}

impl WaitStrategy for SleepWait {
    fn idle(&self, n: u64) -> u64 {
        thread::sleep(self.duration);
        n + 1
    }
}

/// Return immediately without waiting.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWait;

impl WaitStrategy for NoWait {
    fn idle(&self, n: u64) -> u64 {
        n + 1
    }
}

/// Builds the strategy selected by a configuration slot.
#[must_use]
pub fn from_config(config: &WaitStrategyConfig) -> Arc<dyn WaitStrategy> {
    match *config {
        WaitStrategyConfig::Progressive {
            spin_count,
            yield_count,
            max_park_micros,
        } => Arc::new(ProgressiveWait::new(spin_count, yield_count, max_park_micros)),
        WaitStrategyConfig::Sleep { millis } => {
            Arc::new(SleepWait::new(Duration::from_millis(millis)))
        }
        WaitStrategyConfig::Busy => Arc::new(NoWait),
    }
}
