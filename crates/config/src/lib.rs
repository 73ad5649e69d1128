// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! Worker configuration for the spate executor core.
//!
//! The model covers the knobs consumed by the queue and engine crates:
//! spout-pending limits, producer batching, wait strategies, and the message
//! timeout that drives pending-map rotation. Values deserialize from YAML and
//! are validated before use.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub mod error;

use error::Error;

/// Pluggable idle policy selection for a wait-strategy slot.
///
/// Two slots exist on an executor: one used when `next_tuple` emitted nothing,
/// and one used by producers when a destination queue is full.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum WaitStrategyConfig {
    /// Spin first, then yield, then park for growing durations up to a cap.
    Progressive {
        /// Number of busy-spin iterations before yielding.
        #[serde(default = "WaitStrategyConfig::default_spin_count")]
        spin_count: u64,
        /// Iteration count (inclusive of the spin phase) before parking.
        #[serde(default = "WaitStrategyConfig::default_yield_count")]
        yield_count: u64,
        /// Cap on the park duration, in microseconds.
        #[serde(default = "WaitStrategyConfig::default_max_park_micros")]
        max_park_micros: u64,
    },
    /// Sleep a fixed number of milliseconds per idle call.
    Sleep {
        /// Sleep duration per idle call, in milliseconds.
        millis: u64,
    },
    /// Return immediately without waiting.
    Busy,
}

impl WaitStrategyConfig {
    const fn default_spin_count() -> u64 {
        1
    }

    const fn default_yield_count() -> u64 {
        1_000
    }

    const fn default_max_park_micros() -> u64 {
        1_000
    }
}

impl Default for WaitStrategyConfig {
    fn default() -> Self {
        WaitStrategyConfig::Progressive {
            spin_count: Self::default_spin_count(),
            yield_count: Self::default_yield_count(),
            max_park_micros: Self::default_max_park_micros(),
        }
    }
}

/// Configuration consumed by a single worker and its spout executors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Maximum number of in-flight anchored tuples per spout task.
    /// Zero means unlimited. Enforced by throttling `next_tuple`, never by
    /// rejecting emits.
    #[serde(default)]
    pub max_spout_pending: u32,

    /// Number of items a producer stages before flushing into a queue.
    /// Must be at least 1; a value of 1 bypasses batching entirely.
    #[serde(default = "WorkerConfig::default_producer_batch_size")]
    pub producer_batch_size: usize,

    /// Capacity of each executor receive queue. Must be a power of two.
    #[serde(default = "WorkerConfig::default_receive_queue_capacity")]
    pub receive_queue_capacity: usize,

    /// Idle policy used by the executor when a pass over its spouts emitted
    /// nothing.
    #[serde(default)]
    pub spout_wait_strategy: WaitStrategyConfig,

    /// Idle policy used by producers when a destination queue is full.
    #[serde(default)]
    pub backpressure_wait_strategy: WaitStrategyConfig,

    /// Emit per-tuple debug logs for emits, acks, and fails.
    #[serde(default)]
    pub debug: bool,

    /// End-to-end message timeout. Also the pending-map rotation period, so
    /// an unacked tuple fails between one and two timeouts after emission.
    #[serde(
        with = "humantime_serde",
        default = "WorkerConfig::default_message_timeout"
    )]
    pub message_timeout: Duration,

    /// Sleep applied per iteration while the topology is deactivated.
    #[serde(
        with = "humantime_serde",
        default = "WorkerConfig::default_inactive_sleep"
    )]
    pub inactive_sleep: Duration,

    /// Drain the receive queue every N loop iterations. A cadence of 1 is
    /// permitted when polling is cheap.
    #[serde(default = "WorkerConfig::default_recv_cadence")]
    pub recv_cadence: usize,

    /// Sample ack latency for one in every N anchored emits. Zero disables
    /// latency sampling.
    #[serde(default = "WorkerConfig::default_latency_sample_period")]
    pub latency_sample_period: u32,
}

impl WorkerConfig {
    const fn default_producer_batch_size() -> usize {
        1
    }

    const fn default_receive_queue_capacity() -> usize {
        32_768
    }

    const fn default_message_timeout() -> Duration {
        Duration::from_secs(30)
    }

    const fn default_inactive_sleep() -> Duration {
        Duration::from_millis(100)
    }

    const fn default_recv_cadence() -> usize {
        8
    }

    const fn default_latency_sample_period() -> u32 {
        20
    }

    /// Parses a configuration from a YAML document and validates it.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the document does not deserialize or violates
    /// a constraint.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let config: WorkerConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::DeserializationError {
                details: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the file cannot be read, does not deserialize,
    /// or violates a constraint.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(&path).map_err(|e| Error::FileReadError {
            path: path.as_ref().display().to_string(),
            details: e.to_string(),
        })?;
        Self::from_yaml(&contents)
    }

    /// Checks the cross-field constraints of a parsed configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUserConfig`] naming the violated constraint.
    pub fn validate(&self) -> Result<(), Error> {
        if self.producer_batch_size == 0 {
            return Err(Error::InvalidUserConfig {
                error: "producer_batch_size must be at least 1".into(),
            });
        }
        if !self.receive_queue_capacity.is_power_of_two() {
            return Err(Error::InvalidUserConfig {
                error: format!(
                    "receive_queue_capacity must be a power of two, got {}",
                    self.receive_queue_capacity
                ),
            });
        }
        if self.message_timeout.is_zero() {
            return Err(Error::InvalidUserConfig {
                error: "message_timeout must be non-zero".into(),
            });
        }
        if self.recv_cadence == 0 {
            return Err(Error::InvalidUserConfig {
                error: "recv_cadence must be at least 1".into(),
            });
        }
        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            max_spout_pending: 0,
            producer_batch_size: Self::default_producer_batch_size(),
            receive_queue_capacity: Self::default_receive_queue_capacity(),
            spout_wait_strategy: WaitStrategyConfig::default(),
            backpressure_wait_strategy: WaitStrategyConfig::default(),
            debug: false,
            message_timeout: Self::default_message_timeout(),
            inactive_sleep: Self::default_inactive_sleep(),
            recv_cadence: Self::default_recv_cadence(),
            latency_sample_period: Self::default_latency_sample_period(),
        }
    }
}
