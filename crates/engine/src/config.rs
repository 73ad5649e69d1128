// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration for one spout executor.
//!
//! Note: this is distinct from the worker-level [`WorkerConfig`], which is
//! parsed from the deployment document; an `ExecutorConfig` binds that
//! document to one executor's name and task assignment.

use crate::message::TaskId;
use spate_config::WorkerConfig;
use std::time::Duration;

/// How long an executor keeps draining acks after shutdown is requested.
const DEFAULT_SHUTDOWN_DRAIN: Duration = Duration::from_secs(1);

/// Runtime configuration for a spout executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Name of the executor (component name plus task range, by convention).
    pub name: String,
    /// The tasks assigned to this executor, in spout order.
    pub task_ids: Vec<TaskId>,
    /// The worker-level configuration document.
    pub worker: WorkerConfig,
    /// Deadline for draining outstanding acks during orderly shutdown.
    pub shutdown_drain: Duration,
}

impl ExecutorConfig {
    /// Creates a configuration with default worker settings.
    pub fn new<T>(name: T, task_ids: Vec<TaskId>) -> Self
    where
        T: Into<String>,
    {
        ExecutorConfig {
            name: name.into(),
            task_ids,
            worker: WorkerConfig::default(),
            shutdown_drain: DEFAULT_SHUTDOWN_DRAIN,
        }
    }

    /// Replaces the worker-level configuration.
    #[must_use]
    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }

    /// The pending limit scaled by the number of assigned tasks.
    /// Zero means unlimited.
    #[must_use]
    pub fn effective_max_pending(&self) -> usize {
        self.worker.max_spout_pending as usize * self.task_ids.len()
    }
}

#[cfg(test)]
mod tests {
    #![allow(missing_docs)]
    use super::*;

    #[test]
    fn max_pending_scales_with_tasks() {
        let mut config = ExecutorConfig::new("spout[0-2]", vec![0, 1, 2]);
        assert_eq!(config.effective_max_pending(), 0);
        config.worker.max_spout_pending = 10;
        assert_eq!(config.effective_max_pending(), 30);
    }
}
