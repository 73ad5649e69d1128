// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! Set of traits and structures used to implement spouts.
//!
//! A spout is a source operator: it pulls data from some external origin and
//! emits tuples into the topology through the collector it is handed on
//! every `next_tuple` call.
//!
//! # Lifecycle
//!
//! 1. The executor calls `open` once per task before its first iteration.
//! 2. `activate` / `deactivate` are called on topology activation
//!    transitions; `next_tuple` is only called while active.
//! 3. `ack` / `fail` report the fate of anchored emits. `fail` carries the
//!    reason: an explicit downstream failure or a timeout.
//! 4. The executor deactivates the spout during orderly shutdown.
//!
//! # Threading
//!
//! All callbacks run on the executor thread that owns the spout; no
//! synchronization is required inside implementations.

use crate::collector::SpoutOutputCollector;
use crate::error::SpoutError;
use crate::message::TaskId;
use spate_config::WorkerConfig;
use std::collections::HashMap;
use std::fmt;

/// Why a message was failed back to its spout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// A downstream acker reported explicit failure.
    FailStream,
    /// The message was not fully acknowledged within the message timeout.
    Timeout,
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailReason::FailStream => "FAIL-STREAM",
            FailReason::Timeout => "TIMEOUT",
        };
        write!(f, "{label}")
    }
}

/// Per-task context handed to `open`.
#[derive(Debug, Clone)]
pub struct SpoutContext {
    /// The task id this spout instance runs as.
    pub task_id: TaskId,
    /// The name of the component the task belongs to.
    pub component: String,
}

/// A user-supplied source operator driven by a spout executor.
pub trait Spout {
    /// The tuple payload type emitted by this spout.
    type Payload;
    /// The user-level identifier attached to reliable emits.
    type MessageId;

    /// Called once per task before the executor's first iteration.
    ///
    /// # Errors
    ///
    /// Returning an error terminates the executor before it starts.
    fn open(&mut self, conf: &WorkerConfig, ctx: &SpoutContext) -> Result<(), SpoutError> {
        let _ = (conf, ctx);
        Ok(())
    }

    /// Called when the topology transitions to active.
    ///
    /// # Errors
    ///
    /// Errors are wrapped with context and propagated to the supervisor.
    fn activate(&mut self) -> Result<(), SpoutError> {
        Ok(())
    }

    /// Called when the topology transitions to inactive.
    ///
    /// # Errors
    ///
    /// Errors are wrapped with context and propagated to the supervisor.
    fn deactivate(&mut self) -> Result<(), SpoutError> {
        Ok(())
    }

    /// Asked for the next unit of work. Emit zero or more tuples through
    /// `out`; emitting nothing makes the executor idle under its empty-emit
    /// wait strategy.
    ///
    /// # Errors
    ///
    /// Errors are wrapped with context and propagated to the supervisor.
    fn next_tuple(
        &mut self,
        out: &mut SpoutOutputCollector<Self::Payload, Self::MessageId>,
    ) -> Result<(), SpoutError>;

    /// The message `id` was fully processed downstream.
    ///
    /// # Errors
    ///
    /// Errors are wrapped with context and propagated to the supervisor.
    fn ack(&mut self, id: Self::MessageId) -> Result<(), SpoutError> {
        let _ = id;
        Ok(())
    }

    /// The message `id` failed downstream or timed out.
    ///
    /// # Errors
    ///
    /// Errors are wrapped with context and propagated to the supervisor.
    fn fail(&mut self, id: Self::MessageId, reason: FailReason) -> Result<(), SpoutError> {
        let _ = (id, reason);
        Ok(())
    }

    /// New worker credentials. Override to opt in to re-delivery.
    fn credentials_changed(&mut self, credentials: &HashMap<String, String>) {
        let _ = credentials;
    }
}
