// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the executor engine.
//!
//! Important note: It is important not to use `!Send` data types in errors
//! (e.g. avoid using Rc) so that supervisors on other threads can receive
//! them when an executor terminates.

use crate::message::TaskId;
use std::fmt;

/// Boxed error type returned by user spout callbacks.
pub type SpoutError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which spout callback a failure came from, to aid troubleshooting.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SpoutErrorKind {
    /// Errors raised by `open` during executor initialisation.
    Open,
    /// Errors raised by `activate` on an inactive-to-active transition.
    Activate,
    /// Errors raised by `deactivate` on an active-to-inactive transition.
    Deactivate,
    /// Errors raised by `next_tuple` in the hot loop.
    NextTuple,
    /// Errors raised by the user `ack` callback.
    Ack,
    /// Errors raised by the user `fail` callback.
    Fail,
}

impl fmt::Display for SpoutErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SpoutErrorKind::Open => "open",
            SpoutErrorKind::Activate => "activate",
            SpoutErrorKind::Deactivate => "deactivate",
            SpoutErrorKind::NextTuple => "next_tuple",
            SpoutErrorKind::Ack => "ack",
            SpoutErrorKind::Fail => "fail",
        };
        write!(f, "{label}")
    }
}

/// Formats the source chain of an error into a single display string.
#[must_use]
pub fn format_error_sources(error: &(dyn std::error::Error + 'static)) -> String {
    let mut segments = Vec::new();
    let mut current = error.source();
    while let Some(err) = current {
        let msg = err.to_string();
        if !msg.is_empty() {
            segments.push(msg);
        }
        current = err.source();
    }

    if segments.is_empty() {
        String::new()
    } else {
        format!("; source: {}", segments.join(" -> "))
    }
}

/// All errors that can terminate a spout executor.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A wrapper for the config errors.
    #[error("A config error occurred: {0}")]
    Config(#[from] Box<spate_config::error::Error>),

    /// A blocking publish was abandoned because the executor was cancelled.
    #[error("Executor cancelled: {0}")]
    Cancelled(#[from] spate_queue::error::Cancelled),

    /// A fatal invariant violation. The executor terminates and the error
    /// unwinds to its supervisor.
    #[error("Invariant violation in executor `{executor}`: {message}")]
    Invariant {
        /// The name of the executor that observed the violation.
        executor: String,
        /// What was violated.
        message: String,
    },

    /// A tuple was routed to a task this worker does not know.
    #[error("Unknown destination task {task}")]
    UnknownTask {
        /// The destination task id.
        task: TaskId,
    },

    /// A wrapper for user spout callback failures.
    #[error("A spout error occurred in task {task} ({kind}): {error}{source_detail}")]
    Spout {
        /// The task whose spout raised the error.
        task: TaskId,
        /// Which callback failed.
        kind: SpoutErrorKind,
        /// The error that occurred.
        error: String,
        /// Pre-formatted representation of the source chain used when
        /// rendering the error.
        source_detail: String,
    },
}

impl Error {
    /// Wraps a user spout callback failure with its context.
    #[must_use]
    pub fn spout(task: TaskId, kind: SpoutErrorKind, error: &SpoutError) -> Self {
        Error::Spout {
            task,
            kind,
            error: error.to_string(),
            source_detail: format_error_sources(error.as_ref()),
        }
    }

    /// Returns the name of the error variant as a string.
    #[must_use]
    pub fn variant_name(&self) -> String {
        match self {
            Error::Config(_) => "Config",
            Error::Cancelled(_) => "Cancelled",
            Error::Invariant { .. } => "Invariant",
            Error::UnknownTask { .. } => "UnknownTask",
            Error::Spout { .. } => "Spout",
        }
        .to_owned()
    }
}
