// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the bounded queues.
//!
//! A full queue is normal flow control, not a fault: [`Full`] hands the item
//! back so the caller can retry under its back-pressure policy.

use std::fmt;

/// The queue was full and the item could not be published.
///
/// Carries the rejected item so nothing is lost on the non-blocking path.
pub struct Full<T>(pub T);

impl<T> Full<T> {
    /// Returns the item that could not be published.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Full(..)")
    }
}

impl<T> fmt::Display for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Queue is full and the item could not be published")
    }
}

impl<T> std::error::Error for Full<T> {}

/// A blocking publish or flush was abandoned because the caller was
/// cancelled.
///
/// Unsent items remain staged in the producer handle; they may be retried
/// with another flush or dropped with the handle.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Publish cancelled by shutdown")]
pub struct Cancelled;

/// A producer handle for a single-producer queue cannot be cloned.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Queue was constructed for a single producer; additional handles are not allowed")]
pub struct CloneError;
