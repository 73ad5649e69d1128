// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! Spout executor core for a distributed stream worker.
//!
//! An executor drives the source tasks of one component: it repeatedly asks
//! each spout for its next tuple, routes emitted tuples to local peer queues
//! or the remote sender, tracks anchored messages in a rotating pending map
//! until they are acked, failed, or timed out, and honors back-pressure and
//! activation state throughout. Everything cross-thread goes through the
//! bounded queues of `spate-queue`; the executor itself is single-threaded.

pub mod collector;
pub mod config;
pub mod error;
pub mod executor;
pub mod message;
pub mod metrics;
pub mod rotating_map;
pub mod spout;
pub mod transfer;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
