// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! Bounded lock-free queues for thread-per-executor stream workers.
//!
//! The queue couples a fixed-capacity ring (single- or multi-producer,
//! always single-consumer) with per-producer batch staging, a pluggable
//! back-pressure wait strategy, and per-queue rate metrics. Producers never
//! drop: a full ring either hands the item back ([`error::Full`]) or blocks
//! under the configured wait strategy until space frees or the caller is
//! cancelled.

pub mod cancel;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod wait;

mod mpsc;
mod spsc;

pub use cancel::CancelToken;
pub use queue::{Consumer, DrainHandler, Producer, ProducerKind, bounded};
