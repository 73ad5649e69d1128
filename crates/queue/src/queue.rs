// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! Bounded queue handles shared between producer executors and a single
//! consumer executor.
//!
//! A queue is created with [`bounded`], yielding one [`Producer`] and one
//! [`Consumer`]. Additional producer handles come from
//! [`Producer::clone_handle`]; a queue constructed with
//! [`ProducerKind::Single`] refuses them, which is what makes the faster
//! single-producer ring safe to offer at all.
//!
//! Every producer handle stages items in its own batch buffer and flushes
//! them into the ring in bulk, amortizing cursor contention and arrival-rate
//! notifications. A batch target of 1 bypasses staging and publishes
//! directly.

use crate::cancel::CancelToken;
use crate::error::{Cancelled, CloneError, Full};
use crate::metrics::{QueueMetrics, QueueMetricsSnapshot};
use crate::wait::WaitStrategy;
use crate::{mpsc, spsc};
use std::collections::VecDeque;
use std::sync::Arc;

/// How many distinct threads may hold producer handles to one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerKind {
    /// Exactly one producer handle, ever. Uses the faster two-cursor ring.
    Single,
    /// Any number of producer handles.
    Multi,
}

/// Consumer-side callback for [`Consumer::consume`].
///
/// `accept` is invoked once per drained item in FIFO order, then `flush`
/// exactly once if at least one item was drained.
pub trait DrainHandler<T> {
    /// Handles one drained item.
    fn accept(&mut self, item: T);
    /// Called once after a non-empty drain.
    fn flush(&mut self);
}

/// Bound on sentinel retries in [`Producer::halt_with_interrupt`].
const HALT_ATTEMPTS: usize = 64;

struct Shared {
    name: String,
    capacity: usize,
    batch_target: usize,
    metrics: QueueMetrics,
    wait: Arc<dyn WaitStrategy>,
}

enum ProducerRing<T> {
    Single(spsc::Producer<T>),
    Multi(mpsc::Producer<T>),
}

impl<T> ProducerRing<T> {
    fn push(&mut self, value: T) -> Result<(), T> {
        match self {
            ProducerRing::Single(ring) => ring.push(value),
            ProducerRing::Multi(ring) => ring.push(value),
        }
    }

    fn push_batch(&mut self, items: &mut VecDeque<T>) -> usize {
        match self {
            ProducerRing::Single(ring) => ring.push_batch(items),
            ProducerRing::Multi(ring) => ring.push_batch(items),
        }
    }

    fn len(&self) -> usize {
        match self {
            ProducerRing::Single(ring) => ring.len(),
            ProducerRing::Multi(ring) => ring.len(),
        }
    }
}

enum ConsumerRing<T> {
    Single(spsc::Consumer<T>),
    Multi(mpsc::Consumer<T>),
}

impl<T> ConsumerRing<T> {
    fn pop(&mut self) -> Option<T> {
        match self {
            ConsumerRing::Single(ring) => ring.pop(),
            ConsumerRing::Multi(ring) => ring.pop(),
        }
    }

    fn len(&self) -> usize {
        match self {
            ConsumerRing::Single(ring) => ring.len(),
            ConsumerRing::Multi(ring) => ring.len(),
        }
    }
}

/// Creates a bounded queue and returns its two halves.
///
/// `capacity` is rounded up to the next power of two. The effective producer
/// batch target is `max(1, min(batch_size, capacity / 2))`. `wait` is the
/// back-pressure strategy consulted by blocking publishes.
pub fn bounded<T>(
    name: &str,
    capacity: usize,
    kind: ProducerKind,
    batch_size: usize,
    wait: Arc<dyn WaitStrategy>,
) -> (Producer<T>, Consumer<T>) {
    let capacity = capacity.next_power_of_two().max(2);
    let batch_target = batch_size.clamp(1, (capacity / 2).max(1));
    let shared = Arc::new(Shared {
        name: name.to_owned(),
        capacity,
        batch_target,
        metrics: QueueMetrics::new(),
        wait,
    });
    let (producer_ring, consumer_ring) = match kind {
        ProducerKind::Single => {
            let (tx, rx) = spsc::ring(capacity);
            (ProducerRing::Single(tx), ConsumerRing::Single(rx))
        }
        ProducerKind::Multi => {
            let (tx, rx) = mpsc::ring(capacity);
            (ProducerRing::Multi(tx), ConsumerRing::Multi(rx))
        }
    };
    (
        Producer {
            ring: producer_ring,
            shared: shared.clone(),
            batch: VecDeque::with_capacity(batch_target),
        },
        Consumer {
            ring: consumer_ring,
            shared,
        },
    )
}

/// A producing handle with its own staging batch.
pub struct Producer<T> {
    ring: ProducerRing<T>,
    shared: Arc<Shared>,
    batch: VecDeque<T>,
}

impl<T> Producer<T> {
    /// Publishes one item without blocking and without touching the staging
    /// batch. A full ring is normal flow control.
    ///
    /// # Errors
    ///
    /// Returns [`Full`] carrying the item back when the ring has no space.
    pub fn try_publish(&mut self, value: T) -> Result<(), Full<T>> {
        match self.ring.push(value) {
            Ok(()) => {
                self.shared.metrics.arrival.notify(1);
                Ok(())
            }
            Err(back) => {
                self.shared.metrics.insert_failures.increment();
                Err(Full(back))
            }
        }
    }

    /// Moves items from the head of `items` into the ring without blocking.
    /// Returns the number accepted (0..=len).
    pub fn try_publish_batch(&mut self, items: &mut VecDeque<T>) -> usize {
        let accepted = self.ring.push_batch(items);
        if accepted > 0 {
            self.shared.metrics.arrival.notify(accepted as u64);
        } else if !items.is_empty() {
            self.shared.metrics.insert_failures.increment();
        }
        accepted
    }

    /// Publishes one item, blocking under back-pressure. Never drops.
    ///
    /// With a batch target above 1 the item is staged and the whole batch is
    /// flushed once the target is reached; otherwise the item goes straight
    /// to the ring, idling under the queue's wait strategy while full.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] once `cancel` fires; the unsent item stays
    /// staged in this handle.
    pub fn publish(&mut self, value: T, cancel: &CancelToken) -> Result<(), Cancelled> {
        if self.shared.batch_target == 1 {
            let mut item = value;
            let mut idle = 0;
            loop {
                match self.ring.push(item) {
                    Ok(()) => {
                        self.shared.metrics.arrival.notify(1);
                        return Ok(());
                    }
                    Err(back) => {
                        item = back;
                        self.shared.metrics.insert_failures.increment();
                        if cancel.is_cancelled() {
                            self.batch.push_back(item);
                            return Err(Cancelled);
                        }
                        idle = self.shared.wait.idle(idle);
                    }
                }
            }
        } else {
            self.batch.push_back(value);
            if self.batch.len() >= self.shared.batch_target {
                self.flush(cancel)
            } else {
                Ok(())
            }
        }
    }

    /// Drains the staging batch into the ring, blocking under back-pressure
    /// until every staged item is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] once `cancel` fires; remaining items stay
    /// staged.
    pub fn flush(&mut self, cancel: &CancelToken) -> Result<(), Cancelled> {
        let mut idle = 0;
        while !self.batch.is_empty() {
            let accepted = self.ring.push_batch(&mut self.batch);
            if accepted > 0 {
                self.shared.metrics.arrival.notify(accepted as u64);
                idle = 0;
            } else {
                self.shared.metrics.insert_failures.increment();
                if cancel.is_cancelled() {
                    return Err(Cancelled);
                }
                idle = self.shared.wait.idle(idle);
            }
        }
        Ok(())
    }

    /// Non-blocking flush attempt. Returns `true` if the batch is empty or
    /// at least one staged item was accepted.
    pub fn try_flush(&mut self) -> bool {
        if self.batch.is_empty() {
            return true;
        }
        let accepted = self.ring.push_batch(&mut self.batch);
        if accepted > 0 {
            self.shared.metrics.arrival.notify(accepted as u64);
            true
        } else {
            self.shared.metrics.insert_failures.increment();
            false
        }
    }

    /// Best-effort shutdown signal: flushes what it can, then tries a
    /// bounded number of times to publish the caller-supplied sentinel so
    /// the consumer observes the teardown. Returns whether the sentinel was
    /// accepted.
    pub fn halt_with_interrupt(&mut self, sentinel: T) -> bool {
        let _ = self.try_flush();
        let mut item = sentinel;
        let mut idle = 0;
        for _ in 0..HALT_ATTEMPTS {
            match self.ring.push(item) {
                Ok(()) => {
                    self.shared.metrics.arrival.notify(1);
                    return true;
                }
                Err(back) => {
                    item = back;
                    idle = self.shared.wait.idle(idle);
                }
            }
        }
        false
    }

    /// Creates another producer handle with its own empty staging batch.
    ///
    /// # Errors
    ///
    /// Returns [`CloneError`] for a [`ProducerKind::Single`] queue.
    pub fn clone_handle(&self) -> Result<Producer<T>, CloneError> {
        match &self.ring {
            ProducerRing::Single(_) => Err(CloneError),
            ProducerRing::Multi(ring) => Ok(Producer {
                ring: ProducerRing::Multi(ring.clone()),
                shared: self.shared.clone(),
                batch: VecDeque::with_capacity(self.shared.batch_target),
            }),
        }
    }

    /// Queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Fixed ring capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Estimated ring population (excludes this handle's staged items).
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether the ring is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of items currently staged in this handle.
    #[must_use]
    pub fn staged(&self) -> usize {
        self.batch.len()
    }

    /// Snapshot of the queue's metrics.
    #[must_use]
    pub fn metrics_snapshot(&self) -> QueueMetricsSnapshot {
        self.shared
            .metrics
            .snapshot(&self.shared.name, self.shared.capacity, self.ring.len())
    }
}

/// The single consuming handle.
pub struct Consumer<T> {
    ring: ConsumerRing<T>,
    shared: Arc<Shared>,
}

impl<T> Consumer<T> {
    /// Drains what is currently available, invoking `handler.accept` per
    /// item in FIFO order and `handler.flush` once iff anything was drained.
    /// Never blocks; one call drains at most `capacity` items so concurrent
    /// producers cannot pin the consumer here.
    pub fn consume<H: DrainHandler<T>>(&mut self, handler: &mut H) -> usize {
        let mut drained = 0;
        while drained < self.shared.capacity {
            match self.ring.pop() {
                Some(item) => {
                    handler.accept(item);
                    drained += 1;
                }
                None => break,
            }
        }
        if drained > 0 {
            handler.flush();
        } else {
            self.shared.metrics.empty_polls.increment();
        }
        drained
    }

    /// Pops a single item without the handler protocol.
    pub fn try_pop(&mut self) -> Option<T> {
        self.ring.pop()
    }

    /// Queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Fixed ring capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Estimated ring population.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether the ring is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the queue's metrics.
    #[must_use]
    pub fn metrics_snapshot(&self) -> QueueMetricsSnapshot {
        self.shared
            .metrics
            .snapshot(&self.shared.name, self.shared.capacity, self.ring.len())
    }
}
