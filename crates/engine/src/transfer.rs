// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! Executor-to-executor transfer: routes each outgoing message to a local
//! peer queue or stages it for the remote sender.
//!
//! Local delivery publishes into the destination's bounded queue through a
//! cached producer handle, blocking under back-pressure. Remote delivery
//! encodes once and appends to a per-destination staging list that is handed
//! to the worker's remote sender in bulk. The flush discipline is: flush on
//! the system flush stream, before a producer parks on back-pressure, and at
//! shutdown.

use crate::error::Error;
use crate::message::{QueueMsg, TaskId};
use ahash::RandomState;
use bytes::Bytes;
use spate_queue::cancel::CancelToken;
use spate_queue::queue::Producer;
use std::collections::HashMap;
use std::sync::Arc;

/// The worker-level view the transfer layer consumes.
///
/// The worker knows which tasks live in this process and owns the remote
/// networking transport; both are external collaborators.
pub trait WorkerRouter<P>: Send + Sync {
    /// Whether `task` runs in this worker process.
    fn is_local(&self, task: TaskId) -> bool;

    /// A fresh producer handle for a local task's receive queue.
    ///
    /// Returns `None` when the task is not local.
    fn local_producer(&self, task: TaskId) -> Option<Producer<QueueMsg<P>>>;

    /// Hands a batch of encoded messages per destination to the remote
    /// transport. Non-blocking or own-buffered; may itself back-pressure.
    fn send_remote(&self, batches: HashMap<TaskId, Vec<Bytes>, RandomState>);
}

/// Opaque encoder for messages leaving the process.
pub trait TupleCodec<P>: Send {
    /// Encodes one message for the wire.
    fn encode(&self, msg: &QueueMsg<P>) -> Bytes;
}

/// Per-executor transfer state.
pub struct ExecutorTransfer<P> {
    worker: Arc<dyn WorkerRouter<P>>,
    codec: Box<dyn TupleCodec<P>>,
    outbound: HashMap<TaskId, Producer<QueueMsg<P>>, RandomState>,
    remote: HashMap<TaskId, Vec<Bytes>, RandomState>,
    curr_batch: usize,
    batch_target: usize,
}

impl<P> ExecutorTransfer<P> {
    /// Creates a transfer layer flushing remote batches every
    /// `batch_target` staged messages.
    pub fn new(
        worker: Arc<dyn WorkerRouter<P>>,
        codec: Box<dyn TupleCodec<P>>,
        batch_target: usize,
    ) -> Self {
        ExecutorTransfer {
            worker,
            codec,
            outbound: HashMap::default(),
            remote: HashMap::default(),
            curr_batch: 0,
            batch_target: batch_target.max(1),
        }
    }

    /// Routes one message to `dest`: local queue publish or remote staging.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if a blocking local publish was
    /// cancelled, or [`Error::UnknownTask`] if the worker claims `dest` is
    /// local but has no queue for it.
    pub fn transfer(
        &mut self,
        dest: TaskId,
        msg: QueueMsg<P>,
        cancel: &CancelToken,
    ) -> Result<(), Error> {
        if self.worker.is_local(dest) {
            self.transfer_local(dest, msg, cancel)
        } else {
            let encoded = self.codec.encode(&msg);
            self.remote.entry(dest).or_default().push(encoded);
            self.curr_batch += 1;
            if self.curr_batch >= self.batch_target {
                self.flush_remotes();
            }
            Ok(())
        }
    }

    fn transfer_local(
        &mut self,
        dest: TaskId,
        msg: QueueMsg<P>,
        cancel: &CancelToken,
    ) -> Result<(), Error> {
        if !self.outbound.contains_key(&dest) {
            let producer = self
                .worker
                .local_producer(dest)
                .ok_or(Error::UnknownTask { task: dest })?;
            let _ = self.outbound.insert(dest, producer);
        }
        let producer = self
            .outbound
            .get_mut(&dest)
            .ok_or(Error::UnknownTask { task: dest })?;
        producer.publish(msg, cancel)?;
        Ok(())
    }

    /// Flushes every cached local producer, blocking under back-pressure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the flush was cancelled; remaining
    /// items stay staged in their handles.
    pub fn flush_local(&mut self, cancel: &CancelToken) -> Result<(), Error> {
        for producer in self.outbound.values_mut() {
            producer.flush(cancel)?;
        }
        Ok(())
    }

    /// Non-blocking local flush: pushes what fits, leaves the rest staged.
    pub fn try_flush_local(&mut self) {
        for producer in self.outbound.values_mut() {
            let _ = producer.try_flush();
        }
    }

    /// Hands the staged remote batches to the worker's sender.
    pub fn flush_remotes(&mut self) {
        if !self.remote.is_empty() {
            self.worker.send_remote(std::mem::take(&mut self.remote));
        }
        self.curr_batch = 0;
    }

    /// Full flush: local queues, then remote batches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the local flush was cancelled.
    pub fn flush(&mut self, cancel: &CancelToken) -> Result<(), Error> {
        self.flush_local(cancel)?;
        self.flush_remotes();
        Ok(())
    }

    /// Best-effort flush used during shutdown: non-blocking local pass,
    /// then remote hand-off.
    pub fn try_flush(&mut self) {
        self.try_flush_local();
        self.flush_remotes();
    }
}
