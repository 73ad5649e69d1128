// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! Spout output collector: turns user `emit` calls into routed tuples.
//!
//! The collector owns the executor's pending map and emitted counter; the
//! executor reaches them through accessor methods. It holds no reference
//! back to the executor or its spouts, so `emit` can run while the executor
//! has a spout mutably borrowed.

use crate::error::{Error, SpoutError};
use crate::message::{AddressedTuple, Anchor, QueueMsg, RootId, StreamId, TaskId, Tuple};
use crate::metrics::Sampler;
use crate::rotating_map::RotatingMap;
use crate::transfer::ExecutorTransfer;
use smallvec::{SmallVec, smallvec};
use spate_queue::cancel::CancelToken;
use std::time::Instant;

/// Destination lists are almost always short; four inline slots cover the
/// common grouping fan-outs without allocation.
pub type TaskList = SmallVec<[TaskId; 4]>;

/// Number of pending-map buckets. Two buckets expire an entry between one
/// and two tick periods after insertion.
const NUM_PENDING_BUCKETS: usize = 2;

/// Metadata for one in-flight anchored message.
///
/// Created on emit-with-ack; destroyed on ack, fail, or timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleInfo<M> {
    /// The tree's root id.
    pub root: RootId,
    /// The user-supplied message id, when the emit was reliable.
    pub message_id: Option<M>,
    /// The task that emitted the message.
    pub task: TaskId,
    /// The stream the message was emitted on.
    pub stream: StreamId,
    /// Emit time for latency measurement; `None` for unsampled emits.
    pub timestamp: Option<Instant>,
}

/// Maps a stream (and payload, for field-sensitive groupings) to the
/// destination tasks of each emit. Grouping computation is an external
/// collaborator configured at topology submission.
pub trait StreamRouter<P>: Send {
    /// Destination tasks for one emit on `stream`.
    fn select(&self, stream: &StreamId, values: &P) -> TaskList;
}

/// The collector handed to `next_tuple`.
pub struct SpoutOutputCollector<P, M> {
    task_id: TaskId,
    executor: String,
    debug: bool,
    router: Box<dyn StreamRouter<P>>,
    transfer: ExecutorTransfer<P>,
    acker_tasks: Vec<TaskId>,
    pending: RotatingMap<RootId, TupleInfo<M>>,
    emitted: u64,
    immediate_acks: Vec<M>,
    sampler: Sampler,
    cancel: CancelToken,
    reported_errors: u64,
}

impl<P, M> SpoutOutputCollector<P, M> {
    /// Creates a collector emitting as `task_id`.
    ///
    /// `acker_tasks` empty puts the collector in at-most-once mode: reliable
    /// emits skip the bookkeeping path and their message ids are staged for
    /// immediate acknowledgement.
    pub fn new(
        task_id: TaskId,
        executor: impl Into<String>,
        debug: bool,
        router: Box<dyn StreamRouter<P>>,
        transfer: ExecutorTransfer<P>,
        acker_tasks: Vec<TaskId>,
        latency_sample_period: u32,
        cancel: CancelToken,
    ) -> Self {
        SpoutOutputCollector {
            task_id,
            executor: executor.into(),
            debug,
            router,
            transfer,
            acker_tasks,
            pending: RotatingMap::new(NUM_PENDING_BUCKETS),
            emitted: 0,
            immediate_acks: Vec::new(),
            sampler: Sampler::new(latency_sample_period),
            cancel,
            reported_errors: 0,
        }
    }

    /// Emits `values` on `stream` to the tasks selected by the grouping.
    /// Returns the destination task ids.
    ///
    /// A `Some` message id makes the emit reliable: the message is tracked
    /// in the pending map until acked, failed, or timed out.
    ///
    /// # Errors
    ///
    /// Propagates cancellation or routing failures from the transfer layer.
    pub fn emit(
        &mut self,
        stream: StreamId,
        values: P,
        message_id: Option<M>,
    ) -> Result<TaskList, Error>
    where
        P: Clone,
    {
        let tasks = self.router.select(&stream, &values);
        self.emit_to_tasks(tasks, stream, values, message_id)
    }

    /// Emits `values` on `stream` directly to `dest`, bypassing the
    /// grouping.
    ///
    /// # Errors
    ///
    /// Propagates cancellation or routing failures from the transfer layer.
    pub fn emit_direct(
        &mut self,
        dest: TaskId,
        stream: StreamId,
        values: P,
        message_id: Option<M>,
    ) -> Result<(), Error>
    where
        P: Clone,
    {
        let _ = self.emit_to_tasks(smallvec![dest], stream, values, message_id)?;
        Ok(())
    }

    fn emit_to_tasks(
        &mut self,
        tasks: TaskList,
        stream: StreamId,
        values: P,
        message_id: Option<M>,
    ) -> Result<TaskList, Error>
    where
        P: Clone,
    {
        let root = next_root_id();
        let anchored = message_id.is_some() && !self.acker_tasks.is_empty();
        let mut checksum = 0u64;
        let mut values = Some(values);
        let count = tasks.len();
        for (i, dest) in tasks.iter().copied().enumerate() {
            let anchor = if anchored {
                let edge = rand::random::<u64>();
                checksum ^= edge;
                Some(Anchor { root, edge })
            } else {
                None
            };
            let payload = if i + 1 == count {
                match values.take() {
                    Some(payload) => payload,
                    None => break,
                }
            } else {
                match values.as_ref() {
                    Some(payload) => payload.clone(),
                    None => break,
                }
            };
            let tuple = Tuple {
                src_task: self.task_id,
                stream: stream.clone(),
                values: payload,
                anchor,
            };
            self.transfer
                .transfer(dest, QueueMsg::Tuple(AddressedTuple { dest, tuple }), &self.cancel)?;
        }

        if anchored {
            let timestamp = if self.sampler.should_sample() {
                Some(Instant::now())
            } else {
                None
            };
            let info = TupleInfo {
                root,
                message_id,
                task: self.task_id,
                stream: stream.clone(),
                timestamp,
            };
            let _ = self.pending.put(root, info);
            let acker = self.acker_tasks[(root % self.acker_tasks.len() as u64) as usize];
            self.transfer.transfer(
                acker,
                QueueMsg::AckInit {
                    root,
                    checksum,
                    task: self.task_id,
                },
                &self.cancel,
            )?;
        } else if let Some(id) = message_id {
            // At-most-once mode: no acker in the topology, so the user ack
            // is delivered by the executor right after next_tuple returns.
            self.immediate_acks.push(id);
        }

        self.emitted += 1;
        if self.debug {
            tracing::debug!(
                executor = %self.executor,
                stream = %stream,
                root,
                anchored,
                destinations = count,
                "emit"
            );
        }
        Ok(tasks)
    }

    /// Rebinds the collector to the task whose spout is about to run.
    /// Executors driving several tasks call this before each `next_tuple`.
    pub(crate) fn set_task(&mut self, task: TaskId) {
        self.task_id = task;
    }

    /// Reports a user-level error without affecting the executor loop.
    pub fn report_error(&mut self, error: &SpoutError) {
        self.reported_errors += 1;
        tracing::warn!(executor = %self.executor, error = %error, "spout reported an error");
    }

    /// Flushes staged output, blocking under back-pressure.
    ///
    /// # Errors
    ///
    /// Propagates cancellation from the transfer layer.
    pub fn flush(&mut self) -> Result<(), Error> {
        let cancel = self.cancel.clone();
        self.transfer.flush(&cancel)
    }

    /// Best-effort flush used during shutdown.
    pub fn try_flush(&mut self) {
        self.transfer.try_flush();
    }

    /// Tuples emitted since construction.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Number of in-flight anchored messages.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Removes and returns the pending entry for `root`.
    pub fn remove_pending(&mut self, root: RootId) -> Option<TupleInfo<M>> {
        self.pending.remove(&root)
    }

    /// Moves the pending entry for `root` back into the newest bucket,
    /// extending its timeout. The stored info (including the original emit
    /// timestamp) is reused unchanged.
    pub fn refresh_pending(&mut self, root: RootId) {
        if let Some(info) = self.pending.remove(&root) {
            let _ = self.pending.put(root, info);
        }
    }

    /// Rotates the pending map one tick, draining expired entries into
    /// `expired`.
    pub fn rotate_pending_into(&mut self, expired: &mut Vec<(RootId, TupleInfo<M>)>) {
        self.pending.rotate_into(expired);
    }

    /// Drains the message ids staged for immediate acknowledgement.
    pub fn take_immediate_acks(&mut self) -> Vec<M> {
        std::mem::take(&mut self.immediate_acks)
    }

    /// Errors reported through [`report_error`](Self::report_error).
    #[must_use]
    pub fn reported_errors(&self) -> u64 {
        self.reported_errors
    }
}

fn next_root_id() -> RootId {
    loop {
        let root = rand::random::<u64>();
        if root != 0 {
            return root;
        }
    }
}
