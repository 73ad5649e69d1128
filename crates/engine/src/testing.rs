// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! Test utilities for exercising executors without a real topology:
//! a scripted spout that records every lifecycle call, an in-memory worker
//! router, and a no-op codec.

use crate::collector::{SpoutOutputCollector, StreamRouter, TaskList};
use crate::error::SpoutError;
use crate::message::{QueueMsg, StreamId, TaskId};
use crate::spout::{FailReason, Spout, SpoutContext};
use crate::transfer::{TupleCodec, WorkerRouter};
use ahash::RandomState;
use bytes::Bytes;
use smallvec::SmallVec;
use spate_config::WorkerConfig;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Stream used by scripted emits.
pub const TEST_STREAM: &str = "events";

/// One observed spout lifecycle call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpoutEvent {
    /// `open` ran for the given task.
    Opened(TaskId),
    /// `activate` ran.
    Activated,
    /// `deactivate` ran.
    Deactivated,
    /// `next_tuple` ran.
    NextTuple,
    /// `ack` ran with the given message id.
    Acked(u32),
    /// `fail` ran with the given message id and reason.
    Failed(u32, FailReason),
    /// `credentials_changed` ran with the given number of entries.
    Credentials(usize),
}

/// Shared record of spout lifecycle calls.
pub type EventLog = Arc<Mutex<Vec<SpoutEvent>>>;

/// Creates an empty event log.
#[must_use]
pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Counts occurrences of events matching `predicate`.
#[must_use]
pub fn count_events(log: &EventLog, predicate: impl Fn(&SpoutEvent) -> bool) -> usize {
    log.lock().expect("event log").iter().filter(|e| predicate(e)).count()
}

/// One scripted emit performed by a [`TestSpout`] `next_tuple` call.
#[derive(Debug, Clone)]
pub struct ScriptedEmit {
    /// Payload value.
    pub value: u32,
    /// Message id; `Some` makes the emit reliable.
    pub message_id: Option<u32>,
}

impl ScriptedEmit {
    /// A reliable emit carrying `value` with message id `id`.
    #[must_use]
    pub fn anchored(value: u32, id: u32) -> Self {
        ScriptedEmit {
            value,
            message_id: Some(id),
        }
    }

    /// An unreliable emit carrying `value`.
    #[must_use]
    pub fn unanchored(value: u32) -> Self {
        ScriptedEmit {
            value,
            message_id: None,
        }
    }
}

/// A spout that performs one scripted emit per `next_tuple` call and
/// records every lifecycle callback into its event log.
pub struct TestSpout {
    events: EventLog,
    script: VecDeque<ScriptedEmit>,
}

impl TestSpout {
    /// Creates a spout running `script`, one emit per `next_tuple`.
    #[must_use]
    pub fn new(events: EventLog, script: Vec<ScriptedEmit>) -> Self {
        TestSpout {
            events,
            script: script.into(),
        }
    }

    fn record(&self, event: SpoutEvent) {
        self.events.lock().expect("event log").push(event);
    }
}

impl Spout for TestSpout {
    type Payload = u32;
    type MessageId = u32;

    fn open(&mut self, _conf: &WorkerConfig, ctx: &SpoutContext) -> Result<(), SpoutError> {
        self.record(SpoutEvent::Opened(ctx.task_id));
        Ok(())
    }

    fn activate(&mut self) -> Result<(), SpoutError> {
        self.record(SpoutEvent::Activated);
        Ok(())
    }

    fn deactivate(&mut self) -> Result<(), SpoutError> {
        self.record(SpoutEvent::Deactivated);
        Ok(())
    }

    fn next_tuple(
        &mut self,
        out: &mut SpoutOutputCollector<u32, u32>,
    ) -> Result<(), SpoutError> {
        self.record(SpoutEvent::NextTuple);
        if let Some(emit) = self.script.pop_front() {
            let _ = out.emit(StreamId::from(TEST_STREAM), emit.value, emit.message_id)?;
        }
        Ok(())
    }

    fn ack(&mut self, id: u32) -> Result<(), SpoutError> {
        self.record(SpoutEvent::Acked(id));
        Ok(())
    }

    fn fail(&mut self, id: u32, reason: FailReason) -> Result<(), SpoutError> {
        self.record(SpoutEvent::Failed(id, reason));
        Ok(())
    }

    fn credentials_changed(&mut self, credentials: &HashMap<String, String>) {
        self.record(SpoutEvent::Credentials(credentials.len()));
    }
}

/// Routes every stream to a fixed task list.
pub struct FixedRouter(pub Vec<TaskId>);

impl StreamRouter<u32> for FixedRouter {
    fn select(&self, _stream: &StreamId, _values: &u32) -> TaskList {
        SmallVec::from_slice(&self.0)
    }
}

/// In-memory worker: local tasks map to queues registered by the test,
/// everything else is remote and captured for inspection.
#[derive(Default)]
pub struct TestWorker {
    local: Mutex<HashMap<TaskId, spate_queue::Producer<QueueMsg<u32>>>>,
    remote: Mutex<Vec<HashMap<TaskId, Vec<Bytes>, RandomState>>>,
}

impl TestWorker {
    /// Creates a worker with no local tasks.
    #[must_use]
    pub fn new() -> Self {
        TestWorker::default()
    }

    /// Registers a local task's receive-queue producer prototype.
    pub fn add_local(&self, task: TaskId, producer: spate_queue::Producer<QueueMsg<u32>>) {
        let _ = self.local.lock().expect("local map").insert(task, producer);
    }

    /// The remote batches handed to `send_remote` so far.
    #[must_use]
    pub fn remote_batches(&self) -> Vec<HashMap<TaskId, Vec<Bytes>, RandomState>> {
        self.remote.lock().expect("remote batches").clone()
    }
}

impl WorkerRouter<u32> for TestWorker {
    fn is_local(&self, task: TaskId) -> bool {
        self.local.lock().expect("local map").contains_key(&task)
    }

    fn local_producer(&self, task: TaskId) -> Option<spate_queue::Producer<QueueMsg<u32>>> {
        self.local
            .lock()
            .expect("local map")
            .get(&task)
            .and_then(|producer| producer.clone_handle().ok())
    }

    fn send_remote(&self, batches: HashMap<TaskId, Vec<Bytes>, RandomState>) {
        self.remote.lock().expect("remote batches").push(batches);
    }
}

/// Encodes every message as an empty frame; enough to count and route.
pub struct NoopCodec;

impl TupleCodec<u32> for NoopCodec {
    fn encode(&self, _msg: &QueueMsg<u32>) -> Bytes {
        Bytes::new()
    }
}
