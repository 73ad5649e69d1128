// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! The spout executor run loop.
//!
//! One executor drives the tasks of a single spout component on its own
//! thread. It is the sole consumer of its receive queue and the sole
//! mutator of its collector, pending map, and spouts. Each call to
//! [`SpoutExecutor::run_once`] performs one unit of work so a higher-level
//! scheduler may interleave executors for fairness; [`SpoutExecutor::run`]
//! drives the loop until cancellation or an interrupt sentinel, then shuts
//! down in order: deactivate, flush, drain outstanding acks to a deadline.

use crate::collector::{SpoutOutputCollector, TupleInfo};
use crate::config::ExecutorConfig;
use crate::error::{Error, SpoutErrorKind};
use crate::message::{QueueMsg, RootId, TaskId};
use crate::metrics::{ExecutorMetricsSnapshot, ExecutorStats, MetricsConsumer};
use crate::spout::{FailReason, Spout, SpoutContext};
use spate_queue::cancel::CancelToken;
use spate_queue::queue::{Consumer, DrainHandler};
use spate_queue::wait::{self, WaitStrategy};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Pause between ack-drain polls during orderly shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(1);

/// Executor for one spout component.
pub struct SpoutExecutor<S: Spout> {
    config: ExecutorConfig,
    receive: Consumer<QueueMsg<S::Payload>>,
    spouts: Vec<S>,
    collector: SpoutOutputCollector<S::Payload, S::MessageId>,
    topology_active: Arc<AtomicBool>,
    cancel: CancelToken,
    empty_wait: Arc<dyn WaitStrategy>,
    metrics_out: Box<dyn MetricsConsumer>,
    stats: ExecutorStats,
    effective_max_pending: usize,
    last_active: bool,
    opened: bool,
    empty_emit_streak: u64,
    iteration: u64,
    shutdown_requested: bool,
    expired: Vec<(RootId, TupleInfo<S::MessageId>)>,
}

impl<S: Spout> SpoutExecutor<S> {
    /// Creates an executor driving `spouts`, one per entry in the config's
    /// task list.
    ///
    /// `topology_active` is toggled externally; transitions are observed at
    /// the top of each iteration. `cancel` must be the token the collector
    /// was built with, so blocking publishes and the loop observe the same
    /// shutdown signal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`] if the spout and task counts differ.
    pub fn new(
        config: ExecutorConfig,
        spouts: Vec<S>,
        receive: Consumer<QueueMsg<S::Payload>>,
        collector: SpoutOutputCollector<S::Payload, S::MessageId>,
        topology_active: Arc<AtomicBool>,
        cancel: CancelToken,
        metrics_out: Box<dyn MetricsConsumer>,
    ) -> Result<Self, Error> {
        if spouts.is_empty() || spouts.len() != config.task_ids.len() {
            return Err(Error::Invariant {
                executor: config.name.clone(),
                message: format!(
                    "{} spouts for {} assigned tasks",
                    spouts.len(),
                    config.task_ids.len()
                ),
            });
        }
        let empty_wait = wait::from_config(&config.worker.spout_wait_strategy);
        let effective_max_pending = config.effective_max_pending();
        Ok(SpoutExecutor {
            config,
            receive,
            spouts,
            collector,
            topology_active,
            cancel,
            empty_wait,
            metrics_out,
            stats: ExecutorStats::default(),
            effective_max_pending,
            last_active: false,
            opened: false,
            empty_emit_streak: 0,
            iteration: 0,
            shutdown_requested: false,
            expired: Vec::new(),
        })
    }

    /// Drives the loop until cancellation or an interrupt sentinel, then
    /// performs an orderly shutdown.
    ///
    /// # Errors
    ///
    /// Unwinds with the first fatal error: an invariant violation, a wrapped
    /// user callback failure, or a cancelled blocking publish observed
    /// mid-iteration.
    pub fn run(mut self) -> Result<(), Error> {
        self.open_spouts()?;
        loop {
            if self.cancel.is_cancelled() || self.shutdown_requested {
                return self.shutdown();
            }
            self.run_once()?;
        }
    }

    /// Performs one unit of work: a cadenced receive-queue drain, one pass
    /// over the spouts (when active and not throttled), and the empty-emit
    /// idle bookkeeping.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`run`](Self::run); the caller decides whether
    /// to continue, shut down, or unwind.
    pub fn run_once(&mut self) -> Result<(), Error> {
        if !self.opened {
            self.open_spouts()?;
        }
        self.iteration = self.iteration.wrapping_add(1);

        // Cadenced drain: amortizes polling cost and rate-limits the
        // rate-tracker notifications on the receive queue.
        if self.iteration % self.config.worker.recv_cadence as u64 == 0 {
            self.drain_receive()?;
            if self.shutdown_requested {
                return Ok(());
            }
        }

        let curr_emitted = self.collector.emitted();
        let reached_max = self.effective_max_pending > 0
            && self.collector.pending_len() >= self.effective_max_pending;
        let is_active = self.topology_active.load(Ordering::Acquire);

        if is_active {
            if !self.last_active {
                self.last_active = true;
                tracing::info!(executor = %self.config.name, "activating spouts");
                for i in 0..self.spouts.len() {
                    self.spouts[i].activate().map_err(|e| {
                        Error::spout(self.config.task_ids[i], SpoutErrorKind::Activate, &e)
                    })?;
                }
            }
            if !reached_max {
                for i in 0..self.spouts.len() {
                    self.collector.set_task(self.config.task_ids[i]);
                    self.spouts[i].next_tuple(&mut self.collector).map_err(|e| {
                        Error::spout(self.config.task_ids[i], SpoutErrorKind::NextTuple, &e)
                    })?;
                    self.deliver_immediate_acks(i)?;
                }
            }
        } else {
            if self.last_active {
                self.last_active = false;
                tracing::info!(executor = %self.config.name, "deactivating spouts");
                for i in 0..self.spouts.len() {
                    self.spouts[i].deactivate().map_err(|e| {
                        Error::spout(self.config.task_ids[i], SpoutErrorKind::Deactivate, &e)
                    })?;
                }
            }
            thread::sleep(self.config.worker.inactive_sleep);
            self.stats.skipped_inactive += 1;
        }

        if is_active && self.collector.emitted() == curr_emitted {
            self.empty_emit_streak += 1;
            let _ = self.empty_wait.idle(self.empty_emit_streak);
        } else {
            self.empty_emit_streak = 0;
        }
        Ok(())
    }

    fn open_spouts(&mut self) -> Result<(), Error> {
        if self.opened {
            return Ok(());
        }
        tracing::info!(
            executor = %self.config.name,
            tasks = ?self.config.task_ids,
            "opening spouts"
        );
        for i in 0..self.spouts.len() {
            let ctx = SpoutContext {
                task_id: self.config.task_ids[i],
                component: self.config.name.clone(),
            };
            self.spouts[i]
                .open(&self.config.worker, &ctx)
                .map_err(|e| Error::spout(ctx.task_id, SpoutErrorKind::Open, &e))?;
        }
        self.opened = true;
        Ok(())
    }

    fn deliver_immediate_acks(&mut self, spout_index: usize) -> Result<(), Error> {
        for id in self.collector.take_immediate_acks() {
            self.stats.acked += 1;
            self.spouts[spout_index].ack(id).map_err(|e| {
                Error::spout(self.config.task_ids[spout_index], SpoutErrorKind::Ack, &e)
            })?;
        }
        Ok(())
    }

    fn drain_receive(&mut self) -> Result<(), Error> {
        let mut metrics_due = false;
        let mut shutdown = self.shutdown_requested;
        let mut failure = None;
        {
            let mut dispatch = Dispatch {
                config: &self.config,
                spouts: &mut self.spouts,
                collector: &mut self.collector,
                stats: &mut self.stats,
                expired: &mut self.expired,
                metrics_due: &mut metrics_due,
                shutdown: &mut shutdown,
                failure: &mut failure,
            };
            let _ = self.receive.consume(&mut dispatch);
        }
        self.shutdown_requested = shutdown;
        if let Some(error) = failure {
            return Err(error);
        }
        if metrics_due {
            self.report_metrics();
        }
        Ok(())
    }

    fn report_metrics(&mut self) {
        let snapshot = ExecutorMetricsSnapshot {
            name: self.config.name.clone(),
            emitted: self.collector.emitted(),
            empty_emit_streak: self.empty_emit_streak,
            pending: self.collector.pending_len(),
            acked: self.stats.acked,
            failed: self.stats.failed,
            timeouts: self.stats.timeouts,
            skipped_inactive: self.stats.skipped_inactive,
            reported_errors: self.collector.reported_errors(),
            ack_latency_ms: self
                .stats
                .ack_latency_last
                .map(|latency| latency.as_secs_f64() * 1_000.0),
            ack_latency_samples: self.stats.ack_latency_samples,
            receive_queue: self.receive.metrics_snapshot(),
        };
        self.metrics_out.report(&snapshot);
    }

    fn shutdown(&mut self) -> Result<(), Error> {
        tracing::info!(executor = %self.config.name, "shutdown requested");
        if self.last_active {
            self.last_active = false;
            for i in 0..self.spouts.len() {
                if let Err(error) = self.spouts[i].deactivate() {
                    tracing::warn!(
                        executor = %self.config.name,
                        task = self.config.task_ids[i],
                        error = %error,
                        "deactivate failed during shutdown"
                    );
                }
            }
        }
        self.collector.try_flush();

        let deadline = Instant::now() + self.config.shutdown_drain;
        while self.collector.pending_len() > 0 && Instant::now() < deadline {
            self.drain_receive()?;
            if self.collector.pending_len() == 0 {
                break;
            }
            thread::sleep(SHUTDOWN_POLL);
        }

        self.collector.try_flush();
        self.report_metrics();
        tracing::info!(
            executor = %self.config.name,
            pending = self.collector.pending_len(),
            "executor stopped"
        );
        Ok(())
    }

    /// Running stats, for supervisors and tests.
    #[must_use]
    pub fn stats(&self) -> &ExecutorStats {
        &self.stats
    }

    /// Number of in-flight anchored messages.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.collector.pending_len()
    }

    /// Tuples emitted since start.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.collector.emitted()
    }

    /// Current streak of iterations that emitted nothing.
    #[must_use]
    pub fn empty_emit_streak(&self) -> u64 {
        self.empty_emit_streak
    }
}

/// Receive-queue dispatch table, borrowing the executor's state piecewise so
/// it can run inside `Consumer::consume`.
struct Dispatch<'a, S: Spout> {
    config: &'a ExecutorConfig,
    spouts: &'a mut [S],
    collector: &'a mut SpoutOutputCollector<S::Payload, S::MessageId>,
    stats: &'a mut ExecutorStats,
    expired: &'a mut Vec<(RootId, TupleInfo<S::MessageId>)>,
    metrics_due: &'a mut bool,
    shutdown: &'a mut bool,
    failure: &'a mut Option<Error>,
}

impl<S: Spout> Dispatch<'_, S> {
    fn spout_index(&self, task: TaskId) -> Option<usize> {
        self.config.task_ids.iter().position(|id| *id == task)
    }

    fn ack(&mut self, root: RootId, task: TaskId) {
        let Some(info) = self.collector.remove_pending(root) else {
            return;
        };
        let Some(message_id) = info.message_id else {
            return;
        };
        if info.task != task {
            *self.failure = Some(Error::Invariant {
                executor: self.config.name.clone(),
                message: format!(
                    "ack for root {root:#x} addressed to task {task} but emitted by task {}",
                    info.task
                ),
            });
            return;
        }
        if let Some(timestamp) = info.timestamp {
            self.stats.record_ack_latency(timestamp.elapsed());
        }
        self.stats.acked += 1;
        match self.spout_index(info.task) {
            Some(index) => {
                if let Err(error) = self.spouts[index].ack(message_id) {
                    *self.failure = Some(Error::spout(info.task, SpoutErrorKind::Ack, &error));
                }
            }
            None => {
                *self.failure = Some(Error::Invariant {
                    executor: self.config.name.clone(),
                    message: format!("pending entry for unassigned task {}", info.task),
                });
            }
        }
    }

    fn fail(&mut self, root: RootId, reason: FailReason) {
        let Some(info) = self.collector.remove_pending(root) else {
            return;
        };
        let Some(message_id) = info.message_id else {
            return;
        };
        match reason {
            FailReason::FailStream => self.stats.failed += 1,
            FailReason::Timeout => self.stats.timeouts += 1,
        }
        match self.spout_index(info.task) {
            Some(index) => {
                if let Err(error) = self.spouts[index].fail(message_id, reason) {
                    *self.failure = Some(Error::spout(info.task, SpoutErrorKind::Fail, &error));
                }
            }
            None => {
                *self.failure = Some(Error::Invariant {
                    executor: self.config.name.clone(),
                    message: format!("pending entry for unassigned task {}", info.task),
                });
            }
        }
    }

    fn rotate_timeouts(&mut self) {
        self.expired.clear();
        self.collector.rotate_pending_into(self.expired);
        for (root, info) in self.expired.drain(..) {
            if self.failure.is_some() {
                break;
            }
            let Some(message_id) = info.message_id else {
                continue;
            };
            self.stats.timeouts += 1;
            tracing::debug!(
                executor = %self.config.name,
                root,
                task = info.task,
                stream = %info.stream,
                "message timed out"
            );
            match self.config.task_ids.iter().position(|id| *id == info.task) {
                Some(index) => {
                    if let Err(error) =
                        self.spouts[index].fail(message_id, FailReason::Timeout)
                    {
                        *self.failure =
                            Some(Error::spout(info.task, SpoutErrorKind::Fail, &error));
                    }
                }
                None => {
                    *self.failure = Some(Error::Invariant {
                        executor: self.config.name.clone(),
                        message: format!("pending entry for unassigned task {}", info.task),
                    });
                }
            }
        }
    }
}

impl<S: Spout> DrainHandler<QueueMsg<S::Payload>> for Dispatch<'_, S> {
    fn accept(&mut self, msg: QueueMsg<S::Payload>) {
        if self.failure.is_some() {
            return;
        }
        match msg {
            QueueMsg::Flush => {
                if let Err(error) = self.collector.flush() {
                    *self.failure = Some(error);
                }
            }
            QueueMsg::Tick => self.rotate_timeouts(),
            QueueMsg::MetricsTick => *self.metrics_due = true,
            QueueMsg::CredsChanged(credentials) => {
                for spout in self.spouts.iter_mut() {
                    spout.credentials_changed(&credentials);
                }
            }
            QueueMsg::ResetTimeout { root } => self.collector.refresh_pending(root),
            QueueMsg::Ack { root, task } => self.ack(root, task),
            QueueMsg::Fail { root, task: _ } => self.fail(root, FailReason::FailStream),
            QueueMsg::Interrupt => *self.shutdown = true,
            QueueMsg::Tuple(addressed) => {
                tracing::debug!(
                    executor = %self.config.name,
                    dest = addressed.dest,
                    stream = %addressed.tuple.stream,
                    "dropping data tuple addressed to a spout executor"
                );
            }
            QueueMsg::AckInit { root, .. } => {
                tracing::warn!(
                    executor = %self.config.name,
                    root,
                    "dropping ack-init addressed to a spout executor"
                );
            }
        }
    }

    fn flush(&mut self) {
        // Spout-side dispatch stages nothing across a drain.
    }
}
