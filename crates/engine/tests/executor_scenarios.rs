// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end executor scenarios: activation transitions, pending-based
//! throttling, back-pressure through the transfer layer, ack/fail/timeout
//! semantics, and orderly shutdown.

#![allow(missing_docs, clippy::unwrap_used)]

use pretty_assertions::assert_eq;
use spate_config::{WaitStrategyConfig, WorkerConfig};
use spate_engine::collector::SpoutOutputCollector;
use spate_engine::config::ExecutorConfig;
use spate_engine::error::Error;
use spate_engine::executor::SpoutExecutor;
use spate_engine::message::{QueueMsg, RootId, TaskId};
use spate_engine::metrics::ExecutorMetricsSnapshot;
use spate_engine::spout::FailReason;
use spate_engine::testing::{
    EventLog, FixedRouter, NoopCodec, ScriptedEmit, SpoutEvent, TestSpout, TestWorker,
    count_events, event_log,
};
use spate_engine::transfer::ExecutorTransfer;
use spate_queue::cancel::CancelToken;
use spate_queue::wait::NoWait;
use spate_queue::{Consumer, Producer, ProducerKind, bounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TASK: TaskId = 8;
const PEER: TaskId = 2;
const ACKER: TaskId = 5;

struct HarnessOpts {
    max_pending: u32,
    with_acker: bool,
    peer_capacity: usize,
    peer_batch: usize,
    router_to: Vec<TaskId>,
    transfer_batch: usize,
    script: Vec<ScriptedEmit>,
}

impl Default for HarnessOpts {
    fn default() -> Self {
        HarnessOpts {
            max_pending: 0,
            with_acker: true,
            peer_capacity: 64,
            peer_batch: 1,
            router_to: vec![PEER],
            transfer_batch: 1,
            script: Vec::new(),
        }
    }
}

struct Harness {
    executor: SpoutExecutor<TestSpout>,
    ctrl: Producer<QueueMsg<u32>>,
    peer_rx: Consumer<QueueMsg<u32>>,
    acker_rx: Option<Consumer<QueueMsg<u32>>>,
    worker: Arc<TestWorker>,
    events: EventLog,
    active: Arc<AtomicBool>,
    cancel: CancelToken,
    metrics: Arc<Mutex<Vec<ExecutorMetricsSnapshot>>>,
}

fn harness(opts: HarnessOpts) -> Harness {
    let worker = Arc::new(TestWorker::new());
    let (peer_tx, peer_rx) = bounded(
        "peer",
        opts.peer_capacity,
        ProducerKind::Multi,
        opts.peer_batch,
        Arc::new(NoWait),
    );
    worker.add_local(PEER, peer_tx);

    let acker_rx = if opts.with_acker {
        let (acker_tx, acker_rx) = bounded("acker", 64, ProducerKind::Multi, 1, Arc::new(NoWait));
        worker.add_local(ACKER, acker_tx);
        Some(acker_rx)
    } else {
        None
    };

    let (ctrl, receive_rx) = bounded("receive", 64, ProducerKind::Multi, 1, Arc::new(NoWait));

    let worker_config = WorkerConfig {
        max_spout_pending: opts.max_pending,
        recv_cadence: 1,
        inactive_sleep: Duration::from_millis(1),
        spout_wait_strategy: WaitStrategyConfig::Busy,
        backpressure_wait_strategy: WaitStrategyConfig::Busy,
        latency_sample_period: 1,
        ..WorkerConfig::default()
    };
    let config = ExecutorConfig::new("spout[8]", vec![TASK]).with_worker(worker_config);

    let cancel = CancelToken::new();
    let transfer = ExecutorTransfer::new(
        worker.clone(),
        Box::new(NoopCodec),
        opts.transfer_batch,
    );
    let acker_tasks = if opts.with_acker { vec![ACKER] } else { Vec::new() };
    let collector = SpoutOutputCollector::new(
        TASK,
        "spout[8]",
        false,
        Box::new(FixedRouter(opts.router_to)),
        transfer,
        acker_tasks,
        config.worker.latency_sample_period,
        cancel.clone(),
    );

    let events = event_log();
    let spout = TestSpout::new(events.clone(), opts.script);
    let active = Arc::new(AtomicBool::new(false));
    let metrics = Arc::new(Mutex::new(Vec::new()));
    let metrics_sink = metrics.clone();
    let executor = SpoutExecutor::new(
        config,
        vec![spout],
        receive_rx,
        collector,
        active.clone(),
        cancel.clone(),
        Box::new(move |snapshot: &ExecutorMetricsSnapshot| {
            metrics_sink.lock().unwrap().push(snapshot.clone());
        }),
    )
    .expect("executor construction");

    Harness {
        executor,
        ctrl,
        peer_rx,
        acker_rx,
        worker,
        events,
        active,
        cancel,
        metrics,
    }
}

impl Harness {
    fn inject(&mut self, msg: QueueMsg<u32>) {
        self.ctrl.publish(msg, &CancelToken::new()).expect("inject");
    }

    fn acker_roots(&mut self) -> Vec<RootId> {
        let acker_rx = self.acker_rx.as_mut().expect("acker queue");
        let mut roots = Vec::new();
        while let Some(msg) = acker_rx.try_pop() {
            if let QueueMsg::AckInit { root, .. } = msg {
                roots.push(root);
            }
        }
        roots
    }

    fn next_tuple_calls(&self) -> usize {
        count_events(&self.events, |event| matches!(event, SpoutEvent::NextTuple))
    }
}

fn anchored_script(count: u32) -> Vec<ScriptedEmit> {
    (0..count).map(|i| ScriptedEmit::anchored(i, 100 + i)).collect()
}

#[test]
fn activation_transition_invokes_activate_once() {
    let mut h = harness(HarnessOpts::default());

    h.executor.run_once().unwrap();
    h.executor.run_once().unwrap();
    assert_eq!(count_events(&h.events, |e| *e == SpoutEvent::Activated), 0);
    assert_eq!(h.next_tuple_calls(), 0);
    assert!(h.executor.stats().skipped_inactive >= 2);

    h.active.store(true, Ordering::Release);
    h.executor.run_once().unwrap();
    assert_eq!(count_events(&h.events, |e| *e == SpoutEvent::Activated), 1);
    assert_eq!(count_events(&h.events, |e| matches!(e, SpoutEvent::Opened(t) if *t == TASK)), 1);

    h.executor.run_once().unwrap();
    h.executor.run_once().unwrap();
    assert_eq!(count_events(&h.events, |e| *e == SpoutEvent::Activated), 1);
    assert!(h.next_tuple_calls() >= 3);
}

#[test]
fn deactivation_transition_invokes_deactivate_once() {
    let mut h = harness(HarnessOpts::default());
    h.active.store(true, Ordering::Release);
    h.executor.run_once().unwrap();

    h.active.store(false, Ordering::Release);
    h.executor.run_once().unwrap();
    h.executor.run_once().unwrap();
    assert_eq!(count_events(&h.events, |e| *e == SpoutEvent::Deactivated), 1);
}

#[test]
fn max_spout_pending_throttles_next_tuple() {
    let mut h = harness(HarnessOpts {
        max_pending: 2,
        script: anchored_script(5),
        ..HarnessOpts::default()
    });
    h.active.store(true, Ordering::Release);

    h.executor.run_once().unwrap();
    h.executor.run_once().unwrap();
    assert_eq!(h.executor.pending_len(), 2);
    assert_eq!(h.next_tuple_calls(), 2);

    // Throttled: further iterations must not call next_tuple.
    for _ in 0..4 {
        h.executor.run_once().unwrap();
    }
    assert_eq!(h.next_tuple_calls(), 2);
    assert_eq!(h.executor.pending_len(), 2);

    // One ack frees one slot and next_tuple resumes.
    let roots = h.acker_roots();
    assert_eq!(roots.len(), 2);
    h.inject(QueueMsg::Ack {
        root: roots[0],
        task: TASK,
    });
    h.executor.run_once().unwrap();
    assert_eq!(count_events(&h.events, |e| *e == SpoutEvent::Acked(100)), 1);
    assert_eq!(h.next_tuple_calls(), 3);
}

#[test]
fn backpressure_blocks_transfer_until_a_slot_frees() {
    let h = harness(HarnessOpts {
        with_acker: false,
        peer_capacity: 4,
        script: (0..5).map(ScriptedEmit::unanchored).collect(),
        ..HarnessOpts::default()
    });
    let Harness {
        mut executor,
        mut peer_rx,
        active,
        ..
    } = h;
    active.store(true, Ordering::Release);

    let runner = std::thread::spawn(move || {
        // The 5th emit blocks inside the transfer publish until the main
        // thread frees a slot.
        for _ in 0..5 {
            executor.run_once().unwrap();
        }
        executor
    });

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(peer_rx.len(), 4);
    let first = peer_rx.try_pop();
    assert!(matches!(first, Some(QueueMsg::Tuple(_))));

    let executor = runner.join().unwrap();
    assert_eq!(executor.emitted(), 5);
    assert!(peer_rx.metrics_snapshot().insert_failures >= 1);
    assert_eq!(peer_rx.len(), 4);
}

#[test]
fn ack_task_mismatch_is_fatal_and_skips_the_callback() {
    let mut h = harness(HarnessOpts {
        script: anchored_script(1),
        ..HarnessOpts::default()
    });
    h.active.store(true, Ordering::Release);
    h.executor.run_once().unwrap();
    let roots = h.acker_roots();
    assert_eq!(roots.len(), 1);

    h.inject(QueueMsg::Ack {
        root: roots[0],
        task: 7,
    });
    let error = h.executor.run_once().expect_err("mismatched ack must be fatal");
    assert!(matches!(error, Error::Invariant { .. }), "got {error}");
    assert_eq!(count_events(&h.events, |e| matches!(e, SpoutEvent::Acked(_))), 0);
}

#[test]
fn ack_invokes_spout_ack_exactly_once() {
    let mut h = harness(HarnessOpts {
        script: anchored_script(1),
        ..HarnessOpts::default()
    });
    h.active.store(true, Ordering::Release);
    h.executor.run_once().unwrap();
    assert_eq!(h.executor.pending_len(), 1);

    let root = h.acker_roots()[0];
    h.inject(QueueMsg::Ack { root, task: TASK });
    h.executor.run_once().unwrap();
    assert_eq!(h.executor.pending_len(), 0);
    assert_eq!(count_events(&h.events, |e| *e == SpoutEvent::Acked(100)), 1);
    assert!(h.executor.stats().ack_latency_samples >= 1);

    // A duplicate ack for the same root is a no-op.
    h.inject(QueueMsg::Ack { root, task: TASK });
    h.executor.run_once().unwrap();
    assert_eq!(count_events(&h.events, |e| matches!(e, SpoutEvent::Acked(_))), 1);
}

#[test]
fn fail_stream_invokes_spout_fail_once() {
    let mut h = harness(HarnessOpts {
        script: anchored_script(1),
        ..HarnessOpts::default()
    });
    h.active.store(true, Ordering::Release);
    h.executor.run_once().unwrap();
    let root = h.acker_roots()[0];

    h.inject(QueueMsg::Fail { root, task: TASK });
    h.executor.run_once().unwrap();
    assert_eq!(
        count_events(&h.events, |e| *e
            == SpoutEvent::Failed(100, FailReason::FailStream)),
        1
    );
    assert_eq!(h.executor.pending_len(), 0);
    assert_eq!(h.executor.stats().failed, 1);
}

#[test]
fn unacked_message_times_out_after_two_ticks_exactly_once() {
    let mut h = harness(HarnessOpts {
        script: anchored_script(1),
        ..HarnessOpts::default()
    });
    h.active.store(true, Ordering::Release);
    h.executor.run_once().unwrap();
    assert_eq!(h.executor.pending_len(), 1);

    // First tick: the entry moves to the older bucket, no timeout yet.
    h.inject(QueueMsg::Tick);
    h.executor.run_once().unwrap();
    assert_eq!(count_events(&h.events, |e| matches!(e, SpoutEvent::Failed(..))), 0);
    assert_eq!(h.executor.pending_len(), 1);

    // Second tick: the bucket rotates out and the message fails.
    h.inject(QueueMsg::Tick);
    h.executor.run_once().unwrap();
    assert_eq!(
        count_events(&h.events, |e| *e == SpoutEvent::Failed(100, FailReason::Timeout)),
        1
    );
    assert_eq!(h.executor.pending_len(), 0);
    assert_eq!(h.executor.stats().timeouts, 1);

    // Further ticks must not fail it again.
    h.inject(QueueMsg::Tick);
    h.executor.run_once().unwrap();
    assert_eq!(count_events(&h.events, |e| matches!(e, SpoutEvent::Failed(..))), 1);
}

#[test]
fn reset_timeout_extends_the_deadline() {
    let mut h = harness(HarnessOpts {
        script: anchored_script(1),
        ..HarnessOpts::default()
    });
    h.active.store(true, Ordering::Release);
    h.executor.run_once().unwrap();
    let root = h.acker_roots()[0];

    h.inject(QueueMsg::Tick);
    h.executor.run_once().unwrap();

    // The entry sits in the oldest bucket; the reset refreshes it.
    h.inject(QueueMsg::ResetTimeout { root });
    h.executor.run_once().unwrap();

    h.inject(QueueMsg::Tick);
    h.executor.run_once().unwrap();
    assert_eq!(count_events(&h.events, |e| matches!(e, SpoutEvent::Failed(..))), 0);

    h.inject(QueueMsg::Tick);
    h.executor.run_once().unwrap();
    assert_eq!(
        count_events(&h.events, |e| *e == SpoutEvent::Failed(100, FailReason::Timeout)),
        1
    );
}

#[test]
fn unanchored_emit_never_enters_pending() {
    let mut h = harness(HarnessOpts {
        script: vec![ScriptedEmit::unanchored(1)],
        ..HarnessOpts::default()
    });
    h.active.store(true, Ordering::Release);
    h.executor.run_once().unwrap();
    assert_eq!(h.executor.emitted(), 1);
    assert_eq!(h.executor.pending_len(), 0);
    assert!(h.acker_roots().is_empty());

    for _ in 0..3 {
        h.inject(QueueMsg::Tick);
        h.executor.run_once().unwrap();
    }
    assert_eq!(count_events(&h.events, |e| matches!(e, SpoutEvent::Acked(_))), 0);
    assert_eq!(count_events(&h.events, |e| matches!(e, SpoutEvent::Failed(..))), 0);
}

#[test]
fn reliable_emit_without_ackers_is_acked_immediately() {
    let mut h = harness(HarnessOpts {
        with_acker: false,
        script: anchored_script(1),
        ..HarnessOpts::default()
    });
    h.active.store(true, Ordering::Release);
    h.executor.run_once().unwrap();
    assert_eq!(h.executor.pending_len(), 0);
    assert_eq!(count_events(&h.events, |e| *e == SpoutEvent::Acked(100)), 1);
}

#[test]
fn empty_emit_streak_resets_on_emit() {
    let mut h = harness(HarnessOpts {
        script: anchored_script(1),
        ..HarnessOpts::default()
    });
    h.active.store(true, Ordering::Release);
    h.executor.run_once().unwrap();
    assert_eq!(h.executor.empty_emit_streak(), 0);

    // Script exhausted: every further iteration is an empty emit.
    h.executor.run_once().unwrap();
    h.executor.run_once().unwrap();
    assert_eq!(h.executor.empty_emit_streak(), 2);
}

#[test]
fn flush_msg_pushes_staged_output_downstream() {
    let mut h = harness(HarnessOpts {
        with_acker: false,
        peer_batch: 8,
        script: (0..2).map(ScriptedEmit::unanchored).collect(),
        ..HarnessOpts::default()
    });
    h.active.store(true, Ordering::Release);
    h.executor.run_once().unwrap();
    h.executor.run_once().unwrap();
    assert_eq!(h.executor.emitted(), 2);
    // Both tuples are still staged in the producer handle.
    assert_eq!(h.peer_rx.len(), 0);

    h.inject(QueueMsg::Flush);
    h.executor.run_once().unwrap();
    assert_eq!(h.peer_rx.len(), 2);
}

#[test]
fn remote_destinations_are_batched_and_flushed() {
    let mut h = harness(HarnessOpts {
        with_acker: false,
        router_to: vec![99],
        transfer_batch: 2,
        script: (0..3).map(ScriptedEmit::unanchored).collect(),
        ..HarnessOpts::default()
    });
    h.active.store(true, Ordering::Release);

    h.executor.run_once().unwrap();
    assert!(h.worker.remote_batches().is_empty());

    h.executor.run_once().unwrap();
    let batches = h.worker.remote_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].get(&99).map(Vec::len), Some(2));

    // The third emit stays staged until a flush.
    h.executor.run_once().unwrap();
    h.inject(QueueMsg::Flush);
    h.executor.run_once().unwrap();
    let batches = h.worker.remote_batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1].get(&99).map(Vec::len), Some(1));
}

#[test]
fn credentials_are_redelivered_to_spouts() {
    let mut h = harness(HarnessOpts::default());
    h.active.store(true, Ordering::Release);
    let mut credentials = std::collections::HashMap::new();
    let _ = credentials.insert("token".to_owned(), "secret".to_owned());
    h.inject(QueueMsg::CredsChanged(credentials));
    h.executor.run_once().unwrap();
    assert_eq!(count_events(&h.events, |e| *e == SpoutEvent::Credentials(1)), 1);
}

#[test]
fn metrics_tick_reports_a_snapshot() {
    let mut h = harness(HarnessOpts {
        script: anchored_script(1),
        ..HarnessOpts::default()
    });
    h.active.store(true, Ordering::Release);
    h.executor.run_once().unwrap();

    h.inject(QueueMsg::MetricsTick);
    h.executor.run_once().unwrap();

    let snapshots = h.metrics.lock().unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].name, "spout[8]");
    assert_eq!(snapshots[0].emitted, 1);
    assert_eq!(snapshots[0].pending, 1);
    assert_eq!(snapshots[0].receive_queue.name, "receive");
}

#[test]
fn interrupt_triggers_orderly_shutdown() {
    let h = harness(HarnessOpts {
        script: anchored_script(1),
        ..HarnessOpts::default()
    });
    let Harness {
        executor,
        mut ctrl,
        events,
        active,
        ..
    } = h;
    active.store(true, Ordering::Release);

    let runner = std::thread::spawn(move || executor.run());

    std::thread::sleep(Duration::from_millis(20));
    assert!(ctrl.halt_with_interrupt(QueueMsg::Interrupt));
    runner.join().unwrap().unwrap();

    assert_eq!(count_events(&events, |e| *e == SpoutEvent::Deactivated), 1);
}

#[test]
fn cancel_token_stops_the_run_loop() {
    let h = harness(HarnessOpts::default());
    let Harness {
        executor, cancel, ..
    } = h;

    let runner = std::thread::spawn(move || executor.run());
    std::thread::sleep(Duration::from_millis(10));
    cancel.cancel();
    runner.join().unwrap().unwrap();
}
