// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! Messages flowing through executor receive queues.
//!
//! Everything a spout executor can observe on its queue is one
//! [`QueueMsg`] variant, so consumer dispatch is total: data tuples, the
//! acker ack/fail/reset records, the periodic ticks, and the teardown
//! sentinel. The engine is generic over the user payload type `P`, the way
//! the wire format is an external concern.

use std::borrow::Cow;
use std::collections::HashMap;

/// The smallest unit of parallelism; an instance of a user operator.
pub type TaskId = u32;

/// Identifier of an anchored tuple tree, chosen at emit time.
/// Random, 64-bit, never zero.
pub type RootId = u64;

/// Identifier of the stream a tuple was emitted on.
pub type StreamId = Cow<'static, str>;

/// Stream id carrying flush requests. Wire-stable.
pub const SYSTEM_FLUSH_STREAM_ID: &str = "__system_flush";
/// Stream id carrying pending-rotation ticks. Wire-stable.
pub const SYSTEM_TICK_STREAM_ID: &str = "__system_tick";
/// Stream id carrying metrics-collection ticks. Wire-stable.
pub const METRICS_TICK_STREAM_ID: &str = "__metrics_tick";
/// Stream id carrying credential updates. Wire-stable.
pub const CREDENTIALS_CHANGED_STREAM_ID: &str = "__credentials_changed";
/// Stream id carrying acker acknowledgements. Wire-stable.
pub const ACKER_ACK_STREAM_ID: &str = "__ack_ack";
/// Stream id carrying acker failure notifications. Wire-stable.
pub const ACKER_FAIL_STREAM_ID: &str = "__ack_fail";
/// Stream id carrying acker timeout extensions. Wire-stable.
pub const ACKER_RESET_TIMEOUT_STREAM_ID: &str = "__ack_reset_timeout";
/// Stream id carrying ack-bookkeeping records to acker tasks. Wire-stable.
pub const ACKER_INIT_STREAM_ID: &str = "__ack_init";

/// Link between a tuple and the tree it is anchored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    /// The root id of the tuple tree.
    pub root: RootId,
    /// This edge's contribution to the tree's XOR checksum.
    pub edge: u64,
}

/// An ordered record flowing through the topology. Immutable once published.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple<P> {
    /// The task that emitted the tuple.
    pub src_task: TaskId,
    /// The stream the tuple was emitted on.
    pub stream: StreamId,
    /// The user payload.
    pub values: P,
    /// Present only on anchored emits.
    pub anchor: Option<Anchor>,
}

/// A tuple together with its destination task.
///
/// Constructed at emit, consumed by local delivery or serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressedTuple<P> {
    /// The destination task.
    pub dest: TaskId,
    /// The tuple to deliver.
    pub tuple: Tuple<P>,
}

/// Everything that can appear on an executor receive queue.
#[derive(Debug, Clone)]
pub enum QueueMsg<P> {
    /// A data tuple addressed to one of this executor's tasks.
    Tuple(AddressedTuple<P>),

    /// A downstream acker confirmed completion of the tuple tree `root`.
    Ack {
        /// The root id of the completed tree.
        root: RootId,
        /// The spout task the acknowledgement is addressed to.
        task: TaskId,
    },

    /// A downstream acker reported explicit failure of the tuple tree
    /// `root`.
    Fail {
        /// The root id of the failed tree.
        root: RootId,
        /// The spout task the failure is addressed to.
        task: TaskId,
    },

    /// An acker asked for the timeout of `root` to be extended.
    ResetTimeout {
        /// The root id of the tree whose timeout is refreshed.
        root: RootId,
    },

    /// Ack-bookkeeping record emitted alongside an anchored tuple,
    /// addressed to an acker task.
    AckInit {
        /// The root id of the new tuple tree.
        root: RootId,
        /// XOR of the anchor edge ids emitted for the tree.
        checksum: u64,
        /// The spout task that emitted the tree.
        task: TaskId,
    },

    /// Periodic tick driving pending-map rotation and therefore timeouts.
    Tick,

    /// Request to flush staged output downstream.
    Flush,

    /// Periodic tick driving metrics publication.
    MetricsTick,

    /// New credentials to re-deliver to spouts that opted in.
    CredsChanged(HashMap<String, String>),

    /// Teardown sentinel published so a consumer observes shutdown.
    Interrupt,
}

impl<P> QueueMsg<P> {
    /// The wire-stable stream id of a control variant; `None` for data
    /// tuples, whose stream travels in the tuple itself.
    #[must_use]
    pub fn control_stream_id(&self) -> Option<&'static str> {
        match self {
            QueueMsg::Tuple(_) => None,
            QueueMsg::Ack { .. } => Some(ACKER_ACK_STREAM_ID),
            QueueMsg::Fail { .. } => Some(ACKER_FAIL_STREAM_ID),
            QueueMsg::ResetTimeout { .. } => Some(ACKER_RESET_TIMEOUT_STREAM_ID),
            QueueMsg::AckInit { .. } => Some(ACKER_INIT_STREAM_ID),
            QueueMsg::Tick => Some(SYSTEM_TICK_STREAM_ID),
            QueueMsg::Flush => Some(SYSTEM_FLUSH_STREAM_ID),
            QueueMsg::MetricsTick => Some(METRICS_TICK_STREAM_ID),
            QueueMsg::CredsChanged(_) => Some(CREDENTIALS_CHANGED_STREAM_ID),
            QueueMsg::Interrupt => None,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(missing_docs)]
    use super::*;

    #[test]
    fn control_stream_ids_are_wire_stable() {
        assert_eq!(
            QueueMsg::<()>::Tick.control_stream_id(),
            Some("__system_tick")
        );
        assert_eq!(
            QueueMsg::<()>::Ack { root: 1, task: 2 }.control_stream_id(),
            Some("__ack_ack")
        );
        assert_eq!(QueueMsg::<()>::Interrupt.control_stream_id(), None);
    }
}
