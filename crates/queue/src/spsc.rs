// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! Single-producer single-consumer bounded ring.
//!
//! Classic two-cursor design: the producer owns the tail, the consumer owns
//! the head, and each side keeps a cached copy of the other cursor so the
//! shared atomics are only touched when the cached view runs out. Exclusive
//! access per side is enforced by the handle types: neither handle is
//! cloneable and both take `&mut self`.
#![allow(unsafe_code)]

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Shared<T> {
    mask: usize,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    /// Next index to read; written only by the consumer.
    head: CachePadded<AtomicUsize>,
    /// Next index to write; written only by the producer.
    tail: CachePadded<AtomicUsize>,
}

// SAFETY: slots are only accessed through the two unique handles: the
// producer writes slots in [tail, head + capacity) and the consumer reads
// slots in [head, tail), with the cursor stores ordering the hand-off.
unsafe impl<T: Send> Send for Shared<T> {}
// SAFETY: see above; `&Shared` is only used for the atomic cursors.
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // Both handles are gone by now; drain what was published but never
        // consumed.
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        let mut pos = head;
        while pos != tail {
            let slot = self.slots[pos & self.mask].get_mut();
            // SAFETY: positions in [head, tail) hold initialized values.
            unsafe { slot.assume_init_drop() };
            pos = pos.wrapping_add(1);
        }
    }
}

/// The producing half. Not cloneable; publishing takes `&mut self`.
pub(crate) struct Producer<T> {
    shared: Arc<Shared<T>>,
    head_cache: usize,
}

/// The consuming half. Not cloneable; popping takes `&mut self`.
pub(crate) struct Consumer<T> {
    shared: Arc<Shared<T>>,
    tail_cache: usize,
}

/// Creates a ring with `capacity` slots. `capacity` must be a power of two.
pub(crate) fn ring<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    debug_assert!(capacity.is_power_of_two());
    let slots = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let shared = Arc::new(Shared {
        mask: capacity - 1,
        slots,
        head: CachePadded::new(AtomicUsize::new(0)),
        tail: CachePadded::new(AtomicUsize::new(0)),
    });
    (
        Producer {
            shared: shared.clone(),
            head_cache: 0,
        },
        Consumer {
            shared,
            tail_cache: 0,
        },
    )
}

impl<T> Producer<T> {
    fn capacity(&self) -> usize {
        self.shared.mask + 1
    }

    fn space(&mut self, tail: usize) -> usize {
        let used = tail.wrapping_sub(self.head_cache);
        if used < self.capacity() {
            return self.capacity() - used;
        }
        // Cached head is stale; refresh once.
        self.head_cache = self.shared.head.load(Ordering::Acquire);
        self.capacity() - tail.wrapping_sub(self.head_cache)
    }

    /// Publishes one item. Returns the item back when the ring is full.
    pub(crate) fn push(&mut self, value: T) -> Result<(), T> {
        let tail = self.shared.tail.load(Ordering::Relaxed);
        if self.space(tail) == 0 {
            return Err(value);
        }
        let slot = self.shared.slots[tail & self.shared.mask].get();
        // SAFETY: the slot is outside [head, tail), so the consumer does not
        // touch it until the tail store below publishes it.
        unsafe { slot.write(MaybeUninit::new(value)) };
        self.shared.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Moves up to `items.len()` items from the head of `items` into the
    /// ring. Returns the number accepted.
    pub(crate) fn push_batch(&mut self, items: &mut VecDeque<T>) -> usize {
        let tail = self.shared.tail.load(Ordering::Relaxed);
        let accepted = self.space(tail).min(items.len());
        for offset in 0..accepted {
            let value = match items.pop_front() {
                Some(value) => value,
                None => unreachable!("accepted is bounded by items.len()"),
            };
            let slot = self.shared.slots[tail.wrapping_add(offset) & self.shared.mask].get();
            // SAFETY: same hand-off argument as `push`; all written slots are
            // published by the single tail store below.
            unsafe { slot.write(MaybeUninit::new(value)) };
        }
        if accepted > 0 {
            self.shared
                .tail
                .store(tail.wrapping_add(accepted), Ordering::Release);
        }
        accepted
    }

    /// Estimated number of queued items.
    pub(crate) fn len(&self) -> usize {
        ring_len(&self.shared)
    }
}

impl<T> Consumer<T> {
    /// Pops the oldest item, if any.
    pub(crate) fn pop(&mut self) -> Option<T> {
        let head = self.shared.head.load(Ordering::Relaxed);
        if head == self.tail_cache {
            self.tail_cache = self.shared.tail.load(Ordering::Acquire);
            if head == self.tail_cache {
                return None;
            }
        }
        let slot = self.shared.slots[head & self.shared.mask].get();
        // SAFETY: head < tail, so the slot holds an initialized value the
        // producer will not touch until the head store below releases it.
        let value = unsafe { (*slot).assume_init_read() };
        self.shared.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    /// Estimated number of queued items.
    pub(crate) fn len(&self) -> usize {
        ring_len(&self.shared)
    }
}

fn ring_len<T>(shared: &Shared<T>) -> usize {
    let tail = shared.tail.load(Ordering::Acquire);
    let head = shared.head.load(Ordering::Acquire);
    tail.wrapping_sub(head).min(shared.mask + 1)
}
