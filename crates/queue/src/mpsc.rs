// Copyright Spate contributors
// SPDX-License-Identifier: Apache-2.0

//! Multi-producer single-consumer bounded ring.
//!
//! Sequence-number ring: every slot carries a sequence atomic that encodes
//! whether the slot is free for the producer lapping it or holds a value for
//! the consumer. Producers claim slots with a CAS on the enqueue cursor;
//! the single consumer advances the dequeue cursor without contention.
#![allow(unsafe_code)]

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Slot<T> {
    /// `pos` when free for the producer claiming index `pos`; `pos + 1` when
    /// holding the value published at index `pos`.
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

struct Shared<T> {
    mask: usize,
    slots: Box<[Slot<T>]>,
    enqueue: CachePadded<AtomicUsize>,
    dequeue: CachePadded<AtomicUsize>,
}

// SAFETY: slot values are only written by the producer that won the CAS for
// that sequence number, and only read by the single consumer after the
// sequence store made the write visible.
unsafe impl<T: Send> Send for Shared<T> {}
// SAFETY: see above.
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // All handles are gone; any slot whose sequence says "published"
        // still holds a value.
        let dequeue = *self.dequeue.get_mut();
        let enqueue = *self.enqueue.get_mut();
        let mut pos = dequeue;
        while pos != enqueue {
            let slot = &mut self.slots[pos & self.mask];
            if *slot.seq.get_mut() == pos.wrapping_add(1) {
                // SAFETY: the sequence marks this slot as published and
                // unconsumed.
                unsafe { slot.value.get_mut().assume_init_drop() };
            }
            pos = pos.wrapping_add(1);
        }
    }
}

/// The producing half. Cloneable; any number of threads may publish.
pub(crate) struct Producer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Producer {
            shared: self.shared.clone(),
        }
    }
}

/// The consuming half. Not cloneable; popping takes `&mut self`.
pub(crate) struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

/// Creates a ring with `capacity` slots. `capacity` must be a power of two.
pub(crate) fn ring<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    debug_assert!(capacity.is_power_of_two());
    let slots = (0..capacity)
        .map(|i| Slot {
            seq: AtomicUsize::new(i),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        })
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let shared = Arc::new(Shared {
        mask: capacity - 1,
        slots,
        enqueue: CachePadded::new(AtomicUsize::new(0)),
        dequeue: CachePadded::new(AtomicUsize::new(0)),
    });
    (
        Producer {
            shared: shared.clone(),
        },
        Consumer { shared },
    )
}

impl<T> Producer<T> {
    /// Publishes one item. Returns the item back when the ring is full.
    pub(crate) fn push(&self, value: T) -> Result<(), T> {
        let shared = &*self.shared;
        let mut pos = shared.enqueue.load(Ordering::Relaxed);
        loop {
            let slot = &shared.slots[pos & shared.mask];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;
            if diff == 0 {
                match shared.enqueue.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the CAS gave this producer exclusive claim
                        // on the slot for sequence `pos`.
                        unsafe { slot.value.get().write(MaybeUninit::new(value)) };
                        slot.seq.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // The consumer has not freed this slot yet: the ring is full.
                return Err(value);
            } else {
                pos = shared.enqueue.load(Ordering::Relaxed);
            }
        }
    }

    /// Moves up to `items.len()` items from the head of `items` into the
    /// ring. Returns the number accepted.
    pub(crate) fn push_batch(&self, items: &mut VecDeque<T>) -> usize {
        let mut accepted = 0;
        while let Some(value) = items.pop_front() {
            match self.push(value) {
                Ok(()) => accepted += 1,
                Err(back) => {
                    items.push_front(back);
                    break;
                }
            }
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
        let shared = &*self.shared;
        let pos = shared.dequeue.load(Ordering::Relaxed);
        let slot = &shared.slots[pos & shared.mask];
        let seq = slot.seq.load(Ordering::Acquire);
        if seq != pos.wrapping_add(1) {
            return None;
        }
        // SAFETY: the sequence says the producer's write at `pos` is
        // complete, and this is the only consumer.
        let value = unsafe { (*slot.value.get()).assume_init_read() };
        // Free the slot for the producer one lap ahead.
        slot.seq
            .store(pos.wrapping_add(shared.mask).wrapping_add(1), Ordering::Release);
        shared.dequeue.store(pos.wrapping_add(1), Ordering::Relaxed);
        Some(value)
    }

    /// Estimated number of queued items.
    pub(crate) fn len(&self) -> usize {
        ring_len(&self.shared)
    }
}

fn ring_len<T>(shared: &Shared<T>) -> usize {
    let enqueue = shared.enqueue.load(Ordering::Acquire);
    let dequeue = shared.dequeue.load(Ordering::Acquire);
    enqueue.wrapping_sub(dequeue).min(shared.mask + 1)
}

#[cfg(test)]
mod tests {
    #![allow(missing_docs, clippy::unwrap_used)]
    use super::*;

    #[test]
    fn fifo_single_producer() {
        let (tx, mut rx) = ring::<u32>(4);
        for i in 0..4 {
            tx.push(i).unwrap();
        }
        assert_eq!(tx.push(99), Err(99));
        for i in 0..4 {
            assert_eq!(rx.pop(), Some(i));
        }
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn slot_reuse_across_laps() {
        let (tx, mut rx) = ring::<u32>(2);
        for lap in 0..10 {
            tx.push(lap * 2).unwrap();
            tx.push(lap * 2 + 1).unwrap();
            assert_eq!(rx.pop(), Some(lap * 2));
            assert_eq!(rx.pop(), Some(lap * 2 + 1));
        }
    }

    #[test]
    fn per_producer_order_is_preserved() {
        const PER_PRODUCER: u64 = 20_000;
        let (tx, mut rx) = ring::<(usize, u64)>(256);
        let mut producers = Vec::new();
        for id in 0..4 {
            let tx = tx.clone();
            producers.push(std::thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let mut item = (id, i);
                    loop {
                        match tx.push(item) {
                            Ok(()) => break,
                            Err(back) => item = back,
                        }
                        std::thread::yield_now();
                    }
                }
            }));
        }
        drop(tx);

        let mut next = [0u64; 4];
        let mut received = 0;
        while received < 4 * PER_PRODUCER {
            if let Some((id, i)) = rx.pop() {
                assert_eq!(i, next[id], "producer {id} out of order");
                next[id] += 1;
                received += 1;
            } else {
                std::thread::yield_now();
            }
        }
        for handle in producers {
            handle.join().unwrap();
        }
        assert_eq!(next, [PER_PRODUCER; 4]);
    }
}
