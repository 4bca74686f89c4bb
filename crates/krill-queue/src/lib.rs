//! Bounded lock-free MPMC queue with sequence-stamped slots.
//!
//! This is the queue underneath the whole Krill runtime: the global run
//! queue, the free slot pool, and every actor mailbox are all instances of
//! [`MpmcQueue`]. The algorithm is Dmitry Vyukov's bounded MPMC queue
//! (<http://www.1024cores.net/home/lock-free-algorithms/queues/bounded-mpmc-queue>):
//! a ring of slots, each stamped with a sequence number, plus two
//! monotonically increasing ticket counters.
//!
//! ## Sequence discipline
//!
//! Slot `i` starts with `sequence = i`. A push that claimed ticket `t`
//! writes slot `t & mask` and publishes `sequence = t + 1`; the pop that
//! claims ticket `t` reads the same slot once it observes `sequence = t + 1`
//! and releases it with `sequence = t + capacity`, which is exactly what the
//! push at ticket `t + capacity` waits for. Ticket counters may wrap; only
//! `ticket & mask` and the wrapping difference `sequence - ticket` are ever
//! observed, so wrap-around is benign.
//!
//! ## Progress
//!
//! Push and pop never block and never spin on a full or empty queue: a full
//! queue hands the value back, an empty queue returns `None`. A producer
//! that sleeps between claiming a ticket and publishing the sequence can
//! delay *other* operations on the same side (they see an in-between
//! sequence and retry), but never loses or corrupts a slot.

use std::cell::UnsafeCell;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crossbeam_utils::CachePadded;

struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<Option<T>>,
}

/// A bounded queue that is safe for any number of producers and consumers.
///
/// The capacity is fixed at construction and rounded up to the next power
/// of two (minimum 2) so slot indexing is a mask operation. Elements still
/// stored when the queue is dropped are dropped with it.
pub struct MpmcQueue<T> {
    buffer: Box<[Slot<T>]>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

// Safety: the sequence protocol hands each stored value from exactly one
// producer to exactly one consumer, with a Release store / Acquire load
// pair on the slot sequence establishing the transfer. No `T: Sync` bound
// is needed because a value is never accessed from two threads at once.
unsafe impl<T: Send> Send for MpmcQueue<T> {}
unsafe impl<T: Send> Sync for MpmcQueue<T> {}

impl<T> MpmcQueue<T> {
    /// Create a queue with at least `capacity` slots.
    pub fn with_capacity(capacity: usize) -> MpmcQueue<T> {
        let capacity = if capacity < 2 {
            2
        } else {
            capacity.next_power_of_two()
        };

        let buffer: Box<[Slot<T>]> = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(None),
            })
            .collect();

        MpmcQueue {
            buffer,
            mask: capacity - 1,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Effective capacity after power-of-two rounding.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Number of stored elements. Exact at quiescence, approximate while
    /// other threads are pushing or popping.
    pub fn len(&self) -> usize {
        self.enqueue_pos
            .load(Relaxed)
            .wrapping_sub(self.dequeue_pos.load(Relaxed))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send> MpmcQueue<T> {
    /// Push a value. Returns the value back in `Err` iff the queue is full.
    pub fn push(&self, value: T) -> Result<(), T> {
        let mask = self.mask;
        let mut pos = self.enqueue_pos.load(Relaxed);
        loop {
            let slot = &self.buffer[pos & mask];
            let seq = slot.sequence.load(Acquire);
            let diff = seq.wrapping_sub(pos) as isize;

            if diff == 0 {
                // The slot is writable by the push holding ticket `pos`;
                // try to become that push.
                match self
                    .enqueue_pos
                    .compare_exchange_weak(pos, pos.wrapping_add(1), Relaxed, Relaxed)
                {
                    Ok(_) => {
                        // Safety: the ticket claim above makes this thread
                        // the unique writer of this slot until the sequence
                        // store below publishes it to the paired pop.
                        unsafe {
                            *slot.value.get() = Some(value);
                        }
                        slot.sequence.store(pos.wrapping_add(1), Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // The slot has not been freed by the pop one lap behind us.
                return Err(value);
            } else {
                pos = self.enqueue_pos.load(Relaxed);
            }
        }
    }

    /// Pop a value. Returns `None` iff the queue is empty.
    pub fn pop(&self) -> Option<T> {
        let mask = self.mask;
        let mut pos = self.dequeue_pos.load(Relaxed);
        loop {
            let slot = &self.buffer[pos & mask];
            let seq = slot.sequence.load(Acquire);
            let diff = seq.wrapping_sub(pos.wrapping_add(1)) as isize;

            if diff == 0 {
                match self
                    .dequeue_pos
                    .compare_exchange_weak(pos, pos.wrapping_add(1), Relaxed, Relaxed)
                {
                    Ok(_) => {
                        // Safety: the ticket claim makes this thread the
                        // unique reader of this slot; the Acquire load of
                        // the sequence synchronized with the producer's
                        // publication of the value.
                        let value = unsafe { (*slot.value.get()).take() };
                        slot.sequence.store(pos.wrapping_add(mask + 1), Release);
                        return value;
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // The paired push has not happened yet.
                return None;
            } else {
                pos = self.dequeue_pos.load(Relaxed);
            }
        }
    }
}

impl<T> std::fmt::Debug for MpmcQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpmcQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
