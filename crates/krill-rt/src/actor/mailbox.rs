//! Per-actor bounded FIFO mailbox.
//!
//! Each actor owns one mailbox for the duration of its incarnation. The
//! producer side is entered by senders holding the actor's release lock;
//! the consumer side by whichever worker is currently running the actor.
//! The backing store is the same sequence-stamped ring as the run queue,
//! so it tolerates any number of concurrent producers and consumers while
//! delivering one producer's messages in send order.

use krill_queue::MpmcQueue;

/// A bounded FIFO of undelivered messages.
///
/// `push` rejects (handing the message back) when the mailbox is full;
/// `pop` returns `None` when it is empty. Messages still queued when the
/// mailbox is dropped are dropped with it.
pub(crate) struct Mailbox<M> {
    queue: MpmcQueue<M>,
}

impl<M: Send> Mailbox<M> {
    /// Create a mailbox holding at least `capacity` messages.
    pub(crate) fn with_capacity(capacity: usize) -> Mailbox<M> {
        Mailbox {
            queue: MpmcQueue::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&self, msg: M) -> Result<(), M> {
        self.queue.push(msg)
    }

    pub(crate) fn pop(&self) -> Option<M> {
        self.queue.pop()
    }

    #[allow(dead_code)]
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

impl<M> std::fmt::Debug for Mailbox<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("len", &self.queue.len())
            .field("capacity", &self.queue.capacity())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
