//! Per-actor records and the types that cross the runtime's public API.
//!
//! Each actor lives in a fixed slot of the scheduler's process array. A
//! slot is recycled across many actor lifetimes; the generation counter in
//! its [`Pid`] distinguishes successive occupants, so a PID held after its
//! actor died is rejected rather than delivered to the slot's next tenant.
//!
//! ## Release protocol
//!
//! A slot's generation is only ever bumped while its release lock is held,
//! and the slot only reappears in the free pool after the bump. A sender
//! that wins the lock therefore sees either the generation it expects (the
//! actor is alive) or a newer one (the actor is gone for good).

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::AtomicU32;

use parking_lot::Mutex;

use crate::actor::mailbox::Mailbox;
use crate::actor::scheduler::Context;

// ---------------------------------------------------------------------------
// Pid
// ---------------------------------------------------------------------------

/// The address of one actor incarnation.
///
/// A PID names a runtime instance, a slot within it, and the generation
/// the slot had when the actor was spawned. PIDs are plain values: copy
/// them, store them, send them inside messages. Equality holds only
/// between PIDs of the same incarnation; once the actor stops, its PID is
/// permanently invalid.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid {
    pub(crate) queue: u32,
    pub(crate) slot: u32,
    pub(crate) gen: u32,
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}.{}.{}>", self.queue, self.slot, self.gen)
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({})", self)
    }
}

// ---------------------------------------------------------------------------
// Handler protocol
// ---------------------------------------------------------------------------

/// What an actor wants the scheduler to do next, returned from every
/// handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessControl {
    /// Terminate: drop the actor's state, drain its mailbox, recycle the
    /// slot.
    Stop,
    /// Sleep until a message arrives; the handler is re-entered only with
    /// a freshly popped message.
    WaitMessage,
    /// Stay runnable; the handler is re-entered with no message.
    Continue,
}

/// Disposition of a message the runtime could not enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageAction {
    /// Hand the message back to the caller.
    Keep,
    /// Drop the message.
    Remove,
}

/// Outcome of a send attempt.
///
/// Failures carry the undelivered payload back to the caller where the
/// chosen [`MessageAction`] allows it.
#[must_use]
#[derive(Debug, PartialEq)]
pub enum SendResult<M> {
    /// The message is in the destination mailbox.
    Sent,
    /// The mailbox was full or the destination was mid-termination. The
    /// payload is returned under [`MessageAction::Keep`] and has been
    /// dropped under [`MessageAction::Remove`].
    Fail(Option<M>),
    /// The PID's generation no longer matches: the actor is gone and this
    /// PID will never be deliverable again. The payload is always
    /// returned.
    Dead(M),
}

impl<M> SendResult<M> {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendResult::Sent)
    }
}

/// The actor body: invoked once per delivery (or per cycle while the actor
/// keeps itself runnable). Captured state is the actor's private state and
/// is dropped when the actor stops.
pub type Handler<M> = Box<dyn FnMut(&Context<M>, Option<M>) -> ProcessControl + Send>;

// ---------------------------------------------------------------------------
// SpawnOptions
// ---------------------------------------------------------------------------

/// Per-actor spawn parameters.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Mailbox capacity in messages (rounded up to a power of two).
    pub mailbox_cap: usize,
    /// Upper bound on handler invocations per scheduler visit; clamped to
    /// the mailbox capacity and to at least 1.
    pub max_messages_per_cycle: u32,
}

impl Default for SpawnOptions {
    fn default() -> SpawnOptions {
        SpawnOptions {
            mailbox_cap: 64,
            max_messages_per_cycle: 16,
        }
    }
}

// ---------------------------------------------------------------------------
// Process (the slot record)
// ---------------------------------------------------------------------------

/// Whether the scheduler re-enters the handler spontaneously or only on
/// message arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunState {
    Running,
    Waiting,
}

/// The mutable half of an actor incarnation. Installed at spawn, dropped
/// at release; touched only by the slot's current owner.
pub(crate) struct ProcessBody<M: Send + 'static> {
    pub(crate) handler: Handler<M>,
    pub(crate) parent: Option<Pid>,
    pub(crate) run_state: RunState,
    pub(crate) budget: u32,
}

/// One slot of the process array. Slots have stable addresses for the
/// lifetime of the scheduler and are recycled, never freed, between actor
/// lifetimes.
///
/// Two ownership regimes coexist:
///
/// - `body` belongs to the slot's *current owner*: the spawner until the
///   slot is pushed onto the run queue, then whichever worker popped it,
///   exclusively, until it is re-enqueued or released.
/// - `mailbox` is written (installed/taken) only under the release lock;
///   it is read by senders holding the lock and by the owning worker
///   without it. The queue inside is itself thread-safe, so concurrent
///   shared access is fine; the lock only serializes replacement.
pub(crate) struct Process<M: Send + 'static> {
    pub(crate) id: u32,
    pub(crate) gen: AtomicU32,
    /// The release lock: `try_lock` on the send path, a blocking `lock`
    /// for the short install/release critical sections.
    pub(crate) lock: Mutex<()>,
    mailbox: UnsafeCell<Option<Mailbox<M>>>,
    body: UnsafeCell<Option<ProcessBody<M>>>,
}

// Safety: the cells are governed by the ownership regimes documented on
// the struct; every access point upholds them (see scheduler.rs). The
// remaining fields are thread-safe on their own.
unsafe impl<M: Send + 'static> Sync for Process<M> {}

impl<M: Send + 'static> Process<M> {
    pub(crate) fn new(id: u32) -> Process<M> {
        Process {
            id,
            gen: AtomicU32::new(0),
            lock: Mutex::new(()),
            mailbox: UnsafeCell::new(None),
            body: UnsafeCell::new(None),
        }
    }

    /// Shared view of the installed mailbox, if any.
    ///
    /// # Safety
    ///
    /// The caller must hold the release lock or be the slot's current
    /// owner; either excludes a concurrent install/clear.
    pub(crate) unsafe fn mailbox(&self) -> Option<&Mailbox<M>> {
        (*self.mailbox.get()).as_ref()
    }

    /// Exclusive view of the body.
    ///
    /// # Safety
    ///
    /// Only the slot's current owner may call this, and no other reference
    /// into the body may be live at the same time.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn body_mut(&self) -> &mut Option<ProcessBody<M>> {
        &mut *self.body.get()
    }

    /// Install a fresh incarnation.
    ///
    /// # Safety
    ///
    /// The caller must own the slot (freshly popped from the free pool)
    /// and hold the release lock.
    pub(crate) unsafe fn install(&self, mailbox: Mailbox<M>, body: ProcessBody<M>) {
        *self.mailbox.get() = Some(mailbox);
        *self.body.get() = Some(body);
    }

    /// Drop the handler (and with it the actor's captured state) and the
    /// mailbox together with any undelivered messages.
    ///
    /// # Safety
    ///
    /// The caller must own the slot and hold the release lock.
    pub(crate) unsafe fn clear(&self) {
        *self.body.get() = None;
        *self.mailbox.get() = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
