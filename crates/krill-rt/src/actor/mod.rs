//! The actor runtime: slot records, mailboxes, and the scheduler.
//!
//! Krill actors are lightweight processes multiplexed across a fixed set
//! of OS worker threads:
//!
//! - **Process records** (`process.rs`): the per-slot state — generation
//!   counter, release lock, mailbox, handler body — plus the public
//!   protocol types ([`Pid`], [`ProcessControl`], [`SendResult`]).
//! - **Mailbox** (`mailbox.rs`): per-actor bounded FIFO backed by the
//!   sequence-stamped ring from `krill-queue`.
//! - **Scheduler** (`scheduler.rs`): the worker threads, the run queue and
//!   free pool, and the spawn/send/release protocols.
//!
//! ## Lifecycle
//!
//! `spawn` claims a slot from the free pool and enqueues it runnable; the
//! handler then runs whenever a worker visits the actor, one cooperative
//! cycle at a time, until it returns [`ProcessControl::Stop`]. Termination
//! bumps the slot's generation before recycling it, so any PID from the
//! previous life is rejected by later sends instead of reaching the new
//! occupant.

pub(crate) mod mailbox;
pub mod process;
pub mod scheduler;

pub use process::{Handler, MessageAction, Pid, ProcessControl, SendResult, SpawnOptions};
pub use scheduler::{Context, Scheduler, SchedulerConfig};
