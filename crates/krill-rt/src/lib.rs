//! Krill: a tiny cooperative actor runtime.
//!
//! A [`Scheduler`] owns a fixed-capacity pool of actor slots and a small
//! set of worker threads. Actors are closures invoked cooperatively — one
//! message (or one idle cycle) at a time — and communicate only by
//! asynchronous message passing through bounded per-actor mailboxes.
//! Slots are recycled, not freed: a generation counter in every [`Pid`]
//! makes sends to a dead-and-recycled actor fail safely instead of
//! reaching the slot's next occupant.
//!
//! ```no_run
//! use krill_rt::{MessageAction, ProcessControl, Scheduler, SchedulerConfig, SpawnOptions};
//!
//! let sched = Scheduler::<String>::new(SchedulerConfig::default()).unwrap();
//! let echo = sched
//!     .spawn(
//!         |_ctx, msg| match msg {
//!             None => ProcessControl::WaitMessage,
//!             Some(text) => {
//!                 println!("got {text}");
//!                 ProcessControl::Stop
//!             }
//!         },
//!         SpawnOptions::default(),
//!     )
//!     .unwrap();
//! let _ = sched.send(echo, "hello".to_owned(), MessageAction::Remove);
//! sched.shutdown();
//! ```
//!
//! There is no preemption: an actor runs until its handler returns, and a
//! handler that never returns occupies one worker forever. Everything that
//! can fail at runtime fails as a value ([`SendResult`], a `None` PID) —
//! the only `Err` in the crate is configuration validation at startup.

pub mod actor;
pub mod error;

pub use actor::{
    Context, Handler, MessageAction, Pid, ProcessControl, Scheduler, SchedulerConfig, SendResult,
    SpawnOptions,
};
pub use error::{Error, Result};
