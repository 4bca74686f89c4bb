//! Worker-thread scheduler over a fixed pool of actor slots.
//!
//! The scheduler owns every per-process resource: the slot array, the free
//! slot pool, the global run queue, and the worker threads. All three
//! queues are the same bounded sequence-stamped ring ([`MpmcQueue`]), so
//! every cross-thread handoff in the runtime is lock-free; the only lock
//! is the tiny per-slot release lock serializing termination against
//! senders.
//!
//! ## Worker loop
//!
//! Each worker repeatedly pops one runnable actor and visits it for up to
//! its per-cycle message budget. A `Running` actor is invoked with no
//! message; a `Waiting` actor is invoked only with a message freshly
//! popped from its mailbox, and an empty mailbox ends the visit. The
//! handler's return value decides what happens next: `Continue` and
//! `WaitMessage` put the actor back on the run queue, `Stop` retires it
//! and recycles its slot.
//!
//! ## Why spawn can momentarily find the pool empty
//!
//! Termination publishes a slot in two steps: the pool push happens under
//! the release lock, the process-count decrement after it. A spawner that
//! won its headcount reservation against that decrement may therefore poll
//! an empty pool for a moment; it spins with an OS yield until the push
//! lands.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use log::{debug, error};
use parking_lot::Mutex;

use krill_queue::MpmcQueue;

use crate::actor::mailbox::Mailbox;
use crate::actor::process::{
    Handler, MessageAction, Pid, Process, ProcessBody, ProcessControl, RunState, SendResult,
    SpawnOptions,
};
use crate::error::{Error, Result};

/// Distinguishes coexisting scheduler instances; a PID is only meaningful
/// to the instance whose id it carries. Starts at 1 so id 0 never names a
/// live scheduler.
static NEXT_SCHEDULER_ID: AtomicU32 = AtomicU32::new(1);

// ---------------------------------------------------------------------------
// SchedulerConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of simultaneously live actors; also the size of the
    /// slot array, allocated up front.
    pub process_cap: usize,
    /// Number of worker threads. 0 means one per available CPU core.
    pub workers: usize,
}

impl SchedulerConfig {
    pub fn new(process_cap: usize, workers: usize) -> SchedulerConfig {
        SchedulerConfig {
            process_cap,
            workers,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.process_cap == 0 {
            return Err(Error::config("process_cap must be at least 1"));
        }
        if self.process_cap > u32::MAX as usize {
            return Err(Error::config("process_cap exceeds the addressable slot range"));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> SchedulerConfig {
        SchedulerConfig {
            process_cap: 1024,
            workers: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// The actor runtime: a fixed slot pool multiplexed over worker threads.
///
/// All state is reference-counted into the workers, so the handle is cheap
/// to use from any thread. Dropping the handle shuts the runtime down (see
/// [`Scheduler::shutdown`]).
pub struct Scheduler<M: Send + 'static> {
    core: Arc<SchedulerCore<M>>,
}

/// Shared state behind the scheduler handle and every worker.
struct SchedulerCore<M: Send + 'static> {
    id: u32,
    slots: Box<[Process<M>]>,
    /// Free slot indices; initially every slot.
    proc_pool: MpmcQueue<u32>,
    /// Runnable slot indices; sized to the slot count so reinsertion can
    /// only fail transiently.
    run_queue: MpmcQueue<u32>,
    proc_count: AtomicU32,
    process_cap: u32,
    stopped: AtomicBool,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl<M: Send + 'static> Scheduler<M> {
    /// Build the runtime and start its worker threads.
    ///
    /// Failure to create a worker thread is fatal.
    pub fn new(config: SchedulerConfig) -> Result<Scheduler<M>> {
        config.validate()?;
        let cap = config.process_cap;
        let workers = if config.workers == 0 {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            config.workers
        };

        let slots: Box<[Process<M>]> = (0..cap as u32).map(Process::new).collect();
        let proc_pool = MpmcQueue::with_capacity(cap);
        for id in 0..cap as u32 {
            proc_pool
                .push(id)
                .expect("free pool is sized for every slot");
        }

        let core = Arc::new(SchedulerCore {
            id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
            slots,
            proc_pool,
            run_queue: MpmcQueue::with_capacity(cap),
            proc_count: AtomicU32::new(0),
            process_cap: cap as u32,
            stopped: AtomicBool::new(false),
            handles: Mutex::new(Vec::with_capacity(workers)),
        });

        {
            let mut handles = core.handles.lock();
            for i in 0..workers {
                let core = Arc::clone(&core);
                let handle = thread::Builder::new()
                    .name(format!("krill-worker-{i}"))
                    .spawn(move || worker_loop(core))
                    .expect("failed to spawn worker thread");
                handles.push(handle);
            }
        }

        debug!(
            "scheduler {} started: {} slots, {} workers",
            core.id, cap, workers
        );
        Ok(Scheduler { core })
    }

    /// Spawn a root actor (no parent).
    ///
    /// Returns `None` when the runtime is at its process cap; the rejected
    /// handler is dropped, releasing whatever state it captured.
    pub fn spawn<F>(&self, handler: F, opts: SpawnOptions) -> Option<Pid>
    where
        F: FnMut(&Context<M>, Option<M>) -> ProcessControl + Send + 'static,
    {
        self.core.spawn_process(None, Box::new(handler), opts)
    }

    /// Send `msg` to the actor addressed by `to`. See [`SendResult`] for
    /// the outcomes; no variant ever blocks.
    pub fn send(&self, to: Pid, msg: M, action: MessageAction) -> SendResult<M> {
        self.core.send(to, msg, action)
    }

    /// Number of currently live actors.
    pub fn process_count(&self) -> u32 {
        self.core.proc_count.load(Ordering::SeqCst)
    }

    /// Stop the runtime: flip the run flag, join every worker, then
    /// release every actor still alive (dropping its state and pending
    /// messages exactly once). Idempotent; also invoked by `Drop`.
    ///
    /// Must not be called from inside a handler: it joins the worker the
    /// handler is running on.
    pub fn shutdown(&self) {
        if self
            .core
            .stopped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let handles: Vec<_> = self.core.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }

        // With the workers gone, every live actor is parked in the run
        // queue; retire each one.
        while let Some(idx) = self.core.run_queue.pop() {
            self.core.release_process(&self.core.slots[idx as usize]);
        }
        debug!("scheduler {} stopped", self.core.id);
    }
}

impl<M: Send + 'static> Drop for Scheduler<M> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<M: Send + 'static> fmt::Debug for Scheduler<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("id", &self.core.id)
            .field("process_cap", &self.core.process_cap)
            .field("process_count", &self.core.proc_count.load(Ordering::SeqCst))
            .field("stopped", &self.core.stopped.load(Ordering::SeqCst))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Handle to the actor currently being run, passed by the worker into
/// every handler invocation.
///
/// This is how an actor reaches the runtime: its own address, its parent's,
/// spawning children, sending, and opportunistically draining its mailbox.
pub struct Context<M: Send + 'static> {
    core: Arc<SchedulerCore<M>>,
    pid: Pid,
    parent: Option<Pid>,
}

impl<M: Send + 'static> Context<M> {
    /// The current actor's own PID.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The PID of the actor that spawned this one, captured at spawn time.
    /// `None` for root actors. The link is non-owning: the parent may
    /// already be gone, in which case sends to it report that.
    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    /// Spawn a child actor; the child's parent link is set to this actor.
    /// Same contract as [`Scheduler::spawn`].
    pub fn spawn<F>(&self, handler: F, opts: SpawnOptions) -> Option<Pid>
    where
        F: FnMut(&Context<M>, Option<M>) -> ProcessControl + Send + 'static,
    {
        self.core
            .spawn_process(Some(self.pid), Box::new(handler), opts)
    }

    /// Same contract as [`Scheduler::send`].
    pub fn send(&self, to: Pid, msg: M, action: MessageAction) -> SendResult<M> {
        self.core.send(to, msg, action)
    }

    /// Pop one message from the current actor's mailbox without waiting.
    ///
    /// Lets a `Continue`-style handler drain its mailbox eagerly instead
    /// of waking once per message.
    pub fn receive(&self) -> Option<M> {
        let slot = &self.core.slots[self.pid.slot as usize];
        // Safety: a handler for this actor is on the stack, so the slot is
        // owned by the calling worker and its mailbox cannot be replaced
        // out from under us.
        unsafe { slot.mailbox() }.and_then(|mb| mb.pop())
    }
}

// ---------------------------------------------------------------------------
// Core protocols: spawn, send, release
// ---------------------------------------------------------------------------

impl<M: Send + 'static> SchedulerCore<M> {
    fn spawn_process(
        &self,
        parent: Option<Pid>,
        handler: Handler<M>,
        opts: SpawnOptions,
    ) -> Option<Pid> {
        // Reserve headcount first; the pool itself may lag a concurrent
        // termination (see module docs).
        let reserved = self.proc_count.fetch_add(1, Ordering::SeqCst);
        if reserved >= self.process_cap {
            self.proc_count.fetch_sub(1, Ordering::SeqCst);
            // Dropping `handler` here releases its captured state.
            return None;
        }

        let idx = loop {
            match self.proc_pool.pop() {
                Some(idx) => break idx,
                None => thread::yield_now(),
            }
        };

        let slot = &self.slots[idx as usize];
        let budget = opts
            .max_messages_per_cycle
            .min(u32::try_from(opts.mailbox_cap).unwrap_or(u32::MAX))
            .max(1);

        let pid;
        {
            let _held = slot.lock.lock();
            pid = Pid {
                queue: self.id,
                slot: idx,
                gen: slot.gen.load(Ordering::Acquire),
            };
            // Safety: the slot came off the free pool, so no worker owns
            // it, and we hold the release lock against senders probing the
            // old generation.
            unsafe {
                slot.install(
                    Mailbox::with_capacity(opts.mailbox_cap),
                    ProcessBody {
                        handler,
                        parent,
                        run_state: RunState::Running,
                        budget,
                    },
                );
            }
        }

        while self.run_queue.push(idx).is_err() {
            // Sized to the slot count; fullness is transient.
            thread::yield_now();
        }
        Some(pid)
    }

    fn send(&self, to: Pid, msg: M, action: MessageAction) -> SendResult<M> {
        if to.queue != self.id || to.slot as usize >= self.slots.len() {
            return SendResult::Dead(msg);
        }
        let slot = &self.slots[to.slot as usize];

        // A held release lock means the destination is being torn down (or
        // installed); back off rather than stall on a dying actor. The
        // guard returns the lock on every path out of this function.
        let _held = match slot.lock.try_lock() {
            Some(guard) => guard,
            None => return reject(action, msg),
        };

        if slot.gen.load(Ordering::Acquire) != to.gen {
            return SendResult::Dead(msg);
        }

        // Safety: the mailbox cell is only replaced under the release
        // lock, which we hold.
        match unsafe { slot.mailbox() } {
            Some(mb) => match mb.push(msg) {
                Ok(()) => SendResult::Sent,
                Err(msg) => reject(action, msg),
            },
            // Matching generation on a never-spawned slot: nothing there.
            None => SendResult::Dead(msg),
        }
    }

    /// Retire an actor: invalidate its PIDs, drop its state and mailbox,
    /// return the slot to the free pool.
    ///
    /// The caller must own the slot (have dequeued it, or hold it after
    /// the workers are joined). The generation bump happens before the
    /// slot becomes visible in the pool, so a sender still holding the old
    /// PID can never reach the next tenant; the count decrement happens
    /// outside the lock, which is why spawners tolerate a briefly empty
    /// pool.
    fn release_process(&self, slot: &Process<M>) {
        {
            let _held = slot.lock.lock();
            slot.gen.fetch_add(1, Ordering::Release);
            // Safety: owner + release lock held.
            unsafe { slot.clear() };
            while self.proc_pool.push(slot.id).is_err() {
                thread::yield_now();
            }
        }
        self.proc_count.fetch_sub(1, Ordering::SeqCst);
    }
}

fn reject<M>(action: MessageAction, msg: M) -> SendResult<M> {
    match action {
        MessageAction::Keep => SendResult::Fail(Some(msg)),
        MessageAction::Remove => {
            drop(msg);
            SendResult::Fail(None)
        }
    }
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

fn worker_loop<M: Send + 'static>(core: Arc<SchedulerCore<M>>) {
    while !core.stopped.load(Ordering::SeqCst) {
        let Some(idx) = core.run_queue.pop() else {
            thread::yield_now();
            continue;
        };
        let slot = &core.slots[idx as usize];

        // Safety: popping the run queue entry makes this worker the slot's
        // owner until it is re-enqueued or released.
        let body = unsafe { slot.body_mut() }
            .as_mut()
            .expect("runnable slot has no installed body");

        let ctx = Context {
            core: Arc::clone(&core),
            pid: Pid {
                queue: core.id,
                slot: idx,
                gen: slot.gen.load(Ordering::Acquire),
            },
            parent: body.parent,
        };

        let mut stopped = false;
        let mut invoked = false;
        for _ in 0..body.budget {
            let msg = match body.run_state {
                RunState::Running => None,
                // Safety: this worker owns the slot for the duration of
                // the visit.
                RunState::Waiting => match unsafe { slot.mailbox() }.and_then(|mb| mb.pop()) {
                    Some(msg) => Some(msg),
                    // Nothing to deliver; the actor stays Waiting and the
                    // visit ends.
                    None => break,
                },
            };

            invoked = true;
            match invoke_handler(&mut body.handler, &ctx, msg) {
                ProcessControl::Continue => body.run_state = RunState::Running,
                ProcessControl::WaitMessage => body.run_state = RunState::Waiting,
                ProcessControl::Stop => {
                    stopped = true;
                    break;
                }
            }
        }

        if stopped {
            core.release_process(slot);
        } else {
            while core.run_queue.push(idx).is_err() {
                thread::yield_now();
            }
            if !invoked {
                // The visit delivered nothing (Waiting actor, empty
                // mailbox); give other threads room before the next pop.
                thread::yield_now();
            }
        }
    }
}

/// Run one handler invocation, translating a panic into `Stop` so a
/// misbehaving actor retires itself instead of unwinding through the
/// worker.
fn invoke_handler<M: Send + 'static>(
    handler: &mut Handler<M>,
    ctx: &Context<M>,
    msg: Option<M>,
) -> ProcessControl {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(ctx, msg))) {
        Ok(control) => control,
        Err(_) => {
            error!("actor {} panicked in its handler; stopping it", ctx.pid());
            ProcessControl::Stop
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
    use std::sync::mpsc::channel;
    use std::time::{Duration, Instant};

    /// Poll `cond` for up to `timeout`, sleeping between probes.
    fn eventually_for(timeout: Duration, cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    fn eventually(cond: impl Fn() -> bool) -> bool {
        eventually_for(Duration::from_secs(10), cond)
    }

    /// Message type whose drops are counted; used to pin down exactly when
    /// the runtime releases undelivered payloads.
    struct Tracked(Arc<AtomicUsize>);
    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, SeqCst);
        }
    }

    #[test]
    fn test_config_rejects_zero_cap() {
        let err = Scheduler::<u32>::new(SchedulerConfig::new(0, 1)).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn test_spawn_and_stop() {
        let sched = Scheduler::<u32>::new(SchedulerConfig::new(16, 2)).unwrap();
        let pid = sched
            .spawn(|_, _| ProcessControl::Stop, SpawnOptions::default())
            .unwrap();
        assert_eq!(pid.queue, sched.core.id);
        assert!(eventually(|| sched.process_count() == 0));
        sched.shutdown();
    }

    #[test]
    fn test_ping_pong() {
        let _ = env_logger::builder().is_test(true).try_init();

        #[derive(Debug)]
        enum Ball {
            Ping(Pid),
            Pong(Pid),
        }

        let sched = Scheduler::<Ball>::new(SchedulerConfig::new(16, 2)).unwrap();
        let (tx, rx) = channel();

        let a = sched
            .spawn(
                |ctx, msg| match msg {
                    None => ProcessControl::WaitMessage,
                    Some(Ball::Ping(from)) => {
                        let _ = ctx.send(from, Ball::Pong(ctx.pid()), MessageAction::Remove);
                        ProcessControl::Stop
                    }
                    Some(Ball::Pong(_)) => ProcessControl::Stop,
                },
                SpawnOptions::default(),
            )
            .unwrap();

        let mut served = false;
        sched
            .spawn(
                move |ctx, msg| {
                    if let Some(Ball::Pong(who)) = msg {
                        tx.send(who).unwrap();
                        return ProcessControl::Stop;
                    }
                    if !served {
                        served = true;
                        let _ = ctx.send(a, Ball::Ping(ctx.pid()), MessageAction::Remove);
                    }
                    ProcessControl::WaitMessage
                },
                SpawnOptions::default(),
            )
            .unwrap();

        let who = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(who, a);
        assert!(eventually(|| sched.process_count() == 0));
        sched.shutdown();
    }

    #[test]
    fn test_fanout() {
        let sched = Scheduler::<()>::new(SchedulerConfig::new(16 * 1024, 4)).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::new(AtomicUsize::new(0));

        let done_in_root = Arc::clone(&done);
        let accepted_in_root = Arc::clone(&accepted);
        sched
            .spawn(
                move |ctx, _| {
                    for _ in 0..10_000 {
                        let done = Arc::clone(&done_in_root);
                        let pid = ctx.spawn(
                            move |_, _| {
                                done.fetch_add(1, SeqCst);
                                ProcessControl::Stop
                            },
                            SpawnOptions {
                                mailbox_cap: 2,
                                max_messages_per_cycle: 1,
                            },
                        );
                        if pid.is_some() {
                            accepted_in_root.fetch_add(1, SeqCst);
                        }
                    }
                    ProcessControl::Stop
                },
                SpawnOptions::default(),
            )
            .unwrap();

        assert!(eventually(|| done.load(SeqCst) == 10_000
            && sched.process_count() == 0));
        assert_eq!(accepted.load(SeqCst), 10_000);
        sched.shutdown();
    }

    #[test]
    #[ignore = "driver-scale load; run explicitly"]
    fn test_fanout_million() {
        let sched = Scheduler::<()>::new(SchedulerConfig::new(1 << 20, 4)).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        let done_in_root = Arc::clone(&done);
        sched
            .spawn(
                move |ctx, _| {
                    for _ in 0..1_000_000 {
                        let done = Arc::clone(&done_in_root);
                        let _ = ctx.spawn(
                            move |_, _| {
                                done.fetch_add(1, SeqCst);
                                ProcessControl::Stop
                            },
                            SpawnOptions {
                                mailbox_cap: 2,
                                max_messages_per_cycle: 1,
                            },
                        );
                    }
                    ProcessControl::Stop
                },
                SpawnOptions::default(),
            )
            .unwrap();

        assert!(eventually_for(Duration::from_secs(300), || {
            done.load(SeqCst) == 1_000_000 && sched.process_count() == 0
        }));
        sched.shutdown();
    }

    #[test]
    fn test_mailbox_overflow_keep() {
        let drops = Arc::new(AtomicUsize::new(0));
        let sched = Scheduler::<Tracked>::new(SchedulerConfig::new(16, 1)).unwrap();

        // Never waits, never receives: its mailbox fills and stays full.
        let pid = sched
            .spawn(
                |_, _| ProcessControl::Continue,
                SpawnOptions {
                    mailbox_cap: 4,
                    max_messages_per_cycle: 1,
                },
            )
            .unwrap();

        for _ in 0..4 {
            let sent = sched.send(pid, Tracked(Arc::clone(&drops)), MessageAction::Keep);
            assert!(sent.is_sent());
        }
        let overflow = sched.send(pid, Tracked(Arc::clone(&drops)), MessageAction::Keep);
        let returned = match overflow {
            SendResult::Fail(Some(msg)) => msg,
            SendResult::Fail(None) => panic!("payload was discarded despite Keep"),
            SendResult::Sent => panic!("overflow send unexpectedly succeeded"),
            SendResult::Dead(_) => panic!("destination unexpectedly dead"),
        };
        // The rejected message is still alive in our hands.
        assert_eq!(drops.load(SeqCst), 0);
        drop(returned);
        assert_eq!(drops.load(SeqCst), 1);

        sched.shutdown();
        // The four queued messages are released exactly once at teardown.
        assert_eq!(drops.load(SeqCst), 5);
    }

    #[test]
    fn test_mailbox_overflow_remove() {
        let drops = Arc::new(AtomicUsize::new(0));
        let sched = Scheduler::<Tracked>::new(SchedulerConfig::new(16, 1)).unwrap();

        let pid = sched
            .spawn(
                |_, _| ProcessControl::Continue,
                SpawnOptions {
                    mailbox_cap: 4,
                    max_messages_per_cycle: 1,
                },
            )
            .unwrap();

        for _ in 0..4 {
            let sent = sched.send(pid, Tracked(Arc::clone(&drops)), MessageAction::Remove);
            assert!(sent.is_sent());
        }
        let overflow = sched.send(pid, Tracked(Arc::clone(&drops)), MessageAction::Remove);
        assert!(matches!(overflow, SendResult::Fail(None)));
        // Exactly the rejected message was dropped, nothing else.
        assert_eq!(drops.load(SeqCst), 1);

        sched.shutdown();
        assert_eq!(drops.load(SeqCst), 5);
    }

    #[test]
    fn test_generation_recycle() {
        let sched = Scheduler::<u32>::new(SchedulerConfig::new(1, 1)).unwrap();

        let pid_a = sched
            .spawn(|_, _| ProcessControl::Stop, SpawnOptions::default())
            .unwrap();
        assert!(eventually(|| sched.process_count() == 0));

        // The single slot is recycled under a fresh generation.
        let pid_b = sched
            .spawn(|_, _| ProcessControl::WaitMessage, SpawnOptions::default())
            .unwrap();
        assert_eq!(pid_a.slot, pid_b.slot);
        assert_ne!(pid_a, pid_b);

        // The old address is dead for good; the new tenant is reachable.
        assert_eq!(
            sched.send(pid_a, 7, MessageAction::Keep),
            SendResult::Dead(7)
        );
        assert!(sched.send(pid_b, 8, MessageAction::Keep).is_sent());
        sched.shutdown();
    }

    #[test]
    fn test_shutdown_drains_state_and_messages() {
        let state_drops = Arc::new(AtomicUsize::new(0));
        let msg_drops = Arc::new(AtomicUsize::new(0));
        let sched = Scheduler::<Tracked>::new(SchedulerConfig::new(32, 2)).unwrap();

        let n = 8;
        let mut first = None;
        for _ in 0..n {
            let state = Tracked(Arc::clone(&state_drops));
            let pid = sched
                .spawn(
                    move |_, _| {
                        let _alive = &state;
                        ProcessControl::Continue
                    },
                    SpawnOptions::default(),
                )
                .unwrap();
            first.get_or_insert(pid);
        }

        // Park some undelivered messages in the first actor's mailbox; its
        // handler never receives, so they are still queued at shutdown.
        for _ in 0..3 {
            let sent = sched.send(
                first.unwrap(),
                Tracked(Arc::clone(&msg_drops)),
                MessageAction::Keep,
            );
            assert!(sent.is_sent());
        }

        assert_eq!(sched.process_count(), n);
        sched.shutdown();

        assert_eq!(sched.process_count(), 0);
        assert_eq!(state_drops.load(SeqCst), n as usize);
        assert_eq!(msg_drops.load(SeqCst), 3);
    }

    #[test]
    fn test_spawn_rejected_at_cap() {
        let drops = Arc::new(AtomicUsize::new(0));
        let sched = Scheduler::<u32>::new(SchedulerConfig::new(2, 1)).unwrap();

        for _ in 0..2 {
            sched
                .spawn(|_, _| ProcessControl::Continue, SpawnOptions::default())
                .unwrap();
        }
        assert_eq!(sched.process_count(), 2);

        let state = Tracked(Arc::clone(&drops));
        let rejected = sched.spawn(
            move |_, _| {
                let _alive = &state;
                ProcessControl::Continue
            },
            SpawnOptions::default(),
        );
        assert!(rejected.is_none());
        // The cap is undisturbed and the rejected state was released
        // exactly once.
        assert_eq!(sched.process_count(), 2);
        assert_eq!(drops.load(SeqCst), 1);
        sched.shutdown();
    }

    #[test]
    fn test_parent_links() {
        let sched = Scheduler::<()>::new(SchedulerConfig::new(16, 2)).unwrap();
        let (tx, rx) = channel();

        let root_tx = tx.clone();
        let root = sched
            .spawn(
                move |ctx, _| {
                    let child_tx = root_tx.clone();
                    ctx.spawn(
                        move |child_ctx, _| {
                            child_tx.send(("child", child_ctx.parent())).unwrap();
                            ProcessControl::Stop
                        },
                        SpawnOptions::default(),
                    );
                    root_tx.send(("root", ctx.parent())).unwrap();
                    ProcessControl::Stop
                },
                SpawnOptions::default(),
            )
            .unwrap();

        let mut seen = std::collections::HashMap::new();
        for _ in 0..2 {
            let (who, parent) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
            seen.insert(who, parent);
        }
        assert_eq!(seen["root"], None);
        assert_eq!(seen["child"], Some(root));
        sched.shutdown();
    }

    #[test]
    fn test_self_pid_matches_spawn() {
        let sched = Scheduler::<()>::new(SchedulerConfig::new(16, 2)).unwrap();
        let (tx, rx) = channel();
        let pid = sched
            .spawn(
                move |ctx, _| {
                    tx.send(ctx.pid()).unwrap();
                    ProcessControl::Stop
                },
                SpawnOptions::default(),
            )
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), pid);
        sched.shutdown();
    }

    #[test]
    fn test_receive_preserves_send_order() {
        let sched = Scheduler::<u32>::new(SchedulerConfig::new(16, 2)).unwrap();
        let (tx, rx) = channel();

        let mut got = Vec::new();
        let pid = sched
            .spawn(
                move |ctx, _| {
                    // Drain eagerly instead of waking once per message.
                    while let Some(v) = ctx.receive() {
                        if v == 0 {
                            tx.send(std::mem::take(&mut got)).unwrap();
                            return ProcessControl::Stop;
                        }
                        got.push(v);
                    }
                    ProcessControl::Continue
                },
                SpawnOptions::default(),
            )
            .unwrap();

        for v in [1u32, 2, 3, 0] {
            assert!(sched.send(pid, v, MessageAction::Keep).is_sent());
        }
        // One sender's messages arrive in send order.
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(10)).unwrap(),
            vec![1, 2, 3]
        );
        assert!(eventually(|| sched.process_count() == 0));
        sched.shutdown();
    }

    #[test]
    fn test_foreign_pid_rejected() {
        let sched_a = Scheduler::<u32>::new(SchedulerConfig::new(4, 1)).unwrap();
        let sched_b = Scheduler::<u32>::new(SchedulerConfig::new(4, 1)).unwrap();

        let pid = sched_a
            .spawn(|_, _| ProcessControl::WaitMessage, SpawnOptions::default())
            .unwrap();
        // A PID only means something to the runtime that issued it.
        assert_eq!(
            sched_b.send(pid, 1, MessageAction::Keep),
            SendResult::Dead(1)
        );
        assert!(sched_a.send(pid, 1, MessageAction::Keep).is_sent());
        sched_a.shutdown();
        sched_b.shutdown();
    }

    #[test]
    fn test_panicking_handler_is_retired() {
        let _ = env_logger::builder().is_test(true).try_init();
        let sched = Scheduler::<()>::new(SchedulerConfig::new(4, 1)).unwrap();
        let pid = sched
            .spawn(
                |_, _| -> ProcessControl { panic!("boom") },
                SpawnOptions::default(),
            )
            .unwrap();
        // The panic retires the actor; its slot is recycled like any Stop.
        assert!(eventually(|| sched.process_count() == 0));
        assert!(eventually(|| !sched
            .send(pid, (), MessageAction::Keep)
            .is_sent()));
        sched.shutdown();
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let sched = Scheduler::<()>::new(SchedulerConfig::new(4, 2)).unwrap();
        sched.shutdown();
        sched.shutdown();
        assert_eq!(sched.process_count(), 0);
    }
}
