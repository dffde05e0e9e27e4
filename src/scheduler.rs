//! Single-slot delayed execution for retries.
//!
//! A [`DelayScheduler`] holds at most one pending task. Scheduling a new task supersedes the
//! pending one (last writer wins), so a stale retry can never fire after a newer decision.
//! [`DelayScheduler::cancel`] invalidates the pending task; once it returns, a cancelled task
//! either already ran to completion or will never run.
//!
//! Implementations:
//! - [`TokioScheduler`]: timers on an explicitly supplied tokio runtime handle.
//! - [`ManualScheduler`]: no timers at all; tests fire the pending task by hand.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Work run when a delay elapses.
pub type ScheduledTask = Box<dyn FnOnce() + Send + 'static>;

/// Schedules one deferred task at a time.
pub trait DelayScheduler: Send + Sync + fmt::Debug {
    /// Run `task` after `delay`, replacing any task still pending.
    fn schedule(&self, delay: Duration, task: ScheduledTask);

    /// Invalidate the pending task, if any. Idempotent. Returns `true` when a pending task was
    /// invalidated by this call.
    fn cancel(&self) -> bool;

    /// Whether a task is waiting for its delay to elapse.
    fn is_pending(&self) -> bool;

    /// A new scheduler on the same substrate that shares no pending state with this one.
    fn fresh(&self) -> Arc<dyn DelayScheduler>;
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct PendingTask {
    token: u64,
    delay: Duration,
    abort: AbortHandle,
}

#[derive(Debug, Default)]
struct SlotState {
    next_token: u64,
    pending: Option<PendingTask>,
    /// Threads currently inside a fired task.
    running: Vec<ThreadId>,
}

#[derive(Debug, Default)]
struct Slot {
    state: Mutex<SlotState>,
    settled: Condvar,
}

impl Slot {
    fn fire(&self, token: u64, task: ScheduledTask) {
        {
            let mut state = lock(&self.state);
            match &state.pending {
                Some(pending) if pending.token == token => {}
                // superseded or cancelled while waking up
                _ => return,
            }
            state.pending = None;
            state.running.push(thread::current().id());
        }
        let _running = RunningGuard { slot: self };
        task();
    }
}

/// Clears the running marker even if the task panics.
struct RunningGuard<'a> {
    slot: &'a Slot,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let me = thread::current().id();
        let mut state = lock(&self.slot.state);
        if let Some(idx) = state.running.iter().position(|id| *id == me) {
            state.running.swap_remove(idx);
        }
        drop(state);
        self.slot.settled.notify_all();
    }
}

/// Scheduler backed by tokio timers.
///
/// Tasks are spawned on the runtime handle given at construction; nothing is looked up from
/// ambient state. Clones share the same slot; use [`DelayScheduler::fresh`] for an independent
/// one.
///
/// `cancel` waits for a task that is already running on another thread, so scheduled tasks
/// must be short and must not block.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
    slot: Arc<Slot>,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle, slot: Arc::new(Slot::default()) }
    }

    /// Delay of the pending task, if any.
    pub fn pending_delay(&self) -> Option<Duration> {
        lock(&self.slot.state).pending.as_ref().map(|pending| pending.delay)
    }
}

impl DelayScheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) {
        let mut state = lock(&self.slot.state);
        if let Some(previous) = state.pending.take() {
            let superseded_ms = millis(previous.delay);
            tracing::debug!(delay_ms = superseded_ms, "superseding pending delay");
            previous.abort.abort();
        }
        state.next_token = state.next_token.wrapping_add(1);
        let token = state.next_token;
        let slot = Arc::clone(&self.slot);
        tracing::debug!(delay_ms = millis(delay), "delaying retry");
        // The spawned task cannot observe the slot before we release the lock below.
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            slot.fire(token, task);
        });
        state.pending = Some(PendingTask { token, delay, abort: join.abort_handle() });
    }

    fn cancel(&self) -> bool {
        let me = thread::current().id();
        let mut state = lock(&self.slot.state);
        let mut canceled = false;
        loop {
            if let Some(pending) = state.pending.take() {
                tracing::debug!("cancelling delay");
                pending.abort.abort();
                canceled = true;
            }
            if !state.running.iter().any(|id| *id != me) {
                return canceled;
            }
            state = self.slot.settled.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn is_pending(&self) -> bool {
        lock(&self.slot.state).pending.is_some()
    }

    fn fresh(&self) -> Arc<dyn DelayScheduler> {
        Arc::new(TokioScheduler::new(self.handle.clone()))
    }
}

#[derive(Default)]
struct ManualState {
    pending: Option<(Duration, ScheduledTask)>,
    history: Vec<Duration>,
    cancellations: usize,
}

impl fmt::Debug for ManualState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualState")
            .field("pending", &self.pending.as_ref().map(|(delay, _)| *delay))
            .field("history", &self.history)
            .field("cancellations", &self.cancellations)
            .finish()
    }
}

/// Test scheduler that never fires on its own.
///
/// The pending task runs only when [`ManualScheduler::fire`] is called, which makes every
/// interleaving of completion, delay and cancellation reproducible. Intended for
/// single-threaded tests; `cancel` does not wait for a task that is mid-`fire`.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the pending task now. Returns `false` if nothing was pending.
    pub fn fire(&self) -> bool {
        let task = lock(&self.state).pending.take();
        match task {
            Some((_, task)) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Delay of the pending task, if any.
    pub fn pending_delay(&self) -> Option<Duration> {
        lock(&self.state).pending.as_ref().map(|(delay, _)| *delay)
    }

    /// Every delay ever scheduled, in order.
    pub fn scheduled(&self) -> Vec<Duration> {
        lock(&self.state).history.clone()
    }

    /// Number of `cancel` calls that invalidated a pending task.
    pub fn cancellations(&self) -> usize {
        lock(&self.state).cancellations
    }
}

impl DelayScheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) {
        let mut state = lock(&self.state);
        state.history.push(delay);
        state.pending = Some((delay, task));
    }

    fn cancel(&self) -> bool {
        let mut state = lock(&self.state);
        let canceled = state.pending.take().is_some();
        if canceled {
            state.cancellations += 1;
        }
        canceled
    }

    fn is_pending(&self) -> bool {
        lock(&self.state).pending.is_some()
    }

    fn fresh(&self) -> Arc<dyn DelayScheduler> {
        Arc::new(ManualScheduler::new())
    }
}
