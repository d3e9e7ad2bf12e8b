//! Injectable timers for observers that defer work.
//!
//! The bus itself never waits. Observers that need "do this later unless
//! cancelled" behaviour take a [`Scheduler`]:
//!
//! - [`ManualScheduler`]: virtual time advanced explicitly, for tests and
//!   deterministic replays
//! - [`TokioScheduler`]: real time on a tokio runtime

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a scheduled task so it can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Schedules and cancels deferred tasks.
pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`, unless cancelled first.
    fn schedule(&self, delay: Duration, task: Task) -> TimerId;

    /// Cancel a pending task. Returns `false` if it already ran or was
    /// already cancelled.
    fn cancel(&self, timer: TimerId) -> bool;
}

struct PendingTask {
    id: TimerId,
    deadline: Duration,
    task: Task,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    pending: Vec<PendingTask>,
}

/// Scheduler driven by an explicit virtual clock.
///
/// Nothing fires until [`ManualScheduler::advance`] is called. Due tasks run
/// in deadline order (ties in scheduling order) with the clock set to their
/// deadline, and without the internal lock held, so a task may schedule or
/// cancel other timers.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current virtual time since creation.
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Number of tasks waiting to fire.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Move the clock forward by `by`, firing every task that falls due.
    /// Returns how many tasks ran.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.lock().now + by;
        let mut fired = 0;
        loop {
            let next = {
                let mut state = self.lock();
                let due = state
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.deadline <= target)
                    .min_by_key(|(_, p)| (p.deadline, p.id))
                    .map(|(idx, _)| idx);
                match due {
                    Some(idx) => {
                        let task = state.pending.remove(idx);
                        state.now = task.deadline;
                        Some(task)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };
            match next {
                Some(pending) => {
                    tracing::trace!(timer = %pending.id, "Firing manual timer");
                    (pending.task)();
                    fired += 1;
                }
                None => return fired,
            }
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerId {
        let mut state = self.lock();
        state.next_id += 1;
        let id = TimerId(state.next_id);
        let deadline = state.now + delay;
        state.pending.push(PendingTask { id, deadline, task });
        id
    }

    fn cancel(&self, timer: TimerId) -> bool {
        let mut state = self.lock();
        let before = state.pending.len();
        state.pending.retain(|p| p.id != timer);
        state.pending.len() != before
    }
}

/// Scheduler backed by `tokio::time::sleep` tasks.
pub struct TokioScheduler {
    handle: Handle,
    next_id: AtomicU64,
    timers: Arc<Mutex<HashMap<TimerId, AbortHandle>>>,
}

impl TokioScheduler {
    /// Use the runtime the caller is running on.
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current().context("TokioScheduler requires a tokio runtime")?;
        Ok(Self::with_handle(handle))
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle,
            next_id: AtomicU64::new(0),
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of timers that have neither fired nor been cancelled.
    pub fn pending(&self) -> usize {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let timers = Arc::clone(&self.timers);

        // Held across spawn so the task cannot look itself up before it is
        // registered.
        let mut registry = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let armed = timers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id)
                .is_some();
            if armed {
                task();
            }
        });
        registry.insert(id, join.abort_handle());
        id
    }

    fn cancel(&self, timer: TimerId) -> bool {
        let removed = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&timer);
        match removed {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}
