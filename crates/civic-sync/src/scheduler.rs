//! # Scheduler
//!
//! One-shot and repeating timers behind a trait, so the connection manager
//! never touches the clock directly.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Scheduler                                                              │
//! │    after(delay, f)     → TimerHandle   reconnect timer                  │
//! │    every(interval, f)  → TimerHandle   heartbeat                        │
//! │    cancel(handle)                      disconnect(), Open → Closed      │
//! │                                                                         │
//! │  TokioScheduler   one spawned task per timer, abort() on cancel         │
//! │  ManualScheduler  virtual clock, callbacks fire inside advance()        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callbacks must not block. Anything async they trigger should be spawned.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::trace;

/// Identifies a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Returns the numeric id.
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// One-shot callback.
pub type OnceTask = Box<dyn FnOnce() + Send + 'static>;

/// Repeating callback.
pub type RepeatTask = Arc<dyn Fn() + Send + Sync + 'static>;

/// Timer source used by the connection manager.
pub trait Scheduler: Send + Sync {
    /// Runs `task` once after `delay`.
    fn after(&self, delay: Duration, task: OnceTask) -> TimerHandle;

    /// Runs `task` every `interval`, first after one full interval.
    fn every(&self, interval: Duration, task: RepeatTask) -> TimerHandle;

    /// Cancels a timer. Unknown or already-fired handles are ignored.
    ///
    /// Once `cancel` returns the callback will not start.
    fn cancel(&self, handle: TimerHandle);
}

// =============================================================================
// Tokio Scheduler
// =============================================================================

/// Real-time scheduler backed by tokio tasks.
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct TokioScheduler {
    next_id: Arc<AtomicU64>,
    tasks: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timers that have not fired or been cancelled.
    pub fn pending_count(&self) -> usize {
        self.tasks.lock().len()
    }

    fn next_handle(&self) -> TimerHandle {
        TimerHandle(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

impl Scheduler for TokioScheduler {
    fn after(&self, delay: Duration, task: OnceTask) -> TimerHandle {
        let handle = self.next_handle();
        let tasks = self.tasks.clone();
        let id = handle.0;

        // Hold the lock across spawn so the task can't remove itself first.
        let mut guard = self.tasks.lock();
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Cancelled between wake-up and here: the entry is gone.
            if tasks.lock().remove(&id).is_some() {
                task();
            }
        });
        guard.insert(id, join.abort_handle());
        trace!(timer = id, ?delay, "One-shot timer scheduled");
        handle
    }

    fn every(&self, interval: Duration, task: RepeatTask) -> TimerHandle {
        let handle = self.next_handle();
        let tasks = self.tasks.clone();
        let id = handle.0;

        let mut guard = self.tasks.lock();
        let join = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !tasks.lock().contains_key(&id) {
                    break;
                }
                task();
            }
        });
        guard.insert(id, join.abort_handle());
        trace!(timer = id, ?interval, "Repeating timer scheduled");
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some(abort) = self.tasks.lock().remove(&handle.0) {
            abort.abort();
            trace!(timer = handle.0, "Timer cancelled");
        }
    }
}

// =============================================================================
// Manual Scheduler
// =============================================================================

enum ManualTask {
    Once(OnceTask),
    Repeat { interval: Duration, task: RepeatTask },
}

struct ManualTimer {
    id: u64,
    due: Duration,
    task: ManualTask,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    timers: Vec<ManualTimer>,
}

/// Virtual-time scheduler for tests.
///
/// Nothing fires until [`ManualScheduler::advance`] moves the clock.
/// Timers fire in due order (ties in creation order), and callbacks run
/// without the internal lock held, so they may schedule or cancel timers.
///
/// ```rust
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
/// use civic_sync::scheduler::{ManualScheduler, Scheduler};
///
/// let scheduler = ManualScheduler::new();
/// let fired = Arc::new(AtomicUsize::new(0));
/// let counter = fired.clone();
/// scheduler.after(Duration::from_secs(2), Box::new(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// }));
///
/// scheduler.advance(Duration::from_secs(1));
/// assert_eq!(fired.load(Ordering::SeqCst), 0);
/// scheduler.advance(Duration::from_secs(1));
/// assert_eq!(fired.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManualScheduler")
            .field("now", &state.now)
            .field("pending", &state.timers.len())
            .finish()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time since creation.
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Number of timers still scheduled.
    pub fn pending_count(&self) -> usize {
        self.state.lock().timers.len()
    }

    /// Virtual time at which the next timer is due.
    pub fn next_due(&self) -> Option<Duration> {
        self.state.lock().timers.iter().map(|t| t.due).min()
    }

    /// Moves the clock forward by `by`, firing every timer that falls due.
    ///
    /// Returns the number of callbacks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.state.lock().now + by;
        let mut fired = 0;

        loop {
            let next = {
                let mut state = self.state.lock();
                let position = state
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.id))
                    .map(|(i, _)| i);

                match position {
                    None => None,
                    Some(i) => {
                        let timer = state.timers.remove(i);
                        state.now = timer.due;
                        match timer.task {
                            ManualTask::Once(task) => Some(Fired::Once(task)),
                            ManualTask::Repeat { interval, task } => {
                                state.timers.push(ManualTimer {
                                    id: timer.id,
                                    due: timer.due + interval,
                                    task: ManualTask::Repeat {
                                        interval,
                                        task: task.clone(),
                                    },
                                });
                                Some(Fired::Repeat(task))
                            }
                        }
                    }
                }
            };

            match next {
                None => break,
                Some(Fired::Once(task)) => task(),
                Some(Fired::Repeat(task)) => task(),
            }
            fired += 1;
        }

        self.state.lock().now = target;
        fired
    }

    fn insert(&self, delay: Duration, task: ManualTask) -> TimerHandle {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        let due = state.now + delay;
        state.timers.push(ManualTimer { id, due, task });
        TimerHandle(id)
    }
}

enum Fired {
    Once(OnceTask),
    Repeat(RepeatTask),
}

impl Scheduler for ManualScheduler {
    fn after(&self, delay: Duration, task: OnceTask) -> TimerHandle {
        self.insert(delay, ManualTask::Once(task))
    }

    fn every(&self, interval: Duration, task: RepeatTask) -> TimerHandle {
        // A zero interval would spin forever inside advance().
        let interval = interval.max(Duration::from_millis(1));
        self.insert(interval, ManualTask::Repeat { interval, task })
    }

    fn cancel(&self, handle: TimerHandle) {
        self.state.lock().timers.retain(|t| t.id != handle.0);
    }
}
