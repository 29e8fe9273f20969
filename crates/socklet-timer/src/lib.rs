//! Timer source for Socklet sessions.
//!
//! Sessions need two kinds of timers: a one-shot *timeout* that reclaims a
//! session nobody is listening to, and a fixed-delay *heartbeat* that keeps
//! idle connections alive. Both come from a [`Scheduler`] that is handed to
//! the session registry at construction time instead of being reached for
//! globally, so tests can swap the real clock for a fake one.
//!
//! Two implementations are provided:
//!
//! - [`TokioScheduler`]: spawns a Tokio task per timer. Use it in servers.
//! - [`ManualScheduler`]: a fake clock that only moves when
//!   [`advance`](ManualScheduler::advance) is called. Use it in tests.
//!
//! # Cancellation
//!
//! Cancelling a [`TimerHandle`] guarantees the task will not *start* after
//! `cancel` returns. It cannot recall a task that is already running, so a
//! task must still re-check whatever precondition it depends on. Socklet
//! sessions do this by posting a command tagged with a generation number
//! and letting the session actor decide whether the fire is stale.
//!
//! ```ignore
//! let handle = scheduler.schedule(Duration::from_secs(5), Box::new(move || {
//!     let _ = commands.send(Command::TimeoutFired { generation });
//! }));
//! // later, on re-attach:
//! handle.cancel();
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{self, MissedTickBehavior};
use tracing::trace;

/// A task that runs once.
pub type OnceTask = Box<dyn FnOnce() + Send + 'static>;

/// A task that runs on every period of a repeating timer.
pub type RepeatingTask = Box<dyn FnMut() + Send + 'static>;

/// Shortest period a repeating timer accepts. Shorter periods are raised
/// to this value.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

// ---------------------------------------------------------------------------
// Scheduler trait
// ---------------------------------------------------------------------------

/// A source of cancellable timers.
///
/// Tasks must not block: they run on the scheduler's own context (a Tokio
/// worker, or the caller of [`ManualScheduler::advance`]). Posting a message
/// to a channel is the expected amount of work.
pub trait Scheduler: Send + Sync + 'static {
    /// Runs `task` once after `delay`, unless cancelled first.
    fn schedule(&self, delay: Duration, task: OnceTask) -> TimerHandle;

    /// Runs `task` every `period` (fixed delay, first run after one
    /// period) until cancelled.
    fn schedule_repeating(&self, period: Duration, task: RepeatingTask) -> TimerHandle;
}

// ---------------------------------------------------------------------------
// TimerHandle
// ---------------------------------------------------------------------------

/// Handle to a scheduled timer.
///
/// Dropping the handle does **not** cancel the timer; call
/// [`cancel`](Self::cancel) explicitly.
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    task: Option<tokio::task::AbortHandle>,
}

impl TimerHandle {
    fn new(cancelled: Arc<AtomicBool>, task: Option<tokio::task::AbortHandle>) -> Self {
        Self { cancelled, task }
    }

    /// Stops the timer. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// TokioScheduler
// ---------------------------------------------------------------------------

/// Scheduler backed by Tokio timers. One spawned task per timer.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    /// Creates a scheduler bound to the current Tokio runtime.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn new() -> Self {
        Self::with_handle(Handle::current())
    }

    /// Creates a scheduler that spawns its timers on `runtime`.
    pub fn with_handle(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: OnceTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let join = self.runtime.spawn(async move {
            time::sleep(delay).await;
            if !flag.load(Ordering::Acquire) {
                trace!(?delay, "timer fired");
                task();
            }
        });

        TimerHandle::new(cancelled, Some(join.abort_handle()))
    }

    fn schedule_repeating(&self, period: Duration, mut task: RepeatingTask) -> TimerHandle {
        let period = period.max(MIN_PERIOD);
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let join = self.runtime.spawn(async move {
            let Some(start) = time::Instant::now().checked_add(period) else {
                // Beyond the clock's range: never due.
                return;
            };
            let mut interval = time::interval_at(start, period);
            // Fixed delay: a late fire pushes the following ones back.
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if flag.load(Ordering::Acquire) {
                    break;
                }
                trace!(?period, "repeating timer fired");
                task();
            }
        });

        TimerHandle::new(cancelled, Some(join.abort_handle()))
    }
}

// ---------------------------------------------------------------------------
// ManualScheduler
// ---------------------------------------------------------------------------

enum ManualTask {
    Once(OnceTask),
    Repeating { period: Duration, task: RepeatingTask },
}

struct ManualEntry {
    cancelled: Arc<AtomicBool>,
    task: ManualTask,
}

#[derive(Default)]
struct ManualClock {
    now: Duration,
    next_seq: u64,
    /// Keyed by (deadline, insertion order) so equal deadlines fire FIFO.
    entries: BTreeMap<(Duration, u64), ManualEntry>,
}

impl ManualClock {
    fn insert(&mut self, deadline: Duration, entry: ManualEntry) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert((deadline, seq), entry);
    }
}

/// A fake clock for deterministic tests.
///
/// Time starts at zero and only moves forward when
/// [`advance`](Self::advance) is called. Due tasks run synchronously on the
/// calling thread, in deadline order.
///
/// ```ignore
/// let scheduler = ManualScheduler::new();
/// scheduler.schedule(Duration::from_secs(5), Box::new(|| println!("fired")));
/// scheduler.advance(Duration::from_secs(4)); // nothing
/// scheduler.advance(Duration::from_secs(1)); // prints "fired"
/// ```
#[derive(Default)]
pub struct ManualScheduler {
    clock: Mutex<ManualClock>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed on the fake clock.
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Number of timers that are scheduled and not cancelled.
    pub fn pending(&self) -> usize {
        self.lock()
            .entries
            .values()
            .filter(|e| !e.cancelled.load(Ordering::Acquire))
            .count()
    }

    /// Moves the clock forward by `by`, running every task that falls due.
    ///
    /// Repeating timers fire once per elapsed period. Tasks may schedule or
    /// cancel other timers; a timer scheduled from a task fires during the
    /// same call if its deadline is within the advanced window.
    pub fn advance(&self, by: Duration) {
        let target = self.lock().now.saturating_add(by);

        loop {
            // The lock is released before the task runs so tasks can
            // schedule new timers.
            let (deadline, entry) = {
                let mut clock = self.lock();
                let due = clock
                    .entries
                    .first_key_value()
                    .is_some_and(|(&(deadline, _), _)| deadline <= target);
                let popped = if due { clock.entries.pop_first() } else { None };
                let Some(((deadline, _), entry)) = popped else {
                    clock.now = target;
                    return;
                };
                clock.now = deadline;
                (deadline, entry)
            };

            if entry.cancelled.load(Ordering::Acquire) {
                continue;
            }

            match entry.task {
                ManualTask::Once(task) => task(),
                ManualTask::Repeating { period, mut task } => {
                    task();
                    if !entry.cancelled.load(Ordering::Acquire) {
                        self.lock().insert(
                            deadline.saturating_add(period),
                            ManualEntry {
                                cancelled: entry.cancelled,
                                task: ManualTask::Repeating { period, task },
                            },
                        );
                    }
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManualClock> {
        // A panicking task leaves the clock in a consistent state.
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, delay: Duration, task: ManualTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut clock = self.lock();
        let deadline = clock.now.saturating_add(delay);
        clock.insert(
            deadline,
            ManualEntry {
                cancelled: Arc::clone(&cancelled),
                task,
            },
        );
        TimerHandle::new(cancelled, None)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: OnceTask) -> TimerHandle {
        self.push(delay, ManualTask::Once(task))
    }

    fn schedule_repeating(&self, period: Duration, task: RepeatingTask) -> TimerHandle {
        let period = period.max(MIN_PERIOD);
        self.push(period, ManualTask::Repeating { period, task })
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("now", &self.now())
            .field("pending", &self.pending())
            .finish()
    }
}
