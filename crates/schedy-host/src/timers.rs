//! Timer services
//!
//! [`TokioTimers`] sleeps on the tokio runtime against the local wall clock.
//! [`ManualTimers`] keeps a virtual clock that only moves when advanced,
//! firing every callback that became due in instant order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration, Local, NaiveDateTime};
use dashmap::DashMap;
use parking_lot::Mutex;
use schedy_core::{TimerCallback, TimerHandle, TimerService};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Timers running as tokio tasks
pub struct TokioTimers {
    runtime: Handle,
    tasks: Arc<DashMap<u64, JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl TokioTimers {
    /// Create timers on the current runtime
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        Self::with_runtime(Handle::current())
    }

    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            runtime,
            tasks: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of timers that haven't fired or been cancelled
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }
}

impl TimerService for TokioTimers {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn run_at(&self, when: NaiveDateTime, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let delay = (when - self.now()).to_std().unwrap_or_default();
        trace!(timer = id, at = %when, "Arming timer");

        let tasks = Arc::clone(&self.tasks);
        let (registered_tx, registered) = oneshot::channel::<()>();
        let task = self.runtime.spawn(async move {
            // the task must not unregister itself before it was registered
            if registered.await.is_err() {
                return;
            }
            tokio::time::sleep(delay).await;
            if tasks.remove(&id).is_some() {
                callback();
            }
        });
        self.tasks.insert(id, task);
        let _ = registered_tx.send(());
        TimerHandle::new(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some((_, task)) = self.tasks.remove(&handle.id()) {
            trace!(timer = handle.id(), "Cancelling timer");
            task.abort();
        }
    }
}

struct ManualClock {
    now: NaiveDateTime,
    /// Due timers keyed by instant, then arming order
    queue: BTreeMap<(NaiveDateTime, u64), TimerCallback>,
    due: BTreeMap<u64, NaiveDateTime>,
}

/// Virtual clock for tests and simulations
pub struct ManualTimers {
    clock: Mutex<ManualClock>,
    next_id: AtomicU64,
}

impl ManualTimers {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            clock: Mutex::new(ManualClock {
                now: start,
                queue: BTreeMap::new(),
                due: BTreeMap::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Move the clock to `target`, firing due callbacks in instant order
    ///
    /// Callbacks run without the clock locked, so they may arm or cancel
    /// timers; timers they arm before `target` fire during this call too.
    /// Returns the number of callbacks fired.
    pub fn advance_to(&self, target: NaiveDateTime) -> usize {
        let mut fired = 0;
        loop {
            let callback = {
                let mut clock = self.clock.lock();
                let Some((&(when, id), _)) = clock.queue.first_key_value() else {
                    break;
                };
                if when > target {
                    break;
                }
                clock.due.remove(&id);
                if when > clock.now {
                    clock.now = when;
                }
                clock.queue.remove(&(when, id))
            };
            if let Some(callback) = callback {
                callback();
                fired += 1;
            }
        }

        let mut clock = self.clock.lock();
        if target > clock.now {
            clock.now = target;
        } else if target < clock.now {
            warn!(now = %clock.now, target = %target, "Not moving the clock backwards");
        }
        fired
    }

    pub fn advance_by(&self, delta: Duration) -> usize {
        let target = self.now() + delta;
        self.advance_to(target)
    }

    /// Fire callbacks already due without moving the clock
    pub fn run_due(&self) -> usize {
        self.advance_to(self.now())
    }

    /// Instant of the next pending timer
    pub fn next_due(&self) -> Option<NaiveDateTime> {
        self.clock.lock().queue.keys().next().map(|(when, _)| *when)
    }

    pub fn pending(&self) -> usize {
        self.clock.lock().queue.len()
    }
}

impl TimerService for ManualTimers {
    fn now(&self) -> NaiveDateTime {
        self.clock.lock().now
    }

    fn run_at(&self, when: NaiveDateTime, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut clock = self.clock.lock();
        let when = when.max(clock.now);
        clock.queue.insert((when, id), callback);
        clock.due.insert(id, when);
        trace!(timer = id, at = %when, "Arming timer");
        TimerHandle::new(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        let mut clock = self.clock.lock();
        if let Some(when) = clock.due.remove(&handle.id()) {
            clock.queue.remove(&(when, handle.id()));
            trace!(timer = handle.id(), "Cancelling timer");
        }
    }
}
