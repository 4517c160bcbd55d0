//! Time budgets for slow stages.
//!
//! A bounded call runs on a helper thread and the caller waits on a
//! crossbeam channel with a timeout. When the budget runs out the caller
//! moves on; the helper finishes in the background and its result is
//! dropped. [`InFlight`] caps how many such helpers a stage may have
//! alive at once, timed-out ones included.

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of [`run_bounded`].
#[derive(Debug)]
pub enum Bounded<T> {
    Done(T),
    TimedOut,
    /// The helper could not be spawned or panicked.
    Failed(String),
}

/// Work started on a helper thread, not yet waited on.
#[derive(Debug)]
pub struct Pending<T> {
    name: String,
    rx: Option<Receiver<T>>,
    started: Instant,
    spawn_error: Option<String>,
}

impl<T> Pending<T> {
    /// Wait until `budget` has elapsed since the work was spawned.
    pub fn wait(self, budget: Duration) -> Bounded<T> {
        if let Some(err) = self.spawn_error {
            return Bounded::Failed(err);
        }
        let Some(rx) = self.rx else {
            return Bounded::TimedOut;
        };

        let left = budget.saturating_sub(self.started.elapsed());
        let received = if left.is_zero() {
            rx.try_recv().map_err(|err| match err {
                TryRecvError::Empty => RecvTimeoutError::Timeout,
                TryRecvError::Disconnected => RecvTimeoutError::Disconnected,
            })
        } else {
            rx.recv_timeout(left)
        };

        match received {
            Ok(value) => Bounded::Done(value),
            Err(RecvTimeoutError::Timeout) => Bounded::TimedOut,
            Err(RecvTimeoutError::Disconnected) => {
                Bounded::Failed(format!("{} panicked", self.name))
            }
        }
    }
}

/// Start `work` on a named helper thread without waiting for it.
pub fn spawn_bounded<T, F>(name: &str, work: F) -> Pending<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = bounded::<T>(1);
    let started = Instant::now();
    let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
        // The receiver is gone if the caller already timed out.
        let _ = tx.send(work());
    });

    match spawned {
        Ok(_) => Pending {
            name: name.to_string(),
            rx: Some(rx),
            started,
            spawn_error: None,
        },
        Err(err) => Pending {
            name: name.to_string(),
            rx: None,
            started,
            spawn_error: Some(format!("failed to spawn {name}: {err}")),
        },
    }
}

/// Run `work` on a named helper thread and wait at most `budget` for it.
pub fn run_bounded<T, F>(name: &str, budget: Duration, work: F) -> Bounded<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    if budget.is_zero() {
        return Bounded::TimedOut;
    }
    spawn_bounded(name, work).wait(budget)
}

/// Counts helper calls that have not returned yet, up to a fixed limit.
#[derive(Debug, Clone)]
pub struct InFlight {
    max: usize,
    count: Arc<AtomicUsize>,
}

/// Releases an [`InFlight`] slot on drop.
#[derive(Debug)]
pub struct Permit(Arc<AtomicUsize>);

impl Drop for Permit {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl InFlight {
    /// A limiter allowing `max` concurrent holders (at least one).
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            count: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub const fn max(&self) -> usize {
        self.max
    }

    #[must_use]
    pub fn current(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// A slot, or `None` when all `max` are taken.
    #[must_use]
    pub fn try_acquire(&self) -> Option<Permit> {
        let max = self.max;
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()
            .map(|_| Permit(Arc::clone(&self.count)))
    }
}

/// Time left before `deadline`, or `None` when there is no deadline.
#[must_use]
pub fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|at| at.saturating_duration_since(Instant::now()))
}

#[must_use]
pub fn expired(deadline: Option<Instant>) -> bool {
    remaining(deadline).is_some_and(|left| left.is_zero())
}

/// `budget`, shortened to whatever time the deadline still allows.
#[must_use]
pub fn clamp(budget: Duration, deadline: Option<Instant>) -> Duration {
    remaining(deadline).map_or(budget, |left| left.min(budget))
}
