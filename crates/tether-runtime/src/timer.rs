#![forbid(unsafe_code)]

//! Clocks and one-shot timers.
//!
//! The dirty checker never touches wall-clock time directly; it schedules
//! through the [`Timer`] capability. Production code drives a [`TimerQueue`]
//! backed by [`SystemClock`]; tests swap in [`ManualClock`] and step time
//! explicitly.
//!
//! # Invariants
//!
//! 1. [`TimerQueue::run_due`] fires callbacks in `(deadline, id)` order.
//! 2. A cancelled timer never fires.
//! 3. Callbacks may schedule or cancel timers; a callback scheduled with a
//!    non-zero delay never fires in the same `run_due` pass.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use tether_core::BindingError;
use web_time::Instant;

/// Monotonic time source, measured from an arbitrary origin.
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Wall-clock time since construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    /// Jump to `at`. Time never moves backwards.
    pub fn set(&self, at: Duration) {
        if at > self.now.get() {
            self.now.set(at);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

/// Handle to a scheduled callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Timer callback. Errors are collected by the driver.
pub type TimerCallback = Box<dyn FnOnce() -> Result<(), BindingError>>;

/// One-shot scheduling capability.
pub trait Timer {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerId;

    /// Returns `true` if the timer was still pending.
    fn cancel(&self, id: TimerId) -> bool;
}

struct TimerEntry {
    id: TimerId,
    deadline: Duration,
    callback: TimerCallback,
}

/// Deadline-ordered set of pending one-shot callbacks.
pub struct TimerQueue {
    clock: Rc<dyn Clock>,
    entries: RefCell<Vec<TimerEntry>>,
    next_id: Cell<u64>,
}

impl TimerQueue {
    #[must_use]
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        }
    }

    #[must_use]
    pub fn clock(&self) -> &Rc<dyn Clock> {
        &self.clock
    }

    /// Number of callbacks still scheduled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        self.entries.borrow().iter().map(|e| e.deadline).min()
    }

    /// Fire every callback whose deadline has passed.
    ///
    /// All due callbacks run even if one fails; the first error is returned.
    pub fn run_due(&self) -> Result<usize, BindingError> {
        let mut fired = 0;
        let mut first_error = None;
        while let Some(entry) = self.take_due() {
            fired += 1;
            tracing::trace!(timer = entry.id.0, "timer fired");
            if let Err(err) = (entry.callback)() {
                tracing::warn!(timer = entry.id.0, error = %err, "timer callback failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(fired),
        }
    }

    fn take_due(&self) -> Option<TimerEntry> {
        let now = self.clock.now();
        let mut entries = self.entries.borrow_mut();
        let index = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.deadline <= now)
            .min_by_key(|(_, e)| (e.deadline, e.id))
            .map(|(i, _)| i)?;
        Some(entries.swap_remove(index))
    }
}

impl Timer for TimerQueue {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerId {
        let id = TimerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.entries.borrow_mut().push(TimerEntry {
            id,
            deadline: self.clock.now() + delay,
            callback,
        });
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }
}

impl std::fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerQueue")
            .field("now", &self.clock.now())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> (Rc<ManualClock>, TimerQueue) {
        let clock = Rc::new(ManualClock::new());
        let timers = TimerQueue::new(Rc::clone(&clock) as Rc<dyn Clock>);
        (clock, timers)
    }

    #[test]
    fn fires_in_deadline_order_once_due() {
        let (clock, timers) = queue();
        let log = Rc::new(RefCell::new(Vec::new()));
        for (delay, tag) in [(30, "c"), (10, "a"), (20, "b")] {
            let log = Rc::clone(&log);
            timers.schedule(
                Duration::from_millis(delay),
                Box::new(move || {
                    log.borrow_mut().push(tag);
                    Ok(())
                }),
            );
        }
        assert_eq!(timers.run_due().unwrap(), 0);
        clock.advance(Duration::from_millis(25));
        assert_eq!(timers.run_due().unwrap(), 2);
        assert_eq!(log.borrow().as_slice(), ["a", "b"]);
        assert_eq!(timers.pending(), 1);
        assert_eq!(timers.next_deadline(), Some(Duration::from_millis(30)));
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let (clock, timers) = queue();
        let id = timers.schedule(
            Duration::from_millis(1),
            Box::new(|| Err(BindingError::Evaluation("should not run".into()))),
        );
        assert!(timers.cancel(id));
        assert!(!timers.cancel(id));
        clock.advance(Duration::from_millis(5));
        assert_eq!(timers.run_due().unwrap(), 0);
    }

    #[test]
    fn errors_do_not_stop_other_callbacks() {
        let (clock, timers) = queue();
        let ran = Rc::new(Cell::new(false));
        timers.schedule(
            Duration::from_millis(1),
            Box::new(|| Err(BindingError::Evaluation("boom".into()))),
        );
        let flag = Rc::clone(&ran);
        timers.schedule(
            Duration::from_millis(2),
            Box::new(move || {
                flag.set(true);
                Ok(())
            }),
        );
        clock.advance(Duration::from_millis(2));
        assert!(timers.run_due().is_err());
        assert!(ran.get());
    }

    #[test]
    fn manual_clock_never_rewinds() {
        let clock = ManualClock::new();
        clock.set(Duration::from_secs(2));
        clock.set(Duration::from_secs(1));
        assert_eq!(clock.now(), Duration::from_secs(2));
    }
}
