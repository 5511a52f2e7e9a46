#![forbid(unsafe_code)]

//! Batched `connect` for freshly bound to-view bindings.
//!
//! Binding a large subtree would otherwise walk every binding's dependency
//! graph while the subtree is still half-initialized. Instead, `bind` enqueues
//! the binding and the [`TaskQueue`](crate::TaskQueue) drains the queue at the
//! end of the synchronous wave.
//!
//! # Invariants
//!
//! 1. Enqueueing a binding that is already pending is a no-op.
//! 2. Flush connects bindings in enqueue order.
//! 3. A binding unbound before the flush is skipped, never connected.
//! 4. Bindings enqueued during a flush are connected by the same flush.
//!
//! # Failure Modes
//!
//! | Failure | Behavior |
//! |---------|----------|
//! | A binding's connect fails | Logged; remaining bindings still connect; first error returned |

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use ahash::AHashSet;
use tether_core::BindingError;

/// A binding that can be connected later.
pub trait QueuedConnect {
    fn is_bound(&self) -> bool;

    /// Evaluate, push to the target and subscribe to dependencies.
    fn connect_queued(&self) -> Result<(), BindingError>;
}

fn key(binding: &Rc<dyn QueuedConnect>) -> usize {
    Rc::as_ptr(binding) as *const () as usize
}

/// FIFO of pending connects, deduplicated by binding identity.
#[derive(Default)]
pub struct ConnectQueue {
    pending: RefCell<VecDeque<Rc<dyn QueuedConnect>>>,
    queued: RefCell<AHashSet<usize>>,
    immediate_limit: usize,
    immediate_used: Cell<usize>,
}

impl ConnectQueue {
    /// A queue that batches every connect.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue that connects the first `limit` bindings of each wave
    /// synchronously and batches the rest.
    #[must_use]
    pub fn with_immediate(limit: usize) -> Self {
        Self {
            immediate_limit: limit,
            ..Self::default()
        }
    }

    pub fn enqueue(&self, binding: Rc<dyn QueuedConnect>) -> Result<(), BindingError> {
        if self.immediate_used.get() < self.immediate_limit {
            self.immediate_used.set(self.immediate_used.get() + 1);
            return binding.connect_queued();
        }
        if self.queued.borrow_mut().insert(key(&binding)) {
            self.pending.borrow_mut().push_back(binding);
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    /// Connect every pending binding. Returns how many were connected.
    pub fn flush(&self) -> Result<usize, BindingError> {
        let mut connected = 0;
        let mut skipped = 0;
        let mut first_error = None;

        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some(binding) = next else { break };
            self.queued.borrow_mut().remove(&key(&binding));

            if !binding.is_bound() {
                skipped += 1;
                tracing::warn!("queued connect cancelled: binding was unbound before flush");
                continue;
            }
            match binding.connect_queued() {
                Ok(()) => connected += 1,
                Err(err) => {
                    tracing::error!(error = %err, "queued connect failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        self.immediate_used.set(0);
        if connected + skipped > 0 {
            tracing::debug!(connected, skipped, "connect queue flushed");
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(connected),
        }
    }
}

impl std::fmt::Debug for ConnectQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectQueue")
            .field("pending", &self.len())
            .field("immediate_limit", &self.immediate_limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        name: &'static str,
        bound: Cell<bool>,
        fail: bool,
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl QueuedConnect for Probe {
        fn is_bound(&self) -> bool {
            self.bound.get()
        }

        fn connect_queued(&self) -> Result<(), BindingError> {
            self.log.borrow_mut().push(self.name);
            if self.fail {
                Err(BindingError::Evaluation(self.name.into()))
            } else {
                Ok(())
            }
        }
    }

    fn probe(name: &'static str, log: &Rc<RefCell<Vec<&'static str>>>) -> Rc<Probe> {
        Rc::new(Probe {
            name,
            bound: Cell::new(true),
            fail: false,
            log: Rc::clone(log),
        })
    }

    #[test]
    fn flushes_in_order_without_duplicates() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let queue = ConnectQueue::new();
        let a = probe("a", &log);
        let b = probe("b", &log);
        queue.enqueue(a.clone()).unwrap();
        queue.enqueue(b).unwrap();
        queue.enqueue(a).unwrap();
        assert_eq!(queue.len(), 2);
        assert!(log.borrow().is_empty());

        assert_eq!(queue.flush().unwrap(), 2);
        assert_eq!(log.borrow().as_slice(), ["a", "b"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn unbound_bindings_are_skipped() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let queue = ConnectQueue::new();
        let a = probe("a", &log);
        queue.enqueue(a.clone()).unwrap();
        a.bound.set(false);
        assert_eq!(queue.flush().unwrap(), 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn failure_does_not_stop_the_flush() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let queue = ConnectQueue::new();
        queue
            .enqueue(Rc::new(Probe {
                name: "bad",
                bound: Cell::new(true),
                fail: true,
                log: Rc::clone(&log),
            }))
            .unwrap();
        queue.enqueue(probe("good", &log)).unwrap();
        assert!(queue.flush().is_err());
        assert_eq!(log.borrow().as_slice(), ["bad", "good"]);
    }

    #[test]
    fn immediate_budget_resets_after_flush() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let queue = ConnectQueue::with_immediate(1);
        queue.enqueue(probe("now", &log)).unwrap();
        queue.enqueue(probe("later", &log)).unwrap();
        assert_eq!(log.borrow().as_slice(), ["now"]);
        queue.flush().unwrap();
        queue.enqueue(probe("next-wave", &log)).unwrap();
        assert_eq!(log.borrow().as_slice(), ["now", "later", "next-wave"]);
    }
}
