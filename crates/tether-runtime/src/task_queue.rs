#![forbid(unsafe_code)]

//! End-of-turn micro-task queue.
//!
//! Work deferred to "the end of the current synchronous turn" (DOM mutation
//! delivery, select-option sync, children notifications) is queued here. The
//! host calls [`TaskQueue::flush`] once the synchronous wave is done.
//!
//! # Invariants
//!
//! 1. Pending connects are always drained before the next micro task runs.
//! 2. Micro tasks run in FIFO order; tasks queued by a running task run in the
//!    same flush.
//! 3. A re-entrant `flush` is a no-op; the outer flush picks up the work.
//! 4. A flush runs at most `max_iterations` micro tasks.
//!
//! # Failure Modes
//!
//! | Failure | Behavior |
//! |---------|----------|
//! | Task or connect fails | Logged; flush continues; first error returned |
//! | Cascade exceeds the iteration cap | Remaining tasks dropped; `FlushLimitExceeded` |

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use tether_core::BindingError;

use crate::config::DEFAULT_MAX_FLUSH_ITERATIONS;
use crate::connect_queue::ConnectQueue;

/// Deferred unit of work that may be queued repeatedly.
pub trait MicroTask {
    fn run(&self) -> Result<(), BindingError>;
}

enum Task {
    Shared(Rc<dyn MicroTask>),
    Once(Box<dyn FnOnce() -> Result<(), BindingError>>),
}

impl Task {
    fn run(self) -> Result<(), BindingError> {
        match self {
            Self::Shared(task) => task.run(),
            Self::Once(f) => f(),
        }
    }
}

struct FlushGuard<'a>(&'a Cell<bool>);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// FIFO of micro tasks, coupled to the connect queue.
pub struct TaskQueue {
    connect_queue: Rc<ConnectQueue>,
    tasks: RefCell<VecDeque<Task>>,
    flushing: Cell<bool>,
    max_iterations: usize,
}

impl TaskQueue {
    #[must_use]
    pub fn new(connect_queue: Rc<ConnectQueue>) -> Self {
        Self::with_limit(connect_queue, DEFAULT_MAX_FLUSH_ITERATIONS)
    }

    #[must_use]
    pub fn with_limit(connect_queue: Rc<ConnectQueue>, max_iterations: usize) -> Self {
        Self {
            connect_queue,
            tasks: RefCell::new(VecDeque::new()),
            flushing: Cell::new(false),
            max_iterations,
        }
    }

    #[must_use]
    pub fn connect_queue(&self) -> &Rc<ConnectQueue> {
        &self.connect_queue
    }

    pub fn queue_micro_task(&self, task: Rc<dyn MicroTask>) {
        self.tasks.borrow_mut().push_back(Task::Shared(task));
    }

    pub fn queue_fn(&self, f: impl FnOnce() -> Result<(), BindingError> + 'static) {
        self.tasks.borrow_mut().push_back(Task::Once(Box::new(f)));
    }

    /// Number of queued micro tasks (pending connects excluded).
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    #[must_use]
    pub fn is_flushing(&self) -> bool {
        self.flushing.get()
    }

    /// Run pending connects and micro tasks until both queues are empty.
    pub fn flush(&self) -> Result<(), BindingError> {
        if self.flushing.replace(true) {
            return Ok(());
        }
        let _guard = FlushGuard(&self.flushing);

        let mut first_error = None;
        let mut iterations = 0;
        loop {
            if !self.connect_queue.is_empty() {
                if let Err(err) = self.connect_queue.flush() {
                    first_error.get_or_insert(err);
                }
            }

            let next = self.tasks.borrow_mut().pop_front();
            let Some(task) = next else { break };

            iterations += 1;
            if iterations > self.max_iterations {
                let dropped = {
                    let mut tasks = self.tasks.borrow_mut();
                    let dropped = tasks.len() + 1;
                    tasks.clear();
                    dropped
                };
                tracing::error!(
                    limit = self.max_iterations,
                    dropped,
                    "micro-task flush did not settle"
                );
                return Err(BindingError::FlushLimitExceeded(self.max_iterations));
            }

            if let Err(err) = task.run() {
                tracing::warn!(error = %err, "micro task failed");
                first_error.get_or_insert(err);
            }
        }

        tracing::trace!(iterations, "task queue flushed");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("pending", &self.pending())
            .field("connect_queue", &self.connect_queue)
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}
