#![forbid(unsafe_code)]

//! Mutation observers.
//!
//! Records accumulate while the synchronous turn runs; the first record of a
//! burst queues a single micro task that delivers the whole batch.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tether_core::BindingError;
use tether_runtime::{MicroTask, TaskQueue};

use crate::node::Node;

bitflags::bitflags! {
    /// What a [`MutationObserver`] is interested in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObserveOptions: u8 {
        const CHILD_LIST = 1 << 0;
        const SUBTREE = 1 << 1;
        const CHARACTER_DATA = 1 << 2;
    }
}

/// What changed.
#[derive(Debug, Clone)]
pub enum MutationKind {
    ChildList {
        added: Vec<Rc<Node>>,
        removed: Vec<Rc<Node>>,
    },
    CharacterData,
}

/// One change to one node.
#[derive(Debug, Clone)]
pub struct MutationRecord {
    pub target: Rc<Node>,
    pub kind: MutationKind,
}

/// Callback invoked with each delivered batch.
pub type MutationCallback = Box<dyn Fn(&[MutationRecord]) -> Result<(), BindingError>>;

/// Batched observer of node mutations.
pub struct MutationObserver {
    this: Weak<MutationObserver>,
    tasks: Rc<TaskQueue>,
    callback: MutationCallback,
    records: RefCell<Vec<MutationRecord>>,
    scheduled: Cell<bool>,
    targets: RefCell<Vec<Weak<Node>>>,
}

impl MutationObserver {
    #[must_use]
    pub fn new(
        tasks: Rc<TaskQueue>,
        callback: impl Fn(&[MutationRecord]) -> Result<(), BindingError> + 'static,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            tasks,
            callback: Box::new(callback),
            records: RefCell::new(Vec::new()),
            scheduled: Cell::new(false),
            targets: RefCell::new(Vec::new()),
        })
    }

    /// Start (or update) observing `node`.
    pub fn observe(self: &Rc<Self>, node: &Rc<Node>, options: ObserveOptions) {
        node.register_observer(self, options);
        let mut targets = self.targets.borrow_mut();
        targets.retain(|target| target.strong_count() > 0);
        if !targets.iter().any(|target| target.as_ptr() == Rc::as_ptr(node)) {
            targets.push(Rc::downgrade(node));
        }
    }

    /// Stop observing every node and drop pending records.
    pub fn disconnect(&self) {
        let targets: Vec<_> = self.targets.borrow_mut().drain(..).collect();
        for target in targets.iter().filter_map(Weak::upgrade) {
            target.unregister_observer(self);
        }
        self.records.borrow_mut().clear();
    }

    /// Remove and return undelivered records.
    pub fn take_records(&self) -> Vec<MutationRecord> {
        std::mem::take(&mut *self.records.borrow_mut())
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.records.borrow().len()
    }

    pub(crate) fn enqueue(&self, record: MutationRecord) {
        self.records.borrow_mut().push(record);
        if self.scheduled.replace(true) {
            return;
        }
        if let Some(this) = self.this.upgrade() {
            self.tasks.queue_micro_task(this);
        }
    }
}

impl MicroTask for MutationObserver {
    fn run(&self) -> Result<(), BindingError> {
        self.scheduled.set(false);
        let records = self.take_records();
        if records.is_empty() {
            return Ok(());
        }
        tracing::trace!(records = records.len(), "delivering mutation records");
        (self.callback)(&records)
    }
}

impl std::fmt::Debug for MutationObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationObserver")
            .field("pending", &self.pending())
            .field("targets", &self.targets.borrow().len())
            .finish()
    }
}
