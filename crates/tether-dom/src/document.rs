#![forbid(unsafe_code)]

//! Document: the root node plus the services its observers need.

use std::rc::Rc;

use tether_core::{BindingError, Event};
use tether_runtime::TaskQueue;

use crate::events::{DomEventManager, dispatch_event};
use crate::mutation::{MutationObserver, MutationRecord};
use crate::node::Node;

/// A document tree with its micro-task queue and event manager.
pub struct Document {
    root: Rc<Node>,
    tasks: Rc<TaskQueue>,
    events: Rc<DomEventManager>,
}

impl Document {
    #[must_use]
    pub fn new(tasks: Rc<TaskQueue>) -> Rc<Self> {
        let root = Node::element("body");
        let events = Rc::new(DomEventManager::new(Rc::clone(&root)));
        Rc::new(Self {
            root,
            tasks,
            events,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Rc<Node> {
        &self.root
    }

    #[must_use]
    pub fn task_queue(&self) -> &Rc<TaskQueue> {
        &self.tasks
    }

    #[must_use]
    pub fn event_manager(&self) -> &Rc<DomEventManager> {
        &self.events
    }

    /// Append `node` to the root.
    pub fn mount(&self, node: &Rc<Node>) -> Result<(), BindingError> {
        self.root.append_child(node)
    }

    /// A mutation observer delivering through this document's task queue.
    #[must_use]
    pub fn create_mutation_observer(
        &self,
        callback: impl Fn(&[MutationRecord]) -> Result<(), BindingError> + 'static,
    ) -> Rc<MutationObserver> {
        MutationObserver::new(Rc::clone(&self.tasks), callback)
    }

    /// Dispatch a fresh event of `kind` at `target`.
    pub fn dispatch(&self, target: &Rc<Node>, kind: &str, bubbles: bool) -> Result<Rc<Event>, BindingError> {
        let event = Event::new(kind, bubbles);
        dispatch_event(target, &event)?;
        Ok(event)
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("root", &self.root)
            .field("tasks", &self.tasks)
            .finish()
    }
}
