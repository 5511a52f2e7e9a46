#![forbid(unsafe_code)]

//! Live list of the components rendered directly inside a host node.
//!
//! The host is watched only once someone reads or subscribes. Each mutation
//! burst recomputes the list, calls the owning component's
//! `$childrenChanged` function when it has one, and queues a single
//! subscriber notification.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tether_core::{
    Accessor, ArrayRef, BindingError, BindingFlagSet, BindingFlags, BindingId, BindingMode,
    BindingOrigin, ObjectRef, Subscribable, Subscriber, SubscriberCollection, SubscriberContext,
    Value,
};
use tether_runtime::{MicroTask, TaskQueue};

use crate::mutation::{MutationObserver, ObserveOptions};
use crate::node::Node;

/// Property under which a component exposes its children.
pub const CHILDREN_PROPERTY: &str = "$children";
/// Component function invoked with the fresh list after each change.
pub const CHILDREN_CHANGED_HOOK: &str = "$childrenChanged";

pub struct ChildrenObserver {
    this: Weak<ChildrenObserver>,
    component: ObjectRef,
    host: Weak<Node>,
    tasks: Rc<TaskQueue>,
    children: RefCell<Option<ArrayRef>>,
    observer: RefCell<Option<Rc<MutationObserver>>>,
    notify_scheduled: Cell<bool>,
    subscribers: SubscriberCollection,
    flags: BindingFlagSet,
}

impl ChildrenObserver {
    #[must_use]
    pub fn new(component: ObjectRef, host: &Rc<Node>, tasks: Rc<TaskQueue>) -> Rc<Self> {
        let id = BindingId::next();
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            component,
            host: Rc::downgrade(host),
            tasks,
            children: RefCell::new(None),
            observer: RefCell::new(None),
            notify_scheduled: Cell::new(false),
            subscribers: SubscriberCollection::new(),
            flags: BindingFlagSet::new(id, BindingOrigin::Observer, BindingMode::ToView),
        })
    }

    #[must_use]
    pub fn component(&self) -> &ObjectRef {
        &self.component
    }

    /// Whether the host is currently being watched.
    #[must_use]
    pub fn is_observing(&self) -> bool {
        self.observer.borrow().is_some()
    }

    fn collect(&self) -> ArrayRef {
        let components = self
            .host
            .upgrade()
            .map(|host| {
                host.children()
                    .iter()
                    .filter_map(|child| child.component())
                    .map(Value::from)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        ArrayRef::from_values(components)
    }

    fn ensure_observing(&self) {
        if self.observer.borrow().is_some() {
            return;
        }
        let Some(host) = self.host.upgrade() else {
            return;
        };
        let weak = self.this.clone();
        let observer = MutationObserver::new(Rc::clone(&self.tasks), move |_records| {
            match weak.upgrade() {
                Some(this) => this.on_mutation(),
                None => Ok(()),
            }
        });
        observer.observe(&host, ObserveOptions::CHILD_LIST);
        *self.observer.borrow_mut() = Some(observer);
        *self.children.borrow_mut() = Some(self.collect());
        tracing::trace!(host = host.identity(), "children observer attached");
    }

    fn on_mutation(&self) -> Result<(), BindingError> {
        let children = self.collect();
        *self.children.borrow_mut() = Some(children.clone());

        if let Value::Function(hook) = self.component.get(CHILDREN_CHANGED_HOOK) {
            hook.call(&[Value::from(children)])?;
        }

        if !self.notify_scheduled.replace(true) {
            if let Some(this) = self.this.upgrade() {
                self.tasks.queue_micro_task(this);
            }
        }
        Ok(())
    }
}

impl Accessor for ChildrenObserver {
    fn get_value(&self) -> Value {
        self.ensure_observing();
        let cached = self.children.borrow().clone();
        Value::from(cached.unwrap_or_else(|| self.collect()))
    }

    /// The list is derived from the host; writes are ignored.
    fn set_value(&self, _value: Value, _flags: BindingFlags) -> Result<(), BindingError> {
        Ok(())
    }
}

impl Subscribable for ChildrenObserver {
    fn subscribe(&self, context: SubscriberContext, subscriber: Weak<dyn Subscriber>) {
        if !self.subscribers.has_subscribers() {
            self.ensure_observing();
        }
        self.subscribers.add_subscriber(context, subscriber);
    }

    fn unsubscribe(&self, context: SubscriberContext, subscriber: &Weak<dyn Subscriber>) {
        if self.subscribers.remove_subscriber(context, subscriber)
            && !self.subscribers.has_subscribers()
        {
            let observer = self.observer.borrow_mut().take();
            if let Some(observer) = observer {
                observer.disconnect();
            }
            *self.children.borrow_mut() = None;
        }
    }
}

impl MicroTask for ChildrenObserver {
    fn run(&self) -> Result<(), BindingError> {
        self.notify_scheduled.set(false);
        let children = self
            .children
            .borrow()
            .clone()
            .map_or(Value::Undefined, Value::from);
        self.subscribers
            .call_subscribers(&children, &Value::Undefined, self.flags.update_target)
    }
}

impl std::fmt::Debug for ChildrenObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildrenObserver")
            .field("observing", &self.is_observing())
            .field("subscribers", &self.subscribers.subscriber_count())
            .finish()
    }
}
