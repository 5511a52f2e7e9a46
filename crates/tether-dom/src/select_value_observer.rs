#![forbid(unsafe_code)]

//! Two-way bridge between a bound value and a `<select>` element.
//!
//! # Data flow
//!
//! ```text
//! set_value(v) ──▶ option.selected = matcher(option value, v)     (to view)
//! change / mutation ──▶ value = selected option value(s)          (from view)
//! ```
//!
//! An option's value is its `model` property when present, else its `value`.
//! The matcher is the select's `matcher` function property when set, else
//! strict equality.
//!
//! # Invariants
//!
//! 1. A multi-select only ever holds `null`, `undefined` or an array.
//! 2. Reading selection back into a bound array edits that array in place;
//!    its identity never changes.
//! 3. Subscribers are notified only when the derived value strictly changes.
//! 4. The `change` listener is attached exactly while there are subscribers.
//! 5. One initial option sync is queued after the first `set_value`, so
//!    options rendered after the value was set still end up selected.
//!
//! # Failure Modes
//!
//! | Failure | Behavior |
//! |---------|----------|
//! | Non-array bound to a multi-select | `MultiSelectRequiresArray`, value unchanged |
//! | Matcher function fails | Error propagated from the sync |

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tether_core::{
    Accessor, ArrayObserver, ArrayRef, BindingError, BindingFlagSet, BindingFlags, BindingId,
    BindingMode, BindingOrigin, Event, Subscribable, Subscriber, SubscriberCollection,
    SubscriberContext, Value,
};
use tether_runtime::{EventHandler, MicroTask, TaskQueue};

use crate::mutation::{MutationObserver, ObserveOptions};
use crate::node::{ListenerId, Node};

/// Context under which the observer subscribes to a bound array.
pub const SELECT_ARRAY_CONTEXT: SubscriberContext = SubscriberContext::new("SelectValueObserver:array");

const CHANGE_EVENT: &str = "change";

/// Observer for a select element's `value`.
pub struct SelectValueObserver {
    this: Weak<SelectValueObserver>,
    node: Rc<Node>,
    tasks: Rc<TaskQueue>,
    value: RefCell<Value>,
    old_value: RefCell<Value>,
    array_observer: RefCell<Option<Rc<ArrayObserver>>>,
    initial_sync: Cell<bool>,
    child_observer: RefCell<Option<Rc<MutationObserver>>>,
    listener: Cell<Option<ListenerId>>,
    subscribers: SubscriberCollection,
    flags: BindingFlagSet,
}

impl SelectValueObserver {
    #[must_use]
    pub fn new(node: Rc<Node>, tasks: Rc<TaskQueue>) -> Rc<Self> {
        let id = BindingId::next();
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            node,
            tasks,
            value: RefCell::new(Value::Undefined),
            old_value: RefCell::new(Value::Undefined),
            array_observer: RefCell::new(None),
            initial_sync: Cell::new(false),
            child_observer: RefCell::new(None),
            listener: Cell::new(None),
            subscribers: SubscriberCollection::new(),
            flags: BindingFlagSet::new(id, BindingOrigin::Observer, BindingMode::TwoWay),
        })
    }

    #[must_use]
    pub fn node(&self) -> &Rc<Node> {
        &self.node
    }

    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.subscribers.has_subscribers()
    }

    /// Whether the `change` listener is currently attached.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listener.get().is_some()
    }

    fn as_subscriber(&self) -> Weak<dyn Subscriber> {
        let weak: Weak<SelectValueObserver> = self.this.clone();
        weak
    }

    fn matches(&self, option_value: &Value, bound: &Value) -> Result<bool, BindingError> {
        match self.node.get("matcher") {
            Value::Function(matcher) => Ok(matcher
                .call(&[option_value.clone(), bound.clone()])?
                .is_truthy()),
            _ => Ok(option_value.strict_eq(bound)),
        }
    }

    fn option_value(option: &Node) -> Value {
        if option.has("model") {
            option.get("model")
        } else {
            option.get("value")
        }
    }

    fn swap_array_observer(&self, next: Option<&ArrayRef>) {
        let subscriber = self.as_subscriber();
        let previous = self.array_observer.borrow_mut().take();
        if let Some(previous) = previous {
            previous.unsubscribe(SELECT_ARRAY_CONTEXT, &subscriber);
        }
        if let Some(array) = next {
            let observer = array.observer();
            observer.subscribe(SELECT_ARRAY_CONTEXT, subscriber);
            *self.array_observer.borrow_mut() = Some(observer);
        }
    }

    /// Push the bound value into every option's `selected` state.
    pub fn synchronize_options(&self) -> Result<(), BindingError> {
        let value = self.value.borrow().clone();
        let options = self.node.options();
        for option in options.iter().rev() {
            let option_value = Self::option_value(option);
            let selected = match &value {
                Value::Array(items) => {
                    let mut found = false;
                    for item in items.to_vec() {
                        if self.matches(&option_value, &item)? {
                            found = true;
                            break;
                        }
                    }
                    found
                }
                other => self.matches(&option_value, other)?,
            };
            option.set("selected", selected);
        }
        tracing::trace!(options = options.len(), "select options synchronized");
        Ok(())
    }

    /// Derive the bound value from the currently selected options.
    pub fn synchronize_value(&self, flags: BindingFlags) -> Result<(), BindingError> {
        let selected: Vec<Value> = self
            .node
            .options()
            .iter()
            .filter(|option| option.get("selected").is_truthy())
            .map(|option| Self::option_value(option))
            .collect();

        let current = self.value.borrow().clone();
        let next = if self.node.is_multiple() {
            if let Value::Array(array) = &current {
                return self.reconcile(array, &selected);
            }
            Value::Array(ArrayRef::from_values(selected))
        } else {
            selected.into_iter().next().unwrap_or(Value::Null)
        };

        if next.strict_eq(&current) {
            return Ok(());
        }
        *self.old_value.borrow_mut() = current;
        *self.value.borrow_mut() = next;
        self.notify(flags)
    }

    /// Edit `array` in place to hold exactly `selected`.
    fn reconcile(&self, array: &ArrayRef, selected: &[Value]) -> Result<(), BindingError> {
        let existing = array.to_vec();
        let mut keep = Vec::with_capacity(existing.len());
        for item in &existing {
            let mut still_selected = false;
            for candidate in selected {
                if self.matches(item, candidate)? {
                    still_selected = true;
                    break;
                }
            }
            keep.push(still_selected);
        }
        let mut index = 0;
        array.retain(|_| {
            let kept = keep.get(index).copied().unwrap_or(true);
            index += 1;
            kept
        })?;

        for candidate in selected {
            let mut present = false;
            for item in array.to_vec() {
                if self.matches(candidate, &item)? {
                    present = true;
                    break;
                }
            }
            if !present {
                array.push(candidate.clone())?;
            }
        }
        Ok(())
    }

    fn notify(&self, flags: BindingFlags) -> Result<(), BindingError> {
        let new_value = self.value.borrow().clone();
        let old_value = self.old_value.borrow().clone();
        self.subscribers
            .call_subscribers(&new_value, &old_value, flags)
    }

    fn attach_listener(&self) {
        if self.listener.get().is_some() {
            return;
        }
        let handler: Weak<dyn EventHandler> = {
            let weak: Weak<SelectValueObserver> = self.this.clone();
            weak
        };
        let id = self.node.add_event_listener(CHANGE_EVENT, false, handler);
        self.listener.set(Some(id));
    }

    fn detach_listener(&self) {
        if let Some(id) = self.listener.take() {
            self.node.remove_event_listener(id);
        }
    }
}

impl Accessor for SelectValueObserver {
    fn get_value(&self) -> Value {
        self.value.borrow().clone()
    }

    fn set_value(&self, value: Value, flags: BindingFlags) -> Result<(), BindingError> {
        if !value.is_nullish() && self.node.is_multiple() && !matches!(value, Value::Array(_)) {
            return Err(BindingError::MultiSelectRequiresArray);
        }
        if self.value.borrow().strict_eq(&value) {
            return Ok(());
        }

        self.swap_array_observer(value.as_array());
        let previous = self.value.replace(value);
        *self.old_value.borrow_mut() = previous;
        self.synchronize_options()?;
        self.notify(flags.fallback(self.flags.update_target))?;

        if !self.initial_sync.replace(true) {
            if let Some(this) = self.this.upgrade() {
                self.tasks.queue_micro_task(this);
            }
        }
        Ok(())
    }

    fn bind(&self, flags: BindingFlags) -> Result<(), BindingError> {
        let flags = flags.fallback(self.flags.bind);
        let weak = self.this.clone();
        let observer = MutationObserver::new(Rc::clone(&self.tasks), move |_records| {
            let Some(this) = weak.upgrade() else {
                return Ok(());
            };
            this.synchronize_options()?;
            this.synchronize_value(flags)
        });
        observer.observe(
            &self.node,
            ObserveOptions::CHILD_LIST | ObserveOptions::SUBTREE | ObserveOptions::CHARACTER_DATA,
        );
        let previous = self.child_observer.replace(Some(observer));
        if let Some(previous) = previous {
            previous.disconnect();
        }
        Ok(())
    }

    fn unbind(&self) {
        let observer = self.child_observer.take();
        if let Some(observer) = observer {
            observer.disconnect();
        }
        self.swap_array_observer(None);
    }
}

impl Subscribable for SelectValueObserver {
    fn subscribe(&self, context: SubscriberContext, subscriber: Weak<dyn Subscriber>) {
        if !self.subscribers.has_subscribers() {
            self.attach_listener();
        }
        self.subscribers.add_subscriber(context, subscriber);
    }

    fn unsubscribe(&self, context: SubscriberContext, subscriber: &Weak<dyn Subscriber>) {
        if self.subscribers.remove_subscriber(context, subscriber)
            && !self.subscribers.has_subscribers()
        {
            self.detach_listener();
        }
    }
}

impl Subscriber for SelectValueObserver {
    fn handle_change(
        &self,
        _context: SubscriberContext,
        _new_value: &Value,
        _old_value: &Value,
        _flags: BindingFlags,
    ) -> Result<(), BindingError> {
        self.synchronize_options()
    }
}

impl EventHandler for SelectValueObserver {
    fn handle_event(&self, _event: &Rc<Event>) -> Result<(), BindingError> {
        self.synchronize_value(self.flags.update_source)
    }
}

impl MicroTask for SelectValueObserver {
    fn run(&self) -> Result<(), BindingError> {
        self.synchronize_options()
    }
}

impl std::fmt::Debug for SelectValueObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectValueObserver")
            .field("value", &*self.value.borrow())
            .field("multiple", &self.node.is_multiple())
            .field("subscribers", &self.subscribers.subscriber_count())
            .field("listening", &self.is_listening())
            .finish()
    }
}
