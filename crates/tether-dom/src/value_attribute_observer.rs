#![forbid(unsafe_code)]

//! Observer for an input's `value` or `checked` property.
//!
//! Writes go straight to the node. Reads follow the node through `change`
//! and `input` events, which are listened to only while someone subscribes.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tether_core::{
    Accessor, BindingError, BindingFlagSet, BindingFlags, BindingId, BindingMode, BindingOrigin,
    Event, Subscribable, Subscriber, SubscriberCollection, SubscriberContext, Value,
};
use tether_runtime::EventHandler;

use crate::node::{ListenerId, Node};

const EVENTS: [&str; 2] = ["change", "input"];

/// Observer for a single element property driven by user input.
pub struct ValueAttributeObserver {
    this: Weak<ValueAttributeObserver>,
    node: Rc<Node>,
    property: Rc<str>,
    old_value: RefCell<Value>,
    listeners: RefCell<Vec<ListenerId>>,
    subscribers: SubscriberCollection,
    flags: BindingFlagSet,
}

impl ValueAttributeObserver {
    #[must_use]
    pub fn new(node: Rc<Node>, property: &str) -> Rc<Self> {
        let id = BindingId::next();
        let old_value = node.get(property);
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            node,
            property: Rc::from(property),
            old_value: RefCell::new(old_value),
            listeners: RefCell::new(Vec::new()),
            subscribers: SubscriberCollection::new(),
            flags: BindingFlagSet::new(id, BindingOrigin::Observer, BindingMode::TwoWay),
        })
    }

    #[must_use]
    pub fn node(&self) -> &Rc<Node> {
        &self.node
    }

    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        !self.listeners.borrow().is_empty()
    }

    fn notify_if_changed(&self, flags: BindingFlags) -> Result<(), BindingError> {
        let new_value = self.node.get(&self.property);
        let old_value = self.old_value.borrow().clone();
        if new_value.strict_eq(&old_value) {
            return Ok(());
        }
        *self.old_value.borrow_mut() = new_value.clone();
        self.subscribers
            .call_subscribers(&new_value, &old_value, flags)
    }
}

impl Accessor for ValueAttributeObserver {
    fn get_value(&self) -> Value {
        self.node.get(&self.property)
    }

    fn set_value(&self, value: Value, flags: BindingFlags) -> Result<(), BindingError> {
        self.node.set(&self.property, value);
        self.notify_if_changed(flags.fallback(self.flags.update_target))
    }
}

impl Subscribable for ValueAttributeObserver {
    fn subscribe(&self, context: SubscriberContext, subscriber: Weak<dyn Subscriber>) {
        if !self.subscribers.has_subscribers() {
            *self.old_value.borrow_mut() = self.node.get(&self.property);
            let handler: Weak<dyn EventHandler> = {
                let weak: Weak<ValueAttributeObserver> = self.this.clone();
                weak
            };
            let ids = EVENTS
                .iter()
                .map(|event| self.node.add_event_listener(event, false, handler.clone()))
                .collect();
            *self.listeners.borrow_mut() = ids;
        }
        self.subscribers.add_subscriber(context, subscriber);
    }

    fn unsubscribe(&self, context: SubscriberContext, subscriber: &Weak<dyn Subscriber>) {
        if self.subscribers.remove_subscriber(context, subscriber)
            && !self.subscribers.has_subscribers()
        {
            let ids = std::mem::take(&mut *self.listeners.borrow_mut());
            for id in ids {
                self.node.remove_event_listener(id);
            }
        }
    }
}

impl EventHandler for ValueAttributeObserver {
    fn handle_event(&self, _event: &Rc<Event>) -> Result<(), BindingError> {
        self.notify_if_changed(self.flags.update_source)
    }
}

impl std::fmt::Debug for ValueAttributeObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueAttributeObserver")
            .field("property", &self.property)
            .field("subscribers", &self.subscribers.subscriber_count())
            .field("listening", &self.is_listening())
            .finish()
    }
}
