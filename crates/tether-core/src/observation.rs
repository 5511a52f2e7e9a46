#![forbid(unsafe_code)]

//! Observer and accessor contracts, plus the built-in observers for
//! interceptable object properties and arrays.
//!
//! - [`Accessor`]: read/write a single property. May carry bind/unbind
//!   lifecycle hooks (element observers attach DOM listeners there).
//! - [`Subscribable`]: accepts `(context, subscriber)` registrations.
//! - [`PropertyObserver`]: both of the above; blanket-implemented.
//!
//! [`SetterObserver`] is created lazily per `(object, property)` by
//! [`ObjectRef::property_observer`] and fires only on strict change.
//! [`ArrayObserver`] fires after every structural mutation of its array.

use std::rc::{Rc, Weak};

use crate::error::BindingError;
use crate::flags::{BindingFlags, BindingId, BindingOperation, BindingOrigin};
use crate::subscriber::{Subscriber, SubscriberCollection, SubscriberContext};
use crate::value::{ArrayData, ArrayRef, ObjectData, ObjectRef, Value};

/// Read/write access to one property of one target.
pub trait Accessor {
    fn get_value(&self) -> Value;

    fn set_value(&self, value: Value, flags: BindingFlags) -> Result<(), BindingError>;

    /// Called when a binding using this accessor binds.
    fn bind(&self, _flags: BindingFlags) -> Result<(), BindingError> {
        Ok(())
    }

    /// Called when a binding using this accessor unbinds.
    fn unbind(&self) {}
}

/// Something subscribers can register with.
pub trait Subscribable {
    fn subscribe(&self, context: SubscriberContext, subscriber: Weak<dyn Subscriber>);

    fn unsubscribe(&self, context: SubscriberContext, subscriber: &Weak<dyn Subscriber>);
}

/// An accessor that also notifies subscribers when the property changes.
pub trait PropertyObserver: Accessor + Subscribable {}

impl<T: Accessor + Subscribable + ?Sized> PropertyObserver for T {}

fn observer_flags() -> BindingFlags {
    BindingFlags::from_id(BindingId::next())
        .with_origin(BindingOrigin::Observer)
        .with_operation(BindingOperation::Change)
}

// ---------------------------------------------------------------------------
// SetterObserver
// ---------------------------------------------------------------------------

/// Change-notifying observer for an interceptable object property.
pub struct SetterObserver {
    object: Weak<ObjectData>,
    name: Rc<str>,
    subscribers: SubscriberCollection,
    flags: BindingFlags,
}

impl SetterObserver {
    pub(crate) fn new(object: Weak<ObjectData>, name: &str) -> Self {
        Self {
            object,
            name: Rc::from(name),
            subscribers: SubscriberCollection::new(),
            flags: observer_flags(),
        }
    }

    #[must_use]
    pub fn property_name(&self) -> &str {
        &self.name
    }

    /// The observed object, while it is alive.
    #[must_use]
    pub fn object(&self) -> Option<ObjectRef> {
        ObjectRef::from_weak(&self.object)
    }

    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.subscribers.has_subscribers()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.subscriber_count()
    }

    pub(crate) fn notify(
        &self,
        new_value: &Value,
        old_value: &Value,
        flags: BindingFlags,
    ) -> Result<(), BindingError> {
        self.subscribers
            .call_subscribers(new_value, old_value, flags.fallback(self.flags))
    }
}

impl Accessor for SetterObserver {
    fn get_value(&self) -> Value {
        self.object()
            .map(|object| object.get(&self.name))
            .unwrap_or_default()
    }

    fn set_value(&self, value: Value, flags: BindingFlags) -> Result<(), BindingError> {
        match self.object() {
            Some(object) => object.set_with_flags(&self.name, value, flags),
            None => Ok(()),
        }
    }
}

impl Subscribable for SetterObserver {
    fn subscribe(&self, context: SubscriberContext, subscriber: Weak<dyn Subscriber>) {
        self.subscribers.add_subscriber(context, subscriber);
    }

    fn unsubscribe(&self, context: SubscriberContext, subscriber: &Weak<dyn Subscriber>) {
        self.subscribers.remove_subscriber(context, subscriber);
    }
}

impl std::fmt::Debug for SetterObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetterObserver")
            .field("property", &self.name)
            .field("subscribers", &self.subscribers)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ArrayObserver
// ---------------------------------------------------------------------------

/// Notifies subscribers after every structural mutation of an array.
///
/// Subscribers receive the array itself as the new value.
pub struct ArrayObserver {
    array: Weak<ArrayData>,
    subscribers: SubscriberCollection,
    flags: BindingFlags,
}

impl ArrayObserver {
    pub(crate) fn new(array: Weak<ArrayData>) -> Self {
        Self {
            array,
            subscribers: SubscriberCollection::new(),
            flags: observer_flags(),
        }
    }

    /// The observed array, while it is alive.
    #[must_use]
    pub fn array(&self) -> Option<ArrayRef> {
        ArrayRef::from_weak(&self.array)
    }

    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.subscribers.has_subscribers()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.subscriber_count()
    }

    pub(crate) fn notify(&self, array: &ArrayRef) -> Result<(), BindingError> {
        self.subscribers
            .call_subscribers(&Value::Array(array.clone()), &Value::Undefined, self.flags)
    }
}

impl Subscribable for ArrayObserver {
    fn subscribe(&self, context: SubscriberContext, subscriber: Weak<dyn Subscriber>) {
        self.subscribers.add_subscriber(context, subscriber);
    }

    fn unsubscribe(&self, context: SubscriberContext, subscriber: &Weak<dyn Subscriber>) {
        self.subscribers.remove_subscriber(context, subscriber);
    }
}

impl std::fmt::Debug for ArrayObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayObserver")
            .field("subscribers", &self.subscribers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::SOURCE_CONTEXT;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Changes(RefCell<Vec<(Value, Value)>>);

    impl Subscriber for Changes {
        fn handle_change(
            &self,
            _context: SubscriberContext,
            new_value: &Value,
            old_value: &Value,
            _flags: BindingFlags,
        ) -> Result<(), BindingError> {
            self.0.borrow_mut().push((new_value.clone(), old_value.clone()));
            Ok(())
        }
    }

    fn weak(changes: &Rc<Changes>) -> Weak<dyn Subscriber> {
        let weak: Weak<Changes> = Rc::downgrade(changes);
        weak
    }

    #[test]
    fn setter_observer_fires_only_on_change() {
        let obj = ObjectRef::from_pairs([("x", 5)]);
        let observer = obj.property_observer("x").unwrap();
        let changes = Rc::new(Changes::default());
        observer.subscribe(SOURCE_CONTEXT, weak(&changes));

        obj.set("x", 5).unwrap();
        assert!(changes.0.borrow().is_empty());

        obj.set("x", 6).unwrap();
        assert_eq!(
            changes.0.borrow().as_slice(),
            &[(Value::from(6), Value::from(5))]
        );
    }

    #[test]
    fn setter_observer_accessor_round_trips() {
        let obj = ObjectRef::new();
        let observer = obj.property_observer("name").unwrap();
        observer
            .set_value(Value::from("Ann"), BindingFlags::empty())
            .unwrap();
        assert_eq!(obj.get("name"), Value::from("Ann"));
        assert_eq!(observer.get_value(), Value::from("Ann"));
        assert_eq!(observer.property_name(), "name");
    }

    #[test]
    fn delete_notifies_undefined() {
        let obj = ObjectRef::from_pairs([("x", 1)]);
        let observer = obj.property_observer("x").unwrap();
        let changes = Rc::new(Changes::default());
        observer.subscribe(SOURCE_CONTEXT, weak(&changes));
        obj.delete("x").unwrap();
        assert_eq!(
            changes.0.borrow().as_slice(),
            &[(Value::Undefined, Value::from(1))]
        );
    }

    #[test]
    fn array_observer_fires_on_mutation() {
        let arr = ArrayRef::from_values([1]);
        let observer = arr.observer();
        let changes = Rc::new(Changes::default());
        observer.subscribe(SOURCE_CONTEXT, weak(&changes));

        arr.push(2).unwrap();
        arr.remove(0).unwrap();
        arr.clear().unwrap();
        arr.clear().unwrap();
        assert_eq!(changes.0.borrow().len(), 3);
        assert!(Rc::ptr_eq(&arr.observer(), &observer));
        assert!(observer.array().unwrap().ptr_eq(&arr));
    }
}
