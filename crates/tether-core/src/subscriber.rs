#![forbid(unsafe_code)]

//! Subscriber fan-out shared by every observer in the engine.
//!
//! A [`SubscriberCollection`] holds `(context, subscriber)` pairs. The context
//! tells the subscriber *why* it is being called (source dependency changed,
//! target changed, backing array mutated, ...), so one object can subscribe to
//! several observers and dispatch on the context.
//!
//! # Invariants
//!
//! 1. A `(context, subscriber)` pair is held at most once.
//! 2. Subscribers are notified in registration order.
//! 3. Subscribers are stored as `Weak` and pruned lazily; a dropped subscriber
//!    is never called.
//! 4. Subscribing or unsubscribing during a notification does not affect the
//!    notification in progress.

use std::cell::RefCell;
use std::rc::Weak;

use crate::error::BindingError;
use crate::flags::BindingFlags;
use crate::value::Value;

/// Label passed to a subscriber on every notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberContext(&'static str);

impl SubscriberContext {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl std::fmt::Display for SubscriberContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// A source dependency of a binding changed.
pub const SOURCE_CONTEXT: SubscriberContext = SubscriberContext::new("Binding:source");

/// The target property of a binding changed.
pub const TARGET_CONTEXT: SubscriberContext = SubscriberContext::new("Binding:target");

/// Receiver of change notifications.
pub trait Subscriber {
    fn handle_change(
        &self,
        context: SubscriberContext,
        new_value: &Value,
        old_value: &Value,
        flags: BindingFlags,
    ) -> Result<(), BindingError>;
}

struct SubscriberEntry {
    context: SubscriberContext,
    subscriber: Weak<dyn Subscriber>,
}

fn same_subscriber(a: &Weak<dyn Subscriber>, b: &Weak<dyn Subscriber>) -> bool {
    std::ptr::addr_eq(a.as_ptr(), b.as_ptr())
}

/// Ordered set of `(context, subscriber)` pairs.
#[derive(Default)]
pub struct SubscriberCollection {
    entries: RefCell<Vec<SubscriberEntry>>,
}

impl SubscriberCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber. Returns `false` if the pair was already present.
    pub fn add_subscriber(&self, context: SubscriberContext, subscriber: Weak<dyn Subscriber>) -> bool {
        let mut entries = self.entries.borrow_mut();
        if entries
            .iter()
            .any(|e| e.context == context && same_subscriber(&e.subscriber, &subscriber))
        {
            return false;
        }
        entries.push(SubscriberEntry {
            context,
            subscriber,
        });
        true
    }

    /// Remove a subscriber. Returns `true` if the pair was present.
    pub fn remove_subscriber(&self, context: SubscriberContext, subscriber: &Weak<dyn Subscriber>) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|e| !(e.context == context && same_subscriber(&e.subscriber, subscriber)));
        entries.len() != before
    }

    /// Whether any live subscriber remains.
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }

    /// Number of live subscribers. Dead entries are pruned.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut entries = self.entries.borrow_mut();
        entries.retain(|e| e.subscriber.strong_count() > 0);
        entries.len()
    }

    /// Whether `subscriber` is registered under `context`.
    #[must_use]
    pub fn contains(&self, context: SubscriberContext, subscriber: &Weak<dyn Subscriber>) -> bool {
        self.entries
            .borrow()
            .iter()
            .any(|e| e.context == context && same_subscriber(&e.subscriber, subscriber))
    }

    /// Notify every live subscriber.
    ///
    /// The subscriber list is snapshotted first, so callbacks may freely
    /// subscribe or unsubscribe. The first error aborts the fan-out.
    pub fn call_subscribers(
        &self,
        new_value: &Value,
        old_value: &Value,
        flags: BindingFlags,
    ) -> Result<(), BindingError> {
        let snapshot: Vec<(SubscriberContext, Weak<dyn Subscriber>)> = {
            let mut entries = self.entries.borrow_mut();
            entries.retain(|e| e.subscriber.strong_count() > 0);
            entries
                .iter()
                .map(|e| (e.context, e.subscriber.clone()))
                .collect()
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(
            subscribers = snapshot.len(),
            operation = ?flags.operation(),
            "call_subscribers"
        );

        for (context, subscriber) in snapshot {
            if let Some(subscriber) = subscriber.upgrade() {
                subscriber.handle_change(context, new_value, old_value, flags)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SubscriberCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberCollection")
            .field("subscribers", &self.entries.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    const OTHER: SubscriberContext = SubscriberContext::new("test:other");

    #[derive(Default)]
    struct Log {
        calls: RefCell<Vec<(SubscriberContext, Value)>>,
    }

    impl Subscriber for Log {
        fn handle_change(
            &self,
            context: SubscriberContext,
            new_value: &Value,
            _old_value: &Value,
            _flags: BindingFlags,
        ) -> Result<(), BindingError> {
            self.calls.borrow_mut().push((context, new_value.clone()));
            Ok(())
        }
    }

    fn weak(log: &Rc<Log>) -> Weak<dyn Subscriber> {
        let weak: Weak<Log> = Rc::downgrade(log);
        weak
    }

    #[test]
    fn add_is_idempotent_per_context() {
        let coll = SubscriberCollection::new();
        let log = Rc::new(Log::default());
        assert!(coll.add_subscriber(SOURCE_CONTEXT, weak(&log)));
        assert!(!coll.add_subscriber(SOURCE_CONTEXT, weak(&log)));
        assert!(coll.add_subscriber(OTHER, weak(&log)));
        assert_eq!(coll.subscriber_count(), 2);
    }

    #[test]
    fn remove_reports_presence() {
        let coll = SubscriberCollection::new();
        let log = Rc::new(Log::default());
        coll.add_subscriber(SOURCE_CONTEXT, weak(&log));
        assert!(coll.remove_subscriber(SOURCE_CONTEXT, &weak(&log)));
        assert!(!coll.remove_subscriber(SOURCE_CONTEXT, &weak(&log)));
        assert!(!coll.has_subscribers());
    }

    #[test]
    fn notifies_in_registration_order_with_context() {
        let coll = SubscriberCollection::new();
        let log = Rc::new(Log::default());
        coll.add_subscriber(OTHER, weak(&log));
        coll.add_subscriber(SOURCE_CONTEXT, weak(&log));
        coll.call_subscribers(&Value::from(1), &Value::Undefined, BindingFlags::empty())
            .unwrap();
        let calls = log.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, OTHER);
        assert_eq!(calls[1].0, SOURCE_CONTEXT);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let coll = SubscriberCollection::new();
        let log = Rc::new(Log::default());
        coll.add_subscriber(SOURCE_CONTEXT, weak(&log));
        drop(log);
        assert!(!coll.has_subscribers());
        coll.call_subscribers(&Value::Null, &Value::Null, BindingFlags::empty())
            .unwrap();
    }

    struct Unsubscriber {
        coll: Rc<SubscriberCollection>,
        me: RefCell<Option<Weak<dyn Subscriber>>>,
        hits: RefCell<usize>,
    }

    impl Subscriber for Unsubscriber {
        fn handle_change(
            &self,
            context: SubscriberContext,
            _new_value: &Value,
            _old_value: &Value,
            _flags: BindingFlags,
        ) -> Result<(), BindingError> {
            *self.hits.borrow_mut() += 1;
            if let Some(me) = self.me.borrow().as_ref() {
                self.coll.remove_subscriber(context, me);
            }
            Ok(())
        }
    }

    #[test]
    fn unsubscribe_during_notification_is_safe() {
        let coll = Rc::new(SubscriberCollection::new());
        let sub = Rc::new(Unsubscriber {
            coll: Rc::clone(&coll),
            me: RefCell::new(None),
            hits: RefCell::new(0),
        });
        let me: Weak<dyn Subscriber> = {
            let weak: Weak<Unsubscriber> = Rc::downgrade(&sub);
            weak
        };
        *sub.me.borrow_mut() = Some(me.clone());
        coll.add_subscriber(SOURCE_CONTEXT, me);

        coll.call_subscribers(&Value::Null, &Value::Null, BindingFlags::empty())
            .unwrap();
        coll.call_subscribers(&Value::Null, &Value::Null, BindingFlags::empty())
            .unwrap();
        assert_eq!(*sub.hits.borrow(), 1);
        assert!(!coll.has_subscribers());
    }
}
