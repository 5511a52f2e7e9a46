#![forbid(unsafe_code)]

//! Polling fallback for properties that cannot notify.
//!
//! Opaque objects, getter-defined properties and host objects have no write
//! interception, so the observer locator wraps them in a
//! [`DirtyCheckProperty`]. Subscribed properties join the shared
//! [`DirtyChecker`], which compares each one against a snapshot every
//! `interval` and notifies on strict inequality.
//!
//! # Invariants
//!
//! 1. The poll is scheduled when the tracked list goes from empty to
//!    non-empty, and at most one poll is ever pending.
//! 2. A poll reschedules only if properties remain tracked. Removing the
//!    last tracked property cancels the pending poll, so no tick fires
//!    after the last unsubscribe.
//! 3. Each pass walks the tracked list back to front, so a subscriber
//!    callback that removes properties mid-pass never causes a still-tracked
//!    property to be skipped. A property revisited after such a removal is
//!    clean, its snapshot having just been refreshed.
//! 4. A property's snapshot is updated before its subscribers run, so a
//!    subscriber writing back the same value does not re-trigger.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use tether_core::{
    Accessor, BindingError, BindingFlags, BindingId, BindingOperation, BindingOrigin, Subscribable,
    Subscriber, SubscriberCollection, SubscriberContext, Value,
};

use crate::observer_locator::write_property;
use crate::timer::{Timer, TimerId};

/// Shared polling loop over every dirty-checked property.
pub struct DirtyChecker {
    this: Weak<DirtyChecker>,
    timer: Rc<dyn Timer>,
    interval: Duration,
    tracked: RefCell<Vec<Rc<DirtyCheckProperty>>>,
    scheduled: Cell<Option<TimerId>>,
}

impl DirtyChecker {
    #[must_use]
    pub fn new(timer: Rc<dyn Timer>, interval: Duration) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            timer,
            interval,
            tracked: RefCell::new(Vec::new()),
            scheduled: Cell::new(None),
        })
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wrap `target.name` in a lazily activating dirty-check observer.
    #[must_use]
    pub fn create_property(&self, target: Value, name: &str) -> Rc<DirtyCheckProperty> {
        Rc::new_cyclic(|this| DirtyCheckProperty {
            this: this.clone(),
            checker: self.this.clone(),
            target,
            name: Rc::from(name),
            old_value: RefCell::new(Value::Undefined),
            subscribers: SubscriberCollection::new(),
            flags: BindingFlags::from_id(BindingId::next())
                .with_origin(BindingOrigin::Observer)
                .with_operation(BindingOperation::Change),
        })
    }

    /// Number of properties currently polled.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.tracked.borrow().len()
    }

    /// Whether a poll is pending.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.scheduled.get().is_some()
    }

    fn add_property(&self, property: Rc<DirtyCheckProperty>) {
        let now_tracked = {
            let mut tracked = self.tracked.borrow_mut();
            if !tracked.iter().any(|p| Rc::ptr_eq(p, &property)) {
                tracked.push(property);
            }
            tracked.len()
        };
        tracing::trace!(tracked = now_tracked, "dirty-check property added");
        if !self.is_scheduled() {
            self.schedule();
        }
    }

    fn remove_property(&self, property: &DirtyCheckProperty) {
        let now_empty = {
            let mut tracked = self.tracked.borrow_mut();
            if let Some(index) = tracked
                .iter()
                .position(|p| std::ptr::eq(Rc::as_ptr(p), property))
            {
                tracked.remove(index);
            }
            tracked.is_empty()
        };
        if now_empty {
            if let Some(id) = self.scheduled.take() {
                self.timer.cancel(id);
                tracing::debug!("dirty checking stopped: last property removed");
            }
        }
    }

    fn schedule(&self) {
        let checker = self.this.clone();
        let id = self.timer.schedule(
            self.interval,
            Box::new(move || match checker.upgrade() {
                Some(checker) => checker.tick(),
                None => Ok(()),
            }),
        );
        self.scheduled.set(Some(id));
        tracing::debug!(interval_ms = self.interval.as_millis() as u64, "dirty checking scheduled");
    }

    fn tick(&self) -> Result<(), BindingError> {
        self.scheduled.set(None);
        let result = self.check();
        if self.tracked_count() > 0 {
            if !self.is_scheduled() {
                self.schedule();
            }
        } else {
            tracing::debug!("dirty checking stopped: nothing tracked");
        }
        result
    }

    /// Run one pass over every tracked property.
    ///
    /// Every dirty property is notified even if one fails; the first error is
    /// returned.
    pub fn check(&self) -> Result<(), BindingError> {
        let mut first_error = None;
        let mut index = self.tracked_count();
        while index > 0 {
            index -= 1;
            let property = {
                let tracked = self.tracked.borrow();
                match tracked.get(index) {
                    Some(property) => Rc::clone(property),
                    None => continue,
                }
            };
            if !property.subscribers.has_subscribers() {
                self.remove_property(&property);
                continue;
            }
            if property.is_dirty() {
                if let Err(err) = property.notify() {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for DirtyChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirtyChecker")
            .field("interval", &self.interval)
            .field("tracked", &self.tracked_count())
            .field("scheduled", &self.is_scheduled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// DirtyCheckProperty
// ---------------------------------------------------------------------------

/// Observer for one polled property.
pub struct DirtyCheckProperty {
    this: Weak<DirtyCheckProperty>,
    checker: Weak<DirtyChecker>,
    target: Value,
    name: Rc<str>,
    old_value: RefCell<Value>,
    subscribers: SubscriberCollection,
    flags: BindingFlags,
}

impl DirtyCheckProperty {
    #[must_use]
    pub fn target(&self) -> &Value {
        &self.target
    }

    #[must_use]
    pub fn property_name(&self) -> &str {
        &self.name
    }

    /// Whether the live value differs from the last snapshot.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.old_value.borrow().strict_eq(&self.get_value())
    }

    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.subscribers.has_subscribers()
    }

    fn notify(&self) -> Result<(), BindingError> {
        let new_value = self.get_value();
        let old_value = self.old_value.replace(new_value.clone());
        tracing::trace!(property = %self.name, "dirty-check change detected");
        self.subscribers
            .call_subscribers(&new_value, &old_value, self.flags)
    }
}

impl Accessor for DirtyCheckProperty {
    fn get_value(&self) -> Value {
        self.target.get_property(&self.name)
    }

    /// Writes straight through; subscribers hear about it on the next pass.
    fn set_value(&self, value: Value, flags: BindingFlags) -> Result<(), BindingError> {
        write_property(&self.target, &self.name, value, flags)
    }
}

impl Subscribable for DirtyCheckProperty {
    fn subscribe(&self, context: SubscriberContext, subscriber: Weak<dyn Subscriber>) {
        let first = !self.subscribers.has_subscribers();
        if !self.subscribers.add_subscriber(context, subscriber) || !first {
            return;
        }
        *self.old_value.borrow_mut() = self.get_value();
        if let (Some(checker), Some(this)) = (self.checker.upgrade(), self.this.upgrade()) {
            checker.add_property(this);
        }
    }

    fn unsubscribe(&self, context: SubscriberContext, subscriber: &Weak<dyn Subscriber>) {
        if self.subscribers.remove_subscriber(context, subscriber) && !self.subscribers.has_subscribers() {
            if let Some(checker) = self.checker.upgrade() {
                checker.remove_property(self);
            }
        }
    }
}

impl std::fmt::Debug for DirtyCheckProperty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirtyCheckProperty")
            .field("property", &self.name)
            .field("old_value", &self.old_value.borrow())
            .field("subscribers", &self.subscribers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::{Clock, ManualClock, TimerQueue};
    use tether_core::{ObjectRef, SOURCE_CONTEXT};

    #[derive(Default)]
    struct Seen(RefCell<Vec<Value>>);

    impl Subscriber for Seen {
        fn handle_change(
            &self,
            _context: SubscriberContext,
            new_value: &Value,
            _old_value: &Value,
            _flags: BindingFlags,
        ) -> Result<(), BindingError> {
            self.0.borrow_mut().push(new_value.clone());
            Ok(())
        }
    }

    struct Rig {
        clock: Rc<ManualClock>,
        timers: Rc<TimerQueue>,
        checker: Rc<DirtyChecker>,
    }

    impl Rig {
        fn new() -> Self {
            let clock = Rc::new(ManualClock::new());
            let timers = Rc::new(TimerQueue::new(Rc::clone(&clock) as Rc<dyn Clock>));
            let checker = DirtyChecker::new(
                Rc::clone(&timers) as Rc<dyn Timer>,
                Duration::from_millis(120),
            );
            Self {
                clock,
                timers,
                checker,
            }
        }

        fn tick(&self) {
            self.clock.advance(Duration::from_millis(120));
            self.timers.run_due().unwrap();
        }
    }

    fn weak(seen: &Rc<Seen>) -> Weak<dyn Subscriber> {
        let weak: Weak<Seen> = Rc::downgrade(seen);
        weak
    }

    #[test]
    fn detects_changes_on_poll() {
        let rig = Rig::new();
        let obj = ObjectRef::opaque();
        obj.set("x", 1).unwrap();
        let property = rig.checker.create_property(Value::from(obj.clone()), "x");
        let seen = Rc::new(Seen::default());
        property.subscribe(SOURCE_CONTEXT, weak(&seen));
        assert!(rig.checker.is_scheduled());

        obj.set("x", 2).unwrap();
        assert!(seen.0.borrow().is_empty());
        rig.tick();
        assert_eq!(seen.0.borrow().as_slice(), [Value::from(2)]);

        rig.tick();
        assert_eq!(seen.0.borrow().len(), 1);
    }

    #[test]
    fn loop_self_terminates_after_last_unsubscribe() {
        let rig = Rig::new();
        let obj = ObjectRef::opaque();
        let property = rig.checker.create_property(Value::from(obj), "x");
        let seen = Rc::new(Seen::default());
        property.subscribe(SOURCE_CONTEXT, weak(&seen));
        assert_eq!(rig.checker.tracked_count(), 1);

        property.unsubscribe(SOURCE_CONTEXT, &weak(&seen));
        assert_eq!(rig.checker.tracked_count(), 0);
        assert!(!rig.checker.is_scheduled());
        assert_eq!(rig.timers.pending(), 0);

        rig.clock.advance(Duration::from_millis(120));
        assert_eq!(rig.timers.run_due().unwrap(), 0);
    }

    #[test]
    fn resubscribing_after_cancel_restarts_polling() {
        let rig = Rig::new();
        let obj = ObjectRef::opaque();
        let property = rig.checker.create_property(Value::from(obj.clone()), "x");
        let seen = Rc::new(Seen::default());
        property.subscribe(SOURCE_CONTEXT, weak(&seen));
        property.unsubscribe(SOURCE_CONTEXT, &weak(&seen));
        assert_eq!(rig.timers.pending(), 0);

        property.subscribe(SOURCE_CONTEXT, weak(&seen));
        assert_eq!(rig.timers.pending(), 1);
        obj.set("x", 3).unwrap();
        rig.tick();
        assert_eq!(seen.0.borrow().as_slice(), [Value::from(3)]);
    }

    #[test]
    fn only_one_poll_pending() {
        let rig = Rig::new();
        let obj = ObjectRef::opaque();
        let a = rig.checker.create_property(Value::from(obj.clone()), "a");
        let b = rig.checker.create_property(Value::from(obj), "b");
        let seen = Rc::new(Seen::default());
        a.subscribe(SOURCE_CONTEXT, weak(&seen));
        b.subscribe(SOURCE_CONTEXT, weak(&seen));
        a.unsubscribe(SOURCE_CONTEXT, &weak(&seen));
        a.subscribe(SOURCE_CONTEXT, weak(&seen));
        assert_eq!(rig.timers.pending(), 1);
        rig.tick();
        assert_eq!(rig.timers.pending(), 1);
    }

    #[test]
    fn dropped_subscribers_are_evicted() {
        let rig = Rig::new();
        let property = rig
            .checker
            .create_property(Value::from(ObjectRef::opaque()), "x");
        let seen = Rc::new(Seen::default());
        property.subscribe(SOURCE_CONTEXT, weak(&seen));
        drop(seen);
        rig.tick();
        assert_eq!(rig.checker.tracked_count(), 0);
        assert!(!rig.checker.is_scheduled());
    }

    struct Unsubscribing {
        other: Rc<DirtyCheckProperty>,
        me: RefCell<Option<Weak<dyn Subscriber>>>,
        hits: Cell<usize>,
    }

    impl Subscriber for Unsubscribing {
        fn handle_change(
            &self,
            context: SubscriberContext,
            _new_value: &Value,
            _old_value: &Value,
            _flags: BindingFlags,
        ) -> Result<(), BindingError> {
            self.hits.set(self.hits.get() + 1);
            if let Some(me) = self.me.borrow().as_ref() {
                self.other.unsubscribe(context, me);
            }
            Ok(())
        }
    }

    #[test]
    fn removal_during_pass_is_safe() {
        let rig = Rig::new();
        let obj = ObjectRef::opaque();
        let first = rig.checker.create_property(Value::from(obj.clone()), "a");
        let second = rig.checker.create_property(Value::from(obj.clone()), "b");
        let sub = Rc::new(Unsubscribing {
            other: Rc::clone(&first),
            me: RefCell::new(None),
            hits: Cell::new(0),
        });
        let me: Weak<dyn Subscriber> = {
            let weak: Weak<Unsubscribing> = Rc::downgrade(&sub);
            weak
        };
        *sub.me.borrow_mut() = Some(me.clone());
        first.subscribe(SOURCE_CONTEXT, me.clone());
        second.subscribe(SOURCE_CONTEXT, me);

        obj.set("a", 1).unwrap();
        obj.set("b", 1).unwrap();
        rig.tick();
        // `second` is visited first and unsubscribes `first` before its turn.
        assert_eq!(sub.hits.get(), 1);
        assert_eq!(rig.checker.tracked_count(), 1);
        assert!(!second.is_dirty());
    }
}
