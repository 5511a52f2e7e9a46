#![forbid(unsafe_code)]

//! Version-stamped dependency tracking.
//!
//! A connect pass bumps the tracker's version, lets the expression report
//! every property it reads, then drops whatever was not re-stamped. The
//! subscription set therefore always equals the read set of the latest pass
//! without diffing full before/after sets.
//!
//! # Invariants
//!
//! 1. Each observer is subscribed at most once per tracker, however often a
//!    pass touches it.
//! 2. After [`DependencyTracker::unobserve_stale`], every held observer
//!    carries the current version.
//! 3. No borrow is held while subscribing or unsubscribing.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use tether_core::{PropertyObserver, SOURCE_CONTEXT, Subscriber};

struct ObservedSlot {
    observer: Rc<dyn PropertyObserver>,
    version: u64,
}

fn observer_key(observer: &Rc<dyn PropertyObserver>) -> usize {
    Rc::as_ptr(observer) as *const () as usize
}

/// Per-binding map from observed property to the version that last saw it.
#[derive(Default)]
pub struct DependencyTracker {
    version: Cell<u64>,
    observed: RefCell<AHashMap<usize, ObservedSlot>>,
}

impl DependencyTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.get()
    }

    /// Start a connect pass.
    pub fn begin_pass(&self) -> u64 {
        let next = self.version.get() + 1;
        self.version.set(next);
        next
    }

    /// Record a read of `observer` in the current pass.
    pub fn observe(&self, observer: Rc<dyn PropertyObserver>, subscriber: &Weak<dyn Subscriber>) {
        let version = self.version.get();
        let key = observer_key(&observer);
        let is_new = {
            let mut observed = self.observed.borrow_mut();
            match observed.get_mut(&key) {
                Some(slot) => {
                    slot.version = version;
                    false
                }
                None => {
                    observed.insert(
                        key,
                        ObservedSlot {
                            observer: Rc::clone(&observer),
                            version,
                        },
                    );
                    true
                }
            }
        };
        if is_new {
            observer.subscribe(SOURCE_CONTEXT, subscriber.clone());
        }
    }

    /// Drop every observer not touched by the current pass.
    pub fn unobserve_stale(&self, subscriber: &Weak<dyn Subscriber>) -> usize {
        let version = self.version.get();
        let mut stale = Vec::new();
        self.observed.borrow_mut().retain(|_, slot| {
            if slot.version == version {
                true
            } else {
                stale.push(Rc::clone(&slot.observer));
                false
            }
        });
        for observer in &stale {
            observer.unsubscribe(SOURCE_CONTEXT, subscriber);
        }
        stale.len()
    }

    /// Drop every observer.
    pub fn unobserve_all(&self, subscriber: &Weak<dyn Subscriber>) -> usize {
        let all: Vec<_> = self
            .observed
            .borrow_mut()
            .drain()
            .map(|(_, slot)| slot.observer)
            .collect();
        for observer in &all {
            observer.unsubscribe(SOURCE_CONTEXT, subscriber);
        }
        all.len()
    }

    /// Number of observers currently subscribed.
    #[must_use]
    pub fn observed_count(&self) -> usize {
        self.observed.borrow().len()
    }

    /// Whether `observer` is currently subscribed.
    #[must_use]
    pub fn is_observing(&self, observer: &Rc<dyn PropertyObserver>) -> bool {
        self.observed.borrow().contains_key(&observer_key(observer))
    }
}

impl std::fmt::Debug for DependencyTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyTracker")
            .field("version", &self.version.get())
            .field("observed", &self.observed_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{BindingError, BindingFlags, ObjectRef, SubscriberContext, Value};

    struct Sink;

    impl Subscriber for Sink {
        fn handle_change(
            &self,
            _context: SubscriberContext,
            _new_value: &Value,
            _old_value: &Value,
            _flags: BindingFlags,
        ) -> Result<(), BindingError> {
            Ok(())
        }
    }

    fn observer(obj: &ObjectRef, name: &str) -> Rc<dyn PropertyObserver> {
        obj.property_observer(name).unwrap()
    }

    #[test]
    fn stale_observers_are_dropped() {
        let sink = Rc::new(Sink);
        let weak: Weak<dyn Subscriber> = {
            let weak: Weak<Sink> = Rc::downgrade(&sink);
            weak
        };
        let obj = ObjectRef::new();
        let tracker = DependencyTracker::new();

        tracker.begin_pass();
        tracker.observe(observer(&obj, "a"), &weak);
        tracker.observe(observer(&obj, "b"), &weak);
        tracker.observe(observer(&obj, "a"), &weak);
        assert_eq!(tracker.unobserve_stale(&weak), 0);
        assert_eq!(tracker.observed_count(), 2);
        assert_eq!(obj.existing_observer("a").unwrap().subscriber_count(), 1);

        tracker.begin_pass();
        tracker.observe(observer(&obj, "a"), &weak);
        tracker.observe(observer(&obj, "c"), &weak);
        assert_eq!(tracker.unobserve_stale(&weak), 1);
        assert!(!obj.existing_observer("b").unwrap().has_subscribers());
        assert!(obj.existing_observer("c").unwrap().has_subscribers());
        assert!(tracker.is_observing(&observer(&obj, "a")));

        assert_eq!(tracker.unobserve_all(&weak), 2);
        assert!(!obj.existing_observer("a").unwrap().has_subscribers());
    }
}
