#![forbid(unsafe_code)]

//! Resolves observers and accessors for `(target, property)` pairs.
//!
//! | Target | `get_observer` | `get_accessor` |
//! |--------|----------------|----------------|
//! | Interceptable object property | [`SetterObserver`](tether_core::SetterObserver) | [`PropertyAccessor`] |
//! | Opaque object / getter property | [`DirtyCheckProperty`] | [`PropertyAccessor`] |
//! | Host object | [`DirtyCheckProperty`] | [`PropertyAccessor`] |
//! | Anything else | `UnsupportedTarget` | `UnsupportedTarget` |
//!
//! Dirty-check observers are cached per `(target, property)` so every
//! binding on the same polled property shares one snapshot. The cache holds
//! them weakly; a live observer keeps its target alive, so a cached address
//! can never be reused by a different target while its entry is live.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use tether_core::{
    Accessor, ArrayObserver, ArrayRef, BindingError, BindingFlags, PropertyObserver, Value,
};

use crate::dirty_checker::{DirtyCheckProperty, DirtyChecker};

/// Source of observers and accessors for binding targets and sources.
pub trait ObserverLocator {
    /// A change-notifying observer.
    fn get_observer(
        &self,
        target: &Value,
        property: &str,
    ) -> Result<Rc<dyn PropertyObserver>, BindingError>;

    /// A plain read/write accessor, for targets that never report changes back.
    fn get_accessor(&self, target: &Value, property: &str) -> Result<Rc<dyn Accessor>, BindingError>;

    fn get_array_observer(&self, array: &ArrayRef) -> Rc<ArrayObserver> {
        array.observer()
    }
}

/// Write `value` to `target.name`.
pub fn write_property(
    target: &Value,
    name: &str,
    value: Value,
    flags: BindingFlags,
) -> Result<(), BindingError> {
    match target {
        Value::Object(object) => object.set_with_flags(name, value, flags),
        Value::Host(host) => host.set_property(name, value),
        other => Err(BindingError::UnsupportedTarget {
            target: other.type_name(),
            property: name.to_string(),
        }),
    }
}

fn ensure_observable(target: &Value, property: &str) -> Result<(), BindingError> {
    match target {
        Value::Object(_) | Value::Host(_) => Ok(()),
        other => Err(BindingError::UnsupportedTarget {
            target: other.type_name(),
            property: property.to_string(),
        }),
    }
}

/// Non-notifying accessor over an object or host property.
#[derive(Debug, Clone)]
pub struct PropertyAccessor {
    target: Value,
    name: Rc<str>,
}

impl PropertyAccessor {
    #[must_use]
    pub fn new(target: Value, name: &str) -> Self {
        Self {
            target,
            name: Rc::from(name),
        }
    }
}

impl Accessor for PropertyAccessor {
    fn get_value(&self) -> Value {
        self.target.get_property(&self.name)
    }

    fn set_value(&self, value: Value, flags: BindingFlags) -> Result<(), BindingError> {
        write_property(&self.target, &self.name, value, flags)
    }
}

/// Locator for plain objects and host objects.
pub struct DefaultObserverLocator {
    dirty_checker: Rc<DirtyChecker>,
    dirty_cache: RefCell<AHashMap<(usize, Rc<str>), Weak<DirtyCheckProperty>>>,
}

impl DefaultObserverLocator {
    #[must_use]
    pub fn new(dirty_checker: Rc<DirtyChecker>) -> Self {
        Self {
            dirty_checker,
            dirty_cache: RefCell::new(AHashMap::new()),
        }
    }

    #[must_use]
    pub fn dirty_checker(&self) -> &Rc<DirtyChecker> {
        &self.dirty_checker
    }

    /// The shared dirty-check observer for `target.property`.
    pub fn dirty_check_property(
        &self,
        target: &Value,
        property: &str,
    ) -> Result<Rc<DirtyCheckProperty>, BindingError> {
        ensure_observable(target, property)?;
        let identity = target.identity().unwrap_or_default();
        let key = (identity, Rc::from(property));

        let mut cache = self.dirty_cache.borrow_mut();
        if let Some(existing) = cache.get(&key).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        cache.retain(|_, weak| weak.strong_count() > 0);

        tracing::debug!(
            target = target.type_name(),
            property,
            "falling back to dirty checking"
        );
        let created = self.dirty_checker.create_property(target.clone(), property);
        cache.insert(key, Rc::downgrade(&created));
        Ok(created)
    }
}

impl ObserverLocator for DefaultObserverLocator {
    fn get_observer(
        &self,
        target: &Value,
        property: &str,
    ) -> Result<Rc<dyn PropertyObserver>, BindingError> {
        if let Value::Object(object) = target {
            if let Some(observer) = object.property_observer(property) {
                return Ok(observer);
            }
        }
        Ok(self.dirty_check_property(target, property)?)
    }

    fn get_accessor(&self, target: &Value, property: &str) -> Result<Rc<dyn Accessor>, BindingError> {
        ensure_observable(target, property)?;
        Ok(Rc::new(PropertyAccessor::new(target.clone(), property)))
    }
}

impl std::fmt::Debug for DefaultObserverLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultObserverLocator")
            .field("dirty_checker", &self.dirty_checker)
            .field("cached", &self.dirty_cache.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::{Clock, ManualClock, Timer, TimerQueue};
    use std::time::Duration;
    use tether_core::ObjectRef;

    fn locator() -> DefaultObserverLocator {
        let clock: Rc<dyn Clock> = Rc::new(ManualClock::new());
        let timers: Rc<dyn Timer> = Rc::new(TimerQueue::new(clock));
        DefaultObserverLocator::new(DirtyChecker::new(timers, Duration::from_millis(120)))
    }

    #[test]
    fn interceptable_property_gets_setter_observer() {
        let locator = locator();
        let obj = ObjectRef::new();
        let observer = locator.get_observer(&Value::from(obj.clone()), "x").unwrap();
        let setter = obj.existing_observer("x").unwrap();
        assert!(std::ptr::addr_eq(Rc::as_ptr(&observer), Rc::as_ptr(&setter)));
    }

    #[test]
    fn opaque_property_is_dirty_checked_and_shared() {
        let locator = locator();
        let obj = Value::from(ObjectRef::opaque());
        let a = locator.dirty_check_property(&obj, "x").unwrap();
        let b = locator.dirty_check_property(&obj, "x").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        let other = locator.dirty_check_property(&obj, "y").unwrap();
        assert!(!Rc::ptr_eq(&a, &other));
    }

    #[test]
    fn getter_property_is_dirty_checked() {
        let locator = locator();
        let obj = ObjectRef::new();
        obj.define_getter("full", |_| Value::from("computed"));
        let observer = locator.get_observer(&Value::from(obj.clone()), "full").unwrap();
        assert_eq!(observer.get_value(), Value::from("computed"));
        assert!(obj.existing_observer("full").is_none());
    }

    #[test]
    fn primitives_are_rejected() {
        let locator = locator();
        assert!(matches!(
            locator.get_observer(&Value::from(3), "x"),
            Err(BindingError::UnsupportedTarget { target: "number", .. })
        ));
        assert!(locator.get_accessor(&Value::Null, "x").is_err());
    }

    #[test]
    fn accessor_reads_and_writes_without_observing() {
        let locator = locator();
        let obj = ObjectRef::new();
        let accessor = locator.get_accessor(&Value::from(obj.clone()), "x").unwrap();
        accessor.set_value(Value::from(4), BindingFlags::empty()).unwrap();
        assert_eq!(obj.get("x"), Value::from(4));
        assert_eq!(accessor.get_value(), Value::from(4));
        assert!(obj.existing_observer("x").is_none());
    }
}
