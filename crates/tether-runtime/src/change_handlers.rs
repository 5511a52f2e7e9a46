#![forbid(unsafe_code)]

//! Per-component-type change reactions.
//!
//! A [`ChangeHandlers`] table maps observed property names to reactions. It is
//! built once per component type, through [`ChangeHandlers::builder`] or the
//! [`ChangeHandlers::discover`] shorthand, and cached in a [`ComponentRegistry`].
//! [`ChangeHandlers::observe`] then subscribes one instance.
//!
//! # Invariants
//!
//! 1. A reaction fires only while the instance's bound flag is set.
//! 2. Dropping the [`ChangeSubscription`] unsubscribes every property.
//! 3. The registry builds each type's table at most once.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use tether_core::{
    Accessor, BindingError, BindingFlags, ObjectRef, PropertyObserver, Subscribable, Subscriber,
    SubscriberContext, Value,
};

use crate::observer_locator::ObserverLocator;

/// Context under which change reactions subscribe.
pub const CHANGE_HANDLER_CONTEXT: SubscriberContext = SubscriberContext::new("ChangeHandler");

const CHANGED_SUFFIX: &str = "Changed";

/// Reaction to a property change: `(instance, new_value)`.
pub type ChangeCallback = Rc<dyn Fn(&ObjectRef, &Value) -> Result<(), BindingError>>;

struct Entry {
    property: Rc<str>,
    callback: ChangeCallback,
}

/// Property-to-reaction table for one component type.
pub struct ChangeHandlers {
    type_name: Rc<str>,
    entries: Vec<Entry>,
}

/// Builder for [`ChangeHandlers`].
pub struct ChangeHandlersBuilder {
    type_name: Rc<str>,
    entries: Vec<Entry>,
}

impl ChangeHandlersBuilder {
    /// Register `callback` for `property`. A later registration for the same
    /// property replaces the earlier one.
    #[must_use]
    pub fn on(
        mut self,
        property: &str,
        callback: impl Fn(&ObjectRef, &Value) -> Result<(), BindingError> + 'static,
    ) -> Self {
        self.entries.retain(|entry| &*entry.property != property);
        self.entries.push(Entry {
            property: Rc::from(property),
            callback: Rc::new(callback),
        });
        self
    }

    #[must_use]
    pub fn build(self) -> ChangeHandlers {
        ChangeHandlers {
            type_name: self.type_name,
            entries: self.entries,
        }
    }
}

impl ChangeHandlers {
    #[must_use]
    pub fn builder(type_name: &str) -> ChangeHandlersBuilder {
        ChangeHandlersBuilder {
            type_name: Rc::from(type_name),
            entries: Vec::new(),
        }
    }

    /// Convenience over [`builder`](Self::builder): one explicit entry per
    /// `<name>Changed` function on `prototype`.
    ///
    /// Each function is captured when the table is built, so the result is
    /// the same table the builder would produce; nothing is looked up by name
    /// when a change fires.
    #[must_use]
    pub fn discover(type_name: &str, prototype: &ObjectRef) -> Self {
        let mut builder = Self::builder(type_name);
        for key in prototype.keys() {
            let Some(property) = key.strip_suffix(CHANGED_SUFFIX) else {
                continue;
            };
            if property.is_empty() {
                continue;
            }
            let Value::Function(handler) = prototype.get(&key) else {
                continue;
            };
            builder = builder.on(property, move |_, value| {
                handler.call(std::slice::from_ref(value)).map(|_| ())
            });
        }
        builder.build()
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Observed property names, in registration order.
    pub fn properties(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| &*entry.property)
    }

    /// Subscribe `instance` to every registered property.
    pub fn observe(
        &self,
        instance: &ObjectRef,
        locator: &dyn ObserverLocator,
        is_bound: Rc<Cell<bool>>,
    ) -> Result<ChangeSubscription, BindingError> {
        let target = Value::from(instance.clone());
        let mut links = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let observer = locator.get_observer(&target, &entry.property)?;
            let reaction = Rc::new(Reaction {
                instance: instance.clone(),
                property: Rc::clone(&entry.property),
                callback: Rc::clone(&entry.callback),
                is_bound: Rc::clone(&is_bound),
            });
            let weak: Weak<Reaction> = Rc::downgrade(&reaction);
            observer.subscribe(CHANGE_HANDLER_CONTEXT, weak);
            links.push(Link { observer, reaction });
        }
        tracing::debug!(
            component = %self.type_name,
            properties = links.len(),
            "change handlers observing"
        );
        Ok(ChangeSubscription { links })
    }
}

impl std::fmt::Debug for ChangeHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeHandlers")
            .field("type_name", &self.type_name)
            .field("properties", &self.properties().collect::<Vec<_>>())
            .finish()
    }
}

struct Reaction {
    instance: ObjectRef,
    property: Rc<str>,
    callback: ChangeCallback,
    is_bound: Rc<Cell<bool>>,
}

impl Subscriber for Reaction {
    fn handle_change(
        &self,
        _context: SubscriberContext,
        new_value: &Value,
        _old_value: &Value,
        _flags: BindingFlags,
    ) -> Result<(), BindingError> {
        if !self.is_bound.get() {
            return Ok(());
        }
        tracing::trace!(property = %self.property, "change handler");
        (self.callback)(&self.instance, new_value)
    }
}

struct Link {
    observer: Rc<dyn PropertyObserver>,
    reaction: Rc<Reaction>,
}

/// Live subscriptions of one instance. Unsubscribes on drop.
pub struct ChangeSubscription {
    links: Vec<Link>,
}

impl ChangeSubscription {
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Invoke every reaction with the property's current value, regardless
    /// of the bound flag. Used once the instance finishes binding.
    pub fn fire_initial(&self) -> Result<(), BindingError> {
        for link in &self.links {
            let reaction = &link.reaction;
            let value = link.observer.get_value();
            (reaction.callback)(&reaction.instance, &value)?;
        }
        Ok(())
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        for link in self.links.drain(..) {
            let weak: Weak<dyn Subscriber> = {
                let weak: Weak<Reaction> = Rc::downgrade(&link.reaction);
                weak
            };
            link.observer.unsubscribe(CHANGE_HANDLER_CONTEXT, &weak);
        }
    }
}

impl std::fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("properties", &self.links.len())
            .finish()
    }
}

/// Cache of change-handler tables, keyed by component type name.
#[derive(Default)]
pub struct ComponentRegistry {
    tables: RefCell<AHashMap<Rc<str>, Rc<ChangeHandlers>>>,
}

impl ComponentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The table for `type_name`, building it with `build` on first request.
    pub fn get_or_build(
        &self,
        type_name: &str,
        build: impl FnOnce() -> ChangeHandlers,
    ) -> Rc<ChangeHandlers> {
        if let Some(existing) = self.tables.borrow().get(type_name) {
            return Rc::clone(existing);
        }
        let table = Rc::new(build());
        tracing::debug!(component = type_name, properties = table.len(), "change handlers built");
        self.tables
            .borrow_mut()
            .insert(Rc::from(type_name), Rc::clone(&table));
        table
    }

    #[must_use]
    pub fn get(&self, type_name: &str) -> Option<Rc<ChangeHandlers>> {
        self.tables.borrow().get(type_name).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.borrow().is_empty()
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("types", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirty_checker::DirtyChecker;
    use crate::observer_locator::DefaultObserverLocator;
    use crate::timer::{Clock, ManualClock, Timer, TimerQueue};
    use std::time::Duration;
    use tether_core::Callable;

    fn locator() -> DefaultObserverLocator {
        let clock: Rc<dyn Clock> = Rc::new(ManualClock::new());
        let timers: Rc<dyn Timer> = Rc::new(TimerQueue::new(clock));
        DefaultObserverLocator::new(DirtyChecker::new(timers, Duration::from_millis(120)))
    }

    #[test]
    fn reactions_fire_only_while_bound() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let table = ChangeHandlers::builder("counter")
            .on("count", move |_, value| {
                sink.borrow_mut().push(value.clone());
                Ok(())
            })
            .build();
        let instance = ObjectRef::from_pairs([("count", 0)]);
        let bound = Rc::new(Cell::new(false));
        let subscription = table.observe(&instance, &locator(), Rc::clone(&bound)).unwrap();

        instance.set("count", 1).unwrap();
        bound.set(true);
        instance.set("count", 2).unwrap();
        assert_eq!(seen.borrow().as_slice(), [Value::from(2)]);

        drop(subscription);
        instance.set("count", 3).unwrap();
        assert_eq!(seen.borrow().len(), 1);
        assert!(!instance.existing_observer("count").unwrap().has_subscribers());
    }

    #[test]
    fn discovers_changed_functions() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&calls);
        let prototype = ObjectRef::from_pairs([("name", "a")]);
        prototype
            .set(
                "nameChanged",
                Callable::new(move |args| {
                    sink.borrow_mut().push(args[0].clone());
                    Ok(Value::Undefined)
                }),
            )
            .unwrap();
        prototype.set("Changed", 1).unwrap();

        let table = ChangeHandlers::discover("person", &prototype);
        assert_eq!(table.properties().collect::<Vec<_>>(), ["name"]);

        let subscription = table
            .observe(&prototype, &locator(), Rc::new(Cell::new(true)))
            .unwrap();
        subscription.fire_initial().unwrap();
        prototype.set("name", "b").unwrap();
        assert_eq!(
            calls.borrow().as_slice(),
            [Value::from("a"), Value::from("b")]
        );
    }

    #[test]
    fn discovered_reactions_are_fixed_at_build_time() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let prototype = ObjectRef::from_pairs([("name", "a")]);
        prototype
            .set(
                "nameChanged",
                Callable::new(move |_| {
                    counter.set(counter.get() + 1);
                    Ok(Value::Undefined)
                }),
            )
            .unwrap();
        let table = ChangeHandlers::discover("person", &prototype);

        prototype.set("nameChanged", Value::Null).unwrap();
        let subscription = table
            .observe(&prototype, &locator(), Rc::new(Cell::new(true)))
            .unwrap();
        prototype.set("name", "b").unwrap();
        assert_eq!(calls.get(), 1);
        drop(subscription);
    }

    #[test]
    fn registry_builds_once() {
        let registry = ComponentRegistry::new();
        let builds = Cell::new(0);
        for _ in 0..3 {
            registry.get_or_build("widget", || {
                builds.set(builds.get() + 1);
                ChangeHandlers::builder("widget").build()
            });
        }
        assert_eq!(builds.get(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("widget").is_some());
    }
}
