#![forbid(unsafe_code)]

//! Deterministic fixtures for exercising tether end to end.
//!
//! [`Fixture`] wires the standard services to a [`ManualClock`], installs the
//! DOM-aware observer locator and owns a [`Document`]. Time only moves when
//! a test calls [`Fixture::advance`], which fires due timers in deadline
//! order and flushes the task queue after each one.
//!
//! [`Recorder`] is a subscriber that keeps every notification it receives.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tether_core::{
    BindingError, BindingFlags, BindingMode, ExpressionRef, Subscriber, SubscriberContext, Value,
};
use tether_dom::{Document, DomObserverLocator, Node};
use tether_runtime::{
    Binding, Call, Clock, DelegationStrategy, DirtyChecker, Listener, ManualClock, ObserverLocator,
    RuntimeConfig, Services, TaskQueue, TimerQueue,
};

/// Services, document and clock for one test.
pub struct Fixture {
    clock: Rc<ManualClock>,
    services: Rc<Services>,
    document: Rc<Document>,
    dom_locator: Rc<DomObserverLocator>,
    tasks: Rc<TaskQueue>,
    timers: Rc<TimerQueue>,
}

impl Fixture {
    /// A fixture with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        match Self::with_config(RuntimeConfig::default()) {
            Ok(fixture) => fixture,
            Err(err) => panic!("default configuration rejected: {err}"),
        }
    }

    pub fn with_config(config: RuntimeConfig) -> Result<Self, BindingError> {
        config.validate()?;
        let clock = Rc::new(ManualClock::new());
        let services = Services::standard(config, Rc::clone(&clock) as Rc<dyn Clock>);
        let dom_locator = DomObserverLocator::install(&services)?;
        let tasks = services.require::<TaskQueue>()?;
        let timers = services.require::<TimerQueue>()?;
        let document = Document::new(Rc::clone(&tasks));
        tracing::debug!("fixture ready");
        Ok(Self {
            clock,
            services,
            document,
            dom_locator,
            tasks,
            timers,
        })
    }

    #[must_use]
    pub fn services(&self) -> &Rc<Services> {
        &self.services
    }

    #[must_use]
    pub fn document(&self) -> &Rc<Document> {
        &self.document
    }

    #[must_use]
    pub fn clock(&self) -> &Rc<ManualClock> {
        &self.clock
    }

    #[must_use]
    pub fn tasks(&self) -> &Rc<TaskQueue> {
        &self.tasks
    }

    #[must_use]
    pub fn timers(&self) -> &Rc<TimerQueue> {
        &self.timers
    }

    #[must_use]
    pub fn dom_locator(&self) -> &Rc<DomObserverLocator> {
        &self.dom_locator
    }

    pub fn dirty_checker(&self) -> Result<Rc<DirtyChecker>, BindingError> {
        self.services.require::<DirtyChecker>()
    }

    #[must_use]
    pub fn observer_locator(&self) -> Rc<dyn ObserverLocator> {
        Rc::clone(&self.dom_locator) as Rc<dyn ObserverLocator>
    }

    /// A property binding resolved through the DOM-aware locator.
    #[must_use]
    pub fn binding(
        &self,
        source: ExpressionRef,
        target: Value,
        property: &str,
        mode: BindingMode,
    ) -> Rc<Binding> {
        Binding::new(
            source,
            target,
            property,
            mode,
            self.observer_locator(),
            Rc::clone(&self.services) as _,
        )
    }

    /// An event listener on `target` using the document's event manager.
    #[must_use]
    pub fn listener(
        &self,
        event: &str,
        strategy: DelegationStrategy,
        source: ExpressionRef,
        target: &Rc<Node>,
        prevent_default: bool,
    ) -> Rc<Listener> {
        Listener::new(
            event,
            strategy,
            source,
            target.to_value(),
            prevent_default,
            Rc::clone(self.document.event_manager()) as _,
            Rc::clone(&self.services) as _,
        )
    }

    #[must_use]
    pub fn call(&self, source: ExpressionRef, target: Value, property: &str) -> Rc<Call> {
        Call::new(
            source,
            target,
            property,
            self.observer_locator(),
            Rc::clone(&self.services) as _,
        )
    }

    /// End the current synchronous turn.
    pub fn flush(&self) -> Result<(), BindingError> {
        self.tasks.flush()
    }

    /// Move the clock forward by `by`, firing timers as their deadlines pass.
    ///
    /// Returns how many timer callbacks ran. Timers scheduled by a callback
    /// fire in the same call when their deadline also falls inside the window.
    pub fn advance(&self, by: Duration) -> Result<usize, BindingError> {
        let end = self.clock.now() + by;
        let mut fired = 0;
        while let Some(deadline) = self.timers.next_deadline() {
            if deadline > end {
                break;
            }
            self.clock.set(deadline.max(self.clock.now()));
            fired += self.timers.run_due()?;
            self.tasks.flush()?;
        }
        self.clock.set(end);
        Ok(fired)
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Fixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fixture")
            .field("now", &self.clock.now())
            .field("tasks", &self.tasks.pending())
            .field("timers", &self.timers.pending())
            .finish()
    }
}

/// One notification seen by a [`Recorder`].
#[derive(Debug, Clone)]
pub struct Change {
    pub context: SubscriberContext,
    pub new_value: Value,
    pub old_value: Value,
    pub flags: BindingFlags,
}

/// Subscriber that records every change it is handed.
#[derive(Debug, Default)]
pub struct Recorder {
    changes: RefCell<Vec<Change>>,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// A weak subscriber handle for `subscribe`/`unsubscribe`.
    #[must_use]
    pub fn handle(self: &Rc<Self>) -> Weak<dyn Subscriber> {
        let weak: Weak<Recorder> = Rc::downgrade(self);
        weak
    }

    #[must_use]
    pub fn changes(&self) -> Vec<Change> {
        self.changes.borrow().clone()
    }

    /// The new values, in notification order.
    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.changes
            .borrow()
            .iter()
            .map(|change| change.new_value.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.changes.borrow_mut().clear();
    }
}

impl Subscriber for Recorder {
    fn handle_change(
        &self,
        context: SubscriberContext,
        new_value: &Value,
        old_value: &Value,
        flags: BindingFlags,
    ) -> Result<(), BindingError> {
        self.changes.borrow_mut().push(Change {
            context,
            new_value: new_value.clone(),
            old_value: old_value.clone(),
            flags,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_fires_timers_in_order() {
        let fixture = Fixture::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for (label, ms) in [("late", 50_u64), ("early", 10)] {
            let sink = Rc::clone(&order);
            tether_runtime::Timer::schedule(
                &*fixture.timers,
                Duration::from_millis(ms),
                Box::new(move || {
                    sink.borrow_mut().push(label);
                    Ok(())
                }),
            );
        }
        assert_eq!(fixture.advance(Duration::from_millis(20)).unwrap(), 1);
        assert_eq!(fixture.advance(Duration::from_millis(40)).unwrap(), 1);
        assert_eq!(order.borrow().as_slice(), ["early", "late"]);
        assert_eq!(fixture.clock.now(), Duration::from_millis(60));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = RuntimeConfig::default().with_dirty_check_interval(Duration::ZERO);
        assert!(matches!(
            Fixture::with_config(config),
            Err(BindingError::InvalidConfig(_))
        ));
    }

    #[test]
    fn recorder_keeps_notifications() {
        let recorder = Recorder::new();
        recorder
            .handle_change(
                SubscriberContext::new("test"),
                &Value::from(1),
                &Value::Undefined,
                BindingFlags::empty(),
            )
            .unwrap();
        assert_eq!(recorder.values(), [Value::from(1)]);
        recorder.clear();
        assert!(recorder.is_empty());
    }
}
