#![forbid(unsafe_code)]

//! Singleton service container.
//!
//! Bindings resolve shared infrastructure (connect queue, task queue, dirty
//! checker) through [`ServiceLocator`]; [`Services`] is the concrete
//! container the host builds once per application.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use tether_core::{BindingError, ServiceLocator};

use crate::config::RuntimeConfig;
use crate::connect_queue::ConnectQueue;
use crate::dirty_checker::DirtyChecker;
use crate::observer_locator::{DefaultObserverLocator, ObserverLocator};
use crate::task_queue::TaskQueue;
use crate::timer::{Clock, Timer, TimerQueue};

/// Type-keyed singleton registry.
#[derive(Default)]
pub struct Services {
    singletons: RefCell<AHashMap<TypeId, Rc<dyn Any>>>,
    observer_locator: RefCell<Option<Rc<dyn ObserverLocator>>>,
}

impl Services {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard runtime services for `config`, timed by `clock`.
    ///
    /// Registers the connect queue, task queue, timer queue, dirty checker,
    /// default observer locator and the configuration itself. `config` is
    /// expected to have passed [`RuntimeConfig::validate`].
    #[must_use]
    pub fn standard(config: RuntimeConfig, clock: Rc<dyn Clock>) -> Rc<Self> {
        let services = Rc::new(Self::new());

        let connect_queue = Rc::new(ConnectQueue::with_immediate(config.connect_queue_immediate));
        let task_queue = Rc::new(TaskQueue::with_limit(
            Rc::clone(&connect_queue),
            config.max_flush_iterations,
        ));
        let timers = Rc::new(TimerQueue::new(clock));
        let timer: Rc<dyn Timer> = Rc::clone(&timers) as Rc<dyn Timer>;
        let dirty_checker = DirtyChecker::new(timer, config.dirty_check_interval);
        let observer_locator = Rc::new(DefaultObserverLocator::new(Rc::clone(&dirty_checker)));

        services.register(connect_queue);
        services.register(task_queue);
        services.register(timers);
        services.register(dirty_checker);
        services.register(Rc::clone(&observer_locator));
        services.set_observer_locator(observer_locator);
        tracing::debug!(
            dirty_check_ms = config.dirty_check_interval.as_millis() as u64,
            connect_queue_immediate = config.connect_queue_immediate,
            max_flush_iterations = config.max_flush_iterations,
            "standard services registered"
        );
        services.register(Rc::new(config));
        services
    }

    /// Register (or replace) the singleton of type `T`.
    pub fn register<T: Any>(&self, service: Rc<T>) {
        self.singletons
            .borrow_mut()
            .insert(TypeId::of::<T>(), service as Rc<dyn Any>);
    }

    #[must_use]
    pub fn resolve<T: Any>(&self) -> Option<Rc<T>> {
        let service = self.singletons.borrow().get(&TypeId::of::<T>()).cloned()?;
        service.downcast::<T>().ok()
    }

    pub fn require<T: Any>(&self) -> Result<Rc<T>, BindingError> {
        self.resolve::<T>()
            .ok_or(BindingError::ServiceMissing(std::any::type_name::<T>()))
    }

    #[must_use]
    pub fn contains<T: Any>(&self) -> bool {
        self.singletons.borrow().contains_key(&TypeId::of::<T>())
    }

    /// The locator bindings should use. Layers such as a DOM integration
    /// replace the default one.
    pub fn observer_locator(&self) -> Result<Rc<dyn ObserverLocator>, BindingError> {
        self.observer_locator
            .borrow()
            .clone()
            .ok_or(BindingError::ServiceMissing("ObserverLocator"))
    }

    pub fn set_observer_locator(&self, locator: Rc<dyn ObserverLocator>) {
        *self.observer_locator.borrow_mut() = Some(locator);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.singletons.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.singletons.borrow().is_empty()
    }
}

impl ServiceLocator for Services {
    fn get_service(&self, type_id: TypeId) -> Option<Rc<dyn Any>> {
        self.singletons.borrow().get(&type_id).cloned()
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("singletons", &self.len())
            .field("observer_locator", &self.observer_locator.borrow().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::ManualClock;
    use std::time::Duration;

    #[test]
    fn standard_registers_runtime_services() {
        let clock: Rc<dyn Clock> = Rc::new(ManualClock::new());
        let config = RuntimeConfig::default().with_dirty_check_interval(Duration::from_millis(50));
        let services = Services::standard(config, clock);

        assert!(services.contains::<ConnectQueue>());
        assert!(services.contains::<TaskQueue>());
        assert!(services.contains::<TimerQueue>());
        assert!(services.contains::<DefaultObserverLocator>());
        assert!(services.observer_locator().is_ok());
        let checker = services.require::<DirtyChecker>().unwrap();
        assert_eq!(checker.interval(), Duration::from_millis(50));
        assert_eq!(
            services.resolve::<RuntimeConfig>().unwrap().dirty_check_interval,
            Duration::from_millis(50)
        );

        let tasks = services.resolve::<TaskQueue>().unwrap();
        let queue = services.resolve::<ConnectQueue>().unwrap();
        assert!(Rc::ptr_eq(tasks.connect_queue(), &queue));
    }

    #[test]
    fn locator_view_resolves_by_type() {
        let services = Services::new();
        services.register(Rc::new(ConnectQueue::new()));
        let locator: &dyn ServiceLocator = &services;
        assert!(locator.resolve::<ConnectQueue>().is_some());
        assert_eq!(
            locator.require::<TaskQueue>().unwrap_err(),
            BindingError::ServiceMissing(std::any::type_name::<TaskQueue>())
        );
    }
}
