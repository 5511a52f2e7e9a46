#![forbid(unsafe_code)]

//! Property binding: keeps `target.property` in sync with a source
//! expression.
//!
//! # State machine
//!
//! ```text
//!            bind(scope)                      unbind()
//! Unbound ──────────────▶ Bound-OneTime ───────────────▶ Unbound
//!    │                    Bound-Passive   (from-view: subscribed to target)
//!    │                    Bound-Active    (to-view / two-way: connected to sources)
//!    └─ bind(other scope) while bound = unbind + bind
//! ```
//!
//! | Mode | Initial push | Source dependencies | Target subscription |
//! |------|--------------|---------------------|---------------------|
//! | one-time | yes | none | none |
//! | to-view | yes | via the connect queue | none |
//! | two-way | yes | connected during bind | yes |
//! | from-view | no | none | yes |
//!
//! # Invariants
//!
//! 1. A binding holds at most one scope. Rebinding to the same scope is a
//!    no-op; rebinding to another scope unbinds first.
//! 2. After every connect pass the source subscriptions equal exactly the
//!    properties read by that pass.
//! 3. Target writes happen only when the evaluated value strictly differs
//!    from the target's current value (source direction), and source writes
//!    only when the target value strictly differs from the evaluated source
//!    (target direction).
//! 4. No `RefCell` borrow is held across expression evaluation or observer
//!    calls.
//!
//! # Failure Modes
//!
//! | Failure | Behavior |
//! |---------|----------|
//! | Notification with an unknown context | Logged at `error`, `UnknownContext` returned |
//! | Target change on a non-assignable source | Logged at `error`, `NotAssignable` returned |
//! | Expression raises | Error propagated to the caller unchanged |
//! | `bind` fails part-way | Rolled back to unbound; the error is returned and a retry binds afresh |

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tether_core::{
    Accessor, BindingError, BindingFlagSet, BindingFlags, BindingHandle, BindingId, BindingMode,
    BindingOrigin, Connectable, ExpressionCapabilities, ExpressionRef, PropertyObserver, Scope,
    ServiceLocator, SOURCE_CONTEXT, Subscribable, Subscriber, SubscriberContext, TARGET_CONTEXT,
    Value,
};

use crate::connect_queue::{ConnectQueue, QueuedConnect};
use crate::connectable::DependencyTracker;
use crate::observer_locator::ObserverLocator;

/// Lifecycle shared by every binding kind.
pub trait Bindable {
    /// Attach to `scope`. Empty `flags` means "use the binding's own".
    fn bind(&self, scope: &Scope, flags: BindingFlags) -> Result<(), BindingError>;

    /// Detach. A no-op when unbound.
    fn unbind(&self) -> Result<(), BindingError>;

    fn is_bound(&self) -> bool;
}

/// What the binding writes its target through.
#[derive(Clone)]
enum TargetObserver {
    Accessor(Rc<dyn Accessor>),
    Observer(Rc<dyn PropertyObserver>),
}

impl TargetObserver {
    fn get_value(&self) -> Value {
        match self {
            Self::Accessor(accessor) => accessor.get_value(),
            Self::Observer(observer) => observer.get_value(),
        }
    }

    fn set_value(&self, value: Value, flags: BindingFlags) -> Result<(), BindingError> {
        match self {
            Self::Accessor(accessor) => accessor.set_value(value, flags),
            Self::Observer(observer) => observer.set_value(value, flags),
        }
    }

    fn bind(&self, flags: BindingFlags) -> Result<(), BindingError> {
        match self {
            Self::Accessor(accessor) => accessor.bind(flags),
            Self::Observer(observer) => observer.bind(flags),
        }
    }

    fn unbind(&self) {
        match self {
            Self::Accessor(accessor) => accessor.unbind(),
            Self::Observer(observer) => observer.unbind(),
        }
    }

    fn observer(&self) -> Option<&Rc<dyn PropertyObserver>> {
        match self {
            Self::Accessor(_) => None,
            Self::Observer(observer) => Some(observer),
        }
    }
}

fn needs_observer(mode: BindingMode) -> bool {
    mode.updates_source()
}

/// Binding between a source expression and one target property.
pub struct Binding {
    this: Weak<Binding>,
    id: BindingId,
    source: ExpressionRef,
    target: Value,
    target_property: Rc<str>,
    mode: Cell<BindingMode>,
    flags: Cell<BindingFlagSet>,
    observer_locator: Rc<dyn ObserverLocator>,
    locator: Rc<dyn ServiceLocator>,
    target_observer: RefCell<Option<TargetObserver>>,
    scope: RefCell<Option<Scope>>,
    tracker: DependencyTracker,
}

impl Binding {
    #[must_use]
    pub fn new(
        source: ExpressionRef,
        target: Value,
        target_property: &str,
        mode: BindingMode,
        observer_locator: Rc<dyn ObserverLocator>,
        locator: Rc<dyn ServiceLocator>,
    ) -> Rc<Self> {
        let id = BindingId::next();
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            id,
            source,
            target,
            target_property: Rc::from(target_property),
            mode: Cell::new(mode),
            flags: Cell::new(BindingFlagSet::new(id, BindingOrigin::Binding, mode)),
            observer_locator,
            locator,
            target_observer: RefCell::new(None),
            scope: RefCell::new(None),
            tracker: DependencyTracker::new(),
        })
    }

    #[must_use]
    pub fn id(&self) -> BindingId {
        self.id
    }

    #[must_use]
    pub fn current_mode(&self) -> BindingMode {
        self.mode.get()
    }

    #[must_use]
    pub fn source(&self) -> &ExpressionRef {
        &self.source
    }

    #[must_use]
    pub fn target(&self) -> &Value {
        &self.target
    }

    #[must_use]
    pub fn target_property(&self) -> &str {
        &self.target_property
    }

    #[must_use]
    pub fn scope(&self) -> Option<Scope> {
        self.scope.borrow().clone()
    }

    /// Precomputed flags for the current mode.
    #[must_use]
    pub fn flag_set(&self) -> BindingFlagSet {
        self.flags.get()
    }

    /// Number of source properties currently subscribed.
    #[must_use]
    pub fn observed_count(&self) -> usize {
        self.tracker.observed_count()
    }

    /// Whether the binding currently depends on `observer`.
    #[must_use]
    pub fn is_observing(&self, observer: &Rc<dyn PropertyObserver>) -> bool {
        self.tracker.is_observing(observer)
    }

    fn as_subscriber(&self) -> Weak<dyn Subscriber> {
        let weak: Weak<Binding> = self.this.clone();
        weak
    }

    fn target_observer(&self) -> Option<TargetObserver> {
        self.target_observer.borrow().clone()
    }

    /// Resolve the target observer on first bind, or upgrade an accessor to
    /// an observer when the mode now needs target notifications.
    fn resolve_target_observer(&self, mode: BindingMode) -> Result<TargetObserver, BindingError> {
        if let Some(existing) = self.target_observer() {
            if !needs_observer(mode) || existing.observer().is_some() {
                return Ok(existing);
            }
        }
        let resolved = if needs_observer(mode) {
            TargetObserver::Observer(
                self.observer_locator
                    .get_observer(&self.target, &self.target_property)?,
            )
        } else {
            TargetObserver::Accessor(
                self.observer_locator
                    .get_accessor(&self.target, &self.target_property)?,
            )
        };
        *self.target_observer.borrow_mut() = Some(resolved.clone());
        Ok(resolved)
    }

    fn evaluate(&self, scope: &Scope, flags: BindingFlags) -> Result<Value, BindingError> {
        self.source.evaluate(scope, self.locator.as_ref(), flags)
    }

    /// Write `value` to the target.
    pub fn update_target(&self, value: Value, flags: BindingFlags) -> Result<(), BindingError> {
        let Some(observer) = self.target_observer() else {
            return Ok(());
        };
        tracing::trace!(binding = %self.id, property = %self.target_property, "update target");
        observer.set_value(value, flags.fallback(self.flags.get().update_target))
    }

    /// Assign `value` back through the source expression.
    pub fn update_source(&self, value: Value, flags: BindingFlags) -> Result<(), BindingError> {
        let Some(scope) = self.scope() else {
            return Ok(());
        };
        if !self
            .source
            .capabilities()
            .contains(ExpressionCapabilities::ASSIGN)
        {
            let err = BindingError::NotAssignable(self.source.describe());
            tracing::error!(binding = %self.id, error = %err, "cannot update source");
            return Err(err);
        }
        tracing::trace!(binding = %self.id, "update source");
        self.source.assign(
            &scope,
            value,
            self.locator.as_ref(),
            flags.fallback(self.flags.get().update_source),
        )
    }

    /// Re-subscribe to the dependencies of the current evaluation, optionally
    /// re-pushing the value to the target first. A no-op when unbound.
    pub fn connect(&self, evaluate: bool, flags: BindingFlags) -> Result<(), BindingError> {
        let Some(scope) = self.scope() else {
            return Ok(());
        };
        let flags = flags.fallback(self.flags.get().connect);
        if evaluate {
            let value = self.evaluate(&scope, flags)?;
            self.update_target(value, flags)?;
        }
        self.connect_source(&scope, flags)
    }

    fn connect_source(&self, scope: &Scope, flags: BindingFlags) -> Result<(), BindingError> {
        if !self
            .source
            .capabilities()
            .contains(ExpressionCapabilities::CONNECT)
        {
            return Ok(());
        }
        let version = self.tracker.begin_pass();
        self.source.connect(self, scope, flags)?;
        let dropped = self.tracker.unobserve_stale(&self.as_subscriber());
        tracing::trace!(
            binding = %self.id,
            version,
            observed = self.tracker.observed_count(),
            dropped,
            "connected"
        );
        Ok(())
    }

    fn handle_source_change(&self, scope: &Scope) -> Result<(), BindingError> {
        let flags = self.flags.get().update_target;
        let Some(observer) = self.target_observer() else {
            return Ok(());
        };
        let old_value = observer.get_value();
        let new_value = self.evaluate(scope, flags)?;
        if !new_value.strict_eq(&old_value) {
            self.update_target(new_value, flags)?;
        }
        if self.mode.get() != BindingMode::OneTime {
            self.connect_source(scope, flags)?;
        }
        Ok(())
    }

    fn handle_target_change(&self, scope: &Scope, new_value: &Value) -> Result<(), BindingError> {
        let flags = self.flags.get().update_source;
        let current = self.evaluate(scope, flags)?;
        if !new_value.strict_eq(&current) {
            self.update_source(new_value.clone(), flags)?;
        }
        Ok(())
    }

    /// The fallible part of `bind`, run with the scope already recorded.
    fn attach(&self, scope: &Scope, flags: BindingFlags) -> Result<(), BindingError> {
        if self
            .source
            .capabilities()
            .contains(ExpressionCapabilities::BIND)
        {
            self.source.bind(self, scope, flags)?;
        }

        let mode = self.mode.get();
        tracing::debug!(
            binding = %self.id,
            property = %self.target_property,
            ?mode,
            "bind"
        );

        let observer = self.resolve_target_observer(mode)?;
        observer.bind(flags)?;

        if mode != BindingMode::FromView {
            let value = self.evaluate(scope, flags)?;
            self.update_target(value, flags)?;
        }

        match mode {
            BindingMode::OneTime => {}
            BindingMode::ToView => {
                let queue = self.connect_queue()?;
                if let Some(this) = self.this.upgrade() {
                    queue.enqueue(this)?;
                }
            }
            BindingMode::TwoWay => {
                self.connect_source(scope, flags)?;
                if let Some(target) = observer.observer() {
                    target.subscribe(TARGET_CONTEXT, self.as_subscriber());
                }
            }
            BindingMode::FromView => {
                if let Some(target) = observer.observer() {
                    target.subscribe(TARGET_CONTEXT, self.as_subscriber());
                }
            }
        }
        Ok(())
    }

    fn connect_queue(&self) -> Result<Rc<ConnectQueue>, BindingError> {
        let locator: &dyn ServiceLocator = self.locator.as_ref();
        locator.require::<ConnectQueue>()
    }
}

impl Bindable for Binding {
    fn bind(&self, scope: &Scope, flags: BindingFlags) -> Result<(), BindingError> {
        if let Some(current) = self.scope() {
            if current.same(scope) {
                return Ok(());
            }
            self.unbind()?;
        }

        let flags = flags.fallback(self.flags.get().bind);
        *self.scope.borrow_mut() = Some(scope.clone());
        if let Err(err) = self.attach(scope, flags) {
            tracing::debug!(binding = %self.id, error = %err, "bind failed, rolling back");
            if let Err(rollback) = self.unbind() {
                tracing::warn!(binding = %self.id, error = %rollback, "rollback after failed bind");
            }
            return Err(err);
        }
        Ok(())
    }

    fn unbind(&self) -> Result<(), BindingError> {
        let Some(scope) = self.scope.borrow_mut().take() else {
            return Ok(());
        };
        tracing::debug!(binding = %self.id, property = %self.target_property, "unbind");

        let hook = if self
            .source
            .capabilities()
            .contains(ExpressionCapabilities::UNBIND)
        {
            self.source.unbind(self, &scope)
        } else {
            Ok(())
        };

        let subscriber = self.as_subscriber();
        if let Some(observer) = self.target_observer() {
            observer.unbind();
            if let Some(target) = observer.observer() {
                target.unsubscribe(TARGET_CONTEXT, &subscriber);
            }
        }
        self.tracker.unobserve_all(&subscriber);
        hook
    }

    fn is_bound(&self) -> bool {
        self.scope.borrow().is_some()
    }
}

impl Subscriber for Binding {
    fn handle_change(
        &self,
        context: SubscriberContext,
        new_value: &Value,
        _old_value: &Value,
        _flags: BindingFlags,
    ) -> Result<(), BindingError> {
        if context != SOURCE_CONTEXT && context != TARGET_CONTEXT {
            let err = BindingError::UnknownContext(context.to_string());
            tracing::error!(binding = %self.id, error = %err, "binding notified with unknown context");
            return Err(err);
        }
        let Some(scope) = self.scope() else {
            return Ok(());
        };
        if context == SOURCE_CONTEXT {
            self.handle_source_change(&scope)
        } else {
            self.handle_target_change(&scope, new_value)
        }
    }
}

impl Connectable for Binding {
    fn observe_property(&self, target: &Value, name: &str) -> Result<(), BindingError> {
        let observer = self.observer_locator.get_observer(target, name)?;
        self.tracker.observe(observer, &self.as_subscriber());
        Ok(())
    }
}

impl BindingHandle for Binding {
    fn binding_id(&self) -> BindingId {
        self.id
    }

    fn mode(&self) -> Option<BindingMode> {
        Some(self.mode.get())
    }

    fn set_mode(&self, mode: BindingMode) {
        self.mode.set(mode);
        self.flags
            .set(BindingFlagSet::new(self.id, BindingOrigin::Binding, mode));
    }
}

impl QueuedConnect for Binding {
    fn is_bound(&self) -> bool {
        Bindable::is_bound(self)
    }

    fn connect_queued(&self) -> Result<(), BindingError> {
        self.connect(true, BindingFlags::empty())
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("id", &self.id)
            .field("source", &self.source.describe())
            .field("target_property", &self.target_property)
            .field("mode", &self.mode.get())
            .field("bound", &Bindable::is_bound(self))
            .field("observed", &self.tracker.observed_count())
            .finish()
    }
}
