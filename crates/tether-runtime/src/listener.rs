#![forbid(unsafe_code)]

//! Event listener binding.
//!
//! A [`Listener`] registers itself with an [`EventManager`] on bind and
//! evaluates its source expression each time the event fires, with the event
//! published as `$event`. Listeners never track dependencies.
//!
//! # Invariants
//!
//! 1. At most one registration exists per bound listener; unbind disposes it.
//! 2. `$event` is only visible to the expression while it is being evaluated.
//! 3. With `prevent_default` set, the event's default action is suppressed
//!    unless the expression returned exactly `true`.
//! 4. A self-only listener ignores events whose target is not its own target;
//!    an ignored event is neither evaluated nor default-prevented.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tether_core::{
    BindingError, BindingFlagSet, BindingFlags, BindingHandle, BindingId, BindingMode,
    BindingOrigin, Event, ExpressionCapabilities, ExpressionRef, Scope, ServiceLocator, Value,
};

use crate::binding::Bindable;
use crate::call::{EVENT_KEY, OverrideGuard};

/// Where a handler is registered relative to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DelegationStrategy {
    /// Directly on the target.
    #[default]
    None,
    /// Once at the root, during the capture phase.
    Capturing,
    /// Once at the root, during the bubble phase.
    Bubbling,
}

/// Receives dispatched events.
pub trait EventHandler {
    fn handle_event(&self, event: &Rc<Event>) -> Result<(), BindingError>;
}

/// A registration that can be revoked.
pub trait Disposable {
    fn dispose(&self);
}

/// Registers event handlers on targets.
pub trait EventManager {
    fn add_event_listener(
        &self,
        target: &Value,
        event_name: &str,
        handler: Weak<dyn EventHandler>,
        strategy: DelegationStrategy,
    ) -> Result<Box<dyn Disposable>, BindingError>;
}

/// Binding that evaluates an expression when `target` fires `event_name`.
pub struct Listener {
    this: Weak<Listener>,
    id: BindingId,
    event_name: Rc<str>,
    strategy: DelegationStrategy,
    source: ExpressionRef,
    target: Value,
    prevent_default: bool,
    self_only: Cell<bool>,
    flags: BindingFlagSet,
    event_manager: Rc<dyn EventManager>,
    locator: Rc<dyn ServiceLocator>,
    registration: RefCell<Option<Box<dyn Disposable>>>,
    scope: RefCell<Option<Scope>>,
}

impl Listener {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_name: &str,
        strategy: DelegationStrategy,
        source: ExpressionRef,
        target: Value,
        prevent_default: bool,
        event_manager: Rc<dyn EventManager>,
        locator: Rc<dyn ServiceLocator>,
    ) -> Rc<Self> {
        let id = BindingId::next();
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            id,
            event_name: Rc::from(event_name),
            strategy,
            source,
            target,
            prevent_default,
            self_only: Cell::new(false),
            flags: BindingFlagSet::new(id, BindingOrigin::Binding, BindingMode::OneTime),
            event_manager,
            locator,
            registration: RefCell::new(None),
            scope: RefCell::new(None),
        })
    }

    #[must_use]
    pub fn id(&self) -> BindingId {
        self.id
    }

    #[must_use]
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    #[must_use]
    pub fn strategy(&self) -> DelegationStrategy {
        self.strategy
    }

    #[must_use]
    pub fn is_self_only(&self) -> bool {
        self.self_only.get()
    }

    /// Evaluate the source with `event` published as `$event`, then apply
    /// the default-action policy. Empty `flags` means the listener's own.
    pub fn call_source(&self, event: &Rc<Event>, flags: BindingFlags) -> Result<Value, BindingError> {
        let Some(scope) = self.scope.borrow().clone() else {
            return Ok(Value::Undefined);
        };
        if self.self_only.get() && !self.targets_self(event) {
            tracing::trace!(binding = %self.id, event = event.kind(), "ignored event from descendant");
            return Ok(Value::Undefined);
        }
        let result = {
            let mut guard = OverrideGuard::new(scope.override_context().clone());
            guard.set(EVENT_KEY, event.to_value())?;
            let flags = flags.fallback(self.flags.call_source) | BindingFlags::MUST_EVALUATE;
            self.source.evaluate(&scope, self.locator.as_ref(), flags)?
        };
        if self.prevent_default && !matches!(result, Value::Bool(true)) {
            event.prevent_default();
        }
        Ok(result)
    }
}

impl Listener {
    fn targets_self(&self, event: &Event) -> bool {
        match (event.target(), self.target.identity()) {
            (Some(target), Some(own)) => target.identity() == own,
            _ => false,
        }
    }

    fn attach(&self, scope: &Scope, flags: BindingFlags) -> Result<(), BindingError> {
        if self
            .source
            .capabilities()
            .contains(ExpressionCapabilities::BIND)
        {
            self.source.bind(self, scope, flags)?;
        }

        let handler: Weak<dyn EventHandler> = {
            let weak: Weak<Listener> = self.this.clone();
            weak
        };
        let registration = self.event_manager.add_event_listener(
            &self.target,
            &self.event_name,
            handler,
            self.strategy,
        )?;
        *self.registration.borrow_mut() = Some(registration);
        tracing::debug!(
            binding = %self.id,
            event = %self.event_name,
            strategy = ?self.strategy,
            "listener bound"
        );
        Ok(())
    }
}

impl EventHandler for Listener {
    fn handle_event(&self, event: &Rc<Event>) -> Result<(), BindingError> {
        tracing::trace!(binding = %self.id, event = event.kind(), "handle event");
        self.call_source(event, self.flags.handle_event).map(|_| ())
    }
}

impl Bindable for Listener {
    fn bind(&self, scope: &Scope, flags: BindingFlags) -> Result<(), BindingError> {
        let current = self.scope.borrow().clone();
        if let Some(current) = current {
            if current.same(scope) {
                return Ok(());
            }
            self.unbind()?;
        }
        let flags = flags.fallback(self.flags.bind);
        *self.scope.borrow_mut() = Some(scope.clone());
        if let Err(err) = self.attach(scope, flags) {
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
        let hook = if self
            .source
            .capabilities()
            .contains(ExpressionCapabilities::UNBIND)
        {
            self.source.unbind(self, &scope)
        } else {
            Ok(())
        };
        let registration = self.registration.borrow_mut().take();
        if let Some(registration) = registration {
            registration.dispose();
        }
        tracing::debug!(binding = %self.id, event = %self.event_name, "listener unbound");
        hook
    }

    fn is_bound(&self) -> bool {
        self.scope.borrow().is_some()
    }
}

impl BindingHandle for Listener {
    fn binding_id(&self) -> BindingId {
        self.id
    }

    fn set_self_only(&self, self_only: bool) -> Option<bool> {
        Some(self.self_only.replace(self_only))
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("event", &self.event_name)
            .field("strategy", &self.strategy)
            .field("prevent_default", &self.prevent_default)
            .field("self_only", &self.self_only.get())
            .field("bound", &self.is_bound())
            .finish()
    }
}
