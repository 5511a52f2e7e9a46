#![forbid(unsafe_code)]

//! Call binding: exposes a function on the target that evaluates the source
//! expression with the call's argument merged into the scope.
//!
//! Each invocation publishes the argument's own properties, plus the whole
//! argument as `$event`, into the scope's override context. They are removed
//! again (or restored to what they shadowed) when the invocation ends,
//! including when evaluation fails.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tether_core::{
    Accessor, BindingError, BindingFlagSet, BindingFlags, BindingHandle, BindingId, BindingMode,
    BindingOrigin, Callable, ExpressionCapabilities, ExpressionRef, ObjectRef, Scope,
    ServiceLocator, Value,
};

use crate::binding::Bindable;
use crate::observer_locator::ObserverLocator;

/// Name under which the current event or call argument is published.
pub const EVENT_KEY: &str = "$event";

/// Transient writes to an override context, undone on drop.
pub(crate) struct OverrideGuard {
    context: ObjectRef,
    saved: Vec<(Rc<str>, Option<Value>)>,
}

impl OverrideGuard {
    pub(crate) fn new(context: ObjectRef) -> Self {
        Self {
            context,
            saved: Vec::new(),
        }
    }

    pub(crate) fn set(&mut self, name: &str, value: Value) -> Result<(), BindingError> {
        if !self.saved.iter().any(|(saved, _)| &**saved == name) {
            let prior = self
                .context
                .has(name)
                .then(|| self.context.get(name));
            self.saved.push((Rc::from(name), prior));
        }
        self.context.set_with_flags(name, value, BindingFlags::empty())
    }
}

impl Drop for OverrideGuard {
    fn drop(&mut self) {
        for (name, prior) in self.saved.drain(..).rev() {
            let restored = match prior {
                Some(value) => self.context.set(&name, value),
                None => self.context.delete(&name).map(|_| ()),
            };
            if let Err(err) = restored {
                tracing::warn!(key = %name, error = %err, "failed to restore override context");
            }
        }
    }
}

/// Binding that installs an invocable function on `target.property`.
pub struct Call {
    this: Weak<Call>,
    id: BindingId,
    source: ExpressionRef,
    target: Value,
    target_property: Rc<str>,
    flags: BindingFlagSet,
    observer_locator: Rc<dyn ObserverLocator>,
    locator: Rc<dyn ServiceLocator>,
    target_accessor: RefCell<Option<Rc<dyn Accessor>>>,
    scope: RefCell<Option<Scope>>,
}

impl Call {
    #[must_use]
    pub fn new(
        source: ExpressionRef,
        target: Value,
        target_property: &str,
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
            flags: BindingFlagSet::new(id, BindingOrigin::Binding, BindingMode::OneTime),
            observer_locator,
            locator,
            target_accessor: RefCell::new(None),
            scope: RefCell::new(None),
        })
    }

    #[must_use]
    pub fn id(&self) -> BindingId {
        self.id
    }

    #[must_use]
    pub fn target_property(&self) -> &str {
        &self.target_property
    }

    /// Evaluate the source with `args` merged into the scope.
    ///
    /// Returns `undefined` when unbound.
    pub fn call_source(&self, args: &Value) -> Result<Value, BindingError> {
        let Some(scope) = self.scope.borrow().clone() else {
            return Ok(Value::Undefined);
        };
        let mut guard = OverrideGuard::new(scope.override_context().clone());
        if let Value::Object(object) = args {
            for key in object.keys() {
                guard.set(&key, object.get(&key))?;
            }
        }
        guard.set(EVENT_KEY, args.clone())?;

        tracing::trace!(binding = %self.id, property = %self.target_property, "call");
        let flags = self.flags.call_source | BindingFlags::MUST_EVALUATE;
        self.source.evaluate(&scope, self.locator.as_ref(), flags)
    }

    fn accessor(&self) -> Result<Rc<dyn Accessor>, BindingError> {
        if let Some(existing) = self.target_accessor.borrow().clone() {
            return Ok(existing);
        }
        let accessor = self
            .observer_locator
            .get_accessor(&self.target, &self.target_property)?;
        *self.target_accessor.borrow_mut() = Some(Rc::clone(&accessor));
        Ok(accessor)
    }

    fn attach(&self, scope: &Scope, flags: BindingFlags) -> Result<(), BindingError> {
        if self
            .source
            .capabilities()
            .contains(ExpressionCapabilities::BIND)
        {
            self.source.bind(self, scope, flags)?;
        }

        tracing::debug!(binding = %self.id, property = %self.target_property, "bind call");
        self.accessor()?
            .set_value(Value::Function(self.invoker()), flags)
    }

    fn invoker(&self) -> Callable {
        let weak = self.this.clone();
        Callable::new(move |args| match weak.upgrade() {
            Some(call) => call.call_source(args.first().unwrap_or(&Value::Undefined)),
            None => Ok(Value::Undefined),
        })
    }
}

impl Bindable for Call {
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
        tracing::debug!(binding = %self.id, property = %self.target_property, "unbind call");

        let hook = if self
            .source
            .capabilities()
            .contains(ExpressionCapabilities::UNBIND)
        {
            self.source.unbind(self, &scope)
        } else {
            Ok(())
        };
        let accessor = self.target_accessor.borrow().clone();
        let cleared = match accessor {
            Some(accessor) => accessor.set_value(Value::Null, self.flags.unbind),
            None => Ok(()),
        };
        hook.and(cleared)
    }

    fn is_bound(&self) -> bool {
        self.scope.borrow().is_some()
    }
}

impl BindingHandle for Call {
    fn binding_id(&self) -> BindingId {
        self.id
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("source", &self.source.describe())
            .field("target_property", &self.target_property)
            .field("bound", &self.is_bound())
            .finish()
    }
}
