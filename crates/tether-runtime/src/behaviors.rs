#![forbid(unsafe_code)]

//! Binding behaviors: expression wrappers that adjust the owning binding
//! while it is bound.
//!
//! - [`ModeOverride`]: `oneTime`, `toView`, `fromView` and `twoWay`.
//! - [`SelfOnly`]: an event listener only reacts to events dispatched on its
//!   own target, not to events bubbling up from descendants.
//!
//! A wrapper forwards everything to the inner expression. Its `bind` hook
//! adjusts the owning binding after the inner hook ran; its `unbind` hook
//! restores the saved setting before the inner hook runs, so nested wrappers
//! unwind in reverse order.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use tether_core::{
    BindingError, BindingFlags, BindingHandle, BindingId, BindingMode, Connectable, Expression,
    ExpressionCapabilities, ExpressionRef, Scope, ServiceLocator, Value,
};

/// Expression wrapper that forces a binding mode while bound.
pub struct ModeOverride {
    inner: ExpressionRef,
    mode: BindingMode,
    saved: RefCell<AHashMap<BindingId, BindingMode>>,
}

impl ModeOverride {
    #[must_use]
    pub fn new(inner: ExpressionRef, mode: BindingMode) -> Rc<Self> {
        Rc::new(Self {
            inner,
            mode,
            saved: RefCell::new(AHashMap::new()),
        })
    }

    #[must_use]
    pub fn one_time(inner: ExpressionRef) -> Rc<Self> {
        Self::new(inner, BindingMode::OneTime)
    }

    #[must_use]
    pub fn to_view(inner: ExpressionRef) -> Rc<Self> {
        Self::new(inner, BindingMode::ToView)
    }

    #[must_use]
    pub fn from_view(inner: ExpressionRef) -> Rc<Self> {
        Self::new(inner, BindingMode::FromView)
    }

    #[must_use]
    pub fn two_way(inner: ExpressionRef) -> Rc<Self> {
        Self::new(inner, BindingMode::TwoWay)
    }

    #[must_use]
    pub fn mode(&self) -> BindingMode {
        self.mode
    }

    #[must_use]
    pub fn inner(&self) -> &ExpressionRef {
        &self.inner
    }
}

impl Expression for ModeOverride {
    fn capabilities(&self) -> ExpressionCapabilities {
        self.inner.capabilities() | ExpressionCapabilities::BIND | ExpressionCapabilities::UNBIND
    }

    fn evaluate(
        &self,
        scope: &Scope,
        locator: &dyn ServiceLocator,
        flags: BindingFlags,
    ) -> Result<Value, BindingError> {
        self.inner.evaluate(scope, locator, flags)
    }

    fn assign(
        &self,
        scope: &Scope,
        value: Value,
        locator: &dyn ServiceLocator,
        flags: BindingFlags,
    ) -> Result<(), BindingError> {
        self.inner.assign(scope, value, locator, flags)
    }

    fn bind(
        &self,
        binding: &dyn BindingHandle,
        scope: &Scope,
        flags: BindingFlags,
    ) -> Result<(), BindingError> {
        if self.inner.capabilities().contains(ExpressionCapabilities::BIND) {
            self.inner.bind(binding, scope, flags)?;
        }
        if let Some(current) = binding.mode() {
            self.saved.borrow_mut().insert(binding.binding_id(), current);
            binding.set_mode(self.mode);
            tracing::trace!(binding = %binding.binding_id(), from = ?current, to = ?self.mode, "mode override");
        }
        Ok(())
    }

    fn unbind(&self, binding: &dyn BindingHandle, scope: &Scope) -> Result<(), BindingError> {
        let saved = self.saved.borrow_mut().remove(&binding.binding_id());
        if let Some(mode) = saved {
            binding.set_mode(mode);
        }
        if self.inner.capabilities().contains(ExpressionCapabilities::UNBIND) {
            self.inner.unbind(binding, scope)?;
        }
        Ok(())
    }

    fn connect(
        &self,
        binding: &dyn Connectable,
        scope: &Scope,
        flags: BindingFlags,
    ) -> Result<(), BindingError> {
        self.inner.connect(binding, scope, flags)
    }

    fn describe(&self) -> String {
        let name = match self.mode {
            BindingMode::OneTime => "oneTime",
            BindingMode::ToView => "toView",
            BindingMode::FromView => "fromView",
            BindingMode::TwoWay => "twoWay",
        };
        format!("{} & {name}", self.inner.describe())
    }
}

impl std::fmt::Debug for ModeOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeOverride")
            .field("inner", &self.inner.describe())
            .field("mode", &self.mode)
            .finish()
    }
}

/// Expression wrapper that limits an event listener to events whose target
/// is the listener's own target.
///
/// Binding it to anything other than an event listener fails with
/// [`BindingError::UnsupportedBehavior`].
pub struct SelfOnly {
    inner: ExpressionRef,
    saved: RefCell<AHashMap<BindingId, bool>>,
}

impl SelfOnly {
    #[must_use]
    pub fn new(inner: ExpressionRef) -> Rc<Self> {
        Rc::new(Self {
            inner,
            saved: RefCell::new(AHashMap::new()),
        })
    }

    #[must_use]
    pub fn inner(&self) -> &ExpressionRef {
        &self.inner
    }
}

impl Expression for SelfOnly {
    fn capabilities(&self) -> ExpressionCapabilities {
        self.inner.capabilities() | ExpressionCapabilities::BIND | ExpressionCapabilities::UNBIND
    }

    fn evaluate(
        &self,
        scope: &Scope,
        locator: &dyn ServiceLocator,
        flags: BindingFlags,
    ) -> Result<Value, BindingError> {
        self.inner.evaluate(scope, locator, flags)
    }

    fn assign(
        &self,
        scope: &Scope,
        value: Value,
        locator: &dyn ServiceLocator,
        flags: BindingFlags,
    ) -> Result<(), BindingError> {
        self.inner.assign(scope, value, locator, flags)
    }

    fn bind(
        &self,
        binding: &dyn BindingHandle,
        scope: &Scope,
        flags: BindingFlags,
    ) -> Result<(), BindingError> {
        if self.inner.capabilities().contains(ExpressionCapabilities::BIND) {
            self.inner.bind(binding, scope, flags)?;
        }
        let Some(previous) = binding.set_self_only(true) else {
            tracing::error!(binding = %binding.binding_id(), "self behavior on a non-event binding");
            return Err(BindingError::UnsupportedBehavior("self"));
        };
        self.saved.borrow_mut().insert(binding.binding_id(), previous);
        Ok(())
    }

    fn unbind(&self, binding: &dyn BindingHandle, scope: &Scope) -> Result<(), BindingError> {
        let saved = self.saved.borrow_mut().remove(&binding.binding_id());
        if let Some(previous) = saved {
            binding.set_self_only(previous);
        }
        if self.inner.capabilities().contains(ExpressionCapabilities::UNBIND) {
            self.inner.unbind(binding, scope)?;
        }
        Ok(())
    }

    fn connect(
        &self,
        binding: &dyn Connectable,
        scope: &Scope,
        flags: BindingFlags,
    ) -> Result<(), BindingError> {
        self.inner.connect(binding, scope, flags)
    }

    fn describe(&self) -> String {
        format!("{} & self", self.inner.describe())
    }
}

impl std::fmt::Debug for SelfOnly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfOnly")
            .field("inner", &self.inner.describe())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{Bindable, Binding};
    use crate::observer_locator::DefaultObserverLocator;
    use crate::services::Services;
    use crate::timer::{Clock, ManualClock};
    use crate::RuntimeConfig;
    use tether_core::testing::scope_access;
    use tether_core::ObjectRef;

    fn binding(services: &Rc<Services>, source: ExpressionRef, target: &ObjectRef) -> Rc<Binding> {
        let locator = services.resolve::<DefaultObserverLocator>().unwrap();
        Binding::new(
            source,
            Value::from(target.clone()),
            "value",
            BindingMode::ToView,
            locator,
            Rc::clone(services) as Rc<dyn ServiceLocator>,
        )
    }

    fn services() -> Rc<Services> {
        let clock: Rc<dyn Clock> = Rc::new(ManualClock::new());
        Services::standard(RuntimeConfig::default(), clock)
    }

    #[test]
    fn one_time_override_stops_tracking() {
        let services = services();
        let vm = ObjectRef::from_pairs([("x", 1)]);
        let target = ObjectRef::new();
        let binding = binding(&services, ModeOverride::one_time(scope_access("x")), &target);

        binding.bind(&Scope::new(vm.clone()), BindingFlags::empty()).unwrap();
        assert_eq!(binding.current_mode(), BindingMode::OneTime);
        vm.set("x", 2).unwrap();
        assert_eq!(target.get("value"), Value::from(1));

        binding.unbind().unwrap();
        assert_eq!(binding.current_mode(), BindingMode::ToView);
    }

    #[test]
    fn two_way_override_writes_back() {
        let services = services();
        let vm = ObjectRef::from_pairs([("x", 1)]);
        let target = ObjectRef::new();
        let binding = binding(&services, ModeOverride::two_way(scope_access("x")), &target);
        binding.bind(&Scope::new(vm.clone()), BindingFlags::empty()).unwrap();
        target.set("value", 5).unwrap();
        assert_eq!(vm.get("x"), Value::from(5));
    }

    #[test]
    fn stacked_overrides_restore_in_reverse() {
        let services = services();
        let vm = ObjectRef::from_pairs([("x", 1)]);
        let target = ObjectRef::new();
        let inner: ExpressionRef = ModeOverride::two_way(scope_access("x"));
        let outer = ModeOverride::one_time(inner);
        assert_eq!(outer.describe(), "x & twoWay & oneTime");
        let binding = binding(&services, outer, &target);

        binding.bind(&Scope::new(vm), BindingFlags::empty()).unwrap();
        assert_eq!(binding.current_mode(), BindingMode::OneTime);
        binding.unbind().unwrap();
        assert_eq!(binding.current_mode(), BindingMode::ToView);
    }

    #[test]
    fn self_only_rejects_property_bindings() {
        let services = services();
        let vm = ObjectRef::from_pairs([("x", 1)]);
        let target = ObjectRef::new();
        let behavior = SelfOnly::new(scope_access("x"));
        assert_eq!(behavior.describe(), "x & self");
        let binding = binding(&services, behavior, &target);

        let err = binding.bind(&Scope::new(vm), BindingFlags::empty()).unwrap_err();
        assert_eq!(err, BindingError::UnsupportedBehavior("self"));
        assert!(!binding.is_bound());
        assert_eq!(target.get("value"), Value::Undefined);
    }
}
