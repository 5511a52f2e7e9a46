#![forbid(unsafe_code)]

//! The expression-tree contract bindings consume.
//!
//! Parsing is out of scope: expression trees arrive from a front end as
//! `Rc<dyn Expression>`. Bindings never inspect their structure; they query
//! [`Expression::capabilities`] and only call the optional hooks that are
//! advertised.
//!
//! Three narrow handles are passed *into* expressions:
//!
//! - [`ServiceLocator`]: resolves ancillary services during evaluation.
//! - [`BindingHandle`]: the binding whose `bind`/`unbind` hook is running,
//!   with access to its mode and event filter (used by behaviors).
//! - [`Connectable`]: the dependency tracker a `connect` pass reports each
//!   observed property to.

use std::any::{Any, TypeId};
use std::rc::Rc;

use crate::error::BindingError;
use crate::flags::{BindingFlags, BindingId, BindingMode};
use crate::scope::Scope;
use crate::value::Value;

bitflags::bitflags! {
    /// Optional hooks an expression implements.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ExpressionCapabilities: u8 {
        const ASSIGN = 1 << 0;
        const BIND = 1 << 1;
        const UNBIND = 1 << 2;
        const CONNECT = 1 << 3;
    }
}

/// Resolves services by type.
pub trait ServiceLocator {
    fn get_service(&self, type_id: TypeId) -> Option<Rc<dyn Any>>;
}

impl dyn ServiceLocator + '_ {
    /// Resolve a registered service of concrete type `T`.
    #[must_use]
    pub fn resolve<T: Any>(&self) -> Option<Rc<T>> {
        self.get_service(TypeId::of::<T>())?.downcast::<T>().ok()
    }

    /// Like [`resolve`](Self::resolve), failing with
    /// [`BindingError::ServiceMissing`] when absent.
    pub fn require<T: Any>(&self) -> Result<Rc<T>, BindingError> {
        self.resolve::<T>()
            .ok_or(BindingError::ServiceMissing(std::any::type_name::<T>()))
    }
}

/// A locator with nothing registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoServices;

impl ServiceLocator for NoServices {
    fn get_service(&self, _type_id: TypeId) -> Option<Rc<dyn Any>> {
        None
    }
}

/// The binding an expression hook runs on behalf of.
pub trait BindingHandle {
    fn binding_id(&self) -> BindingId;

    /// Current mode, for bindings that have one.
    fn mode(&self) -> Option<BindingMode> {
        None
    }

    /// Change the mode. Ignored by bindings without a mode.
    fn set_mode(&self, _mode: BindingMode) {}

    /// Restrict event handling to events dispatched on the binding's own
    /// target. Returns the previous setting, or `None` for bindings that do
    /// not handle events.
    fn set_self_only(&self, _self_only: bool) -> Option<bool> {
        None
    }
}

/// Receiver of the properties an expression reads during `connect`.
pub trait Connectable {
    /// Record a dependency on `name` of `target` (an object or host value).
    fn observe_property(&self, target: &Value, name: &str) -> Result<(), BindingError>;
}

/// A polymorphic, parser-produced expression tree.
pub trait Expression {
    /// Which optional hooks this expression implements.
    fn capabilities(&self) -> ExpressionCapabilities {
        ExpressionCapabilities::empty()
    }

    fn evaluate(
        &self,
        scope: &Scope,
        locator: &dyn ServiceLocator,
        flags: BindingFlags,
    ) -> Result<Value, BindingError>;

    fn assign(
        &self,
        _scope: &Scope,
        _value: Value,
        _locator: &dyn ServiceLocator,
        _flags: BindingFlags,
    ) -> Result<(), BindingError> {
        Err(BindingError::NotAssignable(self.describe()))
    }

    fn bind(
        &self,
        _binding: &dyn BindingHandle,
        _scope: &Scope,
        _flags: BindingFlags,
    ) -> Result<(), BindingError> {
        Ok(())
    }

    fn unbind(&self, _binding: &dyn BindingHandle, _scope: &Scope) -> Result<(), BindingError> {
        Ok(())
    }

    fn connect(
        &self,
        _binding: &dyn Connectable,
        _scope: &Scope,
        _flags: BindingFlags,
    ) -> Result<(), BindingError> {
        Ok(())
    }

    /// Human-readable rendering for diagnostics.
    fn describe(&self) -> String;
}

/// Shared expression handle.
pub type ExpressionRef = Rc<dyn Expression>;

#[cfg(test)]
mod tests {
    use super::*;

    struct Answer;

    impl Expression for Answer {
        fn evaluate(
            &self,
            _scope: &Scope,
            _locator: &dyn ServiceLocator,
            _flags: BindingFlags,
        ) -> Result<Value, BindingError> {
            Ok(Value::from(42))
        }

        fn describe(&self) -> String {
            "42".into()
        }
    }

    struct OneService(Rc<String>);

    impl ServiceLocator for OneService {
        fn get_service(&self, type_id: TypeId) -> Option<Rc<dyn Any>> {
            (type_id == TypeId::of::<String>()).then(|| Rc::clone(&self.0) as Rc<dyn Any>)
        }
    }

    #[test]
    fn default_hooks_are_inert_and_assign_fails() {
        let scope = Scope::new(Value::Null);
        let expr = Answer;
        assert!(expr.capabilities().is_empty());
        assert_eq!(
            expr.evaluate(&scope, &NoServices, BindingFlags::empty())
                .unwrap(),
            Value::from(42)
        );
        let err = expr
            .assign(&scope, Value::Null, &NoServices, BindingFlags::empty())
            .unwrap_err();
        assert_eq!(err, BindingError::NotAssignable("42".into()));
    }

    #[test]
    fn locator_resolves_by_type() {
        let services = OneService(Rc::new("dirty checker".to_string()));
        let locator: &dyn ServiceLocator = &services;
        assert_eq!(
            locator.resolve::<String>().as_deref().map(String::as_str),
            Some("dirty checker")
        );
        assert!(locator.resolve::<u32>().is_none());
        assert!(matches!(
            locator.require::<u32>(),
            Err(BindingError::ServiceMissing(_))
        ));
    }
}
