#![forbid(unsafe_code)]

//! Evaluation scopes.
//!
//! A [`Scope`] pairs the *binding context* (the view-model an expression reads
//! from) with an *override context*: a mutable property bag consulted first
//! during name resolution. Listeners and call bindings publish transient
//! values (`$event`, call arguments) there without touching the binding
//! context. Nested template controllers build child scopes whose lookups fall
//! through to the parent.
//!
//! Scopes are cheap `Rc` handles and compare by identity ([`Scope::same`]).

use std::rc::Rc;

use crate::value::{ObjectRef, Value};

struct ScopeData {
    binding_context: Value,
    override_context: ObjectRef,
    parent: Option<Scope>,
}

/// Shared evaluation context handle.
#[derive(Clone)]
pub struct Scope(Rc<ScopeData>);

impl Scope {
    /// Create a root scope with an empty override context.
    pub fn new(binding_context: impl Into<Value>) -> Self {
        Self::with_override(binding_context, ObjectRef::new())
    }

    /// Create a root scope with an explicit override context.
    pub fn with_override(binding_context: impl Into<Value>, override_context: ObjectRef) -> Self {
        Self(Rc::new(ScopeData {
            binding_context: binding_context.into(),
            override_context,
            parent: None,
        }))
    }

    /// Create a nested scope whose unresolved names fall through to `self`.
    pub fn child(&self, binding_context: impl Into<Value>) -> Self {
        Self(Rc::new(ScopeData {
            binding_context: binding_context.into(),
            override_context: ObjectRef::new(),
            parent: Some(self.clone()),
        }))
    }

    #[must_use]
    pub fn binding_context(&self) -> &Value {
        &self.0.binding_context
    }

    #[must_use]
    pub fn override_context(&self) -> &ObjectRef {
        &self.0.override_context
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Scope> {
        self.0.parent.as_ref()
    }

    /// Identity comparison.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// The object that owns `name`: the nearest override context or binding
    /// context that defines it, walking outwards through parents.
    ///
    /// When nothing defines `name`, the innermost binding context is returned
    /// (or the override context, if the binding context is not an object), so
    /// assignments to unknown names land on the view-model.
    #[must_use]
    pub fn owner_of(&self, name: &str) -> Value {
        let mut current = Some(self);
        while let Some(scope) = current {
            if scope.0.override_context.has(name) {
                return Value::Object(scope.0.override_context.clone());
            }
            if defines(&scope.0.binding_context, name) {
                return scope.0.binding_context.clone();
            }
            current = scope.parent();
        }
        match &self.0.binding_context {
            value @ (Value::Object(_) | Value::Host(_)) => value.clone(),
            _ => Value::Object(self.0.override_context.clone()),
        }
    }

    /// Resolve `name` to its current value.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Value {
        self.owner_of(name).get_property(name)
    }
}

fn defines(context: &Value, name: &str) -> bool {
    match context {
        Value::Object(object) => object.has(name),
        Value::Host(host) => !matches!(host.get_property(name), Value::Undefined),
        _ => false,
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("binding_context", &self.0.binding_context)
            .field("override_context", &self.0.override_context)
            .field("has_parent", &self.0.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_context_shadows_binding_context() {
        let vm = ObjectRef::from_pairs([("x", 1)]);
        let scope = Scope::new(vm.clone());
        assert_eq!(scope.resolve("x"), Value::from(1));

        scope.override_context().set("x", 2).unwrap();
        assert_eq!(scope.resolve("x"), Value::from(2));
        assert_eq!(vm.get("x"), Value::from(1));
    }

    #[test]
    fn child_falls_through_to_parent() {
        let outer = Scope::new(ObjectRef::from_pairs([("title", "Outer")]));
        let inner = outer.child(ObjectRef::from_pairs([("item", 3)]));
        assert_eq!(inner.resolve("item"), Value::from(3));
        assert_eq!(inner.resolve("title"), Value::from("Outer"));
        assert!(inner.parent().unwrap().same(&outer));
    }

    #[test]
    fn unknown_names_are_owned_by_innermost_binding_context() {
        let vm = ObjectRef::new();
        let outer = Scope::new(ObjectRef::new());
        let inner = outer.child(vm.clone());
        let owner = inner.owner_of("missing");
        assert!(owner.as_object().unwrap().ptr_eq(&vm));
        assert_eq!(inner.resolve("missing"), Value::Undefined);
    }

    #[test]
    fn same_is_identity() {
        let vm = ObjectRef::new();
        let a = Scope::new(vm.clone());
        let b = Scope::new(vm);
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
    }
}
