#![forbid(unsafe_code)]

//! Minimal expression trees for tests.
//!
//! Enabled by the `test-helpers` feature. These mirror the shapes a real
//! parser produces (scope access, member access, literals, conditionals,
//! calls) closely enough to drive bindings end to end, including precise
//! `connect` behavior: a [`Conditional`] only connects the branch it took.

use std::rc::Rc;

use crate::error::BindingError;
use crate::expression::{Connectable, Expression, ExpressionCapabilities, ExpressionRef, ServiceLocator};
use crate::flags::BindingFlags;
use crate::scope::Scope;
use crate::value::Value;

/// `name`, resolved through the scope chain.
#[derive(Debug, Clone)]
pub struct AccessScope {
    pub name: Rc<str>,
}

impl Expression for AccessScope {
    fn capabilities(&self) -> ExpressionCapabilities {
        ExpressionCapabilities::ASSIGN | ExpressionCapabilities::CONNECT
    }

    fn evaluate(
        &self,
        scope: &Scope,
        _locator: &dyn ServiceLocator,
        _flags: BindingFlags,
    ) -> Result<Value, BindingError> {
        Ok(scope.resolve(&self.name))
    }

    fn assign(
        &self,
        scope: &Scope,
        value: Value,
        _locator: &dyn ServiceLocator,
        flags: BindingFlags,
    ) -> Result<(), BindingError> {
        set_on(&scope.owner_of(&self.name), &self.name, value, flags)
    }

    fn connect(
        &self,
        binding: &dyn Connectable,
        scope: &Scope,
        _flags: BindingFlags,
    ) -> Result<(), BindingError> {
        binding.observe_property(&scope.owner_of(&self.name), &self.name)
    }

    fn describe(&self) -> String {
        self.name.to_string()
    }
}

/// `object.name`.
#[derive(Clone)]
pub struct AccessMember {
    pub object: ExpressionRef,
    pub name: Rc<str>,
}

impl Expression for AccessMember {
    fn capabilities(&self) -> ExpressionCapabilities {
        ExpressionCapabilities::ASSIGN | ExpressionCapabilities::CONNECT
    }

    fn evaluate(
        &self,
        scope: &Scope,
        locator: &dyn ServiceLocator,
        flags: BindingFlags,
    ) -> Result<Value, BindingError> {
        Ok(self
            .object
            .evaluate(scope, locator, flags)?
            .get_property(&self.name))
    }

    fn assign(
        &self,
        scope: &Scope,
        value: Value,
        locator: &dyn ServiceLocator,
        flags: BindingFlags,
    ) -> Result<(), BindingError> {
        let object = self.object.evaluate(scope, locator, flags)?;
        set_on(&object, &self.name, value, flags)
    }

    fn connect(
        &self,
        binding: &dyn Connectable,
        scope: &Scope,
        flags: BindingFlags,
    ) -> Result<(), BindingError> {
        self.object.connect(binding, scope, flags)?;
        let object = self.object.evaluate(scope, &crate::expression::NoServices, flags)?;
        if matches!(object, Value::Object(_) | Value::Host(_)) {
            binding.observe_property(&object, &self.name)?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{}.{}", self.object.describe(), self.name)
    }
}

/// A constant.
#[derive(Debug, Clone)]
pub struct Literal {
    pub value: Value,
}

impl Expression for Literal {
    fn evaluate(
        &self,
        _scope: &Scope,
        _locator: &dyn ServiceLocator,
        _flags: BindingFlags,
    ) -> Result<Value, BindingError> {
        Ok(self.value.clone())
    }

    fn describe(&self) -> String {
        format!("{:?}", self.value)
    }
}

/// `condition ? yes : no`.
#[derive(Clone)]
pub struct Conditional {
    pub condition: ExpressionRef,
    pub yes: ExpressionRef,
    pub no: ExpressionRef,
}

impl Conditional {
    fn branch(
        &self,
        scope: &Scope,
        locator: &dyn ServiceLocator,
        flags: BindingFlags,
    ) -> Result<&ExpressionRef, BindingError> {
        let taken = self.condition.evaluate(scope, locator, flags)?.is_truthy();
        Ok(if taken { &self.yes } else { &self.no })
    }
}

impl Expression for Conditional {
    fn capabilities(&self) -> ExpressionCapabilities {
        ExpressionCapabilities::CONNECT
    }

    fn evaluate(
        &self,
        scope: &Scope,
        locator: &dyn ServiceLocator,
        flags: BindingFlags,
    ) -> Result<Value, BindingError> {
        self.branch(scope, locator, flags)?.evaluate(scope, locator, flags)
    }

    fn connect(
        &self,
        binding: &dyn Connectable,
        scope: &Scope,
        flags: BindingFlags,
    ) -> Result<(), BindingError> {
        self.condition.connect(binding, scope, flags)?;
        self.branch(scope, &crate::expression::NoServices, flags)?
            .connect(binding, scope, flags)
    }

    fn describe(&self) -> String {
        format!(
            "{} ? {} : {}",
            self.condition.describe(),
            self.yes.describe(),
            self.no.describe()
        )
    }
}

/// `name(args...)`, calling a function found in scope.
#[derive(Clone)]
pub struct CallScope {
    pub name: Rc<str>,
    pub args: Vec<ExpressionRef>,
}

impl Expression for CallScope {
    fn capabilities(&self) -> ExpressionCapabilities {
        ExpressionCapabilities::CONNECT
    }

    fn evaluate(
        &self,
        scope: &Scope,
        locator: &dyn ServiceLocator,
        flags: BindingFlags,
    ) -> Result<Value, BindingError> {
        let function = scope.resolve(&self.name);
        let Value::Function(function) = function else {
            return Err(BindingError::NotCallable(self.name.to_string()));
        };
        let args = self
            .args
            .iter()
            .map(|arg| arg.evaluate(scope, locator, flags))
            .collect::<Result<Vec<_>, _>>()?;
        function.call(&args)
    }

    fn connect(
        &self,
        binding: &dyn Connectable,
        scope: &Scope,
        flags: BindingFlags,
    ) -> Result<(), BindingError> {
        for arg in &self.args {
            arg.connect(binding, scope, flags)?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        let args: Vec<String> = self.args.iter().map(|a| a.describe()).collect();
        format!("{}({})", self.name, args.join(", "))
    }
}

/// Always raises [`BindingError::Evaluation`].
#[derive(Debug, Clone)]
pub struct Failing {
    pub message: Rc<str>,
}

impl Expression for Failing {
    fn evaluate(
        &self,
        _scope: &Scope,
        _locator: &dyn ServiceLocator,
        _flags: BindingFlags,
    ) -> Result<Value, BindingError> {
        Err(BindingError::Evaluation(self.message.to_string()))
    }

    fn describe(&self) -> String {
        format!("fail({:?})", self.message)
    }
}

fn set_on(target: &Value, name: &str, value: Value, flags: BindingFlags) -> Result<(), BindingError> {
    match target {
        Value::Object(object) => object.set_with_flags(name, value, flags),
        Value::Host(host) => host.set_property(name, value),
        other => Err(BindingError::NotAssignable(format!(
            "property '{name}' of {}",
            other.type_name()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

#[must_use]
pub fn scope_access(name: &str) -> ExpressionRef {
    Rc::new(AccessScope { name: Rc::from(name) })
}

#[must_use]
pub fn member(object: ExpressionRef, name: &str) -> ExpressionRef {
    Rc::new(AccessMember {
        object,
        name: Rc::from(name),
    })
}

/// `a.b.c` as nested scope/member accesses.
#[must_use]
pub fn path(dotted: &str) -> ExpressionRef {
    let mut parts = dotted.split('.');
    let head = parts.next().unwrap_or_default();
    parts.fold(scope_access(head), member)
}

#[must_use]
pub fn literal(value: impl Into<Value>) -> ExpressionRef {
    Rc::new(Literal {
        value: value.into(),
    })
}

#[must_use]
pub fn conditional(condition: ExpressionRef, yes: ExpressionRef, no: ExpressionRef) -> ExpressionRef {
    Rc::new(Conditional { condition, yes, no })
}

#[must_use]
pub fn call_scope(name: &str, args: Vec<ExpressionRef>) -> ExpressionRef {
    Rc::new(CallScope {
        name: Rc::from(name),
        args,
    })
}

#[must_use]
pub fn failing(message: &str) -> ExpressionRef {
    Rc::new(Failing {
        message: Rc::from(message),
    })
}
