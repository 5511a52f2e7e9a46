#![forbid(unsafe_code)]

//! Event objects delivered to listeners and exposed to expressions as
//! `$event`.
//!
//! An [`Event`] is a [`HostObject`]: expressions can read `type`, `target`,
//! `currentTarget`, `defaultPrevented`, `bubbles` and any key of its `detail`
//! bag. The dispatcher owns the phase bookkeeping (`current_target`,
//! propagation stop); handlers own `prevent_default`.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::BindingError;
use crate::value::{HostObject, HostRef, ObjectRef, Value};

/// A dispatched event.
pub struct Event {
    kind: Rc<str>,
    bubbles: bool,
    detail: ObjectRef,
    target: RefCell<Option<HostRef>>,
    current_target: RefCell<Option<HostRef>>,
    default_prevented: Cell<bool>,
    propagation_stopped: Cell<bool>,
}

impl Event {
    #[must_use]
    pub fn new(kind: &str, bubbles: bool) -> Rc<Self> {
        Self::with_detail(kind, bubbles, ObjectRef::new())
    }

    /// Create an event carrying extra readable properties.
    #[must_use]
    pub fn with_detail(kind: &str, bubbles: bool, detail: ObjectRef) -> Rc<Self> {
        Rc::new(Self {
            kind: Rc::from(kind),
            bubbles,
            detail,
            target: RefCell::new(None),
            current_target: RefCell::new(None),
            default_prevented: Cell::new(false),
            propagation_stopped: Cell::new(false),
        })
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn bubbles(&self) -> bool {
        self.bubbles
    }

    #[must_use]
    pub fn detail(&self) -> &ObjectRef {
        &self.detail
    }

    #[must_use]
    pub fn target(&self) -> Option<HostRef> {
        self.target.borrow().clone()
    }

    pub fn set_target(&self, target: Option<HostRef>) {
        *self.target.borrow_mut() = target;
    }

    #[must_use]
    pub fn current_target(&self) -> Option<HostRef> {
        self.current_target.borrow().clone()
    }

    pub fn set_current_target(&self, target: Option<HostRef>) {
        *self.current_target.borrow_mut() = target;
    }

    pub fn prevent_default(&self) {
        self.default_prevented.set(true);
    }

    #[must_use]
    pub fn default_prevented(&self) -> bool {
        self.default_prevented.get()
    }

    pub fn stop_propagation(&self) {
        self.propagation_stopped.set(true);
    }

    #[must_use]
    pub fn propagation_stopped(&self) -> bool {
        self.propagation_stopped.get()
    }

    /// Wrap as a [`Value`] for publishing into a scope.
    #[must_use]
    pub fn to_value(self: &Rc<Self>) -> Value {
        Value::Host(HostRef::new(Rc::clone(self)))
    }
}

fn host_or_null(host: Option<HostRef>) -> Value {
    host.map_or(Value::Null, Value::Host)
}

impl HostObject for Event {
    fn type_name(&self) -> &'static str {
        "Event"
    }

    fn get_property(&self, name: &str) -> Value {
        match name {
            "type" => Value::Str(Rc::clone(&self.kind)),
            "bubbles" => Value::Bool(self.bubbles),
            "defaultPrevented" => Value::Bool(self.default_prevented()),
            "target" => host_or_null(self.target()),
            "currentTarget" => host_or_null(self.current_target()),
            "detail" => Value::Object(self.detail.clone()),
            other => self.detail.get(other),
        }
    }

    fn set_property(&self, name: &str, value: Value) -> Result<(), BindingError> {
        match name {
            "type" | "bubbles" | "defaultPrevented" | "target" | "currentTarget" | "detail" => {
                Err(BindingError::NotAssignable(format!("Event.{name}")))
            }
            other => self.detail.set(other, value),
        }
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("type", &self.kind)
            .field("bubbles", &self.bubbles)
            .field("default_prevented", &self.default_prevented.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_fields_and_detail() {
        let event = Event::with_detail("change", true, ObjectRef::from_pairs([("key", "Enter")]));
        let value = event.to_value();
        assert_eq!(value.get_property("type"), Value::from("change"));
        assert_eq!(value.get_property("key"), Value::from("Enter"));
        assert_eq!(value.get_property("target"), Value::Null);
        assert_eq!(value.get_property("defaultPrevented"), Value::from(false));
        event.prevent_default();
        assert_eq!(value.get_property("defaultPrevented"), Value::from(true));
    }

    #[test]
    fn downcasts_back_to_event() {
        let event = Event::new("click", false);
        let host = HostRef::new(Rc::clone(&event));
        let back = host.downcast::<Event>().unwrap();
        assert!(Rc::ptr_eq(&back, &event));
    }

    #[test]
    fn builtin_fields_are_read_only() {
        let event = Event::new("input", true);
        assert!(event.set_property("type", Value::from("x")).is_err());
        event.set_property("extra", Value::from(1)).unwrap();
        assert_eq!(event.get_property("extra"), Value::from(1));
    }
}
