#![forbid(unsafe_code)]

//! Dynamic values and the shared mutable object model bindings operate on.
//!
//! Expressions evaluate to [`Value`]s. Reference kinds ([`ObjectRef`],
//! [`ArrayRef`], [`Callable`], [`HostRef`]) are `Rc`-backed handles, so
//! cloning a `Value` never copies the underlying object.
//!
//! # Equality
//!
//! Every "only on change" check in the engine uses [`Value::strict_eq`]:
//! primitives compare by value (with `NaN != NaN`), reference kinds compare by
//! identity. `PartialEq` for `Value` is the same relation.
//!
//! # Interception
//!
//! Objects created with [`ObjectRef::new`] are *interceptable*: writes through
//! [`ObjectRef::set`] notify the property's [`SetterObserver`] when the value
//! strictly changes. Objects created with [`ObjectRef::opaque`] and properties
//! defined with [`ObjectRef::define_getter`] cannot notify; the observer
//! locator serves them through dirty checking instead.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ahash::AHashMap;

use crate::error::BindingError;
use crate::flags::BindingFlags;
use crate::observation::{ArrayObserver, SetterObserver};

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A dynamically typed value produced by expression evaluation.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(Callable),
    Host(HostRef),
}

impl Value {
    /// Strict equality: by value for primitives, by identity for references.
    #[must_use]
    pub fn strict_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a.ptr_eq(b),
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            (Self::Host(a), Self::Host(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// `undefined` or `null`.
    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
            Self::Array(_) | Self::Object(_) | Self::Function(_) | Self::Host(_) => true,
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Function(_) => "function",
            Self::Host(h) => h.type_name(),
        }
    }

    /// Address of the referenced allocation, for reference kinds.
    #[must_use]
    pub fn identity(&self) -> Option<usize> {
        match self {
            Self::Array(a) => Some(a.identity()),
            Self::Object(o) => Some(o.identity()),
            Self::Function(f) => Some(f.identity()),
            Self::Host(h) => Some(h.identity()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_function(&self) -> Option<&Callable> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_host(&self) -> Option<&HostRef> {
        match self {
            Self::Host(h) => Some(h),
            _ => None,
        }
    }

    /// Read a property of an object or host value; `undefined` otherwise.
    #[must_use]
    pub fn get_property(&self, name: &str) -> Value {
        match self {
            Self::Object(o) => o.get(name),
            Self::Host(h) => h.get_property(name),
            Self::Array(a) if name == "length" => Value::Number(a.len() as f64),
            _ => Value::Undefined,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_eq(other)
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Array(a) => std::fmt::Debug::fmt(a, f),
            Self::Object(o) => std::fmt::Debug::fmt(o, f),
            Self::Function(c) => std::fmt::Debug::fmt(c, f),
            Self::Host(h) => std::fmt::Debug::fmt(h, f),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(Rc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(Rc::from(value))
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Self::Object(value)
    }
}

impl From<ArrayRef> for Value {
    fn from(value: ArrayRef) -> Self {
        Self::Array(value)
    }
}

impl From<Callable> for Value {
    fn from(value: Callable) -> Self {
        Self::Function(value)
    }
}

impl From<HostRef> for Value {
    fn from(value: HostRef) -> Self {
        Self::Host(value)
    }
}

// ---------------------------------------------------------------------------
// ObjectRef
// ---------------------------------------------------------------------------

/// Computed property body.
pub type Getter = Rc<dyn Fn(&ObjectRef) -> Value>;

pub(crate) enum Slot {
    Data(Value),
    Getter(Getter),
}

pub(crate) struct ObjectData {
    slots: RefCell<AHashMap<Rc<str>, Slot>>,
    observers: RefCell<AHashMap<Rc<str>, Rc<SetterObserver>>>,
    interceptable: bool,
}

/// Shared handle to a mutable property bag.
#[derive(Clone)]
pub struct ObjectRef(pub(crate) Rc<ObjectData>);

impl ObjectRef {
    /// Create an empty interceptable object.
    #[must_use]
    pub fn new() -> Self {
        Self::with_interception(true)
    }

    /// Create an object whose writes cannot be intercepted.
    ///
    /// Observing its properties falls back to dirty checking.
    #[must_use]
    pub fn opaque() -> Self {
        Self::with_interception(false)
    }

    fn with_interception(interceptable: bool) -> Self {
        Self(Rc::new(ObjectData {
            slots: RefCell::new(AHashMap::new()),
            observers: RefCell::new(AHashMap::new()),
            interceptable,
        }))
    }

    /// Create an interceptable object from key/value pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let object = Self::new();
        {
            let mut slots = object.0.slots.borrow_mut();
            for (key, value) in pairs {
                slots.insert(Rc::from(key.as_ref()), Slot::Data(value.into()));
            }
        }
        object
    }

    /// Read a property; `undefined` when absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Value {
        let getter = match self.0.slots.borrow().get(name) {
            None => return Value::Undefined,
            Some(Slot::Data(value)) => return value.clone(),
            Some(Slot::Getter(getter)) => Rc::clone(getter),
        };
        getter(self)
    }

    /// Whether the object has an own property `name`.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.0.slots.borrow().contains_key(name)
    }

    /// Write a property, notifying its observer if the value strictly changed.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<(), BindingError> {
        self.set_with_flags(name, value.into(), BindingFlags::empty())
    }

    /// Write a property, forwarding `flags` to the notification.
    pub fn set_with_flags(
        &self,
        name: &str,
        value: Value,
        flags: BindingFlags,
    ) -> Result<(), BindingError> {
        let old = {
            let mut slots = self.0.slots.borrow_mut();
            match slots.get_mut(name) {
                Some(Slot::Getter(_)) => {
                    return Err(BindingError::NotAssignable(format!(
                        "getter-only property '{name}'"
                    )));
                }
                Some(Slot::Data(current)) => std::mem::replace(current, value.clone()),
                None => {
                    slots.insert(Rc::from(name), Slot::Data(value.clone()));
                    Value::Undefined
                }
            }
        };

        if old.strict_eq(&value) {
            return Ok(());
        }

        let observer = self.0.observers.borrow().get(name).cloned();
        match observer {
            Some(observer) => observer.notify(&value, &old, flags),
            None => Ok(()),
        }
    }

    /// Remove an own property, returning its previous value.
    ///
    /// An existing observer is notified that the value became `undefined`.
    pub fn delete(&self, name: &str) -> Result<Option<Value>, BindingError> {
        let removed = self.0.slots.borrow_mut().remove(name);
        let old = match removed {
            None => return Ok(None),
            Some(Slot::Data(value)) => value,
            Some(Slot::Getter(_)) => return Ok(Some(Value::Undefined)),
        };

        if !matches!(old, Value::Undefined) {
            let observer = self.0.observers.borrow().get(name).cloned();
            if let Some(observer) = observer {
                observer.notify(&Value::Undefined, &old, BindingFlags::empty())?;
            }
        }
        Ok(Some(old))
    }

    /// Define a computed (getter-only) property.
    pub fn define_getter(&self, name: &str, getter: impl Fn(&ObjectRef) -> Value + 'static) {
        self.0
            .slots
            .borrow_mut()
            .insert(Rc::from(name), Slot::Getter(Rc::new(getter)));
    }

    /// Own property names, in unspecified order.
    #[must_use]
    pub fn keys(&self) -> Vec<Rc<str>> {
        self.0.slots.borrow().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.slots.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.slots.borrow().is_empty()
    }

    /// Whether writes to `name` can be intercepted.
    #[must_use]
    pub fn is_interceptable(&self, name: &str) -> bool {
        self.0.interceptable && !matches!(self.0.slots.borrow().get(name), Some(Slot::Getter(_)))
    }

    /// Get (creating on first use) the change-notifying observer for `name`.
    ///
    /// Returns `None` when the property cannot be intercepted.
    #[must_use]
    pub fn property_observer(&self, name: &str) -> Option<Rc<SetterObserver>> {
        if !self.is_interceptable(name) {
            return None;
        }
        let mut observers = self.0.observers.borrow_mut();
        let observer = observers
            .entry(Rc::from(name))
            .or_insert_with(|| Rc::new(SetterObserver::new(Rc::downgrade(&self.0), name)));
        Some(Rc::clone(observer))
    }

    /// The observer for `name`, only if one was already created.
    #[must_use]
    pub fn existing_observer(&self, name: &str) -> Option<Rc<SetterObserver>> {
        self.0.observers.borrow().get(name).cloned()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn from_weak(weak: &Weak<ObjectData>) -> Option<Self> {
        weak.upgrade().map(Self)
    }
}

impl Default for ObjectRef {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self.keys().iter().map(|k| k.to_string()).collect();
        keys.sort();
        f.debug_struct("Object")
            .field("keys", &keys)
            .field("interceptable", &self.0.interceptable)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ArrayRef
// ---------------------------------------------------------------------------

pub(crate) struct ArrayData {
    items: RefCell<Vec<Value>>,
    observer: RefCell<Option<Rc<ArrayObserver>>>,
}

/// Shared handle to a mutable list.
///
/// Every mutator notifies the array's [`ArrayObserver`], if one exists.
#[derive(Clone)]
pub struct ArrayRef(pub(crate) Rc<ArrayData>);

impl ArrayRef {
    #[must_use]
    pub fn new() -> Self {
        Self::from_values(Vec::<Value>::new())
    }

    pub fn from_values<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Self(Rc::new(ArrayData {
            items: RefCell::new(values.into_iter().map(Into::into).collect()),
            observer: RefCell::new(None),
        }))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.items.borrow().is_empty()
    }

    /// Item at `index`; `undefined` when out of range.
    #[must_use]
    pub fn get(&self, index: usize) -> Value {
        self.0.items.borrow().get(index).cloned().unwrap_or_default()
    }

    /// Snapshot of the current items.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.items.borrow().clone()
    }

    /// Index of the first item matching `predicate`.
    pub fn position(&self, mut predicate: impl FnMut(&Value) -> bool) -> Option<usize> {
        self.0.items.borrow().iter().position(|item| predicate(item))
    }

    pub fn push(&self, value: impl Into<Value>) -> Result<(), BindingError> {
        self.0.items.borrow_mut().push(value.into());
        self.notify()
    }

    /// Insert at `index`, clamped to the current length.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<(), BindingError> {
        {
            let mut items = self.0.items.borrow_mut();
            let index = index.min(items.len());
            items.insert(index, value.into());
        }
        self.notify()
    }

    /// Remove and return the item at `index`, if any.
    pub fn remove(&self, index: usize) -> Result<Option<Value>, BindingError> {
        let removed = {
            let mut items = self.0.items.borrow_mut();
            (index < items.len()).then(|| items.remove(index))
        };
        if removed.is_some() {
            self.notify()?;
        }
        Ok(removed)
    }

    /// Replace the item at `index`, padding with `undefined` when past the end.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<(), BindingError> {
        {
            let mut items = self.0.items.borrow_mut();
            if index >= items.len() {
                let len = index
                    .checked_add(1)
                    .ok_or_else(|| BindingError::Evaluation(format!("array index {index} out of range")))?;
                items.resize(len, Value::Undefined);
            }
            items[index] = value.into();
        }
        self.notify()
    }

    /// Keep only items matching `keep`. Notifies only if something was removed.
    pub fn retain(&self, mut keep: impl FnMut(&Value) -> bool) -> Result<(), BindingError> {
        let removed = {
            let mut items = self.0.items.borrow_mut();
            let before = items.len();
            items.retain(|item| keep(item));
            items.len() != before
        };
        if removed { self.notify() } else { Ok(()) }
    }

    pub fn clear(&self) -> Result<(), BindingError> {
        let was_empty = {
            let mut items = self.0.items.borrow_mut();
            let was_empty = items.is_empty();
            items.clear();
            was_empty
        };
        if was_empty { Ok(()) } else { self.notify() }
    }

    /// Get (creating on first use) the array's change observer.
    #[must_use]
    pub fn observer(&self) -> Rc<ArrayObserver> {
        let mut slot = self.0.observer.borrow_mut();
        let observer = slot.get_or_insert_with(|| Rc::new(ArrayObserver::new(Rc::downgrade(&self.0))));
        Rc::clone(observer)
    }

    #[must_use]
    pub fn existing_observer(&self) -> Option<Rc<ArrayObserver>> {
        self.0.observer.borrow().clone()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn from_weak(weak: &Weak<ArrayData>) -> Option<Self> {
        weak.upgrade().map(Self)
    }

    fn notify(&self) -> Result<(), BindingError> {
        let observer = self.0.observer.borrow().clone();
        match observer {
            Some(observer) => observer.notify(self),
            None => Ok(()),
        }
    }
}

impl Default for ArrayRef {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.0.items.borrow().iter()).finish()
    }
}

// ---------------------------------------------------------------------------
// Callable
// ---------------------------------------------------------------------------

/// Native function body.
pub type NativeFn = dyn Fn(&[Value]) -> Result<Value, BindingError>;

/// Shared function value.
#[derive(Clone)]
pub struct Callable(Rc<NativeFn>);

impl Callable {
    pub fn new(f: impl Fn(&[Value]) -> Result<Value, BindingError> + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, BindingError> {
        (self.0)(args)
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl std::fmt::Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Function@{:#x}", self.identity())
    }
}

// ---------------------------------------------------------------------------
// Host objects
// ---------------------------------------------------------------------------

/// An externally owned object (DOM node, event, ...) exposed to bindings.
pub trait HostObject: Any {
    /// Short type label used in diagnostics.
    fn type_name(&self) -> &'static str;

    fn get_property(&self, name: &str) -> Value;

    fn set_property(&self, name: &str, value: Value) -> Result<(), BindingError>;

    /// Upcast for downcasting through [`HostRef::downcast`].
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

/// Shared handle to a [`HostObject`].
#[derive(Clone)]
pub struct HostRef(Rc<dyn HostObject>);

impl HostRef {
    pub fn new<T: HostObject>(object: Rc<T>) -> Self {
        Self(object)
    }

    /// Recover the concrete host type.
    #[must_use]
    pub fn downcast<T: HostObject>(&self) -> Option<Rc<T>> {
        Rc::clone(&self.0).into_any().downcast::<T>().ok()
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.0.type_name()
    }

    #[must_use]
    pub fn get_property(&self, name: &str) -> Value {
        self.0.get_property(name)
    }

    pub fn set_property(&self, name: &str, value: Value) -> Result<(), BindingError> {
        self.0.set_property(name, value)
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }

    #[must_use]
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl std::fmt::Debug for HostRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{:#x}", self.type_name(), self.identity())
    }
}
