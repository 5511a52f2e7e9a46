#![forbid(unsafe_code)]

//! In-memory element and text nodes.
//!
//! A [`Node`] is a [`HostObject`]: bindings read and write its properties
//! through the same `Value` paths they use for plain objects. Element
//! properties live in an opaque bag, so writes never notify on their own;
//! element-aware observers hook events or mutations instead.
//!
//! # Invariants
//!
//! 1. A node has at most one parent; inserting it elsewhere detaches it first.
//! 2. Child-list and character-data changes are reported to every mutation
//!    observer registered on the node, and to `subtree` observers registered
//!    on its ancestors.
//! 3. A node never holds a strong reference to its parent.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tether_core::{BindingError, HostObject, HostRef, ObjectRef, Value};
use tether_runtime::EventHandler;

use crate::mutation::{MutationKind, MutationObserver, MutationRecord, ObserveOptions};

/// Element or text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element { tag: Rc<str> },
    Text,
}

/// Handle returned by [`Node::add_event_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub(crate) struct ListenerEntry {
    pub(crate) id: ListenerId,
    pub(crate) event: Rc<str>,
    pub(crate) capture: bool,
    pub(crate) handler: Weak<dyn EventHandler>,
}

struct ObserverRegistration {
    observer: Weak<MutationObserver>,
    options: ObserveOptions,
}

/// A node in an in-memory document tree.
pub struct Node {
    this: Weak<Node>,
    kind: NodeKind,
    parent: RefCell<Weak<Node>>,
    children: RefCell<Vec<Rc<Node>>>,
    text: RefCell<Rc<str>>,
    properties: ObjectRef,
    listeners: RefCell<Vec<ListenerEntry>>,
    next_listener: Cell<u64>,
    component: RefCell<Option<ObjectRef>>,
    observers: RefCell<Vec<ObserverRegistration>>,
}

impl Node {
    fn create(kind: NodeKind, text: &str) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            kind,
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            text: RefCell::new(Rc::from(text)),
            properties: ObjectRef::opaque(),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(1),
            component: RefCell::new(None),
            observers: RefCell::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn element(tag: &str) -> Rc<Self> {
        Self::create(
            NodeKind::Element {
                tag: Rc::from(tag.to_ascii_lowercase()),
            },
            "",
        )
    }

    #[must_use]
    pub fn text(data: &str) -> Rc<Self> {
        Self::create(NodeKind::Text, data)
    }

    /// `<select>`, optionally with `multiple` set.
    #[must_use]
    pub fn select(multiple: bool) -> Rc<Self> {
        let node = Self::element("select");
        node.set("multiple", multiple);
        node
    }

    /// `<option value="…">label</option>`.
    pub fn option(value: &str, label: &str) -> Result<Rc<Self>, BindingError> {
        let node = Self::element("option");
        node.set("value", value);
        node.set("selected", false);
        node.append_child(&Self::text(label))?;
        Ok(node)
    }

    /// `<input>` with an empty `value`.
    #[must_use]
    pub fn input(input_type: &str) -> Rc<Self> {
        let node = Self::element("input");
        node.set("type", input_type);
        node.set("value", "");
        node.set("checked", false);
        node
    }

    fn rc(&self) -> Option<Rc<Node>> {
        self.this.upgrade()
    }

    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Lower-case tag name; `None` for text nodes.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Element { tag } => Some(tag),
            NodeKind::Text => None,
        }
    }

    #[must_use]
    pub fn is_element(&self, tag: &str) -> bool {
        self.tag() == Some(tag)
    }

    #[must_use]
    pub fn parent(&self) -> Option<Rc<Node>> {
        self.parent.borrow().upgrade()
    }

    #[must_use]
    pub fn children(&self) -> Vec<Rc<Node>> {
        self.children.borrow().clone()
    }

    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children.borrow().len()
    }

    /// This node followed by its ancestors, innermost first.
    #[must_use]
    pub fn ancestors_inclusive(self: &Rc<Self>) -> Vec<Rc<Node>> {
        let mut path = vec![Rc::clone(self)];
        let mut current = self.parent();
        while let Some(node) = current {
            current = node.parent();
            path.push(node);
        }
        path
    }

    /// Whether `self` is `other` or one of its ancestors.
    #[must_use]
    pub fn contains(self: &Rc<Self>, other: &Rc<Node>) -> bool {
        other
            .ancestors_inclusive()
            .iter()
            .any(|node| Rc::ptr_eq(node, self))
    }

    // ------------------------------------------------------------------
    // Tree mutation
    // ------------------------------------------------------------------

    pub fn append_child(&self, child: &Rc<Node>) -> Result<(), BindingError> {
        let index = self.child_count();
        self.insert_at(index, child)
    }

    /// Insert `child` before `reference`, or append when `reference` is not a
    /// child of this node.
    pub fn insert_before(&self, child: &Rc<Node>, reference: &Rc<Node>) -> Result<(), BindingError> {
        let index = self
            .children
            .borrow()
            .iter()
            .position(|existing| Rc::ptr_eq(existing, reference));
        match index {
            Some(index) => self.insert_at(index, child),
            None => self.append_child(child),
        }
    }

    fn insert_at(&self, index: usize, child: &Rc<Node>) -> Result<(), BindingError> {
        if matches!(self.kind, NodeKind::Text) {
            return Err(BindingError::UnsupportedTarget {
                target: "Text",
                property: "childNodes".to_string(),
            });
        }
        if let Some(me) = self.rc() {
            if child.contains(&me) {
                return Err(BindingError::Evaluation(
                    "cannot insert a node into its own subtree".to_string(),
                ));
            }
        }
        if let Some(previous) = child.parent() {
            previous.remove_child(child)?;
        }
        {
            let mut children = self.children.borrow_mut();
            let index = index.min(children.len());
            children.insert(index, Rc::clone(child));
        }
        *child.parent.borrow_mut() = self.this.clone();
        self.report(MutationKind::ChildList {
            added: vec![Rc::clone(child)],
            removed: Vec::new(),
        });
        Ok(())
    }

    /// Detach `child`. Returns whether it was a child of this node.
    pub fn remove_child(&self, child: &Rc<Node>) -> Result<bool, BindingError> {
        let removed = {
            let mut children = self.children.borrow_mut();
            match children.iter().position(|existing| Rc::ptr_eq(existing, child)) {
                Some(index) => Some(children.remove(index)),
                None => None,
            }
        };
        let Some(removed) = removed else {
            return Ok(false);
        };
        *removed.parent.borrow_mut() = Weak::new();
        self.report(MutationKind::ChildList {
            added: Vec::new(),
            removed: vec![removed],
        });
        Ok(true)
    }

    /// Remove every child.
    pub fn clear_children(&self) -> Result<(), BindingError> {
        let removed: Vec<_> = self.children.borrow_mut().drain(..).collect();
        if removed.is_empty() {
            return Ok(());
        }
        for child in &removed {
            *child.parent.borrow_mut() = Weak::new();
        }
        self.report(MutationKind::ChildList {
            added: Vec::new(),
            removed,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Text
    // ------------------------------------------------------------------

    /// Character data of a text node; empty for elements.
    #[must_use]
    pub fn data(&self) -> Rc<str> {
        Rc::clone(&self.text.borrow())
    }

    pub fn set_data(&self, data: &str) -> Result<(), BindingError> {
        if !matches!(self.kind, NodeKind::Text) {
            return Err(BindingError::UnsupportedTarget {
                target: "Element",
                property: "data".to_string(),
            });
        }
        if &**self.text.borrow() == data {
            return Ok(());
        }
        *self.text.borrow_mut() = Rc::from(data);
        self.report(MutationKind::CharacterData);
        Ok(())
    }

    /// Concatenated text of this node and its descendants.
    #[must_use]
    pub fn text_content(&self) -> String {
        match self.kind {
            NodeKind::Text => self.text.borrow().to_string(),
            NodeKind::Element { .. } => self
                .children
                .borrow()
                .iter()
                .map(|child| child.text_content())
                .collect(),
        }
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    /// Read a property; `undefined` when absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Value {
        self.properties.get(name)
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.properties.has(name)
    }

    /// Write a property. Never notifies.
    pub fn set(&self, name: &str, value: impl Into<Value>) {
        // The bag is opaque, so the write cannot fail or notify.
        let _ = self.properties.set(name, value);
    }

    /// The backing property bag.
    #[must_use]
    pub fn properties(&self) -> &ObjectRef {
        &self.properties
    }

    #[must_use]
    pub fn is_multiple(&self) -> bool {
        self.get("multiple").is_truthy()
    }

    /// `<option>` descendants in document order, including those nested in
    /// `<optgroup>`.
    #[must_use]
    pub fn options(&self) -> Vec<Rc<Node>> {
        let mut found = Vec::new();
        collect_options(&self.children.borrow(), &mut found);
        found
    }

    // ------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------

    pub fn attach_component(&self, component: ObjectRef) {
        *self.component.borrow_mut() = Some(component);
    }

    #[must_use]
    pub fn component(&self) -> Option<ObjectRef> {
        self.component.borrow().clone()
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn add_event_listener(
        &self,
        event: &str,
        capture: bool,
        handler: Weak<dyn EventHandler>,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.listeners.borrow_mut().push(ListenerEntry {
            id,
            event: Rc::from(event),
            capture,
            handler,
        });
        id
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        listeners.len() != before
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Live handlers for `event` in the given phase, in registration order.
    pub(crate) fn handlers_for(&self, event: &str, capture: bool) -> Vec<Rc<dyn EventHandler>> {
        let mut listeners = self.listeners.borrow_mut();
        listeners.retain(|entry| entry.handler.strong_count() > 0);
        listeners
            .iter()
            .filter(|entry| entry.capture == capture && &*entry.event == event)
            .filter_map(|entry| entry.handler.upgrade())
            .collect()
    }

    // ------------------------------------------------------------------
    // Mutation observers
    // ------------------------------------------------------------------

    pub(crate) fn register_observer(&self, observer: &Rc<MutationObserver>, options: ObserveOptions) {
        let mut observers = self.observers.borrow_mut();
        observers.retain(|entry| entry.observer.strong_count() > 0);
        let weak = Rc::downgrade(observer);
        match observers
            .iter_mut()
            .find(|entry| Weak::ptr_eq(&entry.observer, &weak))
        {
            Some(entry) => entry.options = options,
            None => observers.push(ObserverRegistration {
                observer: weak,
                options,
            }),
        }
    }

    pub(crate) fn unregister_observer(&self, observer: &MutationObserver) {
        self.observers
            .borrow_mut()
            .retain(|entry| !std::ptr::eq(entry.observer.as_ptr(), observer));
    }

    fn report(&self, kind: MutationKind) {
        let Some(target) = self.rc() else {
            return;
        };
        let wanted = match kind {
            MutationKind::ChildList { .. } => ObserveOptions::CHILD_LIST,
            MutationKind::CharacterData => ObserveOptions::CHARACTER_DATA,
        };
        let mut interested: Vec<Rc<MutationObserver>> = Vec::new();
        for (depth, node) in target.ancestors_inclusive().iter().enumerate() {
            for entry in node.observers.borrow().iter() {
                if !entry.options.contains(wanted) {
                    continue;
                }
                if depth > 0 && !entry.options.contains(ObserveOptions::SUBTREE) {
                    continue;
                }
                if let Some(observer) = entry.observer.upgrade() {
                    if !interested.iter().any(|seen| Rc::ptr_eq(seen, &observer)) {
                        interested.push(observer);
                    }
                }
            }
        }
        if interested.is_empty() {
            return;
        }
        let record = MutationRecord {
            target,
            kind,
        };
        for observer in interested {
            observer.enqueue(record.clone());
        }
    }

    // ------------------------------------------------------------------
    // Host bridging
    // ------------------------------------------------------------------

    /// Wrap as a host [`Value`].
    #[must_use]
    pub fn to_value(self: &Rc<Self>) -> Value {
        Value::Host(self.host_ref())
    }

    #[must_use]
    pub fn host_ref(self: &Rc<Self>) -> HostRef {
        HostRef::new(Rc::clone(self))
    }

    /// The node behind a host value, if it is one.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Rc<Node>> {
        value.as_host()?.downcast::<Node>()
    }

    /// Address-based identity, stable while the node is alive.
    #[must_use]
    pub fn identity(self: &Rc<Self>) -> usize {
        Rc::as_ptr(self) as *const () as usize
    }
}

fn collect_options(nodes: &[Rc<Node>], found: &mut Vec<Rc<Node>>) {
    for node in nodes {
        if node.is_element("option") {
            found.push(Rc::clone(node));
        } else if node.is_element("optgroup") {
            collect_options(&node.children.borrow(), found);
        }
    }
}

impl HostObject for Node {
    fn type_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Element { .. } => "Element",
            NodeKind::Text => "Text",
        }
    }

    fn get_property(&self, name: &str) -> Value {
        match name {
            "tagName" => self.tag().map_or(Value::Undefined, |tag| {
                Value::from(tag.to_ascii_uppercase())
            }),
            "textContent" => Value::from(self.text_content()),
            "data" if matches!(self.kind, NodeKind::Text) => Value::Str(self.data()),
            "parentNode" => self.parent().map_or(Value::Null, |parent| parent.to_value()),
            "childElementCount" => Value::Number(self.child_count() as f64),
            _ => self.get(name),
        }
    }

    fn set_property(&self, name: &str, value: Value) -> Result<(), BindingError> {
        match name {
            "tagName" | "parentNode" | "childElementCount" => {
                Err(BindingError::NotAssignable(format!("Node.{name}")))
            }
            "data" if matches!(self.kind, NodeKind::Text) => {
                let text = value.as_str().map(str::to_string).unwrap_or_default();
                self.set_data(&text)
            }
            _ => {
                self.set(name, value);
                Ok(())
            }
        }
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            NodeKind::Element { tag } => f
                .debug_struct("Element")
                .field("tag", tag)
                .field("children", &self.child_count())
                .field("listeners", &self.listener_count())
                .finish(),
            NodeKind::Text => f.debug_tuple("Text").field(&self.data()).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_reparents() {
        let a = Node::element("div");
        let b = Node::element("div");
        let child = Node::element("span");
        a.append_child(&child).unwrap();
        b.append_child(&child).unwrap();
        assert_eq!(a.child_count(), 0);
        assert!(Rc::ptr_eq(&child.parent().unwrap(), &b));
    }

    #[test]
    fn cannot_insert_ancestor_into_descendant() {
        let outer = Node::element("div");
        let inner = Node::element("div");
        outer.append_child(&inner).unwrap();
        assert!(inner.append_child(&outer).is_err());
    }

    #[test]
    fn insert_before_orders_children() {
        let list = Node::element("ul");
        let first = Node::element("li");
        let second = Node::element("li");
        list.append_child(&second).unwrap();
        list.insert_before(&first, &second).unwrap();
        let children = list.children();
        assert!(Rc::ptr_eq(&children[0], &first));
        assert!(Rc::ptr_eq(&children[1], &second));
    }

    #[test]
    fn options_include_optgroups() {
        let select = Node::select(false);
        let group = Node::element("optgroup");
        select.append_child(&Node::option("a", "A").unwrap()).unwrap();
        group.append_child(&Node::option("b", "B").unwrap()).unwrap();
        select.append_child(&group).unwrap();
        let values: Vec<_> = select.options().iter().map(|o| o.get("value")).collect();
        assert_eq!(values, [Value::from("a"), Value::from("b")]);
        assert_eq!(select.text_content(), "AB");
    }

    #[test]
    fn host_value_round_trips() {
        let node = Node::input("text");
        let value = node.to_value();
        assert!(Rc::ptr_eq(&Node::from_value(&value).unwrap(), &node));
        assert_eq!(value.get_property("tagName"), Value::from("INPUT"));
        value.as_host().unwrap().set_property("value", Value::from("x")).unwrap();
        assert_eq!(node.get("value"), Value::from("x"));
        assert!(value.as_host().unwrap().set_property("tagName", Value::Null).is_err());
    }

    #[test]
    fn text_nodes_reject_children() {
        let text = Node::text("hi");
        assert!(text.append_child(&Node::element("b")).is_err());
        text.set_data("bye").unwrap();
        assert_eq!(text.text_content(), "bye");
    }
}
