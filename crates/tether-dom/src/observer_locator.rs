#![forbid(unsafe_code)]

//! Observer locator that knows about elements and components.
//!
//! | Target | Property | Observer |
//! |--------|----------|----------|
//! | `<select>` | `value` | [`SelectValueObserver`] |
//! | `<input>` / `<textarea>` | `value`, `checked` | [`ValueAttributeObserver`] |
//! | Registered component | `$children` | [`ChildrenObserver`] |
//! | Anything else | any | [`DefaultObserverLocator`] |
//!
//! Element observers are cached weakly per node, so every binding on the
//! same element property shares one observer while any of them is alive.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use tether_core::{Accessor, BindingError, ObjectRef, PropertyObserver, Value};
use tether_runtime::{DefaultObserverLocator, ObserverLocator, Services, TaskQueue};

use crate::children_observer::{CHILDREN_PROPERTY, ChildrenObserver};
use crate::node::Node;
use crate::select_value_observer::SelectValueObserver;
use crate::value_attribute_observer::ValueAttributeObserver;

pub struct DomObserverLocator {
    fallback: Rc<DefaultObserverLocator>,
    tasks: Rc<TaskQueue>,
    selects: RefCell<AHashMap<usize, Weak<SelectValueObserver>>>,
    inputs: RefCell<AHashMap<(usize, Rc<str>), Weak<ValueAttributeObserver>>>,
    children: RefCell<AHashMap<usize, Weak<ChildrenObserver>>>,
    hosts: RefCell<Vec<Weak<Node>>>,
}

impl DomObserverLocator {
    #[must_use]
    pub fn new(fallback: Rc<DefaultObserverLocator>, tasks: Rc<TaskQueue>) -> Self {
        Self {
            fallback,
            tasks,
            selects: RefCell::new(AHashMap::new()),
            inputs: RefCell::new(AHashMap::new()),
            children: RefCell::new(AHashMap::new()),
            hosts: RefCell::new(Vec::new()),
        }
    }

    /// Build from `services` and make it the locator bindings resolve.
    pub fn install(services: &Services) -> Result<Rc<Self>, BindingError> {
        let fallback = services.require::<DefaultObserverLocator>()?;
        let tasks = services.require::<TaskQueue>()?;
        let locator = Rc::new(Self::new(fallback, tasks));
        services.register(Rc::clone(&locator));
        services.set_observer_locator(Rc::clone(&locator) as Rc<dyn ObserverLocator>);
        tracing::debug!("dom observer locator installed");
        Ok(locator)
    }

    #[must_use]
    pub fn fallback(&self) -> &Rc<DefaultObserverLocator> {
        &self.fallback
    }

    /// Attach `component` to `host` and make its `$children` observable.
    pub fn register_component(&self, host: &Rc<Node>, component: ObjectRef) {
        host.attach_component(component);
        let mut hosts = self.hosts.borrow_mut();
        hosts.retain(|weak| weak.strong_count() > 0);
        if !hosts.iter().any(|weak| weak.as_ptr() == Rc::as_ptr(host)) {
            hosts.push(Rc::downgrade(host));
        }
    }

    fn host_of(&self, component: &ObjectRef) -> Option<Rc<Node>> {
        self.hosts
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .find(|host| host.component().is_some_and(|owned| owned.ptr_eq(component)))
    }

    #[must_use]
    pub fn select_observer(&self, node: &Rc<Node>) -> Rc<SelectValueObserver> {
        let mut cache = self.selects.borrow_mut();
        if let Some(existing) = cache.get(&node.identity()).and_then(Weak::upgrade) {
            return existing;
        }
        cache.retain(|_, weak| weak.strong_count() > 0);
        let created = SelectValueObserver::new(Rc::clone(node), Rc::clone(&self.tasks));
        cache.insert(node.identity(), Rc::downgrade(&created));
        created
    }

    #[must_use]
    pub fn value_observer(&self, node: &Rc<Node>, property: &str) -> Rc<ValueAttributeObserver> {
        let key = (node.identity(), Rc::from(property));
        let mut cache = self.inputs.borrow_mut();
        if let Some(existing) = cache.get(&key).and_then(Weak::upgrade) {
            return existing;
        }
        cache.retain(|_, weak| weak.strong_count() > 0);
        let created = ValueAttributeObserver::new(Rc::clone(node), property);
        cache.insert(key, Rc::downgrade(&created));
        created
    }

    fn children_observer(&self, component: &ObjectRef, host: &Rc<Node>) -> Rc<ChildrenObserver> {
        let mut cache = self.children.borrow_mut();
        if let Some(existing) = cache.get(&component.identity()).and_then(Weak::upgrade) {
            return existing;
        }
        cache.retain(|_, weak| weak.strong_count() > 0);
        let created = ChildrenObserver::new(component.clone(), host, Rc::clone(&self.tasks));
        cache.insert(component.identity(), Rc::downgrade(&created));
        created
    }

    fn element_observer(&self, target: &Value, property: &str) -> Option<ElementObserver> {
        if let Some(node) = Node::from_value(target) {
            if node.is_element("select") && property == "value" {
                return Some(ElementObserver::Select(self.select_observer(&node)));
            }
            if (node.is_element("input") || node.is_element("textarea"))
                && matches!(property, "value" | "checked")
            {
                return Some(ElementObserver::Input(self.value_observer(&node, property)));
            }
            return None;
        }
        if let Value::Object(component) = target {
            if property == CHILDREN_PROPERTY {
                let host = self.host_of(component)?;
                return Some(ElementObserver::Children(
                    self.children_observer(component, &host),
                ));
            }
        }
        None
    }
}

enum ElementObserver {
    Select(Rc<SelectValueObserver>),
    Input(Rc<ValueAttributeObserver>),
    Children(Rc<ChildrenObserver>),
}

impl ElementObserver {
    fn into_observer(self) -> Rc<dyn PropertyObserver> {
        match self {
            Self::Select(observer) => observer,
            Self::Input(observer) => observer,
            Self::Children(observer) => observer,
        }
    }

    fn into_accessor(self) -> Rc<dyn Accessor> {
        match self {
            Self::Select(observer) => observer,
            Self::Input(observer) => observer,
            Self::Children(observer) => observer,
        }
    }
}

impl ObserverLocator for DomObserverLocator {
    fn get_observer(
        &self,
        target: &Value,
        property: &str,
    ) -> Result<Rc<dyn PropertyObserver>, BindingError> {
        match self.element_observer(target, property) {
            Some(observer) => Ok(observer.into_observer()),
            None => self.fallback.get_observer(target, property),
        }
    }

    fn get_accessor(&self, target: &Value, property: &str) -> Result<Rc<dyn Accessor>, BindingError> {
        match self.element_observer(target, property) {
            Some(observer) => Ok(observer.into_accessor()),
            None => self.fallback.get_accessor(target, property),
        }
    }
}

impl std::fmt::Debug for DomObserverLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomObserverLocator")
            .field("selects", &self.selects.borrow().len())
            .field("inputs", &self.inputs.borrow().len())
            .field("children", &self.children.borrow().len())
            .field("hosts", &self.hosts.borrow().len())
            .finish()
    }
}
