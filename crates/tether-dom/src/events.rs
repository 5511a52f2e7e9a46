#![forbid(unsafe_code)]

//! Event dispatch and the DOM event manager.
//!
//! # Dispatch phases
//!
//! ```text
//! root ──capture──▶ … ──capture──▶ parent ──▶ target ──▶ parent ──bubble──▶ … root
//! ```
//!
//! Capture listeners run from the root down to the target's parent, the
//! target runs its capture then bubble listeners, and bubble listeners run
//! back up to the root when the event bubbles. `stop_propagation` takes
//! effect once the current node's listeners have run.
//!
//! # Delegation
//!
//! [`DomEventManager`] registers delegated handlers once per
//! `(event, phase)` on the document root. The root listener walks the event
//! path and invokes the handlers registered for each node on it.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use tether_core::{BindingError, Event, Value};
use tether_runtime::{DelegationStrategy, Disposable, EventHandler, EventManager};

use crate::node::{ListenerId, Node};

fn run_handlers(
    node: &Rc<Node>,
    event: &Rc<Event>,
    capture: bool,
    first_error: &mut Option<BindingError>,
) {
    event.set_current_target(Some(node.host_ref()));
    for handler in node.handlers_for(event.kind(), capture) {
        if let Err(err) = handler.handle_event(event) {
            tracing::warn!(event = event.kind(), error = %err, "event handler failed");
            first_error.get_or_insert(err);
        }
    }
}

/// Dispatch `event` at `target`.
///
/// Returns `Ok(true)` unless a handler called `prevent_default`. Every
/// handler on the path runs even if an earlier one fails; the first failure
/// is returned.
pub fn dispatch_event(target: &Rc<Node>, event: &Rc<Event>) -> Result<bool, BindingError> {
    event.set_target(Some(target.host_ref()));
    let path = target.ancestors_inclusive();
    let mut first_error = None;

    'phases: {
        for node in path.iter().skip(1).rev() {
            run_handlers(node, event, true, &mut first_error);
            if event.propagation_stopped() {
                break 'phases;
            }
        }

        run_handlers(target, event, true, &mut first_error);
        run_handlers(target, event, false, &mut first_error);
        if event.propagation_stopped() || !event.bubbles() {
            break 'phases;
        }

        for node in path.iter().skip(1) {
            run_handlers(node, event, false, &mut first_error);
            if event.propagation_stopped() {
                break 'phases;
            }
        }
    }

    event.set_current_target(None);
    match first_error {
        Some(err) => Err(err),
        None => Ok(!event.default_prevented()),
    }
}

// ----------------------------------------------------------------------------
// Delegation
// ----------------------------------------------------------------------------

struct Delegate {
    id: u64,
    node: Weak<Node>,
    handler: Weak<dyn EventHandler>,
}

/// Root listener that fans a delegated event out to per-node handlers.
struct DelegateRouter {
    capture: bool,
    delegates: RefCell<Vec<Delegate>>,
    next_id: Cell<u64>,
}

impl DelegateRouter {
    fn new(capture: bool) -> Self {
        Self {
            capture,
            delegates: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        }
    }

    fn add(&self, node: &Rc<Node>, handler: Weak<dyn EventHandler>) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.delegates.borrow_mut().push(Delegate {
            id,
            node: Rc::downgrade(node),
            handler,
        });
        id
    }

    fn remove(&self, id: u64) {
        self.delegates.borrow_mut().retain(|delegate| delegate.id != id);
    }

    fn len(&self) -> usize {
        self.delegates.borrow().len()
    }

    fn handlers_on(&self, node: &Rc<Node>) -> Vec<Rc<dyn EventHandler>> {
        let mut delegates = self.delegates.borrow_mut();
        delegates.retain(|delegate| delegate.handler.strong_count() > 0);
        delegates
            .iter()
            .filter(|delegate| delegate.node.as_ptr() == Rc::as_ptr(node))
            .filter_map(|delegate| delegate.handler.upgrade())
            .collect()
    }
}

impl EventHandler for DelegateRouter {
    fn handle_event(&self, event: &Rc<Event>) -> Result<(), BindingError> {
        let Some(target) = event.target().and_then(|host| host.downcast::<Node>()) else {
            return Ok(());
        };
        let mut path = target.ancestors_inclusive();
        if self.capture {
            path.reverse();
        }
        let root_target = event.current_target();
        let mut first_error = None;
        for node in &path {
            let handlers = self.handlers_on(node);
            if handlers.is_empty() {
                continue;
            }
            event.set_current_target(Some(node.host_ref()));
            for handler in handlers {
                if let Err(err) = handler.handle_event(event) {
                    first_error.get_or_insert(err);
                }
            }
            if event.propagation_stopped() {
                break;
            }
        }
        event.set_current_target(root_target);
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

struct DirectRegistration {
    node: Weak<Node>,
    id: ListenerId,
}

impl Disposable for DirectRegistration {
    fn dispose(&self) {
        if let Some(node) = self.node.upgrade() {
            node.remove_event_listener(self.id);
        }
    }
}

struct DelegatedRegistration {
    router: Weak<DelegateRouter>,
    id: u64,
}

impl Disposable for DelegatedRegistration {
    fn dispose(&self) {
        if let Some(router) = self.router.upgrade() {
            router.remove(self.id);
        }
    }
}

/// [`EventManager`] over [`Node`] targets with optional root delegation.
pub struct DomEventManager {
    root: Rc<Node>,
    routers: RefCell<AHashMap<(Rc<str>, bool), Rc<DelegateRouter>>>,
}

impl DomEventManager {
    #[must_use]
    pub fn new(root: Rc<Node>) -> Self {
        Self {
            root,
            routers: RefCell::new(AHashMap::new()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Rc<Node> {
        &self.root
    }

    /// Number of live delegated handlers for `event` in the given phase.
    #[must_use]
    pub fn delegated_count(&self, event: &str, capture: bool) -> usize {
        self.routers
            .borrow()
            .get(&(Rc::from(event), capture))
            .map_or(0, |router| router.len())
    }

    fn router(&self, event: &str, capture: bool) -> Rc<DelegateRouter> {
        let key = (Rc::from(event), capture);
        if let Some(router) = self.routers.borrow().get(&key) {
            return Rc::clone(router);
        }
        let router = Rc::new(DelegateRouter::new(capture));
        let weak: Weak<DelegateRouter> = Rc::downgrade(&router);
        self.root.add_event_listener(event, capture, weak);
        tracing::debug!(event, capture, "delegating at root");
        self.routers.borrow_mut().insert(key, Rc::clone(&router));
        router
    }
}

impl EventManager for DomEventManager {
    fn add_event_listener(
        &self,
        target: &Value,
        event_name: &str,
        handler: Weak<dyn EventHandler>,
        strategy: DelegationStrategy,
    ) -> Result<Box<dyn Disposable>, BindingError> {
        let Some(node) = Node::from_value(target) else {
            return Err(BindingError::UnsupportedTarget {
                target: target.type_name(),
                property: event_name.to_string(),
            });
        };
        match strategy {
            DelegationStrategy::None => {
                let id = node.add_event_listener(event_name, false, handler);
                Ok(Box::new(DirectRegistration {
                    node: Rc::downgrade(&node),
                    id,
                }))
            }
            DelegationStrategy::Capturing | DelegationStrategy::Bubbling => {
                let capture = strategy == DelegationStrategy::Capturing;
                let router = self.router(event_name, capture);
                let id = router.add(&node, handler);
                Ok(Box::new(DelegatedRegistration {
                    router: Rc::downgrade(&router),
                    id,
                }))
            }
        }
    }
}

impl std::fmt::Debug for DomEventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomEventManager")
            .field("root", &self.root)
            .field("routers", &self.routers.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Tag {
        name: &'static str,
        log: Log,
        stop: bool,
        prevent: bool,
    }

    impl EventHandler for Tag {
        fn handle_event(&self, event: &Rc<Event>) -> Result<(), BindingError> {
            self.log.borrow_mut().push(self.name.to_string());
            if self.stop {
                event.stop_propagation();
            }
            if self.prevent {
                event.prevent_default();
            }
            Ok(())
        }
    }

    fn tag(name: &'static str, log: &Log) -> Rc<Tag> {
        Rc::new(Tag {
            name,
            log: Rc::clone(log),
            stop: false,
            prevent: false,
        })
    }

    fn weak(handler: &Rc<Tag>) -> Weak<dyn EventHandler> {
        let weak: Weak<Tag> = Rc::downgrade(handler);
        weak
    }

    fn tree() -> (Rc<Node>, Rc<Node>, Rc<Node>) {
        let root = Node::element("body");
        let parent = Node::element("div");
        let target = Node::element("button");
        root.append_child(&parent).unwrap();
        parent.append_child(&target).unwrap();
        (root, parent, target)
    }

    #[test]
    fn phases_run_in_order() {
        let log: Log = Rc::default();
        let (root, parent, target) = tree();
        let handlers = [
            tag("root-capture", &log),
            tag("parent-capture", &log),
            tag("target", &log),
            tag("parent-bubble", &log),
            tag("root-bubble", &log),
        ];
        root.add_event_listener("click", true, weak(&handlers[0]));
        parent.add_event_listener("click", true, weak(&handlers[1]));
        target.add_event_listener("click", false, weak(&handlers[2]));
        parent.add_event_listener("click", false, weak(&handlers[3]));
        root.add_event_listener("click", false, weak(&handlers[4]));

        assert!(dispatch_event(&target, &Event::new("click", true)).unwrap());
        assert_eq!(
            log.borrow().as_slice(),
            ["root-capture", "parent-capture", "target", "parent-bubble", "root-bubble"]
        );

        log.borrow_mut().clear();
        dispatch_event(&target, &Event::new("click", false)).unwrap();
        assert_eq!(
            log.borrow().as_slice(),
            ["root-capture", "parent-capture", "target"]
        );
    }

    #[test]
    fn stop_propagation_and_prevent_default() {
        let log: Log = Rc::default();
        let (root, parent, target) = tree();
        let stopper = Rc::new(Tag {
            name: "parent",
            log: Rc::clone(&log),
            stop: true,
            prevent: true,
        });
        let root_handler = tag("root", &log);
        parent.add_event_listener("click", false, weak(&stopper));
        root.add_event_listener("click", false, weak(&root_handler));

        let allowed = dispatch_event(&target, &Event::new("click", true)).unwrap();
        assert!(!allowed);
        assert_eq!(log.borrow().as_slice(), ["parent"]);
    }

    #[test]
    fn delegated_handlers_share_one_root_listener() {
        let log: Log = Rc::default();
        let (root, parent, target) = tree();
        let manager = DomEventManager::new(Rc::clone(&root));
        let on_target = tag("target", &log);
        let on_parent = tag("parent", &log);
        let first = manager
            .add_event_listener(&target.to_value(), "click", weak(&on_target), DelegationStrategy::Bubbling)
            .unwrap();
        let _second = manager
            .add_event_listener(&parent.to_value(), "click", weak(&on_parent), DelegationStrategy::Bubbling)
            .unwrap();
        assert_eq!(root.listener_count(), 1);
        assert_eq!(manager.delegated_count("click", false), 2);

        dispatch_event(&target, &Event::new("click", true)).unwrap();
        assert_eq!(log.borrow().as_slice(), ["target", "parent"]);

        first.dispose();
        log.borrow_mut().clear();
        dispatch_event(&target, &Event::new("click", true)).unwrap();
        assert_eq!(log.borrow().as_slice(), ["parent"]);
    }

    #[test]
    fn capturing_delegation_runs_outermost_first() {
        let log: Log = Rc::default();
        let (root, parent, target) = tree();
        let manager = DomEventManager::new(Rc::clone(&root));
        let on_target = tag("target", &log);
        let on_parent = tag("parent", &log);
        let _a = manager
            .add_event_listener(&target.to_value(), "focus", weak(&on_target), DelegationStrategy::Capturing)
            .unwrap();
        let _b = manager
            .add_event_listener(&parent.to_value(), "focus", weak(&on_parent), DelegationStrategy::Capturing)
            .unwrap();
        dispatch_event(&target, &Event::new("focus", false)).unwrap();
        assert_eq!(log.borrow().as_slice(), ["parent", "target"]);
    }

    #[test]
    fn direct_registration_disposes() {
        let log: Log = Rc::default();
        let (root, _parent, target) = tree();
        let manager = DomEventManager::new(root);
        let handler = tag("direct", &log);
        let registration = manager
            .add_event_listener(&target.to_value(), "click", weak(&handler), DelegationStrategy::None)
            .unwrap();
        assert_eq!(target.listener_count(), 1);
        registration.dispose();
        assert_eq!(target.listener_count(), 0);
    }

    #[test]
    fn non_node_targets_are_rejected() {
        let log: Log = Rc::default();
        let manager = DomEventManager::new(Node::element("body"));
        let handler = tag("x", &log);
        assert!(manager
            .add_event_listener(&Value::Null, "click", weak(&handler), DelegationStrategy::None)
            .is_err());
    }
}
