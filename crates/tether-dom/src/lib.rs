#![forbid(unsafe_code)]

//! In-memory DOM for tether bindings.
//!
//! # Role
//! `tether-dom` is the mutable external object model bindings attach to:
//! a node tree with properties, event dispatch with capture and bubble
//! phases, and batched mutation observers.
//!
//! # Primary responsibilities
//! - **Tree**: [`Node`] elements and text, with option/select helpers.
//! - **Events**: [`dispatch_event`] and the delegating [`DomEventManager`].
//! - **Mutations**: [`MutationObserver`] batches records per micro task.
//! - **Element observers**: [`SelectValueObserver`],
//!   [`ValueAttributeObserver`] and [`ChildrenObserver`], resolved through
//!   [`DomObserverLocator`].
//!
//! # How it fits
//! Build [`Services::standard`](tether_runtime::Services::standard), call
//! [`DomObserverLocator::install`], and create a [`Document`] on the same
//! task queue. Bindings created afterwards see element-aware observers.

pub mod children_observer;
pub mod document;
pub mod events;
pub mod mutation;
pub mod node;
pub mod observer_locator;
pub mod select_value_observer;
pub mod value_attribute_observer;

pub use children_observer::{CHILDREN_CHANGED_HOOK, CHILDREN_PROPERTY, ChildrenObserver};
pub use document::Document;
pub use events::{DomEventManager, dispatch_event};
pub use mutation::{MutationCallback, MutationKind, MutationObserver, MutationRecord, ObserveOptions};
pub use node::{ListenerId, Node, NodeKind};
pub use observer_locator::DomObserverLocator;
pub use select_value_observer::{SELECT_ARRAY_CONTEXT, SelectValueObserver};
pub use value_attribute_observer::ValueAttributeObserver;
