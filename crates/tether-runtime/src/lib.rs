#![forbid(unsafe_code)]

//! Binding runtime for tether.
//!
//! # Role
//! `tether-runtime` owns the binding lifecycle: property bindings
//! ([`Binding`]), event listeners ([`Listener`]) and call bindings
//! ([`Call`]), plus the infrastructure they share.
//!
//! # Primary responsibilities
//! - **Dependency tracking**: [`DependencyTracker`] keeps each binding's
//!   source subscriptions equal to the properties its last evaluation read.
//! - **Batching**: [`ConnectQueue`] defers the first connect of to-view
//!   bindings; [`TaskQueue`] flushes it ahead of deferred micro tasks.
//! - **Polling fallback**: [`DirtyChecker`] observes properties that cannot
//!   notify, and stops polling once nothing is tracked.
//! - **Resolution**: [`ObserverLocator`] picks the observer for a property;
//!   [`Services`] hands shared singletons to bindings.
//!
//! # How it fits
//! Hosts build [`Services::standard`], create bindings against it, bind them
//! to a [`Scope`](tether_core::Scope), and call [`TaskQueue::flush`] at the
//! end of each synchronous turn. `tether-dom` layers element-aware observers
//! on top through [`Services::set_observer_locator`].

pub mod behaviors;
pub mod binding;
pub mod call;
pub mod change_handlers;
pub mod config;
pub mod connect_queue;
pub mod connectable;
pub mod dirty_checker;
pub mod listener;
pub mod observer_locator;
pub mod services;
pub mod task_queue;
pub mod timer;

pub use behaviors::{ModeOverride, SelfOnly};
pub use binding::{Bindable, Binding};
pub use call::{Call, EVENT_KEY};
pub use change_handlers::{
    CHANGE_HANDLER_CONTEXT, ChangeCallback, ChangeHandlers, ChangeHandlersBuilder,
    ChangeSubscription, ComponentRegistry,
};
pub use config::{DEFAULT_DIRTY_CHECK_INTERVAL, DEFAULT_MAX_FLUSH_ITERATIONS, RuntimeConfig};
pub use connect_queue::{ConnectQueue, QueuedConnect};
pub use connectable::DependencyTracker;
pub use dirty_checker::{DirtyCheckProperty, DirtyChecker};
pub use listener::{DelegationStrategy, Disposable, EventHandler, EventManager, Listener};
pub use observer_locator::{DefaultObserverLocator, ObserverLocator, PropertyAccessor, write_property};
pub use services::Services;
pub use task_queue::{MicroTask, TaskQueue};
pub use timer::{Clock, ManualClock, SystemClock, Timer, TimerCallback, TimerId, TimerQueue};
