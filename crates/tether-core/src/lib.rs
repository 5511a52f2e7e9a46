#![forbid(unsafe_code)]

//! Core primitives for tether's binding engine.
//!
//! - [`flags`]: packed [`BindingFlags`] carried by every engine operation.
//! - [`value`]: the dynamic [`Value`] and shared object model.
//! - [`subscriber`]: `(context, subscriber)` fan-out.
//! - [`observation`]: accessor/observer contracts and the built-in
//!   setter and array observers.
//! - [`scope`]: binding context + override context.
//! - [`expression`]: the capability interface of parser-produced trees.
//! - [`event`]: event objects exposed to listeners.
//!
//! # Architecture
//!
//! Everything here is single-threaded (`Rc`/`RefCell`). Observers hold their
//! subscribers weakly, so a dropped binding silently falls out of every
//! collection it was registered in. No `RefCell` borrow is ever held across a
//! subscriber callback.

pub mod error;
pub mod event;
pub mod expression;
pub mod flags;
pub mod observation;
pub mod scope;
pub mod subscriber;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;
pub mod value;

pub use error::BindingError;
pub use event::Event;
pub use expression::{
    BindingHandle, Connectable, Expression, ExpressionCapabilities, ExpressionRef, NoServices,
    ServiceLocator,
};
pub use flags::{
    BindingDirection, BindingFlagSet, BindingFlags, BindingId, BindingMode, BindingOperation,
    BindingOrigin,
};
pub use observation::{Accessor, ArrayObserver, PropertyObserver, SetterObserver, Subscribable};
pub use scope::Scope;
pub use subscriber::{
    SOURCE_CONTEXT, Subscriber, SubscriberCollection, SubscriberContext, TARGET_CONTEXT,
};
pub use value::{ArrayRef, Callable, HostObject, HostRef, ObjectRef, Value};
