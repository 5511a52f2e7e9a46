#![forbid(unsafe_code)]

//! tether public facade and prelude.
//!
//! Re-exports the member crates under short names and gathers the types most
//! bindings need into [`prelude`].
//!
//! ```ignore
//! use tether::prelude::*;
//!
//! let services = Services::standard(RuntimeConfig::from_env()?, Rc::new(SystemClock::new()));
//! DomObserverLocator::install(&services)?;
//! ```

pub use tether_core as core;
#[cfg(feature = "dom")]
pub use tether_dom as dom;
#[cfg(feature = "runtime")]
pub use tether_runtime as runtime;

pub use tether_core::{BindingError, BindingFlags, BindingMode, ObjectRef, Scope, Value};

pub mod prelude {
    pub use tether_core::{
        Accessor, ArrayRef, BindingError, BindingFlags, BindingMode, Callable, Event, Expression,
        ExpressionRef, ObjectRef, Scope, Subscribable, Subscriber, SubscriberContext, Value,
    };

    #[cfg(feature = "runtime")]
    pub use tether_runtime::{
        Bindable, Binding, Call, DelegationStrategy, Listener, ModeOverride, ObserverLocator,
        RuntimeConfig, SelfOnly, Services, SystemClock, TaskQueue,
    };

    #[cfg(feature = "dom")]
    pub use tether_dom::{Document, DomObserverLocator, Node};
}
