#![forbid(unsafe_code)]

//! Error taxonomy for the binding engine.
//!
//! # Failure Modes
//!
//! | Failure | Class | Behavior |
//! |---------|-------|----------|
//! | Unrecognized notification context | Programming error | Returned, logged at `error` |
//! | Assigning to a non-assignable expression | Programming error | Returned, logged at `error` |
//! | Behavior applied to a binding kind it cannot modify | Programming error | Returned from `bind` |
//! | Non-array bound to a multi-select | Runtime data error | Returned from the setter |
//! | Expression raised during evaluation | Runtime data error | Propagated unchanged |
//! | Stale dependency mid-evaluation | Transient | Not an error; pruned on next connect |

/// Errors raised by bindings, observers and their collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingError {
    /// A subscriber was notified with a context it does not understand.
    UnknownContext(String),
    /// The expression has no `assign` capability.
    NotAssignable(String),
    /// A value that is not callable was invoked.
    NotCallable(String),
    /// A multi-select element was given something other than an array or null.
    MultiSelectRequiresArray,
    /// A required service was not registered with the locator.
    ServiceMissing(&'static str),
    /// The observer locator cannot observe this target/property pair.
    UnsupportedTarget {
        target: &'static str,
        property: String,
    },
    /// A behavior was applied to a binding kind it does not support.
    UnsupportedBehavior(&'static str),
    /// An expression raised during evaluation.
    Evaluation(String),
    /// A configuration value was rejected.
    InvalidConfig(String),
    /// A micro-task flush did not settle within the configured iteration cap.
    FlushLimitExceeded(usize),
}

impl BindingError {
    /// Whether this error signals a defect in calling code rather than bad data.
    #[must_use]
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownContext(_)
                | Self::NotAssignable(_)
                | Self::NotCallable(_)
                | Self::ServiceMissing(_)
                | Self::UnsupportedTarget { .. }
                | Self::UnsupportedBehavior(_)
        )
    }
}

impl std::fmt::Display for BindingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownContext(context) => write!(f, "unknown notification context: {context}"),
            Self::NotAssignable(expr) => write!(f, "expression is not assignable: {expr}"),
            Self::NotCallable(what) => write!(f, "value is not callable: {what}"),
            Self::MultiSelectRequiresArray => write!(
                f,
                "only null or array instances can be bound to a multi-select"
            ),
            Self::ServiceMissing(service) => write!(f, "service not registered: {service}"),
            Self::UnsupportedTarget { target, property } => {
                write!(f, "cannot observe property '{property}' of {target}")
            }
            Self::UnsupportedBehavior(behavior) => {
                write!(f, "'{behavior}' behavior only supports event bindings")
            }
            Self::Evaluation(msg) => write!(f, "evaluation failed: {msg}"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::FlushLimitExceeded(limit) => {
                write!(f, "micro-task flush exceeded {limit} iterations")
            }
        }
    }
}

impl std::error::Error for BindingError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_programming_errors() {
        assert!(BindingError::UnknownContext("x".into()).is_programming_error());
        assert!(BindingError::NotAssignable("a + b".into()).is_programming_error());
        assert!(BindingError::UnsupportedBehavior("self").is_programming_error());
        assert!(!BindingError::MultiSelectRequiresArray.is_programming_error());
        assert!(!BindingError::Evaluation("boom".into()).is_programming_error());
    }

    #[test]
    fn display_is_readable() {
        let err = BindingError::UnsupportedTarget {
            target: "array",
            property: "name".into(),
        };
        assert_eq!(err.to_string(), "cannot observe property 'name' of array");
        assert_eq!(
            BindingError::FlushLimitExceeded(10).to_string(),
            "micro-task flush exceeded 10 iterations"
        );
    }
}
