//! Error types for the static/dynamic boundary
//!
//! Each layer has its own enum: [`CoercionError`] for value conversion,
//! [`ScriptException`] for values thrown by dynamic code, [`HostError`] for the
//! runtime host collaborator and [`ProxyError`] for everything a caller of a
//! typed interface can observe.

use thiserror::Error;

use crate::factory::FactoryState;
use crate::value::{ContextId, ScriptValue, ValueKind};

/// Errors that can occur while converting values across the boundary
#[derive(Debug, Error)]
pub enum CoercionError {
    /// The dynamic value has a kind the target type cannot accept
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: ValueKind,
    },

    /// NaN has no integer representation
    #[error("NaN cannot be represented as {expected}")]
    NotANumber { expected: &'static str },

    /// A number with a fractional part was bound to an integer type
    #[error("Value {value} is not integral (expected {expected})")]
    NotIntegral { value: f64, expected: &'static str },

    /// Integer overflow during conversion
    #[error("Integer overflow: value {value} doesn't fit in {expected}")]
    IntegerOverflow { value: f64, expected: &'static str },

    /// A promise-like value was returned where a plain value was declared
    #[error("Pending value cannot satisfy non-future type {expected}")]
    PendingValue { expected: &'static str },

    /// A handle or object belongs to a different script context
    #[error("Handle belongs to context {found}, not {expected}")]
    ForeignHandle {
        expected: ContextId,
        found: ContextId,
    },

    /// A call argument could not be converted
    #[error("Argument {index} conversion failed: {source}")]
    Argument {
        index: usize,
        #[source]
        source: Box<CoercionError>,
    },

    /// Array element conversion failed
    #[error("Array element conversion failed at index {index}: {source}")]
    ArrayElement {
        index: usize,
        #[source]
        source: Box<CoercionError>,
    },

    /// Object field conversion failed
    #[error("Field '{field}' conversion failed: {source}")]
    Field {
        field: String,
        #[source]
        source: Box<CoercionError>,
    },

    /// Structural projection nested deeper than allowed (usually a cycle)
    #[error("Structural projection exceeded depth {0}")]
    DepthExceeded(usize),

    /// serde rejected the projected structure
    #[error("Structural projection failed: {0}")]
    Projection(#[from] serde_json::Error),

    /// A host value carried a fault where data was expected
    #[error("Host value is a fault: {0}")]
    HostFault(String),

    /// The runtime threw while the value was being read or built
    #[error("Dynamic access failed: {0}")]
    Dynamic(#[from] ScriptException),
}

impl CoercionError {
    /// Create a type mismatch error
    pub fn type_mismatch(expected: &'static str, found: ValueKind) -> Self {
        Self::TypeMismatch { expected, found }
    }

    /// Create a call argument error
    pub fn argument(index: usize, source: CoercionError) -> Self {
        Self::Argument {
            index,
            source: Box::new(source),
        }
    }

    /// Create an array element error
    pub fn array_element(index: usize, source: CoercionError) -> Self {
        Self::ArrayElement {
            index,
            source: Box::new(source),
        }
    }

    /// Create an object field error
    pub fn field(field: impl Into<String>, source: CoercionError) -> Self {
        Self::Field {
            field: field.into(),
            source: Box::new(source),
        }
    }
}

/// A value thrown by dynamic code, or an error raised by the runtime itself.
///
/// `value` keeps the thrown dynamic value when there is one, so a rejection
/// reason can round-trip without losing identity.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ScriptException {
    pub message: String,
    pub stack: Option<String>,
    pub value: Option<ScriptValue>,
}

impl ScriptException {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
            value: None,
        }
    }

    /// A `TypeError` raised by the runtime
    pub fn type_error(message: impl std::fmt::Display) -> Self {
        Self::new(format!("TypeError: {message}"))
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_value(mut self, value: ScriptValue) -> Self {
        self.value = Some(value);
        self
    }
}

/// Failures of the runtime host collaborator
#[derive(Debug, Error)]
pub enum HostError {
    /// The context was disposed or its runtime thread is gone
    #[error("Script context '{0}' has been disposed")]
    ContextDisposed(String),

    /// A blocking call into a context was made from its own runtime thread
    #[error("Re-entrant blocking call into script context '{0}'")]
    Reentrant(String),

    /// The runtime thread could not be started
    #[error("Failed to start runtime thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The script engine failed to initialize on its thread
    #[error("Script engine failed to start: {0}")]
    Engine(String),

    /// Loading or executing dynamic code threw
    #[error("Script error: {0}")]
    Script(#[from] ScriptException),
}

/// Everything a caller of a typed interface can observe
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The factory has not reached the state the operation needs
    #[error("Instance factory is not ready (state: {state})")]
    NotReady { state: FactoryState },

    /// The factory or its context has been disposed
    #[error("Instance factory has been disposed")]
    Disposed,

    /// No dynamic member name could be resolved for a method
    #[error("No binding could be resolved for method '{method}'")]
    BindingNotFound { method: String },

    /// Conversion error
    #[error("Coercion error: {0}")]
    Coercion(#[from] CoercionError),

    /// The dynamic member threw synchronously
    #[error("Dynamic member '{member}' threw: {}", .exception.message)]
    DynamicInvocation {
        member: String,
        exception: ScriptException,
    },

    /// The dynamic promise was rejected
    #[error("Dynamic member '{member}' rejected: {message}")]
    AsyncRejected {
        member: String,
        message: String,
        stack: Option<String>,
    },

    /// An async binding returned something that is not promise-like, or a
    /// pending value was observed twice
    #[error("Async bridge protocol violated by '{member}': {reason}")]
    AsyncBridgeProtocol { member: String, reason: String },

    /// Collaborator failure
    #[error("Host error: {0}")]
    Host(HostError),
}

impl From<HostError> for ProxyError {
    fn from(error: HostError) -> Self {
        match error {
            HostError::ContextDisposed(_) => ProxyError::Disposed,
            other => ProxyError::Host(other),
        }
    }
}

impl ProxyError {
    pub(crate) fn invocation(member: &str, exception: ScriptException) -> Self {
        Self::DynamicInvocation {
            member: member.to_string(),
            exception,
        }
    }

    pub(crate) fn protocol(member: &str, reason: impl Into<String>) -> Self {
        Self::AsyncBridgeProtocol {
            member: member.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for conversion operations
pub type CoercionResult<T> = Result<T, CoercionError>;

/// Result type for runtime host operations
pub type HostResult<T> = Result<T, HostError>;

/// Result type for typed interface operations
pub type ProxyResult<T> = Result<T, ProxyError>;
