//! ScriptValue - values as they exist on either side of the boundary
//!
//! [`ScriptValue`] is the raw dynamic value a runtime hands to the host: a
//! primitive, an opaque reference to an object the runtime owns, or a host-side
//! generic future the runtime already produced for a promise.
//!
//! [`HostValue`] goes the other way: an owned description of a host value that
//! is materialized into the runtime on its own turn.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use indexmap::IndexMap;

use crate::function::HostFunction;
use crate::operation::TaskHandle;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one script context for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Allocate a fresh id; runtime hosts call this once per context
    pub fn next() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A non-owning reference to an object living in a script context.
///
/// Only meaningful to the context that issued it. Using it after that context
/// is gone, or inside another context, fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    context: ContextId,
    slot: u64,
}

impl ObjectRef {
    /// Runtime hosts mint references for their own objects
    pub fn new(context: ContextId, slot: u64) -> Self {
        Self { context, slot }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn slot(&self) -> u64 {
        self.slot
    }
}

/// The coarse kind of a dynamic value, as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Object,
    Array,
    Function,
    Promise,
    /// A host-side future standing in for a promise
    Task,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Undefined => "undefined",
            ValueKind::Null => "null",
            ValueKind::Boolean => "boolean",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Object => "object",
            ValueKind::Array => "array",
            ValueKind::Function => "function",
            ValueKind::Promise => "promise",
            ValueKind::Task => "task",
        };
        f.write_str(name)
    }
}

/// A raw value of the dynamic runtime.
#[derive(Debug, Clone, Default)]
pub enum ScriptValue {
    /// Absent value
    #[default]
    Undefined,

    /// Null value
    Null,

    /// Boolean value
    Bool(bool),

    /// The runtime's only numeric type; NaN is a legal value
    Number(f64),

    /// String value (owned, UTF-8)
    String(String),

    /// Reference to an object, array, function or promise owned by the runtime
    Object(ObjectRef),

    /// A promise the runtime already converted into a host-side future
    Task(TaskHandle),
}

impl PartialEq for ScriptValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ScriptValue::Undefined, ScriptValue::Undefined) => true,
            (ScriptValue::Null, ScriptValue::Null) => true,
            (ScriptValue::Bool(a), ScriptValue::Bool(b)) => a == b,
            (ScriptValue::Number(a), ScriptValue::Number(b)) => a == b,
            (ScriptValue::String(a), ScriptValue::String(b)) => a == b,
            (ScriptValue::Object(a), ScriptValue::Object(b)) => a == b,
            (ScriptValue::Task(a), ScriptValue::Task(b)) => a.same_task(b),
            _ => false,
        }
    }
}

impl ScriptValue {
    /// Kind of a value that needs no runtime lookup; `None` for objects
    pub fn primitive_kind(&self) -> Option<ValueKind> {
        match self {
            ScriptValue::Undefined => Some(ValueKind::Undefined),
            ScriptValue::Null => Some(ValueKind::Null),
            ScriptValue::Bool(_) => Some(ValueKind::Boolean),
            ScriptValue::Number(_) => Some(ValueKind::Number),
            ScriptValue::String(_) => Some(ValueKind::String),
            ScriptValue::Task(_) => Some(ValueKind::Task),
            ScriptValue::Object(_) => None,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, ScriptValue::Undefined | ScriptValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScriptValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScriptValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            ScriptValue::Object(r) => Some(*r),
            _ => None,
        }
    }

    /// The context owning this value, if it is an object reference
    pub fn owner(&self) -> Option<ContextId> {
        self.as_object().map(|r| r.context())
    }
}

impl From<bool> for ScriptValue {
    fn from(v: bool) -> Self {
        ScriptValue::Bool(v)
    }
}

impl From<f64> for ScriptValue {
    fn from(v: f64) -> Self {
        ScriptValue::Number(v)
    }
}

impl From<i32> for ScriptValue {
    fn from(v: i32) -> Self {
        ScriptValue::Number(v as f64)
    }
}

impl From<&str> for ScriptValue {
    fn from(v: &str) -> Self {
        ScriptValue::String(v.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(v: String) -> Self {
        ScriptValue::String(v)
    }
}

impl From<ObjectRef> for ScriptValue {
    fn from(v: ObjectRef) -> Self {
        ScriptValue::Object(v)
    }
}

/// A dynamic value passed through the host untouched.
///
/// Returned for methods declared as "any" and accepted back as an argument.
/// It remembers the context it came from so it cannot leak into another one.
#[derive(Debug, Clone, PartialEq)]
pub struct Opaque {
    value: ScriptValue,
    context: ContextId,
}

impl Opaque {
    pub fn new(value: ScriptValue, context: ContextId) -> Self {
        Self { value, context }
    }

    pub fn value(&self) -> &ScriptValue {
        &self.value
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn into_value(self) -> ScriptValue {
        self.value
    }
}

/// An owned host value on its way into a runtime.
///
/// Produced by [`IntoScript`](crate::IntoScript); turned into a [`ScriptValue`]
/// by [`HostValue::materialize`] while the runtime's turn is active.
pub enum HostValue {
    /// A value that needs no allocation (primitives, existing references)
    Value(ScriptValue),

    /// A previously returned opaque value
    Handle(Opaque),

    /// Named members, projected into an object literal in order
    Record(IndexMap<String, HostValue>),

    /// Elements, projected into an array
    List(Vec<HostValue>),

    /// Host code callable from the runtime
    Function(HostFunction),

    /// A host future; becomes a dynamic promise settled when it completes
    Pending(BoxFuture<'static, HostValue>),

    /// A host failure; thrown or rejected when it reaches the runtime
    Fault(String),
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            HostValue::Handle(h) => f.debug_tuple("Handle").field(h).finish(),
            HostValue::Record(fields) => f.debug_tuple("Record").field(fields).finish(),
            HostValue::List(items) => f.debug_tuple("List").field(items).finish(),
            HostValue::Function(func) => f.debug_tuple("Function").field(func).finish(),
            HostValue::Pending(_) => f.write_str("Pending(..)"),
            HostValue::Fault(message) => f.debug_tuple("Fault").field(message).finish(),
        }
    }
}

impl From<ScriptValue> for HostValue {
    fn from(value: ScriptValue) -> Self {
        HostValue::Value(value)
    }
}

impl From<serde_json::Value> for HostValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => HostValue::Value(ScriptValue::Null),
            Value::Bool(b) => HostValue::Value(ScriptValue::Bool(b)),
            Value::Number(n) => HostValue::Value(ScriptValue::Number(n.as_f64().unwrap_or(f64::NAN))),
            Value::String(s) => HostValue::Value(ScriptValue::String(s)),
            Value::Array(items) => HostValue::List(items.into_iter().map(HostValue::from).collect()),
            Value::Object(map) => HostValue::Record(
                map.into_iter().map(|(k, v)| (k, HostValue::from(v))).collect(),
            ),
        }
    }
}
