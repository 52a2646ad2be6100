//! Conversion traits for host/dynamic value interop
//!
//! [`IntoScript`] turns a Rust value into a [`HostValue`], which is only
//! materialized once the runtime's turn is active. [`FromScript`] reads a raw
//! [`ScriptValue`] into a Rust type, using the runtime's own canonical
//! conversions for primitives.
//!
//! Numbers follow a parse-and-preserve rule: floating point targets accept
//! NaN as-is, integer targets report it instead of clamping.

use std::any::type_name;
use std::fmt::Display;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::bridge;
use crate::error::{CoercionError, CoercionResult};
use crate::host::Scope;
use crate::operation::ScriptFuture;
use crate::value::{HostValue, Opaque, ScriptValue, ValueKind};

/// Maximum nesting followed by structural projection
pub const MAX_PROJECTION_DEPTH: usize = 64;

/// Convert a dynamic value to a Rust type.
///
/// The scope is needed because objects live in the runtime and primitive
/// conversions follow the runtime's rules.
///
/// # Example
///
/// ```rust,ignore
/// use script_proxy::{FromScript, ScriptValue};
///
/// let n = i32::from_script(ScriptValue::from("42"), scope)?;
/// assert_eq!(n, 42);
/// ```
pub trait FromScript: Sized {
    fn from_script(value: ScriptValue, scope: &mut dyn Scope) -> CoercionResult<Self>;
}

/// Convert a Rust value to a host value headed for the runtime.
///
/// Infallible; a value that cannot be represented becomes
/// [`HostValue::Fault`] and is reported when it reaches the runtime.
pub trait IntoScript {
    fn into_script(self) -> HostValue;
}

/// Structural projection through serde.
///
/// As a target, reads a dynamic object graph into any `DeserializeOwned` type.
/// As an argument, projects any `Serialize` type member-by-member into dynamic
/// object literals, keeping member names and order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

fn reject_objects(value: &ScriptValue, scope: &dyn Scope, expected: &'static str) -> CoercionResult<()> {
    match value {
        ScriptValue::Object(_) => Err(CoercionError::type_mismatch(expected, scope.kind_of(value))),
        ScriptValue::Task(_) => Err(CoercionError::PendingValue { expected }),
        _ => Ok(()),
    }
}

// ============================================================================
// Primitive Type Implementations
// ============================================================================

macro_rules! impl_script_integer {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromScript for $ty {
                fn from_script(value: ScriptValue, scope: &mut dyn Scope) -> CoercionResult<Self> {
                    let expected = type_name::<$ty>();
                    reject_objects(&value, scope, expected)?;
                    let n = scope.to_number(&value);
                    if n.is_nan() {
                        return Err(CoercionError::NotANumber { expected });
                    }
                    // MAX + 1 is a power of two, so the exclusive bound is exact in f64
                    // even where MAX itself rounds up
                    if n.is_infinite() || n < <$ty>::MIN as f64 || n >= <$ty>::MAX as f64 + 1.0 {
                        return Err(CoercionError::IntegerOverflow { value: n, expected });
                    }
                    if n.fract() != 0.0 {
                        return Err(CoercionError::NotIntegral { value: n, expected });
                    }
                    Ok(n as $ty)
                }
            }

            impl IntoScript for $ty {
                fn into_script(self) -> HostValue {
                    HostValue::Value(ScriptValue::Number(self as f64))
                }
            }
        )*
    };
}

impl_script_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl FromScript for f64 {
    fn from_script(value: ScriptValue, scope: &mut dyn Scope) -> CoercionResult<Self> {
        reject_objects(&value, scope, "f64")?;
        Ok(scope.to_number(&value))
    }
}

impl IntoScript for f64 {
    fn into_script(self) -> HostValue {
        HostValue::Value(ScriptValue::Number(self))
    }
}

impl FromScript for f32 {
    fn from_script(value: ScriptValue, scope: &mut dyn Scope) -> CoercionResult<Self> {
        reject_objects(&value, scope, "f32")?;
        Ok(scope.to_number(&value) as f32)
    }
}

impl IntoScript for f32 {
    fn into_script(self) -> HostValue {
        HostValue::Value(ScriptValue::Number(self as f64))
    }
}

impl FromScript for bool {
    fn from_script(value: ScriptValue, scope: &mut dyn Scope) -> CoercionResult<Self> {
        reject_objects(&value, scope, "bool")?;
        Ok(scope.to_boolean(&value))
    }
}

impl IntoScript for bool {
    fn into_script(self) -> HostValue {
        HostValue::Value(ScriptValue::Bool(self))
    }
}

impl FromScript for String {
    fn from_script(value: ScriptValue, scope: &mut dyn Scope) -> CoercionResult<Self> {
        reject_objects(&value, scope, "String")?;
        match value {
            ScriptValue::String(s) => Ok(s),
            other => Ok(scope.to_display_string(&other)),
        }
    }
}

impl IntoScript for String {
    fn into_script(self) -> HostValue {
        HostValue::Value(ScriptValue::String(self))
    }
}

impl IntoScript for &str {
    fn into_script(self) -> HostValue {
        HostValue::Value(ScriptValue::String(self.to_string()))
    }
}

// ============================================================================
// Pass-through Implementations
// ============================================================================

impl FromScript for ScriptValue {
    fn from_script(value: ScriptValue, _scope: &mut dyn Scope) -> CoercionResult<Self> {
        Ok(value)
    }
}

impl IntoScript for ScriptValue {
    fn into_script(self) -> HostValue {
        HostValue::Value(self)
    }
}

impl FromScript for Opaque {
    fn from_script(value: ScriptValue, scope: &mut dyn Scope) -> CoercionResult<Self> {
        Ok(Opaque::new(value, scope.context_id()))
    }
}

impl IntoScript for Opaque {
    fn into_script(self) -> HostValue {
        HostValue::Handle(self)
    }
}

impl IntoScript for HostValue {
    fn into_script(self) -> HostValue {
        self
    }
}

// ============================================================================
// Unit Type Implementation
// ============================================================================

impl FromScript for () {
    fn from_script(_value: ScriptValue, _scope: &mut dyn Scope) -> CoercionResult<Self> {
        Ok(())
    }
}

impl IntoScript for () {
    fn into_script(self) -> HostValue {
        HostValue::Value(ScriptValue::Undefined)
    }
}

// ============================================================================
// Option<T> / Result<T, E> Implementations
// ============================================================================

impl<T: FromScript> FromScript for Option<T> {
    fn from_script(value: ScriptValue, scope: &mut dyn Scope) -> CoercionResult<Self> {
        if value.is_nullish() {
            Ok(None)
        } else {
            T::from_script(value, scope).map(Some)
        }
    }
}

impl<T: IntoScript> IntoScript for Option<T> {
    fn into_script(self) -> HostValue {
        match self {
            Some(v) => v.into_script(),
            None => HostValue::Value(ScriptValue::Null),
        }
    }
}

/// `Err` becomes a fault: thrown from a host callable, rejected from a host
/// future.
impl<T: IntoScript, E: Display> IntoScript for Result<T, E> {
    fn into_script(self) -> HostValue {
        match self {
            Ok(v) => v.into_script(),
            Err(e) => HostValue::Fault(e.to_string()),
        }
    }
}

// ============================================================================
// Collection Implementations
// ============================================================================

impl<T: FromScript> FromScript for Vec<T> {
    fn from_script(value: ScriptValue, scope: &mut dyn Scope) -> CoercionResult<Self> {
        let kind = scope.kind_of(&value);
        if kind != ValueKind::Array {
            return Err(CoercionError::type_mismatch(type_name::<Self>(), kind));
        }
        scope
            .array_items(&value)?
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                T::from_script(item, scope).map_err(|e| CoercionError::array_element(i, e))
            })
            .collect()
    }
}

impl<T: IntoScript> IntoScript for Vec<T> {
    fn into_script(self) -> HostValue {
        HostValue::List(self.into_iter().map(IntoScript::into_script).collect())
    }
}

impl<T: FromScript> FromScript for IndexMap<String, T> {
    fn from_script(value: ScriptValue, scope: &mut dyn Scope) -> CoercionResult<Self> {
        let kind = scope.kind_of(&value);
        if kind != ValueKind::Object {
            return Err(CoercionError::type_mismatch(type_name::<Self>(), kind));
        }
        let mut map = IndexMap::new();
        for key in scope.keys(&value)? {
            let member = scope.get(&value, &key)?;
            let converted = T::from_script(member, scope).map_err(|e| CoercionError::field(&key, e))?;
            map.insert(key, converted);
        }
        Ok(map)
    }
}

impl<T: IntoScript> IntoScript for IndexMap<String, T> {
    fn into_script(self) -> HostValue {
        HostValue::Record(self.into_iter().map(|(k, v)| (k, v.into_script())).collect())
    }
}

// ============================================================================
// Structural Projection
// ============================================================================

fn number_to_json(n: f64) -> serde_json::Value {
    // keep integral numbers integral so integer fields deserialize
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

/// Read a dynamic value graph into JSON, following `JSON.stringify` rules for
/// functions and undefined members (skipped).
pub(crate) fn project(
    value: &ScriptValue,
    scope: &mut dyn Scope,
    depth: usize,
) -> CoercionResult<serde_json::Value> {
    use serde_json::Value;

    if depth > MAX_PROJECTION_DEPTH {
        return Err(CoercionError::DepthExceeded(MAX_PROJECTION_DEPTH));
    }
    match value {
        ScriptValue::Undefined | ScriptValue::Null => Ok(Value::Null),
        ScriptValue::Bool(b) => Ok(Value::Bool(*b)),
        ScriptValue::Number(n) => Ok(number_to_json(*n)),
        ScriptValue::String(s) => Ok(Value::String(s.clone())),
        ScriptValue::Task(_) => Err(CoercionError::PendingValue { expected: "json" }),
        ScriptValue::Object(_) => match scope.kind_of(value) {
            ValueKind::Array => {
                let items = scope.array_items(value)?;
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let projected = match scope.kind_of(item) {
                        ValueKind::Function | ValueKind::Undefined => Value::Null,
                        _ => project(item, scope, depth + 1)
                            .map_err(|e| CoercionError::array_element(i, e))?,
                    };
                    out.push(projected);
                }
                Ok(Value::Array(out))
            }
            ValueKind::Object => {
                let mut map = serde_json::Map::new();
                for key in scope.keys(value)? {
                    let member = scope.get(value, &key)?;
                    if matches!(scope.kind_of(&member), ValueKind::Function | ValueKind::Undefined) {
                        continue;
                    }
                    let projected =
                        project(&member, scope, depth + 1).map_err(|e| CoercionError::field(&key, e))?;
                    map.insert(key, projected);
                }
                Ok(Value::Object(map))
            }
            kind => Err(CoercionError::type_mismatch("json", kind)),
        },
    }
}

impl FromScript for serde_json::Value {
    fn from_script(value: ScriptValue, scope: &mut dyn Scope) -> CoercionResult<Self> {
        project(&value, scope, 0)
    }
}

impl IntoScript for serde_json::Value {
    fn into_script(self) -> HostValue {
        HostValue::from(self)
    }
}

impl<T: DeserializeOwned> FromScript for Json<T> {
    fn from_script(value: ScriptValue, scope: &mut dyn Scope) -> CoercionResult<Self> {
        let json = project(&value, scope, 0)?;
        Ok(Json(serde_json::from_value(json)?))
    }
}

impl<T: Serialize> IntoScript for Json<T> {
    fn into_script(self) -> HostValue {
        match serde_json::to_value(&self.0) {
            Ok(json) => HostValue::from(json),
            Err(e) => HostValue::Fault(e.to_string()),
        }
    }
}

// ============================================================================
// Futures
// ============================================================================

/// A host future passed to the runtime becomes a dynamic promise
impl<T: IntoScript + Send + 'static> IntoScript for ScriptFuture<T> {
    fn into_script(self) -> HostValue {
        HostValue::Pending(Box::pin(async move {
            match self.await {
                Ok(value) => value.into_script(),
                Err(e) => HostValue::Fault(e.to_string()),
            }
        }))
    }
}

// ============================================================================
// Materialization
// ============================================================================

fn check_owner(value: &ScriptValue, scope: &dyn Scope) -> CoercionResult<()> {
    match value.owner() {
        Some(found) if found != scope.context_id() => Err(CoercionError::ForeignHandle {
            expected: scope.context_id(),
            found,
        }),
        _ => Ok(()),
    }
}

impl HostValue {
    /// Build the dynamic value this host value describes.
    ///
    /// Must run on the target context's turn. Composites are projected
    /// member-by-member; callables and futures get bridged.
    pub fn materialize(self, scope: &mut dyn Scope) -> CoercionResult<ScriptValue> {
        match self {
            HostValue::Value(ScriptValue::Task(task)) => Ok(bridge::promise_from_task(scope, task)),
            HostValue::Value(value) => {
                check_owner(&value, scope)?;
                Ok(value)
            }
            HostValue::Handle(opaque) => {
                if opaque.context() != scope.context_id() {
                    return Err(CoercionError::ForeignHandle {
                        expected: scope.context_id(),
                        found: opaque.context(),
                    });
                }
                HostValue::Value(opaque.into_value()).materialize(scope)
            }
            HostValue::Record(fields) => {
                let object = scope.new_object();
                for (key, field) in fields {
                    let value = field
                        .materialize(scope)
                        .map_err(|e| CoercionError::field(&key, e))?;
                    scope.set(&object, &key, value)?;
                }
                Ok(object)
            }
            HostValue::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    values.push(
                        item.materialize(scope)
                            .map_err(|e| CoercionError::array_element(i, e))?,
                    );
                }
                Ok(scope.new_array(values))
            }
            HostValue::Function(function) => Ok(function.into_dynamic(scope)),
            HostValue::Pending(future) => Ok(bridge::promise_from_host(scope, future)),
            HostValue::Fault(message) => Err(CoercionError::HostFault(message)),
        }
    }
}
