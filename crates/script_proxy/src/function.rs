//! Host callables exposed to the runtime
//!
//! A [`HostFunction`] wraps Rust code so dynamic code can call it. Arguments
//! are read with [`FromScript`], the return value goes back through
//! [`IntoScript`]. Async variants return a host future, which the runtime sees
//! as a promise.
//!
//! ```rust,ignore
//! let double = HostFunction::new(|x: f64| x * 2.0);
//! let fetch = HostFunction::from_async(|id: u32| async move { lookup(id).await });
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::convert::{FromScript, IntoScript};
use crate::error::ScriptException;
use crate::host::Scope;
use crate::value::{HostValue, ScriptValue};

type Thunk = Arc<dyn Fn(&mut dyn Scope, Vec<ScriptValue>) -> HostValue + Send + Sync>;

/// Rust code callable from the runtime
#[derive(Clone)]
pub struct HostFunction {
    name: String,
    thunk: Thunk,
}

impl HostFunction {
    /// Wrap a closure whose arguments implement [`FromScript`] and whose
    /// result implements [`IntoScript`]
    pub fn new<M, F: IntoHostFunction<M>>(f: F) -> Self {
        f.into_host_function()
    }

    /// Wrap a closure returning a future; the runtime gets a promise
    pub fn from_async<M, F: IntoAsyncHostFunction<M>>(f: F) -> Self {
        f.into_async_host_function()
    }

    /// Wrap a closure working on raw values
    pub fn raw<F>(f: F) -> Self
    where
        F: Fn(&mut dyn Scope, Vec<ScriptValue>) -> HostValue + Send + Sync + 'static,
    {
        Self {
            name: "hostFunction".to_string(),
            thunk: Arc::new(f),
        }
    }

    /// Name reported by the dynamic function object
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke directly, as the runtime would
    pub fn invoke(&self, scope: &mut dyn Scope, args: Vec<ScriptValue>) -> HostValue {
        (self.thunk)(scope, args)
    }

    /// Build the dynamic function object that calls back into this closure.
    ///
    /// A fault returned by the closure is thrown; any other result is
    /// materialized, so async results become promises.
    pub(crate) fn into_dynamic(self, scope: &mut dyn Scope) -> ScriptValue {
        let name = self.name.clone();
        scope.new_function(
            &name,
            Arc::new(move |scope, _this, args| match self.invoke(scope, args) {
                HostValue::Fault(message) => Err(ScriptException::new(message)),
                value => value
                    .materialize(scope)
                    .map_err(|e| ScriptException::new(e.to_string())),
            }),
        )
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction").field("name", &self.name).finish()
    }
}

impl IntoScript for HostFunction {
    fn into_script(self) -> HostValue {
        HostValue::Function(self)
    }
}

/// Closures usable as a synchronous [`HostFunction`]
pub trait IntoHostFunction<Marker> {
    fn into_host_function(self) -> HostFunction;
}

/// Closures usable as an asynchronous [`HostFunction`]
pub trait IntoAsyncHostFunction<Marker> {
    fn into_async_host_function(self) -> HostFunction;
}

macro_rules! read_args {
    ($scope:ident, $args:ident; $($arg:ident),*) => {
        #[allow(unused_mut)]
        let mut _iter = $args.into_iter();
        $(
            let $arg = match $arg::from_script(_iter.next().unwrap_or_default(), $scope) {
                Ok(v) => v,
                Err(e) => return HostValue::Fault(e.to_string()),
            };
        )*
    };
}

macro_rules! impl_host_function {
    ($($arg:ident),*) => {
        #[allow(non_snake_case)]
        impl<F, R, $($arg,)*> IntoHostFunction<fn($($arg,)*) -> R> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: IntoScript,
            $($arg: FromScript,)*
        {
            fn into_host_function(self) -> HostFunction {
                HostFunction::raw(move |scope, args| {
                    let _ = &scope;
                    read_args!(scope, args; $($arg),*);
                    (self)($($arg),*).into_script()
                })
            }
        }

        #[allow(non_snake_case)]
        impl<F, Fut, R, $($arg,)*> IntoAsyncHostFunction<fn($($arg,)*) -> Fut> for F
        where
            F: Fn($($arg),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = R> + Send + 'static,
            R: IntoScript,
            $($arg: FromScript,)*
        {
            fn into_async_host_function(self) -> HostFunction {
                HostFunction::raw(move |scope, args| {
                    let _ = &scope;
                    read_args!(scope, args; $($arg),*);
                    let future = (self)($($arg),*);
                    HostValue::Pending(Box::pin(async move { future.await.into_script() }))
                })
            }
        }
    };
}

impl_host_function!();
impl_host_function!(A1);
impl_host_function!(A1, A2);
impl_host_function!(A1, A2, A3);
impl_host_function!(A1, A2, A3, A4);
impl_host_function!(A1, A2, A3, A4, A5);
impl_host_function!(A1, A2, A3, A4, A5, A6);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::test_realm;

    fn invoke(f: &HostFunction, args: Vec<ScriptValue>) -> HostValue {
        test_realm().with_scope(|scope| f.invoke(scope, args))
    }

    #[test]
    fn test_typed_arguments_are_coerced() {
        let add = HostFunction::new(|a: i32, b: i32| a + b);
        let result = invoke(&add, vec![ScriptValue::from(2), ScriptValue::from("3")]);
        assert!(matches!(result, HostValue::Value(ScriptValue::Number(n)) if n == 5.0));
    }

    #[test]
    fn test_bad_argument_becomes_fault() {
        let f = HostFunction::new(|n: u8| n);
        let result = invoke(&f, vec![ScriptValue::from(1.5)]);
        assert!(matches!(result, HostValue::Fault(_)));
    }

    #[test]
    fn test_missing_arguments_read_as_undefined() {
        let f = HostFunction::new(|value: Option<String>| value.is_none());
        let result = invoke(&f, Vec::new());
        assert!(matches!(result, HostValue::Value(ScriptValue::Bool(true))));
    }

    #[test]
    fn test_callable_from_script() {
        let double = HostFunction::new(|x: f64| x * 2.0).named("double");
        let realm = test_realm();
        let result = realm.with_scope(|scope| {
            let function = HostValue::Function(double).materialize(scope).unwrap();
            scope.set_global("double", function);
            scope.execute(crate::module::ScriptSource::Text("double(21) + double('0.5')".into()))
        });
        assert_eq!(result.unwrap(), ScriptValue::from(43));
    }

    #[test]
    fn test_async_function_returns_pending() {
        let f = HostFunction::from_async(|x: f64| async move { x + 1.0 }).named("inc");
        assert_eq!(f.name(), "inc");
        let HostValue::Pending(future) = invoke(&f, vec![ScriptValue::from(1)]) else {
            panic!("expected a pending value");
        };
        let value = futures::executor::block_on(future);
        assert!(matches!(value, HostValue::Value(ScriptValue::Number(n)) if n == 2.0));
    }
}
