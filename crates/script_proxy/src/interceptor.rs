//! Invocation interceptor
//!
//! Every call on a typed interface lands in [`Interceptor`]. One call:
//!
//! 1. resolve the method's binding (cached per signature),
//! 2. materialize the arguments on the runtime's turn,
//! 3. invoke the member on the target object,
//! 4. classify the result: promise-like values (by the runtime's capability
//!    check, or a task the runtime already produced) go to the async bridge,
//!    plain values are coerced to the declared return type.
//!
//! The calling thread waits only for the synchronous part of the call.

use std::sync::Arc;

use crate::binding::{BindingTable, CallingConvention, MethodBinding, MethodDescriptor};
use crate::bridge;
use crate::convert::FromScript;
use crate::error::{CoercionError, ProxyError, ProxyResult};
use crate::host::{ContextExt, Scope, ScriptContext};
use crate::operation::ScriptFuture;
use crate::value::{HostValue, ObjectRef, Opaque, ScriptValue};

/// What the caller declared the method returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReturnShape {
    Value,
    Void,
    Any,
    Future,
}

enum Dispatched<T> {
    Value(T),
    Pending(ScriptFuture<T>),
    Discarded,
    Passthrough(Opaque),
}

/// Forwards method calls to members of one dynamic object
#[derive(Clone)]
pub struct Interceptor {
    context: Arc<dyn ScriptContext>,
    target: ObjectRef,
    bindings: Arc<BindingTable>,
}

impl Interceptor {
    pub fn new(context: Arc<dyn ScriptContext>, target: ObjectRef, bindings: Arc<BindingTable>) -> Self {
        Self {
            context,
            target,
            bindings,
        }
    }

    pub fn target(&self) -> ObjectRef {
        self.target
    }

    pub fn context(&self) -> &Arc<dyn ScriptContext> {
        &self.context
    }

    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    /// Call a method declared to return a plain value
    pub fn call<T>(&self, method: &MethodDescriptor, args: Vec<HostValue>) -> ProxyResult<T>
    where
        T: FromScript + Send + 'static,
    {
        match self.dispatch::<T>(method, args, ReturnShape::Value)? {
            Dispatched::Value(value) => Ok(value),
            _ => Err(ProxyError::protocol(method.name(), "expected a plain value")),
        }
    }

    /// Call a method declared to return nothing; side effects still happen
    pub fn call_void(&self, method: &MethodDescriptor, args: Vec<HostValue>) -> ProxyResult<()> {
        self.dispatch::<()>(method, args, ReturnShape::Void).map(|_| ())
    }

    /// Call a method declared as "any"; the raw result comes back untouched
    pub fn call_any(&self, method: &MethodDescriptor, args: Vec<HostValue>) -> ProxyResult<Opaque> {
        match self.dispatch::<ScriptValue>(method, args, ReturnShape::Any)? {
            Dispatched::Passthrough(opaque) => Ok(opaque),
            _ => Err(ProxyError::protocol(method.name(), "expected a raw value")),
        }
    }

    /// Call a method declared to return a future.
    ///
    /// The outer `Result` carries failures of the synchronous part; the future
    /// carries only the asynchronous outcome.
    pub fn call_async<T>(&self, method: &MethodDescriptor, args: Vec<HostValue>) -> ProxyResult<ScriptFuture<T>>
    where
        T: FromScript + Send + 'static,
    {
        match self.dispatch::<T>(method, args, ReturnShape::Future)? {
            Dispatched::Pending(future) => Ok(future),
            Dispatched::Value(value) => Ok(ScriptFuture::ready(method.name(), value)),
            _ => Err(ProxyError::protocol(method.name(), "expected a future")),
        }
    }

    fn dispatch<T>(
        &self,
        method: &MethodDescriptor,
        args: Vec<HostValue>,
        shape: ReturnShape,
    ) -> ProxyResult<Dispatched<T>>
    where
        T: FromScript + Send + 'static,
    {
        let binding = self.bindings.resolve(method)?;
        log::trace!(
            "[Interceptor] {} -> {}.{} ({:?}, {:?})",
            binding.signature,
            self.target.slot(),
            binding.member,
            binding.convention,
            shape
        );

        let target = ScriptValue::Object(self.target);
        let context = self.context.clone();
        self.context
            .run(move |scope| invoke::<T>(scope, &binding, target, args, shape, context))?
    }
}

fn invoke<T>(
    scope: &mut dyn Scope,
    binding: &MethodBinding,
    target: ScriptValue,
    args: Vec<HostValue>,
    shape: ReturnShape,
    context: Arc<dyn ScriptContext>,
) -> ProxyResult<Dispatched<T>>
where
    T: FromScript + Send + 'static,
{
    let member = binding.member.as_str();

    let mut values = Vec::with_capacity(args.len());
    for (i, arg) in args.into_iter().enumerate() {
        let value = arg
            .materialize(scope)
            .map_err(|e| CoercionError::argument(i, e))?;
        values.push(value);
    }

    let raw = scope
        .invoke_member(&target, member, values)
        .map_err(|exception| ProxyError::invocation(member, exception))?;
    let raw = scope.export_value(raw);

    let is_task = matches!(raw, ScriptValue::Task(_));
    let promise_like = is_task || scope.is_thenable(&raw);

    if binding.convention == CallingConvention::Async && !promise_like {
        return Err(ProxyError::protocol(
            member,
            format!("async member returned a non-promise {}", scope.kind_of(&raw)),
        ));
    }

    match shape {
        ReturnShape::Void => {
            if promise_like {
                // fire and forget: the future is dropped, the computation runs on
                detach(scope, raw, member, context);
            }
            Ok(Dispatched::Discarded)
        }
        ReturnShape::Any => Ok(Dispatched::Passthrough(Opaque::new(raw, scope.context_id()))),
        ReturnShape::Value => {
            if promise_like {
                return Err(CoercionError::PendingValue {
                    expected: std::any::type_name::<T>(),
                }
                .into());
            }
            Ok(Dispatched::Value(T::from_script(raw, scope)?))
        }
        ReturnShape::Future => {
            if !promise_like {
                return Ok(Dispatched::Value(T::from_script(raw, scope)?));
            }
            let future = match raw {
                ScriptValue::Task(task) => bridge::rewrap_task::<T>(task, context, member),
                promise => bridge::bridge_promise::<T>(scope, &promise, member)?,
            };
            Ok(Dispatched::Pending(future))
        }
    }
}

fn detach(scope: &mut dyn Scope, raw: ScriptValue, member: &str, context: Arc<dyn ScriptContext>) {
    let detached = match raw {
        ScriptValue::Task(task) => Ok(bridge::rewrap_task::<()>(task, context, member)),
        promise => bridge::bridge_promise::<()>(scope, &promise, member),
    };
    if let Err(e) = detached {
        log::debug!("[Interceptor] could not observe detached result of '{}': {}", member, e);
    } else {
        log::trace!("[Interceptor] detached pending result of '{}'", member);
    }
}
