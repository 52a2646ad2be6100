//! Async bridge between dynamic promises and host futures
//!
//! Dynamic → host: [`bridge_promise`] registers exactly one pair of
//! continuations on a promise-like value and settles a [`ScriptFuture`];
//! [`rewrap_task`] does the same for a [`TaskHandle`] the runtime produced
//! itself. Host → dynamic: [`promise_from_host`] drives a host future on the
//! runtime and settles a dynamic promise with its output.
//!
//! No thread ever waits for a promise. Continuations run on the runtime's
//! turn and only settle a pending operation.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::convert::FromScript;
use crate::error::{ProxyError, ProxyResult};
use crate::host::{LocalTask, Scope, ScopeJob, ScriptContext};
use crate::operation::{PendingOperation, ScriptFuture, TaskHandle};
use crate::value::{HostValue, ScriptValue, ValueKind};

/// Message and stack of a rejection reason or thrown value
pub(crate) fn describe_reason(scope: &mut dyn Scope, reason: &ScriptValue) -> (String, Option<String>) {
    if !matches!(scope.kind_of(reason), ValueKind::Object | ValueKind::Function) {
        return (scope.to_display_string(reason), None);
    }
    let message = match scope.get(reason, "message") {
        Ok(ScriptValue::String(message)) => message,
        _ => scope.to_display_string(reason),
    };
    let stack = match scope.get(reason, "stack") {
        Ok(ScriptValue::String(stack)) => Some(stack),
        _ => None,
    };
    (message, stack)
}

/// Bridge a promise-like value into a typed host future.
///
/// Registers `onFulfilled`/`onRejected` through the value's own `then`. The
/// fulfillment value is coerced to `T` on the runtime's turn; a coercion
/// failure fails the future. Extra continuation calls are ignored.
pub(crate) fn bridge_promise<T>(
    scope: &mut dyn Scope,
    promise: &ScriptValue,
    member: &str,
) -> ProxyResult<ScriptFuture<T>>
where
    T: FromScript + Send + 'static,
{
    let (future, completion) = PendingOperation::<T>::channel(member);
    let completion = Arc::new(completion);

    let on_fulfilled = {
        let completion = completion.clone();
        scope.new_function(
            "onFulfilled",
            Arc::new(move |scope, _this, args| {
                let value = args.into_iter().next().unwrap_or_default();
                let outcome = T::from_script(value, scope).map_err(ProxyError::from);
                completion.settle(outcome);
                Ok(ScriptValue::Undefined)
            }),
        )
    };

    let on_rejected = {
        let completion = completion.clone();
        scope.new_function(
            "onRejected",
            Arc::new(move |scope, _this, args| {
                let reason = args.into_iter().next().unwrap_or_default();
                let (message, stack) = describe_reason(scope, &reason);
                completion.settle(Err(ProxyError::AsyncRejected {
                    member: completion.member().to_string(),
                    message,
                    stack,
                }));
                Ok(ScriptValue::Undefined)
            }),
        )
    };
    drop(completion);

    scope
        .invoke_member(promise, "then", vec![on_fulfilled, on_rejected])
        .map_err(|exception| ProxyError::invocation(member, exception))?;
    log::trace!("[Bridge] continuations registered for '{}'", member);
    Ok(future)
}

/// Re-wrap a runtime-produced generic future as a typed one.
///
/// The continuation hops back onto the runtime's turn to coerce, because
/// reading a dynamic value needs a scope. If the context is gone by then the
/// job is dropped and the typed future fails with `Disposed`.
pub(crate) fn rewrap_task<T>(
    task: TaskHandle,
    context: Arc<dyn ScriptContext>,
    member: &str,
) -> ScriptFuture<T>
where
    T: FromScript + Send + 'static,
{
    let (future, completion) = PendingOperation::<T>::channel(member);
    task.on_settle(Box::new(move |outcome| match outcome {
        Err(error) => {
            let error = relabel(error, completion.member());
            completion.settle(Err(error));
        }
        Ok(value) => {
            let job: ScopeJob = Box::new(move |scope| {
                let outcome = T::from_script(value, scope).map_err(ProxyError::from);
                completion.settle(outcome);
            });
            if let Err(e) = context.submit(job) {
                log::debug!("[Bridge] cannot coerce task result: {}", e);
            }
        }
    }));
    future
}

/// Attribute a failure of a runtime-produced task to the member that
/// returned it
fn relabel(error: ProxyError, member: &str) -> ProxyError {
    match error {
        ProxyError::AsyncRejected { message, stack, .. } => ProxyError::AsyncRejected {
            member: member.to_string(),
            message,
            stack,
        },
        ProxyError::AsyncBridgeProtocol { reason, .. } => ProxyError::protocol(member, reason),
        other => other,
    }
}

/// Drive a host future on the runtime and return a promise for its output
pub(crate) fn promise_from_host(scope: &mut dyn Scope, future: BoxFuture<'static, HostValue>) -> ScriptValue {
    let (promise, resolver) = scope.new_promise();
    let task: LocalTask = Box::pin(async move {
        let output = future.await;
        let job: ScopeJob = Box::new(move |scope| match output {
            HostValue::Fault(message) => {
                let error = scope.new_error(&message);
                resolver.reject(scope, error);
            }
            value => match value.materialize(scope) {
                Ok(value) => resolver.resolve(scope, value),
                Err(e) => {
                    let error = scope.new_error(&e.to_string());
                    resolver.reject(scope, error);
                }
            },
        });
        job
    });
    scope.spawn(task);
    promise
}

/// Hand a runtime-produced task back to the runtime as a promise
pub(crate) fn promise_from_task(scope: &mut dyn Scope, task: TaskHandle) -> ScriptValue {
    promise_from_host(
        scope,
        Box::pin(async move {
            match task.into_future().await {
                Ok(value) => HostValue::Value(value),
                Err(e) => HostValue::Fault(e.to_string()),
            }
        }),
    )
}

/// Convert a promise into a host task, for hosts with
/// `task_promise_conversion`
pub fn promise_to_task(scope: &mut dyn Scope, promise: &ScriptValue) -> ProxyResult<TaskHandle> {
    bridge_promise::<ScriptValue>(scope, promise, "<task>").map(ScriptFuture::into_task)
}
