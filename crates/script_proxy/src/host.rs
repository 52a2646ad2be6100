//! Runtime host contract
//!
//! The interop layer never talks to a concrete engine. It needs three things:
//!
//! - a [`ScriptEngine`] that creates isolated contexts,
//! - a [`ScriptContext`] handle that is `Send + Sync` and accepts jobs,
//! - a [`Scope`], the view of a context that a job gets while it runs on the
//!   runtime's own turn.
//!
//! All dynamic work happens inside jobs. [`ContextExt::run`] submits a job and
//! waits for its synchronous result; promise continuations fire on later turns
//! and never hold a host thread.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::config::Capabilities;
use crate::error::{HostError, HostResult, ScriptException};
use crate::module::{ModuleSource, ScriptSource};
use crate::value::{ContextId, ObjectRef, ScriptValue, ValueKind};

/// A function implemented in Rust and callable from the runtime.
///
/// Receives the active scope, the `this` value and the arguments.
pub type NativeFn = Arc<
    dyn Fn(&mut dyn Scope, ScriptValue, Vec<ScriptValue>) -> Result<ScriptValue, ScriptException>
        + Send
        + Sync,
>;

/// Work to run on a context's turn
pub type ScopeJob = Box<dyn FnOnce(&mut dyn Scope) + Send>;

/// A host future driven by the runtime; its output runs on the turn after it
/// completes
pub type LocalTask = BoxFuture<'static, ScopeJob>;

/// Creates script contexts
pub trait ScriptEngine: Send + Sync {
    /// Create a fresh, isolated context
    fn create_context(
        &self,
        name: &str,
        capabilities: &Capabilities,
    ) -> HostResult<Arc<dyn ScriptContext>>;
}

/// A handle to one running script context
pub trait ScriptContext: Send + Sync {
    fn id(&self) -> ContextId;

    fn name(&self) -> &str;

    /// Queue a job for the context's turn. Returns once the job is queued.
    fn submit(&self, job: ScopeJob) -> HostResult<()>;

    /// True when called from the thread that runs this context's turns
    fn on_runtime_thread(&self) -> bool {
        false
    }

    /// Tear the context down. Idempotent.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}

/// Blocking helpers for any [`ScriptContext`]
pub trait ContextExt: ScriptContext {
    /// Run `f` on the context's turn and wait for its result.
    ///
    /// Only the synchronous part of the job is waited for; anything it
    /// schedules runs later.
    fn run<R, F>(&self, f: F) -> HostResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn Scope) -> R + Send + 'static,
    {
        if self.on_runtime_thread() {
            return Err(HostError::Reentrant(self.name().to_string()));
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.submit(Box::new(move |scope| {
            let _ = tx.send(f(scope));
        }))?;
        rx.recv()
            .map_err(|_| HostError::ContextDisposed(self.name().to_string()))
    }
}

impl<C: ScriptContext + ?Sized> ContextExt for C {}

/// Settles a promise created by [`Scope::new_promise`]
#[derive(Debug, Clone)]
pub struct PromiseResolver {
    promise: ScriptValue,
}

impl PromiseResolver {
    pub fn new(promise: ScriptValue) -> Self {
        Self { promise }
    }

    pub fn promise(&self) -> &ScriptValue {
        &self.promise
    }

    pub fn resolve(self, scope: &mut dyn Scope, value: ScriptValue) {
        scope.settle_promise(&self.promise, Ok(value));
    }

    pub fn reject(self, scope: &mut dyn Scope, reason: ScriptValue) {
        scope.settle_promise(&self.promise, Err(reason));
    }
}

/// The view of a context available while a job runs on its turn.
pub trait Scope {
    fn context_id(&self) -> ContextId;

    fn capabilities(&self) -> &Capabilities;

    // ------------------------------------------------------------------
    // Loading and globals
    // ------------------------------------------------------------------

    /// Load a library module and return its exports
    fn load_module(&mut self, module: &ModuleSource) -> Result<ScriptValue, ScriptException>;

    /// Run a top-level script and return its completion value
    fn execute(&mut self, script: ScriptSource) -> Result<ScriptValue, ScriptException>;

    /// Read a named global; `Undefined` when absent
    fn global(&mut self, name: &str) -> ScriptValue;

    fn set_global(&mut self, name: &str, value: ScriptValue);

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    fn get(&mut self, target: &ScriptValue, key: &str) -> Result<ScriptValue, ScriptException>;

    fn set(
        &mut self,
        target: &ScriptValue,
        key: &str,
        value: ScriptValue,
    ) -> Result<(), ScriptException>;

    /// Own enumerable keys in insertion order
    fn keys(&mut self, target: &ScriptValue) -> Result<Vec<String>, ScriptException>;

    /// Elements of an array
    fn array_items(&mut self, target: &ScriptValue) -> Result<Vec<ScriptValue>, ScriptException>;

    fn call(
        &mut self,
        function: &ScriptValue,
        this: ScriptValue,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue, ScriptException>;

    fn construct(
        &mut self,
        constructor: &ScriptValue,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue, ScriptException>;

    /// Call `target[member](...args)` with `target` as `this`
    fn invoke_member(
        &mut self,
        target: &ScriptValue,
        member: &str,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue, ScriptException> {
        let function = self.get(target, member)?;
        if self.kind_of(&function) != ValueKind::Function {
            return Err(ScriptException::type_error(format!("{member} is not a function")));
        }
        self.call(&function, target.clone(), args)
    }

    /// Drop the host's interest in an object
    fn release(&mut self, handle: &ObjectRef);

    /// Convert a raw result for delivery to the host.
    ///
    /// Hosts that turn promises into host futures themselves do it here.
    fn export_value(&mut self, value: ScriptValue) -> ScriptValue {
        value
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    fn kind_of(&self, value: &ScriptValue) -> ValueKind;

    /// Capability check: does this value behave like a promise?
    fn is_thenable(&mut self, value: &ScriptValue) -> bool;

    /// The runtime's canonical numeric conversion
    fn to_number(&mut self, value: &ScriptValue) -> f64;

    /// The runtime's canonical string conversion
    fn to_display_string(&mut self, value: &ScriptValue) -> String;

    /// The runtime's canonical boolean conversion
    fn to_boolean(&self, value: &ScriptValue) -> bool;

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    fn new_object(&mut self) -> ScriptValue;

    fn new_array(&mut self, items: Vec<ScriptValue>) -> ScriptValue;

    fn new_function(&mut self, name: &str, function: NativeFn) -> ScriptValue;

    fn new_error(&mut self, message: &str) -> ScriptValue;

    fn new_promise(&mut self) -> (ScriptValue, PromiseResolver);

    /// Settle a promise created by this scope. Later settlements are ignored.
    fn settle_promise(&mut self, promise: &ScriptValue, outcome: Result<ScriptValue, ScriptValue>);

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Run `job` on a later turn
    fn queue_task(&mut self, job: ScopeJob);

    /// Run `job` on a turn after `delay` has elapsed
    fn set_timeout(&mut self, delay: Duration, job: ScopeJob);

    /// Drive a host future on this context
    fn spawn(&mut self, task: LocalTask);
}
