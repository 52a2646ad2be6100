//! # Script Proxy - Typed Interfaces over Dynamic Objects
//!
//! This crate lets Rust code call into objects that live inside an embedded
//! dynamic-language runtime through ordinary, statically typed interfaces.
//! A declared interface forwards each method to the same-named member of the
//! dynamic object, converting arguments on the way in and results on the way
//! out.
//!
//! ## Key Features
//!
//! - **Typed forwarding**: `script_interface!` generates a struct whose
//!   methods dispatch through an [`Interceptor`]
//! - **Binding cache**: method-to-member bindings are resolved once per
//!   signature and reused
//! - **Value conversion**: [`FromScript`] and [`IntoScript`] follow the
//!   runtime's canonical number, string and boolean rules; [`Json`] projects
//!   whole object graphs through serde
//! - **Async bridge**: promise-like results become [`ScriptFuture`]s that
//!   settle exactly once; host futures become dynamic promises
//! - **Lifecycle**: [`InstanceFactory`] owns one context and one target
//!   instance, from creation to disposal
//! - **Local runtime**: [`LocalEngine`] runs each context as a QuickJS
//!   runtime on its own event loop thread, loading JavaScript source or
//!   native library modules
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use script_proxy::{
//!     script_interface, FactoryConfig, InstanceFactory, LocalEngine, NativeClass,
//!     NativeLibrary, TargetLibrary,
//! };
//!
//! script_interface! {
//!     pub struct Calculator {
//!         fn add(a: i32, b: i32) -> i32;
//!         #[script(async)]
//!         async fn square(x: i32) -> i32;
//!     }
//! }
//!
//! let module = NativeLibrary::new()
//!     .class(NativeClass::new("Calculator").method("add", add).method("square", square))
//!     .into_module("calculator");
//!
//! let factory = InstanceFactory::create(
//!     LocalEngine::new(),
//!     TargetLibrary::new(module, "Calculator"),
//!     FactoryConfig::default(),
//! )?;
//! let calculator: Calculator = factory.typed_instance()?;
//!
//! assert_eq!(calculator.add(2, 3)?, 5);
//! assert_eq!(calculator.square(4)?.await?, 16);
//! ```
//!
//! ## Threading
//!
//! Dynamic objects are only touched on their context's own turn. Calls block
//! the caller for the synchronous part of the invocation only; promise
//! continuations run on later turns and settle the returned future, so no
//! thread ever waits on a promise.

mod binding;
mod bridge;
mod config;
mod convert;
mod error;
mod factory;
mod function;
mod host;
mod interceptor;
mod interface;
mod module;
mod operation;
mod value;
pub mod runtime;

pub use binding::{
    resolve as resolve_binding, BindingOverride, BindingTable, CallingConvention, MethodBinding,
    MethodDescriptor, Signature,
};
pub use bridge::promise_to_task;
pub use config::{Capabilities, FactoryConfig};
pub use convert::{FromScript, IntoScript, Json, MAX_PROJECTION_DEPTH};
pub use error::{
    CoercionError, CoercionResult, HostError, HostResult, ProxyError, ProxyResult, ScriptException,
};
pub use factory::{FactoryState, InstanceFactory, InstanceHandle, TargetLibrary};
pub use function::{HostFunction, IntoAsyncHostFunction, IntoHostFunction};
pub use host::{
    ContextExt, LocalTask, NativeFn, PromiseResolver, Scope, ScopeJob, ScriptContext, ScriptEngine,
};
pub use interceptor::Interceptor;
pub use interface::ScriptInterface;
pub use module::{
    arg, ModuleBody, ModuleKind, ModuleSource, NativeClass, NativeLibrary, NativeModule,
    ScriptSource,
};
pub use operation::{OperationStatus, ScriptFuture, TaskHandle};
pub use runtime::{LocalContext, LocalEngine};
pub use value::{ContextId, HostValue, ObjectRef, Opaque, ScriptValue, ValueKind};
