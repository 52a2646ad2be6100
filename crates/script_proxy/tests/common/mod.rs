//! Shared fixtures for the integration tests
//!
//! `calculator_library()` builds a native library exporting one class,
//! `Calculator`, whose members cover synchronous values, promises resolved
//! on later turns, rejections, a misbehaving thenable and host callbacks.
//! `calc_library()` is a smaller `Calc` class written in JavaScript.

#![allow(dead_code)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use script_proxy::{
    arg, script_interface, FactoryConfig, HostFunction, InstanceFactory, Json, LocalEngine,
    ModuleKind, ModuleSource, NativeClass, NativeLibrary, Opaque, Scope, ScriptException,
    ScriptValue, TargetLibrary,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub label: String,
}

script_interface! {
    /// Typed view of the `Calculator` class
    pub struct Calculator {
        fn add(a: i32, b: i32) -> i32;
        #[script(member = "identity")]
        fn echo_number(value: f64) -> f64;
        #[script(member = "identity")]
        fn echo_string(value: String) -> String;
        #[script(member = "identity")]
        fn echo_bool(value: bool) -> bool;
        #[script(member = "identity")]
        fn echo_int(value: i32) -> i32;

        /// Resolves on a later turn with `x * x`
        #[script(async)]
        async fn square(x: i32) -> i32;
        /// The same promise, declared with the synchronous convention
        #[script(member = "square")]
        async fn square_later(x: i32) -> i32;
        #[script(member = "square")]
        fn square_now(x: i32) -> i32;
        #[script(member = "square")]
        fn square_and_forget(x: i32);

        fn fail(message: String) -> i32;
        #[script(member = "failAsync", async)]
        async fn fail_async(message: String) -> i32;

        fn record(entry: String);
        fn count() -> u32;
        fn history() -> Vec<String>;

        #[script(async)]
        async fn twice(value: i32) -> i32;
        #[script(member = "plainValue", async)]
        async fn plain_value() -> i32;

        #[script(member = "makePoint")]
        fn make_point(x: f64, y: f64) -> Json<Point>;
        #[script(member = "makePoint")]
        fn make_point_raw(x: f64, y: f64) -> Opaque;
        #[script(member = "makePoint")]
        fn point_as_number(x: f64, y: f64) -> f64;
        fn describe(point: Json<Point>) -> String;
        #[script(member = "describe")]
        fn describe_raw(point: Opaque) -> String;

        fn apply(callback: HostFunction, value: f64) -> f64;
        #[script(member = "applyAsync", async)]
        async fn apply_async(callback: HostFunction, value: f64) -> f64;

        fn nan() -> f64;
        #[script(member = "nan")]
        fn nan_as_int() -> i32;
        #[script(member = "numericString")]
        fn numeric_string() -> i32;

        /// A promise that settles only when `open_gate` is called
        #[script(async)]
        async fn gate() -> i32;
        #[script(member = "openGate")]
        fn open_gate(value: i32);

        fn missing() -> i32;
    }
}

script_interface! {
    /// Typed view of the JavaScript `Calc` class
    pub struct Calc {
        fn add(a: i32, b: i32) -> i32;
        #[script(async)]
        async fn square(x: i32) -> i32;
        fn fail(message: String) -> i32;
        #[script(member = "failAsync", async)]
        async fn fail_async(message: String) -> i32;
        fn record(entry: String);
        fn history() -> Vec<String>;
    }
}

/// Body of the `Calc` class shared by every module flavour
pub const CALC_CLASS: &str = r#"
class Calc {
  constructor() {
    this.entries = [];
  }
  add(a, b) {
    return a + b;
  }
  square(x) {
    return new Promise((resolve) => setTimeout(() => resolve(x * x), 1));
  }
  fail(message) {
    throw new Error(message);
  }
  failAsync(message) {
    return Promise.resolve().then(() => {
      throw new Error(message);
    });
  }
  record(entry) {
    this.entries.push(entry);
    return this.entries.length;
  }
  history() {
    return this.entries.slice();
  }
}
"#;

/// `Calc` as a module of the given kind
pub fn calc_source(kind: ModuleKind) -> ModuleSource {
    let exports = match kind {
        ModuleKind::Script => "({ Calc });",
        ModuleKind::CommonJs => "module.exports = { Calc };",
        ModuleKind::EsModule => "export { Calc };",
    };
    ModuleSource::text("calc", kind, format!("{CALC_CLASS}\n{exports}\n"))
}

pub fn calc_library(kind: ModuleKind) -> (InstanceFactory, Calc) {
    init_logging();
    let target = TargetLibrary::new(calc_source(kind), "Calc");
    let factory = InstanceFactory::create(LocalEngine::new(), target, FactoryConfig::default())
        .expect("script factory should start");
    let calc = factory.typed_instance::<Calc>().expect("typed instance");
    (factory, calc)
}

fn number(scope: &mut dyn Scope, args: &[ScriptValue], index: usize) -> f64 {
    scope.to_number(&arg(args, index))
}

fn calculator_class() -> NativeClass {
    NativeClass::new("Calculator")
        .constructor(|scope, this, _args| {
            scope.set(&this, "count", ScriptValue::from(0))?;
            let history = scope.new_array(Vec::new());
            scope.set(&this, "history", history)?;
            Ok(ScriptValue::Undefined)
        })
        .method("add", |scope, _this, args| {
            let sum = number(scope, &args, 0) + number(scope, &args, 1);
            Ok(ScriptValue::from(sum))
        })
        .method("identity", |_scope, _this, args| Ok(arg(&args, 0)))
        .method("square", |scope, _this, args| {
            let x = number(scope, &args, 0);
            let (promise, resolver) = scope.new_promise();
            scope.queue_task(Box::new(move |scope| {
                resolver.resolve(scope, ScriptValue::from(x * x));
            }));
            Ok(promise)
        })
        .method("fail", |scope, _this, args| {
            let message = scope.to_display_string(&arg(&args, 0));
            Err(ScriptException::new(message))
        })
        .method("failAsync", |scope, _this, args| {
            let message = scope.to_display_string(&arg(&args, 0));
            let error = scope.new_error(&message);
            let stack = format!("Error: {message}\n    at Calculator.failAsync (calculator:1:1)");
            scope.set(&error, "stack", ScriptValue::from(stack))?;
            let (promise, resolver) = scope.new_promise();
            scope.queue_task(Box::new(move |scope| resolver.reject(scope, error)));
            Ok(promise)
        })
        .method("record", |scope, this, args| {
            let current = scope.get(&this, "count")?;
            let count = scope.to_number(&current) + 1.0;
            scope.set(&this, "count", ScriptValue::from(count))?;

            let history = scope.get(&this, "history")?;
            let length = scope.get(&history, "length")?;
            let index = scope.to_display_string(&length);
            scope.set(&history, &index, arg(&args, 0))?;
            Ok(ScriptValue::from(count))
        })
        .method("count", |scope, this, _args| scope.get(&this, "count"))
        .method("history", |scope, this, _args| scope.get(&this, "history"))
        .method("twice", |scope, _this, args| {
            let value = arg(&args, 0);
            let thenable = scope.new_object();
            let then = scope.new_function(
                "then",
                Arc::new(move |scope, _this, args| {
                    let on_fulfilled = arg(&args, 0);
                    let on_rejected = arg(&args, 1);
                    scope.call(&on_fulfilled, ScriptValue::Undefined, vec![value.clone()])?;
                    scope.call(&on_fulfilled, ScriptValue::Undefined, vec![ScriptValue::from(-1)])?;
                    scope.call(&on_rejected, ScriptValue::Undefined, vec![ScriptValue::from("late")])?;
                    Ok(ScriptValue::Undefined)
                }),
            );
            scope.set(&thenable, "then", then)?;
            Ok(thenable)
        })
        .method("plainValue", |_scope, _this, _args| Ok(ScriptValue::from(7)))
        .method("makePoint", |scope, _this, args| {
            let point = scope.new_object();
            scope.set(&point, "x", arg(&args, 0))?;
            scope.set(&point, "y", arg(&args, 1))?;
            scope.set(&point, "label", ScriptValue::from("p"))?;
            Ok(point)
        })
        .method("describe", |scope, _this, args| {
            let point = arg(&args, 0);
            let x = scope.get(&point, "x")?;
            let y = scope.get(&point, "y")?;
            let label = scope.get(&point, "label")?;
            let text = format!(
                "{}({}, {})",
                scope.to_display_string(&label),
                scope.to_display_string(&x),
                scope.to_display_string(&y)
            );
            Ok(ScriptValue::from(text))
        })
        .method("apply", |scope, _this, args| {
            let callback = arg(&args, 0);
            scope.call(&callback, ScriptValue::Undefined, vec![arg(&args, 1)])
        })
        .method("applyAsync", |scope, _this, args| {
            let callback = arg(&args, 0);
            scope.call(&callback, ScriptValue::Undefined, vec![arg(&args, 1)])
        })
        .method("nan", |_scope, _this, _args| Ok(ScriptValue::Number(f64::NAN)))
        .method("numericString", |_scope, _this, _args| Ok(ScriptValue::from("42")))
        .method("gate", |scope, this, _args| {
            let (promise, _resolver) = scope.new_promise();
            scope.set(&this, "gatePromise", promise.clone())?;
            Ok(promise)
        })
        .method("openGate", |scope, this, args| {
            let promise = scope.get(&this, "gatePromise")?;
            scope.settle_promise(&promise, Ok(arg(&args, 0)));
            Ok(ScriptValue::Undefined)
        })
}

pub fn calculator_library() -> ModuleSource {
    NativeLibrary::new()
        .class(calculator_class())
        .function("version", |_scope, _this, _args| Ok(ScriptValue::from("1.0.0")))
        .into_module("calculator")
}

pub fn target() -> TargetLibrary {
    TargetLibrary::new(calculator_library(), "Calculator")
}

pub fn factory(config: FactoryConfig) -> InstanceFactory {
    InstanceFactory::create(LocalEngine::new(), target(), config).expect("factory should start")
}

pub fn calculator() -> (InstanceFactory, Calculator) {
    init_logging();
    let factory = factory(FactoryConfig::default());
    let calculator = factory
        .typed_instance::<Calculator>()
        .expect("typed instance");
    (factory, calculator)
}
