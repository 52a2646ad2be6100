//! [`Scope`] over a live QuickJS context
//!
//! A [`JsScope`] exists only while the realm's context is entered. Objects
//! leave it as [`ObjectRef`]s: the prelude keeps each one in a slot table, so
//! the same object always maps to the same reference until it is released.
//! Dynamic operations go through the prelude's helpers, which keeps property
//! access, coercions and `new` exactly as script code sees them.

use std::rc::Rc;
use std::time::Duration;

use rquickjs::function::{IntoArgs, Rest};
use rquickjs::{Array, Ctx, FromJs, Function, Module, Object, Type, Value};

use super::realm::{Job, RealmState};
use crate::bridge;
use crate::config::Capabilities;
use crate::error::ScriptException;
use crate::host::{LocalTask, NativeFn, PromiseResolver, Scope, ScopeJob};
use crate::module::{ModuleBody, ModuleKind, ModuleSource, ScriptSource};
use crate::value::{ContextId, ObjectRef, ScriptValue, ValueKind};

pub(crate) struct JsScope<'js> {
    ctx: Ctx<'js>,
    state: Rc<RealmState>,
}

impl<'js> JsScope<'js> {
    pub(crate) fn new(ctx: Ctx<'js>, state: Rc<RealmState>) -> Self {
        Self { ctx, state }
    }

    pub(crate) fn name(&self) -> &str {
        &self.state.name
    }

    /// Call a prelude helper
    fn helper<A, R>(&self, name: &str, args: A) -> Result<R, ScriptException>
    where
        A: IntoArgs<'js>,
        R: FromJs<'js>,
    {
        let prelude = self
            .state
            .prelude(&self.ctx)
            .ok_or_else(|| ScriptException::new(format!("Script context '{}' is torn down", self.name())))?;
        let function: Function<'js> = prelude.get(name).map_err(|e| self.exception(e))?;
        function.call(args).map_err(|e| self.exception(e))
    }

    /// Run the script timer `id` if it was not cleared
    pub(crate) fn fire_timer(&self, id: u64) -> Result<(), ScriptException> {
        self.helper("fireTimer", (id as f64,))
    }

    /// Turn an engine error into an exception, taking the pending thrown
    /// value when there is one
    fn exception(&self, error: rquickjs::Error) -> ScriptException {
        match error {
            rquickjs::Error::Exception => {
                let thrown = self.ctx.catch();
                self.describe(thrown)
            }
            other => ScriptException::new(other.to_string()),
        }
    }

    fn describe(&self, thrown: Value<'js>) -> ScriptException {
        let (message, stack) = self
            .describe_thrown(&thrown)
            .unwrap_or_else(|| ("Uncaught exception".to_string(), None));
        let mut exception = ScriptException::new(message);
        if let Some(stack) = stack {
            exception = exception.with_stack(stack);
        }
        exception.with_value(self.from_js(thrown))
    }

    /// Message and stack of a thrown value. Never recurses into `exception`.
    fn describe_thrown(&self, thrown: &Value<'js>) -> Option<(String, Option<String>)> {
        let describe: Function<'js> = self.state.prelude(&self.ctx)?.get("describe").ok()?;
        let pair: Array<'js> = match describe.call((thrown.clone(),)) {
            Ok(pair) => pair,
            Err(_) => {
                self.ctx.catch();
                return None;
            }
        };
        Some((pair.get(0).ok()?, pair.get(1).ok()?))
    }

    fn from_js(&self, value: Value<'js>) -> ScriptValue {
        match value.type_of() {
            Type::Uninitialized | Type::Undefined => ScriptValue::Undefined,
            Type::Null => ScriptValue::Null,
            Type::Bool => ScriptValue::Bool(value.as_bool().unwrap_or_default()),
            Type::Int | Type::Float => ScriptValue::Number(value.as_number().unwrap_or(f64::NAN)),
            Type::String => match value.as_string().map(|s| s.to_string()) {
                Some(Ok(s)) => ScriptValue::String(s),
                _ => ScriptValue::String(String::new()),
            },
            _ => match self.helper::<_, f64>("retain", (value,)) {
                Ok(slot) => ScriptValue::Object(ObjectRef::new(self.state.context, slot as u64)),
                Err(e) => {
                    log::warn!("[Runtime] '{}' could not retain an object: {}", self.name(), e);
                    ScriptValue::Undefined
                }
            },
        }
    }

    /// The live object behind a reference; `None` once released
    fn lookup(&self, handle: &ObjectRef) -> Result<Option<Value<'js>>, ScriptException> {
        if handle.context() != self.state.context {
            return Err(ScriptException::type_error(format!(
                "object belongs to context {}, not {}",
                handle.context(),
                self.state.context
            )));
        }
        let value: Value<'js> = self.helper("lookup", (handle.slot() as f64,))?;
        Ok((!value.is_undefined()).then_some(value))
    }

    fn to_js(&mut self, value: &ScriptValue) -> Result<Value<'js>, ScriptException> {
        let ctx = self.ctx.clone();
        match value {
            ScriptValue::Undefined => Ok(Value::new_undefined(ctx)),
            ScriptValue::Null => Ok(Value::new_null(ctx)),
            ScriptValue::Bool(b) => Ok(Value::new_bool(ctx, *b)),
            ScriptValue::Number(n) => Ok(Value::new_number(ctx, *n)),
            ScriptValue::String(s) => rquickjs::String::from_str(ctx, s)
                .map(|s| s.into_value())
                .map_err(|e| self.exception(e)),
            ScriptValue::Object(handle) => self.lookup(handle)?.ok_or_else(|| {
                ScriptException::type_error(format!("object {} has been released", handle.slot()))
            }),
            ScriptValue::Task(task) => {
                let promise = bridge::promise_from_task(self, task.clone());
                self.to_js(&promise)
            }
        }
    }

    fn js_array(&mut self, items: &[ScriptValue]) -> Result<Value<'js>, ScriptException> {
        let array = Array::new(self.ctx.clone()).map_err(|e| self.exception(e))?;
        for (index, item) in items.iter().enumerate() {
            let item = self.to_js(item)?;
            array.set(index, item).map_err(|e| self.exception(e))?;
        }
        Ok(array.into_value())
    }

    /// The value to throw for an exception raised by host code
    fn thrown(&mut self, exception: &ScriptException) -> Value<'js> {
        if let Some(value) = &exception.value {
            if let Ok(value) = self.to_js(value) {
                return value;
            }
        }
        let stack = exception.stack.as_deref();
        match self.helper::<_, Value<'js>>("error", (exception.message.as_str(), stack)) {
            Ok(error) => error,
            Err(_) => rquickjs::String::from_str(self.ctx.clone(), &exception.message)
                .map(|s| s.into_value())
                .unwrap_or_else(|_| Value::new_undefined(self.ctx.clone())),
        }
    }

    fn allocated(&self, what: &str, value: Result<Value<'js>, ScriptException>) -> ScriptValue {
        match value {
            Ok(value) => self.from_js(value),
            Err(e) => {
                log::warn!("[Runtime] '{}' could not allocate {}: {}", self.name(), what, e);
                ScriptValue::Undefined
            }
        }
    }

    fn evaluate_module(
        &mut self,
        name: &str,
        kind: ModuleKind,
        source: &str,
    ) -> Result<Value<'js>, ScriptException> {
        match kind {
            ModuleKind::Script => self
                .ctx
                .eval::<Value<'js>, _>(source.as_bytes().to_vec())
                .map_err(|e| self.exception(e)),
            ModuleKind::CommonJs => {
                let wrapped =
                    format!("(function (exports, require, module, __filename, __dirname) {{\n{source}\n}})");
                let body: Value<'js> = self.ctx.eval(wrapped).map_err(|e| self.exception(e))?;
                self.helper("runCommonJs", (name, body))
            }
            ModuleKind::EsModule => {
                let declared = Module::declare(self.ctx.clone(), name, source.as_bytes().to_vec())
                    .map_err(|e| self.exception(e))?;
                let (module, done) = declared.eval().map_err(|e| self.exception(e))?;
                done.finish::<()>().map_err(|e| self.exception(e))?;
                module
                    .namespace()
                    .map(|namespace| namespace.into_value())
                    .map_err(|e| self.exception(e))
            }
        }
    }
}

/// Entry point of every host function installed in a context. The first
/// argument is the caller's `this`.
fn call_native<'js>(
    ctx: &Ctx<'js>,
    state: &Rc<RealmState>,
    native: &NativeFn,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    let mut scope = JsScope::new(ctx.clone(), state.clone());
    let mut args = args.into_iter();
    let this = args.next().map(|v| scope.from_js(v)).unwrap_or_default();
    let args: Vec<ScriptValue> = args.map(|v| scope.from_js(v)).collect();

    match native(&mut scope, this, args).and_then(|result| scope.to_js(&result)) {
        Ok(value) => Ok(value),
        Err(exception) => {
            let thrown = scope.thrown(&exception);
            Err(ctx.throw(thrown))
        }
    }
}

fn kind_of_js(value: &Value<'_>) -> ValueKind {
    match value.type_of() {
        Type::Uninitialized | Type::Undefined => ValueKind::Undefined,
        Type::Null => ValueKind::Null,
        Type::Bool => ValueKind::Boolean,
        Type::Int | Type::Float => ValueKind::Number,
        Type::String => ValueKind::String,
        Type::Array => ValueKind::Array,
        Type::Function | Type::Constructor => ValueKind::Function,
        Type::Promise => ValueKind::Promise,
        _ => ValueKind::Object,
    }
}

impl<'js> Scope for JsScope<'js> {
    fn context_id(&self) -> ContextId {
        self.state.context
    }

    fn capabilities(&self) -> &Capabilities {
        &self.state.capabilities
    }

    fn load_module(&mut self, module: &ModuleSource) -> Result<ScriptValue, ScriptException> {
        let name = module.name.as_str();
        if self.helper::<_, bool>("hasModule", (name,))? {
            let exports: Value<'js> = self.helper("module", (name,))?;
            return Ok(self.from_js(exports));
        }
        let exports = match &module.body {
            ModuleBody::Text(source) => self.evaluate_module(name, module.kind, source)?,
            ModuleBody::Native(native) => {
                let native = native.clone();
                let exports = native.install(self)?;
                self.to_js(&exports)?
            }
        };
        let exports: Value<'js> = self.helper("define", (name, exports))?;
        log::debug!("[Runtime] '{}' loaded {:?} module '{}'", self.name(), module.kind, name);
        Ok(self.from_js(exports))
    }

    fn execute(&mut self, script: ScriptSource) -> Result<ScriptValue, ScriptException> {
        match script {
            ScriptSource::Text(source) => {
                let completion: Value<'js> = self
                    .ctx
                    .eval(source.into_bytes())
                    .map_err(|e| self.exception(e))?;
                Ok(self.from_js(completion))
            }
            ScriptSource::Native(body) => body(self),
        }
    }

    fn global(&mut self, name: &str) -> ScriptValue {
        match self.ctx.globals().get::<_, Value<'js>>(name) {
            Ok(value) => self.from_js(value),
            Err(e) => {
                let e = self.exception(e);
                log::debug!("[Runtime] reading global '{}' threw: {}", name, e);
                ScriptValue::Undefined
            }
        }
    }

    fn set_global(&mut self, name: &str, value: ScriptValue) {
        let result = self
            .to_js(&value)
            .and_then(|value| self.ctx.globals().set(name, value).map_err(|e| self.exception(e)));
        if let Err(e) = result {
            log::warn!("[Runtime] setting global '{}' failed: {}", name, e);
        }
    }

    fn get(&mut self, target: &ScriptValue, key: &str) -> Result<ScriptValue, ScriptException> {
        let target = self.to_js(target)?;
        let value: Value<'js> = self.helper("get", (target, key))?;
        Ok(self.from_js(value))
    }

    fn set(
        &mut self,
        target: &ScriptValue,
        key: &str,
        value: ScriptValue,
    ) -> Result<(), ScriptException> {
        let target = self.to_js(target)?;
        let value = self.to_js(&value)?;
        self.helper("set", (target, key, value))
    }

    fn keys(&mut self, target: &ScriptValue) -> Result<Vec<String>, ScriptException> {
        let target = self.to_js(target)?;
        self.helper("keys", (target,))
    }

    fn array_items(&mut self, target: &ScriptValue) -> Result<Vec<ScriptValue>, ScriptException> {
        let kind = self.kind_of(target);
        if kind != ValueKind::Array {
            return Err(ScriptException::type_error(format!("{kind} is not an array")));
        }
        let target = self.to_js(target)?;
        let items: Array<'js> = self.helper("items", (target,))?;
        let mut values = Vec::with_capacity(items.len());
        for index in 0..items.len() {
            let item: Value<'js> = items.get(index).map_err(|e| self.exception(e))?;
            values.push(self.from_js(item));
        }
        Ok(values)
    }

    fn call(
        &mut self,
        function: &ScriptValue,
        this: ScriptValue,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue, ScriptException> {
        let function = self.to_js(function)?;
        let this = self.to_js(&this)?;
        let args = self.js_array(&args)?;
        let result: Value<'js> = self.helper("apply", (function, this, args))?;
        Ok(self.from_js(result))
    }

    fn construct(
        &mut self,
        constructor: &ScriptValue,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue, ScriptException> {
        let constructor = self.to_js(constructor)?;
        let args = self.js_array(&args)?;
        let instance: Value<'js> = self.helper("construct", (constructor, args))?;
        Ok(self.from_js(instance))
    }

    fn release(&mut self, handle: &ObjectRef) {
        if handle.context() != self.state.context {
            return;
        }
        match self.helper::<_, bool>("release", (handle.slot() as f64,)) {
            Ok(true) => log::trace!("[Runtime] '{}' released object {}", self.name(), handle.slot()),
            Ok(false) => {}
            Err(e) => log::debug!("[Runtime] release of object {} failed: {}", handle.slot(), e),
        }
    }

    fn export_value(&mut self, value: ScriptValue) -> ScriptValue {
        if !self.state.capabilities.task_promise_conversion || self.kind_of(&value) != ValueKind::Promise {
            return value;
        }
        match bridge::promise_to_task(self, &value) {
            Ok(task) => ScriptValue::Task(task),
            Err(e) => {
                log::warn!("[Runtime] promise could not be converted to a task: {}", e);
                value
            }
        }
    }

    fn kind_of(&self, value: &ScriptValue) -> ValueKind {
        if let Some(kind) = value.primitive_kind() {
            return kind;
        }
        match value.as_object().map(|handle| self.lookup(&handle)) {
            Some(Ok(Some(object))) => kind_of_js(&object),
            _ => ValueKind::Undefined,
        }
    }

    fn is_thenable(&mut self, value: &ScriptValue) -> bool {
        if value.primitive_kind().is_some() {
            return false;
        }
        match self.to_js(value) {
            Ok(value) => self.helper("isThenable", (value,)).unwrap_or(false),
            Err(_) => false,
        }
    }

    fn to_number(&mut self, value: &ScriptValue) -> f64 {
        match value {
            ScriptValue::Undefined | ScriptValue::Task(_) => f64::NAN,
            ScriptValue::Null => 0.0,
            ScriptValue::Bool(b) => f64::from(u8::from(*b)),
            ScriptValue::Number(n) => *n,
            ScriptValue::String(_) | ScriptValue::Object(_) => match self.to_js(value) {
                Ok(value) => self.helper("toNumber", (value,)).unwrap_or(f64::NAN),
                Err(_) => f64::NAN,
            },
        }
    }

    fn to_display_string(&mut self, value: &ScriptValue) -> String {
        match value {
            ScriptValue::String(s) => s.clone(),
            ScriptValue::Task(_) => "[object Promise]".into(),
            other => {
                let result = self
                    .to_js(other)
                    .and_then(|value| self.helper::<_, String>("toString", (value,)));
                match result {
                    Ok(text) => text,
                    Err(e) => {
                        log::debug!("[Runtime] string conversion threw: {}", e);
                        String::new()
                    }
                }
            }
        }
    }

    fn to_boolean(&self, value: &ScriptValue) -> bool {
        match value {
            ScriptValue::Undefined | ScriptValue::Null => false,
            ScriptValue::Bool(b) => *b,
            ScriptValue::Number(n) => *n != 0.0 && !n.is_nan(),
            ScriptValue::String(s) => !s.is_empty(),
            ScriptValue::Object(_) | ScriptValue::Task(_) => true,
        }
    }

    fn new_object(&mut self) -> ScriptValue {
        let object = Object::new(self.ctx.clone())
            .map(|object| object.into_value())
            .map_err(|e| self.exception(e));
        self.allocated("an object", object)
    }

    fn new_array(&mut self, items: Vec<ScriptValue>) -> ScriptValue {
        let array = self.js_array(&items);
        self.allocated("an array", array)
    }

    fn new_function(&mut self, name: &str, function: NativeFn) -> ScriptValue {
        let state = self.state.clone();
        let native = Function::new(
            self.ctx.clone(),
            move |ctx: Ctx<'js>, args: Rest<Value<'js>>| call_native(&ctx, &state, &function, args.0),
        )
        .map_err(|e| self.exception(e));
        let wrapped = native.and_then(|native| self.helper::<_, Value<'js>>("wrap", (name, native)));
        self.allocated("a function", wrapped)
    }

    fn new_error(&mut self, message: &str) -> ScriptValue {
        let error = self.helper::<_, Value<'js>>("error", (message, None::<&str>));
        self.allocated("an error", error)
    }

    fn new_promise(&mut self) -> (ScriptValue, PromiseResolver) {
        let promise = self.helper::<_, Value<'js>>("deferred", ());
        let promise = self.allocated("a promise", promise);
        (promise.clone(), PromiseResolver::new(promise))
    }

    fn settle_promise(&mut self, promise: &ScriptValue, outcome: Result<ScriptValue, ScriptValue>) {
        let (fulfilled, value) = match outcome {
            Ok(value) => (true, value),
            Err(reason) => (false, reason),
        };
        let settled = self.to_js(promise).and_then(|promise| {
            let value = self.to_js(&value)?;
            self.helper::<_, bool>("settle", (promise, fulfilled, value))
        });
        match settled {
            Ok(true) => {}
            Ok(false) => log::debug!("[Runtime] '{}' ignored a second settlement", self.name()),
            Err(e) => log::warn!("[Runtime] '{}' could not settle a promise: {}", self.name(), e),
        }
    }

    fn queue_task(&mut self, job: ScopeJob) {
        self.state.push_macrotask(Job::Scope(job));
    }

    fn set_timeout(&mut self, delay: Duration, job: ScopeJob) {
        self.state.add_timer(delay, Job::Scope(job));
    }

    fn spawn(&mut self, task: LocalTask) {
        self.state.spawn(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{arg, NativeClass, NativeLibrary};
    use crate::runtime::{test_realm, Realm};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    fn script(source: &str) -> ScriptSource {
        ScriptSource::Text(source.to_string())
    }

    #[test]
    fn test_script_objects_cross_as_references() {
        let realm = test_realm();
        realm.with_scope(|scope| {
            let object = scope.execute(script("({ greeting: 'hi', nested: [1, null] })")).unwrap();
            assert_eq!(scope.kind_of(&object), ValueKind::Object);
            assert_eq!(scope.get(&object, "greeting").unwrap(), ScriptValue::from("hi"));
            assert_eq!(scope.get(&object, "missing").unwrap(), ScriptValue::Undefined);
            assert_eq!(scope.keys(&object).unwrap(), vec!["greeting", "nested"]);

            let nested = scope.get(&object, "nested").unwrap();
            assert_eq!(scope.kind_of(&nested), ValueKind::Array);
            assert_eq!(
                scope.array_items(&nested).unwrap(),
                vec![ScriptValue::from(1), ScriptValue::Null]
            );
            assert_eq!(scope.get(&object, "nested").unwrap(), nested, "identity is stable");

            let error = scope.get(&ScriptValue::Null, "x").unwrap_err();
            assert!(error.message.starts_with("TypeError"));
            assert_eq!(
                scope.get(&ScriptValue::from("héllo"), "length").unwrap(),
                ScriptValue::from(5)
            );
        });
    }

    #[test]
    fn test_arrays_render_and_coerce() {
        let realm = test_realm();
        realm.with_scope(|scope| {
            let array = scope.new_array(vec![ScriptValue::from(1), ScriptValue::Null]);
            scope.set(&array, "3", ScriptValue::from("x")).unwrap();
            assert_eq!(scope.get(&array, "length").unwrap(), ScriptValue::from(4));
            assert_eq!(scope.to_display_string(&array), "1,,,x");

            let single = scope.new_array(vec![ScriptValue::from("7")]);
            assert_eq!(scope.to_number(&single), 7.0);
            let object = scope.new_object();
            assert!(scope.to_number(&object).is_nan());
            assert_eq!(scope.to_display_string(&object), "[object Object]");
            assert_eq!(scope.to_display_string(&ScriptValue::from(1e21)), "1e+21");
        });
    }

    #[test]
    fn test_huge_array_length_is_a_range_error() {
        let realm = test_realm();
        realm.with_scope(|scope| {
            let array = scope.new_array(Vec::new());
            let error = scope
                .set(&array, "length", ScriptValue::from(f64::from(u32::MAX) + 1.0))
                .unwrap_err();
            assert!(error.message.starts_with("RangeError"), "{}", error.message);
            assert_eq!(scope.get(&array, "length").unwrap(), ScriptValue::from(0));
        });
    }

    #[test]
    fn test_native_class_construction() {
        let realm = test_realm();
        realm.with_scope(|scope| {
            let library = NativeLibrary::new()
                .class(
                    NativeClass::new("Counter")
                        .constructor(|scope, this, args| {
                            let start = arg(&args, 0);
                            scope.set(&this, "count", start)?;
                            Ok(ScriptValue::Undefined)
                        })
                        .method("peek", |scope, this, _args| scope.get(&this, "count")),
                )
                .into_module("counter");
            let exports = scope.load_module(&library).unwrap();
            let class = scope.get(&exports, "Counter").unwrap();
            assert_eq!(scope.kind_of(&class), ValueKind::Function);
            let instance = scope.construct(&class, vec![ScriptValue::from(3)]).unwrap();

            assert_eq!(scope.kind_of(&instance), ValueKind::Object);
            assert_eq!(
                scope.invoke_member(&instance, "peek", Vec::new()).unwrap(),
                ScriptValue::from(3)
            );
            let missing = scope.invoke_member(&instance, "nope", Vec::new()).unwrap_err();
            assert_eq!(missing.message, "TypeError: nope is not a function");
        });
    }

    #[test]
    fn test_source_modules_of_every_kind() {
        let realm = test_realm();
        realm.with_scope(|scope| {
            let common = ModuleSource::text(
                "calc",
                ModuleKind::CommonJs,
                "class Calc { add(a, b) { return a + b } }\nmodule.exports = { Calc };",
            );
            let exports = scope.load_module(&common).unwrap();
            let class = scope.get(&exports, "Calc").unwrap();
            let calc = scope.construct(&class, Vec::new()).unwrap();
            let sum = scope
                .invoke_member(&calc, "add", vec![ScriptValue::from(2), ScriptValue::from(3)])
                .unwrap();
            assert_eq!(sum, ScriptValue::from(5));
            assert_eq!(scope.load_module(&common).unwrap(), exports, "loaded once");

            let es = ModuleSource::text(
                "shapes",
                ModuleKind::EsModule,
                "export function area(w, h) { return w * h; }",
            );
            let exports = scope.load_module(&es).unwrap();
            let area = scope.invoke_member(&exports, "area", vec![ScriptValue::from(3), ScriptValue::from(4)]);
            assert_eq!(area.unwrap(), ScriptValue::from(12));

            let plain = ModuleSource::text("plain", ModuleKind::Script, "({ answer: 42 })");
            let exports = scope.load_module(&plain).unwrap();
            assert_eq!(scope.get(&exports, "answer").unwrap(), ScriptValue::from(42));

            let broken = ModuleSource::text("broken", ModuleKind::CommonJs, "module.exports = ;");
            let error = scope.load_module(&broken).unwrap_err();
            assert!(error.message.starts_with("SyntaxError"), "{}", error.message);
        });
    }

    #[test]
    fn test_require_returns_loaded_modules() {
        let realm = test_realm();
        realm.with_scope(|scope| {
            let module = NativeLibrary::new()
                .function("one", |_, _, _| Ok(ScriptValue::from(1)))
                .into_module("numbers");
            let exports = scope.load_module(&module).unwrap();

            let require = scope.global("require");
            let required = scope
                .call(&require, ScriptValue::Undefined, vec![ScriptValue::from("./numbers.js")])
                .unwrap();
            assert_eq!(required, exports);

            let user = ModuleSource::text(
                "user",
                ModuleKind::CommonJs,
                "const { one } = require('numbers'); exports.two = () => one() + one();",
            );
            let user = scope.load_module(&user).unwrap();
            assert_eq!(scope.invoke_member(&user, "two", Vec::new()).unwrap(), ScriptValue::from(2));

            let missing = scope
                .call(&require, ScriptValue::Undefined, vec![ScriptValue::from("other")])
                .unwrap_err();
            assert!(missing.message.contains("Cannot find module 'other'"));
        });
    }

    #[test]
    fn test_thrown_errors_keep_message_stack_and_value() {
        let realm = test_realm();
        realm.with_scope(|scope| {
            let error = scope
                .execute(script("function fail() { throw new Error('bad'); }\nfail();"))
                .unwrap_err();
            assert_eq!(error.message, "bad");
            assert!(error.stack.unwrap().contains("fail"));
            let thrown = error.value.unwrap();
            assert_eq!(scope.get(&thrown, "message").unwrap(), ScriptValue::from("bad"));

            let error = scope.execute(script("null.x")).unwrap_err();
            assert!(error.message.starts_with("TypeError: "), "{}", error.message);

            let error = scope.execute(script("throw 'plain'")).unwrap_err();
            assert_eq!(error.message, "plain");
            assert_eq!(error.value, Some(ScriptValue::from("plain")));
        });
    }

    #[test]
    fn test_native_exceptions_are_thrown_into_script() {
        let realm = test_realm();
        realm.with_scope(|scope| {
            let fail = scope.new_function("fail", Arc::new(|_, _, _| Err(ScriptException::new("native"))));
            scope.set_global("fail", fail);
            let caught = scope
                .execute(script("try { fail(); 'missed' } catch (e) { e.message }"))
                .unwrap();
            assert_eq!(caught, ScriptValue::from("native"));
        });
    }

    #[test]
    fn test_thenable_check() {
        let realm = test_realm();
        realm.with_scope(|scope| {
            let (promise, _resolver) = scope.new_promise();
            assert!(scope.is_thenable(&promise));
            assert_eq!(scope.kind_of(&promise), ValueKind::Promise);

            let plain = scope.new_object();
            assert!(!scope.is_thenable(&plain));
            scope.set(&plain, "then", ScriptValue::from(1)).unwrap();
            assert!(!scope.is_thenable(&plain));

            let custom = scope.execute(script("({ then(resolve) { resolve(1) } })")).unwrap();
            assert!(scope.is_thenable(&custom));
            assert!(!scope.is_thenable(&ScriptValue::from("then")));
        });
    }

    #[test]
    fn test_released_objects_read_as_undefined_kind() {
        let realm = test_realm();
        realm.with_scope(|scope| {
            let object = scope.new_object();
            let handle = object.as_object().unwrap();
            scope.release(&handle);
            scope.release(&handle);
            assert_eq!(scope.kind_of(&object), ValueKind::Undefined);
            assert!(scope.get(&object, "x").unwrap_err().message.contains("released"));
        });
    }

    #[test]
    fn test_foreign_objects_are_rejected() {
        let first = test_realm();
        let second = test_realm();
        let object = first.with_scope(|scope| scope.new_object());
        second.with_scope(|scope| {
            let error = scope.get(&object, "x").unwrap_err();
            assert!(error.message.contains("belongs to context"));
        });
    }

    #[test]
    fn test_macrotasks_follow_microtasks() {
        let realm = test_realm();
        let order = Arc::new(Mutex::new(Vec::new()));
        realm.with_scope(|scope| {
            let log = order.clone();
            scope.queue_task(Box::new(move |_| log.lock().unwrap().push("task")));

            let (promise, resolver) = scope.new_promise();
            let log = order.clone();
            let reaction = scope.new_function(
                "reaction",
                Arc::new(move |_, _, _| {
                    log.lock().unwrap().push("microtask");
                    Ok(ScriptValue::Undefined)
                }),
            );
            scope.invoke_member(&promise, "then", vec![reaction]).unwrap();
            resolver.resolve(scope, ScriptValue::Null);
        });

        realm.run_until_idle();
        assert_eq!(*order.lock().unwrap(), vec!["microtask", "task"]);
    }

    #[test]
    fn test_timers_wait_for_their_deadline() {
        let realm = test_realm();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        realm.with_scope(|scope| {
            scope.set_timeout(
                Duration::from_secs(3600),
                Box::new(move |_| flag.store(true, Ordering::SeqCst)),
            )
        });
        realm.run_until_idle();
        assert!(!fired.load(Ordering::SeqCst));
        assert!(realm.next_deadline().is_some());

        let flag = fired.clone();
        realm.with_scope(|scope| {
            scope.set_timeout(Duration::ZERO, Box::new(move |_| flag.store(true, Ordering::SeqCst)))
        });
        realm.run_until_idle();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_script_set_timeout_and_clear_timeout() {
        let realm = test_realm();
        realm.with_scope(|scope| {
            scope
                .execute(script(
                    "globalThis.log = [];\n\
                     setTimeout((tag) => log.push(tag), 0, 'kept');\n\
                     clearTimeout(setTimeout(() => log.push('cleared'), 0));\n\
                     Promise.resolve().then(() => log.push('micro'));",
                ))
                .unwrap();
        });
        realm.run_until_idle();
        let log = realm.with_scope(|scope| {
            let log = scope.global("log");
            scope.to_display_string(&log)
        });
        assert_eq!(log, "micro,kept");
    }

    #[test]
    fn test_promise_export_depends_on_capability() {
        let realm = test_realm();
        realm.with_scope(|scope| {
            let (promise, _resolver) = scope.new_promise();
            assert_eq!(scope.export_value(promise.clone()), promise);
        });

        let realm = Realm::new(
            ContextId::next(),
            "tasks",
            Capabilities {
                task_promise_conversion: true,
            },
            std::sync::mpsc::channel().0,
        )
        .unwrap();
        let task = realm.with_scope(|scope| {
            let (promise, resolver) = scope.new_promise();
            let ScriptValue::Task(task) = scope.export_value(promise) else {
                panic!("expected a task");
            };
            resolver.resolve(scope, ScriptValue::from(9));
            task
        });
        realm.drain_microtasks();
        let value = futures::executor::block_on(task.into_future()).unwrap();
        assert_eq!(value, ScriptValue::from(9));
    }
}
