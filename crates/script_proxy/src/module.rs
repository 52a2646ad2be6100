//! Library modules and scripts handed to a runtime host
//!
//! A module is either JavaScript source text of some [`ModuleKind`], or a
//! [`NativeModule`] written against [`Scope`]. Native modules are portable
//! across hosts because they only use the scope contract.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ScriptException;
use crate::host::{NativeFn, Scope};
use crate::value::ScriptValue;

/// How a module exposes its exports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    /// A plain script whose completion value is its exports object
    #[default]
    Script,
    /// `module.exports` style
    CommonJs,
    /// `export` declarations
    EsModule,
}

/// Library code that installs itself through the scope contract
pub trait NativeModule: Send + Sync {
    /// Build the module's exports object
    fn install(&self, scope: &mut dyn Scope) -> Result<ScriptValue, ScriptException>;
}

#[derive(Clone)]
pub enum ModuleBody {
    Text(String),
    Native(Arc<dyn NativeModule>),
}

/// A named library module
#[derive(Clone)]
pub struct ModuleSource {
    pub name: String,
    pub kind: ModuleKind,
    pub body: ModuleBody,
}

impl ModuleSource {
    pub fn text(name: impl Into<String>, kind: ModuleKind, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            body: ModuleBody::Text(source.into()),
        }
    }

    pub fn native(name: impl Into<String>, module: impl NativeModule + 'static) -> Self {
        Self {
            name: name.into(),
            kind: ModuleKind::CommonJs,
            body: ModuleBody::Native(Arc::new(module)),
        }
    }
}

impl fmt::Debug for ModuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.body {
            ModuleBody::Text(source) => format!("Text({} bytes)", source.len()),
            ModuleBody::Native(_) => "Native".to_string(),
        };
        f.debug_struct("ModuleSource")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("body", &body)
            .finish()
    }
}

type ScriptBody = Box<dyn FnOnce(&mut dyn Scope) -> Result<ScriptValue, ScriptException> + Send>;

/// A top-level script run against an existing context
pub enum ScriptSource {
    Text(String),
    Native(ScriptBody),
}

impl ScriptSource {
    pub fn native<F>(body: F) -> Self
    where
        F: FnOnce(&mut dyn Scope) -> Result<ScriptValue, ScriptException> + Send + 'static,
    {
        ScriptSource::Native(Box::new(body))
    }
}

impl fmt::Debug for ScriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptSource::Text(source) => f.debug_tuple("Text").field(source).finish(),
            ScriptSource::Native(_) => f.write_str("Native(..)"),
        }
    }
}

// ============================================================================
// Native library builder
// ============================================================================

/// A class exported by a [`NativeLibrary`].
///
/// Installed as a constructor function whose `prototype` carries the methods,
/// so `Scope::construct` produces instances the usual way.
pub struct NativeClass {
    name: String,
    constructor: Option<NativeFn>,
    methods: Vec<(String, NativeFn)>,
}

impl NativeClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constructor: None,
            methods: Vec::new(),
        }
    }

    /// Initializer called with the fresh instance as `this`
    pub fn constructor<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut dyn Scope, ScriptValue, Vec<ScriptValue>) -> Result<ScriptValue, ScriptException>
            + Send
            + Sync
            + 'static,
    {
        self.constructor = Some(Arc::new(f));
        self
    }

    pub fn method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut dyn Scope, ScriptValue, Vec<ScriptValue>) -> Result<ScriptValue, ScriptException>
            + Send
            + Sync
            + 'static,
    {
        self.methods.push((name.into(), Arc::new(f)));
        self
    }
}

/// A library assembled from Rust functions and classes
#[derive(Default)]
pub struct NativeLibrary {
    functions: Vec<(String, NativeFn)>,
    classes: Vec<NativeClass>,
}

impl NativeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut dyn Scope, ScriptValue, Vec<ScriptValue>) -> Result<ScriptValue, ScriptException>
            + Send
            + Sync
            + 'static,
    {
        self.functions.push((name.into(), Arc::new(f)));
        self
    }

    pub fn class(mut self, class: NativeClass) -> Self {
        self.classes.push(class);
        self
    }

    /// Wrap the library as a loadable module
    pub fn into_module(self, name: impl Into<String>) -> ModuleSource {
        ModuleSource::native(name, self)
    }
}

impl NativeModule for NativeLibrary {
    fn install(&self, scope: &mut dyn Scope) -> Result<ScriptValue, ScriptException> {
        let exports = scope.new_object();

        for (name, f) in &self.functions {
            let function = scope.new_function(name, f.clone());
            scope.set(&exports, name, function)?;
        }

        for class in &self.classes {
            let init: NativeFn = match &class.constructor {
                Some(f) => f.clone(),
                None => Arc::new(|_, _, _| Ok(ScriptValue::Undefined)),
            };
            let constructor = scope.new_function(&class.name, init);
            let prototype = scope.new_object();
            for (name, f) in &class.methods {
                let method = scope.new_function(name, f.clone());
                scope.set(&prototype, name, method)?;
            }
            scope.set(&constructor, "prototype", prototype)?;
            scope.set(&exports, &class.name, constructor)?;
        }

        Ok(exports)
    }
}

/// Argument `index`, or `Undefined` when the caller passed fewer
pub fn arg(args: &[ScriptValue], index: usize) -> ScriptValue {
    args.get(index).cloned().unwrap_or_default()
}
