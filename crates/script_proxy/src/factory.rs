//! Instance factory
//!
//! Owns one script context and one target object inside it, and hands out
//! typed views of that object.
//!
//! ```text
//! Uninitialized --initialize--> Initialized --create_instance--> InstanceReady
//!        \                           |                                |
//!         `---------------------- dispose ---------------------> Disposed
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::binding::BindingTable;
use crate::config::FactoryConfig;
use crate::error::{HostError, ProxyError, ProxyResult, ScriptException};
use crate::host::{ContextExt, ScriptContext, ScriptEngine};
use crate::interceptor::Interceptor;
use crate::interface::ScriptInterface;
use crate::module::{ModuleSource, ScriptSource};
use crate::operation::lock;
use crate::value::{ObjectRef, ScriptValue};

/// Lifecycle state of an [`InstanceFactory`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryState {
    Uninitialized,
    Initialized,
    InstanceReady,
    Disposed,
}

impl fmt::Display for FactoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FactoryState::Uninitialized => "uninitialized",
            FactoryState::Initialized => "initialized",
            FactoryState::InstanceReady => "instance ready",
            FactoryState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// The library to load and the export to construct
#[derive(Debug, Clone)]
pub struct TargetLibrary {
    pub module: ModuleSource,
    /// Name of the constructor in the module's exports
    pub constructor: String,
}

impl TargetLibrary {
    pub fn new(module: ModuleSource, constructor: impl Into<String>) -> Self {
        Self {
            module,
            constructor: constructor.into(),
        }
    }
}

/// The live target object and the context that owns it
#[derive(Clone)]
pub struct InstanceHandle {
    pub instance: ObjectRef,
    pub id: Uuid,
    pub context: Arc<dyn ScriptContext>,
}

impl InstanceHandle {
    /// Run more code against the instance's context
    pub fn execute(&self, script: ScriptSource) -> ProxyResult<ScriptValue> {
        let result = self.context.run(move |scope| scope.execute(script))?;
        result.map_err(|e| ProxyError::Host(HostError::Script(e)))
    }
}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("instance", &self.instance)
            .field("id", &self.id)
            .field("context", &self.context.name())
            .finish()
    }
}

enum Stage {
    Uninitialized,
    Initialized {
        context: Arc<dyn ScriptContext>,
        exports: ScriptValue,
    },
    InstanceReady {
        handle: InstanceHandle,
    },
    Disposed,
}

impl Stage {
    fn state(&self) -> FactoryState {
        match self {
            Stage::Uninitialized => FactoryState::Uninitialized,
            Stage::Initialized { .. } => FactoryState::Initialized,
            Stage::InstanceReady { .. } => FactoryState::InstanceReady,
            Stage::Disposed => FactoryState::Disposed,
        }
    }
}

/// Creates and owns one dynamic instance
pub struct InstanceFactory {
    id: Uuid,
    engine: Arc<dyn ScriptEngine>,
    library: TargetLibrary,
    config: FactoryConfig,
    stage: Mutex<Stage>,
}

impl InstanceFactory {
    pub fn new(engine: impl ScriptEngine + 'static, library: TargetLibrary, config: FactoryConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            engine: Arc::new(engine),
            library,
            config,
            stage: Mutex::new(Stage::Uninitialized),
        }
    }

    /// New factory, initialized and with its instance created
    pub fn create(
        engine: impl ScriptEngine + 'static,
        library: TargetLibrary,
        config: FactoryConfig,
    ) -> ProxyResult<Self> {
        let factory = Self::new(engine, library, config);
        factory.initialize()?;
        factory.create_instance()?;
        Ok(factory)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> FactoryState {
        lock(&self.stage).state()
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    /// Create the context and load the target library.
    ///
    /// Calling it again once initialized is a no-op.
    pub fn initialize(&self) -> ProxyResult<()> {
        let mut stage = lock(&self.stage);
        match *stage {
            Stage::Uninitialized => {}
            Stage::Disposed => return Err(ProxyError::Disposed),
            _ => return Ok(()),
        }

        let name = format!("{}-{}", self.config.context_prefix, self.id.simple());
        let context = self
            .engine
            .create_context(&name, &self.config.capabilities)?;
        log::debug!("[Factory] created context '{}'", name);

        let module = self.library.module.clone();
        let loaded = context.run(move |scope| scope.load_module(&module));
        let exports = match loaded {
            Ok(Ok(exports)) => exports,
            Ok(Err(exception)) => {
                context.dispose();
                return Err(ProxyError::Host(HostError::Script(exception)));
            }
            Err(e) => {
                context.dispose();
                return Err(e.into());
            }
        };
        log::debug!("[Factory] loaded library '{}'", self.library.module.name);

        *stage = Stage::Initialized { context, exports };
        Ok(())
    }

    /// Construct the target object. Idempotent once the instance exists.
    pub fn create_instance(&self) -> ProxyResult<InstanceHandle> {
        let mut stage = lock(&self.stage);
        let (context, exports) = match &*stage {
            Stage::Initialized { context, exports } => (context.clone(), exports.clone()),
            Stage::InstanceReady { handle } => return Ok(handle.clone()),
            Stage::Disposed => return Err(ProxyError::Disposed),
            Stage::Uninitialized => {
                return Err(ProxyError::NotReady {
                    state: FactoryState::Uninitialized,
                })
            }
        };

        let constructor = self.library.constructor.clone();
        let instance = context
            .run(move |scope| -> Result<ObjectRef, ScriptException> {
                let class = scope.get(&exports, &constructor)?;
                match scope.construct(&class, Vec::new())? {
                    ScriptValue::Object(instance) => Ok(instance),
                    other => Err(ScriptException::type_error(format!(
                        "constructor '{}' produced a {}",
                        constructor,
                        scope.kind_of(&other)
                    ))),
                }
            })?
            .map_err(|e| ProxyError::Host(HostError::Script(e)))?;

        let handle = InstanceHandle {
            instance,
            id: self.id,
            context,
        };
        log::debug!(
            "[Factory] instance {} created in '{}'",
            handle.id,
            handle.context.name()
        );
        *stage = Stage::InstanceReady {
            handle: handle.clone(),
        };
        Ok(handle)
    }

    /// The live instance
    pub fn handle(&self) -> ProxyResult<InstanceHandle> {
        match &*lock(&self.stage) {
            Stage::InstanceReady { handle } => Ok(handle.clone()),
            Stage::Disposed => Err(ProxyError::Disposed),
            other => Err(ProxyError::NotReady {
                state: other.state(),
            }),
        }
    }

    /// An untyped interceptor over the instance, with lazily resolved bindings
    pub fn interceptor(&self) -> ProxyResult<Interceptor> {
        let handle = self.handle()?;
        Ok(Interceptor::new(
            handle.context,
            handle.instance,
            Arc::new(BindingTable::new()),
        ))
    }

    /// A typed view of the instance
    pub fn typed_instance<I: ScriptInterface>(&self) -> ProxyResult<I> {
        let handle = self.handle()?;
        let bindings = if self.config.validate_bindings {
            BindingTable::from_descriptors(&I::methods())?
        } else {
            BindingTable::new()
        };
        Ok(I::from_interceptor(Interceptor::new(
            handle.context,
            handle.instance,
            Arc::new(bindings),
        )))
    }

    /// Release the instance and tear the context down. Idempotent.
    pub fn dispose(&self) {
        let previous = std::mem::replace(&mut *lock(&self.stage), Stage::Disposed);
        let context = match previous {
            Stage::Disposed => return,
            Stage::Uninitialized => None,
            Stage::Initialized { context, .. } => Some(context),
            Stage::InstanceReady { handle } => {
                let instance = handle.instance;
                if let Err(e) = handle.context.run(move |scope| scope.release(&instance)) {
                    log::debug!("[Factory] could not release instance: {}", e);
                }
                Some(handle.context)
            }
        };
        if let Some(context) = context {
            context.dispose();
            log::debug!("[Factory] disposed context '{}'", context.name());
        }
    }
}

impl Drop for InstanceFactory {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for InstanceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceFactory")
            .field("id", &self.id)
            .field("library", &self.library.module.name)
            .field("state", &self.state())
            .finish()
    }
}
