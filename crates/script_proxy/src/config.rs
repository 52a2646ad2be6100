//! Factory configuration

use serde::{Deserialize, Serialize};

/// Flags a context is created with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// Convert promises returned to the host into host-side futures
    /// (`ScriptValue::Task`) before the interop layer sees them
    pub task_promise_conversion: bool,
}

/// Configuration of an [`InstanceFactory`](crate::InstanceFactory)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    /// Context names are `{prefix}-{instance id}`
    pub context_prefix: String,
    pub capabilities: Capabilities,
    /// Resolve every method binding when a typed instance is created
    pub validate_bindings: bool,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            context_prefix: "script".to_string(),
            capabilities: Capabilities::default(),
            validate_bindings: true,
        }
    }
}

impl FactoryConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.context_prefix = prefix.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate_bindings = validate;
        self
    }
}
