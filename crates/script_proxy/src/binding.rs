//! Method binding resolution
//!
//! A [`MethodDescriptor`] is what an interface declares about one method: its
//! name, parameter and return type names, and optionally an explicit binding
//! to a dynamic member. Resolution turns it into an immutable
//! [`MethodBinding`]; a [`BindingTable`] memoizes that per signature.
//!
//! The calling convention comes only from the explicit binding. A
//! future-shaped return type does not make a binding async; a promise returned
//! at call time is still bridged.

use std::any::type_name;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::{ProxyError, ProxyResult};

/// How the dynamic member is expected to return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallingConvention {
    /// Returns its value directly (a promise is still bridged if one shows up)
    Sync,
    /// Must return a promise-like value
    Async,
}

/// Identity of a declared method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub name: String,
    pub params: Vec<&'static str>,
    pub returns: &'static str,
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}) -> {}", self.name, self.params.join(", "), self.returns)
    }
}

/// An explicit member binding declared on a method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingOverride {
    pub member: String,
    pub is_async: bool,
}

/// Everything an interface declares about one method.
///
/// ```rust,ignore
/// let square = MethodDescriptor::new("square")
///     .param::<i32>()
///     .returns::<ScriptFuture<i32>>()
///     .member("square")
///     .asynchronous();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    signature: Signature,
    binding: Option<BindingOverride>,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            signature: Signature {
                name: name.into(),
                params: Vec::new(),
                returns: type_name::<()>(),
            },
            binding: None,
        }
    }

    pub fn param<T: ?Sized>(mut self) -> Self {
        self.signature.params.push(type_name::<T>());
        self
    }

    pub fn returns<T: ?Sized>(mut self) -> Self {
        self.signature.returns = type_name::<T>();
        self
    }

    /// Bind to a specific dynamic member
    pub fn member(mut self, member: impl Into<String>) -> Self {
        let member = member.into();
        match &mut self.binding {
            Some(binding) => binding.member = member,
            None => {
                self.binding = Some(BindingOverride {
                    member,
                    is_async: false,
                })
            }
        }
        self
    }

    /// Declare the async calling convention
    pub fn asynchronous(mut self) -> Self {
        match &mut self.binding {
            Some(binding) => binding.is_async = true,
            None => {
                self.binding = Some(BindingOverride {
                    member: self.signature.name.clone(),
                    is_async: true,
                })
            }
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn binding(&self) -> Option<&BindingOverride> {
        self.binding.as_ref()
    }
}

/// A resolved binding; immutable once created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBinding {
    pub signature: Signature,
    pub member: String,
    pub convention: CallingConvention,
}

impl MethodBinding {
    pub fn is_async(&self) -> bool {
        self.convention == CallingConvention::Async
    }
}

/// Resolve a descriptor without caching
pub fn resolve(descriptor: &MethodDescriptor) -> ProxyResult<MethodBinding> {
    let (member, convention) = match &descriptor.binding {
        Some(binding) => (
            binding.member.trim(),
            if binding.is_async {
                CallingConvention::Async
            } else {
                CallingConvention::Sync
            },
        ),
        None => (descriptor.signature.name.trim(), CallingConvention::Sync),
    };
    if member.is_empty() {
        return Err(ProxyError::BindingNotFound {
            method: descriptor.signature.to_string(),
        });
    }
    Ok(MethodBinding {
        signature: descriptor.signature.clone(),
        member: member.to_string(),
        convention,
    })
}

/// Bindings resolved so far, keyed by signature
#[derive(Debug, Default)]
pub struct BindingTable {
    entries: RwLock<HashMap<Signature, Arc<MethodBinding>>>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every descriptor up front; fails on the first bad one
    pub fn from_descriptors<'a, I>(descriptors: I) -> ProxyResult<Self>
    where
        I: IntoIterator<Item = &'a MethodDescriptor>,
    {
        let table = Self::new();
        for descriptor in descriptors {
            table.resolve(descriptor)?;
        }
        Ok(table)
    }

    /// The cached binding for this descriptor's signature, resolving it on
    /// first use
    pub fn resolve(&self, descriptor: &MethodDescriptor) -> ProxyResult<Arc<MethodBinding>> {
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some(binding) = entries.get(&descriptor.signature) {
                return Ok(binding.clone());
            }
        }

        let binding = Arc::new(resolve(descriptor)?);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let binding = entries
            .entry(descriptor.signature.clone())
            .or_insert(binding)
            .clone();
        log::trace!(
            "[Binding] {} -> {} ({:?})",
            binding.signature,
            binding.member,
            binding.convention
        );
        Ok(binding)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
