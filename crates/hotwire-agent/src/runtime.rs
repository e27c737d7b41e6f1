//! Boundary to the managed runtime hosting the agent.
//!
//! Everything the agent knows about loaded classes, live objects and method
//! calls comes through [`ManagedRuntime`]. Calls are synchronous and may block;
//! the server runs them on the blocking pool.

use std::path::PathBuf;

use hotwire_classfile::access;
use hotwire_proto::{Failure, ObjectRef, Value};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("class {0} is not loaded")]
    ClassNotLoaded(String),

    /// The native redefinition facility refused the new definitions.
    #[error("{0}")]
    Rejected(String),

    /// Target code threw; the failure describes the thrown object.
    #[error("{0}")]
    Threw(Failure),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Other(String),
}

/// What the runtime's redefinition facility allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub can_redefine: bool,
    /// Super class, interfaces and fields may change.
    pub can_change_schema: bool,
    pub can_add_methods: bool,
}

impl Default for Capabilities {
    /// Method bodies only, as on a stock JVM.
    fn default() -> Self {
        Self {
            can_redefine: true,
            can_change_schema: false,
            can_add_methods: false,
        }
    }
}

/// Field or method as declared by a loaded class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberInfo {
    pub name: String,
    pub descriptor: String,
    pub access_flags: u16,
}

impl MemberInfo {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>, access_flags: u16) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            access_flags,
        }
    }

    pub fn is_static(&self) -> bool {
        self.access_flags & access::STATIC != 0
    }

    pub fn is_public(&self) -> bool {
        self.access_flags & access::PUBLIC != 0
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }
}

/// Shape of a class as currently loaded in the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassShape {
    /// Binary name (`com.example.Foo`).
    pub name: String,
    pub access_flags: u16,
    /// Binary name; `None` only for `java.lang.Object`.
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<MemberInfo>,
    /// Includes constructors (`<init>`).
    pub methods: Vec<MemberInfo>,
    /// Classpath root the class was loaded from, when known.
    pub location: Option<PathBuf>,
}

impl ClassShape {
    pub fn is_instantiable(&self) -> bool {
        self.access_flags & (access::INTERFACE | access::ABSTRACT) == 0
    }

    pub fn constructors(&self) -> impl Iterator<Item = &MemberInfo> {
        self.methods.iter().filter(|m| m.is_constructor())
    }
}

/// Where the compiler may resolve symbols from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClasspathView {
    /// The runtime's own classpath, in lookup order.
    pub entries: Vec<PathBuf>,
    /// Locations of loaded classes that are not on `entries` (e.g. custom loaders).
    pub class_locations: Vec<PathBuf>,
}

impl ClasspathView {
    /// `entries` then `class_locations`, without duplicates.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = Vec::with_capacity(self.entries.len() + self.class_locations.len());
        for path in self.entries.iter().chain(&self.class_locations) {
            if !out.contains(path) {
                out.push(path.clone());
            }
        }
        out
    }
}

/// A class definition handed to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDefinition {
    pub class_name: String,
    pub bytecode: Vec<u8>,
}

pub trait ManagedRuntime: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    fn classpath(&self) -> Result<ClasspathView, RuntimeError>;

    /// `Ok(None)` when no class with that binary name is loaded.
    fn loaded_class(&self, class_name: &str) -> Result<Option<ClassShape>, RuntimeError>;

    /// Replace all `definitions` at once, or none of them.
    fn redefine_classes(&self, definitions: &[ClassDefinition]) -> Result<(), RuntimeError>;

    /// Load a class that is not loaded yet.
    fn define_class(&self, definition: &ClassDefinition) -> Result<(), RuntimeError>;

    /// Live instances, in the runtime's enumeration order. May include subclasses.
    fn instances_of(&self, class_name: &str) -> Result<Vec<ObjectRef>, RuntimeError>;

    fn new_instance(
        &self,
        class_name: &str,
        constructor_descriptor: &str,
        args: &[Value],
    ) -> Result<ObjectRef, RuntimeError>;

    /// `receiver` is `None` for static methods.
    fn invoke_method(
        &self,
        receiver: Option<&ObjectRef>,
        class_name: &str,
        method: &MemberInfo,
        args: &[Value],
    ) -> Result<Value, RuntimeError>;

    /// Build an object of `class_name` (binary name) from JSON.
    fn decode_object(
        &self,
        class_name: &str,
        json: &serde_json::Value,
    ) -> Result<Value, RuntimeError>;

    /// Human-readable form of a value, e.g. via `toString()`.
    fn render(&self, value: &Value) -> Result<String, RuntimeError>;
}
