//! Finding an object to invoke an instance method on.
//!
//! Strategies, in order:
//! 1. container lookups, in registration order; the last instance of the last
//!    lookup that returned any wins,
//! 2. a heap scan for instances of the exact class; the last one enumerated
//!    wins, which is usually but not necessarily the newest,
//! 3. construction: the no-arg constructor, else the first declared one with
//!    zero/null arguments.
//!
//! Proxy unwrapping for private calls only applies to container instances:
//! a container hands out its proxies together with their unwrapping
//! capability ([`Unwrappable`](crate::container::Unwrappable)). Heap and
//! constructed objects carry no such capability and are used as found. The
//! heap scan only matches the exact class, so it never returns a subclass
//! proxy in the first place.

use std::fmt;
use std::sync::Arc;

use hotwire_classfile::{parse_method_descriptor, BaseType, FieldType};
use hotwire_proto::{ObjectRef, Value};

use crate::container::ContainerLookup;
use crate::runtime::{ClassShape, ManagedRuntime, RuntimeError};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no instance of {class_name} can be obtained: {reason}")]
    NoInstance { class_name: String, reason: String },

    #[error("failed to construct {class_name}")]
    ConstructionFailed {
        class_name: String,
        #[source]
        source: RuntimeError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceOrigin {
    Container { lookup: String },
    Heap,
    Constructed,
}

impl fmt::Display for InstanceOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceOrigin::Container { lookup } => write!(f, "container:{lookup}"),
            InstanceOrigin::Heap => f.write_str("heap"),
            InstanceOrigin::Constructed => f.write_str("constructed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInstance {
    pub object: ObjectRef,
    pub origin: InstanceOrigin,
}

#[derive(Default)]
pub struct InstanceResolver {
    lookups: Vec<Arc<dyn ContainerLookup>>,
}

impl InstanceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, lookup: Arc<dyn ContainerLookup>) {
        self.lookups.push(lookup);
    }

    /// `unwrap_proxies` is set when the method to call is not public: proxies
    /// only forward public calls.
    pub fn resolve(
        &self,
        runtime: &dyn ManagedRuntime,
        class: &ClassShape,
        unwrap_proxies: bool,
    ) -> Result<ResolvedInstance, ResolveError> {
        if let Some(found) = self.from_containers(&class.name, unwrap_proxies) {
            return Ok(found);
        }

        match runtime.instances_of(&class.name) {
            Ok(instances) => {
                if let Some(object) = instances
                    .into_iter()
                    .rev()
                    .find(|obj| obj.class_name == class.name)
                {
                    return Ok(ResolvedInstance {
                        object,
                        origin: InstanceOrigin::Heap,
                    });
                }
            }
            Err(err) => {
                tracing::warn!(
                    target: "hotwire.resolve",
                    class = %class.name,
                    error = %err,
                    "heap scan failed; falling back to construction"
                );
            }
        }

        construct(runtime, class)
    }

    fn from_containers(&self, class_name: &str, unwrap_proxies: bool) -> Option<ResolvedInstance> {
        let mut chosen = None;
        for lookup in &self.lookups {
            match lookup.lookup(class_name) {
                Ok(instances) => {
                    if let Some(instance) = instances.into_iter().last() {
                        chosen = Some((lookup.name().to_string(), instance));
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        target: "hotwire.resolve",
                        lookup = lookup.name(),
                        class = %class_name,
                        error = %err,
                        "container lookup failed; skipping"
                    );
                }
            }
        }

        let (lookup, instance) = chosen?;
        let mut object = instance.object.clone();
        if unwrap_proxies {
            if let Some(proxy) = instance.as_unwrappable() {
                match proxy.target() {
                    Ok(target) => object = target,
                    Err(err) => tracing::warn!(
                        target: "hotwire.resolve",
                        lookup = %lookup,
                        class = %class_name,
                        error = %err,
                        "failed to unwrap proxy; using it as is"
                    ),
                }
            }
        }
        Some(ResolvedInstance {
            object,
            origin: InstanceOrigin::Container { lookup },
        })
    }
}

fn construct(runtime: &dyn ManagedRuntime, class: &ClassShape) -> Result<ResolvedInstance, ResolveError> {
    let no_instance = |reason: &str| ResolveError::NoInstance {
        class_name: class.name.clone(),
        reason: reason.to_string(),
    };
    if !class.is_instantiable() {
        return Err(no_instance("the type is abstract or an interface"));
    }
    let constructor = class
        .constructors()
        .find(|c| c.descriptor == "()V")
        .or_else(|| class.constructors().next())
        .ok_or_else(|| no_instance("the type declares no constructor"))?;

    let descriptor = parse_method_descriptor(&constructor.descriptor)
        .map_err(|err| no_instance(&err.to_string()))?;
    let args: Vec<Value> = descriptor.params.iter().map(zero_value).collect();

    let object = runtime
        .new_instance(&class.name, &constructor.descriptor, &args)
        .map_err(|source| ResolveError::ConstructionFailed {
            class_name: class.name.clone(),
            source,
        })?;
    Ok(ResolvedInstance {
        object,
        origin: InstanceOrigin::Constructed,
    })
}

pub(crate) fn zero_value(ty: &FieldType) -> Value {
    match ty {
        FieldType::Base(BaseType::Boolean) => Value::Boolean(false),
        FieldType::Base(BaseType::Byte) => Value::Byte(0),
        FieldType::Base(BaseType::Char) => Value::Char(0),
        FieldType::Base(BaseType::Short) => Value::Short(0),
        FieldType::Base(BaseType::Int) => Value::Int(0),
        FieldType::Base(BaseType::Long) => Value::Long(0),
        FieldType::Base(BaseType::Float) => Value::Float(0.0),
        FieldType::Base(BaseType::Double) => Value::Double(0.0),
        FieldType::Object(_) | FieldType::Array(_) => Value::Null,
    }
}
