//! Dependency-injection containers, seen only through lookups.

use std::fmt;
use std::sync::Arc;

use hotwire_proto::ObjectRef;

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("container is not available: {0}")]
    Unavailable(String),
    #[error("lookup of {class_name} failed: {message}")]
    Lookup { class_name: String, message: String },
}

/// Objects that wrap a real target, such as interception proxies.
pub trait Unwrappable: Send + Sync {
    fn target(&self) -> Result<ObjectRef, ContainerError>;
}

/// A proxy whose target is known up front.
#[derive(Debug, Clone)]
pub struct ProxyTarget(pub ObjectRef);

impl Unwrappable for ProxyTarget {
    fn target(&self) -> Result<ObjectRef, ContainerError> {
        Ok(self.0.clone())
    }
}

/// One instance managed by a container.
#[derive(Clone)]
pub struct ContainerInstance {
    pub object: ObjectRef,
    unwrap: Option<Arc<dyn Unwrappable>>,
}

impl ContainerInstance {
    pub fn new(object: ObjectRef) -> Self {
        Self {
            object,
            unwrap: None,
        }
    }

    pub fn proxied(object: ObjectRef, unwrap: Arc<dyn Unwrappable>) -> Self {
        Self {
            object,
            unwrap: Some(unwrap),
        }
    }

    pub fn as_unwrappable(&self) -> Option<&dyn Unwrappable> {
        self.unwrap.as_deref()
    }
}

impl fmt::Debug for ContainerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerInstance")
            .field("object", &self.object)
            .field("unwrappable", &self.unwrap.is_some())
            .finish()
    }
}

pub trait ContainerLookup: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Instances of `class_name`, oldest registration first.
    fn lookup(&self, class_name: &str) -> Result<Vec<ContainerInstance>, ContainerError>;
}
