//! The in-process side of hotwire.
//!
//! An [`Agent`] wraps the host's [`ManagedRuntime`] and serves controller
//! requests: compile submitted source against the running classpath, swap the
//! bytecode of loaded classes, invoke methods on resolved instances and keep
//! their results until cleared. [`AgentServer`] exposes it over TCP.

pub mod cache;
pub mod compiler;
pub mod container;
pub mod invoke;
pub mod redefine;
pub mod resolve;
pub mod runtime;
pub mod server;
pub mod session;

pub use cache::ResultCache;
pub use compiler::{CompileError, Compiler, JavacCompiler};
pub use container::{ContainerError, ContainerInstance, ContainerLookup, ProxyTarget, Unwrappable};
pub use invoke::{InvocationDispatcher, InvocationError};
pub use redefine::{RedefineError, Redefinition, RedefinitionAuthority};
pub use resolve::{InstanceOrigin, InstanceResolver, ResolveError, ResolvedInstance};
pub use runtime::{
    Capabilities, ClassDefinition, ClassShape, ClasspathView, ManagedRuntime, MemberInfo,
    RuntimeError,
};
pub use server::AgentServer;
pub use session::{Agent, AgentBuilder, Session};
