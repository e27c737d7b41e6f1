//! Editable JVM class-file model used by the hot-redefinition engine.
//!
//! Unlike a read-only class-file parser, every structure here round-trips:
//! [`ClassFile::parse`] keeps the constant pool and unknown attributes intact so
//! [`ClassFile::to_bytes`] produces a loadable class again after edits.
//!
//! The editing surface is deliberately small ([`BytecodeEditor`]):
//! - load a definition,
//! - synthesize public static accessors for private members,
//! - rewrite array loads/stores into calls to replacement methods,
//! - serialize back to bytes.
#![forbid(unsafe_code)]

mod accessor;
mod array_access;
mod classfile;
mod code;
mod constant_pool;
mod descriptor;
mod editor;
mod error;
mod opcodes;
mod reader;
mod stackmap;
mod writer;

pub use crate::accessor::{add_accessor, AccessorRef, MemberRef, ACCESSOR_PREFIX};
pub use crate::array_access::{rewrite_array_access, ArrayAccessPolicy};
pub use crate::classfile::{access, Attribute, ClassFile, Member};
pub use crate::code::{Code, ExceptionHandler};
pub use crate::constant_pool::{Constant, ConstantPool};
pub use crate::descriptor::{
    parse_field_descriptor, parse_method_descriptor, BaseType, FieldType, MethodDescriptor,
    ReturnType,
};
pub use crate::editor::{BytecodeEditor, ClassHandle, ClassfileEditor};
pub use crate::error::{Error, Result};

/// Convert an internal class name (`com/example/Foo`) to its binary form (`com.example.Foo`).
pub fn internal_to_binary(name: &str) -> String {
    name.replace('/', ".")
}

/// Convert a binary class name (`com.example.Foo`) to its internal form (`com/example/Foo`).
pub fn binary_to_internal(name: &str) -> String {
    name.replace('.', "/")
}
