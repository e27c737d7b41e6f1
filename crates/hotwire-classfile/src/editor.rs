use crate::accessor::{add_accessor, AccessorRef, MemberRef};
use crate::array_access::{rewrite_array_access, ArrayAccessPolicy};
use crate::classfile::ClassFile;
use crate::error::Result;

/// A loaded class definition being edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassHandle {
    class: ClassFile,
}

impl ClassHandle {
    /// Internal name of the class (`com/example/Foo`).
    pub fn class_name(&self) -> Result<&str> {
        self.class.class_name()
    }

    pub fn class_file(&self) -> &ClassFile {
        &self.class
    }

    pub fn into_class_file(self) -> ClassFile {
        self.class
    }
}

impl From<ClassFile> for ClassHandle {
    fn from(class: ClassFile) -> Self {
        Self { class }
    }
}

/// The bytecode editing operations the redefinition engine relies on.
pub trait BytecodeEditor {
    fn load_definition(&self, bytes: &[u8]) -> Result<ClassHandle>;

    fn add_accessor(&self, handle: &mut ClassHandle, member: &MemberRef) -> Result<AccessorRef>;

    /// Returns the number of rewritten instructions.
    fn rewrite_array_access(
        &self,
        handle: &mut ClassHandle,
        policy: &ArrayAccessPolicy,
    ) -> Result<usize>;

    fn to_bytes(&self, handle: &ClassHandle) -> Result<Vec<u8>>;
}

/// [`BytecodeEditor`] backed by this crate's class-file model.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassfileEditor;

impl BytecodeEditor for ClassfileEditor {
    fn load_definition(&self, bytes: &[u8]) -> Result<ClassHandle> {
        ClassFile::parse(bytes).map(ClassHandle::from)
    }

    fn add_accessor(&self, handle: &mut ClassHandle, member: &MemberRef) -> Result<AccessorRef> {
        add_accessor(&mut handle.class, member)
    }

    fn rewrite_array_access(
        &self,
        handle: &mut ClassHandle,
        policy: &ArrayAccessPolicy,
    ) -> Result<usize> {
        rewrite_array_access(&mut handle.class, policy)
    }

    fn to_bytes(&self, handle: &ClassHandle) -> Result<Vec<u8>> {
        handle.class.to_bytes()
    }
}
