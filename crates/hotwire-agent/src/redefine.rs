//! The single owner of class-definition changes in the process.
//!
//! There is exactly one [`RedefinitionAuthority`] per agent. The server keeps it
//! behind an async `RwLock`: redefinition takes `&mut self` (write lock), while
//! compilation and invocation only need `&self` (read lock), so no invocation
//! runs while a definition is being swapped.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use hotwire_classfile::{
    binary_to_internal, internal_to_binary, ArrayAccessPolicy, BytecodeEditor, ClassHandle,
    ClassfileEditor, MemberRef,
};
use hotwire_proto::{
    AccessorKind, CompiledUnit, Failure, HotSwapClassResult, HotSwapStatus,
    InstrumentationDirective, SourceUnit,
};

use crate::compiler::{CompileError, Compiler};
use crate::runtime::{ClassDefinition, ClassShape, ManagedRuntime, RuntimeError};

#[derive(Debug, thiserror::Error)]
pub enum RedefineError {
    #[error("class {0} is not loaded")]
    NotLoaded(String),

    #[error("{class_name}: {reason}")]
    TypeMismatch { class_name: String, reason: String },

    /// The runtime refused the new definition; the old one is still in effect.
    #[error("redefinition rejected: {0}")]
    IncompatibleChange(String),

    #[error("{class_name}: invalid class file")]
    InvalidClassFile {
        class_name: String,
        #[source]
        source: hotwire_classfile::Error,
    },

    #[error("{class_name}: instrumentation failed")]
    Instrumentation {
        class_name: String,
        #[source]
        source: hotwire_classfile::Error,
    },

    #[error("{0} appears more than once in the batch")]
    DuplicateClass(String),

    #[error("runtime does not support class redefinition")]
    Unsupported,

    /// Not applied because another class of the same batch was rejected.
    #[error("{class_name} was not applied: {cause} was rejected")]
    BatchAborted { class_name: String, cause: String },

    #[error("failed to define {class_name}")]
    DefineFailed {
        class_name: String,
        #[source]
        source: RuntimeError,
    },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl RedefineError {
    pub fn kind(&self) -> &'static str {
        match self {
            RedefineError::NotLoaded(_) => "NotLoaded",
            RedefineError::TypeMismatch { .. } => "TypeMismatch",
            RedefineError::IncompatibleChange(_) => "IncompatibleChange",
            RedefineError::InvalidClassFile { .. } => "InvalidClassFile",
            RedefineError::Instrumentation { .. } => "Instrumentation",
            RedefineError::DuplicateClass(_) => "DuplicateClass",
            RedefineError::Unsupported => "Unsupported",
            RedefineError::BatchAborted { .. } => "BatchAborted",
            RedefineError::DefineFailed { .. } => "DefineFailed",
            RedefineError::Runtime(_) => "Runtime",
        }
    }

    pub fn to_failure(&self) -> Failure {
        Failure::from_error(self.kind(), self)
    }
}

/// One class of a [`RedefinitionAuthority::redefine_batch`] call.
#[derive(Debug, Clone)]
pub struct Redefinition {
    pub class_name: String,
    pub unit: CompiledUnit,
    pub directives: Vec<InstrumentationDirective>,
}

/// A definition that passed every check and is ready for the runtime.
struct Prepared {
    definition: ClassDefinition,
    directives: Vec<InstrumentationDirective>,
}

pub struct RedefinitionAuthority {
    runtime: Arc<dyn ManagedRuntime>,
    compiler: Arc<dyn Compiler>,
    editor: Arc<dyn BytecodeEditor + Send + Sync>,
    /// Directives applied to each class so far; re-applied on every later
    /// redefinition so earlier call sites keep working.
    instrumentation: HashMap<String, Vec<InstrumentationDirective>>,
}

impl RedefinitionAuthority {
    pub fn new(runtime: Arc<dyn ManagedRuntime>, compiler: Arc<dyn Compiler>) -> Self {
        Self::with_editor(runtime, compiler, Arc::new(ClassfileEditor))
    }

    pub fn with_editor(
        runtime: Arc<dyn ManagedRuntime>,
        compiler: Arc<dyn Compiler>,
        editor: Arc<dyn BytecodeEditor + Send + Sync>,
    ) -> Self {
        Self {
            runtime,
            compiler,
            editor,
            instrumentation: HashMap::new(),
        }
    }

    pub fn runtime(&self) -> &dyn ManagedRuntime {
        self.runtime.as_ref()
    }

    /// Directives recorded for `class_name` by earlier successful redefinitions.
    pub fn instrumentation(&self, class_name: &str) -> &[InstrumentationDirective] {
        self.instrumentation
            .get(class_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Compile against the runtime's current classpath.
    pub fn compile(&self, units: &[SourceUnit]) -> Result<Vec<CompiledUnit>, CompileError> {
        let classpath = self
            .runtime
            .classpath()
            .map_err(|err| CompileError::ClasspathUnavailable(err.to_string()))?;
        self.compiler.compile(units, &classpath)
    }

    pub fn redefine(
        &mut self,
        class_name: &str,
        unit: &CompiledUnit,
        directives: &[InstrumentationDirective],
    ) -> Result<(), RedefineError> {
        self.redefine_batch(&[Redefinition {
            class_name: class_name.to_string(),
            unit: unit.clone(),
            directives: directives.to_vec(),
        }])
    }

    /// Redefine several classes with one native call. Every class is checked
    /// first; if any check or the native call fails, nothing changes.
    pub fn redefine_batch(&mut self, batch: &[Redefinition]) -> Result<(), RedefineError> {
        let mut seen = BTreeSet::new();
        for item in batch {
            if !seen.insert(item.class_name.as_str()) {
                return Err(RedefineError::DuplicateClass(item.class_name.clone()));
            }
        }

        let prepared = batch
            .iter()
            .map(|item| self.prepare(&item.class_name, &item.unit, &item.directives))
            .collect::<Result<Vec<_>, _>>()?;
        self.commit(prepared)
    }

    /// Compile `units`, redefine the resulting classes that are already loaded
    /// and define the ones that are not (nested and helper classes).
    ///
    /// The compiled classes form one batch. Every loaded class is checked
    /// before anything is defined; a rejected class, or a helper that cannot be
    /// defined, leaves every loaded class on its old definition. Only a compile
    /// failure fails the call as a whole; everything after is reported per class.
    pub fn hot_swap(
        &mut self,
        units: &[SourceUnit],
    ) -> Result<Vec<HotSwapClassResult>, CompileError> {
        let compiled = self.compile(units)?;

        let mut prepared = Vec::new();
        let mut fresh = Vec::new();
        let mut rejected = Vec::new();
        for unit in &compiled {
            let checked = match self.runtime.loaded_class(&unit.class_name) {
                Ok(Some(_)) => self
                    .prepare(&unit.class_name, unit, &[])
                    .map(|p| prepared.push(p)),
                Ok(None) => {
                    fresh.push(unit);
                    Ok(())
                }
                Err(err) => Err(RedefineError::Runtime(err)),
            };
            if let Err(err) = checked {
                rejected.push(failed(&unit.class_name, &err));
            }
        }

        let mut results = Vec::with_capacity(compiled.len());
        if !rejected.is_empty() {
            results.append(&mut rejected);
            abort_rest(&mut results, &compiled);
            return Ok(results);
        }

        // New helpers first: redefined code may refer to them.
        for unit in fresh {
            let definition = ClassDefinition {
                class_name: unit.class_name.clone(),
                bytecode: unit.bytecode.clone(),
            };
            if let Err(source) = self.runtime.define_class(&definition) {
                let err = RedefineError::DefineFailed {
                    class_name: unit.class_name.clone(),
                    source,
                };
                // Helpers defined so far stay defined; nothing refers to them yet.
                results.push(failed(&unit.class_name, &err));
                abort_rest(&mut results, &compiled);
                return Ok(results);
            }
            results.push(HotSwapClassResult {
                class_name: unit.class_name.clone(),
                status: HotSwapStatus::Defined,
            });
        }

        if !prepared.is_empty() {
            let names: Vec<String> = prepared
                .iter()
                .map(|p| p.definition.class_name.clone())
                .collect();
            let status = match self.commit(prepared) {
                Ok(()) => HotSwapStatus::Redefined,
                Err(err) => HotSwapStatus::Failed(err.to_failure()),
            };
            results.extend(names.into_iter().map(|class_name| HotSwapClassResult {
                class_name,
                status: status.clone(),
            }));
        }

        results.sort_by(|a, b| a.class_name.cmp(&b.class_name));
        Ok(results)
    }

    fn commit(&mut self, prepared: Vec<Prepared>) -> Result<(), RedefineError> {
        if prepared.is_empty() {
            return Ok(());
        }
        let definitions: Vec<ClassDefinition> =
            prepared.iter().map(|p| p.definition.clone()).collect();
        self.runtime
            .redefine_classes(&definitions)
            .map_err(|err| match err {
                RuntimeError::Rejected(reason) => RedefineError::IncompatibleChange(reason),
                RuntimeError::ClassNotLoaded(name) => RedefineError::NotLoaded(name),
                other => RedefineError::IncompatibleChange(other.to_string()),
            })?;

        for p in prepared {
            tracing::info!(
                target: "hotwire.redefine",
                class = %p.definition.class_name,
                bytes = p.definition.bytecode.len(),
                directives = p.directives.len(),
                "redefined class"
            );
            if p.directives.is_empty() {
                self.instrumentation.remove(&p.definition.class_name);
            } else {
                self.instrumentation
                    .insert(p.definition.class_name, p.directives);
            }
        }
        Ok(())
    }

    /// Check `unit` against the loaded class and apply instrumentation.
    fn prepare(
        &self,
        class_name: &str,
        unit: &CompiledUnit,
        directives: &[InstrumentationDirective],
    ) -> Result<Prepared, RedefineError> {
        let capabilities = self.runtime.capabilities();
        if !capabilities.can_redefine {
            return Err(RedefineError::Unsupported);
        }

        let invalid = |source| RedefineError::InvalidClassFile {
            class_name: class_name.to_string(),
            source,
        };
        let mut handle = self.editor.load_definition(&unit.bytecode).map_err(invalid)?;
        let declared = internal_to_binary(handle.class_name().map_err(invalid)?);
        if declared != class_name {
            return Err(RedefineError::TypeMismatch {
                class_name: class_name.to_string(),
                reason: format!("unit declares {declared}"),
            });
        }

        let loaded = self
            .runtime
            .loaded_class(class_name)?
            .ok_or_else(|| RedefineError::NotLoaded(class_name.to_string()))?;

        if !capabilities.can_change_schema {
            if let Some(reason) = check_schema(&handle, &loaded).map_err(invalid)? {
                return Err(RedefineError::TypeMismatch {
                    class_name: class_name.to_string(),
                    reason,
                });
            }
        }

        let mut merged = self.instrumentation(class_name).to_vec();
        for directive in directives {
            if !merged.contains(directive) {
                merged.push(directive.clone());
            }
        }
        for directive in &merged {
            self.apply(&mut handle, directive)
                .map_err(|source| RedefineError::Instrumentation {
                    class_name: class_name.to_string(),
                    source,
                })?;
        }

        if !capabilities.can_add_methods {
            let methods = signature_set(handle.class_file().method_signatures().map_err(invalid)?);
            let loaded_methods = signature_set(
                loaded
                    .methods
                    .iter()
                    .map(|m| (m.name.clone(), m.descriptor.clone())),
            );
            if methods != loaded_methods {
                return Err(RedefineError::TypeMismatch {
                    class_name: class_name.to_string(),
                    reason: describe_difference("methods", &methods, &loaded_methods),
                });
            }
        }

        let bytecode = self.editor.to_bytes(&handle).map_err(invalid)?;
        Ok(Prepared {
            definition: ClassDefinition {
                class_name: class_name.to_string(),
                bytecode,
            },
            directives: merged,
        })
    }

    fn apply(
        &self,
        handle: &mut ClassHandle,
        directive: &InstrumentationDirective,
    ) -> hotwire_classfile::Result<()> {
        match directive {
            InstrumentationDirective::AddAccessor {
                kind,
                name,
                descriptor,
            } => {
                let name = name.clone();
                let descriptor = descriptor.clone();
                let member = match kind {
                    AccessorKind::FieldRead => MemberRef::FieldRead { name, descriptor },
                    AccessorKind::FieldWrite => MemberRef::FieldWrite { name, descriptor },
                    AccessorKind::MethodCall => MemberRef::MethodCall { name, descriptor },
                };
                self.editor.add_accessor(handle, &member)?;
            }
            InstrumentationDirective::RewriteArrayAccess {
                owner,
                reads,
                writes,
            } => {
                let policy = ArrayAccessPolicy {
                    owner: binary_to_internal(owner),
                    reads: *reads,
                    writes: *writes,
                };
                let rewritten = self.editor.rewrite_array_access(handle, &policy)?;
                tracing::debug!(target: "hotwire.redefine", owner = %owner, rewritten, "rewrote array access");
            }
        }
        Ok(())
    }
}

fn failed(class_name: &str, err: &RedefineError) -> HotSwapClassResult {
    HotSwapClassResult {
        class_name: class_name.to_string(),
        status: HotSwapStatus::Failed(err.to_failure()),
    }
}

/// Mark every class of `compiled` without a result yet as aborted because of
/// the failures already in `results`, then sort by class name.
fn abort_rest(results: &mut Vec<HotSwapClassResult>, compiled: &[CompiledUnit]) {
    let cause = results
        .iter()
        .filter(|r| matches!(r.status, HotSwapStatus::Failed(_)))
        .map(|r| r.class_name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    tracing::warn!(target: "hotwire.redefine", rejected = %cause, "hot swap aborted");
    let pending: Vec<HotSwapClassResult> = compiled
        .iter()
        .filter(|unit| !results.iter().any(|r| r.class_name == unit.class_name))
        .map(|unit| {
            let err = RedefineError::BatchAborted {
                class_name: unit.class_name.clone(),
                cause: cause.clone(),
            };
            failed(&unit.class_name, &err)
        })
        .collect();
    results.extend(pending);
    results.sort_by(|a, b| a.class_name.cmp(&b.class_name));
}

fn signature_set(items: impl IntoIterator<Item = (String, String)>) -> BTreeSet<(String, String)> {
    items.into_iter().collect()
}

fn describe_difference(
    what: &str,
    new: &BTreeSet<(String, String)>,
    loaded: &BTreeSet<(String, String)>,
) -> String {
    let render = |set: Vec<&(String, String)>| {
        set.iter()
            .map(|(name, desc)| format!("{name}:{desc}"))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let added: Vec<_> = new.difference(loaded).collect();
    let removed: Vec<_> = loaded.difference(new).collect();
    let mut parts = Vec::new();
    if !added.is_empty() {
        parts.push(format!("added {what} [{}]", render(added)));
    }
    if !removed.is_empty() {
        parts.push(format!("removed {what} [{}]", render(removed)));
    }
    parts.join("; ")
}

/// `Ok(Some(reason))` when the hierarchy or the field set differs.
fn check_schema(
    handle: &ClassHandle,
    loaded: &ClassShape,
) -> hotwire_classfile::Result<Option<String>> {
    let class = handle.class_file();

    let super_class = class.super_class_name()?.map(internal_to_binary);
    if super_class != loaded.super_class {
        return Ok(Some(format!(
            "super class changed from {} to {}",
            loaded.super_class.as_deref().unwrap_or("<none>"),
            super_class.as_deref().unwrap_or("<none>"),
        )));
    }

    let interfaces: Vec<String> = class
        .interface_names()?
        .into_iter()
        .map(internal_to_binary)
        .collect();
    if interfaces != loaded.interfaces {
        return Ok(Some(format!(
            "interfaces changed from [{}] to [{}]",
            loaded.interfaces.join(", "),
            interfaces.join(", "),
        )));
    }

    let fields = signature_set(class.field_signatures()?);
    let loaded_fields = signature_set(
        loaded
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.descriptor.clone())),
    );
    if fields != loaded_fields {
        return Ok(Some(describe_difference("fields", &fields, &loaded_fields)));
    }
    Ok(None)
}
