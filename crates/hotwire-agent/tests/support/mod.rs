//! Test doubles shared by the agent suite.
//!
//! [`FakeRuntime`] keeps class definitions as real class-file bytes and
//! derives method behavior from the bytecode, so a redefinition is observable
//! through the next invocation exactly like on a real JVM.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hotwire_agent::compiler::{JavacLauncher, JavacOutput};
use hotwire_agent::{
    Capabilities, ClassDefinition, ClassShape, ClasspathView, ContainerError, ContainerInstance,
    ContainerLookup, ManagedRuntime, MemberInfo, RuntimeError,
};
use hotwire_classfile::{
    access, binary_to_internal, internal_to_binary, ClassFile, Code, Constant, ConstantPool,
    Member,
};
use hotwire_proto::{Failure, ObjectRef, Value};
use parking_lot::Mutex;

/// What a generated method does when invoked.
#[derive(Debug, Clone)]
pub enum Body {
    Returns(String),
    ReturnsInt(i32),
    Throws { exception: String, message: String },
    Void,
}

/// Builds loadable class-file bytes for tests.
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    name: String,
    access_flags: u16,
    super_class: String,
    interfaces: Vec<String>,
    fields: Vec<(u16, String, String)>,
    methods: Vec<(u16, String, String, Body)>,
}

impl ClassBuilder {
    /// A public class with a public no-arg constructor.
    pub fn new(binary_name: &str) -> Self {
        Self {
            name: binary_name.to_string(),
            access_flags: access::PUBLIC | 0x0020,
            super_class: "java.lang.Object".into(),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: vec![(access::PUBLIC, "<init>".into(), "()V".into(), Body::Void)],
        }
    }

    pub fn access(mut self, flags: u16) -> Self {
        self.access_flags = flags;
        self
    }

    pub fn extends(mut self, binary_name: &str) -> Self {
        self.super_class = binary_name.to_string();
        self
    }

    pub fn implements(mut self, binary_name: &str) -> Self {
        self.interfaces.push(binary_name.to_string());
        self
    }

    pub fn field(mut self, flags: u16, name: &str, descriptor: &str) -> Self {
        self.fields.push((flags, name.into(), descriptor.into()));
        self
    }

    pub fn method(mut self, flags: u16, name: &str, descriptor: &str, body: Body) -> Self {
        self.methods.push((flags, name.into(), descriptor.into(), body));
        self
    }

    pub fn without_constructors(mut self) -> Self {
        self.methods.retain(|(_, name, _, _)| name != "<init>");
        self
    }

    /// Replace the default constructor.
    pub fn constructor(mut self, flags: u16, descriptor: &str) -> Self {
        self.methods.retain(|(_, name, _, _)| name != "<init>");
        self.methods
            .insert(0, (flags, "<init>".into(), descriptor.into(), Body::Void));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut constant_pool = ConstantPool::new();
        let this_class = constant_pool
            .add_class(&binary_to_internal(&self.name))
            .unwrap();
        let super_class = constant_pool
            .add_class(&binary_to_internal(&self.super_class))
            .unwrap();
        let interfaces = self
            .interfaces
            .iter()
            .map(|i| constant_pool.add_class(&binary_to_internal(i)).unwrap())
            .collect();
        let fields = self
            .fields
            .iter()
            .map(|(flags, name, desc)| Member {
                access_flags: *flags,
                name_index: constant_pool.add_utf8(name).unwrap(),
                descriptor_index: constant_pool.add_utf8(desc).unwrap(),
                attributes: Vec::new(),
            })
            .collect();
        let mut class = ClassFile {
            minor_version: 0,
            major_version: 52,
            constant_pool,
            access_flags: self.access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods: Vec::new(),
            attributes: Vec::new(),
        };
        for (flags, name, desc, body) in &self.methods {
            let code = compile_body(&mut class.constant_pool, *flags, desc, body);
            class.add_method(*flags, name, desc, &code).unwrap();
        }
        class.to_bytes().unwrap()
    }
}

const LDC: u8 = 0x12;
const NEW: u8 = 0xbb;
const DUP: u8 = 0x59;
const INVOKESPECIAL: u8 = 0xb7;
const ATHROW: u8 = 0xbf;
const IRETURN: u8 = 0xac;
const ARETURN: u8 = 0xb0;
const RETURN: u8 = 0xb1;

fn compile_body(pool: &mut ConstantPool, flags: u16, descriptor: &str, body: &Body) -> Code {
    let params = hotwire_classfile::parse_method_descriptor(descriptor)
        .unwrap()
        .param_slots();
    let max_locals = params + u16::from(flags & access::STATIC == 0);
    let byte = |index: u16| u8::try_from(index).unwrap();
    let (max_stack, code) = match body {
        Body::Returns(text) => (1, vec![LDC, byte(pool.add_string(text).unwrap()), ARETURN]),
        Body::ReturnsInt(value) => (1, vec![LDC, byte(pool.add_integer(*value).unwrap()), IRETURN]),
        Body::Throws { exception, message } => {
            let internal = binary_to_internal(exception);
            let class = pool.add_class(&internal).unwrap().to_be_bytes();
            let msg = byte(pool.add_string(message).unwrap());
            let init = pool
                .add_method_ref(&internal, "<init>", "(Ljava/lang/String;)V", false)
                .unwrap()
                .to_be_bytes();
            (
                3,
                vec![
                    NEW, class[0], class[1], DUP, LDC, msg, INVOKESPECIAL, init[0], init[1], ATHROW,
                ],
            )
        }
        Body::Void => (0, vec![RETURN]),
    };
    Code {
        max_stack,
        max_locals,
        code,
        exception_table: Vec::new(),
        attributes: Vec::new(),
    }
}

/// Interpret the tiny instruction subset [`compile_body`] emits.
fn run_body(class: &ClassFile, method: &MemberInfo) -> Result<Value, RuntimeError> {
    let other = |message: String| RuntimeError::Other(message);
    let index = class
        .find_method(&method.name, Some(&method.descriptor))
        .map_err(|err| other(err.to_string()))?
        .ok_or_else(|| other(format!("no method {}{}", method.name, method.descriptor)))?;
    let code = class
        .code(&class.methods[index])
        .map_err(|err| other(err.to_string()))?
        .ok_or_else(|| other(format!("{} has no code", method.name)))?;

    let pool = &class.constant_pool;
    let mut stack: Vec<Value> = Vec::new();
    let mut exception: Option<String> = None;
    let mut pc = 0;
    while pc < code.code.len() {
        match code.code[pc] {
            LDC => {
                let value = match pool.get(u16::from(code.code[pc + 1])) {
                    Ok(Constant::String { string_index }) => {
                        Value::String(pool.get_utf8(*string_index).unwrap().to_string())
                    }
                    Ok(Constant::Integer(v)) => Value::Int(*v),
                    other => return Err(RuntimeError::Other(format!("bad ldc {other:?}"))),
                };
                stack.push(value);
                pc += 2;
            }
            NEW => {
                let index = u16::from_be_bytes([code.code[pc + 1], code.code[pc + 2]]);
                exception = Some(internal_to_binary(pool.get_class_name(index).unwrap()));
                pc += 3;
            }
            DUP => pc += 1,
            INVOKESPECIAL => pc += 3,
            ATHROW => {
                let message = match stack.pop() {
                    Some(Value::String(message)) => message,
                    _ => String::new(),
                };
                let mut failure = Failure::new(exception.take().unwrap_or_default(), message);
                failure.stack = vec![format!("at {}.{}", class.class_name().unwrap(), method.name)];
                return Err(RuntimeError::Threw(failure));
            }
            IRETURN | ARETURN => return stack.pop().ok_or_else(|| other("empty stack".into())),
            RETURN => return Ok(Value::Void),
            op => return Err(other(format!("unsupported opcode {op:#x}"))),
        }
    }
    Err(other("fell off the end of the method".into()))
}

fn shape_of(bytes: &[u8]) -> ClassShape {
    let class = ClassFile::parse(bytes).unwrap();
    let members = |members: &[Member]| -> Vec<MemberInfo> {
        members
            .iter()
            .map(|m| {
                MemberInfo::new(
                    class.member_name(m).unwrap(),
                    class.member_descriptor(m).unwrap(),
                    m.access_flags,
                )
            })
            .collect()
    };
    ClassShape {
        name: internal_to_binary(class.class_name().unwrap()),
        access_flags: class.access_flags,
        super_class: class.super_class_name().unwrap().map(internal_to_binary),
        interfaces: class
            .interface_names()
            .unwrap()
            .into_iter()
            .map(internal_to_binary)
            .collect(),
        fields: members(&class.fields),
        methods: members(&class.methods),
        location: Some(PathBuf::from("/app/classes")),
    }
}

pub type Native =
    Arc<dyn Fn(&FakeRuntime, Option<&ObjectRef>, &[Value]) -> Result<Value, RuntimeError> + Send + Sync>;

#[derive(Default)]
struct State {
    classes: BTreeMap<String, Vec<u8>>,
    objects: Vec<ObjectRef>,
    next_id: u64,
    reject_next: Option<String>,
    heap_error: Option<String>,
}

/// In-memory stand-in for a JVM.
pub struct FakeRuntime {
    state: Mutex<State>,
    natives: Mutex<HashMap<(String, String), Native>>,
    capabilities: Mutex<Capabilities>,
    /// Pause between classes of one batch, so a reader racing the batch
    /// would see some classes old and some new.
    pub batch_delay: Mutex<Duration>,
    pub redefine_calls: AtomicUsize,
    pub constructed: AtomicUsize,
    pub invocations: AtomicUsize,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 0x100,
                ..State::default()
            }),
            natives: Mutex::new(HashMap::new()),
            capabilities: Mutex::new(Capabilities::default()),
            batch_delay: Mutex::new(Duration::ZERO),
            redefine_calls: AtomicUsize::new(0),
            constructed: AtomicUsize::new(0),
            invocations: AtomicUsize::new(0),
        }
    }
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_capabilities(&self, capabilities: Capabilities) {
        *self.capabilities.lock() = capabilities;
    }

    pub fn load(&self, bytes: Vec<u8>) {
        let name = shape_of(&bytes).name;
        self.state.lock().classes.insert(name, bytes);
    }

    pub fn definition(&self, class_name: &str) -> Option<Vec<u8>> {
        self.state.lock().classes.get(class_name).cloned()
    }

    /// Allocate an object without running a constructor.
    pub fn spawn(&self, class_name: &str) -> ObjectRef {
        let mut state = self.state.lock();
        state.next_id += 1;
        let object = ObjectRef {
            id: state.next_id,
            class_name: class_name.to_string(),
        };
        state.objects.push(object.clone());
        object
    }

    pub fn native(
        &self,
        class_name: &str,
        method: &str,
        f: impl Fn(&FakeRuntime, Option<&ObjectRef>, &[Value]) -> Result<Value, RuntimeError>
            + Send
            + Sync
            + 'static,
    ) {
        self.natives
            .lock()
            .insert((class_name.to_string(), method.to_string()), Arc::new(f));
    }

    pub fn reject_next_redefine(&self, reason: &str) {
        self.state.lock().reject_next = Some(reason.to_string());
    }

    pub fn fail_heap_scans(&self, reason: &str) {
        self.state.lock().heap_error = Some(reason.to_string());
    }

    /// Run the current definition of a no-arg static method.
    pub fn call_static(&self, class_name: &str, method: &str, descriptor: &str) -> Result<Value, RuntimeError> {
        let bytes = self
            .definition(class_name)
            .ok_or_else(|| RuntimeError::ClassNotLoaded(class_name.to_string()))?;
        let class = ClassFile::parse(&bytes).map_err(|err| RuntimeError::Other(err.to_string()))?;
        run_body(&class, &MemberInfo::new(method, descriptor, access::STATIC))
    }
}

impl ManagedRuntime for FakeRuntime {
    fn capabilities(&self) -> Capabilities {
        *self.capabilities.lock()
    }

    fn classpath(&self) -> Result<ClasspathView, RuntimeError> {
        Ok(ClasspathView {
            entries: vec!["/app/classes".into()],
            class_locations: Vec::new(),
        })
    }

    fn loaded_class(&self, class_name: &str) -> Result<Option<ClassShape>, RuntimeError> {
        Ok(self.definition(class_name).map(|bytes| shape_of(&bytes)))
    }

    fn redefine_classes(&self, definitions: &[ClassDefinition]) -> Result<(), RuntimeError> {
        self.redefine_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.state.lock();
            if let Some(reason) = state.reject_next.take() {
                return Err(RuntimeError::Rejected(reason));
            }
            if let Some(missing) = definitions
                .iter()
                .find(|d| !state.classes.contains_key(&d.class_name))
            {
                return Err(RuntimeError::ClassNotLoaded(missing.class_name.clone()));
            }
        }
        let delay = *self.batch_delay.lock();
        for (i, definition) in definitions.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                std::thread::sleep(delay);
            }
            self.state
                .lock()
                .classes
                .insert(definition.class_name.clone(), definition.bytecode.clone());
        }
        Ok(())
    }

    fn define_class(&self, definition: &ClassDefinition) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        if state.classes.contains_key(&definition.class_name) {
            return Err(RuntimeError::Other(format!(
                "duplicate class definition for {}",
                definition.class_name
            )));
        }
        state
            .classes
            .insert(definition.class_name.clone(), definition.bytecode.clone());
        Ok(())
    }

    fn instances_of(&self, class_name: &str) -> Result<Vec<ObjectRef>, RuntimeError> {
        let state = self.state.lock();
        if let Some(reason) = &state.heap_error {
            return Err(RuntimeError::Unsupported(reason.clone()));
        }
        Ok(state
            .objects
            .iter()
            .filter(|o| o.class_name == class_name)
            .cloned()
            .collect())
    }

    fn new_instance(
        &self,
        class_name: &str,
        constructor_descriptor: &str,
        _args: &[Value],
    ) -> Result<ObjectRef, RuntimeError> {
        let shape = self
            .loaded_class(class_name)?
            .ok_or_else(|| RuntimeError::ClassNotLoaded(class_name.to_string()))?;
        if !shape
            .constructors()
            .any(|c| c.descriptor == constructor_descriptor)
        {
            return Err(RuntimeError::Other(format!(
                "no constructor {constructor_descriptor}"
            )));
        }
        self.constructed.fetch_add(1, Ordering::SeqCst);
        Ok(self.spawn(class_name))
    }

    fn invoke_method(
        &self,
        receiver: Option<&ObjectRef>,
        class_name: &str,
        method: &MemberInfo,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let native = self
            .natives
            .lock()
            .get(&(class_name.to_string(), method.name.clone()))
            .cloned();
        if let Some(native) = native {
            return native(self, receiver, args);
        }
        let bytes = self
            .definition(class_name)
            .ok_or_else(|| RuntimeError::ClassNotLoaded(class_name.to_string()))?;
        let class = ClassFile::parse(&bytes).map_err(|err| RuntimeError::Other(err.to_string()))?;
        run_body(&class, method)
    }

    fn decode_object(&self, class_name: &str, json: &serde_json::Value) -> Result<Value, RuntimeError> {
        if !json.is_object() {
            return Err(RuntimeError::Other(format!(
                "cannot build {class_name} from {json}"
            )));
        }
        Ok(Value::Object(self.spawn(class_name)))
    }

    fn render(&self, value: &Value) -> Result<String, RuntimeError> {
        Ok(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Compile hook for [`ScriptedJavac`]: binary class name and source in,
/// `(binary name, bytes)` pairs out, or an error message reported at line 1.
pub type Script = Arc<dyn Fn(&str, &str) -> Result<Vec<(String, Vec<u8>)>, String> + Send + Sync>;

/// A `javac` stand-in that runs a closure per source file instead of a compiler.
pub struct ScriptedJavac {
    script: Script,
    pub runs: AtomicUsize,
}

impl ScriptedJavac {
    pub fn new(
        script: impl Fn(&str, &str) -> Result<Vec<(String, Vec<u8>)>, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Arc::new(script),
            runs: AtomicUsize::new(0),
        }
    }
}

impl fmt::Debug for ScriptedJavac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedJavac")
            .field("runs", &self.runs.load(Ordering::SeqCst))
            .finish()
    }
}

impl JavacLauncher for ScriptedJavac {
    fn launch(&self, _javac: &Path, _scratch: &Path, args: &[OsString]) -> io::Result<JavacOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        let value_of = |flag: &str| {
            let i = args.iter().position(|a| a == flag).unwrap();
            PathBuf::from(&args[i + 1])
        };
        let src = value_of("-sourcepath");
        let out = value_of("-d");

        let mut log = String::new();
        let mut errors = 0;
        let mut outputs = Vec::new();
        for file in args.iter().filter(|a| a.ends_with(".java")) {
            let rel = Path::new(file).strip_prefix(&src).unwrap().with_extension("");
            let class_name = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(".");
            let source = std::fs::read_to_string(file)?;
            match (self.script)(&class_name, &source) {
                Ok(classes) => outputs.extend(classes),
                Err(message) => {
                    errors += 1;
                    let first_line = source.lines().next().unwrap_or_default();
                    log.push_str(&format!("{file}:1: error: {message}\n{first_line}\n^\n"));
                }
            }
        }
        if errors > 0 {
            log.push_str(&format!("{errors} error{}\n", if errors == 1 { "" } else { "s" }));
            return Ok(JavacOutput {
                status: exit_status(1),
                log,
            });
        }

        for (class_name, bytes) in outputs {
            let mut path: PathBuf = out.join(binary_to_internal(&class_name));
            path.set_extension("class");
            std::fs::create_dir_all(path.parent().unwrap())?;
            std::fs::write(path, bytes)?;
        }
        Ok(JavacOutput {
            status: exit_status(0),
            log: String::new(),
        })
    }
}

#[cfg(unix)]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    ExitStatus::from_raw(code << 8)
}

#[cfg(windows)]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;
    ExitStatus::from_raw(code as u32)
}

/// Container lookup serving a fixed set of instances (or a fixed error).
pub struct FakeContainer {
    pub name: String,
    pub instances: HashMap<String, Vec<ContainerInstance>>,
    pub error: Option<String>,
}

impl FakeContainer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            instances: HashMap::new(),
            error: None,
        }
    }

    pub fn with(mut self, class_name: &str, instance: ContainerInstance) -> Self {
        self.instances
            .entry(class_name.to_string())
            .or_default()
            .push(instance);
        self
    }

    pub fn failing(mut self, reason: &str) -> Self {
        self.error = Some(reason.to_string());
        self
    }
}

impl ContainerLookup for FakeContainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, class_name: &str) -> Result<Vec<ContainerInstance>, ContainerError> {
        if let Some(reason) = &self.error {
            return Err(ContainerError::Lookup {
                class_name: class_name.to_string(),
                message: reason.clone(),
            });
        }
        Ok(self.instances.get(class_name).cloned().unwrap_or_default())
    }
}

pub const GREETER: &str = "com.example.Greeter";

/// `com.example.Greeter` whose public `greet()` returns `greeting`.
pub fn greeter(greeting: &str) -> ClassBuilder {
    ClassBuilder::new(GREETER).method(
        access::PUBLIC,
        "greet",
        "()Ljava/lang/String;",
        Body::Returns(greeting.to_string()),
    )
}

pub fn greeter_source(greeting: &str) -> String {
    format!(
        "package com.example;\n\npublic class Greeter {{\n    public String greet() {{\n        return \"{greeting}\";\n    }}\n}}\n"
    )
}

/// Compiles sources shaped like [`greeter_source`]: the first string literal
/// after `return` becomes the greeting. A missing `;` is a syntax error.
pub fn greeter_script(class_name: &str, source: &str) -> Result<Vec<(String, Vec<u8>)>, String> {
    let start = source
        .find("return \"")
        .ok_or_else(|| "illegal start of expression".to_string())?
        + "return \"".len();
    let len = source[start..]
        .find('"')
        .ok_or_else(|| "unclosed string literal".to_string())?;
    if !source[start + len + 1..].trim_start().starts_with(';') {
        return Err("';' expected".into());
    }
    let greeting = &source[start..start + len];
    let bytes = ClassBuilder::new(class_name)
        .method(
            access::PUBLIC,
            "greet",
            "()Ljava/lang/String;",
            Body::Returns(greeting.to_string()),
        )
        .build();
    Ok(vec![(class_name.to_string(), bytes)])
}
