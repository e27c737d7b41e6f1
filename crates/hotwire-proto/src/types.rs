use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque key a controller chooses to address a cached invocation result.
pub type Offset = String;

/// Java source for one class.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceUnit {
    /// Fully-qualified binary name, e.g. `com.example.Greeter`.
    pub class_name: String,
    pub source: String,
}

/// Class-file bytes for one class.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompiledUnit {
    pub class_name: String,
    pub bytecode: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

/// One compiler message, positioned in a submitted unit when possible.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    /// Binary name of the unit the message belongs to; empty for global messages.
    pub unit: String,
    /// 1-based.
    pub line: Option<u32>,
    /// 1-based.
    pub column: Option<u32>,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        };
        match (self.line, self.column) {
            (Some(line), Some(column)) => {
                write!(f, "{}:{line}:{column}: {severity}: {}", self.unit, self.message)
            }
            (Some(line), None) => write!(f, "{}:{line}: {severity}: {}", self.unit, self.message),
            _ if self.unit.is_empty() => write!(f, "{severity}: {}", self.message),
            _ => write!(f, "{}: {severity}: {}", self.unit, self.message),
        }
    }
}

/// Which method to call, and with what.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub class_name: String,
    pub method: String,
    /// JVM method descriptor, e.g. `(ILjava/lang/String;)V`. Without it the
    /// method is chosen by name and argument count, which must be unambiguous.
    pub descriptor: Option<String>,
    /// One JSON text per parameter.
    pub args: Vec<String>,
}

/// Handle to an object living in the managed runtime.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub id: u64,
    pub class_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Null,
    Void,
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Object(ObjectRef),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Void => f.write_str("void"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Byte(v) => write!(f, "{v}"),
            Value::Char(v) => match char::from_u32(*v as u32) {
                Some(c) => write!(f, "{c}"),
                None => write!(f, "\\u{v:04x}"),
            },
            Value::Short(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
            Value::Object(obj) => write!(f, "{}@{:x}", obj.class_name, obj.id),
        }
    }
}

/// Structured description of something that went wrong, with its cause chain.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Failure {
    /// Short machine-readable category (an error variant or a thrown exception class).
    pub kind: String,
    pub message: String,
    pub stack: Vec<String>,
    pub cause: Option<Box<Failure>>,
}

impl Failure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            stack: Vec::new(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: Failure) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Build a failure from `err`, turning its `source()` chain into causes.
    pub fn from_error(kind: impl Into<String>, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut next = err.source();
        while let Some(source) = next {
            causes.push(Failure::new("cause", source.to_string()));
            next = source.source();
        }
        let mut chain: Option<Box<Failure>> = None;
        for mut cause in causes.into_iter().rev() {
            cause.cause = chain.take();
            chain = Some(Box::new(cause));
        }
        Self {
            kind: kind.into(),
            message: err.to_string(),
            stack: Vec::new(),
            cause: chain,
        }
    }

    /// Iterate over this failure and every cause below it.
    pub fn chain(&self) -> impl Iterator<Item = &Failure> {
        std::iter::successors(Some(self), |f| f.cause.as_deref())
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        for cause in self.chain().skip(1) {
            write!(f, "; caused by {}: {}", cause.kind, cause.message)?;
        }
        Ok(())
    }
}

/// Outcome of one dispatched invocation, as cached and reported.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum InvocationResult {
    Returned { value: Value, rendered: String },
    Failed(Failure),
}

impl InvocationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationResult::Returned { .. })
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessorKind {
    FieldRead,
    FieldWrite,
    MethodCall,
}

/// Bytecode edits applied to a class on redefinition and re-applied on every
/// later redefinition of the same class.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum InstrumentationDirective {
    AddAccessor {
        kind: AccessorKind,
        name: String,
        descriptor: Option<String>,
    },
    RewriteArrayAccess {
        /// Binary name of the class declaring the replacement methods.
        owner: String,
        reads: bool,
        writes: bool,
    },
}
