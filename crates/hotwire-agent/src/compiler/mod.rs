//! Dynamic compilation of submitted source against the running process.

mod command;
mod diagnostics;
mod javac;

pub use command::{JavacLauncher, JavacOutput, ProcessLauncher};
pub use diagnostics::parse_javac_output;
pub use javac::JavacCompiler;

use hotwire_proto::{CompiledUnit, Diagnostic, Failure, Severity, SourceUnit};

use crate::runtime::ClasspathView;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// Never empty.
    #[error("{}", syntax_summary(.0))]
    Syntax(Vec<Diagnostic>),

    #[error("classpath unavailable: {0}")]
    ClasspathUnavailable(String),

    #[error("no source units to compile")]
    EmptyBatch,

    #[error("invalid source unit `{class_name}`: {reason}")]
    InvalidUnit { class_name: String, reason: String },

    /// The compiler could not be run, timed out, or produced nothing usable.
    #[error("compiler failed: {0}")]
    Toolchain(String),
}

fn syntax_summary(diagnostics: &[Diagnostic]) -> String {
    let errors = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count();
    match diagnostics
        .iter()
        .find(|d| d.severity == Severity::Error)
        .or_else(|| diagnostics.first())
    {
        Some(first) if errors > 1 => format!("compilation failed with {errors} errors; first: {first}"),
        Some(first) => format!("compilation failed: {first}"),
        None => "compilation failed".to_string(),
    }
}

impl CompileError {
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::Syntax(_) => "Syntax",
            CompileError::ClasspathUnavailable(_) => "ClasspathUnavailable",
            CompileError::EmptyBatch => "EmptyBatch",
            CompileError::InvalidUnit { .. } => "InvalidUnit",
            CompileError::Toolchain(_) => "Toolchain",
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CompileError::Syntax(diagnostics) => diagnostics,
            _ => &[],
        }
    }

    pub fn to_failure(&self) -> Failure {
        Failure::from_error(self.kind(), self)
    }
}

/// Turns a batch of source units into class files.
///
/// A batch compiles as a whole: either every unit (plus any nested or helper
/// classes it declares) comes back, or the call fails.
pub trait Compiler: Send + Sync {
    fn compile(
        &self,
        units: &[SourceUnit],
        classpath: &ClasspathView,
    ) -> Result<Vec<CompiledUnit>, CompileError>;
}
