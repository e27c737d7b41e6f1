use std::collections::HashSet;
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};

use hotwire_config::CompilerConfig;
use hotwire_proto::{CompiledUnit, Severity, SourceUnit};

use super::command::{JavacLauncher, ProcessLauncher};
use super::diagnostics::parse_javac_output;
use super::{CompileError, Compiler};
use crate::runtime::ClasspathView;

const MAX_MESSAGE_BYTES: usize = 8 * 1024;

/// Compiles batches with an external `javac`.
///
/// Each batch gets a scratch directory holding a `src/` tree (also passed as
/// `-sourcepath`, so units of the batch see each other) and an `out/` tree the
/// class files are collected from.
#[derive(Debug)]
pub struct JavacCompiler<L = ProcessLauncher> {
    config: CompilerConfig,
    launcher: L,
}

impl JavacCompiler<ProcessLauncher> {
    pub fn from_config(config: &CompilerConfig) -> Self {
        Self::with_launcher(
            config.clone(),
            ProcessLauncher {
                timeout: Some(config.timeout()),
            },
        )
    }
}

impl<L: JavacLauncher> JavacCompiler<L> {
    pub fn with_launcher(config: CompilerConfig, launcher: L) -> Self {
        Self { config, launcher }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    fn args(
        &self,
        classpath: &ClasspathView,
        src_dir: &Path,
        out_dir: &Path,
        sources: &[PathBuf],
    ) -> Result<Vec<OsString>, CompileError> {
        let mut args: Vec<OsString> = Vec::new();

        // Visible to javac itself, never to the code it compiles.
        if !self.config.implementation_classpath.is_empty() {
            let joined = std::env::join_paths(&self.config.implementation_classpath)
                .map_err(|err| CompileError::ClasspathUnavailable(err.to_string()))?;
            let mut arg = OsString::from("-J-Xbootclasspath/a:");
            arg.push(joined);
            args.push(arg);
        }

        args.extend(["-g", "-encoding", "UTF-8", "-proc:none"].map(OsString::from));
        args.push("-d".into());
        args.push(out_dir.into());
        args.push("-sourcepath".into());
        args.push(src_dir.into());

        // Always explicit, so `CLASSPATH` from the environment never leaks in.
        let mut entries = classpath.paths();
        for extra in &self.config.extra_classpath {
            if !entries.contains(extra) {
                entries.push(extra.clone());
            }
        }
        if entries.is_empty() {
            entries.push(src_dir.to_path_buf());
        }
        let joined = std::env::join_paths(&entries)
            .map_err(|err| CompileError::ClasspathUnavailable(err.to_string()))?;
        args.push("-classpath".into());
        args.push(joined);

        if let Some(release) = self.config.release.as_deref() {
            args.push("--release".into());
            args.push(release.into());
        } else {
            if let Some(source) = self.config.source.as_deref() {
                args.push("--source".into());
                args.push(source.into());
            }
            if let Some(target) = self.config.target.as_deref() {
                args.push("--target".into());
                args.push(target.into());
            }
        }
        if self.config.enable_preview {
            args.push("--enable-preview".into());
        }

        args.extend(sources.iter().map(OsString::from));
        Ok(args)
    }
}

impl<L: JavacLauncher> Compiler for JavacCompiler<L> {
    fn compile(
        &self,
        units: &[SourceUnit],
        classpath: &ClasspathView,
    ) -> Result<Vec<CompiledUnit>, CompileError> {
        if units.is_empty() {
            return Err(CompileError::EmptyBatch);
        }
        let mut seen = HashSet::new();
        for unit in units {
            validate_class_name(&unit.class_name)?;
            if !seen.insert(unit.class_name.as_str()) {
                return Err(CompileError::InvalidUnit {
                    class_name: unit.class_name.clone(),
                    reason: "submitted more than once in the same batch".into(),
                });
            }
        }

        let scratch = tempfile::Builder::new()
            .prefix("hotwire-javac-")
            .tempdir()
            .map_err(|err| toolchain("failed to create scratch directory", err))?;
        let src_dir = scratch.path().join("src");
        let out_dir = scratch.path().join("out");
        std::fs::create_dir_all(&out_dir)
            .map_err(|err| toolchain("failed to create output directory", err))?;

        let mut sources = Vec::with_capacity(units.len());
        let mut relative = Vec::with_capacity(units.len());
        for unit in units {
            let rel = source_path(&unit.class_name);
            let path = src_dir.join(&rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| toolchain("failed to write sources", err))?;
            }
            std::fs::write(&path, &unit.source)
                .map_err(|err| toolchain("failed to write sources", err))?;
            sources.push(path);
            relative.push((rel, unit.class_name.clone()));
        }

        let args = self.args(classpath, &src_dir, &out_dir, &sources)?;
        let output = self
            .launcher
            .launch(&self.config.javac, scratch.path(), &args)
            .map_err(|err| match err.kind() {
                io::ErrorKind::TimedOut => CompileError::Toolchain(truncate(err.to_string())),
                _ => toolchain("failed to run javac", err),
            })?;

        let diagnostics = parse_javac_output(&output.log, |file| {
            relative
                .iter()
                .find(|(rel, _)| Path::new(file).ends_with(rel))
                .map(|(_, name)| name.clone())
        });

        if !output.status.success() {
            if diagnostics.is_empty() {
                let text = output.log.trim();
                return Err(CompileError::Toolchain(truncate(if text.is_empty() {
                    format!("javac exited with {}", output.status)
                } else {
                    text.to_string()
                })));
            }
            return Err(CompileError::Syntax(diagnostics));
        }

        for diag in diagnostics.iter().filter(|d| d.severity != Severity::Error) {
            tracing::debug!(target: "hotwire.compiler", diagnostic = %diag, "javac");
        }

        let mut compiled = Vec::new();
        for class_file in collect_class_files(&out_dir)
            .map_err(|err| toolchain("failed to read compiled classes", err))?
        {
            let Some(class_name) = class_name_from_class_file(&out_dir, &class_file) else {
                continue;
            };
            let bytecode = std::fs::read(&class_file)
                .map_err(|err| toolchain("failed to read compiled classes", err))?;
            compiled.push(CompiledUnit {
                class_name,
                bytecode,
            });
        }
        if compiled.is_empty() {
            return Err(CompileError::Toolchain("javac produced no class files".into()));
        }
        compiled.sort_by(|a, b| a.class_name.cmp(&b.class_name));

        for unit in units {
            if !compiled.iter().any(|c| c.class_name == unit.class_name) {
                return Err(CompileError::InvalidUnit {
                    class_name: unit.class_name.clone(),
                    reason: "the source does not declare this class".into(),
                });
            }
        }

        tracing::debug!(
            target: "hotwire.compiler",
            units = units.len(),
            classes = compiled.len(),
            "compiled batch"
        );
        Ok(compiled)
    }
}

fn toolchain(context: &str, err: io::Error) -> CompileError {
    CompileError::Toolchain(format!("{context}: {err}"))
}

fn truncate(mut message: String) -> String {
    if message.len() <= MAX_MESSAGE_BYTES {
        return message;
    }
    let mut end = MAX_MESSAGE_BYTES;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message.truncate(end);
    message.push_str("\n<output truncated>");
    message
}

fn validate_class_name(name: &str) -> Result<(), CompileError> {
    let invalid = |reason: &str| CompileError::InvalidUnit {
        class_name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("class name is empty"));
    }
    for segment in name.split('.') {
        let mut chars = segment.chars();
        let Some(first) = chars.next() else {
            return Err(invalid("class name has an empty segment"));
        };
        let is_part = |c: char| c.is_alphanumeric() || c == '_' || c == '$';
        if !(first.is_alphabetic() || first == '_' || first == '$') || !chars.all(is_part) {
            return Err(invalid("not a valid binary class name"));
        }
    }
    Ok(())
}

/// `com.example.Greeter` -> `com/example/Greeter.java`.
fn source_path(class_name: &str) -> PathBuf {
    let mut path: PathBuf = class_name.split('.').collect();
    path.set_extension("java");
    path
}

fn collect_class_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    collect_class_files_inner(dir, &mut out)?;
    Ok(out)
}

fn collect_class_files_inner(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_class_files_inner(&path, out)?;
        } else if path.extension().and_then(|s| s.to_str()) == Some("class") {
            out.push(path);
        }
    }
    Ok(())
}

fn class_name_from_class_file(output_dir: &Path, class_file: &Path) -> Option<String> {
    let rel = class_file.strip_prefix(output_dir).ok()?;
    let mut components: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(os) => Some(os.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    let last = components.pop()?;
    components.push(last.strip_suffix(".class").unwrap_or(&last).to_string());
    Some(components.join("."))
}
