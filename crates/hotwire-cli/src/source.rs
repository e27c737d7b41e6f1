//! Turning files on disk into protocol units.

use std::path::Path;

use anyhow::{Context, Result};
use hotwire_classfile::{internal_to_binary, ClassFile};
use hotwire_proto::SourceUnit;

/// Read a Java source file; the class name comes from `explicit`, else from the
/// file's `package` and first top-level type declaration, else its file stem.
pub fn source_unit(path: &Path, explicit: Option<&str>) -> Result<SourceUnit> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let class_name = match explicit {
        Some(name) => name.to_string(),
        None => infer_class_name(&source)
            .or_else(|| {
                let stem = path.file_stem()?.to_str()?;
                Some(qualify(package_name(&source).as_deref(), stem))
            })
            .with_context(|| format!("cannot tell which class {} declares", path.display()))?,
    };
    Ok(SourceUnit { class_name, source })
}

/// Binary name declared by a class file.
pub fn class_file_name(bytes: &[u8]) -> Result<String> {
    let class = ClassFile::parse(bytes).context("not a valid class file")?;
    Ok(internal_to_binary(class.class_name()?))
}

pub fn infer_class_name(source: &str) -> Option<String> {
    let tokens = tokens(source);
    let mut depth = 0usize;
    let mut iter = tokens.iter().peekable();
    while let Some(token) = iter.next() {
        match token.as_str() {
            "{" => depth += 1,
            "}" => depth = depth.saturating_sub(1),
            "class" | "interface" | "enum" | "record" if depth == 0 => {
                let name = iter.next()?;
                if is_identifier(name) {
                    return Some(qualify(package_name(source).as_deref(), name));
                }
            }
            _ => {}
        }
    }
    None
}

fn package_name(source: &str) -> Option<String> {
    let tokens = tokens(source);
    let at = tokens.iter().position(|t| t == "package")?;
    let mut name = String::new();
    for token in &tokens[at + 1..] {
        if token == ";" {
            break;
        }
        name.push_str(token);
    }
    (!name.is_empty()).then_some(name)
}

fn qualify(package: Option<&str>, simple: &str) -> String {
    match package {
        Some(package) => format!("{package}.{simple}"),
        None => simple.to_string(),
    }
}

fn is_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Identifiers (dots kept inside qualified names) and the punctuation that
/// matters for finding declarations. Comments and literals are dropped.
fn tokens(source: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = source.chars().peekable();
    let mut word = String::new();
    let flush = |word: &mut String, out: &mut Vec<String>| {
        if !word.is_empty() {
            out.push(std::mem::take(word));
        }
    };

    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'/') => {
                flush(&mut word, &mut out);
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                flush(&mut word, &mut out);
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            '"' | '\'' => {
                flush(&mut word, &mut out);
                let mut escaped = false;
                for next in chars.by_ref() {
                    match next {
                        _ if escaped => escaped = false,
                        '\\' => escaped = true,
                        q if q == c => break,
                        _ => {}
                    }
                }
            }
            c if c.is_alphanumeric() || c == '_' || c == '$' || c == '.' => word.push(c),
            '{' | '}' | ';' => {
                flush(&mut word, &mut out);
                out.push(c.to_string());
            }
            _ => flush(&mut word, &mut out),
        }
    }
    flush(&mut word, &mut out);
    out
}
