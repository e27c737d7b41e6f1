//! Parsing of `javac` console output into positioned diagnostics.
//!
//! The default javac format is a header line, an echo of the offending source
//! line, a caret line and optional indented detail lines:
//!
//! ```text
//! /tmp/src/com/example/Greeter.java:5: error: cannot find symbol
//!         return nme;
//!                ^
//!   symbol:   variable nme
//!   location: class Greeter
//! 1 error
//! ```
//!
//! With `-XDrawDiagnostics` the header carries the column and a diagnostic key
//! (`Greeter.java:5:16: compiler.err.cant.resolve...`); both forms are accepted.

use hotwire_proto::{Diagnostic, Severity};

struct Pending {
    diagnostic: Diagnostic,
    seen_caret: bool,
}

/// Parse everything javac printed. `unit_for` maps a reported file path back
/// to the binary name of the submitted unit; unmapped paths are kept verbatim.
pub fn parse_javac_output(output: &str, unit_for: impl Fn(&str) -> Option<String>) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    let mut pending: Option<Pending> = None;

    for raw in output.lines() {
        let line = raw.trim_end();

        if let Some((file, line_no, column, severity, message)) = parse_header(line) {
            flush(&mut pending, &mut out);
            pending = Some(Pending {
                diagnostic: Diagnostic {
                    unit: unit_for(file).unwrap_or_else(|| file.to_string()),
                    line: Some(line_no),
                    column,
                    severity,
                    message: message.to_string(),
                },
                seen_caret: false,
            });
            continue;
        }

        if is_summary(line) {
            flush(&mut pending, &mut out);
            continue;
        }

        if let Some((severity, message)) = parse_global(line) {
            flush(&mut pending, &mut out);
            out.push(Diagnostic {
                unit: String::new(),
                line: None,
                column: None,
                severity,
                message: message.to_string(),
            });
            continue;
        }

        let Some(current) = pending.as_mut() else {
            continue;
        };
        if let Some(column) = caret_column(line) {
            if current.diagnostic.column.is_none() {
                current.diagnostic.column = Some(column);
            }
            current.seen_caret = true;
        } else if current.seen_caret && !line.trim().is_empty() {
            // Detail lines (`symbol:`, `location:`, ...) follow the caret.
            current.diagnostic.message.push('\n');
            current.diagnostic.message.push_str(line.trim());
        }
    }

    flush(&mut pending, &mut out);
    out
}

fn flush(pending: &mut Option<Pending>, out: &mut Vec<Diagnostic>) {
    if let Some(p) = pending.take() {
        out.push(p.diagnostic);
    }
}

fn severity_of(kind: &str) -> Option<Severity> {
    match kind {
        "error" => Some(Severity::Error),
        "warning" => Some(Severity::Warning),
        "note" => Some(Severity::Note),
        _ if kind.starts_with("compiler.err.") => Some(Severity::Error),
        _ if kind.starts_with("compiler.warn.") => Some(Severity::Warning),
        _ if kind.starts_with("compiler.note.") => Some(Severity::Note),
        _ => None,
    }
}

/// `file:line[:col]: kind: message`, or `file:line:col: compiler.err.key[: args]`.
fn parse_header(line: &str) -> Option<(&str, u32, Option<u32>, Severity, &str)> {
    let (file, line_no, column, rest) = parse_location_prefix(line)?;
    let (kind, message) = match rest.split_once(':') {
        Some((kind, message)) => (kind.trim(), message.trim()),
        None => (rest.trim(), ""),
    };
    let severity = severity_of(kind)?;
    // Raw diagnostic keys carry no prose; the key is the message.
    let message = if kind.starts_with("compiler.") {
        rest.trim()
    } else {
        message
    };
    Some((file, line_no, column, severity, message))
}

/// Split off the location. Paths may contain `:` (drive letters), so the
/// numeric fields are found from the end.
fn parse_location_prefix(line: &str) -> Option<(&str, u32, Option<u32>, &str)> {
    let bytes = line.as_bytes();

    // Last `:<digits>:` followed by whitespace.
    let mut end_colon = None;
    for i in (1..bytes.len()).rev() {
        if bytes[i] != b':' || !bytes.get(i + 1).is_some_and(|b| b.is_ascii_whitespace()) {
            continue;
        }
        let mut start = i;
        while start > 0 && bytes[start - 1].is_ascii_digit() {
            start -= 1;
        }
        if start < i && start > 0 && bytes[start - 1] == b':' {
            end_colon = Some(i);
            break;
        }
    }
    let end_colon = end_colon?;

    let digits_before = |end: usize| {
        let mut start = end;
        while start > 0 && bytes[start - 1].is_ascii_digit() {
            start -= 1;
        }
        start
    };

    let n2_start = digits_before(end_colon);
    let n2: u32 = line[n2_start..end_colon].parse().ok()?;
    let sep = n2_start - 1;

    let n1_start = digits_before(sep);
    let (file_end, line_no, column) = if n1_start < sep && n1_start > 0 && bytes[n1_start - 1] == b':' {
        let n1: u32 = line[n1_start..sep].parse().ok()?;
        (n1_start - 1, n1, Some(n2))
    } else {
        (sep, n2, None)
    };

    let file = line[..file_end].trim_end();
    let rest = line[end_colon + 1..].trim_start();
    if file.is_empty() || rest.is_empty() {
        return None;
    }
    Some((file, line_no, column, rest))
}

/// Messages not tied to a file: `error: invalid flag: -x`, `Note: ...`.
fn parse_global(line: &str) -> Option<(Severity, &str)> {
    if let Some(rest) = line.strip_prefix("error: ") {
        return Some((Severity::Error, rest.trim()));
    }
    if let Some(rest) = line.strip_prefix("warning: ") {
        return Some((Severity::Warning, rest.trim()));
    }
    if let Some(rest) = line.strip_prefix("Note: ") {
        return Some((Severity::Note, rest.trim()));
    }
    None
}

/// `1 error`, `3 warnings`.
fn is_summary(line: &str) -> bool {
    let Some((count, word)) = line.trim().split_once(' ') else {
        return false;
    };
    !count.is_empty()
        && count.bytes().all(|b| b.is_ascii_digit())
        && matches!(word, "error" | "errors" | "warning" | "warnings")
}

/// 1-based column of a line holding a lone `^`.
fn caret_column(line: &str) -> Option<u32> {
    if line.trim() != "^" {
        return None;
    }
    let before = line.find('^')?;
    u32::try_from(line[..before].chars().count() + 1).ok()
}
