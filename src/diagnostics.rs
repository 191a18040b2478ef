//! Diagnostic store shared by every compiler phase
//!
//! All phases accumulate into a `Vec<Diagnostic>` and keep running; the
//! driver decides at the end whether a clean program was produced. Output
//! is either ANSI-colored text for the terminal or JSON in the LSP shape
//! (zero-based line/character) for tooling.

use serde::Serialize;
use std::fmt::Write as _;

/// Source location attached to tokens, AST nodes and diagnostics.
/// Line and column are 1-based, offset is a 0-based byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
    pub offset: u32,
    pub length: u32,
}

impl SourceLocation {
    pub fn new(line: u32, column: u32, offset: u32, length: u32) -> Self {
        Self {
            line,
            column,
            offset,
            length,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

impl Severity {
    fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Hint => "hint",
        }
    }
}

/// A single diagnostic message with a stable code (e.g. "E004", "W001").
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub filename: String,
    pub location: SourceLocation,
}

impl Diagnostic {
    pub fn error(
        code: impl Into<String>,
        message: impl Into<String>,
        filename: impl Into<String>,
        location: SourceLocation,
    ) -> Self {
        Self {
            severity: Severity::Error,
            code: code.into(),
            message: message.into(),
            filename: filename.into(),
            location,
        }
    }

    pub fn warning(
        code: impl Into<String>,
        message: impl Into<String>,
        filename: impl Into<String>,
        location: SourceLocation,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            code: code.into(),
            message: message.into(),
            filename: filename.into(),
            location,
        }
    }
}

/// Check whether any diagnostic is an error
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(|d| d.severity == Severity::Error)
}

const ANSI_RED: &str = "\x1b[31;1m";
const ANSI_YELLOW: &str = "\x1b[33;1m";
const ANSI_CYAN: &str = "\x1b[36;1m";
const ANSI_BOLD: &str = "\x1b[1m";
const ANSI_RESET: &str = "\x1b[0m";

/// Format a diagnostic for terminal output, with the offending source line
/// and a caret marker underneath.
pub fn format_diagnostic(diag: &Diagnostic, source: &str) -> String {
    let color = match diag.severity {
        Severity::Error => ANSI_RED,
        Severity::Warning => ANSI_YELLOW,
        _ => ANSI_CYAN,
    };

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}{}[{}]{}{}: {}{}",
        color,
        diag.severity.as_str(),
        diag.code,
        ANSI_RESET,
        ANSI_BOLD,
        diag.message,
        ANSI_RESET
    );
    let _ = writeln!(
        out,
        "  --> {}:{}:{}",
        diag.filename, diag.location.line, diag.location.column
    );

    if let Some(line) = source.lines().nth(diag.location.line.saturating_sub(1) as usize) {
        let _ = writeln!(out, "   | {}", line);
        let pad = " ".repeat(diag.location.column.saturating_sub(1) as usize);
        let width = (diag.location.length.max(1) as usize).min(line.len() + 1);
        let _ = writeln!(out, "   | {}{}{}{}", pad, color, "^".repeat(width), ANSI_RESET);
    }

    out
}

#[derive(Serialize)]
struct JsonPosition {
    line: u32,
    character: u32,
}

#[derive(Serialize)]
struct JsonRange {
    start: JsonPosition,
    end: JsonPosition,
}

#[derive(Serialize)]
struct JsonDiagnostic<'a> {
    severity: &'static str,
    code: &'a str,
    message: &'a str,
    file: &'a str,
    range: JsonRange,
}

/// Format a diagnostic as a JSON object (LSP convention: zero-based positions)
pub fn format_diagnostic_json(diag: &Diagnostic) -> String {
    let start = JsonPosition {
        line: diag.location.line.saturating_sub(1),
        character: diag.location.column.saturating_sub(1),
    };
    let end = JsonPosition {
        line: start.line,
        character: start.character + diag.location.length,
    };
    let json = JsonDiagnostic {
        severity: diag.severity.as_str(),
        code: &diag.code,
        message: &diag.message,
        file: &diag.filename,
        range: JsonRange { start, end },
    };
    serde_json::to_string(&json).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_errors() {
        let loc = SourceLocation::default();
        let diags = vec![Diagnostic::warning("W001", "shadowed", "t.akk", loc)];
        assert!(!has_errors(&diags));

        let diags = vec![
            Diagnostic::warning("W001", "shadowed", "t.akk", loc),
            Diagnostic::error("E004", "unknown function", "t.akk", loc),
        ];
        assert!(has_errors(&diags));
    }

    #[test]
    fn test_json_shape_is_zero_based() {
        let diag = Diagnostic::error(
            "E004",
            "unknown function: 'foo'",
            "live.akk",
            SourceLocation::new(3, 5, 42, 3),
        );
        let json = format_diagnostic_json(&diag);
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["severity"], "error");
        assert_eq!(v["code"], "E004");
        assert_eq!(v["range"]["start"]["line"], 2);
        assert_eq!(v["range"]["start"]["character"], 4);
        assert_eq!(v["range"]["end"]["character"], 7);
    }
}
