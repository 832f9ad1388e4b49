//! Source diagnostics: warnings and errors carrying line/column context.
//!
//! Parse and lowering failures in SAU are reported, not raised — the
//! parser recovers locally and keeps going (spec.md §4.2 "Failure
//! semantics"). This module gives every stage a uniform way to record
//! that without aborting.

use std::fmt;

/// A single diagnostic with source position.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub line: u32,
    pub col: u32,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}:{}: {}: {}", self.line, self.col, tag, self.message)
    }
}

/// Accumulates diagnostics across a compile. Shared by the scanner,
/// parser, and lowering passes so a single script's warnings surface
/// together regardless of which stage produced them.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, line: u32, col: u32, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            line,
            col,
            message: message.into(),
            severity: Severity::Warning,
        });
    }

    pub fn error(&mut self, line: u32, col: u32, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            line,
            col,
            message: message.into(),
            severity: Severity::Error,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn print_to_stderr(&self, source_name: &str) {
        for d in &self.diagnostics {
            eprintln!("{source_name}:{d}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_errors_separately_from_warnings() {
        let mut sink = DiagnosticSink::new();
        sink.warn(1, 1, "unclosed scope");
        assert!(!sink.has_errors());
        sink.error(2, 3, "allocation failure");
        assert!(sink.has_errors());
        assert_eq!(sink.iter().count(), 2);
    }
}
