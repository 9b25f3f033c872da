//! Append-only diagnostics sink (§6, §7).
//!
//! Parser and semantic-analyzer errors never abort a pass: they push a
//! [`Diagnostic`] here and keep going, so a single compilation can surface
//! many errors at once. Compilation as a whole only succeeds if no
//! error-severity diagnostic was ever reported.

use std::fmt;

use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub span: Span,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{kind}: {}", self.message)
    }
}

/// Append-only diagnostics sink shared by every pass of one compilation.
///
/// Entries are never reordered. `truncate_to` exists only to support
/// speculative parsing (try a production, roll back if it fails without
/// keeping the diagnostics it emitted).
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, severity: Severity, span: Span, message: impl Into<String>) {
        self.entries.push(Diagnostic {
            severity,
            span,
            message: message.into(),
        });
    }

    pub fn error(&mut self, span: Span, message: impl Into<String>) {
        self.report(Severity::Error, span, message);
    }

    pub fn warning(&mut self, span: Span, message: impl Into<String>) {
        self.report(Severity::Warning, span, message);
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Checkpoint/rollback for speculative parsing: diagnostics emitted after
    /// the checkpoint was taken are discarded without disturbing order of
    /// the ones that came before.
    #[must_use]
    pub fn checkpoint(&self) -> usize {
        self.entries.len()
    }

    pub fn truncate_to(&mut self, checkpoint: usize) {
        self.entries.truncate(checkpoint);
    }
}
