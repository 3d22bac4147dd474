//! Errors and warnings reported against the document being evaluated
//!
//! Diagnostics are collected, never thrown. Each carries the source position
//! of the markup construct responsible so authoring tools can highlight it.

use crate::SourcePosition;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// A reference could not be resolved to a component
    UnresolvedPath,
    /// A state variable depends on itself
    CyclicDependency,
    /// An action could not be pushed down to essential state
    Uninvertible,
    /// Variant configuration is inconsistent
    InvalidVariantSpec,
    /// A composite's configuration cannot be expanded
    InvalidComposite,
    /// A definition failed while computing its value
    EvaluationError,
    /// Two components claim the same document-wide name
    DuplicateName,
}

/// How bad it is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

/// A single error or warning
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub message: String,
    pub position: Option<SourcePosition>,
}

impl Diagnostic {
    /// Create an error diagnostic
    pub fn error(
        kind: DiagnosticKind,
        message: impl Into<String>,
        position: Option<SourcePosition>,
    ) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            message: message.into(),
            position,
        }
    }

    /// Create a warning diagnostic
    pub fn warning(
        kind: DiagnosticKind,
        message: impl Into<String>,
        position: Option<SourcePosition>,
    ) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match self.position {
            Some(pos) => write!(f, "{} [{:?}] at {}: {}", level, self.kind, pos, self.message),
            None => write!(f, "{} [{:?}]: {}", level, self.kind, self.message),
        }
    }
}

/// Ordered, de-duplicated collection of diagnostics
///
/// The same cycle or unresolved reference is hit on every recomputation;
/// it is reported once.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: IndexSet<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic; returns false if it was already present
    pub fn push(&mut self, diagnostic: Diagnostic) -> bool {
        if self.entries.contains(&diagnostic) {
            return false;
        }
        tracing::warn!(
            kind = ?diagnostic.kind,
            position = ?diagnostic.position,
            "{}",
            diagnostic.message
        );
        self.entries.insert(diagnostic)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    /// Diagnostics of one kind
    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |d| d.kind == kind)
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_dedup() {
        let mut diags = Diagnostics::new();
        let d = Diagnostic::error(
            DiagnosticKind::UnresolvedPath,
            "cannot resolve $x",
            Some(SourcePosition::new(3, 7)),
        );
        assert!(diags.push(d.clone()));
        assert!(!diags.push(d));
        assert_eq!(diags.len(), 1);
        assert!(diags.has_errors());
    }

    #[test]
    fn test_diagnostic_display() {
        let d = Diagnostic::warning(
            DiagnosticKind::DuplicateName,
            "name x used twice",
            Some(SourcePosition::new(1, 2)),
        );
        assert_eq!(
            d.to_string(),
            "warning [DuplicateName] at 1:2: name x used twice"
        );
    }
}
