//! Accumulated validation findings.
//!
//! Validators never fail through `Err` on bad input. They push [`Diagnostic`]s
//! into a [`Diagnostics`] list and hand back a [`Verdict`].

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The pass fails because of this finding.
    Error,
    /// The value was coerced or dropped; the pass carries on.
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Field path or library name the finding is about.
    pub context: String,
}

impl Diagnostic {
    pub fn error(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn warning(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "{}: {}", self.severity, self.message)
        } else {
            write!(f, "{}: {}: {}", self.severity, self.context, self.message)
        }
    }
}

/// Ordered list of findings from one pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    pub fn error(&mut self, context: impl Into<String>, message: impl Into<String>) {
        self.push(Diagnostic::error(context, message));
    }

    pub fn warning(&mut self, context: impl Into<String>, message: impl Into<String>) {
        self.push(Diagnostic::warning(context, message));
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    /// Re-home every context under `prefix`, e.g. a library folder name.
    #[must_use]
    pub fn with_prefix(self, prefix: &str) -> Self {
        Self(
            self.0
                .into_iter()
                .map(|mut d| {
                    d.context = if d.context.is_empty() {
                        prefix.to_owned()
                    } else {
                        format!("{prefix}/{}", d.context)
                    };
                    d
                })
                .collect(),
        )
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.0
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Pass/fail outcome of a validation pass plus everything it found.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Verdict {
    pub valid: bool,
    pub diagnostics: Diagnostics,
}

impl Verdict {
    /// Valid iff no error-severity diagnostic was recorded.
    pub fn from_diagnostics(diagnostics: Diagnostics) -> Self {
        Self {
            valid: !diagnostics.has_errors(),
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let d = Diagnostic::error("title", "required property missing");
        assert_eq!(d.to_string(), "error: title: required property missing");
        let bare = Diagnostic::warning("", "nothing to see");
        assert_eq!(bare.to_string(), "warning: nothing to see");
    }

    #[test]
    fn warnings_do_not_fail_a_verdict() {
        let mut diags = Diagnostics::new();
        diags.warning("text", "value truncated");
        let verdict = Verdict::from_diagnostics(diags);
        assert!(verdict.valid);
        assert_eq!(verdict.diagnostics.len(), 1);
    }

    #[test]
    fn errors_fail_a_verdict() {
        let mut diags = Diagnostics::new();
        diags.warning("a", "w");
        diags.error("b", "e");
        assert!(!Verdict::from_diagnostics(diags).valid);
    }

    #[test]
    fn prefix_rewrites_context() {
        let mut diags = Diagnostics::new();
        diags.error("title", "required property missing");
        diags.error("", "unreadable");
        let prefixed = diags.with_prefix("H5P.Foo-1.0");
        let contexts: Vec<_> = prefixed.iter().map(|d| d.context.as_str()).collect();
        assert_eq!(contexts, vec!["H5P.Foo-1.0/title", "H5P.Foo-1.0"]);
    }

    #[test]
    fn serializes_as_plain_list() {
        let mut diags = Diagnostics::new();
        diags.error("x", "bad");
        let json = serde_json::to_value(&diags).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"severity": "error", "message": "bad", "context": "x"}])
        );
    }
}
