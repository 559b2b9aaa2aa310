//! Ordered diagnostics returned alongside every lifecycle operation
//!
//! Any error-severity entry means the operation did not complete.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Tolerated problem; the operation continued
    Warning,
    /// The operation did not complete
    Error,
}

/// A single diagnostic entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}: {}: {}", tag, self.summary, self.detail)
    }
}

/// Ordered list of diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_warning(&mut self, summary: impl Into<String>, detail: impl Into<String>) {
        self.0.push(Diagnostic {
            severity: Severity::Warning,
            summary: summary.into(),
            detail: detail.into(),
        });
    }

    pub fn push_error(&mut self, summary: impl Into<String>, detail: impl Into<String>) {
        self.0.push(Diagnostic {
            severity: Severity::Error,
            summary: summary.into(),
            detail: detail.into(),
        });
    }

    /// Record a failure tied to a specific resource id
    pub fn push_resource_error(
        &mut self,
        summary: impl Into<String>,
        resource_id: &str,
        err: impl fmt::Display,
    ) {
        self.push_error(summary, resource_detail(err, resource_id));
    }

    /// Record a fatal core error
    pub fn push_failure(&mut self, err: &Error) {
        match err {
            Error::Call {
                action,
                resource_id,
                source,
            } => self.push_resource_error(action.clone(), resource_id, source),
            Error::Precondition {
                summary,
                resource_id,
                message,
            } => self.push_error(
                summary.clone(),
                format!("{} (resource id: {})", message, resource_id),
            ),
            other => self.push_error("operation failed", other.to_string()),
        }
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    pub fn has_error(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.severity == Severity::Warning)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Detail text naming the implicated resource
pub fn resource_detail(err: impl fmt::Display, resource_id: &str) -> String {
    format!("reason: {} (resource id: {})", err, resource_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_alone_are_not_errors() {
        let mut diags = Diagnostics::new();
        diags.push_warning("failed to get status", "retry: 0 (err: timeout)");
        assert!(!diags.has_error());
        assert_eq!(diags.warnings().count(), 1);

        diags.push_resource_error("failed to detach", "vol-1", "boom");
        assert!(diags.has_error());
        let err = diags.errors().next().map(|d| d.detail.clone());
        assert_eq!(err.as_deref(), Some("reason: boom (resource id: vol-1)"));
    }

    #[test]
    fn precondition_failures_keep_operator_message() {
        let mut diags = Diagnostics::new();
        diags.push_failure(&Error::precondition(
            "virtual machine is not idle",
            "vm-1",
            "kill the allocation first",
        ));
        let diag = diags.iter().next().cloned().unwrap();
        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.summary, "virtual machine is not idle");
        assert_eq!(diag.detail, "kill the allocation first (resource id: vm-1)");
    }

    #[test]
    fn extend_preserves_order() {
        let mut first = Diagnostics::new();
        first.push_warning("a", "1");
        let mut second = Diagnostics::new();
        second.push_error("b", "2");
        first.extend(second);

        let summaries: Vec<_> = first.iter().map(|d| d.summary.as_str()).collect();
        assert_eq!(summaries, vec!["a", "b"]);
    }

    #[test]
    fn serializes_as_plain_list() {
        let mut diags = Diagnostics::new();
        diags.push_error("unexpected status", "x");
        let json = serde_json::to_value(&diags).unwrap();
        assert_eq!(json[0]["severity"], "error");
    }
}
