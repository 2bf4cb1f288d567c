//! Normalized per-execution observation of one implementation.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Diagnostic type names that denote a parse-phase failure.
pub const PARSE_ERROR_TYPES: &[&str] = &["ParserError", "ParserSyntaxError", "LexerError"];

/// Observed success/error state of one processing phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseState {
    Success,
    Error,
}

impl PhaseState {
    #[must_use]
    pub const fn from_ok(ok: bool) -> Self {
        if ok { Self::Success } else { Self::Error }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// One diagnostic produced by an implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl Diagnostic {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            phase: None,
        }
    }

    #[must_use]
    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    #[must_use]
    pub fn is_parse_phase(&self) -> bool {
        self.phase.as_deref() == Some("parse")
            || self
                .error_type
                .as_deref()
                .is_some_and(|ty| PARSE_ERROR_TYPES.contains(&ty))
    }
}

/// What one implementation did with one input.
///
/// Library-bound executors fill the phase states directly; subprocess-bound
/// ones derive them from the exit status and structured output. Fields the
/// backend did not report stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Outcome {
    pub implementation: String,
    /// Overall success as reported by the backend.
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse: Option<PhaseState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validate: Option<PhaseState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<PhaseState>,
    pub diagnostics: Vec<Diagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directive_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accounts: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    pub timed_out: bool,
    #[serde(skip)]
    pub duration: Duration,
}

impl Outcome {
    #[must_use]
    pub fn new(implementation: impl Into<String>) -> Self {
        Self {
            implementation: implementation.into(),
            ..Self::default()
        }
    }

    /// A failed outcome carrying a single synthetic diagnostic.
    #[must_use]
    pub fn synthetic_failure(implementation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            implementation: implementation.into(),
            success: false,
            parse: Some(PhaseState::Error),
            validate: Some(PhaseState::Error),
            query: Some(PhaseState::Error),
            diagnostics: vec![Diagnostic::new(message)],
            ..Self::default()
        }
    }

    /// Whether the process exited with status 0. Timeouts and backends that
    /// never ran count as non-zero.
    #[must_use]
    pub fn exited_cleanly(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    /// Error presence as visible from outside: any diagnostic or any stderr.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty() || !self.stderr.trim().is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.diagnostics.iter().map(|diag| diag.message.as_str())
    }

    /// First `limit` diagnostic messages, for failure payloads.
    #[must_use]
    pub fn first_messages(&self, limit: usize) -> Vec<String> {
        self.messages().take(limit).map(str::to_string).collect()
    }

    /// Compact view used in divergence records.
    #[must_use]
    pub fn summary_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": self.success,
            "exit_code": self.exit_code,
            "timed_out": self.timed_out,
            "error_count": self.diagnostics.len(),
            "errors": self.first_messages(5),
            "stderr": truncate(&self.stderr, 500),
        })
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_phase_from_type_or_phase() {
        let typed = |error_type: &str| Diagnostic {
            error_type: Some(error_type.to_string()),
            ..Diagnostic::new("x")
        };
        assert!(typed("LexerError").is_parse_phase());
        assert!(Diagnostic::new("x").with_phase("parse").is_parse_phase());
        assert!(!typed("ValidationError").is_parse_phase());
        assert!(!Diagnostic::new("x").is_parse_phase());
    }

    #[test]
    fn synthetic_failure_marks_every_phase() {
        let outcome = Outcome::synthetic_failure("ext", "Timeout after 30 seconds");
        assert!(!outcome.success);
        assert!(outcome.has_errors());
        assert_eq!(outcome.parse, Some(PhaseState::Error));
        assert_eq!(outcome.first_messages(3), vec!["Timeout after 30 seconds"]);
    }

    #[test]
    fn clean_exit_requires_status_zero() {
        let mut outcome = Outcome::new("ext");
        assert!(!outcome.exited_cleanly());
        outcome.exit_code = Some(0);
        assert!(outcome.exited_cleanly());
        outcome.timed_out = true;
        assert!(!outcome.exited_cleanly());
    }

    #[test]
    fn stderr_alone_counts_as_errors() {
        let mut outcome = Outcome::new("ext");
        outcome.success = true;
        assert!(!outcome.has_errors());
        outcome.stderr = "warning: something\n".into();
        assert!(outcome.has_errors());
        assert_eq!(outcome.summary_json()["error_count"], 0);
    }
}
