//! TAP version 14 output.

use std::fmt::Write;

use crate::model::TestResult;
use crate::runner::RunReport;

use super::Reporter;

#[derive(Debug, Clone, Copy, Default)]
pub struct TapReporter {
    /// Emit a diagnostic block with timing for passing tests too.
    pub verbose: bool,
}

impl Reporter for TapReporter {
    fn render(&self, report: &RunReport) -> String {
        let mut out = String::new();
        out.push_str("TAP version 14\n");
        let _ = writeln!(out, "1..{}", report.results.len());
        for (index, result) in report.results.iter().enumerate() {
            self.render_result(&mut out, index + 1, result);
        }
        let summary = &report.summary;
        let _ = writeln!(
            out,
            "\n# Tests: {}, Passed: {}, Failed: {}, Skipped: {}",
            summary.total, summary.passed, summary.failed, summary.skipped
        );
        out
    }
}

impl TapReporter {
    fn render_result(&self, out: &mut String, number: usize, result: &TestResult) {
        let status = if result.passed() { "ok" } else { "not ok" };
        let label = if result.description.is_empty() {
            result.id.clone()
        } else {
            format!("{}: {}", result.id, result.description)
        };

        if result.is_skipped() {
            let reason = result.skip_reason.as_deref().unwrap_or_default();
            let _ = writeln!(out, "{status} {number} - {label} # SKIP {reason}");
            return;
        }
        let _ = writeln!(out, "{status} {number} - {label}");

        let duration_ms = result.duration_ms();
        if result.passed() && !(self.verbose && duration_ms > 0.0) {
            return;
        }
        out.push_str("  ---\n");
        if let Some(mismatch) = &result.mismatch {
            let message = mismatch.message.replace('\n', "\\n").replace('"', "\\\"");
            let _ = writeln!(out, "  message: \"{message}\"");
            if has_payload(&mismatch.expected) {
                let _ = writeln!(out, "  expected: {}", mismatch.expected);
            }
            if has_payload(&mismatch.actual) {
                let _ = writeln!(out, "  actual: {}", mismatch.actual);
            }
        }
        if duration_ms > 0.0 {
            let _ = writeln!(out, "  duration_ms: {duration_ms:.2}");
        }
        out.push_str("  ...\n");
    }
}

fn has_payload(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}
