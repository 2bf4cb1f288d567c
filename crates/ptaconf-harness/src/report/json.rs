//! Machine-readable JSON output.

use serde::Serialize;
use serde_json::Value;

use crate::model::{Status, Summary, TestResult};
use crate::runner::RunReport;

use super::Reporter;

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReporter {
    /// Include suite, kind and spec reference on every result.
    pub verbose: bool,
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    summary: &'a Summary,
    results: Vec<JsonResult<'a>>,
}

#[derive(Debug, Serialize)]
struct JsonResult<'a> {
    id: &'a str,
    description: &'a str,
    status: Status,
    duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    suite: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    spec_ref: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skip_reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expected: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    actual: Option<&'a Value>,
}

impl JsonReporter {
    fn result<'a>(&self, result: &'a TestResult) -> JsonResult<'a> {
        let mismatch = result.mismatch.as_ref();
        let payload = |value: &'a Value| (!is_empty(value)).then_some(value);
        JsonResult {
            id: &result.id,
            description: &result.description,
            status: result.status,
            duration_ms: result.duration_ms(),
            suite: self.verbose.then_some(result.suite.as_str()),
            kind: self.verbose.then(|| result.kind.as_str()),
            spec_ref: result.spec_ref.as_deref().filter(|_| self.verbose),
            skip_reason: if result.is_skipped() {
                Some(result.skip_reason.as_deref().unwrap_or_default())
            } else {
                None
            },
            error: mismatch.map(|m| m.message.as_str()),
            expected: mismatch.and_then(|m| payload(&m.expected)),
            actual: mismatch.and_then(|m| payload(&m.actual)),
        }
    }
}

impl Reporter for JsonReporter {
    fn render(&self, report: &RunReport) -> String {
        let doc = JsonReport {
            summary: &report.summary,
            results: report.results.iter().map(|r| self.result(r)).collect(),
        };
        let mut body = serde_json::to_string_pretty(&doc).unwrap_or_else(|err| {
            format!("{{\"error\":\"failed to serialize report: {err}\"}}")
        });
        body.push('\n');
        body
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
