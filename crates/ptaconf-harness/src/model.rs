//! Test-case data model.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

/// What a test exercises. Fixed at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    Syntax,
    Validation,
    Query,
}

impl TestKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Validation => "validation",
            Self::Query => "query",
        }
    }

    /// Infer the kind from populated fields: an expected query outcome or a
    /// query string wins, then an expected validation outcome, else syntax.
    #[must_use]
    pub fn infer(input: &Input, expected: &Expected) -> Self {
        if expected.query.is_some() || input.query.is_some() {
            Self::Query
        } else if expected.validate.is_some() {
            Self::Validation
        } else {
            Self::Syntax
        }
    }
}

impl std::fmt::Display for TestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the ledger text comes from, plus an optional query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<String>,
    /// Path relative to the suite directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl Input {
    /// Absolute path of a file-backed input.
    #[must_use]
    pub fn file_path(&self, base_dir: &Path) -> Option<PathBuf> {
        self.file.as_ref().map(|file| base_dir.join(file))
    }
}

/// Expected success/error state for one processing phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedState {
    Success,
    Error,
    /// "Don't care". Only meaningful for `validate`.
    Skip,
}

impl ExpectedState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Skip => "skip",
        }
    }
}

/// Sparse predicate set. Absent fields are not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expected {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse: Option<ExpectedState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<ExpectedState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<ExpectedState>,
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub error_contains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_count: Option<usize>,
    /// Recorded for reporting; never evaluated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directives: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accounts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    /// account -> currency -> amount. Recorded for reporting; never evaluated.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub balance: BTreeMap<String, BTreeMap<String, String>>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(single)) => vec![single],
        Some(OneOrMany::Many(list)) => list,
    })
}

/// One conformance test, immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub id: String,
    pub description: String,
    pub suite: String,
    /// Directory holding the suite's `tests.json`; file inputs resolve here.
    pub suite_dir: PathBuf,
    pub tags: BTreeSet<String>,
    pub skip: bool,
    pub skip_reason: Option<String>,
    pub spec_ref: Option<String>,
    pub input: Input,
    pub expected: Expected,
    pub kind: TestKind,
}

/// Final status of one test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pass,
    Fail,
    Skip,
}

impl Status {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Skip => "skip",
        }
    }
}

/// The first violated expectation of a failing test.
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub message: String,
    pub expected: serde_json::Value,
    pub actual: serde_json::Value,
}

impl Mismatch {
    #[must_use]
    pub fn new(
        message: impl Into<String>,
        expected: serde_json::Value,
        actual: serde_json::Value,
    ) -> Self {
        Self {
            message: message.into(),
            expected,
            actual,
        }
    }
}

/// Verdict for one [`TestCase`].
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub id: String,
    pub description: String,
    pub suite: String,
    pub kind: TestKind,
    pub status: Status,
    pub skip_reason: Option<String>,
    pub spec_ref: Option<String>,
    pub mismatch: Option<Mismatch>,
    /// Exit status of the external process, when one ran.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration: Duration,
}

impl TestResult {
    #[must_use]
    pub fn skipped(case: &TestCase) -> Self {
        Self::build(case, Status::Skip, None, Duration::ZERO)
    }

    #[must_use]
    pub fn pass(case: &TestCase, duration: Duration) -> Self {
        Self::build(case, Status::Pass, None, duration)
    }

    #[must_use]
    pub fn fail(case: &TestCase, mismatch: Mismatch, duration: Duration) -> Self {
        Self::build(case, Status::Fail, Some(mismatch), duration)
    }

    fn build(
        case: &TestCase,
        status: Status,
        mismatch: Option<Mismatch>,
        duration: Duration,
    ) -> Self {
        Self {
            id: case.id.clone(),
            description: case.description.clone(),
            suite: case.suite.clone(),
            kind: case.kind,
            status,
            skip_reason: if status == Status::Skip {
                case.skip_reason.clone()
            } else {
                None
            },
            spec_ref: case.spec_ref.clone(),
            mismatch,
            exit_code: None,
            timed_out: false,
            duration,
        }
    }

    /// Skips count as passes for aggregates.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status != Status::Fail
    }

    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.status == Status::Skip
    }

    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        round2(self.duration.as_secs_f64() * 1000.0)
    }
}

/// Aggregate counts over a set of results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    /// Excludes skips.
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Summary {
    #[must_use]
    pub fn from_results(results: &[TestResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            match result.status {
                Status::Pass => summary.passed += 1,
                Status::Fail => summary.failed += 1,
                Status::Skip => summary.skipped += 1,
            }
        }
        summary
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
pub(crate) fn case_for_tests(id: &str, input: Input, expected: Expected) -> TestCase {
    let kind = TestKind::infer(&input, &expected);
    TestCase {
        id: id.to_string(),
        description: format!("{id} description"),
        suite: "unit".to_string(),
        suite_dir: PathBuf::from("."),
        tags: BTreeSet::new(),
        skip: false,
        skip_reason: None,
        spec_ref: None,
        input,
        expected,
        kind,
    }
}
