//! Reduce an [`Outcome`] to a verdict against a test's expectations.
//!
//! Rules run in a fixed order and the first violation wins:
//! 1. phase states (`parse`, `validate`, `query`)
//! 2. error substrings
//! 3. counts (directives, errors, rows)
//! 4. account superset, then exact column sequence
//!
//! An absent expectation skips its rule. An expectation the backend did not
//! report data for is a violation.

use serde_json::{Value, json};

use crate::model::{ExpectedState, Mismatch, TestCase, TestKind};
use crate::outcome::{Outcome, PhaseState, truncate};

/// Returns the first violated expectation, or `None` when the outcome passes.
#[must_use]
pub fn evaluate(case: &TestCase, outcome: &Outcome) -> Option<Mismatch> {
    let expected = &case.expected;
    let shown_messages = if case.kind == TestKind::Validation { 5 } else { 3 };

    let phases = [
        ("parse", expected.parse, outcome.parse),
        ("validate", expected.validate, outcome.validate),
        ("query", expected.query, outcome.query),
    ];
    for (name, want, got) in phases {
        let Some(want) = want else { continue };
        if want == ExpectedState::Skip {
            continue;
        }
        if !state_matches(want, got) {
            let got_label = got.map_or("unknown", PhaseState::as_str);
            let mut actual = json!({
                name: got_label,
                "errors": outcome.first_messages(shown_messages),
            });
            if name == "validate" {
                actual["error_count"] = json!(outcome.diagnostics.len());
            }
            return Some(Mismatch::new(
                format!("Expected {name}={}, got {got_label}", want.as_str()),
                json!({ name: want.as_str() }),
                actual,
            ));
        }
    }

    if !expected.error_contains.is_empty() && primary_state(case) != Some(ExpectedState::Success) {
        let haystack = outcome
            .messages()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        for needle in &expected.error_contains {
            if !haystack.contains(&needle.to_lowercase()) {
                return Some(Mismatch::new(
                    format!(
                        "Expected error containing '{needle}' not found in: {}",
                        truncate(&haystack, 200)
                    ),
                    json!({ "error_contains": expected.error_contains }),
                    json!({ "errors": outcome.first_messages(5) }),
                ));
            }
        }
    }

    if let Some(want) = expected.directives
        && outcome.directive_count != Some(want)
    {
        return Some(count_mismatch("directives", want, outcome.directive_count));
    }
    if let Some(want) = expected.error_count
        && outcome.diagnostics.len() != want
    {
        return Some(count_mismatch(
            "errors",
            want,
            Some(outcome.diagnostics.len()),
        ));
    }
    if let Some(want) = expected.row_count {
        let got = outcome.rows.as_ref().map(Vec::len);
        if got != Some(want) {
            return Some(count_mismatch("rows", want, got));
        }
    }

    if !expected.accounts.is_empty() {
        let missing: Vec<&str> = expected
            .accounts
            .iter()
            .filter(|account| {
                !outcome
                    .accounts
                    .as_ref()
                    .is_some_and(|actual| actual.contains(account.as_str()))
            })
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Some(Mismatch::new(
                format!("Missing expected accounts: {}", missing.join(", ")),
                json!({ "accounts": expected.accounts }),
                json!({ "accounts": outcome.accounts }),
            ));
        }
    }
    if !expected.columns.is_empty() && outcome.columns.as_ref() != Some(&expected.columns) {
        return Some(Mismatch::new(
            "Column mismatch",
            json!({ "columns": expected.columns }),
            json!({ "columns": outcome.columns }),
        ));
    }

    None
}

fn state_matches(want: ExpectedState, got: Option<PhaseState>) -> bool {
    matches!(
        (want, got),
        (ExpectedState::Success, Some(PhaseState::Success))
            | (ExpectedState::Error, Some(PhaseState::Error))
    )
}

/// The expected state of the phase the test's kind is about.
fn primary_state(case: &TestCase) -> Option<ExpectedState> {
    match case.kind {
        TestKind::Syntax => case.expected.parse,
        TestKind::Validation => case.expected.validate,
        TestKind::Query => case.expected.query,
    }
}

fn count_mismatch(noun: &str, want: usize, got: Option<usize>) -> Mismatch {
    let field = match noun {
        "errors" => "error_count",
        "rows" => "row_count",
        other => other,
    };
    let got_label = got.map_or_else(|| "none".to_string(), |n| n.to_string());
    Mismatch::new(
        format!("Expected {want} {noun}, got {got_label}"),
        json!({ field: want }),
        json!({ field: got.map_or(Value::Null, Value::from) }),
    )
}
