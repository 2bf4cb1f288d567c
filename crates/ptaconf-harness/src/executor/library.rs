//! Library-bound executor.

use std::path::Path;

use ptaconf_reference as reference;

use crate::error::ExecutionFault;
use crate::model::{TestCase, TestKind};
use crate::outcome::{Diagnostic, Outcome, PhaseState};

use super::{Executor, InputFile};

/// In-process entry points of a ledger library. All of them take a path,
/// so inline inputs are materialized first.
pub trait LedgerLibrary: Send + Sync {
    fn name(&self) -> &str;
    fn parse(&self, path: &Path) -> Result<Outcome, ExecutionFault>;
    fn validate(&self, path: &Path) -> Result<Outcome, ExecutionFault>;
    fn query(&self, path: &Path, query: &str) -> Result<Outcome, ExecutionFault>;
}

/// Dispatches a case to the library entry point matching its kind.
#[derive(Debug, Clone)]
pub struct LibraryExecutor<L> {
    library: L,
}

impl<L: LedgerLibrary> LibraryExecutor<L> {
    #[must_use]
    pub const fn new(library: L) -> Self {
        Self { library }
    }
}

impl<L: LedgerLibrary> Executor for LibraryExecutor<L> {
    fn name(&self) -> &str {
        self.library.name()
    }

    fn observe(&self, case: &TestCase) -> Result<Outcome, ExecutionFault> {
        let input = InputFile::materialize(case)?;
        match case.kind {
            TestKind::Syntax => self.library.parse(input.path()),
            TestKind::Validation => self.library.validate(input.path()),
            TestKind::Query => {
                let query = case.input.query.as_deref().ok_or_else(|| {
                    ExecutionFault::Library("query test without a query string".into())
                })?;
                self.library.query(input.path(), query)
            }
        }
    }
}

/// Binding to the `ptaconf-reference` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceLibrary;

impl ReferenceLibrary {
    fn base_outcome(&self, ledger: &reference::Ledger) -> Outcome {
        let mut outcome = Outcome::new(self.name());
        outcome.parse = Some(PhaseState::from_ok(!ledger.has_parse_errors()));
        outcome.directive_count = Some(ledger.directive_count());
        outcome.accounts = Some(ledger.accounts());
        outcome.diagnostics = ledger.diagnostics.iter().map(convert).collect();
        outcome
    }
}

impl LedgerLibrary for ReferenceLibrary {
    fn name(&self) -> &str {
        "reference"
    }

    fn parse(&self, path: &Path) -> Result<Outcome, ExecutionFault> {
        let ledger = reference::parse_file(path).map_err(fault)?;
        let mut outcome = self.base_outcome(&ledger);
        outcome.success = !ledger.has_parse_errors();
        Ok(outcome)
    }

    fn validate(&self, path: &Path) -> Result<Outcome, ExecutionFault> {
        let ledger = reference::load_file(path).map_err(fault)?;
        let mut outcome = self.base_outcome(&ledger);
        // A parse failure implies a validation failure.
        outcome.success = ledger.diagnostics.is_empty();
        outcome.validate = Some(PhaseState::from_ok(outcome.success));
        Ok(outcome)
    }

    fn query(&self, path: &Path, query: &str) -> Result<Outcome, ExecutionFault> {
        let ledger = reference::load_file(path).map_err(fault)?;
        let mut outcome = self.base_outcome(&ledger);
        if ledger.has_parse_errors() {
            outcome.query = Some(PhaseState::Error);
            return Ok(outcome);
        }
        match reference::run_query(&ledger, query) {
            Ok(table) => {
                outcome.success = true;
                outcome.query = Some(PhaseState::Success);
                outcome.rows = Some(table.rows.into_iter().map(serde_json::Value::from).collect());
                outcome.columns = Some(table.columns);
            }
            Err(err) => {
                outcome.query = Some(PhaseState::Error);
                outcome
                    .diagnostics
                    .push(Diagnostic::new(err.to_string()).with_phase("query"));
            }
        }
        Ok(outcome)
    }
}

fn convert(diag: &reference::Diagnostic) -> Diagnostic {
    let phase = match diag.phase {
        reference::Phase::Parse => "parse",
        reference::Phase::Validate => "validate",
    };
    Diagnostic::new(diag.to_string()).with_phase(phase)
}

fn fault(err: reference::ReferenceError) -> ExecutionFault {
    ExecutionFault::Library(err.to_string())
}
