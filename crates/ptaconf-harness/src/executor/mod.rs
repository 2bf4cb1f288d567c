//! Executors turn a [`TestCase`] into an [`Outcome`] and then a verdict.
//!
//! Two backend shapes exist: [`LibraryExecutor`] calls an in-process ledger
//! library, [`SubprocessExecutor`] drives an external binary. The selected
//! [`Implementation`] is passed explicitly into the runner.

pub mod library;
pub mod subprocess;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::json;

use crate::error::ExecutionFault;
use crate::model::{Mismatch, TestCase, TestResult};
use crate::outcome::Outcome;
use crate::verdict;

pub use library::{LedgerLibrary, LibraryExecutor, ReferenceLibrary};
pub use subprocess::{CommandSet, CommandTemplate, SubprocessExecutor};

/// Default wall-clock bound for one external process.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable naming the external binary for `--impl external`.
pub const EXTERNAL_BIN_ENV: &str = "PTACONF_EXTERNAL_BIN";
pub const DEFAULT_EXTERNAL_BIN: &str = "rledger";

/// Capability shared by every backend.
pub trait Executor: Send + Sync {
    /// Implementation identifier used in reports and logs.
    fn name(&self) -> &str;

    /// Run the backend on the case's input without judging the result.
    fn observe(&self, case: &TestCase) -> Result<Outcome, ExecutionFault>;

    /// Execute one case. Skip-flagged cases never reach the backend, and a
    /// fault becomes an ordinary failing result.
    fn execute(&self, case: &TestCase) -> TestResult {
        if case.skip {
            return TestResult::skipped(case);
        }
        let started = Instant::now();
        match self.observe(case) {
            Ok(outcome) => {
                let elapsed = started.elapsed();
                let mut result = match verdict::evaluate(case, &outcome) {
                    None => TestResult::pass(case, elapsed),
                    Some(mismatch) => TestResult::fail(case, mismatch, elapsed),
                };
                result.exit_code = outcome.exit_code;
                result.timed_out = outcome.timed_out;
                result
            }
            Err(fault) => TestResult::fail(
                case,
                Mismatch::new(format!("Executor error: {fault}"), json!({}), json!({})),
                started.elapsed(),
            ),
        }
    }
}

/// Which implementation is under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Implementation {
    /// The in-process reference library.
    Reference,
    /// An external binary speaking the JSON check/query protocol.
    External { binary: String, timeout: Duration },
}

impl Implementation {
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Reference => "reference",
            Self::External { .. } => "external",
        }
    }

    #[must_use]
    pub fn executor(&self) -> Box<dyn Executor> {
        match self {
            Self::Reference => Box::new(LibraryExecutor::new(ReferenceLibrary)),
            Self::External { binary, timeout } => Box::new(
                SubprocessExecutor::json_protocol("external", binary).with_timeout(*timeout),
            ),
        }
    }
}

/// A ledger input resolved to a path on disk.
///
/// Inline text is written to a uniquely named temporary file that is removed
/// when this value drops, on every exit path.
#[derive(Debug)]
pub enum InputFile {
    Existing(PathBuf),
    Temporary(tempfile::NamedTempFile),
}

impl InputFile {
    /// Resolve the case's input.
    pub fn materialize(case: &TestCase) -> Result<Self, ExecutionFault> {
        if let Some(inline) = &case.input.inline {
            return Self::from_text(inline);
        }
        let path = case
            .input
            .file_path(&case.suite_dir)
            .ok_or_else(|| ExecutionFault::Library("input has no inline text or file".into()))?;
        if !path.is_file() {
            return Err(ExecutionFault::InputRead {
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
                path,
            });
        }
        Ok(Self::Existing(path))
    }

    /// Write `text` to a fresh temporary `.beancount` file.
    pub fn from_text(text: &str) -> Result<Self, ExecutionFault> {
        let mut file = tempfile::Builder::new()
            .prefix("ptaconf-")
            .suffix(".beancount")
            .tempfile()
            .map_err(ExecutionFault::Materialize)?;
        file.write_all(text.as_bytes())
            .and_then(|()| file.flush())
            .map_err(ExecutionFault::Materialize)?;
        Ok(Self::Temporary(file))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Existing(path) => path,
            Self::Temporary(file) => file.path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::model::{Expected, Input, Status, case_for_tests};

    struct CountingExecutor {
        calls: AtomicUsize,
    }

    impl Executor for CountingExecutor {
        fn name(&self) -> &str {
            "counting"
        }

        fn observe(&self, _case: &TestCase) -> Result<Outcome, ExecutionFault> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ExecutionFault::Library("backend exploded".into()))
        }
    }

    #[test]
    fn skip_flag_never_reaches_backend() {
        let executor = CountingExecutor {
            calls: AtomicUsize::new(0),
        };
        let mut case = case_for_tests("s", Input::default(), Expected::default());
        case.skip = true;
        case.skip_reason = Some("not yet".into());
        let result = executor.execute(&case);
        assert_eq!(result.status, Status::Skip);
        assert!(result.passed());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn fault_becomes_failing_result() {
        let executor = CountingExecutor {
            calls: AtomicUsize::new(0),
        };
        let case = case_for_tests("f", Input::default(), Expected::default());
        let result = executor.execute(&case);
        assert_eq!(result.status, Status::Fail);
        assert_eq!(
            result.mismatch.unwrap().message,
            "Executor error: reference implementation fault: backend exploded"
        );
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn temporary_input_is_removed_on_drop() {
        let input = InputFile::from_text("2020-01-01 open Assets:Cash\n").unwrap();
        let path = input.path().to_path_buf();
        assert!(path.is_file());
        assert!(path.to_string_lossy().ends_with(".beancount"));
        drop(input);
        assert!(!path.exists());
    }

    #[test]
    fn missing_input_file_is_a_fault() {
        let dir = tempfile::tempdir().unwrap();
        let mut case = case_for_tests(
            "m",
            Input {
                file: Some("absent.beancount".into()),
                ..Input::default()
            },
            Expected::default(),
        );
        case.suite_dir = dir.path().to_path_buf();
        assert!(matches!(
            InputFile::materialize(&case),
            Err(ExecutionFault::InputRead { .. })
        ));
    }
}
