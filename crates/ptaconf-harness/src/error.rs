//! Failure taxonomy.
//!
//! Only [`LoadError`] is run-fatal. Every other class degrades to a per-test
//! result (runner) or a per-input entry in the `errors` bucket (differential).

use std::path::PathBuf;

use thiserror::Error;

use crate::model::TestKind;

/// Malformed manifest or suite data. Aborts the run before any test executes.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("manifest not found: {}", .0.display())]
    MissingManifest(PathBuf),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{}: test #{index} is missing required field '{field}'", path.display())]
    MissingField {
        path: PathBuf,
        index: usize,
        field: &'static str,
    },
    #[error("duplicate test id '{id}' in suites '{first_suite}' and '{second_suite}'")]
    DuplicateId {
        id: String,
        first_suite: String,
        second_suite: String,
    },
    #[error("test '{id}': {reason}")]
    InvalidInput { id: String, reason: String },
}

/// An executor itself failed, as opposed to the backend reporting an error.
#[derive(Debug, Error)]
pub enum ExecutionFault {
    #[error("failed to materialize inline input: {0}")]
    Materialize(#[source] std::io::Error),
    #[error("failed to read input {}: {source}", path.display())]
    InputRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("reference implementation fault: {0}")]
    Library(String),
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no command configured for {kind} tests")]
    NoCommand { kind: TestKind },
}

/// Problems with the differential configuration or the implementation set.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown implementation '{0}'")]
    UnknownImplementation(String),
    #[error("unknown group '{0}'")]
    UnknownGroup(String),
    #[error("unknown comparison '{0}'")]
    UnknownComparison(String),
    #[error("implementation '{implementation}' has an empty {kind} command")]
    EmptyCommand {
        implementation: String,
        kind: TestKind,
    },
    #[error("differential testing needs at least two implementations, got {0}")]
    TooFewImplementations(usize),
    #[error("implementation '{0}' is listed more than once")]
    DuplicateImplementation(String),
}

/// A fault while orchestrating one differential input. Lands in the report's
/// `errors` bucket and never aborts the remaining inputs.
#[derive(Debug, Error)]
pub enum DifferentialFault {
    #[error("implementation '{implementation}' has no {kind} command")]
    MissingCommand {
        implementation: String,
        kind: TestKind,
    },
    #[error("failed to read input {}: {source}", path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to prepare input: {0}")]
    Materialize(#[source] ExecutionFault),
    #[error("implementation '{implementation}': {source}")]
    Execution {
        implementation: String,
        #[source]
        source: ExecutionFault,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_messages_name_the_offender() {
        let err = LoadError::MissingField {
            path: PathBuf::from("suites/syntax/tests.json"),
            index: 3,
            field: "description",
        };
        assert_eq!(
            err.to_string(),
            "suites/syntax/tests.json: test #3 is missing required field 'description'"
        );

        let dup = LoadError::DuplicateId {
            id: "t1".into(),
            first_suite: "syntax".into(),
            second_suite: "validation".into(),
        };
        assert!(dup.to_string().contains("'t1'"));
    }

    #[test]
    fn differential_fault_wraps_execution_fault() {
        let fault = DifferentialFault::Execution {
            implementation: "beancount".into(),
            source: ExecutionFault::NoCommand {
                kind: TestKind::Query,
            },
        };
        assert_eq!(
            fault.to_string(),
            "implementation 'beancount': no command configured for query tests"
        );
    }
}
