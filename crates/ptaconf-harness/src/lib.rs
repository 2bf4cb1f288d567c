//! Differential conformance harness for plain-text accounting ledgers.
//!
//! This crate provides:
//! - Catalogue loading: manifest + suite files into ordered test cases
//! - Executors: in-process library calls and external subprocess binaries
//! - Verdicts: declared expectations checked against normalized outcomes
//! - Differential mode: the same input across implementations, diffed
//! - Reports: TAP and JSON for runs, JSON for differential runs
//! - Structured JSONL logging with a line validator

#![forbid(unsafe_code)]

pub mod differential;
pub mod error;
pub mod executor;
pub mod loader;
pub mod log;
pub mod model;
pub mod outcome;
pub mod report;
pub mod runner;
pub mod verdict;

pub use differential::{DifferentialConfig, DifferentialReport, DifferentialRunner};
pub use error::{ConfigError, DifferentialFault, ExecutionFault, LoadError};
pub use executor::{Executor, Implementation};
pub use loader::{Catalogue, TestFilter, load_catalogue};
pub use model::{Summary, TestCase, TestKind, TestResult};
pub use outcome::Outcome;
pub use runner::{RunOptions, RunReport, TestRunner};
