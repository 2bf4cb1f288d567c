//! In-process reference implementation for the ptaconf harness.
//!
//! This crate provides:
//! - Structural scanning: recognize dated directives, postings and metadata
//!   and report parse-phase diagnostics
//! - Reference validation: account lifecycle checks (open before use, no
//!   duplicate opens, no use after close)
//! - Projection queries: a `SELECT` subset over posting rows
//!
//! It deliberately stops short of booking, lot matching and inventory
//! reduction. The harness treats it as a black box behind its library-bound
//! executor.

#![forbid(unsafe_code)]

pub mod date;
pub mod query;
pub mod scanner;
pub mod validate;

use std::collections::BTreeSet;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

pub use date::Date;
pub use query::{QueryError, QueryTable, run_query};
pub use scanner::{Directive, DirectiveKind, Posting, scan_source};

/// Stage of processing that produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Parse,
    Validate,
}

/// One problem found in a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub phase: Phase,
    /// 1-based source line.
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A scanned (and optionally validated) ledger.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    pub directives: Vec<Directive>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Ledger {
    /// Number of dated directives recognized.
    #[must_use]
    pub fn directive_count(&self) -> usize {
        self.directives.len()
    }

    /// Every account named by an open directive, a posting, or an
    /// account-bearing directive.
    #[must_use]
    pub fn accounts(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for directive in &self.directives {
            for account in directive.referenced_accounts() {
                out.insert(account.to_string());
            }
        }
        out
    }

    /// Diagnostics raised while scanning.
    pub fn parse_errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|diag| diag.phase == Phase::Parse)
    }

    #[must_use]
    pub fn has_parse_errors(&self) -> bool {
        self.parse_errors().next().is_some()
    }
}

/// Scan a ledger file without running validation.
pub fn parse_file(path: &Path) -> Result<Ledger, ReferenceError> {
    let source = read_source(path)?;
    Ok(scan_source(&source))
}

/// Scan and validate a ledger file.
pub fn load_file(path: &Path) -> Result<Ledger, ReferenceError> {
    let mut ledger = parse_file(path)?;
    let findings = validate::validate_directives(&ledger.directives);
    ledger.diagnostics.extend(findings);
    Ok(ledger)
}

fn read_source(path: &Path) -> Result<String, ReferenceError> {
    std::fs::read_to_string(path).map_err(|source| ReferenceError::Io {
        path: path.display().to_string(),
        source,
    })
}
