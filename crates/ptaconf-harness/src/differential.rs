//! Differential mode: the same input through several implementations.
//!
//! The comparator ([`compare`]) is a pure function of the collected
//! [`Outcome`]s and a [`Comparison`]. It has no notion of ground truth; the
//! first implementation only anchors the wording of difference messages.
//! Orchestration faults go to a separate `errors` bucket and never stop the
//! remaining inputs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ConfigError, DifferentialFault};
use crate::executor::{CommandSet, CommandTemplate, Executor, InputFile, SubprocessExecutor};
use crate::model::{TestCase, TestKind};
use crate::outcome::Outcome;

/// Comparison used when none is named.
pub const DEFAULT_COMPARISON: &str = "parse";
/// Group used when neither `--impls` nor `--group` is given.
pub const DEFAULT_GROUP: &str = "beancount";
/// Extensions picked up by input discovery.
pub const INPUT_EXTENSIONS: &[&str] = &["beancount", "ledger", "journal"];

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationConfig {
    #[serde(default)]
    pub commands: CommandSet,
    /// Per-child bound; the runner default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub implementations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Which dimensions a comparison diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionToggles {
    #[serde(default = "enabled")]
    pub exit_code: bool,
    #[serde(default = "enabled")]
    pub has_errors: bool,
    #[serde(default)]
    pub error_count: bool,
    #[serde(default)]
    pub output: bool,
}

fn enabled() -> bool {
    true
}

impl Default for DimensionToggles {
    fn default() -> Self {
        Self {
            exit_code: true,
            has_errors: true,
            error_count: false,
            output: false,
        }
    }
}

/// A named comparison: dimensions plus output normalization.
///
/// Normalization is off unless requested, so exact output can still be
/// diffed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comparison {
    #[serde(default)]
    pub compare: DimensionToggles,
    #[serde(default)]
    pub strip_paths: bool,
    #[serde(default)]
    pub sort_lines: bool,
}

/// Pre-classifies divergences already triaged as expected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownDifference {
    /// Substring of the input label.
    pub input_pattern: String,
    /// Restricts the entry to one dimension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<Dimension>,
    #[serde(default)]
    pub note: String,
}

impl KnownDifference {
    fn covers(&self, input: &str, differences: &[Difference]) -> bool {
        input.contains(&self.input_pattern)
            && self
                .dimension
                .is_none_or(|dim| differences.iter().any(|d| d.dimension == dim))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifferentialConfig {
    #[serde(default)]
    pub implementations: BTreeMap<String, ImplementationConfig>,
    #[serde(default)]
    pub comparisons: BTreeMap<String, Comparison>,
    #[serde(default)]
    pub groups: BTreeMap<String, Group>,
    #[serde(default)]
    pub known_differences: Vec<KnownDifference>,
}

impl DifferentialConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolve the implementation set: explicit names win, then the group,
    /// then [`DEFAULT_GROUP`].
    pub fn resolve_implementations(
        &self,
        impls: &[String],
        group: Option<&str>,
    ) -> Result<Vec<String>, ConfigError> {
        let names = if !impls.is_empty() {
            impls.to_vec()
        } else {
            let group_name = group.unwrap_or(DEFAULT_GROUP);
            match self.groups.get(group_name) {
                Some(found) => found.implementations.clone(),
                None if group.is_some() => {
                    return Err(ConfigError::UnknownGroup(group_name.to_string()));
                }
                None => Vec::new(),
            }
        };
        if let Some(unknown) = names
            .iter()
            .find(|name| !self.implementations.contains_key(*name))
        {
            return Err(ConfigError::UnknownImplementation(unknown.clone()));
        }
        reject_duplicates(names.iter().map(String::as_str))?;
        if names.len() < 2 {
            return Err(ConfigError::TooFewImplementations(names.len()));
        }
        Ok(names)
    }

    /// Look up a comparison. [`DEFAULT_COMPARISON`] falls back to the
    /// default dimensions when the config does not define it.
    pub fn comparison(&self, name: &str) -> Result<Comparison, ConfigError> {
        match self.comparisons.get(name) {
            Some(comparison) => Ok(*comparison),
            None if name == DEFAULT_COMPARISON => Ok(Comparison::default()),
            None => Err(ConfigError::UnknownComparison(name.to_string())),
        }
    }

    /// Build one executor per name, rejecting empty command templates.
    pub fn executors(
        &self,
        names: &[String],
        default_timeout: Duration,
    ) -> Result<Vec<SubprocessExecutor>, ConfigError> {
        names
            .iter()
            .map(|name| {
                let implementation = self
                    .implementations
                    .get(name)
                    .ok_or_else(|| ConfigError::UnknownImplementation(name.clone()))?;
                for kind in [TestKind::Syntax, TestKind::Validation, TestKind::Query] {
                    if implementation
                        .commands
                        .for_kind(kind)
                        .is_some_and(CommandTemplate::is_empty)
                    {
                        return Err(ConfigError::EmptyCommand {
                            implementation: name.clone(),
                            kind,
                        });
                    }
                }
                let timeout = implementation
                    .timeout_secs
                    .map_or(default_timeout, Duration::from_secs);
                Ok(SubprocessExecutor::new(name.clone(), implementation.commands.clone())
                    .with_timeout(timeout))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Comparator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Overall success agreement.
    ExitCode,
    /// Error-presence agreement.
    HasErrors,
    ErrorCount,
    /// Stdout equality after normalization.
    Output,
}

impl Dimension {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExitCode => "exit_code",
            Self::HasErrors => "has_errors",
            Self::ErrorCount => "error_count",
            Self::Output => "output",
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Difference {
    pub dimension: Dimension,
    pub message: String,
}

/// Apply the comparison's normalization flags to captured output.
#[must_use]
pub fn normalize(output: &str, comparison: &Comparison) -> String {
    let mut lines: Vec<&str> = output.trim().lines().collect();
    if comparison.strip_paths {
        lines = lines
            .into_iter()
            .map(|line| line.rsplit(':').next().unwrap_or(line))
            .collect();
    }
    if comparison.sort_lines {
        lines.sort_unstable();
    }
    lines.join("\n")
}

/// Diff every enabled dimension across `outcomes`. An empty result means the
/// implementations agree.
#[must_use]
pub fn compare(outcomes: &[Outcome], comparison: &Comparison) -> Vec<Difference> {
    let mut differences = Vec::new();
    let Some((first, rest)) = outcomes.split_first() else {
        return differences;
    };
    let a = &first.implementation;
    let toggles = &comparison.compare;

    for other in rest {
        let b = &other.implementation;
        if toggles.exit_code && first.exited_cleanly() != other.exited_cleanly() {
            differences.push(Difference {
                dimension: Dimension::ExitCode,
                message: format!(
                    "Exit status differs: {a}={}, {b}={}",
                    first.exited_cleanly(),
                    other.exited_cleanly()
                ),
            });
        }
        if toggles.has_errors && first.has_errors() != other.has_errors() {
            differences.push(Difference {
                dimension: Dimension::HasErrors,
                message: format!(
                    "Error presence differs: {a}={}, {b}={}",
                    first.has_errors(),
                    other.has_errors()
                ),
            });
        }
        if toggles.error_count && first.diagnostics.len() != other.diagnostics.len() {
            differences.push(Difference {
                dimension: Dimension::ErrorCount,
                message: format!(
                    "Error count differs: {a}={}, {b}={}",
                    first.diagnostics.len(),
                    other.diagnostics.len()
                ),
            });
        }
        if toggles.output
            && normalize(&first.stdout, comparison) != normalize(&other.stdout, comparison)
        {
            differences.push(Difference {
                dimension: Dimension::Output,
                message: format!("Output differs: {a} vs {b}"),
            });
        }
    }
    differences
}

// ---------------------------------------------------------------------------
// Divergence records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    /// Not yet triaged.
    #[default]
    Unclassified,
    KnownDifference,
    Regression,
    ToolingBug,
}

#[derive(Debug, Clone, Serialize)]
pub struct Divergence {
    pub id: String,
    pub input: String,
    pub input_sha256: String,
    /// Name of the comparison that produced the differences.
    pub dimension: String,
    pub differences: Vec<Difference>,
    pub implementations: BTreeMap<String, serde_json::Value>,
    pub classification: Classification,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputError {
    pub input: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunInfo {
    pub timestamp: String,
    pub implementations: Vec<String>,
    pub input_count: usize,
    pub comparison: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DifferentialSummary {
    pub total_inputs: usize,
    pub matching: usize,
    pub diverging: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DifferentialReport {
    pub run: RunInfo,
    pub summary: DifferentialSummary,
    pub divergences: Vec<Divergence>,
    pub errors: Vec<InputError>,
}

impl DifferentialReport {
    /// No divergences and no orchestration errors.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.summary.diverging == 0 && self.summary.errors == 0
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    File(PathBuf),
    Inline(String),
}

/// One ledger to feed every implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DifferentialInput {
    /// Path for discovered files, test id for catalogue inputs.
    pub label: String,
    pub source: InputSource,
    pub kind: TestKind,
    pub query: Option<String>,
}

impl DifferentialInput {
    /// A discovered ledger file, checked as a syntax input.
    #[must_use]
    pub fn file(path: PathBuf) -> Self {
        Self {
            label: path.display().to_string(),
            source: InputSource::File(path),
            kind: TestKind::Syntax,
            query: None,
        }
    }

    /// A catalogue test's resolved input, keeping its kind and query.
    #[must_use]
    pub fn from_case(case: &TestCase) -> Self {
        let source = match (&case.input.inline, case.input.file_path(&case.suite_dir)) {
            (Some(text), _) => InputSource::Inline(text.clone()),
            (None, Some(path)) => InputSource::File(path),
            (None, None) => InputSource::Inline(String::new()),
        };
        Self {
            label: case.id.clone(),
            source,
            kind: case.kind,
            query: case.input.query.clone(),
        }
    }
}

/// Find ledger inputs.
///
/// `conformance` scans the parent of `config_dir`; any other value is a file
/// or directory, taken as given when it exists and relative to `config_dir`
/// otherwise. Results are sorted.
pub fn discover_inputs(source: &str, config_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let root = if source == "conformance" {
        config_dir.parent().unwrap_or(config_dir).to_path_buf()
    } else if Path::new(source).exists() {
        PathBuf::from(source)
    } else {
        config_dir.join(source)
    };

    let mut files = Vec::new();
    if root.is_file() {
        files.push(root);
    } else if root.is_dir() {
        collect_ledgers(&root, &mut files)?;
    }
    files.sort();
    Ok(files)
}

fn collect_ledgers(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_ledgers(&path, files)?;
        } else if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| INPUT_EXTENSIONS.contains(&ext))
        {
            files.push(path);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Everything observed for one input.
#[derive(Debug, Clone)]
pub struct InputCheck {
    pub sha256: String,
    pub outcomes: Vec<Outcome>,
    pub differences: Vec<Difference>,
}

impl InputCheck {
    #[must_use]
    pub fn matches(&self) -> bool {
        self.differences.is_empty()
    }
}

pub struct DifferentialRunner {
    executors: Vec<SubprocessExecutor>,
    comparison_name: String,
    comparison: Comparison,
    known_differences: Vec<KnownDifference>,
}

/// Divergence records key outcomes by implementation name, so every name in
/// a run must be distinct.
fn reject_duplicates<'a>(names: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConfigError::DuplicateImplementation(name.to_string()));
        }
    }
    Ok(())
}

impl DifferentialRunner {
    pub fn new(
        executors: Vec<SubprocessExecutor>,
        comparison_name: impl Into<String>,
        comparison: Comparison,
    ) -> Result<Self, ConfigError> {
        reject_duplicates(executors.iter().map(Executor::name))?;
        if executors.len() < 2 {
            return Err(ConfigError::TooFewImplementations(executors.len()));
        }
        Ok(Self {
            executors,
            comparison_name: comparison_name.into(),
            comparison,
            known_differences: Vec::new(),
        })
    }

    /// Resolve implementations and comparison from `config`.
    pub fn from_config(
        config: &DifferentialConfig,
        names: &[String],
        comparison_name: &str,
        default_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let comparison = config.comparison(comparison_name)?;
        let executors = config.executors(names, default_timeout)?;
        Ok(Self::new(executors, comparison_name, comparison)?
            .with_known_differences(config.known_differences.clone()))
    }

    #[must_use]
    pub fn with_known_differences(mut self, known: Vec<KnownDifference>) -> Self {
        self.known_differences = known;
        self
    }

    #[must_use]
    pub fn implementation_names(&self) -> Vec<String> {
        self.executors
            .iter()
            .map(|executor| executor.name().to_string())
            .collect()
    }

    /// Run every implementation on `input` and diff the outcomes.
    pub fn check_input(&self, input: &DifferentialInput) -> Result<InputCheck, DifferentialFault> {
        for executor in &self.executors {
            if executor.commands().for_kind(input.kind).is_none() {
                return Err(DifferentialFault::MissingCommand {
                    implementation: executor.name().to_string(),
                    kind: input.kind,
                });
            }
        }

        let (file, sha256) = match &input.source {
            InputSource::File(path) => {
                let bytes = std::fs::read(path).map_err(|source| DifferentialFault::Input {
                    path: path.clone(),
                    source,
                })?;
                (InputFile::Existing(path.clone()), sha256_hex(&bytes))
            }
            InputSource::Inline(text) => (
                InputFile::from_text(text).map_err(DifferentialFault::Materialize)?,
                sha256_hex(text.as_bytes()),
            ),
        };

        let outcomes = self
            .executors
            .iter()
            .map(|executor| {
                executor
                    .run_on(input.kind, file.path(), input.query.as_deref())
                    .map_err(|source| DifferentialFault::Execution {
                        implementation: executor.name().to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let differences = compare(&outcomes, &self.comparison);
        Ok(InputCheck {
            sha256,
            outcomes,
            differences,
        })
    }

    /// Check every input and assemble the report. `observe` sees each
    /// input's result as it completes.
    pub fn run(
        &self,
        inputs: &[DifferentialInput],
        timestamp: String,
        mut observe: impl FnMut(usize, &DifferentialInput, &Result<InputCheck, DifferentialFault>),
    ) -> DifferentialReport {
        let mut summary = DifferentialSummary {
            total_inputs: inputs.len(),
            ..DifferentialSummary::default()
        };
        let mut divergences = Vec::new();
        let mut errors = Vec::new();

        for (index, input) in inputs.iter().enumerate() {
            let result = self.check_input(input);
            observe(index, input, &result);
            match result {
                Ok(check) if check.matches() => summary.matching += 1,
                Ok(check) => {
                    summary.diverging += 1;
                    let id = format!("div-{:03}", divergences.len() + 1);
                    divergences.push(self.divergence(id, input, check));
                }
                Err(fault) => {
                    summary.errors += 1;
                    errors.push(InputError {
                        input: input.label.clone(),
                        message: fault.to_string(),
                    });
                }
            }
        }

        DifferentialReport {
            run: RunInfo {
                timestamp,
                implementations: self.implementation_names(),
                input_count: inputs.len(),
                comparison: self.comparison_name.clone(),
            },
            summary,
            divergences,
            errors,
        }
    }

    fn divergence(&self, id: String, input: &DifferentialInput, check: InputCheck) -> Divergence {
        let mut notes = check
            .differences
            .iter()
            .map(|d| d.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        let known = self
            .known_differences
            .iter()
            .find(|known| known.covers(&input.label, &check.differences));
        let classification = match known {
            Some(known) => {
                if !known.note.is_empty() {
                    let _ = write!(notes, " (known: {})", known.note);
                }
                Classification::KnownDifference
            }
            None => Classification::Unclassified,
        };
        Divergence {
            id,
            input: input.label.clone(),
            input_sha256: check.sha256,
            dimension: self.comparison_name.clone(),
            implementations: check
                .outcomes
                .iter()
                .map(|outcome| (outcome.implementation.clone(), outcome.summary_json()))
                .collect(),
            differences: check.differences,
            classification,
            notes,
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(out, "{b:02x}");
    }
    out
}
