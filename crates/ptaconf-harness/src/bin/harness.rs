//! CLI entrypoint for the ledger conformance harness.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use ptaconf_harness::differential::{
    DEFAULT_COMPARISON, DifferentialConfig, DifferentialInput, DifferentialRunner,
    discover_inputs,
};
use ptaconf_harness::executor::{DEFAULT_EXTERNAL_BIN, EXTERNAL_BIN_ENV, Implementation};
use ptaconf_harness::log::{LogEmitter, LogEntry, LogLevel, LogOutcome, now_utc, validate_log_file};
use ptaconf_harness::loader::{TestFilter, load_catalogue};
use ptaconf_harness::report::ReportFormat;
use ptaconf_harness::runner::{RunOptions, TestRunner};

/// Conformance tooling for plain-text accounting ledger implementations.
#[derive(Debug, Parser)]
#[command(name = "harness")]
#[command(about = "Conformance and differential testing for ledger implementations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ImplChoice {
    /// The in-process reference library.
    Reference,
    /// An external binary speaking the JSON check/query protocol.
    External,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the conformance catalogue against one implementation.
    Run {
        /// Path to the catalogue manifest.
        #[arg(long)]
        manifest: PathBuf,
        /// Only run suites whose name or directory matches.
        #[arg(long)]
        suite: Option<String>,
        /// Comma-separated tags; a test needs at least one.
        #[arg(long)]
        tags: Option<String>,
        /// Run a single test by id.
        #[arg(long)]
        test: Option<String>,
        /// Report format.
        #[arg(long, value_enum, default_value_t = ReportFormat::Tap)]
        format: ReportFormat,
        /// Include per-test diagnostics for passing tests too.
        #[arg(short, long)]
        verbose: bool,
        /// Stop after the first failing test.
        #[arg(long)]
        fail_fast: bool,
        /// List the selected tests without executing them.
        #[arg(long)]
        list: bool,
        /// Implementation under test.
        #[arg(long = "impl", value_enum, default_value_t = ImplChoice::Reference)]
        implementation: ImplChoice,
        /// Worker threads.
        #[arg(long, default_value_t = 1)]
        jobs: usize,
        /// External binary (defaults to $PTACONF_EXTERNAL_BIN, then `rledger`).
        #[arg(long)]
        external_bin: Option<String>,
        /// Per-process timeout for external binaries.
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
        /// Write the report here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Structured JSONL log output path.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Compare several implementations on the same inputs.
    Differential {
        /// Differential config JSON.
        #[arg(long)]
        config: PathBuf,
        /// Implementation group from the config.
        #[arg(long, conflicts_with = "impls")]
        group: Option<String>,
        /// Comma-separated implementation names.
        #[arg(long)]
        impls: Option<String>,
        /// Single input file.
        #[arg(long, conflicts_with_all = ["inputs", "manifest"])]
        file: Option<PathBuf>,
        /// `conformance`, a directory, or a file.
        #[arg(long, default_value = "conformance")]
        inputs: String,
        /// Use the resolved inputs of a catalogue instead of discovered files.
        #[arg(long)]
        manifest: Option<PathBuf>,
        /// Named comparison from the config.
        #[arg(long, default_value = DEFAULT_COMPARISON)]
        comparison: String,
        /// Write the JSON report here instead of stdout.
        #[arg(long)]
        report: Option<PathBuf>,
        /// Only test the first N inputs.
        #[arg(long)]
        limit: Option<usize>,
        /// Print per-input progress.
        #[arg(short, long)]
        verbose: bool,
        /// Optional fixed timestamp string for deterministic report generation.
        #[arg(long)]
        timestamp: Option<String>,
        /// Default per-process timeout.
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
        /// Structured JSONL log output path.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Validate a structured JSONL log.
    ValidateLog {
        /// Log file to check.
        #[arg(long)]
        log: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            manifest,
            suite,
            tags,
            test,
            format,
            verbose,
            fail_fast,
            list,
            implementation,
            jobs,
            external_bin,
            timeout_secs,
            output,
            log,
        } => {
            let catalogue = load_catalogue(&manifest)?;
            for missing in &catalogue.missing_suites {
                eprintln!("Warning: {} not found, suite skipped", missing.display());
            }

            let filter = TestFilter {
                test_id: test,
                suite,
                tags: split_list(tags.as_deref()),
            };
            let selected = filter.apply(&catalogue.cases);
            if selected.is_empty() {
                eprintln!("No tests match the given filters");
                std::process::exit(1);
            }

            if list {
                for case in &selected {
                    let skip = if case.skip { " [SKIP]" } else { "" };
                    println!("{}: {}{skip}", case.id, case.description);
                }
                println!("\nTotal: {} tests", selected.len());
                return Ok(());
            }

            let implementation = match implementation {
                ImplChoice::Reference => Implementation::Reference,
                ImplChoice::External => Implementation::External {
                    binary: external_bin
                        .or_else(|| std::env::var(EXTERNAL_BIN_ENV).ok())
                        .unwrap_or_else(|| DEFAULT_EXTERNAL_BIN.to_string()),
                    timeout: Duration::from_secs(timeout_secs),
                },
            };
            let label = implementation.label().to_string();

            let mut emitter = match &log {
                Some(path) => {
                    let run_id = format!("{label}-{}", std::process::id());
                    let mut emitter = LogEmitter::to_file(path, &run_id)?;
                    emitter.emit_entry(
                        LogEntry::new("", LogLevel::Info, "run_start")
                            .with_implementation(&label)
                            .with_details(serde_json::json!({
                                "manifest": manifest.display().to_string(),
                                "selected": selected.len(),
                                "jobs": jobs,
                            })),
                    )?;
                    Some(emitter)
                }
                None => None,
            };

            eprintln!("Running {} tests against {label}", selected.len());
            let executor = implementation.executor();
            let options = RunOptions {
                jobs: jobs.max(1),
                fail_fast,
            };
            let report = TestRunner::new(executor.as_ref(), options).run(&selected);
            if report.not_run > 0 {
                eprintln!("Fail-fast: {} tests not run", report.not_run);
            }

            if let Some(emitter) = emitter.as_mut() {
                for result in &report.results {
                    emitter.emit_entry(LogEntry::for_result(result, &label))?;
                }
                let level = if report.all_passed() {
                    LogLevel::Info
                } else {
                    LogLevel::Error
                };
                emitter.emit_entry(
                    LogEntry::new("", level, "run_end")
                        .with_implementation(&label)
                        .with_outcome(if report.all_passed() {
                            LogOutcome::Pass
                        } else {
                            LogOutcome::Fail
                        })
                        .with_details(serde_json::to_value(&report.summary)?),
                )?;
                emitter.flush()?;
            }

            let rendered = format.reporter(verbose).render(&report);
            write_or_print(output.as_deref(), &rendered)?;

            if !report.all_passed() {
                std::process::exit(1);
            }
        }
        Command::Differential {
            config,
            group,
            impls,
            file,
            inputs,
            manifest,
            comparison,
            report,
            limit,
            verbose,
            timestamp,
            timeout_secs,
            log,
        } => {
            let diff_config = DifferentialConfig::from_file(&config)?;
            let names = diff_config
                .resolve_implementations(&split_list(impls.as_deref()), group.as_deref())?;
            let runner = DifferentialRunner::from_config(
                &diff_config,
                &names,
                &comparison,
                Duration::from_secs(timeout_secs),
            )?;

            let mut selected: Vec<DifferentialInput> = if let Some(file) = file {
                vec![DifferentialInput::file(file)]
            } else if let Some(manifest) = manifest {
                load_catalogue(&manifest)?
                    .cases
                    .iter()
                    .filter(|case| !case.skip)
                    .map(DifferentialInput::from_case)
                    .collect()
            } else {
                let config_dir = config.parent().unwrap_or_else(|| Path::new("."));
                discover_inputs(&inputs, config_dir)?
                    .into_iter()
                    .map(DifferentialInput::file)
                    .collect()
            };
            if let Some(limit) = limit {
                selected.truncate(limit);
            }
            if selected.is_empty() {
                eprintln!("No input files found");
                std::process::exit(1);
            }

            eprintln!(
                "Testing {} inputs with implementations: {}",
                selected.len(),
                names.join(", ")
            );

            let mut emitter = match &log {
                Some(path) => Some(
                    LogEmitter::to_file(path, "differential")?
                        .with_fixed_timestamp(timestamp.clone()),
                ),
                None => None,
            };
            let mut log_error: Option<std::io::Error> = None;
            let total = selected.len();
            let timestamp = timestamp.unwrap_or_else(now_utc);
            let diff_report = runner.run(&selected, timestamp, |index, input, result| {
                let (outcome, detail) = match result {
                    Ok(check) if check.matches() => (LogOutcome::Match, serde_json::json!({})),
                    Ok(check) => (
                        LogOutcome::Diverge,
                        serde_json::json!({ "differences": check.differences }),
                    ),
                    Err(fault) => (
                        LogOutcome::Error,
                        serde_json::json!({ "error": fault.to_string() }),
                    ),
                };
                if verbose {
                    let status = match outcome {
                        LogOutcome::Match => "OK",
                        LogOutcome::Diverge => "DIVERGE",
                        _ => "ERROR",
                    };
                    eprintln!("[{}/{total}] {} ... {status}", index + 1, input.label);
                    match result {
                        Ok(check) => {
                            for difference in &check.differences {
                                eprintln!("  - {}", difference.message);
                            }
                        }
                        Err(fault) => eprintln!("  - {fault}"),
                    }
                }
                if let Some(emitter) = emitter.as_mut()
                    && log_error.is_none()
                {
                    let entry = LogEntry::new("", LogLevel::Info, "differential_input")
                        .with_test(&input.label)
                        .with_kind(input.kind.as_str())
                        .with_outcome(outcome)
                        .with_details(detail);
                    if let Err(err) = emitter.emit_entry(entry) {
                        log_error = Some(err);
                    }
                }
            });
            if let Some(err) = log_error {
                return Err(err.into());
            }

            let summary = diff_report.summary;
            eprintln!(
                "Results: {} matching, {} diverging, {} errors",
                summary.matching, summary.diverging, summary.errors
            );
            eprintln!("Total inputs: {}", summary.total_inputs);

            if let Some(emitter) = emitter.as_mut() {
                emitter.emit_entry(
                    LogEntry::new("", LogLevel::Info, "differential_end")
                        .with_outcome(if diff_report.is_clean() {
                            LogOutcome::Match
                        } else {
                            LogOutcome::Diverge
                        })
                        .with_details(serde_json::to_value(summary)?),
                )?;
                emitter.flush()?;
            }

            let body = diff_report.to_json()? + "\n";
            write_or_print(report.as_deref(), &body)?;
            if let Some(path) = &report {
                eprintln!("Report written to: {}", path.display());
            }

            if !diff_report.is_clean() {
                std::process::exit(1);
            }
        }
        Command::ValidateLog { log } => {
            let (lines, errors) = validate_log_file(&log)?;
            if errors.is_empty() {
                println!("{}: {lines} lines, all valid", log.display());
            } else {
                for error in &errors {
                    eprintln!("{error}");
                }
                eprintln!(
                    "{}: {} errors in {lines} lines",
                    log.display(),
                    errors.len()
                );
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn write_or_print(path: Option<&Path>, body: &str) -> std::io::Result<()> {
    match path {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, body)
        }
        None => {
            print!("{body}");
            Ok(())
        }
    }
}
