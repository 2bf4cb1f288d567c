//! Subprocess-bound executor.
//!
//! Commands are argument vectors rendered element-wise; nothing goes through
//! a shell. Each child runs under its own wall-clock bound. On unix it leads
//! its own process group, and an overrun kills the whole group so that
//! grandchildren holding the output pipes cannot outlive the bound.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExecutionFault;
use crate::model::{TestCase, TestKind};
use crate::outcome::{Diagnostic, Outcome, PhaseState};

use super::{DEFAULT_TIMEOUT, Executor, InputFile};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long output drains may linger once the child has been reaped.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// An argument vector with `{file}` and `{query}` placeholders.
///
/// Accepts either a JSON array or a whitespace-separated string. A string is
/// split before substitution, so a substituted value stays one argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandTemplate {
    Argv(Vec<String>),
    Line(String),
}

impl CommandTemplate {
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        match self {
            Self::Argv(argv) => argv.clone(),
            Self::Line(line) => line.split_whitespace().map(str::to_string).collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.argv().is_empty()
    }

    #[must_use]
    pub fn render(&self, file: &Path, query: Option<&str>) -> Vec<String> {
        let file = file.display().to_string();
        let query = query.unwrap_or_default();
        self.argv()
            .into_iter()
            .map(|arg| arg.replace("{file}", &file).replace("{query}", query))
            .collect()
    }
}

/// Commands for each test kind. `check` covers syntax and validation unless
/// a kind-specific command overrides it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSet {
    #[serde(default, alias = "parse", skip_serializing_if = "Option::is_none")]
    pub check: Option<CommandTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syntax: Option<CommandTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<CommandTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<CommandTemplate>,
}

impl CommandSet {
    #[must_use]
    pub fn for_kind(&self, kind: TestKind) -> Option<&CommandTemplate> {
        match kind {
            TestKind::Syntax => self.syntax.as_ref().or(self.check.as_ref()),
            TestKind::Validation => self.validation.as_ref().or(self.check.as_ref()),
            TestKind::Query => self.query.as_ref(),
        }
    }

    /// The `<bin> check --json <file>` / `<bin> query <file> <query> --json`
    /// protocol.
    #[must_use]
    pub fn json_protocol(binary: &str) -> Self {
        let argv = |parts: &[&str]| {
            CommandTemplate::Argv(parts.iter().map(|part| (*part).to_string()).collect())
        };
        Self {
            check: Some(argv(&[binary, "check", "--json", "{file}"])),
            syntax: None,
            validation: None,
            query: Some(argv(&[binary, "query", "{file}", "{query}", "--json"])),
        }
    }
}

/// Raw result of one child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessRun {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

/// Drives an external implementation's command-line entry point.
#[derive(Debug, Clone)]
pub struct SubprocessExecutor {
    name: String,
    commands: CommandSet,
    timeout: Duration,
}

impl SubprocessExecutor {
    #[must_use]
    pub fn new(name: impl Into<String>, commands: CommandSet) -> Self {
        Self {
            name: name.into(),
            commands,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn json_protocol(name: impl Into<String>, binary: &str) -> Self {
        Self::new(name, CommandSet::json_protocol(binary))
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn commands(&self) -> &CommandSet {
        &self.commands
    }

    /// Run the command for `kind` against `file` and interpret its output.
    pub fn run_on(
        &self,
        kind: TestKind,
        file: &Path,
        query: Option<&str>,
    ) -> Result<Outcome, ExecutionFault> {
        let template = self
            .commands
            .for_kind(kind)
            .ok_or(ExecutionFault::NoCommand { kind })?;
        let argv = template.render(file, query);
        let program = argv.first().cloned().unwrap_or_default();

        let run = match run_process(&argv, self.timeout) {
            Ok(run) => run,
            Err(ExecutionFault::Spawn { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                return Ok(Outcome::synthetic_failure(
                    &self.name,
                    format!("Binary not found: {program}"),
                ));
            }
            Err(fault) => return Err(fault),
        };

        if run.timed_out {
            let mut outcome = Outcome::synthetic_failure(
                &self.name,
                format!("Timeout after {} seconds", self.timeout.as_secs_f64()),
            );
            outcome.timed_out = true;
            outcome.exit_code = run.exit_code;
            outcome.stdout = run.stdout;
            outcome.stderr = run.stderr;
            outcome.duration = run.duration;
            return Ok(outcome);
        }
        Ok(interpret(&self.name, kind, run))
    }
}

impl Executor for SubprocessExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn observe(&self, case: &TestCase) -> Result<Outcome, ExecutionFault> {
        if self.commands.for_kind(case.kind).is_none() {
            return Err(ExecutionFault::NoCommand { kind: case.kind });
        }
        let input = InputFile::materialize(case)?;
        self.run_on(case.kind, input.path(), case.input.query.as_deref())
    }
}

/// Spawn `argv` with piped output and wait at most `timeout`.
pub fn run_process(argv: &[String], timeout: Duration) -> Result<ProcessRun, ExecutionFault> {
    let Some((program, args)) = argv.split_first() else {
        return Err(ExecutionFault::Spawn {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        });
    };
    let started = Instant::now();
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    std::os::unix::process::CommandExt::process_group(&mut command, 0);
    let mut child = command
        .spawn()
        .map_err(|source| ExecutionFault::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let wait_err = |source| ExecutionFault::Wait {
        program: program.clone(),
        source,
    };

    let (status, timed_out) = loop {
        match child.try_wait().map_err(wait_err)? {
            Some(status) => break (status, false),
            None if started.elapsed() >= timeout => {
                kill_tree(&mut child);
                let status = child.wait().map_err(wait_err)?;
                break (status, true);
            }
            None => thread::sleep(POLL_INTERVAL),
        }
    };

    let drain_deadline = Instant::now() + DRAIN_GRACE;
    Ok(ProcessRun {
        exit_code: status.code(),
        stdout: stdout.collect(drain_deadline),
        stderr: stderr.collect(drain_deadline),
        timed_out,
        duration: started.elapsed(),
    })
}

/// Kill the child and, on unix, every process in its group. Either may
/// already be gone by the time the signal lands.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let _ = Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
    let _ = child.kill();
}

/// Output captured from one pipe by a background reader.
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Receiver<()>,
}

impl Drain {
    /// Wait for the reader until `deadline`, then take whatever it has read.
    /// A pipe still held open by a stray grandchild is abandoned.
    fn collect(self, deadline: Instant) -> String {
        let _ = self
            .done
            .recv_timeout(deadline.saturating_duration_since(Instant::now()));
        let bytes = std::mem::take(&mut *self.buf.lock());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Drain {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let (tx, done) = mpsc::channel();
    let sink = Arc::clone(&buf);
    thread::spawn(move || {
        if let Some(mut pipe) = pipe {
            let mut chunk = [0_u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(_) => break,
                }
            }
        }
        let _ = tx.send(());
    });
    Drain { buf, done }
}

/// Turn a finished process into an [`Outcome`].
///
/// Structured stdout is preferred; free-text stderr is scraped only when
/// stdout is absent or not a JSON object.
#[must_use]
pub fn interpret(name: &str, kind: TestKind, run: ProcessRun) -> Outcome {
    let mut outcome = Outcome::new(name);
    outcome.exit_code = run.exit_code;
    outcome.duration = run.duration;
    let exited_ok = run.exit_code == Some(0);

    let structured = serde_json::from_str::<Value>(run.stdout.trim())
        .ok()
        .filter(Value::is_object);
    match &structured {
        Some(doc) => {
            if let Some(errors) = doc.get("errors").and_then(Value::as_array) {
                outcome.diagnostics = errors.iter().map(diagnostic_from_json).collect();
            }
            let query_error = doc.get("error").filter(|err| !err.is_null());
            if let Some(err) = query_error {
                outcome.diagnostics.push(diagnostic_from_json(err));
            }
            outcome.success = exited_ok && query_error.is_none();
            outcome.directive_count = ["directives", "entries"]
                .iter()
                .find_map(|key| doc.get(*key))
                .and_then(|value| match value {
                    Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
                    Value::Array(items) => Some(items.len()),
                    _ => None,
                });
            outcome.accounts = doc.get("accounts").and_then(Value::as_array).map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            });
            outcome.rows = ["rows", "results"]
                .iter()
                .find_map(|key| doc.get(*key).and_then(Value::as_array))
                .cloned();
            outcome.columns = doc.get("columns").and_then(Value::as_array).map(|cols| {
                cols.iter()
                    .filter_map(|col| {
                        col.as_str()
                            .or_else(|| col.get("name").and_then(Value::as_str))
                            .map(str::to_string)
                    })
                    .collect()
            });
        }
        None => {
            outcome.success = exited_ok;
            if !exited_ok {
                outcome.diagnostics = run
                    .stderr
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(Diagnostic::new)
                    .collect();
                if kind == TestKind::Query && outcome.diagnostics.is_empty() {
                    outcome.diagnostics.push(Diagnostic::new("Query failed"));
                }
            }
        }
    }

    let phased = outcome
        .diagnostics
        .iter()
        .any(|diag| diag.phase.is_some() || diag.error_type.is_some());
    let parse_failed = outcome.diagnostics.iter().any(Diagnostic::is_parse_phase)
        || (!phased && !outcome.success && kind != TestKind::Query);
    outcome.parse = Some(PhaseState::from_ok(!parse_failed));
    if kind == TestKind::Query {
        outcome.query = Some(PhaseState::from_ok(outcome.success));
        if outcome.success && outcome.rows.is_none() {
            outcome.rows = Some(Vec::new());
        }
    } else {
        outcome.validate = Some(PhaseState::from_ok(outcome.success));
    }

    outcome.stdout = run.stdout;
    outcome.stderr = run.stderr;
    outcome
}

fn diagnostic_from_json(value: &Value) -> Diagnostic {
    match value {
        Value::String(message) => Diagnostic::new(message.clone()),
        Value::Object(map) => {
            let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
            Diagnostic {
                message: text("message").unwrap_or_else(|| value.to_string()),
                error_type: text("type").or_else(|| text("kind")),
                phase: text("phase"),
            }
        }
        other => Diagnostic::new(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(code: i32, stdout: &str, stderr: &str) -> ProcessRun {
        ProcessRun {
            exit_code: Some(code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            ..ProcessRun::default()
        }
    }

    #[test]
    fn template_renders_elementwise() {
        let template: CommandTemplate =
            serde_json::from_str(r#""bean-query {file} {query}""#).unwrap();
        let argv = template.render(Path::new("/tmp/a b.beancount"), Some("SELECT account"));
        assert_eq!(argv, ["bean-query", "/tmp/a b.beancount", "SELECT account"]);

        let array: CommandTemplate =
            serde_json::from_str(r#"["tool","--file={file}"]"#).unwrap();
        assert_eq!(array.render(Path::new("x"), None), ["tool", "--file=x"]);
        assert!(CommandTemplate::Line("   ".into()).is_empty());
    }

    #[test]
    fn command_set_falls_back_to_check() {
        let set = CommandSet::json_protocol("rledger");
        assert_eq!(
            set.for_kind(TestKind::Validation).unwrap().argv(),
            ["rledger", "check", "--json", "{file}"]
        );
        assert_eq!(
            set.for_kind(TestKind::Query).unwrap().argv()[1],
            "query"
        );
        assert!(CommandSet::default().for_kind(TestKind::Syntax).is_none());
    }

    #[test]
    fn structured_errors_classify_phases() {
        let outcome = interpret(
            "ext",
            TestKind::Validation,
            finished(
                1,
                r#"{"errors":[{"message":"bad token","type":"LexerError"},{"message":"unbalanced","type":"ValidationError"}]}"#,
                "",
            ),
        );
        assert!(!outcome.success);
        assert_eq!(outcome.parse, Some(PhaseState::Error));
        assert_eq!(outcome.validate, Some(PhaseState::Error));
        assert_eq!(outcome.diagnostics.len(), 2);

        let validation_only = interpret(
            "ext",
            TestKind::Validation,
            finished(1, r#"{"errors":[{"message":"unknown account","phase":"validate"}]}"#, ""),
        );
        assert_eq!(validation_only.parse, Some(PhaseState::Success));
        assert_eq!(validation_only.validate, Some(PhaseState::Error));
    }

    #[test]
    fn unphased_failure_counts_as_parse_error() {
        let outcome = interpret("ext", TestKind::Syntax, finished(2, "", "line 1: syntax error\n\n"));
        assert_eq!(outcome.parse, Some(PhaseState::Error));
        assert_eq!(outcome.diagnostics, vec![Diagnostic::new("line 1: syntax error")]);
    }

    #[test]
    fn query_output_shapes() {
        let rows = interpret(
            "ext",
            TestKind::Query,
            finished(0, r#"{"columns":["account"],"results":[["Assets:Cash"]]}"#, ""),
        );
        assert_eq!(rows.query, Some(PhaseState::Success));
        assert_eq!(rows.rows.as_ref().map(Vec::len), Some(1));
        assert_eq!(rows.columns, Some(vec!["account".to_string()]));

        let failed = interpret(
            "ext",
            TestKind::Query,
            finished(0, r#"{"error":"Unknown column 'x'"}"#, ""),
        );
        assert_eq!(failed.query, Some(PhaseState::Error));
        assert_eq!(failed.first_messages(1), vec!["Unknown column 'x'"]);

        let scraped = interpret("ext", TestKind::Query, finished(3, "not json", ""));
        assert_eq!(scraped.first_messages(1), vec!["Query failed"]);

        let empty = interpret("ext", TestKind::Query, finished(0, "", ""));
        assert_eq!(empty.rows, Some(Vec::new()));
    }

    #[test]
    fn missing_binary_is_a_failed_outcome() {
        let executor = SubprocessExecutor::json_protocol("ext", "/nonexistent/ptaconf-binary");
        let outcome = executor
            .run_on(TestKind::Syntax, Path::new("ledger.beancount"), None)
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(
            outcome.first_messages(1),
            vec!["Binary not found: /nonexistent/ptaconf-binary"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn overrunning_child_is_killed() {
        let commands = CommandSet {
            check: Some(CommandTemplate::Argv(vec!["sleep".into(), "5".into()])),
            ..CommandSet::default()
        };
        let executor = SubprocessExecutor::new("slow", commands)
            .with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let outcome = executor
            .run_on(TestKind::Syntax, Path::new("ignored"), None)
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(outcome.timed_out);
        assert_eq!(outcome.first_messages(1), vec!["Timeout after 0.2 seconds"]);
    }

    #[cfg(unix)]
    #[test]
    fn executed_result_carries_process_facts() {
        use crate::model::{Expected, Input, case_for_tests};

        let case = case_for_tests(
            "exit-2",
            Input {
                inline: Some("2024-01-01 open Assets:Cash\n".into()),
                ..Input::default()
            },
            Expected::default(),
        );
        let failing = CommandSet {
            check: Some(CommandTemplate::Argv(vec![
                "sh".into(),
                "-c".into(),
                "exit 2".into(),
            ])),
            ..CommandSet::default()
        };
        let result = SubprocessExecutor::new("ext", failing).execute(&case);
        assert_eq!(result.exit_code, Some(2));
        assert!(!result.timed_out);

        let hanging = CommandSet {
            check: Some(CommandTemplate::Argv(vec!["sleep".into(), "5".into()])),
            ..CommandSet::default()
        };
        let result = SubprocessExecutor::new("ext", hanging)
            .with_timeout(Duration::from_millis(200))
            .execute(&case);
        assert!(result.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn timeout_bounds_grandchildren_holding_the_pipes() {
        let argv: Vec<String> = ["sh", "-c", "sleep 6; echo late"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        let started = Instant::now();
        let run = run_process(&argv, Duration::from_millis(300)).unwrap();
        assert!(run.timed_out);
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "took {:?}",
            started.elapsed()
        );
        assert!(!run.stdout.contains("late"));
    }

    #[cfg(unix)]
    #[test]
    fn partial_output_survives_a_timeout() {
        let argv: Vec<String> = ["sh", "-c", "echo early; sleep 6"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        let run = run_process(&argv, Duration::from_millis(500)).unwrap();
        assert!(run.timed_out);
        assert_eq!(run.stdout.trim(), "early");
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_and_streams_are_captured() {
        let argv: Vec<String> = ["sh", "-c", "echo out; echo err >&2; exit 3"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        let run = run_process(&argv, Duration::from_secs(10)).unwrap();
        assert_eq!(run.exit_code, Some(3));
        assert_eq!(run.stdout.trim(), "out");
        assert_eq!(run.stderr.trim(), "err");
        assert!(!run.timed_out);
    }
}
