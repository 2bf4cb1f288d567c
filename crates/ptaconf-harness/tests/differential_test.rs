//! Integration tests: differential mode with shell-script implementations.
//!
//! Each fake implementation is `sh -c <script> sh <file>`, so the input path
//! arrives as `$1` without any shell interpolation of the template.
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use ptaconf_harness::differential::{
    Classification, DifferentialConfig, DifferentialInput, DifferentialRunner, Dimension,
    InputSource, discover_inputs,
};
use ptaconf_harness::model::TestKind;

const LENIENT: &str = "exit 0";
const STRICT: &str =
    "if grep -q frobnicate \"$1\"; then echo \"$1:1: bad directive\" >&2; exit 1; fi; exit 0";
const JSON_COUNTER: &str = "n=$(grep -c frobnicate \"$1\"); if [ \"$n\" -gt 0 ]; then printf '{\"errors\":[{\"message\":\"bad directive\",\"type\":\"ParserError\"}]}'; exit 1; fi; printf '{\"errors\":[]}'";

fn sh(script: &str) -> serde_json::Value {
    serde_json::json!(["sh", "-c", script, "sh", "{file}"])
}

fn write_fixture(root: &Path) -> PathBuf {
    let inputs = root.join("inputs");
    std::fs::create_dir_all(inputs.join("nested")).unwrap();
    std::fs::write(
        inputs.join("good.beancount"),
        "2024-01-01 open Assets:Cash\n",
    )
    .unwrap();
    std::fs::write(
        inputs.join("nested/bad.beancount"),
        "2024-01-01 frobnicate Assets:Cash\n",
    )
    .unwrap();
    std::fs::write(inputs.join("README.md"), "not a ledger\n").unwrap();

    let config_dir = root.join("differential");
    std::fs::create_dir_all(&config_dir).unwrap();
    let config = serde_json::json!({
        "implementations": {
            "lenient": {"commands": {"check": sh(LENIENT)}},
            "strict": {"commands": {"check": sh(STRICT)}},
            "counter": {"commands": {"check": sh(JSON_COUNTER)}},
        },
        "comparisons": {
            "counts": {"compare": {"exit_code": false, "has_errors": false, "error_count": true}}
        },
        "groups": {
            "beancount": {"implementations": ["lenient", "strict"]},
            "agreeing": {"implementations": ["strict", "counter"]}
        },
        "known_differences": [
            {"input_pattern": "nested/", "dimension": "exit_code", "note": "lenient tool ignores unknown directives"}
        ]
    });
    let path = config_dir.join("config.json");
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    path
}

fn runner(config: &DifferentialConfig, names: &[&str], comparison: &str) -> DifferentialRunner {
    let names: Vec<String> = names.iter().map(|n| (*n).to_string()).collect();
    DifferentialRunner::from_config(config, &names, comparison, Duration::from_secs(10)).unwrap()
}

#[test]
fn divergence_is_recorded_and_classified() {
    let root = tempfile::tempdir().unwrap();
    let config_path = write_fixture(root.path());
    let config = DifferentialConfig::from_file(&config_path).unwrap();
    let inputs: Vec<DifferentialInput> =
        discover_inputs("conformance", config_path.parent().unwrap())
            .unwrap()
            .into_iter()
            .map(DifferentialInput::file)
            .collect();
    assert_eq!(inputs.len(), 2);

    let names = config.resolve_implementations(&[], None).unwrap();
    assert_eq!(names, ["lenient", "strict"]);
    let runner = runner(&config, &["lenient", "strict"], "parse");

    let mut seen = Vec::new();
    let report = runner.run(&inputs, "2026-01-01T00:00:00Z".into(), |index, input, result| {
        seen.push((index, input.label.clone(), result.is_ok()));
    });
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|(_, _, ok)| *ok));

    assert_eq!(report.summary.total_inputs, 2);
    assert_eq!(report.summary.matching, 1);
    assert_eq!(report.summary.diverging, 1);
    assert_eq!(report.summary.errors, 0);
    assert!(!report.is_clean());

    let divergence = &report.divergences[0];
    assert_eq!(divergence.id, "div-001");
    assert!(divergence.input.ends_with("nested/bad.beancount"));
    assert_eq!(divergence.input_sha256.len(), 64);
    assert_eq!(divergence.dimension, "parse");
    let dims: Vec<Dimension> = divergence.differences.iter().map(|d| d.dimension).collect();
    assert_eq!(dims, [Dimension::ExitCode, Dimension::HasErrors]);
    assert_eq!(divergence.classification, Classification::KnownDifference);
    assert!(divergence.notes.starts_with("Exit status differs: lenient=true, strict=false"));
    assert!(divergence.notes.contains("known: lenient tool ignores unknown directives"));
    assert_eq!(divergence.implementations["strict"]["success"], false);
    assert_eq!(divergence.implementations["strict"]["error_count"], 1);
    assert_eq!(divergence.implementations["lenient"]["success"], true);
}

#[test]
fn structured_and_scraped_errors_agree_on_counts() {
    let root = tempfile::tempdir().unwrap();
    let config_path = write_fixture(root.path());
    let config = DifferentialConfig::from_file(&config_path).unwrap();
    let bad = DifferentialInput::file(root.path().join("inputs/nested/bad.beancount"));

    let parse = runner(&config, &["strict", "counter"], "parse");
    let check = parse.check_input(&bad).unwrap();
    assert!(check.matches(), "{:?}", check.differences);
    assert_eq!(check.outcomes[1].diagnostics[0].message, "bad directive");

    let counts = runner(&config, &["lenient", "counter"], "counts");
    let check = counts.check_input(&bad).unwrap();
    assert_eq!(check.differences.len(), 1);
    assert_eq!(check.differences[0].message, "Error count differs: lenient=0, counter=1");
}

#[test]
fn unreadable_input_lands_in_errors_bucket() {
    let root = tempfile::tempdir().unwrap();
    let config_path = write_fixture(root.path());
    let config = DifferentialConfig::from_file(&config_path).unwrap();
    let runner = runner(&config, &["lenient", "strict"], "parse");

    let inputs = vec![
        DifferentialInput::file(root.path().join("inputs/missing.beancount")),
        DifferentialInput {
            label: "inline-good".into(),
            source: InputSource::Inline("2024-01-01 open Assets:Cash\n".into()),
            kind: TestKind::Syntax,
            query: None,
        },
    ];
    let report = runner.run(&inputs, "t".into(), |_, _, _| {});
    assert_eq!(report.summary.errors, 1);
    assert_eq!(report.summary.matching, 1);
    assert!(report.errors[0].input.ends_with("missing.beancount"));
    assert!(report.errors[0].message.starts_with("failed to read input"));
}

#[test]
fn cli_writes_deterministic_report() {
    let root = tempfile::tempdir().unwrap();
    let config_path = write_fixture(root.path());
    let report_path = root.path().join("out/report.json");
    let log_path = root.path().join("out/differential.jsonl");

    let out = Command::new(env!("CARGO_BIN_EXE_harness"))
        .args([
            "differential",
            "--config",
            config_path.to_str().unwrap(),
            "--timestamp",
            "2026-01-01T00:00:00Z",
            "--report",
            report_path.to_str().unwrap(),
            "--log",
            log_path.to_str().unwrap(),
            "--verbose",
        ])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Testing 2 inputs with implementations: lenient, strict"));
    assert!(stderr.contains("DIVERGE"));
    assert!(stderr.contains("Results: 1 matching, 1 diverging, 0 errors"));

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["run"]["timestamp"], "2026-01-01T00:00:00Z");
    assert_eq!(report["run"]["comparison"], "parse");
    assert_eq!(
        report["run"]["implementations"],
        serde_json::json!(["lenient", "strict"])
    );
    assert_eq!(
        report["summary"],
        serde_json::json!({"total_inputs": 2, "matching": 1, "diverging": 1, "errors": 0})
    );
    assert_eq!(report["divergences"][0]["classification"], "known-difference");
    assert_eq!(report["errors"], serde_json::json!([]));

    let log = std::fs::read_to_string(&log_path).unwrap();
    let outcomes: Vec<String> = log
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            format!(
                "{}:{}",
                value["event"].as_str().unwrap(),
                value["outcome"].as_str().unwrap()
            )
        })
        .collect();
    assert_eq!(
        outcomes,
        [
            "differential_input:match",
            "differential_input:diverge",
            "differential_end:diverge"
        ]
    );
}

#[test]
fn cli_single_agreeing_file_exits_zero() {
    let root = tempfile::tempdir().unwrap();
    let config_path = write_fixture(root.path());
    let good = root.path().join("inputs/good.beancount");

    let out = Command::new(env!("CARGO_BIN_EXE_harness"))
        .args([
            "differential",
            "--config",
            config_path.to_str().unwrap(),
            "--impls",
            "lenient,strict",
            "--file",
            good.to_str().unwrap(),
        ])
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["summary"]["matching"], 1);
    assert_eq!(report["divergences"], serde_json::json!([]));
}

#[test]
fn cli_rejects_single_implementation() {
    let root = tempfile::tempdir().unwrap();
    let config_path = write_fixture(root.path());
    let out = Command::new(env!("CARGO_BIN_EXE_harness"))
        .args([
            "differential",
            "--config",
            config_path.to_str().unwrap(),
            "--impls",
            "strict",
        ])
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("TooFewImplementations"));
}
