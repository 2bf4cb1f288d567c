//! Integration tests: the checked-in sample catalogue against the reference
//! implementation, through the library API.

use std::path::PathBuf;

use ptaconf_harness::executor::Implementation;
use ptaconf_harness::loader::{TestFilter, load_catalogue};
use ptaconf_harness::model::{Status, TestKind};
use ptaconf_harness::runner::{RunOptions, TestRunner};

fn workspace_root() -> PathBuf {
    let manifest = env!("CARGO_MANIFEST_DIR");
    PathBuf::from(manifest)
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .to_path_buf()
}

fn manifest_path() -> PathBuf {
    workspace_root().join("tests/conformance/manifest.json")
}

#[test]
fn sample_catalogue_loads_in_manifest_order() {
    let catalogue = load_catalogue(&manifest_path()).expect("sample catalogue should load");
    assert_eq!(catalogue.manifest.format, "beancount");
    assert!(catalogue.missing_suites.is_empty());
    assert_eq!(catalogue.cases.len(), 18);

    let suites: Vec<&str> = catalogue.cases.iter().map(|c| c.suite.as_str()).collect();
    let first_validation = suites.iter().position(|s| *s == "validation").unwrap();
    let first_query = suites.iter().position(|s| *s == "query").unwrap();
    assert!(suites[..first_validation].iter().all(|s| *s == "syntax"));
    assert!(first_validation < first_query);

    for case in &catalogue.cases {
        let expected_kind = match case.suite.as_str() {
            "syntax" => TestKind::Syntax,
            "validation" => TestKind::Validation,
            _ => TestKind::Query,
        };
        assert_eq!(case.kind, expected_kind, "kind of {}", case.id);
    }
}

#[test]
fn reference_passes_sample_catalogue() {
    let catalogue = load_catalogue(&manifest_path()).unwrap();
    let selected = TestFilter::default().apply(&catalogue.cases);
    let executor = Implementation::Reference.executor();
    let report = TestRunner::new(executor.as_ref(), RunOptions::default()).run(&selected);

    let failures: Vec<_> = report
        .results
        .iter()
        .filter(|r| r.status == Status::Fail)
        .map(|r| (r.id.clone(), r.mismatch.clone()))
        .collect();
    assert!(failures.is_empty(), "unexpected failures: {failures:#?}");
    assert_eq!(report.summary.total, 18);
    assert_eq!(report.summary.passed, 17);
    assert_eq!(report.summary.skipped, 1);
    assert!(report.all_passed());

    let skipped = report.results.iter().find(|r| r.is_skipped()).unwrap();
    assert_eq!(skipped.id, "syntax-cost-basis");
    assert_eq!(
        skipped.skip_reason.as_deref(),
        Some("lot booking is not modelled by the reference scanner")
    );
}

#[test]
fn parallel_run_matches_sequential_run() {
    let catalogue = load_catalogue(&manifest_path()).unwrap();
    let selected = TestFilter::default().apply(&catalogue.cases);
    let executor = Implementation::Reference.executor();

    let sequential = TestRunner::new(executor.as_ref(), RunOptions::default()).run(&selected);
    let parallel = TestRunner::new(
        executor.as_ref(),
        RunOptions {
            jobs: 4,
            fail_fast: false,
        },
    )
    .run(&selected);

    assert_eq!(sequential.summary, parallel.summary);
    let ids = |results: &[ptaconf_harness::TestResult]| -> Vec<String> {
        results.iter().map(|r| r.id.clone()).collect()
    };
    assert_eq!(ids(&sequential.results), ids(&parallel.results));
}

#[test]
fn filters_compose() {
    let catalogue = load_catalogue(&manifest_path()).unwrap();

    let by_suite = TestFilter {
        suite: Some("query".into()),
        ..TestFilter::default()
    };
    assert_eq!(by_suite.apply(&catalogue.cases).len(), 6);

    let by_tag = TestFilter {
        tags: vec!["smoke".into()],
        ..TestFilter::default()
    };
    let smoke: Vec<&str> = by_tag
        .apply(&catalogue.cases)
        .iter()
        .map(|c| c.id.as_str())
        .collect();
    assert_eq!(
        smoke,
        [
            "syntax-minimal-transaction",
            "syntax-household-file",
            "validation-open-before-use",
            "validation-household-file",
            "query-distinct-accounts"
        ]
    );

    let narrow = TestFilter {
        suite: Some("validation".into()),
        tags: vec!["lifecycle".into()],
        ..TestFilter::default()
    };
    let selected = narrow.apply(&catalogue.cases);
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].id, "validation-use-after-close");
}
