//! Test execution engine.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use parking_lot::Mutex;

use crate::executor::Executor;
use crate::model::{Summary, TestCase, TestResult};

/// Dispatch settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Worker threads. `1` runs sequentially on the caller's thread.
    pub jobs: usize,
    /// Stop dispatching after the first failing result.
    pub fail_fast: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            fail_fast: false,
        }
    }
}

/// Results of one run, in catalogue order.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub implementation: String,
    pub results: Vec<TestResult>,
    pub summary: Summary,
    /// Cases never dispatched because fail-fast tripped.
    pub not_run: usize,
}

impl RunReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.summary.all_passed()
    }
}

/// Runs cases against one executor.
pub struct TestRunner<'a> {
    executor: &'a dyn Executor,
    options: RunOptions,
}

impl<'a> TestRunner<'a> {
    #[must_use]
    pub fn new(executor: &'a dyn Executor, options: RunOptions) -> Self {
        Self { executor, options }
    }

    /// Execute `cases` and collect their results in input order.
    pub fn run(&self, cases: &[&TestCase]) -> RunReport {
        let results = if self.options.jobs <= 1 || cases.len() <= 1 {
            self.run_sequential(cases)
        } else {
            self.run_parallel(cases)
        };
        RunReport {
            implementation: self.executor.name().to_string(),
            summary: Summary::from_results(&results),
            not_run: cases.len() - results.len(),
            results,
        }
    }

    fn run_sequential(&self, cases: &[&TestCase]) -> Vec<TestResult> {
        let mut results = Vec::with_capacity(cases.len());
        for case in cases {
            let result = self.executor.execute(case);
            let failed = !result.passed();
            results.push(result);
            if failed && self.options.fail_fast {
                break;
            }
        }
        results
    }

    fn run_parallel(&self, cases: &[&TestCase]) -> Vec<TestResult> {
        let next = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let collected: Mutex<Vec<(usize, TestResult)>> = Mutex::new(Vec::with_capacity(cases.len()));
        let workers = self.options.jobs.min(cases.len());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        if stop.load(Ordering::SeqCst) {
                            break;
                        }
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(case) = cases.get(index) else { break };
                        let result = self.executor.execute(case);
                        if !result.passed() && self.options.fail_fast {
                            stop.store(true, Ordering::SeqCst);
                        }
                        collected.lock().push((index, result));
                    }
                });
            }
        });

        let mut collected = collected.into_inner();
        collected.sort_by_key(|(index, _)| *index);
        collected.into_iter().map(|(_, result)| result).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::ExecutionFault;
    use crate::model::{Expected, Input, Status, case_for_tests};
    use crate::outcome::{Outcome, PhaseState};

    /// Reports parse success for every case, so only `parse: error` fails.
    struct AlwaysParses;

    impl Executor for AlwaysParses {
        fn name(&self) -> &str {
            "always-parses"
        }

        fn observe(&self, case: &TestCase) -> Result<Outcome, ExecutionFault> {
            // Stagger completion so parallel runs finish out of order.
            let delay = case.id.len() as u64 % 3;
            std::thread::sleep(Duration::from_millis(delay * 5));
            let mut outcome = Outcome::new("always-parses");
            outcome.success = true;
            outcome.parse = Some(PhaseState::Success);
            Ok(outcome)
        }
    }

    fn cases() -> Vec<TestCase> {
        let expected = |json: &str| serde_json::from_str::<Expected>(json).unwrap();
        let mut skipped = case_for_tests("skipped", Input::default(), expected("{}"));
        skipped.skip = true;
        vec![
            case_for_tests("a", Input::default(), expected(r#"{"parse":"success"}"#)),
            case_for_tests("bb", Input::default(), expected(r#"{"parse":"error"}"#)),
            skipped,
            case_for_tests("dddd", Input::default(), expected(r#"{"parse":"success"}"#)),
            case_for_tests("e", Input::default(), expected(r#"{"parse":"error"}"#)),
        ]
    }

    #[test]
    fn sequential_run_counts_statuses() {
        let owned = cases();
        let refs: Vec<&TestCase> = owned.iter().collect();
        let report = TestRunner::new(&AlwaysParses, RunOptions::default()).run(&refs);
        assert_eq!(report.summary.total, 5);
        assert_eq!(report.summary.passed, 2);
        assert_eq!(report.summary.failed, 2);
        assert_eq!(report.summary.skipped, 1);
        assert!(!report.all_passed());
        assert_eq!(report.not_run, 0);
    }

    #[test]
    fn fail_fast_stops_dispatch() {
        let owned = cases();
        let refs: Vec<&TestCase> = owned.iter().collect();
        let options = RunOptions {
            jobs: 1,
            fail_fast: true,
        };
        let report = TestRunner::new(&AlwaysParses, options).run(&refs);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[1].status, Status::Fail);
        assert_eq!(report.not_run, 3);
    }

    #[test]
    fn parallel_run_preserves_catalogue_order() {
        let owned = cases();
        let refs: Vec<&TestCase> = owned.iter().collect();
        let options = RunOptions {
            jobs: 4,
            fail_fast: false,
        };
        let parallel = TestRunner::new(&AlwaysParses, options).run(&refs);
        let sequential = TestRunner::new(&AlwaysParses, RunOptions::default()).run(&refs);
        let ids = |report: &RunReport| -> Vec<String> {
            report.results.iter().map(|r| r.id.clone()).collect()
        };
        assert_eq!(ids(&parallel), ["a", "bb", "skipped", "dddd", "e"]);
        assert_eq!(parallel.summary, sequential.summary);
    }
}
