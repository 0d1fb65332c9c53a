//! Driving a suite tree
//!
//! The runner executes what the registrars declared. Tests run one at a time.
//! Each suite gets a context cloned from its parent's after the parent's
//! suite-scoped setups ran; each test gets a fresh clone of its suite's
//! context. Test-scoped phases of every enclosing suite run for every test,
//! outermost first, and are torn down innermost first.

use crate::context::ExecutionContext;
use crate::error::FixtureError;
use crate::lifecycle::{run_setups, run_teardowns, Phase, ScopeKind, Suite, TestCase};
use futures::future::{BoxFuture, FutureExt};
use std::fmt;

/// Final state of one test
#[derive(Debug, Clone)]
pub enum TestStatus {
    /// Setups, body and assertions all succeeded
    Passed,
    /// The body reported an assertion failure
    Failed(FixtureError),
    /// A setup (suite- or test-scoped) or the body failed with a
    /// configuration or collaborator error before any assertion could decide
    Errored(FixtureError),
}

/// Result of one test, including its cleanup
#[derive(Debug, Clone)]
pub struct TestOutcome {
    /// Full title: enclosing describe titles and the test title
    pub title: String,
    /// How the test ended
    pub status: TestStatus,
    /// Test-scoped teardowns that failed after the test
    pub teardown_failures: Vec<FixtureError>,
}

impl TestOutcome {
    /// Whether the test passed and cleaned up without error
    pub fn is_success(&self) -> bool {
        matches!(self.status, TestStatus::Passed) && self.teardown_failures.is_empty()
    }

    /// The error that decided the test, if it did not pass
    pub fn error(&self) -> Option<&FixtureError> {
        match &self.status {
            TestStatus::Passed => None,
            TestStatus::Failed(error) | TestStatus::Errored(error) => Some(error),
        }
    }
}

/// Everything a run produced
#[derive(Debug, Clone, Default)]
pub struct SuiteReport {
    /// Per-test outcomes in execution order
    pub tests: Vec<TestOutcome>,
    /// Suite-scoped teardown failures, keyed by suite title
    pub suite_teardown_failures: Vec<(String, FixtureError)>,
}

impl SuiteReport {
    /// Whether every test passed and every teardown succeeded
    pub fn is_success(&self) -> bool {
        self.tests.iter().all(TestOutcome::is_success) && self.suite_teardown_failures.is_empty()
    }

    /// Look an outcome up by full title
    pub fn outcome(&self, title: &str) -> Option<&TestOutcome> {
        self.tests.iter().find(|t| t.title == title)
    }

    /// Outcomes whose title ends with `suffix`
    pub fn outcomes_ending_with<'r>(
        &'r self,
        suffix: &'r str,
    ) -> impl Iterator<Item = &'r TestOutcome> + 'r {
        self.tests.iter().filter(move |t| t.title.ends_with(suffix))
    }

    /// Tests that did not succeed
    pub fn failures(&self) -> impl Iterator<Item = &TestOutcome> {
        self.tests.iter().filter(|t| !t.is_success())
    }

    /// Number of passing tests
    pub fn passed(&self) -> usize {
        self.tests.iter().filter(|t| t.is_success()).count()
    }

    /// One-line summary
    pub fn summary(&self) -> String {
        let failed = self.tests.len() - self.passed();
        format!(
            "{} passing, {} failing, {} suite teardown failures",
            self.passed(),
            failed,
            self.suite_teardown_failures.len()
        )
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.tests {
            match &outcome.status {
                TestStatus::Passed => writeln!(f, "  ok      {}", outcome.title)?,
                TestStatus::Failed(e) => writeln!(f, "  FAILED  {}: {e}", outcome.title)?,
                TestStatus::Errored(e) => writeln!(f, "  ERROR   {}: {e}", outcome.title)?,
            }
            for e in &outcome.teardown_failures {
                writeln!(f, "          teardown: {e}")?;
            }
        }
        for (suite, e) in &self.suite_teardown_failures {
            writeln!(f, "  suite teardown ({suite}): {e}")?;
        }
        write!(f, "{}", self.summary())
    }
}

impl Suite {
    /// Run every test of this suite and its nested blocks
    pub async fn run(&self) -> SuiteReport {
        let mut report = SuiteReport::default();
        run_suite(self, ExecutionContext::new(), Vec::new(), Vec::new(), &mut report).await;
        tracing::info!(summary = %report.summary(), suite = %self.title, "suite finished");
        report
    }
}

fn join_title(path: &[String], title: &str) -> String {
    path.iter()
        .map(String::as_str)
        .chain(std::iter::once(title))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn run_suite<'s>(
    suite: &'s Suite,
    mut ctx: ExecutionContext,
    parent_path: Vec<String>,
    inherited: Vec<Phase>,
    report: &'s mut SuiteReport,
) -> BoxFuture<'s, ()> {
    async move {
        let mut path = parent_path;
        path.push(suite.title.clone());

        let setup = run_setups(&suite.suite_phases, &mut ctx, ScopeKind::Suite).await;

        match setup.failure {
            Some(error) => mark_errored(suite, &path[..path.len() - 1], &error, report),
            None => {
                let mut test_phases = inherited;
                test_phases.extend(suite.test_phases.iter().cloned());

                for test in &suite.tests {
                    let outcome = run_test(test, &ctx, &path, &test_phases).await;
                    report.tests.push(outcome);
                }

                for child in &suite.children {
                    run_suite(
                        child,
                        ctx.clone(),
                        path.clone(),
                        test_phases.clone(),
                        &mut *report,
                    )
                    .await;
                }
            }
        }

        let failures = run_teardowns(setup.armed, &mut ctx, ScopeKind::Suite).await;
        let title = join_title(&path, "");
        report
            .suite_teardown_failures
            .extend(failures.into_iter().map(|e| (title.clone(), e)));
    }
    .boxed()
}

async fn run_test(
    test: &TestCase,
    suite_ctx: &ExecutionContext,
    path: &[String],
    phases: &[Phase],
) -> TestOutcome {
    let title = join_title(path, &test.title);
    let mut ctx = suite_ctx.clone();

    let setup = run_setups(phases, &mut ctx, ScopeKind::Test).await;
    let status = match setup.failure {
        Some(error) => TestStatus::Errored(error),
        None => match (test.body)(&mut ctx).await {
            Ok(()) => TestStatus::Passed,
            Err(error) if error.is_assertion() => TestStatus::Failed(error),
            Err(error) => TestStatus::Errored(error),
        },
    };

    match &status {
        TestStatus::Passed => tracing::debug!(test = %title, "test passed"),
        TestStatus::Failed(e) => tracing::warn!(test = %title, error = %e, "test failed"),
        TestStatus::Errored(e) => tracing::warn!(test = %title, error = %e, "test errored"),
    }

    let teardown_failures = run_teardowns(setup.armed, &mut ctx, ScopeKind::Test).await;
    TestOutcome {
        title,
        status,
        teardown_failures,
    }
}

fn mark_errored(
    suite: &Suite,
    parent_path: &[String],
    error: &FixtureError,
    report: &mut SuiteReport,
) {
    let mut path = parent_path.to_vec();
    path.push(suite.title.clone());
    for test in &suite.tests {
        report.tests.push(TestOutcome {
            title: join_title(&path, &test.title),
            status: TestStatus::Errored(error.clone()),
            teardown_failures: Vec::new(),
        });
    }
    for child in &suite.children {
        mark_errored(child, &path, error, report);
    }
}
