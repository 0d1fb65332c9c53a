//! Lifecycle registration engine
//!
//! A [`Suite`] is a describe block. It owns the four registration slots the
//! builders need: once-before-suite, once-after-suite, before-each-test and
//! after-each-test. The slots of one scope kind are kept as a single ordered
//! list of [`Phase`]s so that the interleaving of setups and teardowns is
//! preserved exactly as the builders registered them.
//!
//! # Ordering
//!
//! Setups run in registration order. A teardown is *armed* once every setup
//! registered before it has completed. When the scope ends, or when a setup
//! fails, the armed teardowns run in reverse arming order. Builders register a
//! teardown right after the setup that creates the matching resource, so a
//! failed setup never arms the teardown for a resource it did not create, and
//! a builder registered later is always torn down first.
//!
//! # Two vocabularies, one engine
//!
//! [`Suite::once`] and [`Suite::each`] both return a [`Registrar`]; the only
//! difference is the [`ScopeKind`] it binds to. Every builder is written once,
//! as a `Registrar` method.

use crate::context::ExecutionContext;
use crate::error::{FixtureError, FixtureResult};
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::sync::Arc;

/// Future returned by a phase function
pub type PhaseFuture<'a> = BoxFuture<'a, FixtureResult<()>>;

/// A setup, teardown or test body: receives the scope's context by `&mut`
pub type PhaseFn =
    Arc<dyn for<'a> Fn(&'a mut ExecutionContext) -> PhaseFuture<'a> + Send + Sync>;

/// Wrap a closure as a [`PhaseFn`].
///
/// ```rust
/// use acl_testkit::lifecycle::phase;
/// use futures::FutureExt;
///
/// let set_args = phase(|ctx| {
///     async move {
///         ctx.args = vec![serde_json::json!({"foo": "bar"})];
///         Ok(())
///     }
///     .boxed()
/// });
/// # let _ = set_args;
/// ```
pub fn phase<F>(f: F) -> PhaseFn
where
    F: for<'a> Fn(&'a mut ExecutionContext) -> PhaseFuture<'a> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Which slot pair a registration binds to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// Once before / once after all tests of a suite
    Suite,
    /// Before / after every test
    Test,
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suite => f.write_str("suite"),
            Self::Test => f.write_str("test"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PhaseKind {
    Setup,
    Teardown,
}

/// One registered setup or teardown
#[derive(Clone)]
pub struct Phase {
    pub(crate) kind: PhaseKind,
    pub(crate) label: String,
    pub(crate) run: PhaseFn,
}

impl Phase {
    /// Human-readable label used in logs and reports
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether this is a setup phase
    pub fn is_setup(&self) -> bool {
        self.kind == PhaseKind::Setup
    }
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("kind", &self.kind)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// A test registered with [`Suite::it`]
#[derive(Clone)]
pub(crate) struct TestCase {
    pub(crate) title: String,
    pub(crate) body: PhaseFn,
}

/// A describe block: registration slots, tests and nested blocks
#[derive(Clone, Default)]
pub struct Suite {
    pub(crate) title: String,
    pub(crate) suite_phases: Vec<Phase>,
    pub(crate) test_phases: Vec<Phase>,
    pub(crate) tests: Vec<TestCase>,
    pub(crate) children: Vec<Suite>,
}

impl Suite {
    /// Create an empty top-level suite
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Title of this block
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Registrar bound to the once-per-suite slots
    pub fn once(&mut self) -> Registrar<'_> {
        self.scoped(ScopeKind::Suite)
    }

    /// Registrar bound to the once-per-test slots
    pub fn each(&mut self) -> Registrar<'_> {
        self.scoped(ScopeKind::Test)
    }

    /// Registrar bound to the given scope kind
    pub fn scoped(&mut self, scope: ScopeKind) -> Registrar<'_> {
        Registrar { suite: self, scope }
    }

    /// Nest a describe block; `define` registers its contents
    pub fn describe(
        &mut self,
        title: impl Into<String>,
        define: impl FnOnce(&mut Suite),
    ) -> &mut Self {
        let mut child = Suite::new(title);
        define(&mut child);
        self.children.push(child);
        self
    }

    /// Register a test body
    pub fn it<F>(&mut self, title: impl Into<String>, body: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut ExecutionContext) -> PhaseFuture<'a> + Send + Sync + 'static,
    {
        self.tests.push(TestCase {
            title: title.into(),
            body: Arc::new(body),
        });
        self
    }

    /// Register a synchronous test body that only reads the context
    pub fn check<F>(&mut self, title: impl Into<String>, body: F) -> &mut Self
    where
        F: Fn(&ExecutionContext) -> FixtureResult<()> + Send + Sync + 'static,
    {
        self.it(title, move |ctx| futures::future::ready(body(ctx)).boxed())
    }

    /// Number of tests in this block and every nested block
    pub fn test_count(&self) -> usize {
        self.tests.len() + self.children.iter().map(Suite::test_count).sum::<usize>()
    }

    /// Registered phases of one scope kind, in registration order
    pub fn phases(&self, scope: ScopeKind) -> &[Phase] {
        match scope {
            ScopeKind::Suite => &self.suite_phases,
            ScopeKind::Test => &self.test_phases,
        }
    }

    /// Nested blocks
    pub fn children(&self) -> &[Suite] {
        &self.children
    }

    fn slot(&mut self, scope: ScopeKind) -> &mut Vec<Phase> {
        match scope {
            ScopeKind::Suite => &mut self.suite_phases,
            ScopeKind::Test => &mut self.test_phases,
        }
    }
}

impl fmt::Debug for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suite")
            .field("title", &self.title)
            .field("suite_phases", &self.suite_phases)
            .field("test_phases", &self.test_phases)
            .field("tests", &self.tests.iter().map(|t| &t.title).collect::<Vec<_>>())
            .field("children", &self.children)
            .finish()
    }
}

/// Registration handle for one scope kind of one [`Suite`]
pub struct Registrar<'s> {
    pub(crate) suite: &'s mut Suite,
    pub(crate) scope: ScopeKind,
}

impl Registrar<'_> {
    /// Scope kind this registrar binds to
    pub fn scope(&self) -> ScopeKind {
        self.scope
    }

    /// Register a setup phase
    pub fn on_setup<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut ExecutionContext) -> PhaseFuture<'a> + Send + Sync + 'static,
    {
        self.push(PhaseKind::Setup, "setup", Arc::new(f))
    }

    /// Register a teardown phase
    pub fn on_teardown<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut ExecutionContext) -> PhaseFuture<'a> + Send + Sync + 'static,
    {
        self.push(PhaseKind::Teardown, "teardown", Arc::new(f))
    }

    pub(crate) fn setup_phase(&mut self, label: impl Into<String>, run: PhaseFn) -> &mut Self {
        self.push(PhaseKind::Setup, label, run)
    }

    pub(crate) fn teardown_phase(&mut self, label: impl Into<String>, run: PhaseFn) -> &mut Self {
        self.push(PhaseKind::Teardown, label, run)
    }

    fn push(&mut self, kind: PhaseKind, label: impl Into<String>, run: PhaseFn) -> &mut Self {
        let scope = self.scope;
        self.suite.slot(scope).push(Phase {
            kind,
            label: label.into(),
            run,
        });
        self
    }
}

/// Outcome of running the setups of one scope
pub(crate) struct SetupRun<'p> {
    /// Teardowns armed so far, in arming order
    pub(crate) armed: Vec<&'p Phase>,
    /// First setup failure, if any
    pub(crate) failure: Option<FixtureError>,
}

/// Run setups in order, arming teardowns as they are reached.
///
/// Stops at the first failing setup; the teardowns registered after it stay
/// unarmed.
pub(crate) async fn run_setups<'p>(
    phases: &'p [Phase],
    ctx: &mut ExecutionContext,
    scope: ScopeKind,
) -> SetupRun<'p> {
    let mut armed = Vec::new();
    for phase in phases {
        match phase.kind {
            PhaseKind::Teardown => armed.push(phase),
            PhaseKind::Setup => {
                tracing::debug!(scope = %scope, phase = %phase.label, "running setup");
                if let Err(error) = (phase.run)(ctx).await {
                    tracing::warn!(
                        scope = %scope,
                        phase = %phase.label,
                        error = %error,
                        "setup failed; skipping remaining setups"
                    );
                    return SetupRun {
                        armed,
                        failure: Some(error),
                    };
                }
            }
        }
    }
    SetupRun {
        armed,
        failure: None,
    }
}

/// Run armed teardowns in reverse order. Every teardown is attempted; the
/// failures are returned in the order they happened.
pub(crate) async fn run_teardowns(
    armed: Vec<&Phase>,
    ctx: &mut ExecutionContext,
    scope: ScopeKind,
) -> Vec<FixtureError> {
    let mut failures = Vec::new();
    for phase in armed.into_iter().rev() {
        tracing::debug!(scope = %scope, phase = %phase.label, "running teardown");
        if let Err(error) = (phase.run)(ctx).await {
            tracing::warn!(
                scope = %scope,
                phase = %phase.label,
                error = %error,
                "teardown failed; continuing cleanup"
            );
            failures.push(error);
        }
    }
    failures
}
