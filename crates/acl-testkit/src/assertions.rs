//! Terminal status checks
//!
//! Each check reads the response recorded by the last remote call. The free
//! functions return [`AssertionFailure`] so they compose inside custom test
//! bodies; the `should_*` methods register them as tests of a [`Suite`].

use crate::context::ExecutionContext;
use crate::error::{AssertionFailure, Expectation};
use crate::lifecycle::Suite;

/// Status expected from a denied call when nothing overrides it
pub const DEFAULT_DENIAL_STATUS: u16 = 401;

/// Statuses accepted as "allowed"
pub const ALLOWED_RANGE: Expectation = Expectation::Within(100, 399);

/// Statuses accepted as "rejected" when no exact code is given
pub const REJECTED_RANGE: Expectation = Expectation::Within(400, 499);

/// Status of the recorded response
pub fn recorded_status(
    ctx: &ExecutionContext,
    check: &'static str,
) -> Result<u16, AssertionFailure> {
    ctx.response()
        .map(|response| response.status)
        .ok_or(AssertionFailure::NoRecordedCall { check })
}

/// Check the recorded status against `expected`
pub fn expect_status(
    ctx: &ExecutionContext,
    check: &'static str,
    expected: Expectation,
) -> Result<(), AssertionFailure> {
    let actual = recorded_status(ctx, check)?;
    if expected.matches(actual) {
        Ok(())
    } else {
        Err(AssertionFailure::StatusMismatch {
            check,
            expected,
            actual,
        })
    }
}

/// The status a denied call must return here: the per-test override, then
/// the application's setting, then [`DEFAULT_DENIAL_STATUS`]
pub fn expected_denial_status(ctx: &ExecutionContext) -> u16 {
    ctx.denial_status
        .or_else(|| ctx.app().ok().and_then(|app| app.denial_status()))
        .unwrap_or(DEFAULT_DENIAL_STATUS)
}

/// Status in 100..=399
pub fn allowed(ctx: &ExecutionContext) -> Result<(), AssertionFailure> {
    expect_status(ctx, "should be allowed", ALLOWED_RANGE)
}

/// Status equal to [`expected_denial_status`]
pub fn denied(ctx: &ExecutionContext) -> Result<(), AssertionFailure> {
    expect_status(
        ctx,
        "should not be allowed",
        Expectation::Exactly(expected_denial_status(ctx)),
    )
}

/// Status 404
pub fn not_found(ctx: &ExecutionContext) -> Result<(), AssertionFailure> {
    expect_status(ctx, "should not be found", Expectation::Exactly(404))
}

/// Status 403
pub fn forbidden(ctx: &ExecutionContext) -> Result<(), AssertionFailure> {
    expect_status(ctx, "should be forbidden", Expectation::Exactly(403))
}

/// Status equal to `status` when given, otherwise in 400..=499
pub fn rejected(ctx: &ExecutionContext, status: Option<u16>) -> Result<(), AssertionFailure> {
    let expected = status.map_or(REJECTED_RANGE, Expectation::Exactly);
    expect_status(ctx, "should be rejected", expected)
}

/// Return early from a test body unless the recorded status is `$status`.
///
/// ```rust
/// use acl_testkit::{ensure_status, ExecutionContext, FixtureResult};
///
/// fn created(ctx: &ExecutionContext) -> FixtureResult<()> {
///     ensure_status!(ctx, 201);
///     Ok(())
/// }
/// # let _ = created;
/// ```
#[macro_export]
macro_rules! ensure_status {
    ($ctx:expr, $status:expr) => {
        $crate::assertions::expect_status(
            $ctx,
            "status",
            $crate::error::Expectation::Exactly($status),
        )?
    };
}

impl Suite {
    /// Test that the last call was allowed
    pub fn should_be_allowed(&mut self) -> &mut Self {
        self.check("should be allowed", |ctx| Ok(allowed(ctx)?))
    }

    /// Test that the last call was denied
    pub fn should_be_denied(&mut self) -> &mut Self {
        self.check("should not be allowed", |ctx| Ok(denied(ctx)?))
    }

    /// Test that the last call returned 404
    pub fn should_not_be_found(&mut self) -> &mut Self {
        self.check("should not be found", |ctx| Ok(not_found(ctx)?))
    }

    /// Test that the last call returned 403
    pub fn should_be_forbidden(&mut self) -> &mut Self {
        self.check("should be forbidden", |ctx| Ok(forbidden(ctx)?))
    }

    /// Test that the last call was rejected, optionally with an exact status
    pub fn should_be_rejected(&mut self, status: Option<u16>) -> &mut Self {
        let title = match status {
            Some(code) => format!("should be rejected with status code {code}"),
            None => "should be rejected".to_string(),
        };
        self.check(title, move |ctx| Ok(rejected(ctx, status)?))
    }
}
