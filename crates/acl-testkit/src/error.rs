//! Error taxonomy for fixture chains
//!
//! Three kinds of failure can end a scope or a test: a required context field
//! was never bound ([`FixtureError::Configuration`]), a collaborator operation
//! reported failure ([`FixtureError::Collaborator`]), or a terminal check did
//! not hold ([`FixtureError::Assertion`]). The first two abort the remaining
//! setups of a scope; the last is an ordinary test failure.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Result alias used by every phase function
pub type FixtureResult<T> = Result<T, FixtureError>;

/// Failure reported by the application under test or by the HTTP client.
///
/// The message and any attached details are carried verbatim so that the
/// report shows exactly what the collaborator said.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}{}", details_suffix(.details))]
pub struct CollaboratorError {
    /// Human-readable message from the collaborator
    pub message: String,
    /// Structured diagnostics (validation errors and the like)
    pub details: Option<Value>,
    /// HTTP-style status attached by the collaborator, if any
    pub status: Option<u16>,
}

fn details_suffix(details: &Option<Value>) -> String {
    match details {
        Some(details) => format!(" ({details})"),
        None => String::new(),
    }
}

impl CollaboratorError {
    /// Create an error carrying only a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
            status: None,
        }
    }

    /// Attach structured details
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach a status code
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// What a status check expected to see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// Exactly this status
    Exactly(u16),
    /// Any status in the inclusive range
    Within(u16, u16),
}

impl Expectation {
    /// Whether `status` satisfies the expectation
    pub fn matches(self, status: u16) -> bool {
        match self {
            Self::Exactly(expected) => status == expected,
            Self::Within(low, high) => (low..=high).contains(&status),
        }
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exactly(status) => write!(f, "{status}"),
            Self::Within(low, high) => write!(f, "within {low}..={high}"),
        }
    }
}

/// A terminal check whose expectation was not met
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssertionFailure {
    /// The recorded response carried the wrong status
    #[error("{check}: expected status {expected}, got {actual}")]
    StatusMismatch {
        /// Name of the check that failed
        check: &'static str,
        /// What the check wanted
        expected: Expectation,
        /// What the response carried
        actual: u16,
    },

    /// No remote call has been recorded in this context
    #[error("{check}: no remote call was recorded in this context")]
    NoRecordedCall {
        /// Name of the check that failed
        check: &'static str,
    },

    /// Free-form failure raised from a custom test body
    #[error("{0}")]
    Custom(String),
}

/// Every way a phase, a call or a check can fail
#[derive(Debug, Clone, Error)]
pub enum FixtureError {
    /// A required context field was unset when a dependent operation ran
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A create/destroy/login/send operation failed
    #[error("{operation} on {} failed: {source}", .model.as_deref().unwrap_or("<http>"))]
    Collaborator {
        /// The operation that failed (`create`, `destroy`, `login`, `send`, ...)
        operation: &'static str,
        /// The model involved, when there is one
        model: Option<String>,
        /// What the collaborator reported
        #[source]
        source: CollaboratorError,
    },

    /// A terminal check failed
    #[error(transparent)]
    Assertion(#[from] AssertionFailure),

    /// A deferred URL or payload could not be computed
    #[error("cannot resolve deferred value: {0}")]
    Resolve(String),

    /// The response declared JSON but its text did not parse
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl FixtureError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Wrap a collaborator failure, annotated with the operation and model
    pub fn collaborator(
        operation: &'static str,
        model: Option<&str>,
        source: CollaboratorError,
    ) -> Self {
        Self::Collaborator {
            operation,
            model: model.map(str::to_owned),
            source,
        }
    }

    /// Create a deferred-value resolution error
    pub fn resolve(message: impl Into<String>) -> Self {
        Self::Resolve(message.into())
    }

    /// Whether this is an assertion failure rather than a setup error
    pub fn is_assertion(&self) -> bool {
        matches!(self, Self::Assertion(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collaborator_error_surfaces_details() {
        let err = CollaboratorError::new("validation failed")
            .with_details(json!({"email": "is blank"}))
            .with_status(422);
        let wrapped = FixtureError::collaborator("create", Some("User"), err);

        let rendered = wrapped.to_string();
        assert!(rendered.contains("create on User failed"));
        assert!(rendered.contains("validation failed"));
        assert!(rendered.contains("is blank"));
    }

    #[test]
    fn test_expectation_bounds_are_inclusive() {
        let range = Expectation::Within(100, 399);
        assert!(range.matches(100));
        assert!(range.matches(399));
        assert!(!range.matches(400));
        assert!(Expectation::Exactly(404).matches(404));
        assert!(!Expectation::Exactly(404).matches(403));
    }

    #[test]
    fn test_status_mismatch_reports_both_codes() {
        let failure = AssertionFailure::StatusMismatch {
            check: "should be denied",
            expected: Expectation::Exactly(401),
            actual: 200,
        };
        assert_eq!(
            failure.to_string(),
            "should be denied: expected status 401, got 200"
        );
        assert!(FixtureError::from(failure).is_assertion());
    }
}
