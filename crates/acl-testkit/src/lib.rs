//! Access-control testing infrastructure
//!
//! Declarative fixture chains for testing who may call what on an
//! HTTP-exposed application. Builders create records (users, roles, role
//! mappings, tokens) before a scope and destroy them afterwards, a remote
//! call is made under the resulting identity, and status checks decide
//! whether the call was allowed or denied.
//!
//! # Usage
//!
//! Add this to your crate's `Cargo.toml` dev-dependencies:
//! ```toml
//! [dev-dependencies]
//! acl-testkit = { path = "../acl-testkit" }
//! ```
//!
//! Then describe the access rules:
//! ```rust,no_run
//! use acl_testkit::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let application = InMemoryApplication::new();
//! let client = ScriptedHttpClient::new();
//! client.respond_with(Method::Get, "/widgets/:id", |request| {
//!     match request.header("Authorization") {
//!         Some(_) => HttpResponse::status(200),
//!         None => HttpResponse::status(401),
//!     }
//! });
//! let app = TestApp::new(Arc::new(application), Arc::new(client));
//!
//! let mut suite = Suite::new("widgets");
//! suite.once().with_app(app);
//! suite.should_be_denied_when_called_anonymously(RemoteCall::get("/widgets/1"));
//! suite.should_be_allowed_when_called_by_user_with_role(
//!     json!({"email": "admin@example.com", "password": "secret"}),
//!     "admin",
//!     RemoteCall::get("/widgets/1"),
//! );
//!
//! let report = suite.run().await;
//! assert!(report.is_success(), "{report}");
//! # }
//! ```

pub mod app;
pub mod assertions;
pub mod config;
pub mod context;
pub mod error;
pub mod fixtures;
pub mod http;
pub mod lifecycle;
pub mod memory;
pub mod remote;
pub mod runner;
pub mod scenario;

// Re-export commonly used items
pub use app::{Application, HttpClient, TestApp};
pub use assertions::{
    allowed, denied, expected_denial_status, forbidden, not_found, rejected,
    DEFAULT_DENIAL_STATUS,
};
pub use config::TestkitConfig;
pub use context::{
    ExecutionContext, Identity, MethodKind, MethodUnderTest, Record, RecordId, RecordedCall,
    RoleBinding,
};
pub use error::{AssertionFailure, CollaboratorError, Expectation, FixtureError, FixtureResult};
pub use fixtures::{Continuation, FixtureCell, ModelRef, RoleSpec};
pub use http::{HttpRequest, HttpResponse, Method};
pub use lifecycle::{phase, Phase, PhaseFn, PhaseFuture, Registrar, ScopeKind, Suite};
pub use memory::{InMemoryApplication, Operation, OperationKind, ScriptedHttpClient};
pub use remote::{RemoteCall, Resolvable};
pub use runner::{SuiteReport, TestOutcome, TestStatus};

#[cfg(feature = "reqwest")]
pub use http::ReqwestClient;

