#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]
//! Access-control scenarios end to end
//!
//! A protected route backed by the in-memory application: admins get 200,
//! other logged-in users get 403, callers without a usable token get 401.

use acl_testkit::{
    CollaboratorError, FixtureError, HttpResponse, InMemoryApplication, Method, Operation,
    RemoteCall, Resolvable, ScriptedHttpClient, Suite, SuiteReport, TestApp, TestStatus,
};
use assert_matches::assert_matches;
use serde_json::json;
use std::sync::Arc;

fn protected_app(application: &InMemoryApplication) -> (TestApp, ScriptedHttpClient) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let client = ScriptedHttpClient::new();
    let backend = application.clone();
    client.respond_with(Method::Get, "/widgets/:id", move |request| {
        let Some(token) = request.header("Authorization") else {
            return HttpResponse::status(401);
        };
        if backend.token(token).is_none() {
            return HttpResponse::status(401);
        }
        if backend.roles_of_token(token).iter().any(|r| r == "admin") {
            HttpResponse::json_text(200, &json!({"id": 123, "name": "gear"}))
        } else {
            HttpResponse::status(403)
        }
    });
    let app = TestApp::new(Arc::new(application.clone()), Arc::new(client.clone()));
    (app, client)
}

fn admin() -> serde_json::Value {
    json!({"email": "admin@example.com", "password": "secret"})
}

fn status_of<'r>(report: &'r SuiteReport, suffix: &'r str) -> &'r TestStatus {
    &report
        .outcomes_ending_with(suffix)
        .next()
        .unwrap_or_else(|| panic!("no test ending with `{suffix}`:\n{report}"))
        .status
}

/// Admin call carries the token and is allowed, not denied
#[tokio::test]
async fn test_admin_call_is_allowed() {
    let application = InMemoryApplication::new();
    let (app, client) = protected_app(&application);

    let mut suite = Suite::new("widgets");
    suite.once().with_app(app);
    suite.when_called_by_user_with_role(admin(), "admin", RemoteCall::get("/widgets/123"), |s| {
        s.should_be_allowed();
        s.should_be_denied();
        s.check("sends the token as Authorization", |ctx| {
            let identity = ctx.identity.as_ref().unwrap();
            let request = ctx.request().unwrap();
            assert_eq!(request.header("Authorization"), Some(identity.id().as_str()));
            assert_eq!(request.header("Accept"), Some("application/json"));
            assert_eq!(
                identity.principal.as_ref(),
                Some(&ctx.require_entity("User")?.id)
            );
            assert_eq!(ctx.response().unwrap().body, Some(json!({"id": 123, "name": "gear"})));
            Ok(())
        });
    });

    let report = suite.run().await;
    assert_matches!(status_of(&report, "should be allowed"), TestStatus::Passed);
    assert_matches!(status_of(&report, "should not be allowed"), TestStatus::Failed(_));
    assert_matches!(status_of(&report, "sends the token as Authorization"), TestStatus::Passed);
    assert_eq!(
        report.tests[0].title,
        "widgets when called by logged in user with role admin GET /widgets/123 should be allowed"
    );
    assert_eq!(client.requests().len(), 3);
    assert_eq!(application.count("User"), 0);
    assert_eq!(application.count("AccessToken"), 0);
}

/// Anonymous callers get the default denial status
#[tokio::test]
async fn test_anonymous_call_is_denied_with_401() {
    let application = InMemoryApplication::new();
    let (app, client) = protected_app(&application);

    let mut suite = Suite::new("widgets");
    suite.once().with_app(app);
    suite.when_called_anonymously(RemoteCall::get("/widgets/123"), |s| {
        s.should_be_denied();
        s.should_be_allowed();
    });

    let report = suite.run().await;
    assert_matches!(status_of(&report, "should not be allowed"), TestStatus::Passed);
    assert_matches!(status_of(&report, "should be allowed"), TestStatus::Failed(_));
    assert!(client
        .requests()
        .iter()
        .all(|r| r.header("Authorization").is_none()));
    assert_eq!(application.count("AccessToken"), 0);
}

/// Shorthands register one check inside the scenario
#[tokio::test]
async fn test_shorthands_cover_each_caller_kind() {
    let application = InMemoryApplication::new();
    let (app, _client) = protected_app(&application);

    let mut suite = Suite::new("widgets");
    suite.once().with_app(app);
    suite
        .should_be_denied_when_called_anonymously(RemoteCall::get("/widgets/1"))
        .should_be_denied_when_called_unauthenticated(RemoteCall::get("/widgets/1"))
        .should_be_allowed_when_called_by_user_with_role(
            admin(),
            "admin",
            RemoteCall::get("/widgets/1"),
        );
    suite.describe("plain users", |s| {
        s.each().with_denial_status(403);
        s.should_be_denied_when_called_by_user(admin(), RemoteCall::get("/widgets/1"));
    });

    let report = suite.run().await;
    assert_eq!(report.tests.len(), 4);
    assert!(report.is_success(), "{report}");
}

/// The application-level denial status is used when no test overrides it
#[tokio::test]
async fn test_application_denial_status_applies() {
    let application = InMemoryApplication::new().with_denial_status(403);
    let (app, _client) = protected_app(&application);

    let mut suite = Suite::new("widgets");
    suite.once().with_app(app);
    suite.when_called_by_user(admin(), RemoteCall::get("/widgets/1"), |s| {
        s.should_be_denied();
        s.should_be_forbidden();
        s.should_be_rejected(Some(403));
        s.should_not_be_found();
    });

    let report = suite.run().await;
    assert_matches!(status_of(&report, "should not be allowed"), TestStatus::Passed);
    assert_matches!(status_of(&report, "should be forbidden"), TestStatus::Passed);
    assert_matches!(status_of(&report, "with status code 403"), TestStatus::Passed);
    assert_matches!(status_of(&report, "should not be found"), TestStatus::Failed(_));
}

/// Deferred URLs and payloads read fixtures created by earlier setups
#[tokio::test]
async fn test_deferred_url_and_payload_resolve_at_call_time() {
    let application = InMemoryApplication::new();
    let client = ScriptedHttpClient::new();
    client.respond_with(Method::Put, "/widgets/:id", |request| {
        HttpResponse::status(200).with_body(request.body.clone().unwrap_or_default())
    });
    let app = TestApp::new(Arc::new(application.clone()), Arc::new(client.clone()));

    let url = Resolvable::deferred_as("/widgets/:id", |ctx| {
        Ok(format!("/widgets/{}", ctx.require_entity("gear")?.id))
    });
    let payload = Resolvable::deferred(|ctx| {
        let gear = ctx.require_entity("gear")?;
        Ok(json!({"id": gear.id.to_value(), "name": "renamed"}))
    });

    let mut suite = Suite::new("widgets");
    suite
        .each()
        .with_app(app)
        .given_model("Widget", json!({"id": 42, "name": "gear"}), "gear");
    suite.when_called_remotely(RemoteCall::put(url).with_payload(payload), |s| {
        s.should_be_allowed();
        s.check("resolved against the fixture", |ctx| {
            let request = ctx.request().unwrap();
            assert_eq!(request.url, "/widgets/42");
            assert_eq!(request.body, Some(json!({"id": 42, "name": "renamed"})));
            Ok(())
        });
    });

    assert_eq!(suite.children()[0].title(), "PUT /widgets/:id");
    let report = suite.run().await;
    assert!(report.is_success(), "{report}");
    assert_eq!(client.requests()[0].url, "/widgets/42");
}

/// A deferred URL that cannot resolve errors the test before any call
#[tokio::test]
async fn test_unresolvable_deferred_url_errors_the_test() {
    let application = InMemoryApplication::new();
    let (app, client) = protected_app(&application);

    let mut suite = Suite::new("widgets");
    suite.once().with_app(app);
    suite.when_called_remotely(
        RemoteCall::get(Resolvable::deferred(|ctx| {
            Ok(format!("/widgets/{}", ctx.require_entity("missing")?.id))
        })),
        |s| {
            s.should_be_allowed();
        },
    );

    let report = suite.run().await;
    assert_matches!(report.tests[0].status, TestStatus::Errored(FixtureError::Resolve(_)));
    assert!(client.requests().is_empty());
}

/// Transport failures surface as collaborator errors on `send`
#[tokio::test]
async fn test_send_failure_errors_the_test() {
    let application = InMemoryApplication::new();
    let (app, client) = protected_app(&application);
    client.fail_with(Some(CollaboratorError::new("connection refused")));

    let mut suite = Suite::new("widgets");
    suite.once().with_app(app);
    suite.should_be_denied_when_called_anonymously(RemoteCall::get("/widgets/1"));

    let report = suite.run().await;
    assert_matches!(
        &report.tests[0].status,
        TestStatus::Errored(FixtureError::Collaborator { operation: "send", model: None, .. })
    );
    assert_eq!(application.count("AccessToken"), 0);
}

/// Calling without a bound application is a configuration error
#[tokio::test]
async fn test_call_without_app_is_configuration_error() {
    let mut suite = Suite::new("unbound");
    suite.when_called_remotely(RemoteCall::get("/widgets/1"), |s| {
        s.should_be_allowed();
    });

    let report = suite.run().await;
    assert_matches!(report.tests[0].status, TestStatus::Errored(FixtureError::Configuration(_)));
}

/// Method blocks record the method under test and its arguments
#[tokio::test]
async fn test_method_blocks_record_method_and_args() {
    let mut suite = Suite::new("Widget");
    suite.static_method("find", |s| {
        s.each().with_args(vec![json!({"where": {"name": "gear"}})]);
        s.check("records static method", |ctx| {
            let method = ctx.method.as_ref().unwrap();
            assert_eq!(method.name, "find");
            assert_eq!(method.kind, acl_testkit::MethodKind::Static);
            assert_eq!(ctx.args.len(), 1);
            Ok(())
        });
    });
    suite.instance_method("save", |s| {
        s.check("records instance method", |ctx| {
            assert_eq!(ctx.method.as_ref().unwrap().kind, acl_testkit::MethodKind::Instance);
            Ok(())
        });
    });

    let report = suite.run().await;
    assert!(report.is_success(), "{report}");
    assert_eq!(report.tests[0].title, "Widget .find records static method");
    assert_eq!(report.tests[1].title, "Widget .prototype.save records instance method");
}

/// A suite-scoped scenario logs in and calls once for every test inside it
#[tokio::test]
async fn test_suite_scoped_scenario_calls_once() {
    let application = InMemoryApplication::new();
    let (app, client) = protected_app(&application);

    let mut suite = Suite::new("widgets");
    suite.once().with_app(app);
    suite.once().when_called_by_user_with_role(
        admin(),
        "admin",
        RemoteCall::get("/widgets/123"),
        |s| {
            s.should_be_allowed();
            s.should_be_rejected(None);
            s.check("still logged in", |ctx| {
                assert!(ctx.identity.is_some());
                Ok(())
            });
        },
    );

    let report = suite.run().await;
    assert_eq!(report.tests.len(), 3);
    assert_matches!(status_of(&report, "should be allowed"), TestStatus::Passed);
    assert_matches!(status_of(&report, "should be rejected"), TestStatus::Failed(_));
    assert_matches!(status_of(&report, "still logged in"), TestStatus::Passed);
    assert_eq!(client.requests().len(), 1);
    let logins = application
        .journal()
        .iter()
        .filter(|op| matches!(op, Operation::Login { .. }))
        .count();
    assert_eq!(logins, 1);
    assert_eq!(application.count("User"), 0);
    assert_eq!(application.count("Role"), 0);
    assert_eq!(application.count("AccessToken"), 0);
}

/// A scenario granting a role the suite already granted leaves it to the suite
#[tokio::test]
async fn test_nested_scenario_reuses_suite_role() {
    let application = InMemoryApplication::new();
    let (app, _client) = protected_app(&application);

    let mut suite = Suite::new("widgets");
    suite
        .once()
        .with_app(app)
        .given_user_with_role(json!({"email": "owner@example.com"}), "admin", "owner");
    suite.should_be_allowed_when_called_by_user_with_role(
        admin(),
        "admin",
        RemoteCall::get("/widgets/1"),
    );
    suite.should_be_allowed_when_called_by_user_with_role(
        json!({"email": "second@example.com", "password": "secret"}),
        "admin",
        RemoteCall::get("/widgets/2"),
    );

    let report = suite.run().await;
    assert!(report.is_success(), "{report}");
    assert_eq!(application.destroy_count("Role"), 1);
    assert_eq!(application.count("Role"), 0);
    assert_eq!(application.count("RoleMapping"), 0);
}
