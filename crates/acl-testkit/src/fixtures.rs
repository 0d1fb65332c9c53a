//! Fixture builders
//!
//! Every builder is a [`Registrar`] method, so it is available in both the
//! suite-scoped and the test-scoped vocabulary. A builder registers one
//! setup/teardown pair per resource it creates. Multi-step builders (user,
//! role, role mapping, token) therefore register several pairs in creation
//! order, which gives reverse-order cleanup and leaves the teardown of a step
//! that never ran unarmed.
//!
//! Teardowns find the record their setup created through a [`FixtureCell`]
//! shared by the pair. The teardown takes the record out of the cell, so a
//! record is destroyed at most once per setup.

use crate::app::TestApp;
use crate::context::{
    ExecutionContext, Identity, MethodKind, MethodUnderTest, Record, RecordId, RoleBinding,
};
use crate::error::{CollaboratorError, FixtureError, FixtureResult};
use crate::lifecycle::{phase, PhaseFn, Registrar};
use crate::remote::Resolvable;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// Datasource cleaned when none is named
pub const DEFAULT_DATASOURCE: &str = "db";

/// Slot shared between one setup and its teardown
#[derive(Debug)]
pub struct FixtureCell<T>(Arc<Mutex<Option<T>>>);

impl<T> Clone for FixtureCell<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Default for FixtureCell<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }
}

impl<T: Clone> FixtureCell<T> {
    /// Empty cell
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the value created by the setup
    pub fn fill(&self, value: T) {
        *self.0.lock() = Some(value);
    }

    /// Remove the value for cleanup
    pub fn take(&self) -> Option<T> {
        self.0.lock().take()
    }

    /// Copy of the current value
    pub fn get(&self) -> Option<T> {
        self.0.lock().clone()
    }
}

/// Model a builder creates, resolved when the setup runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelRef {
    /// Whatever model the scope currently treats as the user model
    UserModel,
    /// The configured access token model
    AccessTokenModel,
    /// A model by name
    Named(String),
}

impl ModelRef {
    /// Concrete model name for this context
    pub fn resolve(&self, ctx: &ExecutionContext) -> FixtureResult<String> {
        match self {
            Self::UserModel => Ok(ctx.user_model().to_string()),
            Self::AccessTokenModel => Ok(ctx.app()?.config().access_token_model.clone()),
            Self::Named(name) => Ok(name.clone()),
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserModel => f.write_str("<user model>"),
            Self::AccessTokenModel => f.write_str("<access token model>"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

impl From<&str> for ModelRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for ModelRef {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

/// What to do after a builder's own setup
#[derive(Clone, Default)]
pub enum Continuation {
    /// Nothing
    #[default]
    None,
    /// Store the created record under this key instead of the model name
    Alias(String),
    /// Run this phase as an extra setup right after the builder
    Then(PhaseFn),
}

impl Continuation {
    fn into_parts(self) -> (Option<String>, Option<PhaseFn>) {
        match self {
            Self::None => (None, None),
            Self::Alias(alias) => (Some(alias), None),
            Self::Then(run) => (None, Some(run)),
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Alias(alias) => f.debug_tuple("Alias").field(alias).finish(),
            Self::Then(_) => f.write_str("Then(..)"),
        }
    }
}

impl From<()> for Continuation {
    fn from(_: ()) -> Self {
        Self::None
    }
}

impl From<&str> for Continuation {
    fn from(alias: &str) -> Self {
        Self::Alias(alias.to_string())
    }
}

impl From<String> for Continuation {
    fn from(alias: String) -> Self {
        Self::Alias(alias)
    }
}

impl From<PhaseFn> for Continuation {
    fn from(run: PhaseFn) -> Self {
        Self::Then(run)
    }
}

/// Role a user should hold
#[derive(Debug, Clone, PartialEq)]
pub enum RoleSpec {
    /// Role looked up (or created) by name
    Name(String),
    /// Role looked up (or created) by a full attribute document
    Attributes(Value),
}

impl RoleSpec {
    /// Criteria passed to `find_or_create`
    pub fn criteria(&self) -> Value {
        match self {
            Self::Name(name) => json!({ "name": name }),
            Self::Attributes(attrs) => attrs.clone(),
        }
    }
}

impl fmt::Display for RoleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Attributes(attrs) => match attrs.get("name").and_then(Value::as_str) {
                Some(name) => f.write_str(name),
                None => write!(f, "{attrs}"),
            },
        }
    }
}

impl From<&str> for RoleSpec {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for RoleSpec {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<Value> for RoleSpec {
    fn from(attrs: Value) -> Self {
        match attrs {
            Value::String(name) => Self::Name(name),
            other => Self::Attributes(other),
        }
    }
}

fn collaborator_failure(
    operation: &'static str,
    model: &str,
    error: CollaboratorError,
) -> FixtureError {
    tracing::warn!(
        operation,
        model,
        message = %error.message,
        details = ?error.details,
        "collaborator reported failure"
    );
    FixtureError::collaborator(operation, Some(model), error)
}

async fn destroy_record(app: &TestApp, record: &Record) -> FixtureResult<()> {
    app.application()
        .destroy(&record.model, &record.id)
        .await
        .map_err(|e| collaborator_failure("destroy", &record.model, e))?;
    tracing::debug!(model = %record.model, id = %record.id, "destroyed fixture record");
    Ok(())
}

impl Registrar<'_> {
    /// Bind the application and its client to the scope
    pub fn with_app(&mut self, app: TestApp) -> &mut Self {
        self.setup_phase(
            "bind application",
            phase(move |ctx| {
                let result = ctx.bind_app(app.clone());
                futures::future::ready(result).boxed()
            }),
        )
    }

    /// Choose the model that represents "the user" in this scope
    pub fn with_user_model(&mut self, model: impl Into<String>) -> &mut Self {
        let model = model.into();
        self.setup_phase(
            format!("use {model} as user model"),
            phase(move |ctx| {
                ctx.set_user_model(model.clone());
                futures::future::ready(Ok(())).boxed()
            }),
        )
    }

    /// Expect `status` from denied calls in this scope
    pub fn with_denial_status(&mut self, status: u16) -> &mut Self {
        self.setup_phase(
            format!("expect {status} when denied"),
            phase(move |ctx| {
                ctx.denial_status = Some(status);
                futures::future::ready(Ok(())).boxed()
            }),
        )
    }

    /// Record call arguments for the method under test
    pub fn with_args(&mut self, args: Vec<Value>) -> &mut Self {
        self.setup_phase(
            "set arguments",
            phase(move |ctx| {
                ctx.args = args.clone();
                futures::future::ready(Ok(())).boxed()
            }),
        )
    }

    /// Record the method a block exercises
    pub fn with_method_under_test(
        &mut self,
        name: impl Into<String>,
        kind: MethodKind,
    ) -> &mut Self {
        let method = MethodUnderTest {
            name: name.into(),
            kind,
        };
        self.setup_phase(
            format!("method {}", method.name),
            phase(move |ctx| {
                ctx.method = Some(method.clone());
                futures::future::ready(Ok(())).boxed()
            }),
        )
    }

    /// Wipe `datasource` (default `db`), restricted to `models` when not empty
    pub fn clean_datasource(&mut self, datasource: Option<&str>, models: &[&str]) -> &mut Self {
        let datasource = datasource.unwrap_or(DEFAULT_DATASOURCE).to_string();
        let models: Vec<String> = models.iter().map(|m| m.to_string()).collect();
        self.setup_phase(
            format!("clean datasource {datasource}"),
            phase(move |ctx| {
                let datasource = datasource.clone();
                let models = models.clone();
                async move {
                    let app = ctx.app()?.clone();
                    app.application()
                        .automigrate(&datasource, &models)
                        .await
                        .map_err(|e| collaborator_failure("automigrate", &datasource, e))?;
                    tracing::debug!(
                        datasource = %datasource,
                        models = ?models,
                        "cleaned datasource"
                    );
                    Ok(())
                }
                .boxed()
            }),
        )
    }

    /// Create one record of `model`.
    ///
    /// The record is stored under the model name, or under the alias given
    /// as `follow`. `attrs` may be deferred to read earlier fixtures.
    pub fn given_model(
        &mut self,
        model: impl Into<ModelRef>,
        attrs: impl Into<Resolvable<Value>>,
        follow: impl Into<Continuation>,
    ) -> &mut Self {
        let (alias, then) = follow.into().into_parts();
        self.register_model(model.into(), attrs.into(), alias);
        self.register_continuation(then)
    }

    /// Create a user of the scope's user model
    pub fn given_user(
        &mut self,
        attrs: impl Into<Resolvable<Value>>,
        follow: impl Into<Continuation>,
    ) -> &mut Self {
        self.given_model(ModelRef::UserModel, attrs, follow)
    }

    /// Create a user and grant it `role`
    pub fn given_user_with_role(
        &mut self,
        attrs: impl Into<Resolvable<Value>>,
        role: impl Into<RoleSpec>,
        follow: impl Into<Continuation>,
    ) -> &mut Self {
        let (alias, then) = follow.into().into_parts();
        self.register_user_with_role(attrs.into(), role.into(), alias);
        self.register_continuation(then)
    }

    /// Create a user from `credentials` and log it in
    pub fn given_logged_in_user(
        &mut self,
        credentials: Value,
        follow: impl Into<Continuation>,
    ) -> &mut Self {
        let (alias, then) = follow.into().into_parts();
        let user = self.register_model(ModelRef::UserModel, credentials.clone().into(), alias);
        self.register_login(user, credentials);
        self.register_continuation(then)
    }

    /// Create a user holding `role` from `credentials` and log it in
    pub fn given_logged_in_user_with_role(
        &mut self,
        credentials: Value,
        role: impl Into<RoleSpec>,
        follow: impl Into<Continuation>,
    ) -> &mut Self {
        let (alias, then) = follow.into().into_parts();
        let user = self.register_user_with_role(credentials.clone().into(), role.into(), alias);
        self.register_login(user, credentials);
        self.register_continuation(then)
    }

    /// Create a bare access token that belongs to no user
    pub fn given_an_unauthenticated_token(
        &mut self,
        attrs: impl Into<Resolvable<Value>>,
        follow: impl Into<Continuation>,
    ) -> &mut Self {
        self.given_model(ModelRef::AccessTokenModel, attrs, follow)
    }

    /// Create the access token carrying the reserved anonymous id
    pub fn given_an_anonymous_token(&mut self, follow: impl Into<Continuation>) -> &mut Self {
        let attrs = Resolvable::deferred(|ctx: &ExecutionContext| {
            Ok(json!({ "id": ctx.app()?.config().anonymous_token_id }))
        });
        self.given_model(ModelRef::AccessTokenModel, attrs, follow)
    }

    fn register_continuation(&mut self, then: Option<PhaseFn>) -> &mut Self {
        match then {
            Some(run) => self.setup_phase("continuation", run),
            None => self,
        }
    }

    fn register_model(
        &mut self,
        model: ModelRef,
        attrs: Resolvable<Value>,
        alias: Option<String>,
    ) -> FixtureCell<(String, Record)> {
        let cell = FixtureCell::new();
        let label = format!("create {model}");

        let created = cell.clone();
        self.setup_phase(
            label.clone(),
            phase(move |ctx| {
                let created = created.clone();
                let model = model.clone();
                let attrs = attrs.clone();
                let alias = alias.clone();
                async move {
                    let app = ctx.app()?.clone();
                    let name = model.resolve(ctx)?;
                    let attrs = attrs.resolve(ctx)?;
                    let record = app
                        .application()
                        .create(&name, attrs)
                        .await
                        .map_err(|e| collaborator_failure("create", &name, e))?;
                    tracing::debug!(model = %name, id = %record.id, "created fixture record");

                    let key = alias.unwrap_or(name);
                    ctx.insert_entity(key.clone(), record.clone());
                    created.fill((key, record));
                    Ok(())
                }
                .boxed()
            }),
        );

        let created = cell.clone();
        self.teardown_phase(
            label,
            phase(move |ctx| {
                let created = created.clone();
                async move {
                    if let Some((key, record)) = created.take() {
                        let app = ctx.app()?.clone();
                        destroy_record(&app, &record).await?;
                        ctx.forget_entity(&key, &record.id);
                    }
                    Ok(())
                }
                .boxed()
            }),
        );
        cell
    }

    fn register_user_with_role(
        &mut self,
        attrs: Resolvable<Value>,
        role: RoleSpec,
        alias: Option<String>,
    ) -> FixtureCell<(String, Record)> {
        let user = self.register_model(ModelRef::UserModel, attrs, alias);
        // The flag marks a role this builder created; a role that already
        // existed belongs to whoever created it and is left in place.
        let role_cell: FixtureCell<(Record, bool)> = FixtureCell::new();
        let mapping_cell: FixtureCell<Record> = FixtureCell::new();

        let found = role_cell.clone();
        let wanted = role.clone();
        self.setup_phase(
            format!("find or create role {role}"),
            phase(move |ctx| {
                let found = found.clone();
                let criteria = wanted.criteria();
                async move {
                    let app = ctx.app()?.clone();
                    let model = app.config().role_model.clone();
                    let (record, created) = app
                        .application()
                        .find_or_create(&model, criteria)
                        .await
                        .map_err(|e| collaborator_failure("find_or_create", &model, e))?;
                    tracing::debug!(model = %model, id = %record.id, created, "resolved role");
                    found.fill((record, created));
                    Ok(())
                }
                .boxed()
            }),
        );
        let found = role_cell.clone();
        self.teardown_phase(
            format!("find or create role {role}"),
            phase(move |ctx| {
                let found = found.clone();
                async move {
                    match found.take() {
                        Some((record, true)) => {
                            let app = ctx.app()?.clone();
                            destroy_record(&app, &record).await?;
                        }
                        Some((record, false)) => {
                            tracing::debug!(
                                model = %record.model,
                                id = %record.id,
                                "role existed before the fixture; kept"
                            );
                        }
                        None => {}
                    }
                    Ok(())
                }
                .boxed()
            }),
        );

        let mapped = mapping_cell.clone();
        let mapped_user = user.clone();
        let mapped_role = role_cell.clone();
        self.setup_phase(
            format!("map user to role {role}"),
            phase(move |ctx| {
                let mapped = mapped.clone();
                let user = mapped_user.get();
                let role = mapped_role.get().map(|(record, _)| record);
                async move {
                    let (Some((_, user)), Some(role)) = (user, role) else {
                        return Err(FixtureError::configuration(
                            "role mapping needs both the fixture user and its role",
                        ));
                    };
                    let app = ctx.app()?.clone();
                    let config = app.config();
                    let model = config.role_mapping_model.clone();
                    let attrs = json!({
                        "principalType": config.user_principal_type,
                        "principalId": user.id.to_value(),
                        "roleId": role.id.to_value(),
                    });
                    let mapping = app
                        .application()
                        .create(&model, attrs)
                        .await
                        .map_err(|e| collaborator_failure("create", &model, e))?;
                    tracing::debug!(model = %model, id = %mapping.id, "created role mapping");

                    mapped.fill(mapping.clone());
                    ctx.role_binding = Some(RoleBinding { role, mapping });
                    Ok(())
                }
                .boxed()
            }),
        );
        let mapped = mapping_cell;
        self.teardown_phase(
            format!("map user to role {role}"),
            phase(move |ctx| {
                let mapped = mapped.clone();
                async move {
                    if let Some(mapping) = mapped.take() {
                        let app = ctx.app()?.clone();
                        destroy_record(&app, &mapping).await?;
                        if ctx
                            .role_binding
                            .as_ref()
                            .is_some_and(|binding| binding.mapping.id == mapping.id)
                        {
                            ctx.role_binding = None;
                        }
                    }
                    Ok(())
                }
                .boxed()
            }),
        );

        user
    }

    fn register_login(&mut self, user: FixtureCell<(String, Record)>, credentials: Value) {
        let token_cell: FixtureCell<Record> = FixtureCell::new();

        let issued = token_cell.clone();
        self.setup_phase(
            "log in",
            phase(move |ctx| {
                let issued = issued.clone();
                let credentials = credentials.clone();
                let owner = user.get().map(|(_, record)| record.id);
                async move {
                    let app = ctx.app()?.clone();
                    let model = ctx.user_model().to_string();
                    let token = app
                        .application()
                        .login(&model, credentials)
                        .await
                        .map_err(|e| collaborator_failure("login", &model, e))?;

                    let principal = token
                        .get("userId")
                        .and_then(RecordId::from_value)
                        .or(owner);
                    tracing::debug!(model = %model, token = %token.id, "logged in fixture user");

                    issued.fill(token.clone());
                    ctx.identity = Some(Identity { token, principal });
                    Ok(())
                }
                .boxed()
            }),
        );

        let issued = token_cell;
        self.teardown_phase(
            "log in",
            phase(move |ctx| {
                let issued = issued.clone();
                async move {
                    if let Some(token) = issued.take() {
                        let app = ctx.app()?.clone();
                        destroy_record(&app, &token).await?;
                        if ctx
                            .identity
                            .as_ref()
                            .is_some_and(|identity| identity.token.id == token.id)
                        {
                            ctx.identity = None;
                        }
                    }
                    Ok(())
                }
                .boxed()
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FixtureError;
    use crate::lifecycle::{ScopeKind, Suite};
    use crate::memory::{InMemoryApplication, Operation, OperationKind, ScriptedHttpClient};
    use assert_matches::assert_matches;

    fn test_app(application: &InMemoryApplication) -> TestApp {
        TestApp::new(
            Arc::new(application.clone()),
            Arc::new(ScriptedHttpClient::new()),
        )
    }

    #[test]
    fn test_role_spec_from_json_string_is_a_name() {
        assert_eq!(RoleSpec::from(json!("admin")), RoleSpec::Name("admin".into()));
        let attrs = RoleSpec::from(json!({"name": "auditor", "description": "reads"}));
        assert_eq!(attrs.to_string(), "auditor");
        assert_eq!(attrs.criteria()["description"], "reads");
    }

    #[test]
    fn test_multi_step_builder_registers_one_pair_per_resource() {
        let mut suite = Suite::new("pairs");
        suite
            .each()
            .given_logged_in_user_with_role(json!({"email": "a@b.c"}), "admin", ());

        let phases = suite.phases(ScopeKind::Test);
        let kinds: Vec<bool> = phases.iter().map(|p| p.is_setup()).collect();
        assert_eq!(kinds, vec![true, false, true, false, true, false, true, false]);
        assert_eq!(phases[2].label(), "find or create role admin");
        assert_eq!(phases[6].label(), "log in");
    }

    #[tokio::test]
    async fn test_alias_stores_record_under_caller_key() {
        let application = InMemoryApplication::new();
        let mut suite = Suite::new("alias");
        suite
            .each()
            .with_app(test_app(&application))
            .given_model("Widget", json!({"name": "gear"}), "gear");
        suite.check("stored under alias", |ctx| {
            assert!(ctx.entity("gear").is_some());
            assert!(ctx.entity("Widget").is_none());
            Ok(())
        });

        let report = suite.run().await;
        assert!(report.is_success(), "{report}");
        assert_eq!(application.count("Widget"), 0);
    }

    #[tokio::test]
    async fn test_continuation_runs_after_builder() {
        let application = InMemoryApplication::new();
        let mut suite = Suite::new("continuation");
        let then = phase(|ctx| {
            let seen = ctx.entity("Widget").map(|r| r.id.clone());
            ctx.args = vec![json!(seen.map(|id| id.to_string()))];
            futures::future::ready(Ok(())).boxed()
        });
        suite
            .each()
            .with_app(test_app(&application))
            .given_model("Widget", json!({}), then);
        suite.check("continuation saw the record", |ctx| {
            assert_eq!(ctx.args, vec![json!("1")]);
            Ok(())
        });

        assert!(suite.run().await.is_success());
    }

    #[tokio::test]
    async fn test_user_model_sentinel_resolves_at_setup_time() {
        let application = InMemoryApplication::new();
        let mut suite = Suite::new("user model");
        suite
            .each()
            .with_app(test_app(&application))
            .given_user(json!({"email": "x@y.z"}), ())
            .with_user_model("Customer")
            .given_user(json!({"email": "c@y.z"}), ());
        suite.check("both users exist", |ctx| {
            assert!(ctx.entity("User").is_some());
            assert!(ctx.entity("Customer").is_some());
            Ok(())
        });

        assert!(suite.run().await.is_success());
        assert_eq!(application.count("User"), 0);
        assert_eq!(application.count("Customer"), 0);
    }

    #[tokio::test]
    async fn test_create_failure_is_annotated_with_model() {
        let application = InMemoryApplication::new();
        application.fail_on(
            OperationKind::Create,
            "Widget",
            CollaboratorError::new("validation failed").with_details(json!({"name": "blank"})),
        );
        let mut suite = Suite::new("failing create");
        suite
            .each()
            .with_app(test_app(&application))
            .given_model("Widget", json!({}), ());
        suite.check("never runs", |_ctx| Ok(()));

        let report = suite.run().await;
        let error = report.tests[0].error().cloned();
        assert_matches!(
            error,
            Some(FixtureError::Collaborator {
                operation: "create",
                model: Some(ref m),
                ..
            }) if m == "Widget"
        );
    }

    #[tokio::test]
    async fn test_builder_without_app_is_configuration_error() {
        let mut suite = Suite::new("unbound");
        suite.each().given_model("Widget", json!({}), ());
        suite.check("never runs", |_ctx| Ok(()));

        let report = suite.run().await;
        assert_matches!(report.tests[0].error(), Some(FixtureError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_anonymous_token_uses_reserved_id_without_identity() {
        let application = InMemoryApplication::new();
        let mut suite = Suite::new("anonymous");
        suite
            .each()
            .with_app(test_app(&application))
            .given_an_anonymous_token(());
        suite.check("token stored, no identity", |ctx| {
            let token = ctx.require_entity("AccessToken")?;
            assert_eq!(token.id, RecordId::Text("$anonymous".into()));
            assert!(ctx.identity.is_none());
            Ok(())
        });

        assert!(suite.run().await.is_success());
        assert!(application
            .journal()
            .contains(&Operation::Destroy {
                model: "AccessToken".into(),
                id: RecordId::Text("$anonymous".into()),
            }));
    }

    #[tokio::test]
    async fn test_clean_datasource_defaults_to_db() {
        let application = InMemoryApplication::new();
        let mut suite = Suite::new("clean");
        suite
            .once()
            .with_app(test_app(&application))
            .clean_datasource(None, &["Widget"]);
        suite.check("noop", |_ctx| Ok(()));

        assert!(suite.run().await.is_success());
        assert_eq!(
            application.journal(),
            vec![Operation::Automigrate {
                datasource: "db".into(),
                models: vec!["Widget".into()],
            }]
        );
    }

    #[tokio::test]
    async fn test_binding_app_twice_is_configuration_error() {
        let application = InMemoryApplication::new();
        let mut suite = Suite::new("double bind");
        suite
            .each()
            .with_app(test_app(&application))
            .with_app(test_app(&application));
        suite.check("never runs", |_ctx| Ok(()));

        let report = suite.run().await;
        assert_matches!(report.tests[0].error(), Some(FixtureError::Configuration(_)));
    }
}
