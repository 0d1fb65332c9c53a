//! Remote call invocation
//!
//! A [`RemoteCall`] describes one HTTP call: a verb, a URL and an optional
//! payload. URL and payload may be [`Resolvable::Deferred`], in which case
//! they are computed from the [`ExecutionContext`] at the moment the call is
//! made, after every setup registered before it has populated the context.

use crate::context::{ExecutionContext, RecordedCall};
use crate::error::{FixtureError, FixtureResult};
use crate::http::{HttpRequest, Method};
use crate::lifecycle::{phase, Registrar};
use futures::FutureExt;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Title used for deferred URLs without a placeholder
pub const DYNAMIC_URL_PLACEHOLDER: &str = "/<dynamic>";

/// Function computing a deferred value from the context
pub type Resolver<T> = Arc<dyn Fn(&ExecutionContext) -> FixtureResult<T> + Send + Sync>;

/// A value given up front, or computed from the context when needed
pub enum Resolvable<T> {
    /// Known at registration time
    Literal(T),
    /// Computed at call time
    Deferred {
        /// Text shown in describe titles instead of the computed value
        placeholder: Option<String>,
        /// The computation; it only reads the context
        resolve: Resolver<T>,
    },
}

impl<T> Resolvable<T> {
    /// Defer computation to call time
    pub fn deferred<F>(resolve: F) -> Self
    where
        F: Fn(&ExecutionContext) -> FixtureResult<T> + Send + Sync + 'static,
    {
        Self::Deferred {
            placeholder: None,
            resolve: Arc::new(resolve),
        }
    }

    /// Defer computation to call time, titled with `placeholder`
    pub fn deferred_as<F>(placeholder: impl Into<String>, resolve: F) -> Self
    where
        F: Fn(&ExecutionContext) -> FixtureResult<T> + Send + Sync + 'static,
    {
        Self::Deferred {
            placeholder: Some(placeholder.into()),
            resolve: Arc::new(resolve),
        }
    }

    /// Whether the value is computed at call time
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred { .. })
    }
}

impl<T: Clone> Resolvable<T> {
    /// Produce the value for this context
    pub fn resolve(&self, ctx: &ExecutionContext) -> FixtureResult<T> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Deferred { resolve, .. } => resolve(ctx),
        }
    }
}

impl<T: Clone> Clone for Resolvable<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Literal(value) => Self::Literal(value.clone()),
            Self::Deferred {
                placeholder,
                resolve,
            } => Self::Deferred {
                placeholder: placeholder.clone(),
                resolve: resolve.clone(),
            },
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Resolvable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Self::Deferred { placeholder, .. } => f
                .debug_struct("Deferred")
                .field("placeholder", placeholder)
                .finish_non_exhaustive(),
        }
    }
}

impl From<&str> for Resolvable<String> {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<String> for Resolvable<String> {
    fn from(value: String) -> Self {
        Self::Literal(value)
    }
}

impl From<Value> for Resolvable<Value> {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

/// One HTTP call made under the scope's current identity
#[derive(Debug, Clone)]
pub struct RemoteCall {
    /// Verb
    pub method: Method,
    /// Literal or deferred URL
    pub url: Resolvable<String>,
    /// Literal or deferred payload
    pub payload: Option<Resolvable<Value>>,
}

impl RemoteCall {
    /// Call `url` with `method`
    pub fn new(method: Method, url: impl Into<Resolvable<String>>) -> Self {
        Self {
            method,
            url: url.into(),
            payload: None,
        }
    }

    /// GET `url`
    pub fn get(url: impl Into<Resolvable<String>>) -> Self {
        Self::new(Method::Get, url)
    }

    /// POST `url`
    pub fn post(url: impl Into<Resolvable<String>>) -> Self {
        Self::new(Method::Post, url)
    }

    /// PUT `url`
    pub fn put(url: impl Into<Resolvable<String>>) -> Self {
        Self::new(Method::Put, url)
    }

    /// PATCH `url`
    pub fn patch(url: impl Into<Resolvable<String>>) -> Self {
        Self::new(Method::Patch, url)
    }

    /// DELETE `url`
    pub fn delete(url: impl Into<Resolvable<String>>) -> Self {
        Self::new(Method::Delete, url)
    }

    /// Send `payload` with the call
    pub fn with_payload(mut self, payload: impl Into<Resolvable<Value>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Title of the describe block wrapping this call
    pub fn title(&self) -> String {
        let url = match &self.url {
            Resolvable::Literal(url) => url.as_str(),
            Resolvable::Deferred {
                placeholder: Some(placeholder),
                ..
            } => placeholder.as_str(),
            Resolvable::Deferred {
                placeholder: None, ..
            } => DYNAMIC_URL_PLACEHOLDER,
        };
        format!("{} {}", self.method, url)
    }
}

/// Perform `call` against the scope's client and record the outcome in
/// [`ExecutionContext::last_call`].
///
/// Sends `Accept: application/json`, adds `Authorization` when the context
/// carries an identity, and parses the raw text into the body when the
/// response declares JSON but the client did not decode it.
pub async fn invoke(call: &RemoteCall, ctx: &mut ExecutionContext) -> FixtureResult<()> {
    let app = ctx.app()?.clone();

    let url = call.url.resolve(ctx)?;
    let payload = match &call.payload {
        Some(payload) => Some(payload.resolve(ctx)?),
        None => None,
    };

    let mut request = HttpRequest::new(call.method, url);
    request.set_header("Accept", "application/json");
    if let Some(identity) = &ctx.identity {
        request.set_header("Authorization", identity.id());
    }
    request.body = payload;

    let mut response = app.client().send(&request).await.map_err(|e| {
        tracing::warn!(
            method = %request.method,
            url = %request.url,
            error = %e,
            "remote call failed"
        );
        FixtureError::collaborator("send", None, e)
    })?;

    if response.body.is_none() && response.declares_json() && !response.text.trim().is_empty() {
        let parsed = serde_json::from_str(&response.text).map_err(|e| {
            FixtureError::InvalidResponse(format!(
                "{} {} declared JSON but the body did not parse: {e}",
                request.method, request.url
            ))
        })?;
        response.body = Some(parsed);
    }

    tracing::info!(
        method = %request.method,
        url = %request.url,
        status = response.status,
        authorized = request.header("Authorization").is_some(),
        "remote call completed"
    );

    ctx.last_call = Some(RecordedCall { request, response });
    Ok(())
}

impl Registrar<'_> {
    /// Register one remote call as a setup phase
    pub fn call_remotely(&mut self, call: RemoteCall) -> &mut Self {
        let label = call.title();
        let call = Arc::new(call);
        self.setup_phase(
            label,
            phase(move |ctx| {
                let call = call.clone();
                async move { invoke(&call, ctx).await }.boxed()
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::TestApp;
    use crate::context::{Identity, Record};
    use crate::http::HttpResponse;
    use crate::memory::{InMemoryApplication, ScriptedHttpClient};
    use serde_json::json;

    fn bound_context(client: &ScriptedHttpClient) -> ExecutionContext {
        let mut ctx = ExecutionContext::new();
        ctx.bind_app(TestApp::new(
            Arc::new(InMemoryApplication::new()),
            Arc::new(client.clone()),
        ))
        .unwrap();
        ctx
    }

    #[test]
    fn test_titles_use_placeholder_or_dynamic_marker() {
        assert_eq!(RemoteCall::get("/widgets").title(), "GET /widgets");
        let dynamic = RemoteCall::delete(Resolvable::deferred(|_ctx| Ok("/x".to_string())));
        assert_eq!(dynamic.title(), "DELETE /<dynamic>");
        let named = RemoteCall::put(Resolvable::deferred_as("/widgets/:id", |_ctx| {
            Ok("/widgets/1".to_string())
        }));
        assert_eq!(named.title(), "PUT /widgets/:id");
    }

    #[tokio::test]
    async fn test_invoke_without_app_is_configuration_error() {
        let mut ctx = ExecutionContext::new();
        let err = invoke(&RemoteCall::get("/widgets"), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, FixtureError::Configuration(_)));
        assert!(ctx.last_call.is_none());
    }

    #[tokio::test]
    async fn test_invoke_sets_canonical_headers() {
        let client = ScriptedHttpClient::new();
        client.respond(Method::Post, "/widgets", HttpResponse::status(200));
        let mut ctx = bound_context(&client);
        ctx.identity = Some(Identity {
            token: Record::new("AccessToken", "tok-1", json!({"id": "tok-1"})),
            principal: None,
        });

        let call = RemoteCall::post("/widgets").with_payload(json!({"name": "gear"}));
        invoke(&call, &mut ctx).await.unwrap();

        let request = ctx.request().unwrap();
        assert_eq!(request.header("accept"), Some("application/json"));
        assert_eq!(request.header("authorization"), Some("tok-1"));
        assert_eq!(request.body, Some(json!({"name": "gear"})));
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_parses_declared_json_text() {
        let client = ScriptedHttpClient::new();
        client.respond(
            Method::Get,
            "/widgets/1",
            HttpResponse::json_text(200, &json!({"id": 1})),
        );
        let mut ctx = bound_context(&client);

        invoke(&RemoteCall::get("/widgets/1"), &mut ctx).await.unwrap();

        assert_eq!(ctx.response().unwrap().body, Some(json!({"id": 1})));
        assert!(ctx.request().unwrap().header("authorization").is_none());
    }

    #[tokio::test]
    async fn test_invoke_rejects_malformed_json() {
        let client = ScriptedHttpClient::new();
        client.respond(
            Method::Get,
            "/broken",
            HttpResponse::status(200)
                .with_header("Content-Type", "application/json")
                .with_text("{not json"),
        );
        let mut ctx = bound_context(&client);

        let err = invoke(&RemoteCall::get("/broken"), &mut ctx).await.unwrap_err();
        assert!(matches!(err, FixtureError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_last_call_is_overwritten() {
        let client = ScriptedHttpClient::new();
        client.respond(Method::Get, "/a", HttpResponse::status(200));
        client.respond(Method::Get, "/b", HttpResponse::status(204));
        let mut ctx = bound_context(&client);

        invoke(&RemoteCall::get("/a"), &mut ctx).await.unwrap();
        invoke(&RemoteCall::get("/b"), &mut ctx).await.unwrap();

        assert_eq!(ctx.request().unwrap().url, "/b");
        assert_eq!(ctx.response().unwrap().status, 204);
    }
}
