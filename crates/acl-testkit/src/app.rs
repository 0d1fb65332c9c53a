//! Collaborator boundary
//!
//! The testkit knows nothing about how the application stores models or
//! routes requests. It needs exactly two seams: an [`Application`] that can
//! create, destroy and log in model records, and an [`HttpClient`] bound to
//! that application. [`TestApp`] pairs them with the [`TestkitConfig`] that
//! names the conventional models.

use crate::config::TestkitConfig;
use crate::context::{Record, RecordId};
use crate::error::CollaboratorError;
use crate::http::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Model operations of the application under test
#[async_trait]
pub trait Application: Send + Sync {
    /// Create one record of `model` from `attrs`
    async fn create(&self, model: &str, attrs: Value) -> Result<Record, CollaboratorError>;

    /// Destroy the record `id` of `model`
    async fn destroy(&self, model: &str, id: &RecordId) -> Result<(), CollaboratorError>;

    /// Find a record of `model` matching every field of `criteria`, creating
    /// one from `criteria` when none exists. The flag is `true` only when
    /// this call created the record.
    async fn find_or_create(
        &self,
        model: &str,
        criteria: Value,
    ) -> Result<(Record, bool), CollaboratorError>;

    /// Log a user of `user_model` in and return the issued access token record
    async fn login(
        &self,
        user_model: &str,
        credentials: Value,
    ) -> Result<Record, CollaboratorError>;

    /// Wipe and re-create the storage behind `datasource`, restricted to
    /// `models` when the slice is not empty
    async fn automigrate(
        &self,
        datasource: &str,
        models: &[String],
    ) -> Result<(), CollaboratorError> {
        tracing::debug!(
            datasource,
            models = ?models,
            "application does not support automigrate; datasource left as is"
        );
        Ok(())
    }

    /// Application-level override for the status a denied call returns
    fn configured_denial_status(&self) -> Option<u16> {
        None
    }
}

/// Transport bound to the application under test
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Perform exactly one request
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, CollaboratorError>;
}

/// The application handle and its HTTP client, bound together
#[derive(Clone)]
pub struct TestApp {
    application: Arc<dyn Application>,
    client: Arc<dyn HttpClient>,
    config: Arc<TestkitConfig>,
}

impl TestApp {
    /// Bind an application to the client that reaches it
    pub fn new(
        application: Arc<dyn Application>,
        client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            application,
            client,
            config: Arc::new(TestkitConfig::default()),
        }
    }

    /// Replace the model-naming configuration
    pub fn with_config(mut self, config: TestkitConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// The application under test
    pub fn application(&self) -> &dyn Application {
        self.application.as_ref()
    }

    /// The client bound to the application
    pub fn client(&self) -> &dyn HttpClient {
        self.client.as_ref()
    }

    /// Model naming and defaults
    pub fn config(&self) -> &TestkitConfig {
        &self.config
    }

    /// Application-level denial status: the application's own setting first,
    /// then the configured one
    pub fn denial_status(&self) -> Option<u16> {
        self.application
            .configured_denial_status()
            .or(self.config.denial_status)
    }
}

impl fmt::Debug for TestApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestApp")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
