//! Execution context threaded through a fixture chain
//!
//! One [`ExecutionContext`] lives per scope. The runner creates it when the
//! scope starts, passes it by `&mut` to every registered phase in order and
//! drops it when the scope ends. Builders write into disjoint fields by
//! convention: model builders into the entity map, role builders into
//! [`ExecutionContext::role_binding`], login builders into
//! [`ExecutionContext::identity`].

use crate::app::TestApp;
use crate::error::{FixtureError, FixtureResult};
use crate::http::{HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Model name used when no user model was configured anywhere
pub const DEFAULT_USER_MODEL: &str = "User";

/// Primary key of a model record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    /// Numeric key (auto-increment connectors)
    Number(i64),
    /// String key (tokens, UUIDs, reserved identifiers)
    Text(String),
}

impl RecordId {
    /// Read an id out of a JSON value
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    /// The id as a JSON value
    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::Text(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for RecordId {
    fn from(n: i32) -> Self {
        Self::Number(i64::from(n))
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// A persisted model instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Model the record belongs to
    pub model: String,
    /// Primary key
    pub id: RecordId,
    /// Full attribute document, including the id
    pub data: Value,
}

impl Record {
    /// Create a record
    pub fn new(model: impl Into<String>, id: impl Into<RecordId>, data: Value) -> Self {
        Self {
            model: model.into(),
            id: id.into(),
            data,
        }
    }

    /// Read one attribute
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Read one string attribute
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }
}

/// Access token attached to outgoing calls
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    /// Token record as issued by the application
    pub token: Record,
    /// Principal the token was issued for
    pub principal: Option<RecordId>,
}

impl Identity {
    /// Value sent in the `Authorization` header
    pub fn id(&self) -> String {
        self.token.id.to_string()
    }
}

/// Role record and the mapping that grants it to the fixture user
#[derive(Debug, Clone, PartialEq)]
pub struct RoleBinding {
    /// The role
    pub role: Record,
    /// The role mapping binding the user as principal
    pub mapping: Record,
}

/// The most recent remote call and its outcome
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Request exactly as sent
    pub request: HttpRequest,
    /// Response after JSON normalisation
    pub response: HttpResponse,
}

/// Whether the method under test is static or per-instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// `Model.method`
    Static,
    /// `Model.prototype.method`
    Instance,
}

/// Method a describe block is exercising
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodUnderTest {
    /// Method name
    pub name: String,
    /// Static or instance
    pub kind: MethodKind,
}

/// Mutable per-scope state
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    app: Option<TestApp>,
    user_model: Option<String>,
    entities: HashMap<String, Record>,
    /// Current identity, set by login builders only
    pub identity: Option<Identity>,
    /// Role granted to the fixture user, set by role builders only
    pub role_binding: Option<RoleBinding>,
    /// Last remote call; overwritten by every call
    pub last_call: Option<RecordedCall>,
    /// Per-test override of the expected denial status
    pub denial_status: Option<u16>,
    /// Arguments registered with `with_args`
    pub args: Vec<Value>,
    /// Method recorded by `static_method` / `instance_method`
    pub method: Option<MethodUnderTest>,
}

impl ExecutionContext {
    /// Empty context with nothing bound
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the application handle and its client. A scope binds exactly once.
    pub fn bind_app(&mut self, app: TestApp) -> FixtureResult<()> {
        if self.app.is_some() {
            return Err(FixtureError::configuration(
                "an application is already bound to this scope",
            ));
        }
        self.app = Some(app);
        Ok(())
    }

    /// The bound application, or a configuration error when none was bound
    pub fn app(&self) -> FixtureResult<&TestApp> {
        self.app.as_ref().ok_or_else(|| {
            FixtureError::configuration("no application is bound; register `with_app` first")
        })
    }

    /// Whether an application has been bound
    pub fn has_app(&self) -> bool {
        self.app.is_some()
    }

    /// Set the model that represents "the user" in this scope
    pub fn set_user_model(&mut self, model: impl Into<String>) {
        self.user_model = Some(model.into());
    }

    /// The user model: the scope's own choice, then the configured default,
    /// then [`DEFAULT_USER_MODEL`]
    pub fn user_model(&self) -> &str {
        match (&self.user_model, &self.app) {
            (Some(model), _) => model.as_str(),
            (None, Some(app)) => app.config().user_model.as_str(),
            (None, None) => DEFAULT_USER_MODEL,
        }
    }

    /// Store a record under `key`.
    ///
    /// Last write wins: a builder reusing a key intentionally replaces the
    /// earlier entry. The replaced record is returned.
    pub fn insert_entity(&mut self, key: impl Into<String>, record: Record) -> Option<Record> {
        self.entities.insert(key.into(), record)
    }

    /// Look a record up by key
    pub fn entity(&self, key: &str) -> Option<&Record> {
        self.entities.get(key)
    }

    /// Look a record up by key, failing when it is absent
    pub fn require_entity(&self, key: &str) -> FixtureResult<&Record> {
        self.entity(key)
            .ok_or_else(|| FixtureError::resolve(format!("no entity stored under `{key}`")))
    }

    /// Remove `key` only if it still holds the record with `id`
    pub fn forget_entity(&mut self, key: &str, id: &RecordId) -> Option<Record> {
        match self.entities.get(key) {
            Some(current) if &current.id == id => self.entities.remove(key),
            _ => None,
        }
    }

    /// All stored keys
    pub fn entity_keys(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// The recorded response, if a call has been made
    pub fn response(&self) -> Option<&HttpResponse> {
        self.last_call.as_ref().map(|call| &call.response)
    }

    /// The recorded request, if a call has been made
    pub fn request(&self) -> Option<&HttpRequest> {
        self.last_call.as_ref().map(|call| &call.request)
    }
}
