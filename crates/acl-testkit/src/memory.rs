//! In-memory collaborators for testing fixture chains
//!
//! [`InMemoryApplication`] stores model records in shared tables and keeps a
//! journal of every operation it was asked to perform, so tests can check
//! what was created and destroyed and in which order. [`ScriptedHttpClient`]
//! answers requests from a route table and records what it was sent.
//!
//! Both are cheap to clone; clones share state, which lets a test keep a
//! handle for inspection while the [`TestApp`](crate::app::TestApp) owns
//! another.

use crate::app::{Application, HttpClient};
use crate::context::{Record, RecordId};
use crate::error::CollaboratorError;
use crate::http::{HttpRequest, HttpResponse, Method};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Model name used for tokens issued by [`InMemoryApplication::login`]
pub const TOKEN_MODEL: &str = "AccessToken";

/// Token lifetime reported on issued tokens, in seconds
pub const TOKEN_TTL_SECS: u64 = 1_209_600;

/// Kind of operation, for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// `create`
    Create,
    /// `destroy`
    Destroy,
    /// `find_or_create`
    FindOrCreate,
    /// `login`
    Login,
    /// `automigrate`
    Automigrate,
}

/// One journaled operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// A record was created
    Create {
        /// Model
        model: String,
        /// Assigned id
        id: RecordId,
    },
    /// A record destroy was requested
    Destroy {
        /// Model
        model: String,
        /// Requested id
        id: RecordId,
    },
    /// A record was looked up, and created when missing
    FindOrCreate {
        /// Model
        model: String,
        /// Id of the found or created record
        id: RecordId,
        /// Whether nothing matched
        created: bool,
    },
    /// A token was issued
    Login {
        /// User model logged into
        model: String,
        /// Issued token id
        token: RecordId,
    },
    /// A datasource was wiped
    Automigrate {
        /// Datasource name
        datasource: String,
        /// Models wiped; empty means all
        models: Vec<String>,
    },
}

impl Operation {
    /// Model the operation touched, when it touched one
    pub fn model(&self) -> Option<&str> {
        match self {
            Self::Create { model, .. }
            | Self::Destroy { model, .. }
            | Self::FindOrCreate { model, .. }
            | Self::Login { model, .. } => Some(model.as_str()),
            Self::Automigrate { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
struct Table {
    next_id: i64,
    rows: HashMap<RecordId, Record>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, Table>,
    journal: Vec<Operation>,
    failures: HashMap<(OperationKind, String), CollaboratorError>,
    denial_status: Option<u16>,
}

impl MemoryState {
    fn check_failure(&self, kind: OperationKind, model: &str) -> Result<(), CollaboratorError> {
        match self.failures.get(&(kind, model.to_string())) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn insert(&mut self, model: &str, attrs: Value) -> Result<Record, CollaboratorError> {
        let mut data = match attrs {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(CollaboratorError::new(format!(
                    "{model} attributes must be an object, got {other}"
                ))
                .with_status(422))
            }
        };

        let table = self.tables.entry(model.to_string()).or_default();
        let id = match data.get("id").filter(|v| !v.is_null()) {
            Some(value) => RecordId::from_value(value).ok_or_else(|| {
                CollaboratorError::new(format!("{model} id must be a number or a string"))
                    .with_status(422)
            })?,
            None => {
                table.next_id += 1;
                RecordId::Number(table.next_id)
            }
        };
        if let RecordId::Number(n) = id {
            table.next_id = table.next_id.max(n);
        }
        if table.rows.contains_key(&id) {
            return Err(CollaboratorError::new(format!("{model} {id} already exists"))
                .with_details(serde_json::json!({ "id": id.to_value() }))
                .with_status(422));
        }

        data.insert("id".to_string(), id.to_value());
        let record = Record::new(model, id.clone(), Value::Object(data));
        table.rows.insert(id, record.clone());
        Ok(record)
    }
}

fn matches_criteria(record: &Record, criteria: &Value) -> bool {
    match criteria.as_object() {
        Some(fields) => fields
            .iter()
            .all(|(field, expected)| record.get(field) == Some(expected)),
        None => false,
    }
}

/// Model store that behaves like a small application backend
#[derive(Debug, Clone, Default)]
pub struct InMemoryApplication {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryApplication {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `status` as the application's denial status
    pub fn with_denial_status(self, status: u16) -> Self {
        self.state.lock().denial_status = Some(status);
        self
    }

    /// Make every `kind` operation on `model` fail with `error`
    pub fn fail_on(&self, kind: OperationKind, model: &str, error: CollaboratorError) {
        self.state
            .lock()
            .failures
            .insert((kind, model.to_string()), error);
    }

    /// Remove every injected failure
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Insert a record directly, bypassing the journal
    pub fn seed(&self, model: &str, attrs: Value) -> Result<Record, CollaboratorError> {
        self.state.lock().insert(model, attrs)
    }

    /// Every operation performed so far, in order
    pub fn journal(&self) -> Vec<Operation> {
        self.state.lock().journal.clone()
    }

    /// Forget the journal
    pub fn clear_journal(&self) {
        self.state.lock().journal.clear();
    }

    /// Number of live records of `model`
    pub fn count(&self, model: &str) -> usize {
        self.state
            .lock()
            .tables
            .get(model)
            .map_or(0, |table| table.rows.len())
    }

    /// Live records of `model`
    pub fn records(&self, model: &str) -> Vec<Record> {
        self.state
            .lock()
            .tables
            .get(model)
            .map(|table| table.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Look one record up
    pub fn find(&self, model: &str, id: &RecordId) -> Option<Record> {
        self.state
            .lock()
            .tables
            .get(model)
            .and_then(|table| table.rows.get(id).cloned())
    }

    /// How many times a record of `model` was journaled as destroyed
    pub fn destroy_count(&self, model: &str) -> usize {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|op| matches!(op, Operation::Destroy { model: m, .. } if m == model))
            .count()
    }

    /// The live token with `id`, if it exists
    pub fn token(&self, id: &str) -> Option<Record> {
        self.find(TOKEN_MODEL, &RecordId::Text(id.to_string()))
    }

    /// Names of the roles granted to the owner of token `id`.
    ///
    /// Follows `RoleMapping` records on `principalId` to `Role` records on
    /// `roleId`, the shape the role builders write.
    pub fn roles_of_token(&self, id: &str) -> Vec<String> {
        let Some(owner) = self.token(id).and_then(|t| t.get("userId").cloned()) else {
            return Vec::new();
        };
        let state = self.state.lock();
        let (Some(mappings), Some(roles)) =
            (state.tables.get("RoleMapping"), state.tables.get("Role"))
        else {
            return Vec::new();
        };
        mappings
            .rows
            .values()
            .filter(|mapping| mapping.get("principalId") == Some(&owner))
            .filter_map(|mapping| RecordId::from_value(mapping.get("roleId")?))
            .filter_map(|role_id| roles.rows.get(&role_id))
            .filter_map(|role| role.get_str("name").map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl Application for InMemoryApplication {
    async fn create(&self, model: &str, attrs: Value) -> Result<Record, CollaboratorError> {
        let mut state = self.state.lock();
        state.check_failure(OperationKind::Create, model)?;
        let record = state.insert(model, attrs)?;
        state.journal.push(Operation::Create {
            model: model.to_string(),
            id: record.id.clone(),
        });
        Ok(record)
    }

    async fn destroy(&self, model: &str, id: &RecordId) -> Result<(), CollaboratorError> {
        let mut state = self.state.lock();
        state.journal.push(Operation::Destroy {
            model: model.to_string(),
            id: id.clone(),
        });
        state.check_failure(OperationKind::Destroy, model)?;
        let removed = state
            .tables
            .get_mut(model)
            .and_then(|table| table.rows.remove(id));
        match removed {
            Some(_) => Ok(()),
            None => Err(CollaboratorError::new(format!("{model} {id} not found")).with_status(404)),
        }
    }

    async fn find_or_create(
        &self,
        model: &str,
        criteria: Value,
    ) -> Result<(Record, bool), CollaboratorError> {
        let mut state = self.state.lock();
        state.check_failure(OperationKind::FindOrCreate, model)?;
        let existing = state.tables.get(model).and_then(|table| {
            table
                .rows
                .values()
                .find(|record| matches_criteria(record, &criteria))
                .cloned()
        });
        let (record, created) = match existing {
            Some(record) => (record, false),
            None => (state.insert(model, criteria)?, true),
        };
        state.journal.push(Operation::FindOrCreate {
            model: model.to_string(),
            id: record.id.clone(),
            created,
        });
        Ok((record, created))
    }

    async fn login(
        &self,
        user_model: &str,
        credentials: Value,
    ) -> Result<Record, CollaboratorError> {
        let mut state = self.state.lock();
        state.check_failure(OperationKind::Login, user_model)?;

        let login_failed = || CollaboratorError::new("login failed").with_status(401);
        let password = credentials.get("password");
        let user = state
            .tables
            .get(user_model)
            .and_then(|table| {
                table.rows.values().find(|user| {
                    let identified = ["email", "username"].iter().any(|field| {
                        credentials
                            .get(*field)
                            .is_some_and(|value| user.get(field) == Some(value))
                    });
                    identified && user.get("password") == password
                })
            })
            .cloned()
            .ok_or_else(login_failed)?;

        let token_id = Uuid::new_v4().simple().to_string();
        let token = state.insert(
            TOKEN_MODEL,
            serde_json::json!({
                "id": token_id,
                "ttl": TOKEN_TTL_SECS,
                "userId": user.id.to_value(),
            }),
        )?;
        state.journal.push(Operation::Login {
            model: user_model.to_string(),
            token: token.id.clone(),
        });
        Ok(token)
    }

    async fn automigrate(
        &self,
        datasource: &str,
        models: &[String],
    ) -> Result<(), CollaboratorError> {
        let mut state = self.state.lock();
        state.check_failure(OperationKind::Automigrate, datasource)?;
        if models.is_empty() {
            state.tables.clear();
        } else {
            for model in models {
                state.tables.remove(model);
            }
        }
        state.journal.push(Operation::Automigrate {
            datasource: datasource.to_string(),
            models: models.to_vec(),
        });
        Ok(())
    }

    fn configured_denial_status(&self) -> Option<u16> {
        self.state.lock().denial_status
    }
}

/// Computes a response for a matched request
pub type Handler = Arc<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

#[derive(Clone)]
struct Route {
    method: Method,
    pattern: String,
    handler: Handler,
}

impl Route {
    /// Segment-wise match; `:name` segments match any single segment
    fn matches(&self, request: &HttpRequest) -> bool {
        if self.method != request.method {
            return false;
        }
        let path = request.url.split('?').next().unwrap_or_default();
        let mut expected = self.pattern.split('/');
        let mut actual = path.split('/');
        loop {
            match (expected.next(), actual.next()) {
                (None, None) => return true,
                (Some(e), Some(a)) if e.starts_with(':') && !a.is_empty() => continue,
                (Some(e), Some(a)) if e == a => continue,
                _ => return false,
            }
        }
    }
}

#[derive(Default)]
struct ClientState {
    routes: Vec<Route>,
    requests: Vec<HttpRequest>,
    failure: Option<CollaboratorError>,
}

/// [`HttpClient`] answering from a route table; unmatched requests get 404
#[derive(Clone, Default)]
pub struct ScriptedHttpClient {
    state: Arc<Mutex<ClientState>>,
}

impl ScriptedHttpClient {
    /// Client with no routes
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method pattern` with a fixed response
    pub fn respond(&self, method: Method, pattern: &str, response: HttpResponse) {
        self.respond_with(method, pattern, move |_| response.clone());
    }

    /// Answer `method pattern` by calling `handler`; later routes win
    pub fn respond_with<F>(&self, method: Method, pattern: &str, handler: F)
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        self.state.lock().routes.push(Route {
            method,
            pattern: pattern.to_string(),
            handler: Arc::new(handler),
        });
    }

    /// Fail every send with `error` until cleared
    pub fn fail_with(&self, error: Option<CollaboratorError>) {
        self.state.lock().failure = error;
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.lock().requests.clone()
    }
}

impl fmt::Debug for ScriptedHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ScriptedHttpClient")
            .field(
                "routes",
                &state
                    .routes
                    .iter()
                    .map(|r| format!("{} {}", r.method, r.pattern))
                    .collect::<Vec<_>>(),
            )
            .field("requests", &state.requests.len())
            .finish()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, CollaboratorError> {
        let handler = {
            let mut state = self.state.lock();
            state.requests.push(request.clone());
            if let Some(error) = &state.failure {
                return Err(error.clone());
            }
            state
                .routes
                .iter()
                .rev()
                .find(|route| route.matches(request))
                .map(|route| route.handler.clone())
        };
        Ok(match handler {
            Some(handler) => handler(request),
            None => HttpResponse::status(404),
        })
    }
}
