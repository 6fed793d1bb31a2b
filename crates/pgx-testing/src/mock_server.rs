//! In-memory mock database server for unit testing.
//!
//! This module provides a mock server that hands out [`MockSession`]s through
//! a [`MockFactory`], so the pool can be exercised without a real database.
//!
//! ## Features
//!
//! - Configurable responses keyed by statement text
//! - Per-session scratch state, standing in for temporary tables
//! - Latency injection for statements and for connection setup
//! - Connect-failure injection (authentication, unreachable, negotiation)
//! - Counters for opened, closed and leaked sessions and peak concurrency
//!
//! ## Example
//!
//! ```rust,ignore
//! use pgx_testing::mock_server::{MockResponse, MockServer};
//!
//! let server = MockServer::builder()
//!     .with_response("select 42", MockResponse::scalar_int(42))
//!     .build();
//!
//! let factory = server.factory();
//! // Hand the factory to a pool...
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pgx_session::{
    ConnectError, ConnectionParameters, ExecuteResult, Session, SessionError, SessionFactory,
    Value,
};

/// Endpoint the mock server answers on unless configured otherwise.
pub const DEFAULT_ENDPOINT: &str = "/private/tmp/.s.PGSQL.5432";

/// Handler invoked for statements configured with [`MockResponse::Custom`].
pub type MockHandler = Arc<dyn Fn(&str, &mut SessionScratch) -> MockResponse + Send + Sync>;

/// Mock response configuration.
#[derive(Clone)]
pub enum MockResponse {
    /// Return a single scalar value.
    Scalar(Value),

    /// Return rows affected count (for INSERT/UPDATE/DELETE).
    RowsAffected(u64),

    /// Return a server error.
    Error(String),

    /// Execute a custom handler with access to the session's scratch state.
    Custom(MockHandler),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(v) => f.debug_tuple("Scalar").field(v).finish(),
            Self::RowsAffected(n) => f.debug_tuple("RowsAffected").field(n).finish(),
            Self::Error(message) => f.debug_tuple("Error").field(message).finish(),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl MockResponse {
    /// Create a scalar integer response.
    pub fn scalar_int(value: i32) -> Self {
        Self::Scalar(Value::Int4(value))
    }

    /// Create a scalar text response.
    pub fn scalar_text(value: impl Into<String>) -> Self {
        Self::Scalar(Value::Text(value.into()))
    }

    /// Create an empty result response.
    pub fn empty() -> Self {
        Self::RowsAffected(0)
    }

    /// Create a rows-affected response.
    pub fn affected(count: u64) -> Self {
        Self::RowsAffected(count)
    }

    /// Create an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// Create a response computed by a handler.
    pub fn custom<F>(handler: F) -> Self
    where
        F: Fn(&str, &mut SessionScratch) -> MockResponse + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(handler))
    }
}

/// Session-local state visible to custom handlers.
///
/// Lives exactly as long as the session, like a temporary table.
#[derive(Debug, Default)]
pub struct SessionScratch {
    session_id: u64,
    values: HashMap<String, Value>,
}

impl SessionScratch {
    /// Server-assigned id of the owning session.
    #[must_use]
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Get a stored value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Store a value, returning the previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    /// Check if a key is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

/// Kind of failure to inject into the next connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    /// Reject credentials.
    Authentication,
    /// Pretend the endpoint cannot be reached.
    Unreachable,
    /// Fail during startup negotiation.
    Negotiation,
}

/// Mock server configuration.
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Endpoint sessions must connect to.
    pub endpoint: String,
    /// Users allowed to log in. Empty allows anyone.
    pub users: Vec<String>,
    /// Databases that exist. Empty accepts any name.
    pub databases: Vec<String>,
    /// Responses keyed by normalized statement text.
    pub responses: HashMap<String, MockResponse>,
    /// Response for statements with no configured entry.
    pub default_response: Option<MockResponse>,
    /// Delay applied to every statement.
    pub statement_latency: Option<Duration>,
    /// Delay applied to every connection attempt.
    pub connect_latency: Option<Duration>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            users: Vec::new(),
            databases: Vec::new(),
            responses: HashMap::new(),
            default_response: None,
            statement_latency: None,
            connect_latency: None,
        }
    }
}

/// Builder for [`MockServer`].
#[derive(Debug, Default)]
pub struct MockServerBuilder {
    config: MockServerConfig,
}

impl MockServerBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the endpoint the server answers on.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// Allow a user to log in. Once any user is added, others are rejected.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.config.users.push(user.into());
        self
    }

    /// Declare an existing database. Once any is added, others are rejected.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.config.databases.push(database.into());
        self
    }

    /// Add a response for a statement.
    #[must_use]
    pub fn with_response(mut self, sql: impl AsRef<str>, response: MockResponse) -> Self {
        self.config
            .responses
            .insert(normalize(sql.as_ref()), response);
        self
    }

    /// Set the response for unrecognized statements.
    #[must_use]
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.config.default_response = Some(response);
        self
    }

    /// Delay every statement by the given duration.
    #[must_use]
    pub fn with_statement_latency(mut self, latency: Duration) -> Self {
        self.config.statement_latency = Some(latency);
        self
    }

    /// Delay every connection attempt by the given duration.
    #[must_use]
    pub fn with_connect_latency(mut self, latency: Duration) -> Self {
        self.config.connect_latency = Some(latency);
        self
    }

    /// Build the server.
    pub fn build(self) -> MockServer {
        MockServer::start(self.config)
    }
}

/// Snapshot of server-side counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockServerStats {
    /// Sessions successfully opened.
    pub sessions_opened: u64,
    /// Sessions closed through [`Session::close`].
    pub sessions_closed: u64,
    /// Sessions dropped without being closed.
    pub sessions_dropped: u64,
    /// Sessions currently alive.
    pub live_sessions: usize,
    /// Highest number of simultaneously alive sessions.
    pub peak_live_sessions: usize,
    /// Statements executed across all sessions.
    pub statements: u64,
    /// Connection attempts that failed.
    pub failed_connects: u64,
}

struct ServerShared {
    config: MockServerConfig,
    stopped: Mutex<bool>,
    injected_failures: Mutex<VecDeque<ConnectFailure>>,
    next_session_id: AtomicU64,
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    sessions_dropped: AtomicU64,
    live_sessions: AtomicUsize,
    peak_live_sessions: AtomicUsize,
    statements: AtomicU64,
    failed_connects: AtomicU64,
}

impl ServerShared {
    fn resolve(&self, sql: &str, scratch: &mut SessionScratch) -> MockResponse {
        let key = normalize(sql);
        let mut response = match self.config.responses.get(&key) {
            Some(response) => response.clone(),
            None => match literal_select(&key) {
                Some(value) => MockResponse::Scalar(value),
                None => self.config.default_response.clone().unwrap_or_else(|| {
                    MockResponse::Error(format!("syntax error at or near \"{key}\""))
                }),
            },
        };
        // Handlers may delegate to other responses, including other handlers.
        while let MockResponse::Custom(handler) = response {
            response = handler(&key, scratch);
        }
        response
    }

    fn session_ended(&self, closed: bool) {
        if closed {
            self.sessions_closed.fetch_add(1, Ordering::SeqCst);
        } else {
            self.sessions_dropped.fetch_add(1, Ordering::SeqCst);
        }
        self.live_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory mock server.
///
/// Cloning yields another handle to the same server.
#[derive(Clone)]
pub struct MockServer {
    shared: Arc<ServerShared>,
}

impl MockServer {
    /// Create a new builder for the mock server.
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start a server with the given configuration.
    pub fn start(config: MockServerConfig) -> Self {
        tracing::debug!(endpoint = %config.endpoint, "mock server started");
        Self {
            shared: Arc::new(ServerShared {
                config,
                stopped: Mutex::new(false),
                injected_failures: Mutex::new(VecDeque::new()),
                next_session_id: AtomicU64::new(1),
                sessions_opened: AtomicU64::new(0),
                sessions_closed: AtomicU64::new(0),
                sessions_dropped: AtomicU64::new(0),
                live_sessions: AtomicUsize::new(0),
                peak_live_sessions: AtomicUsize::new(0),
                statements: AtomicU64::new(0),
                failed_connects: AtomicU64::new(0),
            }),
        }
    }

    /// Endpoint the server answers on.
    pub fn endpoint(&self) -> &str {
        &self.shared.config.endpoint
    }

    /// Connection parameters accepted by this server.
    ///
    /// Uses the first configured user and database, or placeholders when
    /// the server accepts anyone.
    pub fn params(&self) -> ConnectionParameters {
        let config = &self.shared.config;
        ConnectionParameters::new(
            config.endpoint.as_str(),
            config.users.first().map_or("pgx_none", String::as_str),
            config.databases.first().map_or("pgx_test", String::as_str),
        )
    }

    /// Create a session factory connected to this server.
    pub fn factory(&self) -> MockFactory {
        MockFactory {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Make the next connection attempt fail with the given kind.
    ///
    /// Failures queue up; each attempt consumes one.
    pub fn inject_connect_failure(&self, failure: ConnectFailure) {
        self.shared.injected_failures.lock().push_back(failure);
    }

    /// Get a snapshot of the server counters.
    pub fn stats(&self) -> MockServerStats {
        let s = &self.shared;
        MockServerStats {
            sessions_opened: s.sessions_opened.load(Ordering::SeqCst),
            sessions_closed: s.sessions_closed.load(Ordering::SeqCst),
            sessions_dropped: s.sessions_dropped.load(Ordering::SeqCst),
            live_sessions: s.live_sessions.load(Ordering::SeqCst),
            peak_live_sessions: s.peak_live_sessions.load(Ordering::SeqCst),
            statements: s.statements.load(Ordering::SeqCst),
            failed_connects: s.failed_connects.load(Ordering::SeqCst),
        }
    }

    /// Number of sessions currently alive.
    pub fn connection_count(&self) -> usize {
        self.shared.live_sessions.load(Ordering::SeqCst)
    }

    /// Stop the server.
    ///
    /// New connection attempts fail as unreachable and statements on
    /// existing sessions fail with a connection reset.
    pub fn stop(&self) {
        *self.shared.stopped.lock() = true;
        tracing::debug!("mock server stopped");
    }

    /// Check if the server has been stopped.
    pub fn is_stopped(&self) -> bool {
        *self.shared.stopped.lock()
    }
}

impl fmt::Debug for MockServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockServer")
            .field("endpoint", &self.shared.config.endpoint)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Session factory that connects to a [`MockServer`].
#[derive(Clone)]
pub struct MockFactory {
    shared: Arc<ServerShared>,
}

impl MockFactory {
    fn refuse(&self, err: ConnectError) -> Result<MockSession, ConnectError> {
        self.shared.failed_connects.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(error = %err, "mock server refused connection");
        Err(err)
    }
}

#[async_trait]
impl SessionFactory for MockFactory {
    type Session = MockSession;

    async fn create_session(
        &self,
        params: &ConnectionParameters,
    ) -> Result<MockSession, ConnectError> {
        if let Some(latency) = self.shared.config.connect_latency {
            tokio::time::sleep(latency).await;
        }

        let config = &self.shared.config;
        let injected = self.shared.injected_failures.lock().pop_front();
        match injected {
            Some(ConnectFailure::Authentication) => {
                return self.refuse(ConnectError::Authentication {
                    user: params.user().to_owned(),
                    message: "password authentication failed".into(),
                });
            }
            Some(ConnectFailure::Unreachable) => {
                return self.refuse(unreachable(params, "connection refused"));
            }
            Some(ConnectFailure::Negotiation) => {
                return self.refuse(ConnectError::Negotiation(
                    "unsupported frontend protocol".into(),
                ));
            }
            None => {}
        }

        if *self.shared.stopped.lock() || params.endpoint() != config.endpoint {
            return self.refuse(unreachable(params, "no such file or directory"));
        }
        if !config.users.is_empty() && !config.users.iter().any(|u| u == params.user()) {
            return self.refuse(ConnectError::Authentication {
                user: params.user().to_owned(),
                message: format!("role \"{}\" does not exist", params.user()),
            });
        }
        if !config.databases.is_empty() && !config.databases.iter().any(|d| d == params.database())
        {
            return self.refuse(ConnectError::Negotiation(format!(
                "database \"{}\" does not exist",
                params.database()
            )));
        }

        let id = self.shared.next_session_id.fetch_add(1, Ordering::SeqCst);
        self.shared.sessions_opened.fetch_add(1, Ordering::SeqCst);
        let live = self.shared.live_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.peak_live_sessions.fetch_max(live, Ordering::SeqCst);
        tracing::trace!(session_id = id, live, "mock session opened");

        Ok(MockSession {
            id,
            shared: Arc::clone(&self.shared),
            scratch: SessionScratch {
                session_id: id,
                values: HashMap::new(),
            },
            statements: 0,
            closed: false,
        })
    }
}

impl fmt::Debug for MockFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockFactory")
            .field("endpoint", &self.shared.config.endpoint)
            .finish()
    }
}

/// A session opened against a [`MockServer`].
pub struct MockSession {
    id: u64,
    shared: Arc<ServerShared>,
    scratch: SessionScratch,
    statements: u64,
    closed: bool,
}

impl MockSession {
    /// Server-assigned session id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Statements executed on this session.
    #[must_use]
    pub fn statements(&self) -> u64 {
        self.statements
    }

    /// Session-local scratch state.
    #[must_use]
    pub fn scratch(&self) -> &SessionScratch {
        &self.scratch
    }

    async fn run(&mut self, sql: &str) -> Result<MockResponse, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        if let Some(latency) = self.shared.config.statement_latency {
            tokio::time::sleep(latency).await;
        }
        if *self.shared.stopped.lock() {
            return Err(SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "server closed the connection unexpectedly",
            )));
        }
        self.statements += 1;
        self.shared.statements.fetch_add(1, Ordering::SeqCst);
        Ok(self.shared.resolve(sql, &mut self.scratch))
    }
}

#[async_trait]
impl Session for MockSession {
    async fn execute(&mut self, command: &str) -> pgx_session::Result<ExecuteResult> {
        match self.run(command).await? {
            MockResponse::RowsAffected(n) => Ok(ExecuteResult::new(command_tag(command, n), n)),
            MockResponse::Scalar(_) => Ok(ExecuteResult::new(command_tag(command, 1), 1)),
            MockResponse::Error(message) => Err(SessionError::Protocol(message)),
            MockResponse::Custom(_) => Err(SessionError::Protocol("unresolved handler".into())),
        }
    }

    async fn query_scalar(&mut self, query: &str) -> pgx_session::Result<Value> {
        match self.run(query).await? {
            MockResponse::Scalar(value) => Ok(value),
            MockResponse::RowsAffected(_) => {
                Err(SessionError::Protocol("query returned no rows".into()))
            }
            MockResponse::Error(message) => Err(SessionError::Protocol(message)),
            MockResponse::Custom(_) => Err(SessionError::Protocol("unresolved handler".into())),
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shared.session_ended(true);
        tracing::trace!(session_id = self.id, "mock session closed");
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        if !self.closed {
            self.shared.session_ended(false);
        }
    }
}

impl fmt::Debug for MockSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockSession")
            .field("id", &self.id)
            .field("statements", &self.statements)
            .field("closed", &self.closed)
            .finish()
    }
}

fn unreachable(params: &ConnectionParameters, message: &str) -> ConnectError {
    ConnectError::Unreachable {
        endpoint: params.endpoint().to_owned(),
        message: message.to_owned(),
    }
}

/// Normalize statement text for lookup: trimmed, no trailing semicolon,
/// lowercase, single-spaced.
pub fn normalize(sql: &str) -> String {
    sql.trim()
        .trim_end_matches(';')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn literal_select(key: &str) -> Option<Value> {
    key.strip_prefix("select ")?
        .parse::<i32>()
        .ok()
        .map(Value::Int4)
}

fn command_tag(command: &str, rows: u64) -> String {
    let verb = command
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase();
    match verb.as_str() {
        "INSERT" => format!("INSERT 0 {rows}"),
        "UPDATE" | "DELETE" | "SELECT" => format!("{verb} {rows}"),
        _ => verb,
    }
}
